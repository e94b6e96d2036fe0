//! Username and password candidates
//!
//! Shapes are fixed: `Promo{dd}{xxx}_DF` usernames and 8-character passwords,
//! drawn from an alphabet without look-alike glyphs. Uniqueness is only
//! probabilistic; the orchestrator checks collisions on top.

use rand::rngs::OsRng;
use rand::Rng;

/// Alphabet without 0/O, 1/l/I
pub const UNAMBIGUOUS_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

pub const USERNAME_PREFIX: &str = "Promo";
pub const USERNAME_SUFFIX: &str = "_DF";
pub const PASSWORD_LEN: usize = 8;

/// Source of credential candidates
pub trait IdentityGenerator: Send + Sync {
    fn generate_username(&self) -> String;
    fn generate_password(&self) -> String;
}

/// Generator backed by the operating system CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdentityGenerator;

impl IdentityGenerator for RandomIdentityGenerator {
    fn generate_username(&self) -> String {
        let mut rng = OsRng;
        let digits: String = (0..2)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        format!(
            "{}{}{}{}",
            USERNAME_PREFIX,
            digits,
            pick(&mut rng, 3),
            USERNAME_SUFFIX
        )
    }

    fn generate_password(&self) -> String {
        pick(&mut OsRng, PASSWORD_LEN)
    }
}

fn pick<R: Rng>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(UNAMBIGUOUS_ALPHABET[rng.gen_range(0..UNAMBIGUOUS_ALPHABET.len())]))
        .collect()
}
