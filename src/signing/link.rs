//! Capability link signing
//!
//! A capability link proves that the bot issued it for a given user at a given
//! time: `sig = hex(HMAC-SHA256(secret, "{uid}.{ts}"))`. Verification is
//! stateless and accepts a link for `ttl` seconds either side of `ts`.
//!
//! The secret is zeroized when the signer is dropped.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Landing path for the one-tap link
pub const ONE_TAP_PATH: &str = "/one-tap-login";
/// Landing path for the first-party link
pub const FIRST_PARTY_PATH: &str = "/first-party-login";

/// HMAC signer over `(user_id, issued_at)`
pub struct CapabilityLinkSigner {
    secret: Vec<u8>,
}

impl CapabilityLinkSigner {
    /// Returns `None` for an empty or blank secret; no unsigned links are ever produced
    pub fn from_secret(secret: &str) -> Option<Self> {
        let secret = secret.trim();
        if secret.is_empty() {
            return None;
        }
        Some(Self {
            secret: secret.as_bytes().to_vec(),
        })
    }

    fn mac(&self, user_id: &str, issued_at_millis: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 takes keys of any length"));
        mac.update(format!("{}.{}", user_id, issued_at_millis).as_bytes());
        mac
    }

    /// Lowercase hex signature for `user_id` issued at `issued_at_millis`
    pub fn sign(&self, user_id: &str, issued_at_millis: i64) -> String {
        hex::encode(self.mac(user_id, issued_at_millis).finalize().into_bytes())
    }

    /// Check signature and freshness
    ///
    /// The comparison is constant-time over the exact bytes given: case or
    /// whitespace differences are mismatches.
    pub fn verify(
        &self,
        user_id: &str,
        issued_at_millis: i64,
        signature: &str,
        now_millis: i64,
        ttl_secs: u64,
    ) -> bool {
        let fresh = now_millis.abs_diff(issued_at_millis) <= ttl_secs.saturating_mul(1000);

        let expected = self.sign(user_id, issued_at_millis);
        let sig_ok: bool = expected.as_bytes().ct_eq(signature.as_bytes()).into();

        fresh & sig_ok
    }
}

impl Drop for CapabilityLinkSigner {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for CapabilityLinkSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityLinkSigner")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Builds signed landing URLs against a public base URL
#[derive(Debug)]
pub struct LinkBuilder {
    base_url: String,
    signer: CapabilityLinkSigner,
}

impl LinkBuilder {
    /// `None` when either the base URL or the secret is missing
    pub fn new(base_url: &str, secret: &str) -> Option<Self> {
        let base_url = normalize_base_url(base_url)?;
        let signer = CapabilityLinkSigner::from_secret(secret)?;
        Some(Self { base_url, signer })
    }

    pub fn signer(&self) -> &CapabilityLinkSigner {
        &self.signer
    }

    pub fn one_tap_url(&self, user_id: &str, now_millis: i64) -> String {
        self.url(ONE_TAP_PATH, user_id, now_millis)
    }

    pub fn first_party_url(&self, user_id: &str, now_millis: i64) -> String {
        self.url(FIRST_PARTY_PATH, user_id, now_millis)
    }

    fn url(&self, path: &str, user_id: &str, ts: i64) -> String {
        format!(
            "{}{}?uid={}&ts={}&sig={}",
            self.base_url,
            path,
            urlencoding::encode(user_id),
            ts,
            self.signer.sign(user_id, ts)
        )
    }
}

/// Trim, add `https://` when no scheme is present, strip trailing slashes
pub fn normalize_base_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };
    Some(with_scheme.trim_end_matches('/').to_string())
}
