//! Bot texts and keyboards

use crate::delivery::{InlineButton, InlineKeyboard};

pub const CALLBACK_REGISTER: &str = "register";
pub const CALLBACK_SHOW_USERNAME: &str = "su";
pub const CALLBACK_SHOW_PASSWORD: &str = "sp";
pub const CALLBACK_TUTORIAL_WIN: &str = "tutorial_win";
pub const CALLBACK_TUTORIAL_DANA: &str = "tutorial_dana";

pub const ACK_PROCESSING: &str = "Memproses, mohon tunggu...";
pub const ACK_JOIN_FIRST: &str = "Harap gabung ke grup/kanal dulu";
pub const ACK_ALREADY_REGISTERED: &str = "Sudah terdaftar";
pub const ACK_SUCCESS: &str = "Berhasil";
pub const ACK_FAILED: &str = "Gagal mendaftar";
pub const ACK_USERNAME_SHOWN: &str = "Username ditampilkan";
pub const ACK_PASSWORD_SHOWN: &str = "Kata sandi ditampilkan";
pub const ACK_OPERATION_FAILED: &str = "Operasi gagal, silakan coba lagi nanti";

pub const JOIN_REQUIRED_TEXT: &str = "Gabung ke grup/kanal yang diwajibkan, lalu coba lagi.";
pub const GENERIC_ERROR_TEXT: &str = "Terjadi kesalahan, coba lagi nanti.";
pub const WELCOME_TEXT: &str = "Selamat datang! Klik tombol \"Daftar\" di bawah.";

pub const TUTORIAL_MENU_TEXT: &str = "🎮 **Panduan Tutorial Game**\n\n\
Selamat datang di AllGame! Untuk membantu Anda menikmati pengalaman bermain yang lebih baik, \
kami telah menyiapkan panduan tutorial yang detail.\n\n\
Silakan pilih bantuan yang Anda butuhkan:";

pub const WIN_TUTORIAL_TEXT: &str = "🏆 **Cara Melihat Hasil Game**\n\n\
1️⃣ Setelah masuk game, selesaikan 10 putaran permainan\n\
2️⃣ Lihat jumlah permainan Anda di riwayat game\n\
3️⃣ Tunggu pengumuman pemenangnya pada pukul 01:00 besok (UTC+8)\n\
4️⃣ Periksa akun Dana Anda untuk memastikan hadiah telah diterima";

pub const DANA_TUTORIAL_TEXT: &str = "💰 **Panduan Mengisi Informasi Dana**\n\n\
Untuk memastikan Anda dapat menarik hadiah dengan lancar, silakan ikuti langkah-langkah berikut \
untuk mengisi informasi Dana:\n\n\
1️⃣ Setelah menyelesaikan 10 putaran permainan, klik link Google Form di bawah\n\
2️⃣ Isi informasi akun Dana Anda dengan akurat\n\
3️⃣ Pastikan informasi benar sebelum mengirim formulir\n\
4️⃣ Tunggu distribusi hadiah\n\n\
⚠️ **Pengingat Penting:**\n\
• Pastikan informasi akun Dana akurat dan benar\n\
• Informasi yang salah dapat menyebabkan keterlambatan penarikan\n\
• Setiap akun hanya dapat mengikat satu akun Dana";

pub fn welcome_back_text(username: &str) -> String {
    format!("Selamat datang kembali!\nSudah terdaftar. Username: {}", username)
}

pub fn already_registered_text(username: &str) -> String {
    format!(
        "Anda sudah terdaftar.\nUsername: <code>{}</code>\n\n👇👇Silakan pilih operasi menu",
        username
    )
}

pub fn registered_text(username: &str, password: &str) -> String {
    format!(
        "Pendaftaran berhasil!\nUsername: <code>{}</code>\nKata sandi: <tg-spoiler>{}</tg-spoiler>\n\n👇👇Silakan pilih operasi menu",
        username, password
    )
}

pub fn show_username_text(username: &str) -> String {
    format!("Username: <code>{}</code>", username)
}

pub fn show_password_text(password: &str) -> String {
    format!("Kata sandi: <code>{}</code>", password)
}

pub fn home_keyboard() -> InlineKeyboard {
    InlineKeyboard::new(vec![vec![InlineButton::callback("Daftar", CALLBACK_REGISTER)]])
}

/// Optional signed test links shown under the fast-entry button
#[derive(Debug, Clone, Default)]
pub struct TestLinks {
    pub one_tap: Option<String>,
    pub first_party: Option<String>,
}

/// Keyboard under a registration result
///
/// Fast-entry link when one could be built, otherwise the main site. Test
/// links fall back to the main site too.
pub fn registered_keyboard(
    user_id: &str,
    fragment_link: Option<&str>,
    main_site_url: &str,
    test_links: Option<&TestLinks>,
) -> InlineKeyboard {
    let home = || InlineButton::url("Beranda", main_site_url);
    let mut rows = vec![vec![match fragment_link {
        Some(link) => InlineButton::url("Masuk cepat", link),
        None => home(),
    }]];

    if let Some(links) = test_links {
        for (label, link) in [
            ("Tes login (iframe)", &links.one_tap),
            ("Tes login (form)", &links.first_party),
        ] {
            rows.push(vec![match link {
                Some(link) => InlineButton::url(label, link.as_str()),
                None => home(),
            }]);
        }
    }

    rows.push(vec![
        InlineButton::callback(
            "Lihat username",
            format!("{}|{}", CALLBACK_SHOW_USERNAME, user_id),
        ),
        InlineButton::callback(
            "Lihat sandi",
            format!("{}|{}", CALLBACK_SHOW_PASSWORD, user_id),
        ),
    ]);
    InlineKeyboard::new(rows)
}

pub fn tutorial_menu_keyboard(user_id: &str) -> InlineKeyboard {
    InlineKeyboard::new(vec![
        vec![InlineButton::callback(
            "🏆 Lihat Hasil Kemenangan",
            format!("{}|{}", CALLBACK_TUTORIAL_WIN, user_id),
        )],
        vec![InlineButton::callback(
            "💰 Isi Informasi Dana",
            format!("{}|{}", CALLBACK_TUTORIAL_DANA, user_id),
        )],
    ])
}

pub fn dana_form_keyboard(form_url: &str) -> InlineKeyboard {
    InlineKeyboard::new(vec![vec![InlineButton::url(
        "📝 Isi Formulir Informasi Dana",
        form_url,
    )]])
}

/// Parsed callback payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction<'a> {
    Register,
    ShowUsername(&'a str),
    ShowPassword(&'a str),
    TutorialWin(&'a str),
    TutorialDana(&'a str),
    Unknown,
}

impl<'a> CallbackAction<'a> {
    pub fn parse(data: &'a str) -> Self {
        if data == CALLBACK_REGISTER {
            return Self::Register;
        }
        let Some((action, user_id)) = data.split_once('|') else {
            return Self::Unknown;
        };
        let numeric = !user_id.is_empty() && user_id.bytes().all(|b| b.is_ascii_digit());

        match action {
            CALLBACK_SHOW_USERNAME if numeric => Self::ShowUsername(user_id),
            CALLBACK_SHOW_PASSWORD if numeric => Self::ShowPassword(user_id),
            CALLBACK_TUTORIAL_WIN => Self::TutorialWin(user_id),
            CALLBACK_TUTORIAL_DANA => Self::TutorialDana(user_id),
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(kb: &InlineKeyboard) -> Vec<(String, Option<String>)> {
        kb.inline_keyboard
            .iter()
            .flatten()
            .map(|b| (b.text.clone(), b.url.clone()))
            .collect()
    }

    #[test]
    fn test_registered_keyboard_prefers_fast_entry() {
        let kb = registered_keyboard("42", Some("https://site/#tgToken=x"), "https://site/", None);
        assert_eq!(kb.inline_keyboard.len(), 2);
        assert_eq!(kb.inline_keyboard[0][0].text, "Masuk cepat");
        assert_eq!(kb.inline_keyboard[1][0].callback_data.as_deref(), Some("su|42"));
        assert_eq!(kb.inline_keyboard[1][1].callback_data.as_deref(), Some("sp|42"));
    }

    #[test]
    fn test_registered_keyboard_falls_back_to_home() {
        let links = TestLinks {
            one_tap: Some("https://bot/one-tap-login?uid=42".into()),
            first_party: None,
        };
        let kb = registered_keyboard("42", None, "https://site/", Some(&links));
        let buttons = urls(&kb);
        assert_eq!(buttons[0], ("Beranda".into(), Some("https://site/".into())));
        assert_eq!(buttons[1].0, "Tes login (iframe)");
        assert_eq!(buttons[2], ("Beranda".into(), Some("https://site/".into())));
        assert_eq!(kb.inline_keyboard.len(), 4);
    }

    #[test]
    fn test_callback_parsing() {
        assert_eq!(CallbackAction::parse("register"), CallbackAction::Register);
        assert_eq!(CallbackAction::parse("su|42"), CallbackAction::ShowUsername("42"));
        assert_eq!(CallbackAction::parse("sp|42"), CallbackAction::ShowPassword("42"));
        assert_eq!(CallbackAction::parse("su|abc"), CallbackAction::Unknown);
        assert_eq!(CallbackAction::parse("tutorial_win|42"), CallbackAction::TutorialWin("42"));
        assert_eq!(CallbackAction::parse("tutorial_dana|42"), CallbackAction::TutorialDana("42"));
        assert_eq!(CallbackAction::parse("other"), CallbackAction::Unknown);
    }

    #[test]
    fn test_texts() {
        assert!(registered_text("u", "p").contains("<tg-spoiler>p</tg-spoiler>"));
        assert!(already_registered_text("u").starts_with("Anda sudah terdaftar."));
        assert_eq!(
            tutorial_menu_keyboard("7").inline_keyboard[1][0].callback_data.as_deref(),
            Some("tutorial_dana|7")
        );
    }
}
