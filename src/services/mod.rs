//! External service clients
//!
//! - **account_api**: registration and login on the account service
//! - **login**: login token cache and fast-entry links
//! - **telegram**: Bot API client (gateway, membership, polling)

pub mod account_api;
pub mod login;
pub mod telegram;

pub use account_api::{
    extract_token, AccountApi, AccountApiConfig, ApiOutcome, Credentials, HttpAccountApi,
};
pub use login::{fragment_url, FastEntryLinks, LoginTokenCache, TOKEN_TTL};
pub use telegram::{TelegramClient, TelegramConfig, Update};
