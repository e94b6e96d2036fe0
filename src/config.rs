//! Configuration for Gatekeeper
//!
//! CLI arguments and environment variable handling using clap.
//! Every flag has an environment fallback so a `.env` file is enough to run.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{GatekeeperError, Result};

/// Gatekeeper - rate-limited registration and paced push delivery
#[derive(Parser, Debug, Clone)]
#[command(name = "gatekeeper")]
#[command(about = "Chat-driven account registration with paced message delivery")]
pub struct Args {
    /// Bot token for the messaging gateway (required)
    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    pub bot_token: Option<String>,

    /// Messaging gateway API base URL
    #[arg(long, env = "TELEGRAM_API_URL", default_value = "https://api.telegram.org")]
    pub telegram_api_url: String,

    /// Address the HTTP surface listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Enable development mode (exposes /dev/register)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Downstream account API settings
    #[command(flatten)]
    pub account: AccountArgs,

    /// Registration flow-control settings
    #[command(flatten)]
    pub registration: RegistrationArgs,

    /// Outbound delivery and tutorial push settings
    #[command(flatten)]
    pub delivery: DeliveryArgs,

    /// Main site opened from the registered menu
    #[arg(long, env = "MAIN_SITE_URL", default_value = "https://www.dealerfoxy.com/")]
    pub main_site_url: String,

    /// Public base URL used to build signed capability links (empty disables them)
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "")]
    pub public_base_url: String,

    /// HMAC secret for signed capability links (empty disables them)
    #[arg(long, env = "ONE_TAP_SECRET", default_value = "")]
    pub one_tap_secret: String,

    /// Validity window of signed capability links in seconds
    #[arg(long, env = "ONE_TAP_TTL_SEC", default_value = "300")]
    pub one_tap_ttl_sec: u64,

    /// Show the signed test links in the registered menu
    #[arg(long, env = "SHOW_TEST_LINKS", default_value = "false")]
    pub show_test_links: bool,

    /// Comma-separated group ids a user must belong to before registering
    #[arg(long, env = "REQUIRED_CHAT_IDS", default_value = "")]
    pub required_chat_ids: String,

    /// Membership positive-cache TTL in seconds
    #[arg(long, env = "MEMBERSHIP_CACHE_TTL_SEC", default_value = "300")]
    pub membership_cache_ttl_sec: u64,

    /// Directory holding registered.json
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// Downstream account API configuration
#[derive(Parser, Debug, Clone)]
pub struct AccountArgs {
    /// Registration endpoint
    #[arg(
        long,
        env = "ACCOUNT_REGISTER_API",
        default_value = "https://api.dealerfoxy.com/user/register"
    )]
    pub register_url: String,

    /// Login endpoint
    #[arg(
        long,
        env = "ACCOUNT_LOGIN_API",
        default_value = "https://api.dealerfoxy.com/user/login?lang=id"
    )]
    pub login_url: String,

    /// Channel tag sent with every registration
    #[arg(long, env = "ACCOUNT_CHANNEL", default_value = "telegram")]
    pub channel: String,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "15000")]
    pub request_timeout_ms: u64,
}

/// Rate limiting and concurrency for registrations
#[derive(Parser, Debug, Clone)]
pub struct RegistrationArgs {
    /// Registrations allowed per user per window
    #[arg(long, env = "REG_PER_USER_POINTS", default_value = "3")]
    pub per_user_points: u32,

    /// Per-user window in seconds
    #[arg(long, env = "REG_PER_USER_DURATION", default_value = "60")]
    pub per_user_duration: u64,

    /// Registrations allowed system-wide per window
    #[arg(long, env = "REG_GLOBAL_POINTS", default_value = "300")]
    pub global_points: u32,

    /// Global window in seconds
    #[arg(long, env = "REG_GLOBAL_DURATION", default_value = "60")]
    pub global_duration: u64,

    /// Minimum gap between two register clicks from one user, in milliseconds
    #[arg(long, env = "REG_COOLDOWN_MS", default_value = "1500")]
    pub cooldown_ms: u64,

    /// Maximum simultaneous downstream registration calls
    #[arg(long, env = "REG_MAX_CONCURRENCY", default_value = "20")]
    pub max_concurrency: usize,
}

/// Outbound delivery pacing and tutorial push configuration
#[derive(Parser, Debug, Clone)]
pub struct DeliveryArgs {
    /// Global send ceiling (messages per second)
    #[arg(long, env = "FUNNEL_GLOBAL_PER_SEC", default_value = "25")]
    pub global_per_sec: u32,

    /// Per-recipient send ceiling (messages per second)
    #[arg(long, env = "FUNNEL_PER_CHAT_PER_SEC", default_value = "1")]
    pub per_chat_per_sec: u32,

    /// Lower bound of the tutorial push delay in milliseconds
    #[arg(long, env = "TUTORIAL_DELAY_MIN_MS", default_value = "10000")]
    pub tutorial_delay_min_ms: u64,

    /// Upper bound of the tutorial push delay in milliseconds
    #[arg(long, env = "TUTORIAL_DELAY_MAX_MS", default_value = "20000")]
    pub tutorial_delay_max_ms: u64,

    /// Form linked from the Dana tutorial
    #[arg(
        long,
        env = "DANA_FORM_URL",
        default_value = "https://forms.google.com/your-form-id"
    )]
    pub dana_form_url: String,

    /// Comma-separated images attached to the win tutorial
    #[arg(long, env = "WIN_TUTORIAL_IMAGE_URLS", default_value = "")]
    pub win_tutorial_image_urls: String,
}

impl Args {
    /// Bot token, if one was configured and is not blank
    pub fn bot_token(&self) -> Option<&str> {
        self.bot_token.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Configured membership groups
    pub fn required_chat_id_list(&self) -> Vec<String> {
        split_list(&self.required_chat_ids)
    }

    /// Path of the persisted registration store
    pub fn registered_file(&self) -> PathBuf {
        self.data_dir.join("registered.json")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.account.request_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bot_token().is_none() {
            return Err(GatekeeperError::Config("TELEGRAM_BOT_TOKEN is required".into()));
        }

        let reg = &self.registration;
        if reg.per_user_points == 0 || reg.global_points == 0 {
            return Err(GatekeeperError::Config(
                "Registration budgets must be at least 1 point".into(),
            ));
        }
        if reg.per_user_duration == 0 || reg.global_duration == 0 {
            return Err(GatekeeperError::Config(
                "Registration windows must be at least 1 second".into(),
            ));
        }
        if reg.max_concurrency == 0 {
            return Err(GatekeeperError::Config("REG_MAX_CONCURRENCY must be at least 1".into()));
        }

        let delivery = &self.delivery;
        if delivery.global_per_sec == 0 || delivery.per_chat_per_sec == 0 {
            return Err(GatekeeperError::Config(
                "Funnel rates must be at least 1 per second".into(),
            ));
        }
        if delivery.tutorial_delay_min_ms > delivery.tutorial_delay_max_ms {
            return Err(GatekeeperError::Config(
                "TUTORIAL_DELAY_MIN_MS must be less than or equal to TUTORIAL_DELAY_MAX_MS".into(),
            ));
        }

        Ok(())
    }
}

impl DeliveryArgs {
    pub fn win_tutorial_images(&self) -> Vec<String> {
        split_list(&self.win_tutorial_image_urls)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
