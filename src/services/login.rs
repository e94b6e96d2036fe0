//! Fast-entry login links
//!
//! Logs a registered user in on the account service and hands the token to
//! the main site through the URL fragment, so it never reaches a server log.
//! Tokens are cached per device for a few minutes; expired entries are
//! evicted when read.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::account_api::{extract_token, AccountApi, ApiOutcome, Credentials};
use crate::registration::CredentialStore;

/// Default lifetime of a cached login token
pub const TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    obtained_at: Instant,
}

/// device id -> login token, with TTL
#[derive(Debug)]
pub struct LoginTokenCache {
    tokens: DashMap<String, CachedToken>,
    ttl: Duration,
}

impl LoginTokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, device_id: &str) -> Option<String> {
        let fresh = self
            .tokens
            .get(device_id)
            .map(|entry| (entry.obtained_at.elapsed() <= self.ttl, entry.token.clone()));

        match fresh {
            Some((true, token)) => Some(token),
            Some((false, _)) => {
                self.tokens.remove(device_id);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, device_id: &str, token: String) {
        self.tokens.insert(
            device_id.to_string(),
            CachedToken {
                token,
                obtained_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for LoginTokenCache {
    fn default() -> Self {
        Self::new(TOKEN_TTL)
    }
}

/// `{main_site}?lang=id#tgToken=..&username=..`
///
/// Any fragment already on `main_site` is discarded; `lang=id` is appended to
/// an existing query instead of starting a new one.
pub fn fragment_url(main_site: &str, token: &str, username: &str) -> String {
    let base = main_site.split('#').next().unwrap_or_default();
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}lang=id#tgToken={}",
        base,
        separator,
        urlencoding::encode(token)
    );
    if !username.is_empty() {
        url.push_str("&username=");
        url.push_str(&urlencoding::encode(username));
    }
    url
}

/// Builds fast-entry links for registered users
pub struct FastEntryLinks {
    store: Arc<dyn CredentialStore>,
    api: Arc<dyn AccountApi>,
    tokens: LoginTokenCache,
    main_site_url: String,
}

impl FastEntryLinks {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        api: Arc<dyn AccountApi>,
        tokens: LoginTokenCache,
        main_site_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            api,
            tokens,
            main_site_url: main_site_url.into(),
        }
    }

    pub fn main_site_url(&self) -> &str {
        &self.main_site_url
    }

    /// Fast-entry link for `user_id`, or `None` when the user is unknown or
    /// login does not produce a token
    pub async fn fragment_link(&self, user_id: &str) -> Option<String> {
        let record = self.store.get(user_id)?;

        if let Some(token) = self.tokens.get(user_id) {
            return Some(fragment_url(&self.main_site_url, &token, &record.username));
        }

        let credentials = Credentials {
            username: record.username.clone(),
            password: record.password.clone(),
            device_id: user_id.to_string(),
        };
        let body = match self.api.login(&credentials).await {
            Ok(ApiOutcome::Accepted(body)) => body,
            Ok(ApiOutcome::Rejected { status, message }) => {
                debug!(user_id, status, "Login rejected: {}", message);
                return None;
            }
            Err(e) => {
                debug!(user_id, "Login failed: {}", e);
                return None;
            }
        };

        let token = extract_token(&body)?;
        self.tokens.insert(user_id, token.clone());
        Some(fragment_url(&self.main_site_url, &token, &record.username))
    }
}
