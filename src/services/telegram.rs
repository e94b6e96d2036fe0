//! Telegram Bot API client
//!
//! Thin reqwest wrapper over the handful of Bot API methods the gatekeeper
//! uses. Implements [`MessageGateway`] for the delivery funnel and
//! [`MembershipQuery`] for the membership cache.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::debug;

use crate::delivery::{InlineKeyboard, MessageGateway, OutboundMessage, ParseMode};
use crate::membership::MembershipQuery;
use crate::types::{GatekeeperError, Result};

/// Telegram user
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

/// One incoming update; only the kinds the bot handles are decoded
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

/// Bot API response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the envelope; `ok: false` carries the Bot API error code
    fn into_result(self, method: &str) -> Result<T> {
        if !self.ok {
            return Err(GatekeeperError::Upstream {
                status: self
                    .error_code
                    .and_then(|code| u16::try_from(code).ok())
                    .unwrap_or_default(),
                message: format!(
                    "{}: {}",
                    method,
                    self.description.unwrap_or_else(|| "no description".into())
                ),
            });
        }
        self.result
            .ok_or_else(|| GatekeeperError::Gateway(format!("{} returned no result", method)))
    }
}

#[derive(Serialize)]
struct InputMediaPhoto<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<ParseMode>,
}

/// Telegram client configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: String,
    pub request_timeout: Duration,
    /// Long-poll wait passed to getUpdates
    pub poll_timeout: Duration,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            bot_token: bot_token.into(),
            request_timeout: Duration::from_secs(15),
            poll_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TelegramClient {
    config: TelegramConfig,
    http_client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &JsonValue,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let mut request = self.http_client.post(self.method_url(method)).json(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response: ApiResponse<T> = request.send().await?.json().await?;
        response.into_result(method)
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let wait = self.config.poll_timeout;
        let params = json!({
            "offset": offset,
            "timeout": wait.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &params, Some(wait + self.config.request_timeout))
            .await
    }

    pub async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut params = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            params["text"] = json!(text);
        }
        self.call::<bool>("answerCallbackQuery", &params, None).await?;
        Ok(())
    }

    /// Switch the bot to polling mode, optionally dropping queued updates
    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<()> {
        let params = json!({ "drop_pending_updates": drop_pending_updates });
        self.call::<bool>("deleteWebhook", &params, None).await?;
        Ok(())
    }
}

/// Bot API method and parameters for one outbound message
fn send_request(chat_id: i64, message: &OutboundMessage) -> (&'static str, JsonValue) {
    fn with_markup(params: &mut JsonValue, keyboard: &Option<InlineKeyboard>) {
        if let Some(keyboard) = keyboard {
            params["reply_markup"] = json!(keyboard);
        }
    }
    fn with_parse_mode(params: &mut JsonValue, mode: &Option<ParseMode>) {
        if let Some(mode) = mode {
            params["parse_mode"] = json!(mode);
        }
    }

    match message {
        OutboundMessage::Text {
            text,
            parse_mode,
            keyboard,
            disable_preview,
        } => {
            let mut params = json!({ "chat_id": chat_id, "text": text });
            with_parse_mode(&mut params, parse_mode);
            with_markup(&mut params, keyboard);
            if *disable_preview {
                params["disable_web_page_preview"] = json!(true);
            }
            ("sendMessage", params)
        }
        OutboundMessage::Photo {
            url,
            caption,
            parse_mode,
            keyboard,
        } => {
            let mut params = json!({ "chat_id": chat_id, "photo": url });
            if let Some(caption) = caption {
                params["caption"] = json!(caption);
            }
            with_parse_mode(&mut params, parse_mode);
            with_markup(&mut params, keyboard);
            ("sendPhoto", params)
        }
        OutboundMessage::MediaGroup { items } => {
            let media: Vec<_> = items
                .iter()
                .map(|item| InputMediaPhoto {
                    kind: "photo",
                    media: &item.url,
                    caption: item.caption.as_deref(),
                    parse_mode: item.parse_mode,
                })
                .collect();
            ("sendMediaGroup", json!({ "chat_id": chat_id, "media": media }))
        }
    }
}

#[async_trait]
impl MessageGateway for TelegramClient {
    async fn deliver(&self, chat_id: i64, message: &OutboundMessage) -> Result<()> {
        let (method, params) = send_request(chat_id, message);
        let _: JsonValue = self.call(method, &params, None).await?;
        debug!(chat_id, method, "Sent");
        Ok(())
    }
}

#[async_trait]
impl MembershipQuery for TelegramClient {
    async fn member_status(&self, group_id: i64, user_id: &str) -> Result<String> {
        let user_id: i64 = user_id
            .parse()
            .map_err(|_| GatekeeperError::BadRequest(format!("invalid user id {:?}", user_id)))?;
        let params = json!({ "chat_id": group_id, "user_id": user_id });
        let member: ChatMember = self.call("getChatMember", &params, None).await?;
        Ok(member.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{InlineButton, MediaPhoto};

    #[test]
    fn test_method_url() {
        let client = TelegramClient::new(TelegramConfig {
            api_url: "http://localhost:8081/".into(),
            ..TelegramConfig::new("123:abc")
        })
        .unwrap();
        assert_eq!(
            client.method_url("getMe"),
            "http://localhost:8081/bot123:abc/getMe"
        );
    }

    #[test]
    fn test_text_request() {
        let msg = OutboundMessage::text("<b>hi</b>")
            .html()
            .without_preview()
            .keyboard(InlineKeyboard::new(vec![vec![InlineButton::callback("Daftar", "register")]]));
        let (method, params) = send_request(5, &msg);
        assert_eq!(method, "sendMessage");
        assert_eq!(params["chat_id"], 5);
        assert_eq!(params["parse_mode"], "HTML");
        assert_eq!(params["disable_web_page_preview"], true);
        assert_eq!(params["reply_markup"]["inline_keyboard"][0][0]["callback_data"], "register");
    }

    #[test]
    fn test_media_group_request() {
        let msg = OutboundMessage::media_group(vec![
            MediaPhoto {
                url: "https://img/1.png".into(),
                caption: Some("cap".into()),
                parse_mode: Some(ParseMode::Markdown),
            },
            MediaPhoto {
                url: "https://img/2.png".into(),
                caption: None,
                parse_mode: None,
            },
        ]);
        let (method, params) = send_request(5, &msg);
        assert_eq!(method, "sendMediaGroup");
        assert_eq!(params["media"][0]["type"], "photo");
        assert_eq!(params["media"][0]["parse_mode"], "Markdown");
        assert!(params["media"][1].get("caption").is_none());
    }

    #[test]
    fn test_update_decoding() {
        let raw = r#"{
            "update_id": 10,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 42, "is_bot": false, "first_name": "A"},
                "message": {"message_id": 3, "chat": {"id": 42, "type": "private"}},
                "data": "su|42"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let query = update.callback_query.unwrap();
        assert_eq!(query.from.id, 42);
        assert_eq!(query.data.as_deref(), Some("su|42"));
        assert!(update.message.is_none());
    }

    #[test]
    fn test_error_envelope() {
        let raw = r#"{"ok": false, "error_code": 403, "description": "Forbidden: bot was blocked by the user"}"#;
        let response: ApiResponse<JsonValue> = serde_json::from_str(raw).unwrap();
        assert!(!response.ok);
        assert_eq!(response.error_code, Some(403));

        match response.into_result("sendMessage") {
            Err(GatekeeperError::Upstream { status, message }) => {
                assert_eq!(status, 403);
                assert!(message.starts_with("sendMessage: Forbidden"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let empty: ApiResponse<JsonValue> = serde_json::from_str(r#"{"ok": true}"#).unwrap();
        assert!(matches!(empty.into_result("getMe"), Err(GatekeeperError::Gateway(_))));
    }
}
