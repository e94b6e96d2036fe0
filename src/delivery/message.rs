//! Outbound message model
//!
//! Gateway-neutral description of what to send. The gateway client decides
//! how each variant maps onto its API.

use async_trait::async_trait;
use serde::Serialize;

use crate::types::Result;

/// Text formatting understood by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "Markdown")]
    Markdown,
}

/// One inline keyboard button: either a callback or a URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

/// Rows of inline buttons
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new(rows: Vec<Vec<InlineButton>>) -> Self {
        Self { inline_keyboard: rows }
    }
}

/// One photo of a media group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPhoto {
    pub url: String,
    pub caption: Option<String>,
    pub parse_mode: Option<ParseMode>,
}

/// Content of one outbound send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text {
        text: String,
        parse_mode: Option<ParseMode>,
        keyboard: Option<InlineKeyboard>,
        disable_preview: bool,
    },
    Photo {
        url: String,
        caption: Option<String>,
        parse_mode: Option<ParseMode>,
        keyboard: Option<InlineKeyboard>,
    },
    MediaGroup {
        items: Vec<MediaPhoto>,
    },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            parse_mode: None,
            keyboard: None,
            disable_preview: false,
        }
    }

    pub fn photo(url: impl Into<String>, caption: impl Into<String>) -> Self {
        Self::Photo {
            url: url.into(),
            caption: Some(caption.into()),
            parse_mode: None,
            keyboard: None,
        }
    }

    pub fn media_group(items: Vec<MediaPhoto>) -> Self {
        Self::MediaGroup { items }
    }

    /// Set the parse mode (no effect on media groups, which carry it per item)
    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        match &mut self {
            Self::Text { parse_mode, .. } | Self::Photo { parse_mode, .. } => *parse_mode = Some(mode),
            Self::MediaGroup { .. } => {}
        }
        self
    }

    pub fn html(self) -> Self {
        self.parse_mode(ParseMode::Html)
    }

    pub fn markdown(self) -> Self {
        self.parse_mode(ParseMode::Markdown)
    }

    pub fn keyboard(mut self, markup: InlineKeyboard) -> Self {
        match &mut self {
            Self::Text { keyboard, .. } | Self::Photo { keyboard, .. } => *keyboard = Some(markup),
            Self::MediaGroup { .. } => {}
        }
        self
    }

    pub fn without_preview(mut self) -> Self {
        if let Self::Text { disable_preview, .. } = &mut self {
            *disable_preview = true;
        }
        self
    }
}

/// The messaging gateway's send capability
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn deliver(&self, chat_id: i64, message: &OutboundMessage) -> Result<()>;
}
