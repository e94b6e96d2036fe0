//! Tutorial follow-ups
//!
//! The tutorial menu is the delayed push fired after registration or after a
//! signed link is opened; its two buttons lead to the win and Dana guides.

use async_trait::async_trait;
use tracing::warn;

use super::menus::{
    dana_form_keyboard, tutorial_menu_keyboard, DANA_TUTORIAL_TEXT, TUTORIAL_MENU_TEXT,
    WIN_TUTORIAL_TEXT,
};
use crate::delivery::{DeliveryFunnel, MediaPhoto, OutboundMessage, ParseMode, PushAction};
use crate::types::{GatekeeperError, Result};

pub struct Tutorials {
    funnel: DeliveryFunnel,
    win_images: Vec<String>,
    dana_form_url: String,
}

impl Tutorials {
    pub fn new(funnel: DeliveryFunnel, win_images: Vec<String>, dana_form_url: impl Into<String>) -> Self {
        Self {
            funnel,
            win_images,
            dana_form_url: dana_form_url.into(),
        }
    }

    pub async fn send_menu(&self, chat_id: i64, user_id: &str) -> Result<()> {
        let menu = OutboundMessage::text(TUTORIAL_MENU_TEXT)
            .markdown()
            .keyboard(tutorial_menu_keyboard(user_id));
        self.funnel.send(chat_id, menu).await
    }

    /// Win guide as text, one photo, or an album, per configured images
    ///
    /// Falls back to plain text when an image send fails.
    pub async fn send_win_tutorial(&self, chat_id: i64) -> Result<()> {
        let sent = match self.win_images.as_slice() {
            [] => return self.send_win_text(chat_id).await,
            [single] => {
                let photo = OutboundMessage::photo(single.as_str(), WIN_TUTORIAL_TEXT).markdown();
                self.funnel.send(chat_id, photo).await
            }
            many => {
                let items = many
                    .iter()
                    .enumerate()
                    .map(|(i, url)| MediaPhoto {
                        url: url.clone(),
                        caption: (i == 0).then(|| WIN_TUTORIAL_TEXT.to_string()),
                        parse_mode: (i == 0).then_some(ParseMode::Markdown),
                    })
                    .collect();
                self.funnel.send_media_group(chat_id, items).await
            }
        };

        if let Err(e) = sent {
            warn!(chat_id, "Win tutorial images failed, sending text: {}", e);
            return self.send_win_text(chat_id).await;
        }
        Ok(())
    }

    async fn send_win_text(&self, chat_id: i64) -> Result<()> {
        self.funnel
            .send(chat_id, OutboundMessage::text(WIN_TUTORIAL_TEXT).markdown())
            .await
    }

    pub async fn send_dana_tutorial(&self, chat_id: i64) -> Result<()> {
        let message = OutboundMessage::text(DANA_TUTORIAL_TEXT)
            .markdown()
            .keyboard(dana_form_keyboard(&self.dana_form_url));
        self.funnel.send(chat_id, message).await
    }
}

/// Delayed push: the tutorial menu in the user's private chat
#[async_trait]
impl PushAction for Tutorials {
    async fn fire(&self, user_id: &str) -> Result<()> {
        let chat_id: i64 = user_id
            .parse()
            .map_err(|_| GatekeeperError::BadRequest(format!("not a chat id: {:?}", user_id)))?;
        self.send_menu(chat_id, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::funnel::tests::RecordingGateway;
    use crate::delivery::FunnelConfig;
    use std::sync::Arc;

    fn tutorials(images: &[&str], fail_photos: bool) -> (Tutorials, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway {
            fail_photos,
            ..Default::default()
        });
        let funnel = DeliveryFunnel::new(FunnelConfig::default(), gateway.clone());
        let images = images.iter().map(|s| s.to_string()).collect();
        (Tutorials::new(funnel, images, "https://forms.example/dana"), gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_sends_menu_to_private_chat() {
        let (tutorials, gateway) = tutorials(&[], false);
        tutorials.fire("42").await.unwrap();

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 42);
        match &sent[0].1 {
            OutboundMessage::Text { text, parse_mode, keyboard, .. } => {
                assert_eq!(text, TUTORIAL_MENU_TEXT);
                assert_eq!(*parse_mode, Some(ParseMode::Markdown));
                assert_eq!(
                    keyboard.as_ref().unwrap().inline_keyboard[0][0].callback_data.as_deref(),
                    Some("tutorial_win|42")
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(tutorials.fire("not-a-number").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_win_tutorial_shapes() {
        let (single, gateway) = tutorials(&["https://img/1.png"], false);
        single.send_win_tutorial(1).await.unwrap();
        assert!(matches!(gateway.sent()[0].1, OutboundMessage::Photo { .. }));

        let (album, gateway) = tutorials(&["https://img/1.png", "https://img/2.png"], false);
        album.send_win_tutorial(1).await.unwrap();
        match &gateway.sent()[0].1 {
            OutboundMessage::MediaGroup { items } => {
                assert_eq!(items.len(), 2);
                assert!(items[0].caption.is_some());
                assert!(items[1].caption.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_win_tutorial_falls_back_to_text() {
        let (tutorials, gateway) = tutorials(&["https://img/broken.png"], true);
        tutorials.send_win_tutorial(1).await.unwrap();

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0].1, OutboundMessage::Text { text, .. } if text == WIN_TUTORIAL_TEXT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dana_tutorial_has_form_button() {
        let (tutorials, gateway) = tutorials(&[], false);
        tutorials.send_dana_tutorial(9).await.unwrap();
        match &gateway.sent()[0].1 {
            OutboundMessage::Text { keyboard, .. } => {
                let button = &keyboard.as_ref().unwrap().inline_keyboard[0][0];
                assert_eq!(button.url.as_deref(), Some("https://forms.example/dana"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
