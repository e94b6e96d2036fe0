//! Update dispatch
//!
//! Routes commands and button callbacks. Every reply goes through the
//! delivery funnel; callback acknowledgements are best-effort and never fail
//! a handler.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::menus::{self, CallbackAction, TestLinks};
use super::tutorial::Tutorials;
use super::BotApi;
use crate::delivery::{DelayedPushScheduler, DeliveryFunnel, InlineKeyboard, OutboundMessage};
use crate::membership::MembershipCache;
use crate::registration::{CredentialStore, RegistrationOrchestrator, RegistrationOutcome};
use crate::services::telegram::{CallbackQuery, Message, Update};
use crate::services::FastEntryLinks;
use crate::signing::LinkBuilder;
use crate::types::{now_millis, Result};

/// Cooldown markers beyond this count are pruned on insert
const COOLDOWN_SOFT_LIMIT: usize = 10_000;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Minimum gap between two register requests from one user
    pub register_cooldown: Duration,
    pub show_test_links: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            register_cooldown: Duration::from_millis(1500),
            show_test_links: false,
        }
    }
}

/// Collaborators the dispatcher routes to
pub struct DispatcherDeps {
    pub api: Arc<dyn BotApi>,
    pub store: Arc<dyn CredentialStore>,
    pub orchestrator: Arc<RegistrationOrchestrator>,
    pub membership: Arc<MembershipCache>,
    pub funnel: DeliveryFunnel,
    pub scheduler: DelayedPushScheduler,
    pub tutorials: Arc<Tutorials>,
    pub fast_entry: Arc<FastEntryLinks>,
    pub links: Option<Arc<LinkBuilder>>,
}

pub struct Dispatcher {
    deps: DispatcherDeps,
    config: DispatcherConfig,
    last_register: DashMap<String, Instant>,
    in_flight: DashMap<String, ()>,
}

/// Marks a user's register request as running until dropped
struct InFlight<'a> {
    markers: &'a DashMap<String, ()>,
    user_id: String,
}

impl<'a> InFlight<'a> {
    fn claim(markers: &'a DashMap<String, ()>, user_id: &str) -> Option<Self> {
        match markers.entry(user_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    markers,
                    user_id: user_id.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.markers.remove(&self.user_id);
    }
}

impl Dispatcher {
    pub fn new(deps: DispatcherDeps, config: DispatcherConfig) -> Self {
        Self {
            deps,
            config,
            last_register: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn api(&self) -> &Arc<dyn BotApi> {
        &self.deps.api
    }

    /// Handle one update; failures are logged and answered with a generic error
    pub async fn handle_update(&self, update: Update) {
        let (chat_id, result) = if let Some(query) = update.callback_query {
            let chat_id = query
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(query.from.id);
            (chat_id, self.handle_callback(chat_id, query).await)
        } else if let Some(message) = update.message {
            let chat_id = message.chat.id;
            (chat_id, self.handle_message(message).await)
        } else {
            return;
        };

        if let Err(e) = result {
            error!(update_id = update.update_id, chat_id, "Update handling failed: {}", e);
            if let Err(e) = self
                .deps
                .funnel
                .send_text(chat_id, menus::GENERIC_ERROR_TEXT, None)
                .await
            {
                debug!(chat_id, "Error notice not delivered: {}", e);
            }
        }
    }

    async fn handle_message(&self, message: Message) -> Result<()> {
        let (Some(from), Some(text)) = (message.from.as_ref(), message.text.as_deref()) else {
            return Ok(());
        };
        let user_id = from.id.to_string();
        let command = text
            .split_whitespace()
            .next()
            .and_then(|token| token.split('@').next())
            .unwrap_or_default();

        match command {
            "/start" => self.handle_start(message.chat.id, &user_id).await,
            "/register" => self.handle_register(message.chat.id, &user_id, None).await,
            _ => Ok(()),
        }
    }

    async fn handle_callback(&self, chat_id: i64, query: CallbackQuery) -> Result<()> {
        let user_id = query.from.id.to_string();
        let data = query.data.as_deref().unwrap_or_default();

        match CallbackAction::parse(data) {
            CallbackAction::Register => {
                self.handle_register(chat_id, &user_id, Some(&query.id)).await
            }
            CallbackAction::ShowUsername(owner) => {
                self.ack(Some(&query.id), Some(menus::ACK_USERNAME_SHOWN)).await;
                match self.owned_record(&user_id, owner) {
                    Some(record) => {
                        self.reply_html(chat_id, menus::show_username_text(&record.username))
                            .await
                    }
                    None => Ok(()),
                }
            }
            CallbackAction::ShowPassword(owner) => {
                self.ack(Some(&query.id), Some(menus::ACK_PASSWORD_SHOWN)).await;
                match self.owned_record(&user_id, owner) {
                    Some(record) => {
                        self.reply_html(chat_id, menus::show_password_text(&record.password))
                            .await
                    }
                    None => Ok(()),
                }
            }
            CallbackAction::TutorialWin(_) => {
                self.ack(Some(&query.id), None).await;
                let sent = self.deps.tutorials.send_win_tutorial(chat_id).await;
                self.after_tutorial(&query.id, sent).await;
                Ok(())
            }
            CallbackAction::TutorialDana(_) => {
                self.ack(Some(&query.id), None).await;
                let sent = self.deps.tutorials.send_dana_tutorial(chat_id).await;
                self.after_tutorial(&query.id, sent).await;
                Ok(())
            }
            CallbackAction::Unknown => {
                debug!(user_id = %user_id, data, "Unhandled callback");
                self.ack(Some(&query.id), None).await;
                Ok(())
            }
        }
    }

    async fn after_tutorial(&self, callback_id: &str, sent: Result<()>) {
        if let Err(e) = sent {
            warn!("Tutorial delivery failed: {}", e);
            self.ack(Some(callback_id), Some(menus::ACK_OPERATION_FAILED))
                .await;
        }
    }

    async fn handle_start(&self, chat_id: i64, user_id: &str) -> Result<()> {
        let message = match self.deps.store.get(user_id) {
            Some(record) => OutboundMessage::text(menus::welcome_back_text(&record.username)),
            None => OutboundMessage::text(menus::WELCOME_TEXT).keyboard(menus::home_keyboard()),
        };
        self.deps.funnel.send(chat_id, message).await
    }

    async fn handle_register(
        &self,
        chat_id: i64,
        user_id: &str,
        callback_id: Option<&str>,
    ) -> Result<()> {
        let now = Instant::now();
        let cooling_down = self
            .last_register
            .get(user_id)
            .map(|last| now.duration_since(*last) < self.config.register_cooldown)
            .unwrap_or(false);
        if cooling_down {
            self.ack(callback_id, Some(menus::ACK_PROCESSING)).await;
            return Ok(());
        }
        let Some(_in_flight) = InFlight::claim(&self.in_flight, user_id) else {
            self.ack(callback_id, Some(menus::ACK_PROCESSING)).await;
            return Ok(());
        };
        self.mark_register(user_id, now);

        if !self.deps.membership.is_member(user_id).await {
            self.ack(callback_id, Some(menus::ACK_JOIN_FIRST)).await;
            return self
                .deps
                .funnel
                .send_text(chat_id, menus::JOIN_REQUIRED_TEXT, None)
                .await;
        }

        let outcome = self.deps.orchestrator.register(user_id).await;
        match &outcome {
            RegistrationOutcome::AlreadyRegistered { username } => {
                self.ack(callback_id, Some(menus::ACK_ALREADY_REGISTERED)).await;
                let keyboard = self.registered_keyboard(user_id).await;
                self.deps.scheduler.schedule_push(user_id, None);
                self.reply_menu(chat_id, menus::already_registered_text(username), keyboard)
                    .await
            }
            RegistrationOutcome::Success { username, password } => {
                self.ack(callback_id, Some(menus::ACK_SUCCESS)).await;
                info!(user_id, username = %username, "Registered");
                let keyboard = self.registered_keyboard(user_id).await;
                self.deps.scheduler.schedule_push(user_id, None);
                self.reply_menu(chat_id, menus::registered_text(username, password), keyboard)
                    .await
            }
            RegistrationOutcome::RateLimited { .. } => {
                self.ack(callback_id, Some(outcome.status_message())).await;
                self.deps
                    .funnel
                    .send_text(chat_id, outcome.status_message(), None)
                    .await
            }
            RegistrationOutcome::Failed { reason } => {
                self.ack(callback_id, Some(menus::ACK_FAILED)).await;
                error!(user_id, "Registration failed: {}", reason);
                self.deps
                    .funnel
                    .send_text(chat_id, outcome.status_message(), None)
                    .await
            }
        }
    }

    fn mark_register(&self, user_id: &str, now: Instant) {
        self.last_register.insert(user_id.to_string(), now);
        if self.last_register.len() > COOLDOWN_SOFT_LIMIT {
            let cooldown = self.config.register_cooldown;
            self.last_register
                .retain(|_, last| now.duration_since(*last) < cooldown);
        }
    }

    /// Record for `owner`, only when the clicking user is the owner
    fn owned_record(
        &self,
        clicking_user: &str,
        owner: &str,
    ) -> Option<crate::registration::RegistrationRecord> {
        if clicking_user != owner {
            return None;
        }
        self.deps.store.get(owner)
    }

    async fn registered_keyboard(&self, user_id: &str) -> InlineKeyboard {
        let fragment = self.deps.fast_entry.fragment_link(user_id).await;
        let test_links = self.config.show_test_links.then(|| {
            let now = now_millis();
            TestLinks {
                one_tap: self.deps.links.as_ref().map(|l| l.one_tap_url(user_id, now)),
                first_party: self
                    .deps
                    .links
                    .as_ref()
                    .map(|l| l.first_party_url(user_id, now)),
            }
        });
        menus::registered_keyboard(
            user_id,
            fragment.as_deref(),
            self.deps.fast_entry.main_site_url(),
            test_links.as_ref(),
        )
    }

    async fn reply_menu(&self, chat_id: i64, text: String, keyboard: InlineKeyboard) -> Result<()> {
        let message = OutboundMessage::text(text)
            .html()
            .without_preview()
            .keyboard(keyboard);
        self.deps.funnel.send(chat_id, message).await
    }

    async fn reply_html(&self, chat_id: i64, text: String) -> Result<()> {
        self.deps
            .funnel
            .send(chat_id, OutboundMessage::text(text).html())
            .await
    }

    /// Answer a callback once; failures are only logged
    async fn ack(&self, callback_id: Option<&str>, text: Option<&str>) {
        let Some(callback_id) = callback_id else {
            return;
        };
        if let Err(e) = self.deps.api.answer_callback_query(callback_id, text).await {
            debug!(callback_id, "Callback acknowledgement failed: {}", e);
        }
    }
}
