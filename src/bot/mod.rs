//! Chat bot front end
//!
//! Long-polls the messaging gateway for updates and hands each one to the
//! [`Dispatcher`] on its own task.

pub mod handlers;
pub mod menus;
pub mod tutorial;

pub use handlers::{Dispatcher, DispatcherConfig, DispatcherDeps};
pub use tutorial::Tutorials;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::services::telegram::{TelegramClient, Update};
use crate::types::Result;

/// Pause before polling again after a failed getUpdates
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// The gateway calls the bot loop needs besides sending
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}

#[async_trait]
impl BotApi for TelegramClient {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        TelegramClient::get_updates(self, offset).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        TelegramClient::answer_callback_query(self, callback_id, text).await
    }
}

/// Poll until `shutdown` flips to true (or its sender is dropped)
pub async fn run_polling(dispatcher: Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>) {
    info!("Bot polling started");
    let api = Arc::clone(dispatcher.api());
    let mut offset = 0i64;

    while !*shutdown.borrow() {
        let polled = tokio::select! {
            _ = shutdown.changed() => break,
            polled = api.get_updates(offset) => polled,
        };

        match polled {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move { dispatcher.handle_update(update).await });
                }
            }
            Err(e) => {
                warn!("Polling for updates failed: {}", e);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                }
            }
        }
    }

    info!("Bot polling stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::handlers::tests::fixture;

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_on_shutdown() {
        let f = fixture("member", &[]);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let polling = tokio::spawn(run_polling(Arc::new(f.dispatcher), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), polling)
            .await
            .expect("polling loop did not stop")
            .unwrap();
    }
}
