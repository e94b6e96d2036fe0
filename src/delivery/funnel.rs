//! Outbound delivery funnel
//!
//! Every send in the process goes through one FIFO queue drained by a single
//! worker task, which owns all pacing state:
//! - no send starts sooner than the global step after the previous send
//! - no send to a recipient starts sooner than the per-recipient step after
//!   the previous send to that recipient
//!
//! The worker waits the larger of the two, runs the job, then stamps both
//! clocks. Failures are logged and handed back to the producer; the funnel
//! never retries and never lets one failure stall the queue.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::message::{InlineKeyboard, MediaPhoto, MessageGateway, OutboundMessage};
use crate::types::{GatekeeperError, Result};

/// Recipient clocks older than this many entries get pruned
const RECIPIENT_CLOCK_SOFT_LIMIT: usize = 10_000;

type SendAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// One queued send
struct FunnelJob {
    recipient: i64,
    action: SendAction,
    enqueued_at: Instant,
    done: oneshot::Sender<Result<()>>,
}

/// Pacing configuration
#[derive(Debug, Clone, Copy)]
pub struct FunnelConfig {
    /// Global ceiling in sends per second
    pub global_per_sec: u32,
    /// Per-recipient ceiling in sends per second
    pub per_recipient_per_sec: u32,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            global_per_sec: 25,
            per_recipient_per_sec: 1,
        }
    }
}

impl FunnelConfig {
    /// Minimum gap between any two sends
    pub fn global_step(&self) -> Duration {
        step_for(self.global_per_sec)
    }

    /// Minimum gap between two sends to one recipient
    pub fn recipient_step(&self) -> Duration {
        step_for(self.per_recipient_per_sec)
    }
}

fn step_for(per_sec: u32) -> Duration {
    let millis = 1000u64.checked_div(u64::from(per_sec)).unwrap_or(1000);
    Duration::from_millis(millis.max(1))
}

/// Handle to the process-wide delivery queue
#[derive(Clone)]
pub struct DeliveryFunnel {
    queue_tx: mpsc::UnboundedSender<FunnelJob>,
    gateway: Arc<dyn MessageGateway>,
}

impl DeliveryFunnel {
    /// Start the drain worker and return a producer handle
    pub fn new(config: FunnelConfig, gateway: Arc<dyn MessageGateway>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        info!(
            "Starting delivery funnel (global step {:?}, per-recipient step {:?})",
            config.global_step(),
            config.recipient_step()
        );
        tokio::spawn(drain(queue_rx, config));
        Self { queue_tx, gateway }
    }

    /// Queue `action` for `recipient` without waiting for it to run
    ///
    /// Submission order is execution order.
    pub fn submit<F, Fut>(&self, recipient: i64, action: F) -> oneshot::Receiver<Result<()>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (done, outcome) = oneshot::channel();
        let job = FunnelJob {
            recipient,
            action: Box::new(move || action().boxed()),
            enqueued_at: Instant::now(),
            done,
        };
        if let Err(mpsc::error::SendError(job)) = self.queue_tx.send(job) {
            let _ = job
                .done
                .send(Err(GatekeeperError::Internal("Delivery funnel closed".into())));
        }
        outcome
    }

    /// Queue `action` and wait for its outcome
    pub async fn enqueue<F, Fut>(&self, recipient: i64, action: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.submit(recipient, action)
            .await
            .map_err(|_| GatekeeperError::Internal("Delivery funnel dropped the job".into()))?
    }

    /// Queue a gateway send
    pub async fn send(&self, chat_id: i64, message: OutboundMessage) -> Result<()> {
        let gateway = Arc::clone(&self.gateway);
        self.enqueue(chat_id, move || async move { gateway.deliver(chat_id, &message).await })
            .await
    }

    pub async fn send_text(
        &self,
        chat_id: i64,
        text: impl Into<String>,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let mut message = OutboundMessage::text(text);
        if let Some(keyboard) = keyboard {
            message = message.keyboard(keyboard);
        }
        self.send(chat_id, message).await
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        url: impl Into<String>,
        caption: impl Into<String>,
    ) -> Result<()> {
        self.send(chat_id, OutboundMessage::photo(url, caption)).await
    }

    pub async fn send_media_group(&self, chat_id: i64, items: Vec<MediaPhoto>) -> Result<()> {
        self.send(chat_id, OutboundMessage::media_group(items)).await
    }
}

/// Single consumer: runs jobs one at a time in arrival order
async fn drain(mut queue_rx: mpsc::UnboundedReceiver<FunnelJob>, config: FunnelConfig) {
    let global_step = config.global_step();
    let recipient_step = config.recipient_step();
    let mut last_send: Option<Instant> = None;
    let mut last_by_recipient: HashMap<i64, Instant> = HashMap::new();

    while let Some(job) = queue_rx.recv().await {
        let now = Instant::now();
        let global_wait = last_send
            .map(|at| (at + global_step).saturating_duration_since(now))
            .unwrap_or_default();
        let recipient_wait = last_by_recipient
            .get(&job.recipient)
            .map(|at| (*at + recipient_step).saturating_duration_since(now))
            .unwrap_or_default();
        let wait = global_wait.max(recipient_wait);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let result = match AssertUnwindSafe((job.action)()).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(GatekeeperError::Internal("send action panicked".into())),
        };
        if let Err(e) = &result {
            warn!(recipient = job.recipient, "Delivery failed: {}", e);
        } else {
            debug!(
                recipient = job.recipient,
                queued_for = ?job.enqueued_at.elapsed(),
                "Delivered"
            );
        }

        let finished = Instant::now();
        last_send = Some(finished);
        last_by_recipient.insert(job.recipient, finished);
        if last_by_recipient.len() > RECIPIENT_CLOCK_SOFT_LIMIT {
            last_by_recipient.retain(|_, at| finished.duration_since(*at) < recipient_step);
        }

        let _ = job.done.send(result);
    }

    info!("Delivery funnel stopped (all producers dropped)");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Gateway recording every delivery
    #[derive(Default)]
    pub(crate) struct RecordingGateway {
        pub(crate) sent: Mutex<Vec<(i64, OutboundMessage)>>,
        pub(crate) fail_photos: bool,
    }

    impl RecordingGateway {
        pub(crate) fn sent(&self) -> Vec<(i64, OutboundMessage)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageGateway for RecordingGateway {
        async fn deliver(&self, chat_id: i64, message: &OutboundMessage) -> Result<()> {
            if self.fail_photos && !matches!(message, OutboundMessage::Text { .. }) {
                return Err(GatekeeperError::Gateway("wrong file identifier".into()));
            }
            self.sent.lock().unwrap().push((chat_id, message.clone()));
            Ok(())
        }
    }

    fn funnel(config: FunnelConfig) -> DeliveryFunnel {
        DeliveryFunnel::new(config, Arc::new(RecordingGateway::default()))
    }

    #[test]
    fn test_steps() {
        let config = FunnelConfig::default();
        assert_eq!(config.global_step(), Duration::from_millis(40));
        assert_eq!(config.recipient_step(), Duration::from_millis(1000));
        assert_eq!(step_for(5000), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_recipient_paced_and_order_kept() {
        let funnel = funnel(FunnelConfig::default());
        let log: Arc<Mutex<Vec<(&'static str, Instant)>>> = Arc::default();
        let start = Instant::now();

        let mut pending = Vec::new();
        for (label, recipient) in [("A1", 1), ("A2", 1), ("B", 2)] {
            let log = Arc::clone(&log);
            pending.push(funnel.submit(recipient, move || async move {
                log.lock().unwrap().push((label, Instant::now()));
                Ok(())
            }));
        }
        for outcome in pending {
            outcome.await.unwrap().unwrap();
        }

        let log = log.lock().unwrap().clone();
        let labels: Vec<_> = log.iter().map(|(l, _)| *l).collect();
        assert_eq!(labels, vec!["A1", "A2", "B"]);

        let (a1, a2, b) = (log[0].1, log[1].1, log[2].1);
        assert!(a1.duration_since(start) < Duration::from_millis(1));
        assert!(a2.duration_since(a1) >= Duration::from_millis(1000));
        // B only waits for global pacing after A2
        let gap = b.duration_since(a2);
        assert!(gap >= Duration::from_millis(40) && gap < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_pacing_across_recipients() {
        let funnel = funnel(FunnelConfig {
            global_per_sec: 10,
            per_recipient_per_sec: 1,
        });
        let log: Arc<Mutex<Vec<Instant>>> = Arc::default();

        let mut pending = Vec::new();
        for recipient in 0..5 {
            let log = Arc::clone(&log);
            pending.push(funnel.submit(recipient, move || async move {
                log.lock().unwrap().push(Instant::now());
                Ok(())
            }));
        }
        for outcome in pending {
            outcome.await.unwrap().unwrap();
        }

        let log = log.lock().unwrap();
        for pair in log.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_reported_and_queue_continues() {
        let funnel = funnel(FunnelConfig::default());

        let failed = funnel.submit(1, || async { Err(GatekeeperError::Gateway("blocked".into())) });
        let panicked = funnel.submit(2, || async { panic!("boom") });
        let ok = funnel.submit(3, || async { Ok(()) });

        assert!(failed.await.unwrap().is_err());
        assert!(panicked.await.unwrap().is_err());
        assert!(ok.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_never_overlap() {
        let funnel = funnel(FunnelConfig {
            global_per_sec: 1000,
            per_recipient_per_sec: 1000,
        });
        let running = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut pending = Vec::new();
        for recipient in 0..10 {
            let (running, peak) = (Arc::clone(&running), Arc::clone(&peak));
            pending.push(funnel.submit(recipient, move || async move {
                use std::sync::atomic::Ordering::SeqCst;
                let now = running.fetch_add(1, SeqCst) + 1;
                peak.fetch_max(now, SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, SeqCst);
                Ok(())
            }));
        }
        for outcome in pending {
            outcome.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_goes_through_gateway() {
        let gateway = Arc::new(RecordingGateway::default());
        let funnel = DeliveryFunnel::new(FunnelConfig::default(), gateway.clone());

        funnel.send_text(42, "halo", None).await.unwrap();
        funnel.send_photo(42, "https://img/1.png", "cap").await.unwrap();

        let sent = gateway.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (42, OutboundMessage::text("halo")));
    }
}
