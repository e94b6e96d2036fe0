//! Outbound delivery
//!
//! - **message**: gateway-neutral message model and the `MessageGateway` seam
//! - **funnel**: the single paced queue every send goes through
//! - **scheduler**: per-user debounced follow-up pushes

pub mod funnel;
pub mod message;
pub mod scheduler;

pub use funnel::{DeliveryFunnel, FunnelConfig};
pub use message::{InlineButton, InlineKeyboard, MediaPhoto, MessageGateway, OutboundMessage, ParseMode};
pub use scheduler::{DelayedPushScheduler, PushAction, SchedulerConfig};
