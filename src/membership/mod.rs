//! Group membership gating for registration

pub mod cache;

pub use cache::{
    is_positive, spawn_purge_task, MembershipCache, MembershipCacheConfig, MembershipQuery,
    MembershipStats, POSITIVE_STATUSES,
};
