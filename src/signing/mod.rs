//! Signed capability links

pub mod link;

pub use link::{normalize_base_url, CapabilityLinkSigner, LinkBuilder, FIRST_PARTY_PATH, ONE_TAP_PATH};
