//! Realtime subscription client with HTTP fallback polling.
//!
//! ```text
//!  backend ws ──► RealtimeClient ──decode──► SubscriptionRegistry::dispatch
//!                     │                          │ validate → match → throttle
//!                     │ ConnectionState          ▼
//!                     ▼                      Handler(&Inbound)
//!               FallbackPoller ──(disconnected only)──► Refresher::refresh
//! ```
//!
//! The poller and the push channel are mutually exclusive: the poller only
//! fires while the connection state is `Disconnected`.

pub mod connection;
pub mod poller;
pub mod registry;
pub mod throttle;

use std::sync::Arc;

use crate::wire::UpdateMessage;

pub use connection::{ConnectionConfig, RealtimeClient};
pub use poller::{FallbackPoller, PollerConfig, Refresher, refresher_fn};
pub use registry::SubscriptionRegistry;
pub use throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A validated update addressed to the subscriber's identity.
    Update(UpdateMessage),
    /// The backend asked displays to refetch.
    RefreshRequested,
}

/// Subscriber callback. Identity is by `Arc` pointer.
pub type Handler = Arc<dyn Fn(&Inbound) + Send + Sync>;

/// Connectivity observer callback.
pub type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;
