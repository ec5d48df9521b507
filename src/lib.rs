//! Live production-line boards for the factory floor.
//!
//! Updates arrive over a WebSocket subscription, fall back to HTTP polling
//! while the socket is down, are merged per display into a reconciliation
//! store, and are rendered with per-field formatting and change highlights.

pub mod client;
pub mod config;
pub mod detect;
pub mod directory;
pub mod errors;
pub mod fetch;
pub mod format;
pub mod logging;
pub mod session;
pub mod store;
pub mod view;
pub mod wire;

pub use linewatch_common::{Identity, LineType, MetricField, Snapshot, SnapshotPatch};
