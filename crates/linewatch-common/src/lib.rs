//! Shared domain types for linewatch.
//!
//! Everything a display needs to agree on with the production-data backend
//! lives here: the fixed metric vocabulary ([`MetricField`]), the current
//! values for one display ([`Snapshot`]), partial updates ([`SnapshotPatch`]),
//! the two-level hourly bucket structure ([`HourlyData`]) and the key a
//! display watches ([`Identity`]).

pub mod hourly;
pub mod identity;
pub mod lenient;
pub mod snapshot;

pub use hourly::{DefectEntry, HourlyData, HourlyField, HourlySlot, LatestHour, TimeSlot};
pub use identity::{Identity, IdentityError, IdentityFields, LineType, detect_line_type};
pub use snapshot::{FieldKind, FieldValue, MetricField, Snapshot, SnapshotPatch};
