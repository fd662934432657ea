//! chainview-core — types and pure logic for the event read-model engine.
//!
//! # Architecture
//!
//! ```text
//! finalized block → dedupe → merge → dispatch (per tag) → entity tables
//!                                                              │
//! finalized round → bucket page ─ diff(current, snapshot) ─────┤
//!                                    ├── ProviderAggregate (time series)
//!                                    ├── ProviderSnapshot  (replaced)
//!                                    └── GlobalDelta → GlobalSnapshot
//! ```
//!
//! Everything here is storage-agnostic; `chainview-storage` supplies the
//! SQLite tables and the appliers.

pub mod error;
pub mod event;
pub mod merge;
pub mod pagination;
pub mod payload;
pub mod provider;
pub mod settings;
pub mod snapshot;

pub use error::EventDbError;
pub use event::{decode, dedupe, DecodedEvent, Event, EventKey, EventPayload, EventTag, EventType};
pub use merge::{merge, MergePolicy};
pub use pagination::Pagination;
pub use provider::{bucket_id, ProviderKind, ProviderStatus};
pub use settings::{DbSettings, Setting, SettingValue};
pub use snapshot::{
    diff_provider, Economics, GlobalDelta, GlobalSnapshot, ProviderAggregate, ProviderDiff,
    ProviderSnapshot, ProviderState,
};
