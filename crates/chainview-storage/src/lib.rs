//! chainview-storage — SQLite read-model for the event pipeline.
//!
//! The [`EventDb`] handle owns the connection pool; its methods cover the
//! full lifecycle: schema setup, per-block event ingest, typed appliers,
//! per-round aggregation, and the paginated query surface.

pub mod aggregate;
mod apply;
pub mod delegate_pool;
pub mod entities;
pub mod events;
pub mod providers;
pub mod store;
pub mod terms;

pub use events::{ApplyReport, EventSearch};
pub use store::EventDb;
