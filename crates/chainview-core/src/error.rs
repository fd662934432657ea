//! Error types for the event pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting, applying, or querying events.
#[derive(Debug, Error)]
pub enum EventDbError {
    /// The event's `data` did not decode against the schema named by its tag.
    /// The event is skipped; the batch continues.
    #[error("malformed payload for tag '{tag}': {reason}")]
    MalformedPayload { tag: String, reason: String },

    /// The event carried a tag outside the known enumeration.
    /// The event is skipped; the batch continues.
    #[error("unrecognised event tag '{0}'")]
    UnrecognisedTag(String),

    /// Store-level failure. Aborts the current page/batch; prior commits
    /// remain valid and the caller may re-invoke (all writes are idempotent).
    #[error("storage failure during {op}: {reason}")]
    Persistence { op: &'static str, reason: String },

    /// A search was requested with no filter fields set.
    #[error("no search criteria supplied")]
    NoSearchCriteria,

    /// Single-row lookup found nothing.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Failure while dropping tables. Fatal to the teardown call only.
    #[error("teardown failed: {0}")]
    Teardown(String),

    /// A settings lookup used a name outside the known enumeration.
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
}

impl EventDbError {
    /// Returns `true` for faults local to one event: they are logged and
    /// skipped, never aborting the surrounding batch or round.
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload { .. } | Self::UnrecognisedTag(_)
        )
    }

    /// Build a `Persistence` error from any displayable store failure.
    pub fn persistence(op: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            op,
            reason: err.to_string(),
        }
    }
}
