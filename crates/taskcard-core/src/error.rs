use thiserror::Error;

/// Fatal conditions for a single render pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CardError {
    /// A configured source entity has no state in the snapshot.
    #[error("entity state unavailable: {0}")]
    EntityUnavailable(String),

    /// Neither `entity` nor `entities` names a source.
    #[error("no source entity configured")]
    NoEntities,
}

/// Failures of the completion overlay that cannot be recovered by eviction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverlayError {
    /// The id alone encodes past the field capacity, so no eviction can make room.
    #[error("task id {id} encodes to {len} chars, over the field capacity of {capacity}")]
    IdTooLong {
        id: String,
        len: usize,
        capacity: usize,
    },

    #[error("task id must not be empty")]
    EmptyId,
}
