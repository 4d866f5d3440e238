use thiserror::Error;

/// All failure modes of the vector store, its indexes, and the collection
/// layer on top of them.
///
/// The first block are user errors: the operation is rejected with no side
/// effect and the caller may retry with corrected input. `CorruptStore` and
/// `Io` come out of the persistence layer; `IndexInconsistency` signals a
/// broken internal invariant and poisons the affected collection until it is
/// reopened (which rebuilds the index).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate id: '{0}'")]
    DuplicateId(String),

    #[error("vector not found: '{0}'")]
    NotFound(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector must not be empty")]
    EmptyVector,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("collection already exists: '{0}'")]
    CollectionExists(String),

    #[error("no such collection: '{0}'")]
    NoSuchCollection(String),

    #[error("invalid collection name: '{0}' (allowed: [A-Za-z0-9_-], 1..=64 chars)")]
    InvalidName(String),

    #[error("corrupt store: {0}")]
    CorruptStore(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),
}

impl StoreError {
    /// Whether this error is a recoverable user error (bad input, not-found)
    /// as opposed to a persistence or internal failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateId(_)
                | Self::NotFound(_)
                | Self::DimensionMismatch { .. }
                | Self::EmptyVector
                | Self::InvalidParameter(_)
                | Self::CollectionExists(_)
                | Self::NoSuchCollection(_)
                | Self::InvalidName(_)
        )
    }
}
