use crate::types::{FileOffset, Obj, Xid};

/// Error surface of the whole engine. Variants map one-to-one onto the
/// failure kinds the replicator loop distinguishes when deciding between
/// retry, downgrade-to-warning and fatal.
#[derive(Debug, thiserror::Error)]
pub enum RedoError {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// File not present or not complete yet; retried with backoff in
    /// archive mode, polled in online mode.
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("corrupt redo at {offset}: {reason}")]
    Corrupt { offset: FileOffset, reason: String },

    #[error("malformed vector at {offset}: {reason}")]
    Malformed { offset: FileOffset, reason: String },

    #[error(
        "memory exhausted while buffering transaction {xid}: raise memory-max-mb \
         or add the transaction to the skip list"
    )]
    MemoryExhausted { xid: Xid },

    #[error("no table descriptor for obj {obj}")]
    SchemaMiss { obj: Obj },

    #[error("dictionary: {0}")]
    Dictionary(String),

    #[error("lob {lob_id:#x} page {page} could not be resolved")]
    LobResolution { lob_id: u64, page: u32 },

    #[error("state store: {0}")]
    StateStore(String),

    #[error("network: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RedoError>;

impl RedoError {
    pub fn malformed(offset: FileOffset, reason: impl Into<String>) -> Self {
        RedoError::Malformed {
            offset,
            reason: reason.into(),
        }
    }

    pub fn corrupt(offset: FileOffset, reason: impl Into<String>) -> Self {
        RedoError::Corrupt {
            offset,
            reason: reason.into(),
        }
    }
}
