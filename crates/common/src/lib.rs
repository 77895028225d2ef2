pub mod decode;
pub mod endian;
pub mod error;
pub mod shutdown;
pub mod sink;
pub mod state;
pub mod types;

pub use endian::Endian;
pub use error::{RedoError, Result};
pub use shutdown::Shutdown;
pub use sink::{
    CheckpointEvent, DdlEvent, DiscardSink, DmlKind, RowEvent, RowImage, Sink, TxnHeader,
};
pub use state::{FsStateStore, StateStore};
pub use types::{DataObj, Dba, FileOffset, LObj, Obj, RowId, Scn, Seq, SubScn, Time, Uba, Xid};

/// Arena page size for transaction buffering (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Redo block sizes the reader accepts.
pub const BLOCK_SIZES: [usize; 3] = [512, 1024, 4096];
