pub mod archive;
pub mod block;
pub mod ops;
pub mod reader;
pub mod record;
pub mod vector;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use block::{BlockHeader, FileHeader, RedoHeader, BLOCK_HEADER_SIZE};
pub use reader::{BlockRead, ReaderConfig, RedoReader};
pub use record::{RecordAssembler, RecordNext, RedoRecord, RECORD_HEADER_SIZE};
pub use vector::{ChangeVector, FieldCursor, OpCode, VECTOR_HEADER_SIZE};
