pub mod bootstrap;
pub mod dict;
pub mod filter;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod table;
pub mod xml;

pub use filter::{Condition, SchemaElement};
pub use schema::{ColumnVisibility, DictChange, Schema};
pub use snapshot::SchemaSnapshot;
pub use store::DictStore;
pub use table::{Column, SystemTableKind, Table, TableLob, TableOptions};
pub use xml::{XmlCtx, XmlDicts};
