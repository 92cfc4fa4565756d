//! Event-source implementations shipped with yieldscan.

mod columns;

pub use columns::{ColumnSource, ColumnTable, JsonColumnsFactory, MemoryFactory};
