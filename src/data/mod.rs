//! Result tables and their persistence.

pub mod storage;
pub mod table;

pub use storage::{StorageError, TsvWriter};
pub use table::{Column, ColumnTable};
