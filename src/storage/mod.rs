pub mod db;
pub mod models;
mod records;
mod tables;

pub use db::{Database, DatabaseError};
pub use models::{Form, Patch, Record, RecordKind, RecordUpdate, Upload};
pub use records::ScannedEntry;
pub use tables::*;
