//! Repositorio de `ResultRecord`.

mod memory;
mod types;

pub use memory::InMemoryRecordStore;
pub use types::{RecordFilter, RecordPage, RecordSession, RecordStats, RecordStore};
