//! Persistence layer: libSQL-backed storage for leads and their stage data.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{LeadStore, LeadWithEnrichment, StoreMetrics};
