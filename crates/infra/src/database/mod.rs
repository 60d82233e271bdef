//! Sqlite persistence for pending authorizations, linked accounts, and the
//! audit trail.

pub mod account_repository;
pub mod audit_repository;
pub mod manager;
pub mod state_repository;

pub use account_repository::SqliteAccountRepository;
pub use audit_repository::{AuditWriter, SqliteAuditRepository};
pub use state_repository::SqliteStateRepository;
