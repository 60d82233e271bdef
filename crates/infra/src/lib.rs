//! Infrastructure adapters for the token broker.
//!
//! Implements the port traits from `tokenbridge_core::ports`: sqlite-backed
//! repositories, the provider HTTP client, the AES-256-GCM credential
//! cipher, and the buffered audit writer. Also owns configuration loading
//! and the background expiry sweeper.

pub mod audit;
pub mod config;
pub mod crypto;
pub mod database;
pub mod provider;
pub mod scheduling;

pub use audit::BufferedAuditSink;
pub use crypto::AesGcmCredentialCipher;
pub use database::manager::DbManager;
pub use database::{SqliteAccountRepository, SqliteAuditRepository, SqliteStateRepository};
pub use provider::ProviderHttpClient;
pub use scheduling::SweepScheduler;
