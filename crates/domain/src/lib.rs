//! Shared domain types for the tokenbridge workspace.
//!
//! This crate defines the data model for the token broker (pending
//! authorizations, linked accounts, audit events, token sets), the
//! workspace-wide error type, and the configuration structs consumed by the
//! infra loader. It carries no I/O and no async code.

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

pub use config::{Config, DatabaseConfig, HttpConfig, ProviderConfig, SecurityConfig, ServerConfig};
pub use errors::{BrokerError, Result};
pub use types::{
    AuditAction, AuditEvent, EncryptedData, ExternalProfile, LinkedAccount, PendingAuthorization,
    ProfileEndpointResponse, TokenEndpointResponse, TokenSet,
};
