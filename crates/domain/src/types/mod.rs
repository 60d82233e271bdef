//! Core data model for the token broker.

mod account;
mod audit;
mod authorization;
mod crypto;
mod token;

pub use account::{ExternalProfile, LinkedAccount, ProfileEndpointResponse};
pub use audit::{AuditAction, AuditEvent};
pub use authorization::PendingAuthorization;
pub use crypto::EncryptedData;
pub use token::{TokenEndpointResponse, TokenSet};
