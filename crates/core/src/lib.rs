//! Protocol logic for the token broker.
//!
//! This crate owns the OAuth 2.0 + PKCE state machine and the credential
//! lifecycle (issue → use → refresh → rotate → revoke). It talks to the
//! outside world exclusively through the port traits in [`ports`]; the infra
//! crate supplies the sqlite, HTTP, and crypto implementations.
//!
//! Capability boundary: only [`AuthorizationService`], [`RefreshCoordinator`]
//! and [`RevocationService`] hold a [`ports::CredentialCipher`]. Every other
//! consumer of a linked account goes through
//! [`RefreshCoordinator::ensure_fresh`] and only ever sees a bare access
//! token.

pub mod authorization;
pub mod pkce;
pub mod ports;
pub mod refresh;
pub mod revocation;

#[cfg(test)]
pub(crate) mod testing;

pub use authorization::{
    AuthorizationService, AuthorizationStart, ConnectionOutcome, ConnectionStatus,
};
pub use refresh::RefreshCoordinator;
pub use revocation::RevocationService;
