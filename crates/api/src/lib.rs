//! HTTP surface for the token broker.
//!
//! Routes live under `/auth/{provider}/…`; caller identity comes from the
//! gateway-injected `x-user-id` header. Handlers translate between the wire
//! contract and `tokenbridge_core` services and never see token plaintext
//! beyond what a consumer is entitled to.

pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
