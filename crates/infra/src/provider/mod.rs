//! Outbound HTTP client for the identity provider's OAuth 2.0 endpoints.

pub mod client;

pub use client::ProviderHttpClient;
