//! Protocol constants shared across the workspace.

/// Lifetime of a pending authorization before the state parameter becomes
/// unusable (RFC 6749 recommends short-lived state).
pub const STATE_TTL_SECONDS: i64 = 600;

/// Random bytes behind each state parameter (256 bits before base64url).
pub const STATE_ENTROPY_BYTES: usize = 32;

/// Random bytes behind each PKCE code verifier. 64 bytes encode to 86
/// base64url characters, inside the 43..=128 window of RFC 7636.
pub const VERIFIER_ENTROPY_BYTES: usize = 64;

/// Refresh an access token once less than this many seconds of lifetime
/// remain, so consumers rarely observe an expired token.
pub const REFRESH_THRESHOLD_SECONDS: i64 = 300;

/// Access-token lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 7200;

/// Interval between sweeps of expired pending authorizations.
pub const STATE_SWEEP_INTERVAL_SECONDS: u64 = 300;

/// Provider HTTP call timeout.
pub const PROVIDER_TIMEOUT_SECONDS: u64 = 30;

/// Total provider HTTP attempts for retryable failures (1 initial + 2
/// retries).
pub const PROVIDER_MAX_ATTEMPTS: usize = 3;
