//! Configuration loader.
//!
//! Loads broker configuration from environment variables or a config file.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes standard paths for config files (JSON and TOML)
//!
//! ## Environment Variables
//! - `TOKENBRIDGE_DB_PATH`: sqlite database file path (required)
//! - `TOKENBRIDGE_DB_POOL_SIZE`: connection pool size (default 4)
//! - `TOKENBRIDGE_BIND_ADDR`: HTTP listen address (default 127.0.0.1:8700)
//! - `TOKENBRIDGE_CLIENT_ID`: OAuth client id (required)
//! - `TOKENBRIDGE_CLIENT_SECRET`: OAuth client secret (required)
//! - `TOKENBRIDGE_CALLBACK_URLS`: `domain=url` pairs, comma-separated
//!   (required), e.g. `api=https://api.example.net/auth/twitter/callback`
//! - `TOKENBRIDGE_SCOPES`: space-separated scope override (optional)
//! - `TOKENBRIDGE_CREDENTIAL_KEY`: base64 32-byte AES key (required)
//! - `TOKENBRIDGE_HTTP_TIMEOUT_SECONDS`, `TOKENBRIDGE_HTTP_MAX_ATTEMPTS`,
//!   `TOKENBRIDGE_HTTP_BACKOFF_MS`: outbound HTTP tuning (optional)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokenbridge_domain::{
    BrokerError, Config, DatabaseConfig, HttpConfig, ProviderConfig, Result, SecurityConfig,
    ServerConfig,
};

/// Load configuration, environment first, file fallback.
///
/// # Errors
/// Returns `BrokerError::Config` if neither source yields a complete
/// configuration.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(err) => {
            tracing::debug!(error = ?err, "environment incomplete, trying config file");
            load_from_file(None)
        }
    }
}

/// Load configuration from `TOKENBRIDGE_*` environment variables.
///
/// # Errors
/// Returns `BrokerError::Config` if required variables are missing or have
/// invalid values.
pub fn load_from_env() -> Result<Config> {
    let db_path = env_var("TOKENBRIDGE_DB_PATH")?;
    let pool_size = env_parse("TOKENBRIDGE_DB_POOL_SIZE", 4u32)?;
    let bind_addr =
        std::env::var("TOKENBRIDGE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8700".to_string());

    let client_id = env_var("TOKENBRIDGE_CLIENT_ID")?;
    let client_secret = env_var("TOKENBRIDGE_CLIENT_SECRET")?;
    let callback_urls = parse_callback_urls(&env_var("TOKENBRIDGE_CALLBACK_URLS")?)?;

    let mut provider = ProviderConfig::twitter(client_id, client_secret);
    provider.callback_urls = callback_urls;
    if let Ok(scopes) = std::env::var("TOKENBRIDGE_SCOPES") {
        provider.scopes = scopes.split_whitespace().map(str::to_owned).collect();
    }

    let credential_key = env_var("TOKENBRIDGE_CREDENTIAL_KEY")?;

    let http = HttpConfig {
        timeout_seconds: env_parse(
            "TOKENBRIDGE_HTTP_TIMEOUT_SECONDS",
            HttpConfig::default().timeout_seconds,
        )?,
        max_attempts: env_parse("TOKENBRIDGE_HTTP_MAX_ATTEMPTS", HttpConfig::default().max_attempts)?,
        base_backoff_ms: env_parse(
            "TOKENBRIDGE_HTTP_BACKOFF_MS",
            HttpConfig::default().base_backoff_ms,
        )?,
    };

    Ok(Config {
        database: DatabaseConfig { path: db_path, pool_size },
        server: ServerConfig { bind_addr },
        provider,
        security: SecurityConfig { credential_key },
        http,
    })
}

/// Load configuration from a JSON or TOML file.
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `BrokerError::Config` when no file is found or the content does
/// not parse.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(BrokerError::Config(format!("config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            BrokerError::Config("no config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|err| BrokerError::Config(format!("failed to read config file: {err}")))?;
    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|err| BrokerError::Config(format!("invalid TOML: {err}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|err| BrokerError::Config(format!("invalid JSON: {err}"))),
        _ => Err(BrokerError::Config(format!("unsupported config format: {extension}"))),
    }
}

/// Probe standard locations for a config file.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend([
            cwd.join("config.json"),
            cwd.join("config.toml"),
            cwd.join("tokenbridge.json"),
            cwd.join("tokenbridge.toml"),
        ]);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend([
                exe_dir.join("config.json"),
                exe_dir.join("config.toml"),
                exe_dir.join("tokenbridge.json"),
                exe_dir.join("tokenbridge.toml"),
            ]);
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Parse `domain=url` pairs, comma-separated.
fn parse_callback_urls(raw: &str) -> Result<HashMap<String, String>> {
    let mut urls = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (domain, url) = pair.split_once('=').ok_or_else(|| {
            BrokerError::Config(format!("callback url entry must be domain=url, got: {pair}"))
        })?;
        if domain.is_empty() || url.is_empty() {
            return Err(BrokerError::Config(format!("empty callback url entry: {pair}")));
        }
        urls.insert(domain.trim().to_string(), url.trim().to_string());
    }
    if urls.is_empty() {
        return Err(BrokerError::Config("at least one callback url is required".into()));
    }
    Ok(urls)
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| BrokerError::Config(format!("missing required environment variable: {key}")))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|err| BrokerError::Config(format!("invalid value for {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
