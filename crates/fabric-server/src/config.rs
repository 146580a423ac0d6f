//! Server configuration for the fabric control plane.
//!
//! Loads configuration from environment variables with documented defaults.
//! All settings can be overridden via `FABRIC_*` environment variables.
//! Unlike a development-oriented loader that falls back silently on bad
//! input, `from_env` fails fast — before logging is initialized, since
//! hardening runs first — on anything that would leave the process running
//! with a nonsensical or insecure configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use fabric_core::models::ReplicaRole;
use thiserror::Error;

/// Minimum accepted length, in bytes, for `hmac_secret`.
const MIN_HMAC_SECRET_LEN: usize = 32;

/// Errors that can occur while loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not set and has no default")]
    Missing { var: &'static str },

    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("FABRIC_HMAC_SECRET must be at least {MIN_HMAC_SECRET_LEN} bytes, got {0}")]
    HmacSecretTooShort(usize),
}

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Fully resolved server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// This instance's identity in the replica set.
    pub instance_id: String,
    /// This instance's own address, as other replicas should dial it.
    pub address: String,
    /// Advisory startup role; live master identity is always re-derived
    /// from the election query.
    pub mode: ReplicaRole,
    /// Address the HTTP listener binds to.
    pub listen_addr: SocketAddr,
    /// Path to the SQLite database file (or `:memory:`).
    pub database_path: String,
    /// HMAC key used for token hashing. Never logged.
    pub hmac_secret: Vec<u8>,
    /// `tracing-subscriber` env filter directive.
    pub log_level: String,
    pub log_format: LogFormat,
    /// Allowed CORS origins. `["*"]` means any origin.
    pub cors_origins: Vec<String>,
    /// Disables the write-guard middleware — single-instance dev only.
    pub disable_write_guard: bool,
    /// Skips `mlockall` — dev environments without `CAP_IPC_LOCK`.
    pub disable_mlock: bool,
    pub heartbeat_interval: Duration,
    pub heartbeat_threshold: Duration,
    pub prune_interval: Duration,
    pub prune_multiplier: u32,
    /// Lighthouse Supervisor tick interval.
    pub supervisor_tick_interval: Duration,
    /// Directory the Supervisor materializes per-cluster config trees under.
    pub supervisor_base_dir: String,
    /// Binary invoked by the Supervisor as `<binary> -config <path>`.
    pub lighthouse_binary: String,
    /// Rate-limit bucket eviction sweep interval.
    pub rate_limit_eviction_interval: Duration,
    /// Rate-limit bucket idle threshold before eviction.
    pub rate_limit_idle_threshold: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("instance_id", &self.instance_id)
            .field("address", &self.address)
            .field("mode", &self.mode)
            .field("listen_addr", &self.listen_addr)
            .field("database_path", &self.database_path)
            .field("hmac_secret", &"[redacted]")
            .field("log_level", &self.log_level)
            .field("disable_write_guard", &self.disable_write_guard)
            .field("disable_mlock", &self.disable_mlock)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FABRIC_INSTANCE_ID` — this instance's id (default: a random uuid)
    /// - `FABRIC_ADDRESS` — this instance's dial-back address (default: `listen_addr`)
    /// - `FABRIC_MODE` — `master` or `replica` (default: `replica`)
    /// - `FABRIC_LISTEN_ADDR` — HTTP listen address (default: `127.0.0.1:7700`)
    /// - `FABRIC_DATABASE_PATH` — sqlite file path (default: `./fabric.db`)
    /// - `FABRIC_HMAC_SECRET` — required, must be ≥ 32 bytes
    /// - `FABRIC_LOG_LEVEL` — env-filter directive (default: `info`)
    /// - `FABRIC_LOG_FORMAT` — `json` or `pretty` (default: `json`)
    /// - `FABRIC_CORS_ORIGINS` — comma-separated list (default: `*`)
    /// - `FABRIC_DISABLE_WRITE_GUARD` — `true`/`1` to disable (default: `false`)
    /// - `FABRIC_DISABLE_MLOCK` — `true`/`1` to skip `mlockall` (default: `false`)
    /// - `FABRIC_HEARTBEAT_INTERVAL_SECS` — default `10`
    /// - `FABRIC_PRUNE_INTERVAL_SECS` — default `300`
    /// - `FABRIC_PRUNE_MULTIPLIER` — default `2`
    /// - `FABRIC_SUPERVISOR_TICK_SECS` — default `5`
    /// - `FABRIC_SUPERVISOR_BASE_DIR` — default `./lighthouse`
    /// - `FABRIC_LIGHTHOUSE_BINARY` — default `nebula`
    /// - `FABRIC_RATE_LIMIT_EVICTION_SECS` — default `300`
    /// - `FABRIC_RATE_LIMIT_IDLE_SECS` — default `3600`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on a missing required variable, an
    /// unparseable value, or an `hmac_secret` shorter than 32 bytes.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = env_or("FABRIC_LISTEN_ADDR", "127.0.0.1:7700")
            .parse::<SocketAddr>()
            .map_err(|_| Self::invalid("FABRIC_LISTEN_ADDR", "socket address"))?;

        let instance_id = std::env::var("FABRIC_INSTANCE_ID")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let address = std::env::var("FABRIC_ADDRESS").unwrap_or_else(|_| listen_addr.to_string());

        let mode = ReplicaRole::from_str(&env_or("FABRIC_MODE", "replica"))
            .map_err(|_| Self::invalid("FABRIC_MODE", "replica mode (master|replica)"))?;

        let database_path = env_or("FABRIC_DATABASE_PATH", "./fabric.db");

        let hmac_secret = std::env::var("FABRIC_HMAC_SECRET")
            .map_err(|_| ConfigError::Missing { var: "FABRIC_HMAC_SECRET" })?
            .into_bytes();
        if hmac_secret.len() < MIN_HMAC_SECRET_LEN {
            return Err(ConfigError::HmacSecretTooShort(hmac_secret.len()));
        }

        let log_level = env_or("FABRIC_LOG_LEVEL", "info");

        let log_format = match env_or("FABRIC_LOG_FORMAT", "json").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => return Err(Self::invalid("FABRIC_LOG_FORMAT", "json or pretty")),
        };

        let cors_origins = env_or("FABRIC_CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();

        let disable_write_guard = env_flag("FABRIC_DISABLE_WRITE_GUARD");
        let disable_mlock = env_flag("FABRIC_DISABLE_MLOCK");

        let heartbeat_interval =
            Duration::from_secs(env_parse("FABRIC_HEARTBEAT_INTERVAL_SECS", 10)?);
        let heartbeat_threshold = fabric_core::ha::HaConfig::default_threshold(heartbeat_interval);
        let prune_interval = Duration::from_secs(env_parse("FABRIC_PRUNE_INTERVAL_SECS", 300)?);
        let prune_multiplier: u32 = env_parse("FABRIC_PRUNE_MULTIPLIER", 2)?;
        let supervisor_tick_interval =
            Duration::from_secs(env_parse("FABRIC_SUPERVISOR_TICK_SECS", 5)?);
        let supervisor_base_dir = env_or("FABRIC_SUPERVISOR_BASE_DIR", "./lighthouse");
        let lighthouse_binary = env_or("FABRIC_LIGHTHOUSE_BINARY", "nebula");
        let rate_limit_eviction_interval =
            Duration::from_secs(env_parse("FABRIC_RATE_LIMIT_EVICTION_SECS", 300)?);
        let rate_limit_idle_threshold =
            Duration::from_secs(env_parse("FABRIC_RATE_LIMIT_IDLE_SECS", 3600)?);

        Ok(Self {
            instance_id,
            address,
            mode,
            listen_addr,
            database_path,
            hmac_secret,
            log_level,
            log_format,
            cors_origins,
            disable_write_guard,
            disable_mlock,
            heartbeat_interval,
            heartbeat_threshold,
            prune_interval,
            prune_multiplier,
            supervisor_tick_interval,
            supervisor_base_dir,
            lighthouse_binary,
            rate_limit_eviction_interval,
            rate_limit_idle_threshold,
        })
    }

    fn invalid(var: &'static str, expected: &'static str) -> ConfigError {
        ConfigError::Invalid {
            var,
            value: std::env::var(var).unwrap_or_default(),
            expected,
        }
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_owned())
}

fn env_flag(var: &str) -> bool {
    matches!(std::env::var(var).as_deref(), Ok("true" | "1"))
}

fn env_parse<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            var,
            value: raw,
            expected: "integer",
        }),
    }
}
