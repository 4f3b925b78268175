//! Runtime configuration
//!
//! All settings are read once at process start into an immutable [`AppConfig`]
//! which is then shared by reference. No other module reads the process
//! environment.

use crate::logging::LogLevel;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Default replay window for launch payloads (24 hours)
pub const DEFAULT_INIT_DATA_MAX_AGE_SECS: i64 = 86_400;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const LOCAL_BIND_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Deployment environment.
///
/// `Development` is the relaxed policy: launch payloads may be omitted and
/// requests without any identity pass the gate. Block and admin checks are
/// identical in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_relaxed(self) -> bool {
        matches!(self, Environment::Development)
    }

    /// Whether the authentication endpoint may skip signature and replay
    /// checks. Only when relaxed and no payload was supplied at all.
    pub fn may_skip_launch_verification(self, payload_supplied: bool) -> bool {
        self.is_relaxed() && !payload_supplied
    }

    /// Whether a request carrying no identity at all may pass the gate.
    pub fn allows_anonymous(self) -> bool {
        self.is_relaxed()
    }

    /// Whether a known identity may pass the gate without cryptographic proof.
    pub fn allows_unproven_identity(self) -> bool {
        self.is_relaxed()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" | "test" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::Invalid {
                name: "APP_ENV",
                reason: format!("unknown environment '{other}'"),
            }),
        }
    }
}

/// A secret string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted, {} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    /// Shared secret of the bot that launches the Mini App
    pub bot_token: Option<Secret>,
    /// Key used to sign session credentials
    pub session_secret: Secret,
    /// The one external identity granted admin on first login
    pub bootstrap_admin_id: Option<String>,
    pub init_data_max_age_secs: i64,
    pub bind_addr: SocketAddr,
    /// SQLite database file; `None` selects the in-memory store
    pub database_path: Option<PathBuf>,
    pub log_level: LogLevel,
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV").or_else(|| get("NODE_ENV")) {
            Some(value) => value.parse()?,
            None => Environment::default(),
        };

        let session_secret = get("JWT_SECRET")
            .map(Secret::new)
            .ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let init_data_max_age_secs = match get("INIT_DATA_MAX_AGE_SECS") {
            Some(raw) => {
                let secs = raw.trim().parse::<i64>().map_err(|e| ConfigError::Invalid {
                    name: "INIT_DATA_MAX_AGE_SECS",
                    reason: format!("{e}"),
                })?;
                if secs <= 0 {
                    return Err(ConfigError::Invalid {
                        name: "INIT_DATA_MAX_AGE_SECS",
                        reason: "must be positive".to_string(),
                    });
                }
                secs
            }
            None => DEFAULT_INIT_DATA_MAX_AGE_SECS,
        };

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| {
            if get("KB_LOCAL").is_some() {
                LOCAL_BIND_ADDR.to_string()
            } else {
                DEFAULT_BIND_ADDR.to_string()
            }
        });
        let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            name: "BIND_ADDR",
            reason: format!("{e}"),
        })?;

        let log_level = match get("KB_LOG_LEVEL") {
            Some(raw) => raw.parse::<LogLevel>().map_err(|e| {
                ConfigError::Invalid {
                    name: "KB_LOG_LEVEL",
                    reason: e.to_string(),
                }
            })?,
            None => LogLevel::default(),
        };

        Ok(Self {
            environment,
            bot_token: get("TELEGRAM_BOT_TOKEN").map(Secret::new),
            session_secret,
            bootstrap_admin_id: get("ADMIN_TELEGRAM_ID").map(|v| v.trim().to_string()),
            init_data_max_age_secs,
            bind_addr,
            database_path: get("DATABASE_PATH").map(PathBuf::from),
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_fail_closed() {
        let config = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert!(config.bot_token.is_none());
        assert_eq!(config.init_data_max_age_secs, DEFAULT_INIT_DATA_MAX_AGE_SECS);
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_missing_session_secret() {
        let err = AppConfig::from_lookup(lookup(&[("APP_ENV", "development")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn test_node_env_fallback_and_local_bind() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s3cret"),
            ("NODE_ENV", "development"),
            ("KB_LOCAL", "1"),
        ]))
        .unwrap();
        assert_eq!(config.environment, Environment::Development);
        assert!(config.bind_addr.ip().is_loopback());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(
            AppConfig::from_lookup(lookup(&[("JWT_SECRET", "x"), ("APP_ENV", "staging")])).is_err()
        );
        assert!(
            AppConfig::from_lookup(lookup(&[
                ("JWT_SECRET", "x"),
                ("INIT_DATA_MAX_AGE_SECS", "-5")
            ]))
            .is_err()
        );
        assert!(
            AppConfig::from_lookup(lookup(&[("JWT_SECRET", "x"), ("BIND_ADDR", "nope")])).is_err()
        );
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("1234567890:AAHfiqksKZ8WmR2zSjiQ7_v4TMAKdiHm9T0-really-long");
        let rendered = format!("{secret:?}");
        assert!(!rendered.contains("AAHfiqksKZ8WmR2zSjiQ7"));
    }

    #[test]
    fn test_policy_effects() {
        let dev = Environment::Development;
        let prod = Environment::Production;
        assert!(dev.may_skip_launch_verification(false));
        assert!(!dev.may_skip_launch_verification(true));
        assert!(!prod.may_skip_launch_verification(false));
        assert!(dev.allows_anonymous());
        assert!(!prod.allows_anonymous());
        assert!(!prod.allows_unproven_identity());
    }
}
