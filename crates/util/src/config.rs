use std::{env, fmt, net::SocketAddr, path::PathBuf, time::Duration};

use super::{database_url, server_bind_address};

const DEFAULT_MEDIA_ROOT: &str = "media";
const DEVELOPMENT_SESSION_SECRET: &str = "yatube-development-session-secret";
const DEFAULT_SESSION_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 14;
const DEFAULT_INDEX_CACHE_TTL_SECS: u64 = 20;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;
const MIN_SESSION_SECRET_LEN: usize = 32;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub media_root: PathBuf,
    pub session_secret: Vec<u8>,
    pub session_max_age: Duration,
    pub index_cache_ttl: Duration,
    /// Largest request body accepted by the post forms.
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let media_root = env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_MEDIA_ROOT));

        let session_secret = match env::var("SESSION_SECRET") {
            Ok(value) if value.len() >= MIN_SESSION_SECRET_LEN => value.into_bytes(),
            Ok(_) => return Err(ConfigError::WeakSessionSecret),
            Err(_) if environment == Environment::Production => {
                return Err(ConfigError::MissingVar("SESSION_SECRET"))
            }
            Err(_) => DEVELOPMENT_SESSION_SECRET.as_bytes().to_vec(),
        };

        let session_max_age = Duration::from_secs(read_number(
            "SESSION_MAX_AGE_SECS",
            DEFAULT_SESSION_MAX_AGE_SECS,
        )?);
        let index_cache_ttl = Duration::from_secs(read_number(
            "INDEX_CACHE_TTL_SECS",
            DEFAULT_INDEX_CACHE_TTL_SECS,
        )?);
        let max_upload_bytes = usize::try_from(read_number(
            "MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES,
        )?)
        .unwrap_or(usize::MAX);

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            media_root,
            session_secret,
            session_max_age,
            index_cache_ttl,
            max_upload_bytes,
        })
    }
}

fn read_number(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    WeakSessionSecret,
    InvalidNumber { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set in production"),
            Self::WeakSessionSecret => write!(
                f,
                "SESSION_SECRET must be at least {MIN_SESSION_SECRET_LEN} bytes long"
            ),
            Self::InvalidNumber { name, value } => {
                write!(f, "{name} must be a whole number (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ENV_GUARD;
    use crate::{DEFAULT_BIND_ADDR, DEFAULT_DATABASE_URL};

    const VARS: &[&str] = &[
        "APP_ENV",
        "APP_BIND_ADDR",
        "DATABASE_URL",
        "MEDIA_ROOT",
        "SESSION_SECRET",
        "SESSION_MAX_AGE_SECS",
        "INDEX_CACHE_TTL_SECS",
        "MAX_UPLOAD_BYTES",
    ];

    fn clear_vars() {
        for name in VARS {
            env::remove_var(name);
        }
    }

    #[test]
    fn loads_defaults_in_development() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_vars();

        let config = AppConfig::from_env().expect("config should load with defaults");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.media_root, PathBuf::from("media"));
        assert_eq!(config.index_cache_ttl, Duration::from_secs(20));
        assert_eq!(config.session_max_age, Duration::from_secs(1_209_600));
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
    }

    #[test]
    fn rejects_invalid_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_vars();
        env::set_var("APP_ENV", "invalid");

        let err = AppConfig::from_env().expect_err("invalid env should error");
        assert!(matches!(err, ConfigError::InvalidEnvironment(value) if value == "invalid"));

        clear_vars();
    }

    #[test]
    fn production_requires_session_secret() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_vars();
        env::set_var("APP_ENV", "production");

        let err = AppConfig::from_env().expect_err("secret is mandatory in production");
        assert!(matches!(err, ConfigError::MissingVar("SESSION_SECRET")));

        clear_vars();
    }

    #[test]
    fn parses_production_environment() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_vars();
        env::set_var("APP_ENV", "production");
        env::set_var("APP_BIND_ADDR", "0.0.0.0:9000");
        env::set_var("SESSION_SECRET", "0123456789abcdef0123456789abcdef");
        env::set_var("INDEX_CACHE_TTL_SECS", "5");
        env::set_var("MAX_UPLOAD_BYTES", "1048576");

        let config = AppConfig::from_env().expect("config should load");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.index_cache_ttl, Duration::from_secs(5));
        assert_eq!(config.max_upload_bytes, 1_048_576);

        clear_vars();
    }

    #[test]
    fn rejects_short_secret_and_bad_numbers() {
        let _guard = ENV_GUARD.lock().expect("env guard poisoned");
        clear_vars();
        env::set_var("SESSION_SECRET", "short");
        assert!(matches!(
            AppConfig::from_env(),
            Err(ConfigError::WeakSessionSecret)
        ));

        env::remove_var("SESSION_SECRET");
        env::set_var("INDEX_CACHE_TTL_SECS", "twenty");
        let err = AppConfig::from_env().expect_err("non numeric ttl");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { name: "INDEX_CACHE_TTL_SECS", .. }
        ));

        clear_vars();
    }
}
