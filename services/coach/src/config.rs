use secrecy::SecretString;
use std::time::Duration;
use tracing::Level;
use voicecoach_core::params::{DEFAULT_REALTIME_MODEL, SESSION_BUDGET};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where session credentials are minted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// The coaching backend holds the API key and hands out client secrets.
    Backend,
    /// Mint client secrets directly with a local API key. Development only.
    OpenAI,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub credential_source: CredentialSource,
    pub backend_url: Option<String>,
    pub openai_api_key: Option<SecretString>,
    pub realtime_base_url: String,
    pub model: String,
    pub budget: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let source_str =
            std::env::var("CREDENTIAL_SOURCE").unwrap_or_else(|_| "backend".to_string());
        let credential_source = match source_str.to_lowercase().as_str() {
            "backend" => CredentialSource::Backend,
            "openai" => CredentialSource::OpenAI,
            other => {
                return Err(ConfigError::InvalidValue(
                    "CREDENTIAL_SOURCE".to_string(),
                    format!("'{}' is not one of 'backend' or 'openai'", other),
                ));
            }
        };

        let backend_url = std::env::var("COACH_BACKEND_URL").ok();
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok().map(SecretString::from);

        let realtime_base_url = std::env::var("REALTIME_BASE_URL")
            .unwrap_or_else(|_| openai_realtime::OPENAI_API_BASE.to_string());
        let model =
            std::env::var("REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());

        let budget = match std::env::var("SESSION_BUDGET_SECS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "SESSION_BUDGET_SECS".to_string(),
                        format!("'{}' is not a positive number of seconds", raw),
                    ));
                }
            },
            Err(_) => SESSION_BUDGET,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        match credential_source {
            CredentialSource::Backend => {
                if backend_url.is_none() {
                    return Err(ConfigError::MissingVar(
                        "COACH_BACKEND_URL must be set for the 'backend' credential source"
                            .to_string(),
                    ));
                }
            }
            CredentialSource::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for the 'openai' credential source"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            credential_source,
            backend_url,
            openai_api_key,
            realtime_base_url,
            model,
            budget,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("CREDENTIAL_SOURCE");
            env::remove_var("COACH_BACKEND_URL");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("REALTIME_BASE_URL");
            env::remove_var("REALTIME_MODEL");
            env::remove_var("SESSION_BUDGET_SECS");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal_backend() {
        clear_env_vars();
        unsafe {
            env::set_var("COACH_BACKEND_URL", "https://coach.example.com");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.credential_source, CredentialSource::Backend);
        assert_eq!(
            config.backend_url.as_deref(),
            Some("https://coach.example.com")
        );
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.realtime_base_url, "https://api.openai.com/v1");
        assert_eq!(config.model, DEFAULT_REALTIME_MODEL);
        assert_eq!(config.budget, Duration::from_secs(600));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("CREDENTIAL_SOURCE", "OpenAI");
            env::set_var("OPENAI_API_KEY", "sk-custom");
            env::set_var("REALTIME_BASE_URL", "http://localhost:9000/v1");
            env::set_var("REALTIME_MODEL", "gpt-realtime-mini");
            env::set_var("SESSION_BUDGET_SECS", "90");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.credential_source, CredentialSource::OpenAI);
        assert_eq!(
            config.openai_api_key.as_ref().map(|k| k.expose_secret()),
            Some("sk-custom")
        );
        assert_eq!(config.realtime_base_url, "http://localhost:9000/v1");
        assert_eq!(config.model, "gpt-realtime-mini");
        assert_eq!(config.budget, Duration::from_secs(90));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_api_key_not_in_debug() {
        clear_env_vars();
        unsafe {
            env::set_var("CREDENTIAL_SOURCE", "openai");
            env::set_var("OPENAI_API_KEY", "sk-very-secret");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert!(!format!("{:?}", config).contains("sk-very-secret"));
    }

    #[test]
    #[serial]
    fn test_config_missing_backend_url() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("COACH_BACKEND_URL")),
            _ => panic!("Expected MissingVar for COACH_BACKEND_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();
        unsafe {
            env::set_var("CREDENTIAL_SOURCE", "openai");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_source() {
        clear_env_vars();
        unsafe {
            env::set_var("CREDENTIAL_SOURCE", "carrier-pigeon");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CREDENTIAL_SOURCE"),
            _ => panic!("Expected InvalidValue for CREDENTIAL_SOURCE"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_and_garbage_budget() {
        for raw in ["0", "-5", "ten minutes"] {
            clear_env_vars();
            unsafe {
                env::set_var("COACH_BACKEND_URL", "https://coach.example.com");
                env::set_var("SESSION_BUDGET_SECS", raw);
            }

            let err = Config::from_env().unwrap_err();
            match err {
                ConfigError::InvalidValue(var, _) => assert_eq!(var, "SESSION_BUDGET_SECS"),
                _ => panic!("Expected InvalidValue for SESSION_BUDGET_SECS={raw}"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("COACH_BACKEND_URL", "https://coach.example.com");
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
