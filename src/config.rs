//! Application configuration module
//! Handles environment variable loading, configuration validation, and
//! settings for the payment rail, the two airtime providers, and storage.

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub daraja: DarajaConfig,
    pub dealer: DealerConfig,
    pub aggregator: AggregatorConfig,
    pub notify: NotifyConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Shared outbound HTTP settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Payment rail (Daraja) configuration
#[derive(Debug, Clone)]
pub struct DarajaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub short_code: String,
    pub passkey: String,
    pub base_url: String,
    pub callback_url: String,
    pub initiator_name: String,
    pub initiator_password: String,
    pub cert_path: String,
    pub reversal_result_url: String,
    pub reversal_timeout_url: String,
}

/// Dealer-direct airtime configuration
#[derive(Debug, Clone)]
pub struct DealerConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub grant_url: String,
    pub airtime_url: String,
    pub sender_msisdn: String,
}

/// Aggregator airtime configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub username: String,
    pub api_key: String,
    pub airtime_url: String,
}

/// Best-effort notification targets; both are optional and never affect
/// the transaction outcome.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub analytics_url: Option<String>,
    pub offline_fulfillment_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            http: HttpConfig::from_env()?,
            daraja: DarajaConfig::from_env()?,
            dealer: DealerConfig::from_env()?,
            aggregator: AggregatorConfig::from_env()?,
            notify: NotifyConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.daraja.validate()?;
        self.dealer.validate()?;
        self.aggregator.validate()?;

        Ok(())
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVariable(name.to_string()))
}

fn url_like(name: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be a valid URL"
        )));
    }
    Ok(())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: required("DATABASE_URL")?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }
        Ok(())
    }
}

impl HttpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(HttpConfig {
            timeout_secs: env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: env::var("HTTP_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
        })
    }
}

impl DarajaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let callback_base = required("CALLBACK_BASE_URL")?;
        let callback_base = callback_base.trim_end_matches('/').to_string();

        Ok(DarajaConfig {
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            short_code: required("MPESA_SHORT_CODE")?,
            passkey: required("MPESA_PASSKEY")?,
            base_url: env::var("MPESA_BASE_URL")
                .unwrap_or_else(|_| "https://api.safaricom.co.ke".to_string()),
            callback_url: format!("{callback_base}/stk-callback"),
            initiator_name: required("MPESA_INITIATOR_NAME")?,
            initiator_password: required("MPESA_INITIATOR_PASSWORD")?,
            cert_path: required("MPESA_CERT_PATH")?,
            reversal_result_url: env::var("REVERSAL_RESULT_URL")
                .unwrap_or_else(|_| format!("{callback_base}/daraja-reversal-result")),
            reversal_timeout_url: env::var("REVERSAL_TIMEOUT_URL")
                .unwrap_or_else(|_| format!("{callback_base}/daraja-reversal-timeout")),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url_like("MPESA_BASE_URL", &self.base_url)?;
        url_like("CALLBACK_BASE_URL", &self.callback_url)?;
        url_like("REVERSAL_RESULT_URL", &self.reversal_result_url)?;
        url_like("REVERSAL_TIMEOUT_URL", &self.reversal_timeout_url)?;
        if !self.short_code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue(
                "MPESA_SHORT_CODE must be numeric".to_string(),
            ));
        }
        Ok(())
    }
}

impl DealerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DealerConfig {
            consumer_key: required("DEALER_CONSUMER_KEY")?,
            consumer_secret: required("DEALER_CONSUMER_SECRET")?,
            grant_url: required("DEALER_GRANT_URL")?,
            airtime_url: required("DEALER_AIRTIME_URL")?,
            sender_msisdn: required("DEALER_SENDER_MSISDN")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url_like("DEALER_GRANT_URL", &self.grant_url)?;
        url_like("DEALER_AIRTIME_URL", &self.airtime_url)?;
        Ok(())
    }
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AggregatorConfig {
            username: required("AT_USERNAME")?,
            api_key: required("AT_API_KEY")?,
            airtime_url: env::var("AT_AIRTIME_URL").unwrap_or_else(|_| {
                "https://api.africastalking.com/version1/airtime/send".to_string()
            }),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url_like("AT_AIRTIME_URL", &self.airtime_url)?;
        Ok(())
    }
}

impl NotifyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(NotifyConfig {
            analytics_url: env::var("ANALYTICS_URL").ok().filter(|v| !v.is_empty()),
            offline_fulfillment_url: env::var("OFFLINE_FULFILLMENT_URL")
                .ok()
                .filter(|v| !v.is_empty()),
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn daraja_short_code_must_be_numeric() {
        let config = DarajaConfig {
            consumer_key: "k".to_string(),
            consumer_secret: "s".to_string(),
            short_code: "174abc".to_string(),
            passkey: "p".to_string(),
            base_url: "https://api.safaricom.co.ke".to_string(),
            callback_url: "https://gateway.example.com/stk-callback".to_string(),
            initiator_name: "api_user".to_string(),
            initiator_password: "secret".to_string(),
            cert_path: "/etc/certs/prod.cer".to_string(),
            reversal_result_url: "https://gateway.example.com/daraja-reversal-result".to_string(),
            reversal_timeout_url: "https://gateway.example.com/daraja-reversal-timeout"
                .to_string(),
        };
        assert!(config.validate().is_err());
    }
}
