use core_config::{app_info, server::ServerConfig, AppInfo, ConfigError, FromEnv};
use database::redis::RedisConfig;

pub use core_config::Environment;

/// Application-specific configuration; composes shared config components
/// with the gateway's own WS/CORS/broker settings.
#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppInfo,
    pub redis: RedisConfig,
    pub server: ServerConfig,
    pub environment: Environment,
    pub broker: broker::BrokerConfig,
    /// Compared against a connecting WebSocket's `token` query parameter.
    /// `None` means no token is configured; absence of a token on the
    /// connecting side is always permitted regardless of this setting.
    pub ws_token: Option<String>,
    pub cors_allowed_origin: String,
    pub shutdown_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env()?;
        let redis = RedisConfig::from_env()?;
        let broker = broker::BrokerConfig::from_env()?;

        Ok(Self {
            app: app_info!(),
            redis,
            server,
            environment,
            broker,
            ws_token: std::env::var("WS_AUTH_TOKEN").ok(),
            cors_allowed_origin: std::env::var("CORS_ALLOWED_ORIGIN")
                .unwrap_or_else(|_| "*".to_string()),
            shutdown_timeout_seconds: parse_env("SHUTDOWN_TIMEOUT_SECONDS", 30)?,
        })
    }
}

fn parse_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    core_config::env_or_default(key, &default.to_string())
        .parse()
        .map_err(|e| ConfigError::ParseError {
            key: key.to_string(),
            details: format!("{e}"),
        })
}
