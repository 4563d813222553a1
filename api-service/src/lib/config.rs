use std::env;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use config::Config as ConfigBuilder;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;

/// Placeholder shipped in `config/default.toml`; refused in production.
pub const PLACEHOLDER_JWT_SECRET: &str = "change-me-in-production";
pub const MIN_PRODUCTION_SECRET_BYTES: usize = 32;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Test,
    Production,
}

impl fmt::Display for RuntimeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeEnvironment::Development => "development",
            RuntimeEnvironment::Test => "test",
            RuntimeEnvironment::Production => "production",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

/// Without a `url` the service runs on in-memory storage.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub query_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            query_timeout_secs: 3,
        }
    }
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_ttl_hours: i64,
    pub refresh_token_ttl_days: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: PLACEHOLDER_JWT_SECRET.to_string(),
            access_token_ttl_hours: 24,
            refresh_token_ttl_days: 7,
        }
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("access_token_ttl_hours", &self.access_token_ttl_hours)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .finish()
    }
}

impl JwtConfig {
    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.access_token_ttl_hours)
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.refresh_token_ttl_days)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PasswordConfig {
    pub cost: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            cost: auth::PasswordHasher::DEFAULT_COST,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OAuthConfig {
    /// Apple sign-in is enabled only when set.
    pub apple_client_id: Option<String>,
    /// When unset Google tokens are accepted for any audience.
    pub google_client_id: Option<String>,
    pub google_tokeninfo_url: String,
    /// Off in every shipped config file; enable with
    /// `OAUTH__ALLOW_MOCK_TOKENS=true`.
    pub allow_mock_tokens: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            apple_client_id: None,
            google_client_id: None,
            google_tokeninfo_url: auth::identity::google::GOOGLE_TOKENINFO_URL.to_string(),
            allow_mock_tokens: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
    /// Key clients by `X-Forwarded-For` instead of the peer address. Enable
    /// only behind a proxy that sets the header.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            burst: 10,
            trust_forwarded_for: false,
        }
    }
}

impl RateLimitConfig {
    /// # Errors
    /// Fails when either limit is zero.
    pub fn quota(&self) -> Result<(NonZeroU32, NonZeroU32), ConfigError> {
        let per_minute = NonZeroU32::new(self.requests_per_minute).ok_or_else(|| {
            ConfigError::Message("rate_limit.requests_per_minute must be positive".to_string())
        })?;
        let burst = NonZeroU32::new(self.burst)
            .ok_or_else(|| ConfigError::Message("rate_limit.burst must be positive".to_string()))?;

        Ok((per_minute, burst))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionsConfig {
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
        }
    }
}

impl SessionsConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Load configuration from files with environment variable overrides
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (JWT__SECRET, SERVER__HTTP_PORT, etc.)
    /// 2. Environment-specific config file (config/{RUN_MODE}.toml)
    /// 3. Default config file (config/default.toml)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let configuration = ConfigBuilder::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Example: DATABASE__URL=postgres://... overrides database.url
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins"),
            )
            .build()?;

        configuration.try_deserialize()
    }

    /// Reject settings that are unsafe or unusable.
    ///
    /// # Errors
    /// * Mock identity tokens enabled in production
    /// * Placeholder or short JWT secret in production
    /// * Zero rate limits or sweep interval
    /// * Non-positive token lifetimes
    /// * Bcrypt cost out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        let production = self.environment == RuntimeEnvironment::Production;

        if production && self.oauth.allow_mock_tokens {
            return Err(ConfigError::Message(
                "oauth.allow_mock_tokens must be false in production".to_string(),
            ));
        }

        if self.jwt.secret.is_empty() {
            return Err(ConfigError::Message("jwt.secret must be set".to_string()));
        }

        if production
            && (self.jwt.secret == PLACEHOLDER_JWT_SECRET
                || self.jwt.secret.len() < MIN_PRODUCTION_SECRET_BYTES)
        {
            return Err(ConfigError::Message(format!(
                "jwt.secret must be a non-default value of at least {} bytes in production",
                MIN_PRODUCTION_SECRET_BYTES
            )));
        }

        if self.jwt.access_token_ttl_hours <= 0 || self.jwt.refresh_token_ttl_days <= 0 {
            return Err(ConfigError::Message(
                "token lifetimes must be positive".to_string(),
            ));
        }

        if !(auth::PasswordHasher::MIN_COST..=auth::PasswordHasher::MAX_COST).contains(&self.password.cost) {
            return Err(ConfigError::Message(format!(
                "password.cost must be within {}..={}",
                auth::PasswordHasher::MIN_COST,
                auth::PasswordHasher::MAX_COST
            )));
        }

        self.rate_limit.quota()?;

        if self.sessions.sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "sessions.sweep_interval_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
