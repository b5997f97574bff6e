//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `SCORE_SYNC` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use score_sync::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("WebSocket fabric on {}", config.websocket.socket_addr());
//! ```

mod auth;
mod error;
mod server;
mod websocket;

pub use auth::AuthConfig;
pub use error::{ConfigError, ValidationError};
pub use server::{Environment, ServerConfig};
pub use websocket::{DropPolicy, WebSocketConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Contains all configuration sections for the Score Sync backend.
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Control-plane HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// WebSocket fabric configuration
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Authentication configuration (token verification)
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `SCORE_SYNC` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `SCORE_SYNC__WEBSOCKET__PORT=8766` -> `websocket.port = 8766`
    /// - `SCORE_SYNC__WEBSOCKET__SEND_QUEUE_MAX=100` -> `websocket.send_queue_max = 100`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("SCORE_SYNC")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.websocket.validate()?;
        self.auth.validate(&self.server.environment)?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn set_minimal_env() {
        env::set_var("SCORE_SYNC__AUTH__ISSUER_URL", "https://auth.example.com");
        env::set_var("SCORE_SYNC__AUTH__AUDIENCE", "score-sync-api");
    }

    fn clear_env() {
        env::remove_var("SCORE_SYNC__AUTH__ISSUER_URL");
        env::remove_var("SCORE_SYNC__AUTH__AUDIENCE");
        env::remove_var("SCORE_SYNC__WEBSOCKET__PORT");
        env::remove_var("SCORE_SYNC__WEBSOCKET__DROP_POLICY");
        env::remove_var("SCORE_SYNC__SERVER__ENVIRONMENT");
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.auth.issuer_url, "https://auth.example.com");
    }

    #[test]
    fn test_validate_full_config() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok());
        let config = result.unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_websocket_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.websocket.port, 8766);
        assert_eq!(config.websocket.send_queue_max, 100);
    }

    #[test]
    fn test_custom_websocket_port() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("SCORE_SYNC__WEBSOCKET__PORT", "9000");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.websocket.port, 9000);
    }

    #[test]
    fn test_custom_drop_policy() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("SCORE_SYNC__WEBSOCKET__DROP_POLICY", "newest");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.websocket.drop_policy, DropPolicy::Newest);
    }
}
