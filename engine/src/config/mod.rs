//! Configuration management
//!
//! This module handles loading, validation, and management of the ChatFlow configuration.
//! Configuration is stored in TOML format at ~/.chatflow/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **server**: Listen address, public base URL, allowed cross-origin caller
//! - **inference**: External inference program, working directory, timeout, sampling defaults
//! - **conversations**: History cap and listing preview length
//!
//! # Environment Overrides
//!
//! After the file is loaded, the following variables take precedence:
//! `CHATFLOW_HOST`, `CHATFLOW_PORT`, `CHATFLOW_BASE_URL`, `CHATFLOW_CORS_ORIGIN`,
//! `CHATFLOW_LOG_LEVEL`.
//!
//! # Examples
//!
//! ```no_run
//! use chatflow_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Listening on {}", config.server.bind_address());
//! println!("Inference program: {}", config.inference.program);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::types::GenerationParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for `max_length` accepted from config and from callers
pub const MAX_GENERATION_LENGTH: u32 = 1024;

/// Upper bound for `temperature` accepted from config and from callers
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// External inference process settings
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Conversation store settings
    #[serde(default)]
    pub conversations: ConversationsConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public URL the server is reachable at
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Origin allowed to make cross-origin calls (the chat UI)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

/// External inference process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Executable to spawn for each request
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments passed to the executable
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Working directory of the spawned process (supports ~ expansion)
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Hard wall-clock bound per invocation, measured from spawn
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_length")]
    pub chat_max_length: u32,

    #[serde(default = "default_temperature")]
    pub chat_temperature: f32,

    #[serde(default = "default_max_length")]
    pub generate_max_length: u32,

    #[serde(default = "default_temperature")]
    pub generate_temperature: f32,

    /// Maximum simultaneous inference processes (0 = unlimited)
    #[serde(default)]
    pub max_concurrent_processes: usize,

    /// When set, only stdout lines starting with this marker carry the result
    #[serde(default)]
    pub result_marker: Option<String>,
}

/// Conversation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationsConfig {
    /// Exchanges kept per conversation; older ones are dropped
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,

    /// Characters of the last user message shown in listings
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["api_interface.py".to_string()]
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("./ai")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_length() -> u32 {
    GenerationParams::default().max_length
}

fn default_temperature() -> f32 {
    GenerationParams::default().temperature
}

fn default_max_exchanges() -> usize {
    20
}

fn default_preview_chars() -> usize {
    50
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            cors_origin: default_cors_origin(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: default_working_dir(),
            timeout_secs: default_timeout_secs(),
            chat_max_length: default_max_length(),
            chat_temperature: default_temperature(),
            generate_max_length: default_max_length(),
            generate_temperature: default_temperature(),
            max_concurrent_processes: 0,
            result_marker: None,
        }
    }
}

impl Default for ConversationsConfig {
    fn default() -> Self {
        Self {
            max_exchanges: default_max_exchanges(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Defaults for chat requests
    pub fn chat_params(&self) -> GenerationParams {
        GenerationParams {
            max_length: self.chat_max_length,
            temperature: self.chat_temperature,
        }
    }

    /// Defaults for free-form generate requests
    pub fn generate_params(&self) -> GenerationParams {
        GenerationParams {
            max_length: self.generate_max_length,
            temperature: self.generate_temperature,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.chatflow/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse, apply environment overrides, and validate
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let defaults = Self::default();

        // The file gets the defaults, not the environment-overridden values
        let toml_string = toml::to_string_pretty(&defaults)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = defaults;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.chatflow/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".chatflow").join("config.toml"))
    }

    /// Apply `CHATFLOW_*` overrides using the given variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CHATFLOW_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("CHATFLOW_PORT") {
            self.server.port = port.trim().parse().map_err(|_| {
                EngineError::Config(format!("CHATFLOW_PORT is not a valid port: '{}'", port))
            })?;
        }

        if let Some(base_url) = lookup("CHATFLOW_BASE_URL") {
            self.server.base_url = base_url;
        }

        if let Some(origin) = lookup("CHATFLOW_CORS_ORIGIN") {
            self.server.cors_origin = origin;
        }

        if let Some(level) = lookup("CHATFLOW_LOG_LEVEL") {
            self.core.log_level = level.to_lowercase();
        }

        Ok(())
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges and expands ~ in the inference working directory.
    /// The working directory is not required to exist; a missing directory
    /// shows up as `ai_ready: false` instead of a startup failure.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.inference.program.trim().is_empty() {
            return Err(EngineError::Config(
                "inference.program must not be empty".to_string(),
            ));
        }

        if self.inference.timeout_secs == 0 {
            return Err(EngineError::Config(
                "inference.timeout_secs must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("chat_max_length", self.inference.chat_max_length),
            ("generate_max_length", self.inference.generate_max_length),
        ] {
            validate_max_length(value)
                .map_err(|e| EngineError::Config(format!("inference.{}: {}", name, e)))?;
        }

        for (name, value) in [
            ("chat_temperature", self.inference.chat_temperature),
            ("generate_temperature", self.inference.generate_temperature),
        ] {
            validate_temperature(value)
                .map_err(|e| EngineError::Config(format!("inference.{}: {}", name, e)))?;
        }

        if let Some(marker) = &self.inference.result_marker {
            if marker.trim().is_empty() {
                return Err(EngineError::Config(
                    "inference.result_marker must not be blank when set".to_string(),
                ));
            }
        }

        if self.conversations.max_exchanges == 0 {
            return Err(EngineError::Config(
                "conversations.max_exchanges must be greater than 0".to_string(),
            ));
        }

        if self.conversations.preview_chars == 0 {
            return Err(EngineError::Config(
                "conversations.preview_chars must be greater than 0".to_string(),
            ));
        }

        self.inference.working_dir = expand_path(&self.inference.working_dir)?;

        Ok(())
    }
}

/// Check a requested `max_length`
pub fn validate_max_length(value: u32) -> Result<(), String> {
    if value == 0 || value > MAX_GENERATION_LENGTH {
        return Err(format!(
            "max_length must be between 1 and {}",
            MAX_GENERATION_LENGTH
        ));
    }
    Ok(())
}

/// Check a requested `temperature`
pub fn validate_temperature(value: f32) -> Result<(), String> {
    if !value.is_finite() || value <= 0.0 || value > MAX_TEMPERATURE {
        return Err(format!(
            "temperature must be greater than 0 and at most {}",
            MAX_TEMPERATURE
        ));
    }
    Ok(())
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
