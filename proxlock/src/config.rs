//! Client configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `proxlock.yaml` but can be specified via `-f` flag or `PROXLOCK_CONFIG`
//! environment variable. A missing file is fine: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `proxlock.yaml`)
//! 2. **Environment variables** - Variables prefixed with `PROXLOCK_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `PROXLOCK_USAGE__REFRESH_INTERVAL=1m` sets the `usage.refresh_interval` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use proxlock::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Talking to {}", config.api_url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Point at a local backend
//! PROXLOCK_API_URL=http://127.0.0.1:8080
//!
//! # Session token from the identity provider
//! PROXLOCK_TOKEN="eyJhbGciOi..."
//!
//! # Or fetch a fresh one for every call
//! PROXLOCK_TOKEN_COMMAND="clerk-token --template default"
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::cli::Command;
use crate::errors::Error;

/// CLI args: the config file plus the command to run
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "PROXLOCK_CONFIG", default_value = "proxlock.yaml", global = true)]
    pub config: String,

    /// Validate configuration and exit without contacting the backend.
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Main client configuration.
///
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the ProxLock backend; `/me/...` paths are resolved against it
    pub api_url: Url,
    /// Session token issued by the identity provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Command printing a fresh session token on stdout; wins over `token`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_command: Option<String>,
    /// Timeout applied to every backend request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Usage banner configuration
    pub usage: UsageConfig,
    /// User-visible notices configuration
    pub notices: NoticesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: Url::parse("http://127.0.0.1:8080").expect("valid default URL"),
            token: None,
            token_command: None,
            request_timeout: Duration::from_secs(30),
            usage: UsageConfig::default(),
            notices: NoticesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UsageConfig {
    /// How often the user record (and its usage counters) is refetched
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    /// Usage ratio at which the low-request-limit banner appears
    pub low_usage_threshold: f64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            low_usage_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NoticesConfig {
    /// How long an error notice stays visible unless dismissed
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl Default for NoticesConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.api_url.scheme(), "http" | "https") {
            return Err(Error::Validation {
                message: format!(
                    "Config validation: api_url must use http or https (got '{}')",
                    self.api_url.scheme()
                ),
            });
        }

        if let Some(command) = &self.token_command
            && command.trim().is_empty()
        {
            return Err(Error::Validation {
                message: "Config validation: token_command cannot be blank. Remove it or set a command.".to_string(),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Validation {
                message: "Config validation: request_timeout must be positive (default: 30s).".to_string(),
            });
        }

        let threshold = self.usage.low_usage_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Validation {
                message: format!("Config validation: usage.low_usage_threshold must be in (0, 1] (got {threshold})"),
            });
        }

        if self.usage.refresh_interval < Duration::from_secs(1) {
            return Err(Error::Validation {
                message: "Config validation: usage.refresh_interval is too short (minimum 1s)".to_string(),
            });
        }

        if self.notices.duration.is_zero() {
            return Err(Error::Validation {
                message: "Config validation: notices.duration must be positive (default: 5s).".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("PROXLOCK_").ignore(&["CONFIG"]).split("__"))
    }
}
