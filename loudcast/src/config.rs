//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `LOUDCAST_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `LOUDCAST_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `LOUDCAST_ANALYSIS__GRAPH_COLOR=FF8800` sets the `analysis.graph_color` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use loudcast::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Parse CLI arguments
//! let args = Args::parse();
//!
//! // Load configuration from file and environment
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "LOUDCAST_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Route that accepts multipart audio uploads
    pub upload_path: String,
    /// Route that serves the server-sent-events stream
    pub events_path: String,
    /// Directory with the static UI files served under the root path
    pub ui_dir: PathBuf,
    /// Upload storage configuration
    pub storage: StorageConfig,
    /// Analysis subprocess configuration
    pub analysis: AnalysisConfig,
    /// Event stream configuration
    pub events: EventsConfig,
}

/// Where uploads land and how big they may be.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory uploaded files are written to (created on demand)
    pub dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_upload_size: u64,
}

/// How the external analysis tool is invoked.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Program invoked for the loudness scan
    pub program: String,
    /// Waveform image color, six hex digits (RRGGBB)
    pub graph_color: String,
    /// Wall-clock budget for a single analysis run. A run over budget is
    /// killed and its partial output is kept as a valid result.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Event stream tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Idle interval between heartbeat frames on the event stream
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Per-subscriber queue depth; a subscriber that lags past this skips
    /// the lost messages and continues
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3456,
            upload_path: "/upload".to_string(),
            events_path: "/events".to_string(),
            ui_dir: PathBuf::from("./ui"),
            storage: StorageConfig::default(),
            analysis: AnalysisConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./ui/files"),
            max_upload_size: 1024 * 1024 * 1024, // 1 GiB
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            graph_color: "0099CE".to_string(),
            timeout: Duration::from_secs(25),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            channel_capacity: 16,
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("LOUDCAST_").split("__"))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        // The color is substituted into the ffmpeg filtergraph, so it must
        // be a bare RRGGBB value and nothing else.
        if self.analysis.graph_color.len() != 6
            || !self.analysis.graph_color.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: analysis.graph_color must be six hex digits (RRGGBB), got {:?}",
                    self.analysis.graph_color
                ),
            });
        }

        for path in [&self.upload_path, &self.events_path] {
            if !path.starts_with('/') {
                return Err(Error::Internal {
                    operation: format!("Config validation: route {path:?} must start with '/'"),
                });
            }
        }

        if self.upload_path == self.events_path {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: upload_path and events_path must differ, both are {:?}",
                    self.upload_path
                ),
            });
        }

        if self.storage.max_upload_size == 0 {
            return Err(Error::Internal {
                operation: "Config validation: storage.max_upload_size must be greater than zero".to_string(),
            });
        }

        if self.events.channel_capacity == 0 {
            return Err(Error::Internal {
                operation: "Config validation: events.channel_capacity must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args_for(file: &str) -> Args {
        Args {
            config: file.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults() {
        Jail::expect_with(|_jail| {
            // No config file present: every field comes from Default
            let config = Config::load(&args_for("missing.yaml"))?;

            assert_eq!(config.port, 3456);
            assert_eq!(config.upload_path, "/upload");
            assert_eq!(config.events_path, "/events");
            assert_eq!(config.storage.max_upload_size, 1024 * 1024 * 1024);
            assert_eq!(config.analysis.program, "ffmpeg");
            assert_eq!(config.analysis.graph_color, "0099CE");
            assert_eq!(config.analysis.timeout, Duration::from_secs(25));
            assert_eq!(config.events.heartbeat_interval, Duration::from_secs(5));

            Ok(())
        });
    }

    #[test]
    fn test_yaml_and_durations() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 8080
upload_path: /api/upload
analysis:
  program: /usr/local/bin/ffmpeg
  timeout: 90s
events:
  heartbeat_interval: 2s
"#,
            )?;

            let config = Config::load(&args_for("test.yaml"))?;

            assert_eq!(config.port, 8080);
            assert_eq!(config.upload_path, "/api/upload");
            assert_eq!(config.events_path, "/events"); // default
            assert_eq!(config.analysis.program, "/usr/local/bin/ffmpeg");
            assert_eq!(config.analysis.timeout, Duration::from_secs(90));
            assert_eq!(config.events.heartbeat_interval, Duration::from_secs(2));

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 8080
"#,
            )?;

            jail.set_env("LOUDCAST_HOST", "127.0.0.1");
            jail.set_env("LOUDCAST_PORT", "9000");
            jail.set_env("LOUDCAST_ANALYSIS__GRAPH_COLOR", "FF8800");
            jail.set_env("LOUDCAST_STORAGE__MAX_UPLOAD_SIZE", "1048576");

            let config = Config::load(&args_for("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 9000);
            assert_eq!(config.analysis.graph_color, "FF8800");
            assert_eq!(config.storage.max_upload_size, 1048576);
            assert_eq!(config.bind_address(), "127.0.0.1:9000");

            Ok(())
        });
    }

    #[test]
    fn test_rejects_bad_graph_color() {
        Jail::expect_with(|jail| {
            jail.set_env("LOUDCAST_ANALYSIS__GRAPH_COLOR", "0099CE|evil");

            let result = Config::load(&args_for("missing.yaml"));
            assert!(result.is_err());

            Ok(())
        });
    }

    #[test]
    fn test_rejects_relative_route() {
        Jail::expect_with(|jail| {
            jail.set_env("LOUDCAST_UPLOAD_PATH", "upload");

            let result = Config::load(&args_for("missing.yaml"));
            assert!(result.is_err());

            Ok(())
        });
    }

    #[test]
    fn test_rejects_colliding_routes() {
        let mut config = Config::default();
        config.events_path = config.upload_path.clone();
        assert!(config.validate().is_err());
    }
}
