//! # Configuration Management
//!
//! Settings are loaded from three layers, highest priority first:
//! 1. Environment variables (`DUPLEX_SERVER__PORT`, `DUPLEX_MODELS__MIMI_MODEL_FILE`, ...)
//!    plus the deployment-style `HOST` and `PORT`
//! 2. Configuration file (`config.toml`, optional)
//! 3. Built-in defaults (the `Default` impl)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: the same structs are serialized into the defaults layer and
//!   deserialized back out of the merged result
//! - **Option<PathBuf>**: files that may legitimately be absent
//! - **anyhow + typed errors**: validation failures are `PipelineError::StartupConfiguration`
//!   wrapped in `anyhow::Error`, so `main` can report them uniformly

use crate::device::DevicePreference;
use crate::error::PipelineError;
use crate::frame::MODEL_INPUT_CODEBOOKS;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub pipeline: PipelineConfig,
}

/// Where the HTTP server listens.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only local clients
/// - `host = "0.0.0.0"`: any interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Model files and engine selection.
///
/// ## Fields:
/// - `mimi_model_file`: local safetensors checkpoint of the Mimi codec (required)
/// - `text_tokenizer_file`: optional `tokenizers` JSON used to render text tokens
/// - `num_codebooks`: codebooks emitted by the codec; at least 8
/// - `device`: `auto`, `cpu`, `cuda` or `metal`
/// - `engine`: step model to run; `echo` is the built-in loopback
/// - `echo_delay_steps`: how many steps the echo model lags behind its input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub mimi_model_file: Option<PathBuf>,
    pub text_tokenizer_file: Option<PathBuf>,
    pub num_codebooks: usize,
    pub device: String,
    pub engine: String,
    pub echo_delay_steps: usize,
}

/// Timing of the cooperative tasks.
///
/// ## Fields:
/// - `poll_interval_ms`: idle sleep of the bridge and session tasks
/// - `warmup_poll_ms`: codec polling interval during warmup
/// - `warmup_timeout_ms`: upper bound on any single wait during warmup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub poll_interval_ms: u64,
    pub warmup_poll_ms: u64,
    pub warmup_timeout_ms: u64,
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn warmup_poll(&self) -> Duration {
        Duration::from_millis(self.warmup_poll_ms)
    }

    pub fn warmup_timeout(&self) -> Duration {
        Duration::from_millis(self.warmup_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1,
            warmup_poll_ms: 10,
            warmup_timeout_ms: 30_000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8998,
            },
            models: ModelsConfig {
                mimi_model_file: None,
                text_tokenizer_file: None,
                num_codebooks: MODEL_INPUT_CODEBOOKS,
                device: "auto".to_string(),
                engine: "echo".to_string(),
                echo_delay_steps: 1,
            },
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `DUPLEX_SERVER__PORT=9000`
    /// - `DUPLEX_MODELS__MIMI_MODEL_FILE=/models/mimi.safetensors`
    /// - `DUPLEX_PIPELINE__WARMUP_TIMEOUT_MS=60000`
    /// - `HOST=0.0.0.0`, `PORT=3000`: deployment platform overrides
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("DUPLEX")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot start with.
    ///
    /// ## What this checks:
    /// - port is not 0 and poll intervals are positive
    /// - the codec emits at least as many codebooks as the model consumes
    /// - the device and engine names are known
    /// - the Mimi checkpoint is configured and exists; the tokenizer exists if set
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> {
            Err(PipelineError::StartupConfiguration(msg).into())
        };

        if self.server.port == 0 {
            return fail("server port cannot be 0".to_string());
        }
        if self.pipeline.poll_interval_ms == 0 || self.pipeline.warmup_poll_ms == 0 {
            return fail("poll intervals must be greater than 0".to_string());
        }
        if self.pipeline.warmup_timeout_ms < self.pipeline.warmup_poll_ms {
            return fail("warmup timeout must be at least one warmup poll".to_string());
        }
        if self.models.num_codebooks < MODEL_INPUT_CODEBOOKS {
            return fail(format!(
                "num_codebooks must be at least {}, got {}",
                MODEL_INPUT_CODEBOOKS, self.models.num_codebooks
            ));
        }
        if let Err(e) = self.models.device.parse::<DevicePreference>() {
            return fail(e);
        }
        if self.models.engine != "echo" {
            return fail(format!("unknown engine '{}'", self.models.engine));
        }

        match &self.models.mimi_model_file {
            None => return fail("models.mimi_model_file is not set".to_string()),
            Some(path) if !path.is_file() => {
                return fail(format!("mimi model file {:?} does not exist", path));
            }
            Some(_) => {}
        }
        if let Some(path) = &self.models.text_tokenizer_file {
            if !path.is_file() {
                return fail(format!("text tokenizer file {:?} does not exist", path));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup_error(config: &AppConfig) -> Option<PipelineError> {
        config
            .validate()
            .err()
            .and_then(|e| e.downcast_ref::<PipelineError>().cloned())
    }

    /// A config pointing at an existing file (this source file stands in for the checkpoint).
    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.models.mimi_model_file = Some(PathBuf::from(file!()));
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8998);
        assert_eq!(config.pipeline.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.pipeline.warmup_poll(), Duration::from_millis(10));
    }

    /// Defaults alone cannot start: the codec checkpoint has to be provided.
    #[test]
    fn test_missing_model_file_is_startup_error() {
        assert!(matches!(
            startup_error(&AppConfig::default()),
            Some(PipelineError::StartupConfiguration(_))
        ));

        let mut config = AppConfig::default();
        config.models.mimi_model_file = Some(PathBuf::from("/nonexistent/mimi.safetensors"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.models.num_codebooks = 4;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.models.engine = "gpt".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.models.device = "tpu".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.pipeline.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    /// Defaults survive the trip through the config crate unchanged.
    #[test]
    fn test_defaults_round_trip_through_loader() {
        let loaded: AppConfig = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(loaded.server.port, 8998);
        assert_eq!(loaded.models.engine, "echo");
        assert!(loaded.models.mimi_model_file.is_none());
    }
}
