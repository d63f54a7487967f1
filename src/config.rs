//! Configuration module for queuetap.
//!
//! Loads configuration from TOML files with environment variable substitution,
//! then applies command-line/environment overrides.
//!
//! # Example
//!
//! ```toml
//! [queue]
//! url = "${QUEUE_URL}"
//! region = "us-east-1"
//!
//! [consumer]
//! workers = 5
//! max_messages = 10
//! wait_time_seconds = 20
//! visibility_timeout_seconds = 30
//! profile = "consume"    # or "inspect" (never deletes)
//! output = "log"         # or "stdout"
//! ```

use crate::consumer::ConsumerSettings;
use crate::queue::{QueueSettings, ReceiveRequest, MAX_BATCH, MAX_WAIT_SECONDS};
use crate::report::OutputMode;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default config file location, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/queuetap.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct QueuetapConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Deployment profile. Decides whether messages are deleted by default.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Look at messages without removing them
    Inspect,
    /// Process and delete
    #[default]
    Consume,
}

/// Consumer configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConsumerConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,

    #[serde(default = "default_wait_time_seconds")]
    pub wait_time_seconds: i32,

    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: i32,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub profile: Profile,

    /// Explicit override of the profile's acknowledge default
    #[serde(default)]
    pub acknowledge: Option<bool>,

    #[serde(default)]
    pub output: OutputMode,

    #[serde(default = "default_receive_backoff_ms")]
    pub receive_backoff_ms: u64,

    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            wait_time_seconds: default_wait_time_seconds(),
            visibility_timeout_seconds: default_visibility_timeout_seconds(),
            workers: default_workers(),
            profile: Profile::default(),
            acknowledge: None,
            output: OutputMode::default(),
            receive_backoff_ms: default_receive_backoff_ms(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
        }
    }
}

fn default_max_messages() -> i32 {
    MAX_BATCH
}

fn default_wait_time_seconds() -> i32 {
    MAX_WAIT_SECONDS
}

fn default_visibility_timeout_seconds() -> i32 {
    30
}

fn default_workers() -> usize {
    5
}

fn default_receive_backoff_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

impl ConsumerConfig {
    /// Whether processed messages are deleted.
    pub fn acknowledge(&self) -> bool {
        self.acknowledge
            .unwrap_or(matches!(self.profile, Profile::Consume))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            receive: ReceiveRequest {
                max_messages: self.max_messages,
                wait_time_seconds: self.wait_time_seconds,
                visibility_timeout_seconds: self.visibility_timeout_seconds,
            },
            workers: self.workers,
            acknowledge: self.acknowledge(),
            receive_backoff: Duration::from_millis(self.receive_backoff_ms),
        }
    }
}

/// Values supplied on the command line or via environment, applied on top
/// of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub queue_url: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub max_messages: Option<i32>,
    pub wait_time_seconds: Option<i32>,
    pub visibility_timeout_seconds: Option<i32>,
    pub workers: Option<usize>,
    pub profile: Option<Profile>,
    pub acknowledge: Option<bool>,
    pub output: Option<OutputMode>,
}

impl QueuetapConfig {
    /// Load configuration from `path`, or the `QUEUETAP_CONFIG` env var, or
    /// the default location.
    ///
    /// Not validated: apply overrides first, then call [`Self::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let config_path = env::var("QUEUETAP_CONFIG")
                    .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
                Self::load_from(config_path)
            }
        }
    }

    /// Load configuration from a specific path. A missing file yields defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        let config: QueuetapConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.queue_url {
            self.queue.url = url;
        }
        if let Some(region) = overrides.region {
            self.queue.region = Some(region);
        }
        if let Some(endpoint_url) = overrides.endpoint_url {
            self.queue.endpoint_url = Some(endpoint_url);
        }
        if let Some(max_messages) = overrides.max_messages {
            self.consumer.max_messages = max_messages;
        }
        if let Some(wait_time_seconds) = overrides.wait_time_seconds {
            self.consumer.wait_time_seconds = wait_time_seconds;
        }
        if let Some(visibility) = overrides.visibility_timeout_seconds {
            self.consumer.visibility_timeout_seconds = visibility;
        }
        if let Some(workers) = overrides.workers {
            self.consumer.workers = workers;
        }
        if let Some(profile) = overrides.profile {
            self.consumer.profile = profile;
        }
        if let Some(acknowledge) = overrides.acknowledge {
            self.consumer.acknowledge = Some(acknowledge);
        }
        if let Some(output) = overrides.output {
            self.consumer.output = output;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.url.trim().is_empty() {
            return Err(ConfigError::MissingField("queue.url".to_string()));
        }

        if self.queue.url.contains("${") {
            return Err(ConfigError::ValidationError(format!(
                "queue.url contains an unsubstituted environment variable: {}",
                self.queue.url
            )));
        }

        let consumer = &self.consumer;
        if !(1..=MAX_BATCH).contains(&consumer.max_messages) {
            return Err(ConfigError::ValidationError(format!(
                "consumer.max_messages must be between 1 and {}, got {}",
                MAX_BATCH, consumer.max_messages
            )));
        }

        if !(0..=MAX_WAIT_SECONDS).contains(&consumer.wait_time_seconds) {
            return Err(ConfigError::ValidationError(format!(
                "consumer.wait_time_seconds must be between 0 and {}, got {}",
                MAX_WAIT_SECONDS, consumer.wait_time_seconds
            )));
        }

        if consumer.visibility_timeout_seconds <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "consumer.visibility_timeout_seconds must be positive, got {}",
                consumer.visibility_timeout_seconds
            )));
        }

        if consumer.workers == 0 {
            return Err(ConfigError::ValidationError(
                "consumer.workers must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> QueuetapConfig {
        let mut config = QueuetapConfig::default();
        config.queue.url = "https://sqs.us-east-1.amazonaws.com/1/orders".to_string();
        config
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("QUEUETAP_TEST_URL", "https://sqs.local/q");
        let input = "url = \"${QUEUETAP_TEST_URL}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"https://sqs.local/q\"");
        env::remove_var("QUEUETAP_TEST_URL");
    }

    #[test]
    fn test_env_var_not_set() {
        let input = "url = \"${QUEUETAP_NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${QUEUETAP_NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = QueuetapConfig::default();
        assert_eq!(config.consumer.max_messages, 10);
        assert_eq!(config.consumer.wait_time_seconds, 20);
        assert_eq!(config.consumer.visibility_timeout_seconds, 30);
        assert_eq!(config.consumer.workers, 5);
        assert_eq!(config.consumer.profile, Profile::Consume);
        assert!(config.consumer.acknowledge());
        assert_eq!(config.consumer.output, OutputMode::Log);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [queue]
            url = "https://sqs.eu-west-1.amazonaws.com/1/orders"
            region = "eu-west-1"
            endpoint_url = "http://localhost:4566"

            [consumer]
            max_messages = 4
            wait_time_seconds = 5
            visibility_timeout_seconds = 60
            workers = 3
            profile = "inspect"
            output = "stdout"
            receive_backoff_ms = 250
        "#;

        let config: QueuetapConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.queue.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.consumer.workers, 3);
        assert_eq!(config.consumer.profile, Profile::Inspect);
        assert_eq!(config.consumer.output, OutputMode::Stdout);
        assert!(config.validate().is_ok());

        let settings = config.consumer.settings();
        assert_eq!(settings.receive.max_messages, 4);
        assert_eq!(settings.receive.wait_time_seconds, 5);
        assert_eq!(settings.receive.visibility_timeout_seconds, 60);
        assert_eq!(settings.receive_backoff, Duration::from_millis(250));
        assert!(!settings.acknowledge);
    }

    #[test]
    fn test_profile_acknowledge_defaults() {
        let mut consumer = ConsumerConfig::default();
        consumer.profile = Profile::Inspect;
        assert!(!consumer.acknowledge());

        consumer.acknowledge = Some(true);
        assert!(consumer.acknowledge());

        consumer.profile = Profile::Consume;
        consumer.acknowledge = Some(false);
        assert!(!consumer.acknowledge());
    }

    #[test]
    fn test_overrides_win() {
        let mut config = valid();
        config.apply(Overrides {
            queue_url: Some("https://sqs.local/other".to_string()),
            workers: Some(8),
            profile: Some(Profile::Inspect),
            ..Overrides::default()
        });

        assert_eq!(config.queue.url, "https://sqs.local/other");
        assert_eq!(config.consumer.workers, 8);
        assert!(!config.consumer.acknowledge());
        assert_eq!(config.consumer.max_messages, 10);
    }

    #[test]
    fn test_validation_requires_queue_url() {
        let config = QueuetapConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(_))
        ));

        let mut config = valid();
        config.queue.url = "${QUEUE_URL}".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_ranges() {
        let mut config = valid();
        config.consumer.max_messages = 11;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.consumer.max_messages = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.consumer.wait_time_seconds = 21;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.consumer.visibility_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.consumer.workers = 0;
        assert!(config.validate().is_err());

        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = QueuetapConfig::load_from("definitely/not/here.toml").unwrap();
        assert_eq!(config, QueuetapConfig::default());
    }
}
