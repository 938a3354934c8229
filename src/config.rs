//! Configuration types for attachment-transfer

use crate::error::{Error, Result};
use crate::types::ProcessRole;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Background transfer behavior (session policy, temp files, handoff polling)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Container identifier shared by the main and the extension process
    /// (default: "group.org.attachments")
    #[serde(default = "default_shared_container_id")]
    pub shared_container_id: String,

    /// Directory receiving the streamable multipart copies (default: "./temp/uploads")
    ///
    /// Must live inside the shared container so both processes can read and
    /// delete the copies.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Idle timeout of a single request inside a session (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Upper bound for a whole transfer (default: 7 days)
    #[serde(default = "default_resource_timeout", with = "duration_serde")]
    pub resource_timeout: Duration,

    /// Delay between checks for sessions released by the extension process (default: 5000 ms)
    #[serde(
        default = "default_extension_poll_interval",
        with = "duration_millis_serde"
    )]
    pub extension_poll_interval: Duration,

    /// Status codes accepted as success in addition to 2xx
    #[serde(default)]
    pub additional_success_codes: Vec<u16>,

    /// Which process this instance runs in
    #[serde(default)]
    pub role: ProcessRole,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            shared_container_id: default_shared_container_id(),
            temp_dir: default_temp_dir(),
            request_timeout: default_request_timeout(),
            resource_timeout: default_resource_timeout(),
            extension_poll_interval: default_extension_poll_interval(),
            additional_success_codes: vec![],
            role: ProcessRole::default(),
        }
    }
}

/// Vendor API settings used by finalization requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the vendor API (default: "https://api.zotero.org/")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Value of the `Zotero-API-Version` header (default: 3)
    #[serde(default = "default_api_version")]
    pub api_version: u32,

    /// Value of the `Zotero-Schema-Version` header (default: 0)
    #[serde(default)]
    pub schema_version: u32,

    /// API key sent as a bearer token (None = unauthenticated)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Retry policy for transient API failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_version: default_api_version(),
            schema_version: 0,
            api_key: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Durable state location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path shared by both processes (default: "./attachment_transfer.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for attachment-transfer
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session policy, temp files and handoff polling
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Vendor API used for finalization
    #[serde(default)]
    pub api: ApiConfig,

    /// Durable state location
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Temporary directory for multipart copies
    pub fn temp_dir(&self) -> &PathBuf {
        &self.transfer.temp_dir
    }

    /// Check settings that would otherwise only fail once an upload is underway
    pub fn validate(&self) -> Result<()> {
        if self.transfer.shared_container_id.trim().is_empty() {
            return Err(Error::Config {
                message: "shared container identifier must not be empty".into(),
                key: Some("transfer.shared_container_id".into()),
            });
        }

        if self.transfer.extension_poll_interval.is_zero() {
            return Err(Error::Config {
                message: "extension poll interval must be greater than zero".into(),
                key: Some("transfer.extension_poll_interval".into()),
            });
        }

        if let Some(code) = self
            .transfer
            .additional_success_codes
            .iter()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(Error::Config {
                message: format!("{} is not an HTTP status code", code),
                key: Some("transfer.additional_success_codes".into()),
            });
        }

        url::Url::parse(&self.api.base_url).map_err(|e| Error::Config {
            message: format!("invalid API base URL: {}", e),
            key: Some("api.base_url".into()),
        })?;

        Ok(())
    }
}

fn default_shared_container_id() -> String {
    "group.org.attachments".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp/uploads")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_resource_timeout() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_extension_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_base_url() -> String {
    "https://api.zotero.org/".to_string()
}

fn default_api_version() -> u32 {
    3
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./attachment_transfer.db")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration serialization helper, for intervals below one second
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
