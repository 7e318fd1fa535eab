//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins. Empty means allow all origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Development mode: disables CORS restrictions and rate limiting.
    #[serde(default)]
    pub dev_mode: bool,
    /// Grace window for in-flight requests on shutdown, in seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
            dev_mode: false,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ServerConfig {
    /// Get the shutdown grace window as a Duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Blob storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for stored blobs.
        path: PathBuf,
    },
    /// S3-compatible object storage (Backblaze B2 speaks the S3 API).
    S3 {
        /// Bucket name.
        bucket: String,
        /// Endpoint URL (e.g., "https://s3.us-east-005.backblazeb2.com").
        endpoint: Option<String>,
        /// Region.
        region: Option<String>,
        /// Optional key prefix for all objects.
        prefix: Option<String>,
        /// Public base URL for direct downloads. Empty disables direct URLs.
        public_url: Option<String>,
        /// Application key id. Falls back to the ambient AWS credential chain if unset.
        /// WARNING: prefer env vars over storing secrets in config files.
        access_key_id: Option<String>,
        /// Application key. Falls back to the ambient AWS credential chain if unset.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO;
        /// Backblaze B2 accepts either style.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./uploads"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database file path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("satoshisend.db")
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Lightning wallet configuration.
///
/// With both `access_token` and `webhook_secret` set, the server talks to the
/// Alby wallet API and consumes its signed settlement webhooks. With neither
/// set, a mock wallet that self-settles invoices is used. A token without a
/// webhook secret is a fatal configuration error: invoices would be minted
/// that the server can never observe settling.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Alby API access token.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Webhook endpoint secret (with or without the `whsec_` prefix).
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Delay before the mock wallet self-settles a minted invoice, in seconds.
    #[serde(default = "default_mock_settle_delay_secs")]
    pub mock_settle_delay_secs: u64,
}

fn default_mock_settle_delay_secs() -> u64 {
    20
}

impl WalletConfig {
    /// True when the real wallet adapter should be used.
    pub fn is_real(&self) -> bool {
        self.access_token.is_some() && self.webhook_secret.is_some()
    }

    /// Get the mock settle delay as a Duration.
    pub fn mock_settle_delay(&self) -> Duration {
        Duration::from_secs(self.mock_settle_delay_secs)
    }

    /// Validate wallet configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.access_token.is_some() && self.webhook_secret.is_none() {
            return Err(
                "wallet.access_token is set but wallet.webhook_secret is missing; \
                 settlement webhooks cannot be verified without the endpoint secret"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Upload and hosting limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitConfig {
    /// How long an unpaid upload survives before the janitor may sweep it, in seconds.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
    /// Hosting window granted once an invoice settles, in seconds.
    #[serde(default = "default_host_duration_secs")]
    pub host_duration_secs: u64,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: i64,
    /// Maximum concurrent unpaid uploads per client IP.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Maximum attempts for a blob store write.
    #[serde(default = "default_max_save_retries")]
    pub max_save_retries: u32,
    /// Initial delay between blob store write attempts, doubling each retry.
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
}

fn default_pending_timeout_secs() -> u64 {
    900 // 15 minutes
}

fn default_host_duration_secs() -> u64 {
    7 * 24 * 3600
}

fn default_max_upload_size() -> i64 {
    5 << 30 // 5 GiB
}

fn default_max_pending() -> usize {
    3
}

fn default_max_save_retries() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: default_pending_timeout_secs(),
            host_duration_secs: default_host_duration_secs(),
            max_upload_size: default_max_upload_size(),
            max_pending: default_max_pending(),
            max_save_retries: default_max_save_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
        }
    }
}

impl LimitConfig {
    /// Get the pending timeout as a Duration.
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    /// Get the host duration as a Duration.
    pub fn host_duration(&self) -> Duration {
        Duration::from_secs(self.host_duration_secs)
    }

    /// Get the initial retry delay as a Duration.
    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    /// Validate limit configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_size <= 0 {
            return Err("limits.max_upload_size must be positive".to_string());
        }
        if self.max_pending == 0 {
            return Err("limits.max_pending must be at least 1".to_string());
        }
        if self.max_save_retries == 0 {
            return Err("limits.max_save_retries must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Janitor configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Interval between sweep cycles, in seconds.
    #[serde(default = "default_janitor_interval_secs")]
    pub interval_secs: u64,
}

fn default_janitor_interval_secs() -> u64 {
    3600 // 1 hour
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_janitor_interval_secs(),
        }
    }
}

impl JanitorConfig {
    /// Get the sweep interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate janitor configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("janitor.interval_secs cannot be 0. \
                 This would cause a panic when creating the sweep timer."
                .to_string());
        }
        Ok(())
    }
}

/// Request rate limiting configuration.
///
/// Two request classes share the per-IP key space: a general class covering
/// every API request, and a stricter upload class covering upload admission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting. Ignored (treated as disabled) in dev mode.
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// General requests per second per IP.
    #[serde(default = "default_general_requests_per_second")]
    pub general_requests_per_second: u32,
    /// General burst size.
    #[serde(default = "default_general_burst")]
    pub general_burst: u32,
    /// Upload admissions per minute per IP.
    #[serde(default = "default_upload_requests_per_minute")]
    pub upload_requests_per_minute: u32,
    /// Upload burst size.
    #[serde(default = "default_upload_burst")]
    pub upload_burst: u32,
    /// Time-to-live for idle per-IP entries, in seconds.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
    /// Interval between cleanup sweeps of idle entries, in seconds.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Maximum tracked IPs before new clients are rejected outright.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_general_requests_per_second() -> u32 {
    10
}

fn default_general_burst() -> u32 {
    20
}

fn default_upload_requests_per_minute() -> u32 {
    10
}

fn default_upload_burst() -> u32 {
    3
}

fn default_entry_ttl_secs() -> u64 {
    600 // 10 minutes
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_max_entries() -> u32 {
    100_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            general_requests_per_second: default_general_requests_per_second(),
            general_burst: default_general_burst(),
            upload_requests_per_minute: default_upload_requests_per_minute(),
            upload_burst: default_upload_burst(),
            entry_ttl_secs: default_entry_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration. Returns warnings for configs that
    /// are allowed but questionable, and errors for unsafe configs.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        if self.cleanup_interval_secs == 0 {
            return Err("rate_limit.cleanup_interval_secs cannot be 0. \
                 This would cause a panic when creating the cleanup timer. \
                 Use a value >= 1 second."
                .to_string());
        }

        if self.entry_ttl_secs < 120 {
            warnings.push(format!(
                "rate_limit.entry_ttl_secs={} is very short. \
                 Entries may be evicted before rate limits reset, \
                 allowing clients to bypass limits by waiting.",
                self.entry_ttl_secs
            ));
        }

        Ok(warnings)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Lightning wallet configuration.
    #[serde(default)]
    pub wallet: WalletConfig,
    /// Upload and hosting limits.
    #[serde(default)]
    pub limits: LimitConfig,
    /// Janitor configuration.
    #[serde(default)]
    pub janitor: JanitorConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Filesystem storage, mock wallet, fast retries.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.limits.initial_retry_delay_ms = 5;
        // Long enough that tests settle invoices explicitly, never by timer.
        config.wallet.mock_settle_delay_secs = 3600;
        config.rate_limit.enabled = false;
        config
    }
}
