use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Envelope / dedupe defaults — mirrored from the original agent runtime.
pub const ENVELOPE_VERSION: u32 = 1;
pub const IDEMPOTENCY_TTL_FLOOR_SECS: u64 = 30;
pub const INBOUND_DEDUPE_TTL_SECS: u64 = 7 * 24 * 3600;
pub const OUTBOUND_DEDUPE_TTL_SECS: u64 = 7 * 24 * 3600;
pub const DEDUPE_KEY_MAX_LEN: usize = 512;

// Dispatch / prompt defaults.
pub const DEFAULT_DEBOUNCE_WAIT_MS: u64 = 3_000;
pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1_200;
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 1_500;
pub const DEFAULT_HISTORY_LIMIT: usize = 25;
pub const HISTORY_LIMIT_WITH_SUMMARY: usize = 15;
pub const LONG_TERM_FACT_TOP_K: usize = 10;
pub const KNOWLEDGE_CHUNK_TOP_K: usize = 8;
pub const LONG_TERM_FACT_MAX_DISTANCE: f64 = 0.35;
pub const MAX_MEDIA_OUTBOUND_ITEMS: usize = 5;

// Payload limit defaults.
pub const DEFAULT_TOOL_ARGS_MAX_BYTES: usize = 25_000;
pub const DEFAULT_TOOL_RESULT_MAX_BYTES: usize = 250_000;
pub const DEFAULT_MEDIA_DOWNLOAD_MAX_BYTES: u64 = 15_000_000;
pub const DEFAULT_STT_AUDIO_MAX_BYTES: u64 = 10_000_000;
pub const DEFAULT_VISION_IMAGE_MAX_BYTES: u64 = 6_000_000;

// MCP bridge.
pub const MCP_TOOL_LIST_FRESHNESS_SECS: u64 = 15 * 60;

// Memory cleanup thresholds.
pub const MEMORY_ARCHIVE_INACTIVE_DAYS: i64 = 30;
pub const MEMORY_STRIP_AGNO_SESSION_DAYS: i64 = 90;
pub const MEMORY_PRUNE_BOT_FACTS_DAYS: i64 = 180;

/// Top-level config (centurion.toml + CENTURION_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CenturionConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub followup: FollowupConfig,
    #[serde(default)]
    pub memory_cleanup: MemoryCleanupConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub payload_limits: PayloadLimitsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl Default for CenturionConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            debounce: DebounceConfig::default(),
            watchdog: WatchdogConfig::default(),
            followup: FollowupConfig::default(),
            memory_cleanup: MemoryCleanupConfig::default(),
            locks: LockConfig::default(),
            egress: EgressConfig::default(),
            payload_limits: PayloadLimitsConfig::default(),
            providers: ProvidersConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

/// Keyring key material for decrypting tool auth blobs. Left empty
/// only drops the ability to resolve encrypted tool secrets — every other
/// feature still runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    #[serde(default)]
    pub keyring_key: Option<String>,
    #[serde(default)]
    pub keyring_previous_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_debounce_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_wait_ms")]
    pub default_wait_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_debounce_poll_ms(),
            default_wait_ms: default_debounce_wait_ms(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_watchdog_poll_ms(),
            stuck_after_secs: default_stuck_after_secs(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupConfig {
    #[serde(default = "default_followup_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for FollowupConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_followup_poll_ms(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCleanupConfig {
    #[serde(default = "default_memory_cleanup_interval_ms")]
    pub interval_ms: u64,
}

impl Default for MemoryCleanupConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_memory_cleanup_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_lock_refresh_secs")]
    pub refresh_every_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_lock_ttl_secs(),
            refresh_every_secs: default_lock_refresh_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EgressConfig {
    /// When non-empty, only these hosts (exact or subdomain match) are allowed.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "bool_true")]
    pub block_private_networks: bool,
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,
    #[serde(default = "default_media_download_timeout_ms")]
    pub media_download_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadLimitsConfig {
    #[serde(default = "default_tool_args_max_bytes")]
    pub tool_args_max_bytes: usize,
    #[serde(default = "default_tool_result_max_bytes")]
    pub tool_result_max_bytes: usize,
    #[serde(default = "default_media_download_max_bytes")]
    pub media_download_max_bytes: u64,
    #[serde(default = "default_stt_audio_max_bytes")]
    pub stt_audio_max_bytes: u64,
    #[serde(default = "default_vision_image_max_bytes")]
    pub vision_image_max_bytes: u64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_list_len")]
    pub max_list_len: usize,
    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,
}

impl Default for PayloadLimitsConfig {
    fn default() -> Self {
        Self {
            tool_args_max_bytes: default_tool_args_max_bytes(),
            tool_result_max_bytes: default_tool_result_max_bytes(),
            media_download_max_bytes: default_media_download_max_bytes(),
            stt_audio_max_bytes: default_stt_audio_max_bytes(),
            vision_image_max_bytes: default_vision_image_max_bytes(),
            max_depth: default_max_depth(),
            max_list_len: default_max_list_len(),
            max_string_len: default_max_string_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai: Option<OpenAiProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    8089
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.centurion/centurion.db", home)
}
fn default_pool_min() -> u32 {
    1
}
fn default_pool_max() -> u32 {
    8
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_debounce_poll_ms() -> u64 {
    500
}
fn default_debounce_wait_ms() -> u64 {
    DEFAULT_DEBOUNCE_WAIT_MS
}
fn default_batch_size() -> usize {
    20
}
fn default_watchdog_poll_ms() -> u64 {
    15_000
}
fn default_stuck_after_secs() -> i64 {
    120
}
fn default_followup_poll_ms() -> u64 {
    30_000
}
fn default_memory_cleanup_interval_ms() -> u64 {
    3_600_000
}
fn default_lock_ttl_secs() -> u64 {
    60
}
fn default_lock_refresh_secs() -> u64 {
    20
}
fn default_dns_timeout_ms() -> u64 {
    3_000
}
fn default_media_download_timeout_ms() -> u64 {
    20_000
}
fn default_tool_args_max_bytes() -> usize {
    DEFAULT_TOOL_ARGS_MAX_BYTES
}
fn default_tool_result_max_bytes() -> usize {
    DEFAULT_TOOL_RESULT_MAX_BYTES
}
fn default_media_download_max_bytes() -> u64 {
    DEFAULT_MEDIA_DOWNLOAD_MAX_BYTES
}
fn default_stt_audio_max_bytes() -> u64 {
    DEFAULT_STT_AUDIO_MAX_BYTES
}
fn default_vision_image_max_bytes() -> u64 {
    DEFAULT_VISION_IMAGE_MAX_BYTES
}
fn default_max_depth() -> usize {
    6
}
fn default_max_list_len() -> usize {
    200
}
fn default_max_string_len() -> usize {
    4_000
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl CenturionConfig {
    /// Load config from a TOML file with CENTURION_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CenturionConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CENTURION_").split("_"))
            .extract()
            .map_err(|e| crate::error::CenturionError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.centurion/centurion.toml", home)
}
