use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Comma-separated env var parsed into a list (entries trimmed, empties dropped).
fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env_opt(key) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub clickup: ClickUpConfig,
    pub scheduler: SchedulerConfig,
    pub automation: AutomationConfig,
    pub logs: LogConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            clickup: ClickUpConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            automation: AutomationConfig::from_env(),
            logs: LogConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:     {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  clickup:    base_url={}, team_id={}, configured={}",
            self.clickup.base_url,
            self.clickup.team_id.as_deref().unwrap_or("(none)"),
            self.clickup.is_configured()
        );
        tracing::info!(
            "  scheduler:  debounce={}ms, idle_timeout={}ms, max_concurrent={}",
            self.scheduler.debounce_ms,
            self.scheduler.idle_timeout_ms,
            self.scheduler.max_concurrent_keys
        );
        tracing::info!(
            "  automation: copy_fields={}, fetch_concurrency={}",
            self.automation.copy_field_ids.len(),
            self.automation.fetch_concurrency
        );
        tracing::info!("  logs:       dir={}", self.logs.dir.display());
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "server": { "host": self.server.host, "port": self.server.port },
            "clickup": {
                "base_url": self.clickup.base_url,
                "team_id": self.clickup.team_id,
                "configured": self.clickup.is_configured(),
            },
            "scheduler": {
                "debounce_ms": self.scheduler.debounce_ms,
                "idle_timeout_ms": self.scheduler.idle_timeout_ms,
                "max_concurrent_keys": self.scheduler.max_concurrent_keys,
            },
            "automation": {
                "copy_field_ids": self.automation.copy_field_ids,
                "fetch_concurrency": self.automation.fetch_concurrency,
            },
            "logs": { "dir": self.logs.dir },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_u16("PORT", 3001),
        }
    }
}

// ── ClickUp API ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickUpConfig {
    pub api_token: Option<String>,
    pub team_id: Option<String>,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl ClickUpConfig {
    fn from_env() -> Self {
        Self {
            api_token: env_opt("CLICKUP_API_TOKEN"),
            team_id: env_opt("CLICKUP_TEAM_ID"),
            base_url: env_or("CLICKUP_BASE_URL", "https://api.clickup.com/api/v2"),
            request_timeout_secs: env_u64("CLICKUP_REQUEST_TIMEOUT_SECS", 30),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }
}

// ── Coalescing scheduler ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a burst is absorbed before the trailing run fires.
    pub debounce_ms: u64,
    /// How long a quiet worker lingers before it is reclaimed.
    pub idle_timeout_ms: u64,
    /// Global cap on simultaneously running jobs across all keys.
    pub max_concurrent_keys: usize,
}

impl SchedulerConfig {
    fn from_env() -> Self {
        Self {
            debounce_ms: env_u64("SCHEDULER_DEBOUNCE_MS", 800),
            idle_timeout_ms: env_u64("SCHEDULER_IDLE_TIMEOUT_MS", 5_000),
            max_concurrent_keys: env_usize("SCHEDULER_MAX_CONCURRENT_KEYS", 20),
        }
    }
}

// ── Automation workflows ──────────────────────────────────────

/// Custom field IDs copied from a parent task to newly created subtasks.
/// Defaults match the workspace this service was originally built for.
const DEFAULT_COPY_FIELD_IDS: &[&str] = &[
    "3e1ac1d5-15ef-48c0-a666-37233c10d998", // Parent Task name
    "bad587f3-e81b-45dc-9f38-28eed14c9e6e", // Parts cost
    "d2f1b2ca-7236-4d2c-9814-90d9a3b3e041", // SKU
    "dbed7e4e-1995-417a-b8eb-d73e7f1d7a80", // MACHINE MODEL
    "1bab94c1-eeff-455c-adfe-20e6079b275d", // Machine Brand
];

const DEFAULT_PARTS_COST_FIELD_ID: &str = "bad587f3-e81b-45dc-9f38-28eed14c9e6e";
const DEFAULT_TOTAL_PARTS_COST_FIELD_ID: &str = "7ba61d6a-6b79-49c3-9e6d-1fd1e30310cc";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Custom fields copied parent → subtask on subtask creation.
    pub copy_field_ids: Vec<String>,
    /// Currency field summed across subtasks.
    pub parts_cost_field_id: String,
    /// Currency field on the parent receiving the sum.
    pub total_parts_cost_field_id: String,
    /// Pause between consecutive field updates on the same task.
    pub field_update_delay_ms: u64,
    /// How many times failed dropdown updates are retried.
    pub dropdown_retry_limit: u32,
    pub dropdown_retry_delay_ms: u64,
    /// Max simultaneous subtask detail fetches during cost aggregation.
    pub fetch_concurrency: usize,
}

impl AutomationConfig {
    fn from_env() -> Self {
        Self {
            copy_field_ids: env_list("AUTOMATION_COPY_FIELD_IDS", DEFAULT_COPY_FIELD_IDS),
            parts_cost_field_id: env_or("AUTOMATION_PARTS_COST_FIELD_ID", DEFAULT_PARTS_COST_FIELD_ID),
            total_parts_cost_field_id: env_or(
                "AUTOMATION_TOTAL_PARTS_COST_FIELD_ID",
                DEFAULT_TOTAL_PARTS_COST_FIELD_ID,
            ),
            field_update_delay_ms: env_u64("AUTOMATION_FIELD_UPDATE_DELAY_MS", 500),
            dropdown_retry_limit: env_u64("AUTOMATION_DROPDOWN_RETRY_LIMIT", 2) as u32,
            dropdown_retry_delay_ms: env_u64("AUTOMATION_DROPDOWN_RETRY_DELAY_MS", 1_000),
            fetch_concurrency: env_usize("AUTOMATION_FETCH_CONCURRENCY", 6),
        }
    }
}

// ── Payload log ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory raw webhook payloads are archived into.
    pub dir: PathBuf,
}

impl LogConfig {
    fn from_env() -> Self {
        Self {
            dir: PathBuf::from(env_or("WEBHOOK_LOG_DIR", "webhook_logs")),
        }
    }
}
