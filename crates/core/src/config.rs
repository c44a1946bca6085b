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

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub workers: WorkerConfig,
    pub retry: RetryConfig,
    pub schedule: ScheduleConfig,
    pub extractor: ExtractorConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RENEC_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RENEC_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            workers: WorkerConfig::from_env_profiled(p),
            retry: RetryConfig::from_env_profiled(p),
            schedule: ScheduleConfig::from_env_profiled(p),
            extractor: ExtractorConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  postgres:    host={}, db={}, configured={}",
            self.postgres.host,
            self.postgres.database,
            self.postgres.is_configured()
        );
        tracing::info!(
            "  workers:     harvest={}, monitoring={}",
            self.workers.harvest_workers,
            self.workers.monitoring_workers
        );
        tracing::info!(
            "  retry:       max_attempts={}, base={}s, max={}s, timeout={}s",
            self.retry.max_attempts,
            self.retry.base_backoff_secs,
            self.retry.max_backoff_secs,
            self.retry.job_timeout_secs
        );
        tracing::info!(
            "  schedule:    tz={}, drift={}, state={}",
            self.schedule.timezone,
            self.schedule.drift_policy,
            self.schedule.state_path.display()
        );
        tracing::info!("  extractor:   kind={}", self.extractor.kind);
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "workers": {
                "harvest": self.workers.harvest_workers,
                "monitoring": self.workers.monitoring_workers,
            },
            "retry": {
                "max_attempts": self.retry.max_attempts,
                "job_timeout_secs": self.retry.job_timeout_secs,
            },
            "schedule": {
                "timezone": self.schedule.timezone,
                "drift_policy": self.schedule.drift_policy,
            },
            "extractor": { "kind": self.extractor.kind },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    pub data_dir: PathBuf,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "renec"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Workers ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Concurrent executors on the `harvest` lane.
    pub harvest_workers: u32,
    /// Concurrent executors on the `monitoring` lane.
    pub monitoring_workers: u32,
    /// Idle wait between claim attempts when a lane is empty.
    pub poll_interval_ms: u64,
    /// Bounded channel capacity between extractor and engine.
    pub stream_buffer: u32,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            harvest_workers: profiled_env_u32(p, "HARVEST_WORKERS", 2),
            monitoring_workers: profiled_env_u32(p, "MONITORING_WORKERS", 1),
            poll_interval_ms: profiled_env_u64(p, "WORKER_POLL_INTERVAL_MS", 1_000),
            stream_buffer: profiled_env_u32(p, "EXTRACTOR_STREAM_BUFFER", 256),
        }
    }
}

// ── Retry / timeouts ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per job, including the first.
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    /// Maximum duration of one job attempt.
    pub job_timeout_secs: u64,
    /// Extra time on top of the timeout before a claim lease expires.
    pub lease_grace_secs: u64,
}

impl RetryConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_attempts: profiled_env_u32(p, "JOB_MAX_ATTEMPTS", 4),
            base_backoff_secs: profiled_env_u64(p, "RETRY_BASE_SECS", 60),
            max_backoff_secs: profiled_env_u64(p, "RETRY_MAX_SECS", 3_600),
            job_timeout_secs: profiled_env_u64(p, "JOB_TIMEOUT_SECS", 4 * 3_600),
            lease_grace_secs: profiled_env_u64(p, "JOB_LEASE_GRACE_SECS", 300),
        }
    }
}

// ── Schedule ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Fixed UTC offset every trigger is evaluated in, e.g. `-06:00`.
    pub timezone: String,
    /// `backfill` or `skip`.
    pub drift_policy: String,
    /// A slot older than this when first seen counts as missed.
    pub misfire_grace_secs: u64,
    pub tick_interval_secs: u64,
    /// Persisted last-fired slot per trigger.
    pub state_path: PathBuf,
    /// Optional TOML file with trigger rules (defaults used when absent).
    pub rules_path: Option<PathBuf>,
}

impl ScheduleConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "DATA_DIR", "data"));
        let state_default = data_dir.join("schedule_state.json");
        Self {
            timezone: profiled_env_or(p, "SCHEDULE_TIMEZONE", "-06:00"),
            drift_policy: profiled_env_or(p, "SCHEDULE_DRIFT_POLICY", "backfill"),
            misfire_grace_secs: profiled_env_u64(p, "SCHEDULE_MISFIRE_GRACE_SECS", 300),
            tick_interval_secs: profiled_env_u64(p, "SCHEDULE_TICK_SECS", 30),
            state_path: profiled_env_opt(p, "SCHEDULE_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or(state_default),
            rules_path: profiled_env_opt(p, "SCHEDULE_RULES_PATH").map(PathBuf::from),
        }
    }
}

// ── Extractor ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// "jsonl" or "http"
    pub kind: String,
    /// Root directory for the JSONL extractor.
    pub dir: PathBuf,
    /// Base URL of the extraction service for the HTTP extractor.
    pub url: Option<String>,
}

impl ExtractorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            kind: profiled_env_or(p, "EXTRACTOR_KIND", "jsonl"),
            dir: PathBuf::from(profiled_env_or(p, "EXTRACTOR_DIR", "data/extract")),
            url: profiled_env_opt(p, "EXTRACTOR_URL"),
        }
    }
}
