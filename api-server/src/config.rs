//! Environment-driven configuration for the import pipeline.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_POSTS_URL: &str = "https://jsonplaceholder.typicode.com/posts";

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown saturation policy '{0}', expected 'caller_runs' or 'reject'")]
    UnknownSaturationPolicy(String),
}

/// What the worker pool does when its queue is full and no more workers may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaturationPolicy {
    /// Run the job inline on the submitting task.
    #[default]
    CallerRuns,
    /// Refuse the job.
    Reject,
}

impl FromStr for SaturationPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "caller_runs" | "caller-runs" | "callerruns" => Ok(SaturationPolicy::CallerRuns),
            "reject" => Ok(SaturationPolicy::Reject),
            other => Err(ConfigError::UnknownSaturationPolicy(other.to_string())),
        }
    }
}

/// Sizing of the persistence worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub core_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    /// Idle time after which a worker above the core count retires.
    pub keep_alive: Duration,
    pub saturation: SaturationPolicy,
}

impl WorkerPoolConfig {
    pub fn from_env() -> Self {
        let saturation = match env::var("POSTS_DB_SATURATION_POLICY") {
            Ok(value) => value.parse().unwrap_or_else(|err| {
                log::warn!("config: {}; using caller_runs", err);
                SaturationPolicy::CallerRuns
            }),
            Err(_) => SaturationPolicy::CallerRuns,
        };

        Self {
            core_workers: env_usize("POSTS_DB_WORKERS_CORE", 4),
            max_workers: env_usize("POSTS_DB_WORKERS_MAX", 20),
            queue_capacity: env_usize("POSTS_DB_QUEUE_CAPACITY", 200),
            keep_alive: env_duration_millis("POSTS_DB_WORKER_KEEP_ALIVE_MS", 60_000),
            saturation,
        }
        .normalized()
    }

    /// Clamp values so that `1 <= core <= max` and the queue holds at least one job.
    pub fn normalized(mut self) -> Self {
        self.core_workers = self.core_workers.max(1);
        self.max_workers = self.max_workers.max(self.core_workers);
        self.queue_capacity = self.queue_capacity.max(1);
        self
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            core_workers: 4,
            max_workers: 20,
            queue_capacity: 200,
            keep_alive: Duration::from_secs(60),
            saturation: SaturationPolicy::CallerRuns,
        }
    }
}

/// Settings for fetching and persisting the upstream posts collection.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub source_url: String,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Report the import as failed when any row could not be saved.
    pub strict_row_failures: bool,
    pub pool: WorkerPoolConfig,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            source_url: env_string("POSTS_SOURCE_URL", DEFAULT_POSTS_URL),
            max_attempts: env_u32("POSTS_FETCH_MAX_ATTEMPTS", 3).max(1),
            backoff_base: env_duration_millis("POSTS_FETCH_BACKOFF_MS", 250),
            connect_timeout: env_duration_millis("POSTS_CONNECT_TIMEOUT_MS", 10_000),
            request_timeout: env_duration_millis("POSTS_REQUEST_TIMEOUT_MS", 15_000),
            strict_row_failures: env_bool("POSTS_IMPORT_STRICT", false),
            pool: WorkerPoolConfig::from_env(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_POSTS_URL.to_string(),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(15),
            strict_row_failures: false,
            pool: WorkerPoolConfig::default(),
        }
    }
}
