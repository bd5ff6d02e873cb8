//! Acquisition client configuration.

use std::path::PathBuf;
use std::time::Duration;

use modeldb_core::CiConfig;

/// Endpoints, cache location and retry policy.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub models_url: String,
    /// Object endpoint with a `{model_id}` placeholder.
    pub download_url: String,
    pub github_url: String,
    pub cache_dir: PathBuf,
    /// Attempts after the first one for transient failures.
    pub max_retries: u32,
    /// First backoff; doubled per retry.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub request_timeout: Duration,
    /// Concurrent downloads in a batch fetch.
    pub concurrency: usize,
}

impl FetchConfig {
    pub fn from_ci_config(config: &CiConfig) -> Self {
        Self {
            models_url: config.models_url.clone(),
            download_url: config.download_url.clone(),
            github_url: config.github_url.clone(),
            cache_dir: config.cache_dir.clone(),
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_cap)
    }
}
