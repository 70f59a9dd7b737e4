//! Engine tuning: cache budgets, fetch limits and request defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::entities::{CachePolicy, Priority, ResizeMode, RevalidationMode};
use crate::infrastructure::image::CoordinatorConfig;
use crate::infrastructure::image::decode::DEFAULT_MAX_DIMENSION;
use crate::infrastructure::image::disk_cache::{DEFAULT_MAX_CACHE_SIZE, default_cache_dir};
use crate::infrastructure::image::http_fetcher::DEFAULT_USER_AGENT;
use crate::infrastructure::image::memory_cache::DEFAULT_MEMORY_BUDGET;
use crate::infrastructure::image::scheduler::DEFAULT_MAX_CONCURRENT_FETCHES;

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Byte budget of decoded bitmaps held in memory.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: u64,

    /// Byte budget of encoded images kept on disk.
    #[serde(default = "default_disk_budget")]
    pub disk_budget_bytes: u64,

    /// Disk store directory. Platform cache directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: default_memory_budget(),
            disk_budget_bytes: default_disk_budget(),
            disk_dir: None,
        }
    }
}

impl CacheConfig {
    /// Returns the configured or platform disk directory.
    #[must_use]
    pub fn effective_disk_dir(&self) -> PathBuf {
        self.disk_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// `[fetch]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent network fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Load deadline in seconds. `0` disables it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// `User-Agent` sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Revalidation of `Web` entries found on disk.
    #[serde(default)]
    pub web_revalidation: RevalidationMode,

    /// Largest accepted source width or height.
    #[serde(default = "default_max_decoded_dimension")]
    pub max_decoded_dimension: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
            web_revalidation: RevalidationMode::default(),
            max_decoded_dimension: default_max_decoded_dimension(),
        }
    }
}

impl FetchConfig {
    /// Load deadline, `None` when disabled.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// `[defaults]` section applied by `ImageEngine::request`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default cache policy.
    #[serde(default)]
    pub cache_policy: CachePolicy,

    /// Default resize mode.
    #[serde(default)]
    pub resize_mode: ResizeMode,

    /// Default priority.
    #[serde(default)]
    pub priority: Priority,
}

/// Everything the engine needs to start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Store budgets and location.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Network behavior.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Request defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

impl EngineConfig {
    /// Derives the coordinator settings.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrent_fetches: self.fetch.max_concurrent_fetches,
            default_deadline: self.fetch.request_timeout(),
            revalidation: self.fetch.web_revalidation,
            max_decoded_dimension: self.fetch.max_decoded_dimension,
        }
    }
}

const fn default_memory_budget() -> u64 {
    DEFAULT_MEMORY_BUDGET
}

const fn default_disk_budget() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_max_concurrent_fetches() -> usize {
    DEFAULT_MAX_CONCURRENT_FETCHES
}

const fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

const fn default_max_decoded_dimension() -> u32 {
    DEFAULT_MAX_DIMENSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [fetch]
            max_concurrent_fetches = 2
            web_revalidation = "never"

            [defaults]
            cache_policy = "cacheOnly"
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.max_concurrent_fetches, 2);
        assert_eq!(config.fetch.web_revalidation, RevalidationMode::Never);
        assert_eq!(config.fetch.request_timeout_secs, 30);
        assert_eq!(config.defaults.cache_policy, CachePolicy::CacheOnly);
        assert_eq!(config.defaults.resize_mode, ResizeMode::Cover);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let fetch = FetchConfig {
            request_timeout_secs: 0,
            ..FetchConfig::default()
        };
        assert_eq!(fetch.request_timeout(), None);
        assert_eq!(
            FetchConfig::default().request_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_coordinator_config_mirrors_fetch_section() {
        let config = EngineConfig::default();
        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.max_concurrent_fetches, DEFAULT_MAX_CONCURRENT_FETCHES);
        assert_eq!(coordinator.default_deadline, Some(Duration::from_secs(30)));
    }
}
