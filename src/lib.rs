//! Review Coordinator
//!
//! Client-side coordination for a project-authoring workflow:
//! - Long-running generation jobs over a persistent WebSocket channel,
//!   with a hard timeout, an early warning and bounded automatic retries
//! - An optimistic overlay of pending deletion requests on project trees,
//!   with rollback and background resync against a review API

pub mod channel;
pub mod error;
pub mod events;
pub mod job;
pub mod overlay;
pub mod requests;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{CoordinatorError, Result as CoordinatorResult};

use anyhow::{Context, Result};
use job::JobConfig;
use requests::ReviewConfig;
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub job: JobConfig,
    pub review: ReviewConfig,
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub job: JobConfig,
    pub review: ReviewConfig,
}

impl Config {
    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "review-coordinator.yaml" in CWD.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);
        let (job, review) = (yaml.job, yaml.review);

        let job = JobConfig {
            endpoint_url: std::env::var("JOB_ENDPOINT_URL").unwrap_or(job.endpoint_url),
            timeout_threshold_secs: env_parsed("JOB_TIMEOUT_SECS")
                .unwrap_or(job.timeout_threshold_secs),
            warning_threshold_secs: env_parsed("JOB_WARNING_SECS")
                .unwrap_or(job.warning_threshold_secs),
            max_auto_retries: env_parsed("JOB_MAX_AUTO_RETRIES").unwrap_or(job.max_auto_retries),
            retry_delay_secs: env_parsed("JOB_RETRY_DELAY_SECS").unwrap_or(job.retry_delay_secs),
            ..job
        };
        let review = ReviewConfig {
            api_url: std::env::var("REVIEW_API_URL").unwrap_or(review.api_url),
            actor_email: std::env::var("REVIEW_ACTOR_EMAIL").unwrap_or(review.actor_email),
            ..review
        };

        job.validate().context("invalid job configuration")?;
        Ok(Self { job, review })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("review-coordinator.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Unparsable values are ignored like unset ones.
fn env_parsed<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod config_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_yaml_config_loading() {
        let yaml = r#"
job:
  endpoint_url: wss://jobs.example.invalid/prod/
  timeout_threshold_secs: 90
  warning_threshold_secs: 80
  max_auto_retries: 3

review:
  api_url: https://api.example.invalid/prod/invoke
  actor_email: reviewer@example.invalid
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.job.endpoint_url, "wss://jobs.example.invalid/prod/");
        assert_eq!(config.job.timeout_threshold_secs, 90);
        assert_eq!(config.job.warning_threshold_secs, 80);
        assert_eq!(config.job.max_auto_retries, 3);
        // Unset fields keep their defaults
        assert_eq!(config.job.retry_delay_secs, 2);
        assert_eq!(config.job.action, "createproject");
        assert_eq!(config.review.actor_email, "reviewer@example.invalid");
        assert_eq!(config.review.request_timeout_secs, 30);
    }

    #[test]
    fn test_yaml_defaults() {
        let config = YamlConfig::default();
        assert_eq!(config.job.timeout_threshold_secs, 65);
        assert_eq!(config.job.warning_threshold_secs, 55);
        assert_eq!(config.job.max_auto_retries, 2);
        assert_eq!(config.job.retry_delay_secs, 2);
        assert_eq!(config.job.result_field, "project");
        assert_eq!(config.review.api_url, "http://localhost:8080/invoke");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let yaml = r#"
review:
  api_url: http://review:9000/invoke
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.job, JobConfig::default());
        assert_eq!(config.review.api_url, "http://review:9000/invoke");
    }

    /// Combined test for YAML file loading, env var overrides and validation.
    /// Runs as a single test to avoid parallel env var race conditions.
    #[test]
    fn test_yaml_and_env_lifecycle() {
        fn clear_env() {
            for var in &[
                "JOB_ENDPOINT_URL",
                "JOB_TIMEOUT_SECS",
                "JOB_WARNING_SECS",
                "JOB_MAX_AUTO_RETRIES",
                "JOB_RETRY_DELAY_SECS",
                "REVIEW_API_URL",
                "REVIEW_ACTOR_EMAIL",
            ] {
                std::env::remove_var(var);
            }
        }

        // --- Phase 1: YAML values loaded correctly ---
        let yaml = r#"
job:
  endpoint_url: wss://yaml-host/
  max_auto_retries: 1
review:
  actor_email: yaml@example.invalid
"#;
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("review-coordinator.yaml");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        clear_env();

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.job.endpoint_url, "wss://yaml-host/");
        assert_eq!(config.job.max_auto_retries, 1);
        assert_eq!(config.review.actor_email, "yaml@example.invalid");

        // --- Phase 2: Env vars override YAML ---
        std::env::set_var("JOB_ENDPOINT_URL", "wss://env-host/");
        std::env::set_var("JOB_TIMEOUT_SECS", "120");
        std::env::set_var("JOB_RETRY_DELAY_SECS", "not-a-number");

        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.job.endpoint_url, "wss://env-host/");
        assert_eq!(config.job.timeout_threshold_secs, 120);
        // Unparsable override is ignored
        assert_eq!(config.job.retry_delay_secs, 2);
        // YAML value still used where no env override
        assert_eq!(config.job.max_auto_retries, 1);

        // --- Phase 3: Invalid or out-of-range thresholds are rejected ---
        std::env::set_var("JOB_WARNING_SECS", "120");
        assert!(Config::from_yaml_and_env(Some(&file_path)).is_err());

        std::env::set_var("JOB_WARNING_SECS", "55");
        std::env::set_var("JOB_TIMEOUT_SECS", "18446744073709551615");
        assert!(Config::from_yaml_and_env(Some(&file_path)).is_err());

        clear_env();

        // --- Phase 4: No YAML file → defaults ---
        let nonexistent = Path::new("/tmp/nonexistent-review-coordinator-12345.yaml");
        let config = Config::from_yaml_and_env(Some(nonexistent)).unwrap();
        assert_eq!(config.job, JobConfig::default());
        assert_eq!(config.review, ReviewConfig::default());

        // --- Phase 5: Malformed YAML → defaults ---
        std::fs::write(&file_path, "job: [not, a, map").unwrap();
        let config = Config::from_yaml_and_env(Some(&file_path)).unwrap();
        assert_eq!(config.job, JobConfig::default());
    }
}
