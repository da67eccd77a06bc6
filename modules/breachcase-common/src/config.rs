use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::BreachCaseError;

/// Calibrated thresholds for matching and resolution. Tuned empirically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionPolicy {
    /// Wide-net similarity bar for fuzzy candidates.
    pub candidate_threshold: f64,
    /// High-confidence same-entity bar.
    pub confirmation_threshold: f64,
    /// Minimum classifier confidence for a GENUINE_UPDATE to stand.
    pub acceptance_threshold: f64,
    /// Relative difference under which two impact magnitudes agree.
    pub impact_tolerance: f64,
    /// Max stored incidents rendered into one classifier prompt.
    pub max_context_candidates: usize,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            candidate_threshold: 0.6,
            confirmation_threshold: 0.85,
            acceptance_threshold: 0.7,
            impact_tolerance: 0.10,
            max_context_candidates: 50,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Classifier service
    pub deepseek_api_key: String,
    pub deepseek_base_url: String,
    pub deepseek_model: String,
    pub deepseek_timeout: Duration,
    pub deepseek_max_tokens: u32,
    pub classification_max_tokens: u32,

    // Database
    pub database_url: String,
    pub stub_page_size: usize,

    // Retry
    pub max_retries: u32,
    pub retry_base: Duration,

    // Ingestion
    pub article_lookback_hours: i64,
    pub max_feed_workers: usize,
    pub request_timeout: Duration,

    // Relevance classification
    pub enable_classification: bool,
    pub classification_confidence_threshold: f64,

    // Resolution
    pub policy: ResolutionPolicy,

    // Checkpoint
    pub checkpoint_path: PathBuf,
}

impl Config {
    /// Load `.env` (if present) and then read the process environment.
    pub fn from_env() -> Result<Self, BreachCaseError> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        config.log_keys();
        Ok(config)
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BreachCaseError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };
        let defaults = ResolutionPolicy::default();

        let config = Self {
            deepseek_api_key: env.required("DEEPSEEK_API_KEY")?,
            deepseek_base_url: env.or("DEEPSEEK_BASE_URL", "https://api.deepseek.com/v1"),
            deepseek_model: env.or("DEEPSEEK_MODEL", "deepseek-chat"),
            deepseek_timeout: Duration::from_secs(env.parsed("DEEPSEEK_TIMEOUT", 60u64)?),
            deepseek_max_tokens: env.parsed("DEEPSEEK_MAX_TOKENS", 8192u32)?,
            classification_max_tokens: env.parsed("CLASSIFICATION_MAX_TOKENS", 300u32)?,
            database_url: env.required("DATABASE_URL")?,
            stub_page_size: env.parsed("STUB_PAGE_SIZE", 1000usize)?,
            max_retries: env.parsed("MAX_RETRIES", 3u32)?,
            retry_base: Duration::from_millis(env.parsed("RETRY_BASE_MS", 1000u64)?),
            article_lookback_hours: env.parsed("ARTICLE_LOOKBACK_HOURS", 48i64)?,
            max_feed_workers: env.parsed("MAX_FEED_WORKERS", 10usize)?,
            request_timeout: Duration::from_secs(env.parsed("REQUEST_TIMEOUT", 30u64)?),
            enable_classification: env.flag("ENABLE_CLASSIFICATION", true),
            classification_confidence_threshold: env
                .parsed("CLASSIFICATION_CONFIDENCE_THRESHOLD", 0.6f64)?,
            policy: ResolutionPolicy {
                candidate_threshold: env
                    .parsed("FUZZY_CANDIDATE_THRESHOLD", defaults.candidate_threshold)?,
                confirmation_threshold: env
                    .parsed("FUZZY_MATCH_THRESHOLD", defaults.confirmation_threshold)?,
                acceptance_threshold: env
                    .parsed("UPDATE_ACCEPTANCE_THRESHOLD", defaults.acceptance_threshold)?,
                impact_tolerance: env.parsed("IMPACT_TOLERANCE", defaults.impact_tolerance)?,
                max_context_candidates: env
                    .parsed("MAX_EXISTING_BREACHES_CONTEXT", defaults.max_context_candidates)?,
            },
            checkpoint_path: PathBuf::from(env.or("CHECKPOINT_PATH", "cache/processed_ids.txt")),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), BreachCaseError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(BreachCaseError::Config(format!("{name} must be within [0, 1], got {v}")))
            }
        };
        unit("FUZZY_CANDIDATE_THRESHOLD", self.policy.candidate_threshold)?;
        unit("FUZZY_MATCH_THRESHOLD", self.policy.confirmation_threshold)?;
        unit("UPDATE_ACCEPTANCE_THRESHOLD", self.policy.acceptance_threshold)?;
        unit("IMPACT_TOLERANCE", self.policy.impact_tolerance)?;
        unit(
            "CLASSIFICATION_CONFIDENCE_THRESHOLD",
            self.classification_confidence_threshold,
        )?;
        if self.max_retries == 0 {
            return Err(BreachCaseError::Config("MAX_RETRIES must be at least 1".into()));
        }
        if self.stub_page_size == 0 {
            return Err(BreachCaseError::Config("STUB_PAGE_SIZE must be at least 1".into()));
        }
        Ok(())
    }

    fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
            format!("{}...({} chars)", &val[..n], val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  DEEPSEEK_API_KEY: {}", preview(&self.deepseek_api_key));
        tracing::info!("  DEEPSEEK_BASE_URL: {}", self.deepseek_base_url);
        tracing::info!("  DEEPSEEK_MODEL: {}", self.deepseek_model);
        tracing::info!("  DATABASE_URL: {}", preview(&self.database_url));
        tracing::info!("  CHECKPOINT_PATH: {}", self.checkpoint_path.display());
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, BreachCaseError> {
        self.get(key)
            .ok_or_else(|| BreachCaseError::Config(format!("{key} environment variable is required")))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, BreachCaseError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| BreachCaseError::Config(format!("{key} has an invalid value: {raw}"))),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            None => default,
            Some(raw) => matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_keys_set() {
        let config = Config::from_lookup(lookup(&[
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("DATABASE_URL", "postgres://localhost/breachcase"),
        ]))
        .unwrap();

        assert_eq!(config.deepseek_model, "deepseek-chat");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.policy, ResolutionPolicy::default());
        assert!(config.enable_classification);
        assert_eq!(config.checkpoint_path, PathBuf::from("cache/processed_ids.txt"));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/x")]))
            .unwrap_err();
        assert!(matches!(err, BreachCaseError::Config(msg) if msg.contains("DEEPSEEK_API_KEY")));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = Config::from_lookup(lookup(&[
            ("DEEPSEEK_API_KEY", "  "),
            ("DATABASE_URL", "postgres://localhost/x"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BreachCaseError::Config(_)));
    }

    #[test]
    fn thresholds_are_overridable() {
        let config = Config::from_lookup(lookup(&[
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("DATABASE_URL", "postgres://localhost/x"),
            ("FUZZY_CANDIDATE_THRESHOLD", "0.55"),
            ("UPDATE_ACCEPTANCE_THRESHOLD", "0.8"),
            ("ENABLE_CLASSIFICATION", "false"),
        ]))
        .unwrap();
        assert_eq!(config.policy.candidate_threshold, 0.55);
        assert_eq!(config.policy.acceptance_threshold, 0.8);
        assert!(!config.enable_classification);
    }

    #[test]
    fn unparseable_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("DATABASE_URL", "postgres://localhost/x"),
            ("MAX_RETRIES", "three"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BreachCaseError::Config(msg) if msg.contains("MAX_RETRIES")));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("DATABASE_URL", "postgres://localhost/x"),
            ("IMPACT_TOLERANCE", "1.5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BreachCaseError::Config(_)));
    }
}
