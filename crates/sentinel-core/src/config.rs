//! Typed configuration loading: environment variables per §6's
//! exhaustive surface, plus the ranker/inspector TOML config files.
//!
//! Mirrors AllFrame's `FromEnv` posture in spirit (fail fast with a
//! named [`crate::error::SentinelError::Config`] at startup rather than
//! deferring a missing value to first use).

use std::{collections::HashMap, env, time::Duration};

use serde::Deserialize;

use crate::error::{SentinelError, SentinelResult};

fn env_var(name: &str) -> SentinelResult<String> {
    env::var(name).map_err(|_| SentinelError::Config(format!("missing required env var {name}")))
}

fn env_var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_var_parsed<T: std::str::FromStr>(name: &str, default: T) -> SentinelResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| SentinelError::Config(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(default),
    }
}

/// Connection and reconnect parameters for the broker, read from
/// `NATS_URL`/`NATS_CONNECT_TIMEOUT`/`NATS_RECONNECT_TIME_WAIT`/
/// `NATS_MAX_RECONNECT_ATTEMPTS`.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker connection URL.
    pub url: String,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Wait between reconnect attempts.
    pub reconnect_wait: Duration,
    /// Maximum reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl BrokerConfig {
    /// Loads broker connection settings from the environment.
    pub fn from_env() -> SentinelResult<Self> {
        Ok(Self {
            url: env_var_or("NATS_URL", "nats://localhost:4222"),
            connect_timeout: Duration::from_millis(env_var_parsed(
                "NATS_CONNECT_TIMEOUT",
                5_000,
            )?),
            reconnect_wait: Duration::from_millis(env_var_parsed(
                "NATS_RECONNECT_TIME_WAIT",
                500,
            )?),
            max_reconnect_attempts: env_var_parsed("NATS_MAX_RECONNECT_ATTEMPTS", 10)?,
        })
    }
}

/// Vector store connection settings, read from `QDRANT_HOST`/
/// `QDRANT_PORT`/`QDRANT_COLLECTION_NAME`/`EMBEDDING_MODEL_NAME`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Vector store hostname.
    pub host: String,
    /// Vector store port.
    pub port: u16,
    /// Collection name this workspace owns.
    pub collection_name: String,
    /// Embedding model identifier (out of scope to actually load, §1).
    pub embedding_model_name: String,
}

impl StoreConfig {
    /// Loads vector store settings from the environment.
    pub fn from_env() -> SentinelResult<Self> {
        Ok(Self {
            host: env_var_or("QDRANT_HOST", "localhost"),
            port: env_var_parsed("QDRANT_PORT", 6333)?,
            collection_name: env_var_or("QDRANT_COLLECTION_NAME", "sentinel_events"),
            embedding_model_name: env_var_or("EMBEDDING_MODEL_NAME", "all-MiniLM-L6-v2"),
        })
    }
}

/// Source registry database location, read from `DATABASE_URL`. Per
/// §9's design note, this workspace targets `rusqlite` rather than a
/// server-backed pool: `sqlite://path/to.db` or `sqlite::memory:`.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Raw `DATABASE_URL` value.
    pub database_url: String,
}

impl RegistryConfig {
    /// Loads the registry's database location from the environment.
    pub fn from_env() -> SentinelResult<Self> {
        Ok(Self {
            database_url: env_var_or("DATABASE_URL", "sqlite::memory:"),
        })
    }

    /// The filesystem path `rusqlite` should open, or `None` for an
    /// in-memory database.
    pub fn sqlite_path(&self) -> Option<&str> {
        self.database_url
            .strip_prefix("sqlite://")
            .filter(|_| self.database_url != "sqlite::memory:")
    }
}

/// Which LLM provider the filter/inspector workers are configured to
/// call. The call itself is out of scope (§1); this only validates
/// configuration shape at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    /// OpenAI-compatible provider.
    OpenAi,
    /// Anthropic-compatible provider.
    Anthropic,
}

/// LLM provider settings, read from `LLM_PROVIDER`/`LLM_MODEL_NAME`/
/// `OPENAI_API_KEY`/`ANTHROPIC_API_KEY`.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Selected provider.
    pub provider: LlmProvider,
    /// Model name to request.
    pub model_name: String,
    /// The provider's API key.
    pub api_key: String,
}

impl LlmConfig {
    /// Loads LLM provider settings from the environment. A bad or
    /// missing provider/key is fatal at startup, per §4.6.
    pub fn from_env() -> SentinelResult<Self> {
        let provider = match env_var("LLM_PROVIDER")?.as_str() {
            "openai" => LlmProvider::OpenAi,
            "anthropic" => LlmProvider::Anthropic,
            other => {
                return Err(SentinelError::Config(format!(
                    "LLM_PROVIDER must be 'openai' or 'anthropic', got '{other}'"
                )))
            }
        };
        let model_name = env_var("LLM_MODEL_NAME")?;
        let api_key = match provider {
            LlmProvider::OpenAi => env_var("OPENAI_API_KEY")?,
            LlmProvider::Anthropic => env_var("ANTHROPIC_API_KEY")?,
        };
        Ok(Self {
            provider,
            model_name,
            api_key,
        })
    }
}

/// Which alerters the guardian dispatches to, read from `ALERTERS`
/// (csv of `logging`|`fake_message`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlerterKind {
    /// Log to stderr with context.
    Logging,
    /// Send to a fake chat endpoint.
    FakeMessage,
}

/// Parses the `ALERTERS` env var into an ordered, deduplicated list.
pub fn alerters_from_env() -> SentinelResult<Vec<AlerterKind>> {
    let raw = env_var_or("ALERTERS", "logging");
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|kind| match kind {
            "logging" => Ok(AlerterKind::Logging),
            "fake_message" => Ok(AlerterKind::FakeMessage),
            other => Err(SentinelError::Config(format!(
                "unknown alerter kind '{other}'"
            ))),
        })
        .collect()
}

/// A service's readiness-check timeout, read from `<SERVICE>_READINESS_TIME_OUT`
/// (milliseconds, default 500).
pub fn readiness_timeout(service_env_prefix: &str) -> SentinelResult<Duration> {
    let var = format!("{service_env_prefix}_READINESS_TIME_OUT");
    Ok(Duration::from_millis(env_var_parsed(&var, 500)?))
}

/// The scheduler's default poll cadence when a source doesn't configure
/// its own `poll_interval_seconds`.
pub fn scheduler_default_poll_interval() -> SentinelResult<Duration> {
    Ok(Duration::from_secs(env_var_parsed(
        "SCHEDULER_DEFAULT_POLL_INTERVAL",
        300,
    )?))
}

/// Filesystem path of the ranker's TOML config file, read from
/// `RANKER_CONFIG_PATH`.
pub fn ranker_config_path() -> String {
    env_var_or("RANKER_CONFIG_PATH", "ranker_config.toml")
}

/// Filesystem path of the inspector's TOML config file, read from
/// `INSPECTOR_CONFIG_PATH`.
pub fn inspector_config_path() -> String {
    env_var_or("INSPECTOR_CONFIG_PATH", "inspector_config.toml")
}

/// `ranking_parameters`/`category_importance_scores`/`recency_decay`
/// from the ranker's TOML config file (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct RankerConfig {
    /// `importance_weight`/`recency_weight`.
    pub ranking_parameters: RankingParameters,
    /// Per-category importance weight, keyed by category name. MUST
    /// contain an `Other` fallback.
    pub category_importance_scores: HashMap<String, f64>,
    /// Recency decay parameters.
    pub recency_decay: RecencyDecay,
}

/// `importance_weight`/`recency_weight` of [`RankerConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct RankingParameters {
    /// Weight applied to `importance_score` in the final-score formula.
    pub importance_weight: f64,
    /// Weight applied to `recency_score` in the final-score formula.
    pub recency_weight: f64,
}

/// `recency_decay` section of [`RankerConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct RecencyDecay {
    /// Half-life of the exponential recency decay, in hours.
    pub half_life_hours: f64,
    /// The recency score assigned to an event published "now".
    pub max_score: f64,
}

impl RankerConfig {
    /// Parses a ranker config file. Fails fast if `category_importance_scores`
    /// lacks the required `Other` fallback (§6).
    pub fn from_toml(contents: &str) -> SentinelResult<Self> {
        let config: RankerConfig = toml::from_str(contents)
            .map_err(|e| SentinelError::Config(format!("invalid ranker config: {e}")))?;
        if !config.category_importance_scores.contains_key("Other") {
            return Err(SentinelError::Config(
                "ranker config category_importance_scores must include 'Other'".to_string(),
            ));
        }
        Ok(config)
    }

    /// The configured weight for `category`, falling back to `Other`.
    pub fn weight_for(&self, category: &str) -> f64 {
        self.category_importance_scores
            .get(category)
            .copied()
            .unwrap_or_else(|| self.category_importance_scores["Other"])
    }
}

/// One entry of the inspector's `anomaly_detectors` array (§4.8).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorConfig {
    /// Anomaly iff any keyword occurs in `content` (case-insensitive).
    KeywordMatch {
        /// Parameters of the detector.
        parameters: KeywordMatchParams,
    },
    /// Anomaly iff `content`'s length falls outside `[min, max]`.
    ContentLength {
        /// Parameters of the detector.
        parameters: ContentLengthParams,
    },
    /// Anomaly iff any listed field is absent/empty.
    MissingFields {
        /// Parameters of the detector.
        parameters: MissingFieldsParams,
    },
    /// Anomaly iff the LLM response to `prompt` contains "ANOMALY".
    LlmAnomalyDetector {
        /// Parameters of the detector.
        parameters: LlmAnomalyParams,
    },
}

/// Parameters of the `keyword_match` detector.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordMatchParams {
    /// Keywords to search for.
    pub keywords: Vec<String>,
}

/// Parameters of the `content_length` detector.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentLengthParams {
    /// Inclusive minimum content length.
    pub min_length: usize,
    /// Inclusive maximum content length.
    pub max_length: usize,
}

/// Parameters of the `missing_fields` detector.
#[derive(Debug, Clone, Deserialize)]
pub struct MissingFieldsParams {
    /// Field names that must be present and non-empty.
    pub fields: Vec<String>,
}

/// Parameters of the `llm_anomaly_detector` detector.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmAnomalyParams {
    /// Prompt template interpolating `{article_content}`.
    pub prompt: String,
}

/// The inspector's TOML config file: an ordered sequence of detectors,
/// evaluated short-circuit (§4.8).
#[derive(Debug, Clone, Deserialize)]
pub struct InspectorConfig {
    /// Detectors, evaluated in order; the first to trip wins.
    pub anomaly_detectors: Vec<DetectorConfig>,
}

impl InspectorConfig {
    /// Parses an inspector config file.
    pub fn from_toml(contents: &str) -> SentinelResult<Self> {
        toml::from_str(contents)
            .map_err(|e| SentinelError::Config(format!("invalid inspector config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranker_config_requires_other_fallback() {
        let toml = r#"
            [ranking_parameters]
            importance_weight = 0.6
            recency_weight = 0.4

            [category_importance_scores]
            politics = 1.0

            [recency_decay]
            half_life_hours = 24.0
            max_score = 1.0
        "#;
        let err = RankerConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, SentinelError::Config(_)));
    }

    #[test]
    fn ranker_config_weight_falls_back_to_other() {
        let toml = r#"
            [ranking_parameters]
            importance_weight = 0.6
            recency_weight = 0.4

            [category_importance_scores]
            politics = 1.0
            Other = 0.1

            [recency_decay]
            half_life_hours = 24.0
            max_score = 1.0
        "#;
        let config = RankerConfig::from_toml(toml).unwrap();
        assert_eq!(config.weight_for("politics"), 1.0);
        assert_eq!(config.weight_for("sports"), 0.1);
    }

    #[test]
    fn inspector_config_parses_mixed_detectors() {
        let toml = r#"
            [[anomaly_detectors]]
            type = "keyword_match"
            parameters = { keywords = ["fake", "satire"] }

            [[anomaly_detectors]]
            type = "content_length"
            parameters = { min_length = 10, max_length = 5000 }
        "#;
        let config = InspectorConfig::from_toml(toml).unwrap();
        assert_eq!(config.anomaly_detectors.len(), 2);
    }

    #[test]
    fn alerters_from_csv_list() {
        std::env::set_var("ALERTERS", "logging, fake_message");
        let alerters = alerters_from_env().unwrap();
        assert_eq!(
            alerters,
            vec![AlerterKind::Logging, AlerterKind::FakeMessage]
        );
        std::env::remove_var("ALERTERS");
    }
}
