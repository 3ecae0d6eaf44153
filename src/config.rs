//! Config: one typed struct with nested sections, validated once at startup.
//!
//! Every field has a serde default, so a partial (or missing) file yields a
//! working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Confidence Policy thresholds. Ordering: `ask_confirmation <= execute_and_observe <= execute_immediately`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_execute_immediately")]
    pub execute_immediately: f32,
    #[serde(default = "default_execute_and_observe")]
    pub execute_and_observe: f32,
    #[serde(default = "default_ask_confirmation")]
    pub ask_confirmation: f32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            execute_immediately: default_execute_immediately(),
            execute_and_observe: default_execute_and_observe(),
            ask_confirmation: default_ask_confirmation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryConfig {
    /// Maximum normalized edit distance accepted by tier 2 (0 = identical).
    #[serde(default = "default_fuzzy_max_score")]
    pub fuzzy_max_score: f32,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            fuzzy_max_score: default_fuzzy_max_score(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default = "default_observation_ms")]
    pub observation_ms: u64,
    #[serde(default = "default_confirmation_ms")]
    pub confirmation_ms: u64,
    #[serde(default = "default_correction_ms")]
    pub correction_ms: u64,
    #[serde(default = "default_implicit_positive")]
    pub implicit_positive: f32,
    #[serde(default = "default_implicit_negative")]
    pub implicit_negative: f32,
    /// Implicit negatives never push confidence below this.
    #[serde(default = "default_negative_floor")]
    pub negative_floor: f32,
    /// `learned` mappings below this after an implicit negative are forgotten.
    #[serde(default = "default_learned_forget_below")]
    pub learned_forget_below: f32,
    #[serde(default = "default_confirm_boost")]
    pub confirm_boost: f32,
    #[serde(default = "default_reject_penalty")]
    pub reject_penalty: f32,
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
    #[serde(default = "default_stale_decay")]
    pub stale_decay: f32,
    #[serde(default = "default_stale_forget_below")]
    pub stale_forget_below: f32,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_late_correction_secs")]
    pub late_correction_secs: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            observation_ms: default_observation_ms(),
            confirmation_ms: default_confirmation_ms(),
            correction_ms: default_correction_ms(),
            implicit_positive: default_implicit_positive(),
            implicit_negative: default_implicit_negative(),
            negative_floor: default_negative_floor(),
            learned_forget_below: default_learned_forget_below(),
            confirm_boost: default_confirm_boost(),
            reject_penalty: default_reject_penalty(),
            stale_after_days: default_stale_after_days(),
            stale_decay: default_stale_decay(),
            stale_forget_below: default_stale_forget_below(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            late_correction_secs: default_late_correction_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_listen_timeout_ms")]
    pub listen_timeout_ms: u64,
    #[serde(default = "default_collect_timeout_ms")]
    pub collect_timeout_ms: u64,
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    /// How long before a timeout the warning prompt is spoken.
    #[serde(default = "default_warning_lead_ms")]
    pub warning_lead_ms: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            listen_timeout_ms: default_listen_timeout_ms(),
            collect_timeout_ms: default_collect_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            warning_lead_ms: default_warning_lead_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_classifier_url")]
    pub url: String,
    #[serde(default = "default_classifier_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_token_budget")]
    pub token_budget: u32,
    /// How many recent canonical actions go into the context summary.
    #[serde(default = "default_recent_actions")]
    pub recent_actions: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_classifier_url(),
            timeout_ms: default_classifier_timeout_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            token_budget: default_token_budget(),
            recent_actions: default_recent_actions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_dictionary_path")]
    pub dictionary_path: PathBuf,
    #[serde(default = "default_draft_path")]
    pub draft_path: PathBuf,
    /// Caller-supplied action set. Empty accepts any action name.
    #[serde(default)]
    pub known_actions: Vec<String>,
    #[serde(default = "default_context_window_capacity")]
    pub context_window_capacity: usize,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub dictionary: DictionaryConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dictionary_path: default_dictionary_path(),
            draft_path: default_draft_path(),
            known_actions: Vec::new(),
            context_window_capacity: default_context_window_capacity(),
            policy: PolicyConfig::default(),
            dictionary: DictionaryConfig::default(),
            learning: LearningConfig::default(),
            training: TrainingConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Config {
    /// Load from a JSON file. A missing file yields defaults; anything else
    /// that goes wrong is an error. The result is validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            let cfg = Self::default();
            cfg.validate()?;
            return Ok(cfg);
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.policy;
        for (name, v) in [
            ("policy.execute_immediately", p.execute_immediately),
            ("policy.execute_and_observe", p.execute_and_observe),
            ("policy.ask_confirmation", p.ask_confirmation),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {v}")));
            }
        }
        if !(p.ask_confirmation <= p.execute_and_observe && p.execute_and_observe <= p.execute_immediately) {
            return Err(ConfigError::Invalid(
                "policy thresholds must satisfy ask_confirmation <= execute_and_observe <= execute_immediately".into(),
            ));
        }

        let fuzzy = self.dictionary.fuzzy_max_score;
        if !(fuzzy > 0.0 && fuzzy <= 1.0) {
            return Err(ConfigError::Invalid(format!("dictionary.fuzzy_max_score must be within (0, 1], got {fuzzy}")));
        }

        if self.context_window_capacity == 0 {
            return Err(ConfigError::Invalid("context_window_capacity must be at least 1".into()));
        }

        let l = &self.learning;
        for (name, v) in [
            ("learning.implicit_positive", l.implicit_positive),
            ("learning.implicit_negative", l.implicit_negative),
            ("learning.negative_floor", l.negative_floor),
            ("learning.learned_forget_below", l.learned_forget_below),
            ("learning.confirm_boost", l.confirm_boost),
            ("learning.reject_penalty", l.reject_penalty),
            ("learning.stale_decay", l.stale_decay),
            ("learning.stale_forget_below", l.stale_forget_below),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {v}")));
            }
        }
        if l.observation_ms == 0 || l.confirmation_ms == 0 || l.correction_ms == 0 {
            return Err(ConfigError::Invalid("learning timers must be non-zero".into()));
        }
        if l.stale_after_days < 0 {
            return Err(ConfigError::Invalid("learning.stale_after_days must not be negative".into()));
        }

        let t = &self.training;
        if t.listen_timeout_ms == 0 || t.collect_timeout_ms == 0 || t.confirm_timeout_ms == 0 {
            return Err(ConfigError::Invalid("training timeouts must be non-zero".into()));
        }

        if self.classifier.enabled && self.classifier.url.trim().is_empty() {
            return Err(ConfigError::Invalid("classifier.url is required when the classifier is enabled".into()));
        }

        Ok(())
    }

    /// True when `action` belongs to the configured action set (or no set is configured).
    pub fn accepts_action(&self, action: &str) -> bool {
        self.known_actions.is_empty() || self.known_actions.iter().any(|a| a == action)
    }
}

fn default_dictionary_path() -> PathBuf {
    PathBuf::from("phrasebook.json")
}
fn default_draft_path() -> PathBuf {
    PathBuf::from("phrasebook.training-draft.json")
}
fn default_context_window_capacity() -> usize {
    15
}
fn default_execute_immediately() -> f32 {
    0.9
}
fn default_execute_and_observe() -> f32 {
    0.7
}
fn default_ask_confirmation() -> f32 {
    0.5
}
fn default_fuzzy_max_score() -> f32 {
    0.3
}
fn default_observation_ms() -> u64 {
    5_000
}
fn default_confirmation_ms() -> u64 {
    10_000
}
fn default_correction_ms() -> u64 {
    10_000
}
fn default_implicit_positive() -> f32 {
    0.02
}
fn default_implicit_negative() -> f32 {
    0.1
}
fn default_negative_floor() -> f32 {
    0.3
}
fn default_learned_forget_below() -> f32 {
    0.5
}
fn default_confirm_boost() -> f32 {
    0.1
}
fn default_reject_penalty() -> f32 {
    0.15
}
fn default_stale_after_days() -> i64 {
    30
}
fn default_stale_decay() -> f32 {
    0.05
}
fn default_stale_forget_below() -> f32 {
    0.3
}
fn default_maintenance_interval_secs() -> u64 {
    86_400
}
fn default_late_correction_secs() -> u64 {
    30
}
fn default_listen_timeout_ms() -> u64 {
    25_000
}
fn default_collect_timeout_ms() -> u64 {
    15_000
}
fn default_confirm_timeout_ms() -> u64 {
    20_000
}
fn default_warning_lead_ms() -> u64 {
    10_000
}
fn default_classifier_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_classifier_timeout_ms() -> u64 {
    2_000
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_token_budget() -> u32 {
    256
}
fn default_recent_actions() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.policy.execute_immediately, 0.9);
        assert_eq!(cfg.learning.observation_ms, 5_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config = serde_json::from_str(r#"{ "policy": { "ask_confirmation": 0.4 } }"#).unwrap();
        assert_eq!(cfg.policy.ask_confirmation, 0.4);
        assert_eq!(cfg.policy.execute_and_observe, 0.7);
        assert_eq!(cfg.training.listen_timeout_ms, 25_000);
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let mut cfg = Config::default();
        cfg.policy.ask_confirmation = 0.8;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_action_set_accepts_anything() {
        let mut cfg = Config::default();
        assert!(cfg.accepts_action("volume_up"));
        cfg.known_actions = vec!["enter".into()];
        assert!(cfg.accepts_action("enter"));
        assert!(!cfg.accepts_action("volume_up"));
    }
}
