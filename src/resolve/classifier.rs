//! Tier 3 contract: the opaque external intent classifier.
//!
//! Whatever comes back is validated here. A null action, an out-of-range or
//! non-finite confidence, an action outside the known set or a malformed
//! body all collapse into `ClassifierOutcome::NoIntent`. Transport failures,
//! bad statuses and timeouts become `Unavailable`, which is never cached.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use tracing::warn;

use crate::kernel::time::Tick;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier transport error: {0}")]
    Transport(String),
    #[error("classifier returned HTTP {0}")]
    Status(u16),
    #[error("classifier timed out")]
    Timeout,
    #[error("malformed classifier response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    /// Focused-context descriptor, e.g. "app=slack, mode=chat".
    pub focused: String,
    /// Last-N canonical actions, newest first.
    pub recent_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierRequest {
    pub utterance: String,
    pub context_summary: ContextSummary,
    pub known_actions: Vec<String>,
    pub token_budget: u32,
}

/// Raw wire response. Nothing here is trusted until `validate` has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResponse {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierOutcome {
    Intent {
        action: String,
        confidence: f32,
        params: Option<serde_json::Value>,
    },
    NoIntent,
    /// The call itself failed; says nothing about the utterance.
    Unavailable,
}

impl ClassifierOutcome {
    /// Whether the outcome is an answer worth memoizing.
    pub fn is_answer(&self) -> bool {
        !matches!(self, ClassifierOutcome::Unavailable)
    }
}

pub trait IntentClassifier: Send + Sync {
    fn classify(
        &self,
        request: ClassifierRequest,
    ) -> impl Future<Output = Result<ClassifierResponse, ClassifierError>> + Send;
}

/// Collapse a raw result into an outcome. Never fails.
pub fn validate(result: Result<ClassifierResponse, ClassifierError>, known_actions: &[String]) -> ClassifierOutcome {
    let resp = match result {
        Ok(resp) => resp,
        Err(ClassifierError::Malformed(detail)) => {
            warn!("Malformed classifier response, treating as unresolved: {}", detail);
            return ClassifierOutcome::NoIntent;
        }
        Err(e) => {
            warn!("Classifier unavailable: {}", e);
            return ClassifierOutcome::Unavailable;
        }
    };

    let Some(action) = resp.action.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()) else {
        return ClassifierOutcome::NoIntent;
    };
    if !resp.confidence.is_finite() || !(0.0..=1.0).contains(&resp.confidence) {
        warn!("Classifier confidence {} out of range, treating as unresolved", resp.confidence);
        return ClassifierOutcome::NoIntent;
    }
    if !known_actions.is_empty() && !known_actions.iter().any(|k| k == &action) {
        warn!("Classifier proposed unknown action '{}', treating as unresolved", action);
        return ClassifierOutcome::NoIntent;
    }
    if let Some(params) = &resp.params {
        if !params.is_object() {
            warn!("Classifier params are not an object, treating as unresolved");
            return ClassifierOutcome::NoIntent;
        }
    }

    ClassifierOutcome::Intent {
        action,
        confidence: resp.confidence as f32,
        params: resp.params,
    }
}

/// Short-lived memo of identical `(phrase, contextKey)` calls.
#[derive(Debug, Clone)]
pub struct ClassifierCache {
    ttl_frames: u64,
    entries: HashMap<(String, String), (Tick, ClassifierOutcome)>,
}

impl ClassifierCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_frames: Tick::frames_for_millis(ttl_secs * 1_000),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, phrase: &str, context_key: &str, now: Tick) -> Option<&ClassifierOutcome> {
        let (at, outcome) = self.entries.get(&(phrase.to_string(), context_key.to_string()))?;
        if now.frame.saturating_sub(at.frame) > self.ttl_frames {
            return None;
        }
        Some(outcome)
    }

    /// Memoize an answer. Expired entries are dropped on the way in and
    /// `Unavailable` is never stored.
    pub fn insert(&mut self, phrase: &str, context_key: &str, outcome: ClassifierOutcome, now: Tick) {
        if self.ttl_frames == 0 || !outcome.is_answer() {
            return;
        }
        self.purge(now);
        self.entries.insert((phrase.to_string(), context_key.to_string()), (now, outcome));
    }

    /// Drop expired entries.
    pub fn purge(&mut self, now: Tick) {
        let ttl = self.ttl_frames;
        self.entries.retain(|_, (at, _)| now.frame.saturating_sub(at.frame) <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(action: Option<&str>, confidence: f64) -> Result<ClassifierResponse, ClassifierError> {
        Ok(ClassifierResponse {
            action: action.map(str::to_string),
            confidence,
            params: None,
        })
    }

    #[test]
    fn null_action_is_unresolved() {
        assert_eq!(validate(resp(None, 0.9), &[]), ClassifierOutcome::NoIntent);
        assert_eq!(validate(resp(Some("  "), 0.9), &[]), ClassifierOutcome::NoIntent);
    }

    #[test]
    fn out_of_range_confidence_is_unresolved() {
        assert_eq!(validate(resp(Some("enter"), 1.5), &[]), ClassifierOutcome::NoIntent);
        assert_eq!(validate(resp(Some("enter"), -0.1), &[]), ClassifierOutcome::NoIntent);
        assert_eq!(validate(resp(Some("enter"), f64::NAN), &[]), ClassifierOutcome::NoIntent);
    }

    #[test]
    fn call_failures_are_unavailable() {
        assert_eq!(validate(Err(ClassifierError::Timeout), &[]), ClassifierOutcome::Unavailable);
        assert_eq!(validate(Err(ClassifierError::Status(503)), &[]), ClassifierOutcome::Unavailable);
        assert_eq!(
            validate(Err(ClassifierError::Transport("refused".into())), &[]),
            ClassifierOutcome::Unavailable
        );
        assert_eq!(
            validate(Err(ClassifierError::Malformed("eof".into())), &[]),
            ClassifierOutcome::NoIntent
        );
    }

    #[test]
    fn unknown_action_is_unresolved_when_set_given() {
        let known = vec!["enter".to_string()];
        assert_eq!(validate(resp(Some("launch_missiles"), 0.9), &known), ClassifierOutcome::NoIntent);
        assert!(matches!(validate(resp(Some("enter"), 0.9), &known), ClassifierOutcome::Intent { .. }));
    }

    #[test]
    fn wire_format_parses() {
        let raw = r#"{"action":"volume_up","confidence":0.72,"params":{"step":2}}"#;
        let parsed: ClassifierResponse = serde_json::from_str(raw).unwrap();
        match validate(Ok(parsed), &[]) {
            ClassifierOutcome::Intent { action, confidence, params } => {
                assert_eq!(action, "volume_up");
                assert!((confidence - 0.72).abs() < 1e-6);
                assert_eq!(params.unwrap()["step"], 2);
            }
            other => panic!("expected intent, got {other:?}"),
        }
    }

    #[test]
    fn cache_expires_after_ttl() {
        let mut cache = ClassifierCache::new(1);
        let t0 = Tick { frame: 0 };
        cache.insert("open mail", "-|-|-", ClassifierOutcome::NoIntent, t0);
        assert!(cache.get("open mail", "-|-|-", Tick { frame: 20 }).is_some());
        assert!(cache.get("open mail", "-|-|-", Tick { frame: 21 }).is_none());
        assert!(cache.get("open mail", "app=x|-|-", Tick { frame: 1 }).is_none());
        cache.purge(Tick { frame: 100 });
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_skips_unavailable() {
        let mut cache = ClassifierCache::new(300);
        cache.insert("check my mail", "-|-|-", ClassifierOutcome::Unavailable, Tick { frame: 0 });
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_drops_expired_entries() {
        let mut cache = ClassifierCache::new(1);
        cache.insert("open mail", "-|-|-", ClassifierOutcome::NoIntent, Tick { frame: 0 });
        cache.insert("next", "-|-|-", ClassifierOutcome::NoIntent, Tick { frame: 5 });
        assert_eq!(cache.len(), 2);
        cache.insert("louder", "-|-|-", ClassifierOutcome::NoIntent, Tick { frame: 25 });
        assert_eq!(cache.len(), 2);
        assert!(cache.get("open mail", "-|-|-", Tick { frame: 25 }).is_none());
    }
}
