use serde::{Deserialize, Serialize};

use crate::config::PolicyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    ExecuteImmediately,
    ExecuteAndObserve,
    AskConfirmation,
    Reject,
}

impl Decision {
    pub fn executes(self) -> bool {
        matches!(self, Decision::ExecuteImmediately | Decision::ExecuteAndObserve)
    }
}

/// Pure mapping from confidence to what happens next.
#[derive(Debug, Clone)]
pub struct ConfidencePolicy {
    thresholds: PolicyConfig,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl ConfidencePolicy {
    pub fn new(thresholds: PolicyConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &PolicyConfig {
        &self.thresholds
    }

    pub fn decide(&self, confidence: f32) -> Decision {
        let t = &self.thresholds;
        if !confidence.is_finite() {
            return Decision::Reject;
        }
        if confidence >= t.execute_immediately {
            Decision::ExecuteImmediately
        } else if confidence >= t.execute_and_observe {
            Decision::ExecuteAndObserve
        } else if confidence >= t.ask_confirmation {
            Decision::AskConfirmation
        } else {
            Decision::Reject
        }
    }
}
