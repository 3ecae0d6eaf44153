use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dictionary::{normalize, ContextMatch, WorkflowStep};
use crate::kernel::scheduler::humanize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingState {
    Idle,
    Listening,
    CollectingVariations,
    CollectingSteps,
    Confirming,
    Saving,
    AwaitingRecovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    SimpleCommand,
    Workflow,
    ContextRule,
}

/// Everything taught so far in one session. This is the draft format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub session_type: SessionType,
    pub state: TrainingState,
    #[serde(default)]
    pub trigger_phrases: Vec<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub context: Option<ContextMatch>,
    /// Raw utterances heard during the session.
    #[serde(default)]
    pub history: Vec<String>,
}

impl TrainingSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            session_type: SessionType::SimpleCommand,
            state: TrainingState::Listening,
            trigger_phrases: Vec::new(),
            action: None,
            workflow_name: None,
            steps: Vec::new(),
            context: None,
            history: Vec::new(),
        }
    }

    /// True once anything worth saving has been taught.
    pub fn has_content(&self) -> bool {
        match self.session_type {
            SessionType::Workflow => !self.steps.is_empty(),
            SessionType::SimpleCommand | SessionType::ContextRule => {
                !self.trigger_phrases.is_empty() && self.action.is_some()
            }
        }
    }

    pub fn has_phrase(&self, phrase: &str) -> bool {
        let norm = normalize(phrase);
        self.trigger_phrases.iter().any(|p| normalize(p) == norm)
    }

    /// Spoken summary used when asking to save.
    pub fn summary(&self) -> String {
        let phrases = self
            .trigger_phrases
            .iter()
            .map(|p| format!("\"{}\"", p))
            .collect::<Vec<_>>()
            .join(", ");
        match self.session_type {
            SessionType::SimpleCommand => format!(
                "{} will {}.",
                phrases,
                self.action.as_deref().map(humanize).unwrap_or_default()
            ),
            SessionType::ContextRule => {
                let app = self
                    .context
                    .as_ref()
                    .and_then(|c| c.app_id.clone())
                    .unwrap_or_default();
                format!(
                    "In {}, {} will {}.",
                    app,
                    phrases,
                    self.action.as_deref().map(humanize).unwrap_or_default()
                )
            }
            SessionType::Workflow => {
                let steps = self
                    .steps
                    .iter()
                    .map(|s| s.description.as_str())
                    .collect::<Vec<_>>()
                    .join(", then ");
                format!(
                    "Routine {} runs {} step{}: {}.",
                    self.workflow_name.as_deref().unwrap_or("unnamed"),
                    self.steps.len(),
                    if self.steps.len() == 1 { "" } else { "s" },
                    steps
                )
            }
        }
    }
}

impl Default for TrainingSession {
    fn default() -> Self {
        Self::new()
    }
}
