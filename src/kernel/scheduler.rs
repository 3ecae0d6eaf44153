use serde::Serialize;

use super::event::ClassifyEpoch;
use crate::dictionary::{StepCondition, Workflow};
use crate::kernel::learning::LearningState;
use crate::kernel::training::TrainingState;
use crate::resolve::{ClassifierRequest, Resolution};

/// A controller state change, published for UI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateChange {
    Learning { from: LearningState, to: LearningState },
    Training { from: TrainingState, to: TrainingState },
}

/// Everything the kernel wants the outside world to do.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    Speak(String),
    Execute {
        action: String,
        params: Option<serde_json::Value>,
    },
    StateChanged(StateChange),
    /// Run the external classifier and answer with `Event::ClassificationProposed`.
    Classify {
        epoch: ClassifyEpoch,
        request: ClassifierRequest,
    },
    CorrectionReceived {
        phrase: String,
        wrong_action: String,
        target: String,
    },
    Unresolved {
        utterance: String,
    },
}

/// Result of offering an utterance to a controller.
#[derive(Debug, Default)]
pub struct Handled {
    /// True when the controller owns the utterance and nothing further
    /// should resolve it.
    pub consumed: bool,
    pub effects: Vec<SideEffect>,
}

impl Handled {
    pub fn consumed(effects: Vec<SideEffect>) -> Self {
        Self { consumed: true, effects }
    }

    pub fn pass(effects: Vec<SideEffect>) -> Self {
        Self {
            consumed: false,
            effects,
        }
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Project a resolution into execution effects. Workflows expand to one
    /// `Execute` per step; actions always report success, so steps gated on
    /// a failure are skipped.
    pub fn execute(&self, resolution: &Resolution, workflow: Option<&Workflow>) -> Vec<SideEffect> {
        let Some(workflow) = workflow else {
            return vec![SideEffect::Execute {
                action: resolution.action.clone(),
                params: resolution.params.clone(),
            }];
        };

        workflow
            .steps
            .iter()
            .filter(|step| step.condition != Some(StepCondition::IfPreviousFailed))
            .map(|step| SideEffect::Execute {
                action: step.action.clone(),
                params: None,
            })
            .collect()
    }

    /// The single confirmation prompt for a mid-confidence resolution.
    pub fn confirmation_prompt(&self, action: &str) -> SideEffect {
        SideEffect::Speak(format!("Did you mean {}?", humanize(action)))
    }
}

/// `delete_selection` → `delete selection`.
pub fn humanize(action: &str) -> String {
    action.replace(['_', '-'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::{Tier, WorkflowStep};

    fn resolution(action: &str) -> Resolution {
        Resolution {
            action: action.into(),
            confidence: 1.0,
            tier: Tier::Exact,
            source: None,
            command_id: None,
            workflow_id: None,
            params: None,
            phrase: "x".into(),
            matched: None,
        }
    }

    #[test]
    fn single_action_executes_once() {
        let effects = Scheduler.execute(&resolution("enter"), None);
        assert_eq!(
            effects,
            vec![SideEffect::Execute {
                action: "enter".into(),
                params: None
            }]
        );
    }

    #[test]
    fn workflow_skips_failure_branches() {
        let step = |action: &str, condition| WorkflowStep {
            action: action.into(),
            description: action.into(),
            condition,
        };
        let wf = Workflow {
            id: "wf".into(),
            name: "morning".into(),
            phrases: vec!["good morning".into()],
            steps: vec![
                step("open_mail", None),
                step("notify_user", Some(StepCondition::IfPreviousFailed)),
                step("open_calendar", Some(StepCondition::IfPreviousSucceeded)),
            ],
            created_at: chrono::Utc::now(),
        };
        let actions: Vec<String> = Scheduler
            .execute(&resolution("morning"), Some(&wf))
            .into_iter()
            .filter_map(|e| match e {
                SideEffect::Execute { action, .. } => Some(action),
                _ => None,
            })
            .collect();
        assert_eq!(actions, vec!["open_mail", "open_calendar"]);
    }

    #[test]
    fn prompt_reads_naturally() {
        assert_eq!(
            Scheduler.confirmation_prompt("volume_up"),
            SideEffect::Speak("Did you mean volume up?".into())
        );
    }
}
