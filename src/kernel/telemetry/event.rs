use serde::{Deserialize, Serialize};

use crate::dictionary::Tier;
use crate::kernel::learning::LearningState;
use crate::kernel::time::Tick;
use crate::kernel::timer::{TimerKind, TimerOwner};
use crate::kernel::training::TrainingState;
use crate::resolve::Decision;

// Allowed: tiers, states, enums, counts, ticks.
// Forbidden: utterances, phrases, action names, classifier params.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    UtteranceReceived {
        tick: Tick,
    },

    Resolved {
        tier: Tier,
        decision: Decision,
    },

    Unresolved,

    Classification {
        kind: ClassificationEventKind,
    },

    Feedback {
        kind: FeedbackKind,
    },

    MappingForgotten {
        reason: ForgetReason,
    },

    Maintenance {
        decayed: usize,
        forgotten: usize,
    },

    LearningTransition {
        from: LearningState,
        to: LearningState,
    },

    TrainingTransition {
        from: TrainingState,
        to: TrainingState,
    },

    TrainingOutcome {
        kind: TrainingOutcomeKind,
        saved: usize,
        rejected: usize,
    },

    TimerDropped {
        owner: TimerOwner,
        kind: TimerKind,
    },

    PersistenceFailed {
        count: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationEventKind {
    Requested,
    CacheHit,
    /// A newer utterance superseded the request.
    Superseded,
    /// The answer arrived for an epoch that is no longer pending.
    StaleDiscarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackKind {
    ImplicitPositive,
    ImplicitNegative,
    Confirmed,
    Rejected,
    Correction,
    LateCorrection,
    CorrectionAdopted,
    ConfirmationExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForgetReason {
    ImplicitNegative,
    TimeDecay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingOutcomeKind {
    Saved,
    Discarded,
    TimedOut,
    Recovered,
}
