use std::collections::VecDeque;

use super::event::{ClassificationEventKind, FeedbackKind, ForgetReason, TelemetryEvent, TrainingOutcomeKind};
use crate::dictionary::Tier;
use crate::resolve::Decision;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub utterances: u64,
    pub resolution: ResolutionStats,
    pub feedback: FeedbackStats,
    pub training: TrainingStats,
    pub learning_transitions: u64,
    pub training_transitions: u64,
    pub timers_dropped: u64,
    pub persistence_failures: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionStats {
    /// Indexed by tier number.
    pub tier_hits: [u64; 4],
    pub unresolved: u64,
    pub executed: u64,
    pub confirmations_asked: u64,
    pub rejected: u64,
    pub classifier_requests: u64,
    pub classifier_cache_hits: u64,
    pub classifier_discarded: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackStats {
    pub implicit_positive: u64,
    pub implicit_negative: u64,
    pub confirmed: u64,
    pub rejected: u64,
    pub corrections: u64,
    pub late_corrections: u64,
    pub adopted: u64,
    pub confirmations_expired: u64,
    pub forgotten_by_feedback: u64,
    pub forgotten_by_decay: u64,
    pub decayed: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingStats {
    pub saved: u64,
    pub discarded: u64,
    pub timed_out: u64,
    pub recovered: u64,
    pub phrases_saved: u64,
    pub phrases_rejected: u64,
}

impl ResolutionStats {
    pub fn hits(&self, tier: Tier) -> u64 {
        self.tier_hits[tier.number() as usize]
    }
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();

    for event in events {
        match event {
            TelemetryEvent::UtteranceReceived { .. } => snap.utterances += 1,
            TelemetryEvent::Resolved { tier, decision } => {
                snap.resolution.tier_hits[tier.number() as usize] += 1;
                match decision {
                    Decision::ExecuteImmediately | Decision::ExecuteAndObserve => snap.resolution.executed += 1,
                    Decision::AskConfirmation => snap.resolution.confirmations_asked += 1,
                    Decision::Reject => snap.resolution.rejected += 1,
                }
            }
            TelemetryEvent::Unresolved => snap.resolution.unresolved += 1,
            TelemetryEvent::Classification { kind } => match kind {
                ClassificationEventKind::Requested => snap.resolution.classifier_requests += 1,
                ClassificationEventKind::CacheHit => snap.resolution.classifier_cache_hits += 1,
                ClassificationEventKind::Superseded | ClassificationEventKind::StaleDiscarded => {
                    snap.resolution.classifier_discarded += 1
                }
            },
            TelemetryEvent::Feedback { kind } => {
                let f = &mut snap.feedback;
                match kind {
                    FeedbackKind::ImplicitPositive => f.implicit_positive += 1,
                    FeedbackKind::ImplicitNegative => f.implicit_negative += 1,
                    FeedbackKind::Confirmed => f.confirmed += 1,
                    FeedbackKind::Rejected => f.rejected += 1,
                    FeedbackKind::Correction => f.corrections += 1,
                    FeedbackKind::LateCorrection => f.late_corrections += 1,
                    FeedbackKind::CorrectionAdopted => f.adopted += 1,
                    FeedbackKind::ConfirmationExpired => f.confirmations_expired += 1,
                }
            }
            TelemetryEvent::MappingForgotten { reason } => match reason {
                ForgetReason::ImplicitNegative => snap.feedback.forgotten_by_feedback += 1,
                ForgetReason::TimeDecay => snap.feedback.forgotten_by_decay += 1,
            },
            TelemetryEvent::Maintenance { decayed, .. } => snap.feedback.decayed += *decayed as u64,
            TelemetryEvent::LearningTransition { .. } => snap.learning_transitions += 1,
            TelemetryEvent::TrainingTransition { .. } => snap.training_transitions += 1,
            TelemetryEvent::TrainingOutcome { kind, saved, rejected } => {
                let t = &mut snap.training;
                match kind {
                    TrainingOutcomeKind::Saved => t.saved += 1,
                    TrainingOutcomeKind::Discarded => t.discarded += 1,
                    TrainingOutcomeKind::TimedOut => t.timed_out += 1,
                    TrainingOutcomeKind::Recovered => t.recovered += 1,
                }
                t.phrases_saved += *saved as u64;
                t.phrases_rejected += *rejected as u64;
            }
            TelemetryEvent::TimerDropped { .. } => snap.timers_dropped += 1,
            TelemetryEvent::PersistenceFailed { count } => snap.persistence_failures += count,
        }
    }

    snap
}
