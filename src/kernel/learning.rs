//! Learning Loop: turns what happens after an action into confidence changes.
//!
//! ```text
//! IDLE ──execute──▶ OBSERVING ──timeout──▶ IDLE (+implicit positive)
//!   │                   │ "no" ──▶ AWAITING_CORRECTION ──reply/timeout──▶ IDLE
//!   │                   │ "no, I meant X" / undo ──▶ IDLE (+implicit negative)
//!   └──ask──▶ AWAITING_CONFIRMATION ──yes──▶ IDLE (execute, learn, boost)
//!                       │ no ──▶ AWAITING_CORRECTION
//!                       └ timeout ──▶ IDLE (discard)
//! ```
//!
//! Every timer carries the generation it was armed under; a fire from an
//! older generation is dropped.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::feedback::{Feedback, FeedbackClassifier};
use super::scheduler::{Handled, Scheduler, SideEffect, StateChange};
use super::telemetry::{FeedbackKind, ForgetReason, TelemetryEvent};
use super::timer::{TimerFired, TimerKind, TimerOwner, TimerToken};
use super::KernelCx;
use crate::config::LearningConfig;
use crate::context::{ContextEntry, EntryKind, Polarity};
use crate::dictionary::{normalize, CommandId, CommandSource, DecayReport, PhraseDictionary, Tier};
use crate::resolve::Resolution;

pub const CORRECTION_PROMPT: &str = "What did you mean?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearningState {
    Idle,
    Observing,
    AwaitingConfirmation,
    AwaitingCorrection,
}

/// An utterance and what it resolved to, waiting on the user's reaction.
#[derive(Debug, Clone)]
struct Pending {
    utterance: String,
    resolution: Resolution,
    timer: TimerToken,
}

#[derive(Debug, Clone)]
struct PendingCorrection {
    phrase: String,
    wrong_action: String,
    timer: TimerToken,
}

#[derive(Debug, Clone, Default)]
enum Phase {
    #[default]
    Idle,
    Observing(Pending),
    AwaitingConfirmation(Pending),
    AwaitingCorrection(PendingCorrection),
}

impl Phase {
    fn state(&self) -> LearningState {
        match self {
            Phase::Idle => LearningState::Idle,
            Phase::Observing(_) => LearningState::Observing,
            Phase::AwaitingConfirmation(_) => LearningState::AwaitingConfirmation,
            Phase::AwaitingCorrection(_) => LearningState::AwaitingCorrection,
        }
    }

    fn timer(&self) -> Option<TimerToken> {
        match self {
            Phase::Idle => None,
            Phase::Observing(p) | Phase::AwaitingConfirmation(p) => Some(p.timer),
            Phase::AwaitingCorrection(c) => Some(c.timer),
        }
    }
}

pub struct LearningLoop {
    cfg: LearningConfig,
    known_actions: Vec<String>,
    feedback: FeedbackClassifier,
    phase: Phase,
    generation: u64,
}

impl LearningLoop {
    pub fn new(cfg: LearningConfig, known_actions: Vec<String>) -> Self {
        Self {
            cfg,
            known_actions,
            feedback: FeedbackClassifier::default(),
            phase: Phase::Idle,
            generation: 0,
        }
    }

    pub fn state(&self) -> LearningState {
        self.phase.state()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &LearningConfig {
        &self.cfg
    }

    // ── Entry points from the reactor ──────────────────────────────────────

    /// An action was executed: watch for a reaction. A still-open previous
    /// observation closes as positive first.
    pub fn observe(&mut self, cx: &mut KernelCx, utterance: &str, resolution: Resolution) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        self.settle_observation(cx);
        let timer = self.arm(cx, TimerKind::Observation, self.cfg.observation_ms);
        debug!("Observing {} for {}ms", resolution.action, self.cfg.observation_ms);
        self.set_phase(
            cx,
            Phase::Observing(Pending {
                utterance: utterance.to_string(),
                resolution,
                timer,
            }),
            &mut effects,
        );
        effects
    }

    /// Mid-confidence resolution: ask once, then wait for the reply.
    pub fn request_confirmation(
        &mut self,
        cx: &mut KernelCx,
        utterance: &str,
        resolution: Resolution,
    ) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        self.settle_observation(cx);
        let timer = self.arm(cx, TimerKind::Confirmation, self.cfg.confirmation_ms);
        effects.push(Scheduler.confirmation_prompt(&resolution.action));
        self.set_phase(
            cx,
            Phase::AwaitingConfirmation(Pending {
                utterance: utterance.to_string(),
                resolution,
                timer,
            }),
            &mut effects,
        );
        effects
    }

    /// Offer an utterance. Consumed when it is a reply this loop was waiting
    /// for or a late correction.
    pub fn handle_utterance(&mut self, cx: &mut KernelCx, text: &str) -> Handled {
        match self.phase.clone() {
            Phase::Idle => self.late_correction(cx, text),
            Phase::Observing(obs) => self.during_observation(cx, text, obs),
            Phase::AwaitingConfirmation(pending) => self.confirmation_reply(cx, text, pending),
            Phase::AwaitingCorrection(pending) => self.correction_reply(cx, text, pending),
        }
    }

    pub fn on_timer(&mut self, cx: &mut KernelCx, fired: TimerFired) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        if fired.generation != self.generation || self.phase.timer() != Some(fired.token) {
            debug!("Dropping stale learning timer {:?} (gen {} vs {})", fired.kind, fired.generation, self.generation);
            cx.telemetry.record(TelemetryEvent::TimerDropped {
                owner: fired.owner,
                kind: fired.kind,
            });
            return effects;
        }

        match (self.phase.clone(), fired.kind) {
            (Phase::Observing(obs), TimerKind::Observation) => {
                self.implicit_positive(cx, &obs);
                self.set_phase(cx, Phase::Idle, &mut effects);
            }
            (Phase::AwaitingConfirmation(_), TimerKind::Confirmation) => {
                debug!("Confirmation expired without a reply, discarding");
                cx.telemetry.record(TelemetryEvent::Feedback {
                    kind: FeedbackKind::ConfirmationExpired,
                });
                self.set_phase(cx, Phase::Idle, &mut effects);
            }
            (Phase::AwaitingCorrection(_), TimerKind::Correction) => {
                debug!("No correction given, back to idle");
                self.set_phase(cx, Phase::Idle, &mut effects);
            }
            (_, kind) => {
                cx.telemetry.record(TelemetryEvent::TimerDropped {
                    owner: TimerOwner::Learning,
                    kind,
                });
            }
        }
        effects
    }

    /// Time decay over stale `learned` mappings.
    pub fn run_maintenance(&self, cx: &mut KernelCx, now: DateTime<Utc>) -> DecayReport {
        let report = cx.dict.apply_time_decay(
            now,
            ChronoDuration::days(self.cfg.stale_after_days),
            self.cfg.stale_decay,
            self.cfg.stale_forget_below,
        );
        cx.telemetry.record(TelemetryEvent::Maintenance {
            decayed: report.decayed.len(),
            forgotten: report.forgotten.len(),
        });
        for _ in &report.forgotten {
            cx.telemetry.record(TelemetryEvent::MappingForgotten {
                reason: ForgetReason::TimeDecay,
            });
        }
        if !report.decayed.is_empty() || !report.forgotten.is_empty() {
            info!(
                "Maintenance: {} decayed, {} forgotten",
                report.decayed.len(),
                report.forgotten.len()
            );
        }
        report
    }

    // ── Per-state handling ─────────────────────────────────────────────────

    fn during_observation(&mut self, cx: &mut KernelCx, text: &str, obs: Pending) -> Handled {
        let mut effects = Vec::new();

        if self.feedback.is_undo(text) {
            info!("Undo right after {}, treating as negative", obs.resolution.action);
            self.implicit_negative(cx, &obs);
            self.set_phase(cx, Phase::Idle, &mut effects);
            return Handled::pass(effects);
        }

        match self.feedback.classify(text) {
            Feedback::NegativeWithContent(target) => {
                self.implicit_negative(cx, &obs);
                effects.extend(self.apply_correction(cx, &obs.utterance, &obs.resolution.action, &target));
                self.set_phase(cx, Phase::Idle, &mut effects);
                Handled::consumed(effects)
            }
            Feedback::Negative => {
                self.implicit_negative(cx, &obs);
                self.await_correction(cx, &obs.utterance, &obs.resolution.action, &mut effects);
                Handled::consumed(effects)
            }
            Feedback::Affirmative | Feedback::Neither => Handled::pass(effects),
        }
    }

    fn confirmation_reply(&mut self, cx: &mut KernelCx, text: &str, pending: Pending) -> Handled {
        let mut effects = Vec::new();
        match self.feedback.classify(text) {
            Feedback::Affirmative => {
                effects.extend(Scheduler.execute(&pending.resolution, None));
                cx.record_action(&pending.resolution);
                self.confirm(cx, &pending);
                self.set_phase(cx, Phase::Idle, &mut effects);
            }
            Feedback::Negative => {
                self.reject(cx, &pending);
                self.await_correction(cx, &pending.utterance, &pending.resolution.action, &mut effects);
            }
            Feedback::NegativeWithContent(target) => {
                self.reject(cx, &pending);
                effects.extend(self.apply_correction(cx, &pending.utterance, &pending.resolution.action, &target));
                self.set_phase(cx, Phase::Idle, &mut effects);
            }
            Feedback::Neither => {
                self.reject(cx, &pending);
                let target = normalize(text);
                effects.extend(self.apply_correction(cx, &pending.utterance, &pending.resolution.action, &target));
                self.set_phase(cx, Phase::Idle, &mut effects);
            }
        }
        Handled::consumed(effects)
    }

    fn correction_reply(&mut self, cx: &mut KernelCx, text: &str, pending: PendingCorrection) -> Handled {
        let mut effects = Vec::new();
        let target = match self.feedback.classify(text) {
            Feedback::NegativeWithContent(content) => content,
            _ => normalize(text),
        };
        if !target.is_empty() {
            effects.extend(self.apply_correction(cx, &pending.phrase, &pending.wrong_action, &target));
        }
        self.set_phase(cx, Phase::Idle, &mut effects);
        Handled::consumed(effects)
    }

    /// "No, I meant X" shortly after an action, once observation has closed.
    fn late_correction(&mut self, cx: &mut KernelCx, text: &str) -> Handled {
        let Some(target) = self.feedback.late_correction(text) else {
            return Handled::default();
        };
        let Some(ContextEntry::Action { at, action, .. }) = cx.window.latest(EntryKind::Action).cloned() else {
            return Handled::default();
        };
        if cx.now.since(at) > Duration::from_secs(self.cfg.late_correction_secs) {
            return Handled::default();
        }
        let Some(ContextEntry::Speech { text: phrase, .. }) = cx.window.speech_before_latest_action().cloned() else {
            return Handled::default();
        };

        info!("Late correction of {}", action);
        cx.telemetry.record(TelemetryEvent::Feedback {
            kind: FeedbackKind::LateCorrection,
        });
        let owner = cx
            .dict
            .owner_of(&phrase)
            .filter(|c| c.action == action)
            .map(|c| c.id.clone());
        self.penalize(cx, owner.as_ref(), &phrase);
        Handled::consumed(self.apply_correction(cx, &phrase, &action, &target))
    }

    // ── Feedback application ───────────────────────────────────────────────

    fn implicit_positive(&mut self, cx: &mut KernelCx, obs: &Pending) {
        cx.telemetry.record(TelemetryEvent::Feedback {
            kind: FeedbackKind::ImplicitPositive,
        });
        cx.window.push(ContextEntry::Feedback {
            at: cx.now,
            command_id: obs.resolution.command_id.clone(),
            polarity: Polarity::Positive,
        });

        match &obs.resolution.command_id {
            Some(id) => {
                cx.dict.adjust_confidence(id, self.cfg.implicit_positive, 0.0);
                cx.dict.record_usage(id);
            }
            None if obs.resolution.tier == Tier::Classifier => {
                if cx.dict.learn(&obs.utterance, &obs.resolution.action, CommandSource::Learned) {
                    info!("Learned '{}' -> {} from an uncorrected action", obs.resolution.phrase, obs.resolution.action);
                }
            }
            None => {}
        }
    }

    fn implicit_negative(&mut self, cx: &mut KernelCx, obs: &Pending) {
        let phrase = obs.resolution.matched.as_deref().unwrap_or(&obs.resolution.phrase).to_string();
        self.penalize(cx, obs.resolution.command_id.as_ref(), &phrase);
    }

    /// Implicit negative on a mapping. A `learned` mapping that drops under
    /// the forget threshold loses `phrase`.
    fn penalize(&mut self, cx: &mut KernelCx, command_id: Option<&CommandId>, phrase: &str) {
        cx.telemetry.record(TelemetryEvent::Feedback {
            kind: FeedbackKind::ImplicitNegative,
        });
        cx.window.push(ContextEntry::Feedback {
            at: cx.now,
            command_id: command_id.cloned(),
            polarity: Polarity::Negative,
        });

        let Some(id) = command_id else {
            return;
        };
        let Some(updated) = cx.dict.adjust_confidence(id, -self.cfg.implicit_negative, self.cfg.negative_floor) else {
            return;
        };
        let learned = cx.dict.command(id).is_some_and(|c| c.source == CommandSource::Learned);
        if learned && updated < self.cfg.learned_forget_below && cx.dict.forget(phrase) {
            info!("Forgot learned phrase '{}' after repeated negatives", normalize(phrase));
            cx.telemetry.record(TelemetryEvent::MappingForgotten {
                reason: ForgetReason::ImplicitNegative,
            });
        }
    }

    fn confirm(&mut self, cx: &mut KernelCx, pending: &Pending) {
        let action = &pending.resolution.action;
        cx.telemetry.record(TelemetryEvent::Feedback {
            kind: FeedbackKind::Confirmed,
        });
        cx.window.push(ContextEntry::Confirmation {
            at: cx.now,
            action: action.clone(),
            accepted: true,
        });

        cx.dict.learn(&pending.utterance, action, CommandSource::Confirmed);
        let owner = owner_with_action(cx.dict, &pending.utterance, action).or_else(|| pending.resolution.command_id.clone());
        if let Some(id) = owner {
            cx.dict.adjust_confidence(&id, self.cfg.confirm_boost, 0.0);
        }
    }

    fn reject(&mut self, cx: &mut KernelCx, pending: &Pending) {
        let action = &pending.resolution.action;
        cx.telemetry.record(TelemetryEvent::Feedback {
            kind: FeedbackKind::Rejected,
        });
        cx.window.push(ContextEntry::Confirmation {
            at: cx.now,
            action: action.clone(),
            accepted: false,
        });

        let owner = pending
            .resolution
            .command_id
            .clone()
            .or_else(|| owner_with_action(cx.dict, &pending.utterance, action));
        if let Some(id) = owner {
            cx.dict.adjust_confidence(&id, -self.cfg.reject_penalty, 0.0);
        }
    }

    /// Publish the correction; when the target names an action, run it and
    /// adopt the phrase for it if nothing owns the phrase.
    fn apply_correction(&mut self, cx: &mut KernelCx, phrase: &str, wrong_action: &str, target: &str) -> Vec<SideEffect> {
        cx.telemetry.record(TelemetryEvent::Feedback {
            kind: FeedbackKind::Correction,
        });
        cx.window.push(ContextEntry::Correction {
            at: cx.now,
            wrong_action: wrong_action.to_string(),
            target: target.to_string(),
        });

        let mut effects = vec![SideEffect::CorrectionReceived {
            phrase: normalize(phrase),
            wrong_action: wrong_action.to_string(),
            target: target.to_string(),
        }];

        let Some(action) = cx.dict.action_for(target, &self.known_actions) else {
            debug!("Correction target does not name a known action");
            return effects;
        };
        if action == wrong_action {
            return effects;
        }

        if !cx.dict.is_phrase_taken(phrase) && cx.dict.learn(phrase, &action, CommandSource::Corrected) {
            info!("Adopted correction '{}' -> {}", normalize(phrase), action);
            cx.telemetry.record(TelemetryEvent::Feedback {
                kind: FeedbackKind::CorrectionAdopted,
            });
        }

        let corrected = Resolution {
            action: action.clone(),
            confidence: 1.0,
            tier: Tier::Exact,
            source: Some(CommandSource::Corrected),
            command_id: owner_with_action(cx.dict, phrase, &action),
            workflow_id: None,
            params: None,
            phrase: normalize(phrase),
            matched: None,
        };
        effects.extend(Scheduler.execute(&corrected, None));
        cx.record_action(&corrected);
        effects
    }

    // ── Transitions ────────────────────────────────────────────────────────

    fn settle_observation(&mut self, cx: &mut KernelCx) {
        if let Phase::Observing(prev) = self.phase.clone() {
            cx.timers.cancel(prev.timer);
            self.implicit_positive(cx, &prev);
        }
    }

    fn await_correction(&mut self, cx: &mut KernelCx, phrase: &str, wrong_action: &str, effects: &mut Vec<SideEffect>) {
        let timer = self.arm(cx, TimerKind::Correction, self.cfg.correction_ms);
        effects.push(SideEffect::Speak(CORRECTION_PROMPT.to_string()));
        self.set_phase(
            cx,
            Phase::AwaitingCorrection(PendingCorrection {
                phrase: phrase.to_string(),
                wrong_action: wrong_action.to_string(),
                timer,
            }),
            effects,
        );
    }

    /// Start a new generation and schedule its timer.
    fn arm(&mut self, cx: &mut KernelCx, kind: TimerKind, ms: u64) -> TimerToken {
        self.generation += 1;
        cx.timers
            .schedule(TimerOwner::Learning, kind, self.generation, cx.now.plus_millis(ms))
    }

    fn set_phase(&mut self, cx: &mut KernelCx, phase: Phase, effects: &mut Vec<SideEffect>) {
        if let Some(old) = self.phase.timer() {
            if phase.timer() != Some(old) {
                cx.timers.cancel(old);
            }
        }
        if matches!(phase, Phase::Idle) {
            self.generation += 1;
        }

        let from = self.phase.state();
        self.phase = phase;
        let to = self.phase.state();
        if from != to {
            debug!("Learning {:?} -> {:?}", from, to);
            cx.telemetry.record(TelemetryEvent::LearningTransition { from, to });
            effects.push(SideEffect::StateChanged(StateChange::Learning { from, to }));
        }
    }
}

fn owner_with_action(dict: &PhraseDictionary, phrase: &str, action: &str) -> Option<CommandId> {
    dict.owner_of(phrase).filter(|c| c.action == action).map(|c| c.id.clone())
}
