use thiserror::Error;
use tracing::{debug, info, warn};

use super::draft::DraftStore;
use super::parser::{self, Teaching};
use super::session::{SessionType, TrainingSession, TrainingState};
use crate::config::TrainingConfig;
use crate::dictionary::{action_candidates, normalize, CommandSource, ContextRule, PhraseDictionary, WorkflowStep};
use crate::kernel::feedback::{Feedback, FeedbackClassifier};
use crate::kernel::scheduler::{humanize, Handled, SideEffect, StateChange};
use crate::kernel::telemetry::{TelemetryEvent, TrainingOutcomeKind};
use crate::kernel::timer::{TimerFired, TimerKind, TimerOwner, TimerToken};
use crate::kernel::KernelCx;

/// Priority given to context rules taught by voice.
pub const TRAINED_RULE_PRIORITY: i32 = 10;

const LISTEN_PROMPT: &str =
    "Training mode. Tell me the phrase in quotes and what it should do, like: \"yeet\" means delete selection.";
const LISTEN_REPROMPT: &str = "I didn't catch that. Say the phrase in quotes, then what it should do.";

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training mode is already active ({0:?})")]
    AlreadyActive(TrainingState),
}

/// The training dialogue. One session at a time; drafted after every step.
pub struct TrainingMode {
    cfg: TrainingConfig,
    known_actions: Vec<String>,
    feedback: FeedbackClassifier,
    drafts: Box<dyn DraftStore>,
    state: TrainingState,
    session: Option<TrainingSession>,
    /// Draft found at startup, held while asking whether to resume it.
    recovered: Option<TrainingSession>,
    generation: u64,
    timers: Vec<TimerToken>,
}

impl TrainingMode {
    pub fn new(cfg: TrainingConfig, known_actions: Vec<String>, drafts: Box<dyn DraftStore>) -> Self {
        Self {
            cfg,
            known_actions,
            feedback: FeedbackClassifier::default(),
            drafts,
            state: TrainingState::Idle,
            session: None,
            recovered: None,
            generation: 0,
            timers: Vec::new(),
        }
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != TrainingState::Idle
    }

    pub fn session(&self) -> Option<&TrainingSession> {
        self.session.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Look for a draft left by an interrupted session.
    pub fn recover(&mut self, cx: &mut KernelCx) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        if self.is_active() {
            return effects;
        }
        match self.drafts.load() {
            Ok(Some(draft)) => {
                info!("Found training draft {} from {}", draft.id, draft.started_at);
                let detail = if draft.has_content() {
                    draft.summary()
                } else {
                    "It was just getting started.".to_string()
                };
                effects.push(SideEffect::Speak(format!(
                    "I found an unfinished training session. {} Resume or discard?",
                    detail
                )));
                self.recovered = Some(draft);
                self.transition(cx, TrainingState::AwaitingRecovery, &mut effects);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Unreadable training draft, clearing it: {}", e);
                self.clear_draft(cx);
            }
        }
        effects
    }

    /// Start a session. Only valid from `Idle`.
    pub fn enter(&mut self, cx: &mut KernelCx) -> Result<Vec<SideEffect>, TrainingError> {
        if self.is_active() {
            return Err(TrainingError::AlreadyActive(self.state));
        }
        let mut effects = vec![SideEffect::Speak(LISTEN_PROMPT.to_string())];
        let session = TrainingSession::new();
        info!("Training session {} started", session.id);
        self.session = Some(session);
        self.transition(cx, TrainingState::Listening, &mut effects);
        Ok(effects)
    }

    /// Offer an utterance. While a session is active every utterance is
    /// consumed; from `Idle` only an entry phrase is.
    pub fn handle_utterance(&mut self, cx: &mut KernelCx, text: &str) -> Handled {
        match self.state {
            TrainingState::Idle => {
                if !parser::is_entry(text) {
                    return Handled::default();
                }
                return match self.enter(cx) {
                    Ok(effects) => Handled::consumed(effects),
                    Err(e) => {
                        warn!("{}", e);
                        Handled::default()
                    }
                };
            }
            TrainingState::Saving => return Handled::consumed(Vec::new()),
            _ => {}
        }

        if let Some(session) = self.session.as_mut() {
            session.history.push(text.to_string());
        }
        if self.state != TrainingState::AwaitingRecovery && parser::is_exit(text) {
            return Handled::consumed(self.exit(cx));
        }

        let effects = match self.state {
            TrainingState::Listening => self.on_listening(cx, text),
            TrainingState::CollectingVariations => self.on_variation(cx, text),
            TrainingState::CollectingSteps => self.on_step(cx, text),
            TrainingState::Confirming => self.on_confirming(cx, text),
            TrainingState::AwaitingRecovery => self.on_recovery(cx, text),
            TrainingState::Idle | TrainingState::Saving => Vec::new(),
        };
        Handled::consumed(effects)
    }

    pub fn on_timer(&mut self, cx: &mut KernelCx, fired: TimerFired) -> Vec<SideEffect> {
        if fired.generation != self.generation || !self.timers.contains(&fired.token) {
            debug!("Dropping stale training timer {:?}", fired.kind);
            cx.telemetry.record(TelemetryEvent::TimerDropped {
                owner: fired.owner,
                kind: fired.kind,
            });
            return Vec::new();
        }
        self.timers.retain(|t| *t != fired.token);

        match fired.kind {
            TimerKind::TrainingWarning => {
                let secs = self.cfg.warning_lead_ms / 1_000;
                vec![SideEffect::Speak(format!(
                    "Still there? Training will time out in {} seconds.",
                    secs
                ))]
            }
            TimerKind::TrainingTimeout => self.on_timeout(cx),
            other => {
                cx.telemetry.record(TelemetryEvent::TimerDropped {
                    owner: TimerOwner::Training,
                    kind: other,
                });
                Vec::new()
            }
        }
    }

    // ── Per-state handling ─────────────────────────────────────────────────

    fn on_listening(&mut self, cx: &mut KernelCx, text: &str) -> Vec<SideEffect> {
        let Some(teaching) = parser::parse_teaching(text) else {
            return vec![SideEffect::Speak(LISTEN_REPROMPT.to_string())];
        };
        match teaching.session_type {
            SessionType::Workflow => self.begin_workflow(cx, teaching),
            SessionType::SimpleCommand | SessionType::ContextRule => self.begin_command(cx, teaching),
        }
    }

    fn begin_workflow(&mut self, cx: &mut KernelCx, teaching: Teaching) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        if cx.dict.is_phrase_taken(&teaching.trigger) {
            effects.push(SideEffect::Speak(format!(
                "\"{}\" is already in use. Pick another name.",
                teaching.trigger
            )));
            return effects;
        }
        if let Some(session) = self.session.as_mut() {
            session.session_type = SessionType::Workflow;
            session.workflow_name = Some(teaching.trigger.clone());
            session.trigger_phrases = vec![teaching.trigger.clone()];
        }
        effects.push(SideEffect::Speak(format!(
            "Okay, routine \"{}\". What's the first step?",
            teaching.trigger
        )));
        self.transition(cx, TrainingState::CollectingSteps, &mut effects);
        effects
    }

    fn begin_command(&mut self, cx: &mut KernelCx, teaching: Teaching) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        let description = teaching.action_description.unwrap_or_default();
        let Some(action) = self.resolve_action(cx.dict, &description) else {
            effects.push(SideEffect::Speak(format!(
                "I don't know an action called {}. Try again.",
                description
            )));
            return effects;
        };
        if teaching.session_type == SessionType::SimpleCommand && cx.dict.is_phrase_taken(&teaching.trigger) {
            effects.push(SideEffect::Speak(format!(
                "\"{}\" already does something else. Pick another phrase.",
                teaching.trigger
            )));
            return effects;
        }

        if let Some(session) = self.session.as_mut() {
            session.session_type = teaching.session_type;
            session.trigger_phrases = vec![teaching.trigger.clone()];
            session.action = Some(action.clone());
            session.context = teaching.context;
        }
        effects.push(SideEffect::Speak(format!(
            "Got it: \"{}\" will {}. Any other ways you'd say it? Say done when finished.",
            teaching.trigger,
            humanize(&action)
        )));
        self.transition(cx, TrainingState::CollectingVariations, &mut effects);
        effects
    }

    fn on_variation(&mut self, cx: &mut KernelCx, text: &str) -> Vec<SideEffect> {
        if parser::is_termination(text) {
            return self.ask_to_save(cx, "");
        }
        let phrase = parser::variation_phrase(text);
        if normalize(&phrase).is_empty() {
            return vec![SideEffect::Speak("Say another phrase, or done.".to_string())];
        }

        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let reply = if session.has_phrase(&phrase) {
            "I already have that one.".to_string()
        } else if session.session_type == SessionType::SimpleCommand && cx.dict.is_phrase_taken(&phrase) {
            format!("\"{}\" is already used by another command.", phrase)
        } else {
            session.trigger_phrases.push(phrase.clone());
            format!("Added \"{}\". Another?", phrase)
        };
        self.rearm(cx);
        self.save_draft(cx);
        vec![SideEffect::Speak(reply)]
    }

    fn on_step(&mut self, cx: &mut KernelCx, text: &str) -> Vec<SideEffect> {
        let has_steps = self.session.as_ref().is_some_and(|s| !s.steps.is_empty());
        if parser::is_termination(text) {
            if !has_steps {
                return vec![SideEffect::Speak("Tell me at least one step, or say cancel.".to_string())];
            }
            return self.ask_to_save(cx, "");
        }

        let Some((description, condition)) = parser::parse_step(text) else {
            return vec![SideEffect::Speak("What should that step do?".to_string())];
        };
        let Some(action) = self.resolve_action(cx.dict, &description) else {
            return vec![SideEffect::Speak(format!("I don't know how to {}.", description))];
        };

        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.steps.push(WorkflowStep {
            action,
            description: description.clone(),
            condition,
        });
        let n = session.steps.len();
        self.rearm(cx);
        self.save_draft(cx);
        vec![SideEffect::Speak(format!(
            "Step {}: {}. What's next? Say done when finished.",
            n, description
        ))]
    }

    fn on_confirming(&mut self, cx: &mut KernelCx, text: &str) -> Vec<SideEffect> {
        match self.feedback.classify(text) {
            Feedback::Affirmative => self.commit(cx),
            Feedback::Negative | Feedback::NegativeWithContent(_) => {
                self.discard(cx, TrainingOutcomeKind::Discarded, "Okay, nothing was saved.")
            }
            Feedback::Neither => vec![SideEffect::Speak("Say yes to save it, or no to discard it.".to_string())],
        }
    }

    fn on_recovery(&mut self, cx: &mut KernelCx, text: &str) -> Vec<SideEffect> {
        let verdict = self.feedback.classify(text);
        if parser::is_discard(text) || parser::is_exit(text) || matches!(verdict, Feedback::Negative) {
            self.recovered = None;
            return self.discard(cx, TrainingOutcomeKind::Discarded, "Discarded the unfinished session.");
        }
        if !(parser::is_resume(text) || verdict == Feedback::Affirmative) {
            return vec![SideEffect::Speak("Say resume to continue, or discard.".to_string())];
        }

        let Some(mut session) = self.recovered.take() else {
            return self.discard(cx, TrainingOutcomeKind::Discarded, "Nothing to resume.");
        };
        let resume_in = match session.state {
            TrainingState::Idle | TrainingState::Saving | TrainingState::AwaitingRecovery => {
                if session.has_content() {
                    TrainingState::Confirming
                } else {
                    TrainingState::Listening
                }
            }
            other => other,
        };
        let prompt = match resume_in {
            TrainingState::Listening => LISTEN_PROMPT.to_string(),
            TrainingState::CollectingVariations => "Resuming. Any other ways you'd say it?".to_string(),
            TrainingState::CollectingSteps => "Resuming. What's the next step?".to_string(),
            _ => format!("Resuming. {} Save it?", session.summary()),
        };
        info!("Resuming training session {} in {:?}", session.id, resume_in);
        session.state = resume_in;
        self.session = Some(session);
        cx.telemetry.record(TelemetryEvent::TrainingOutcome {
            kind: TrainingOutcomeKind::Recovered,
            saved: 0,
            rejected: 0,
        });

        let mut effects = vec![SideEffect::Speak(prompt)];
        self.transition(cx, resume_in, &mut effects);
        effects
    }

    fn on_timeout(&mut self, cx: &mut KernelCx) -> Vec<SideEffect> {
        match self.state {
            TrainingState::Confirming => {
                self.discard(cx, TrainingOutcomeKind::TimedOut, "Training timed out. Nothing was saved.")
            }
            TrainingState::AwaitingRecovery => {
                self.recovered = None;
                self.discard(cx, TrainingOutcomeKind::TimedOut, "Discarded the unfinished session.")
            }
            _ if self.session.as_ref().is_some_and(|s| s.has_content()) => self.ask_to_save(cx, "Time's up. "),
            _ => self.discard(cx, TrainingOutcomeKind::TimedOut, "Training timed out."),
        }
    }

    /// Exit words: keep taught content by asking first, drop the rest.
    fn exit(&mut self, cx: &mut KernelCx) -> Vec<SideEffect> {
        let has_content = self.session.as_ref().is_some_and(|s| s.has_content());
        if self.state == TrainingState::Confirming || !has_content {
            return self.discard(cx, TrainingOutcomeKind::Discarded, "Training cancelled.");
        }
        self.ask_to_save(cx, "Before you go: ")
    }

    fn ask_to_save(&mut self, cx: &mut KernelCx, lead: &str) -> Vec<SideEffect> {
        let summary = self.session.as_ref().map(|s| s.summary()).unwrap_or_default();
        let mut effects = vec![SideEffect::Speak(format!("{}{} Save it?", lead, summary))];
        self.transition(cx, TrainingState::Confirming, &mut effects);
        effects
    }

    // ── Commit / discard ───────────────────────────────────────────────────

    fn commit(&mut self, cx: &mut KernelCx) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        self.transition(cx, TrainingState::Saving, &mut effects);
        let Some(session) = self.session.take() else {
            self.transition(cx, TrainingState::Idle, &mut effects);
            return effects;
        };

        let (saved, rejected, message) = match session.session_type {
            SessionType::SimpleCommand => commit_command(cx.dict, &session),
            SessionType::ContextRule => commit_context_rule(cx.dict, &session),
            SessionType::Workflow => commit_workflow(cx.dict, &session),
        };
        info!(
            "Training session {} saved: {} saved, {} rejected",
            session.id,
            saved,
            rejected.len()
        );
        cx.telemetry.record(TelemetryEvent::TrainingOutcome {
            kind: TrainingOutcomeKind::Saved,
            saved,
            rejected: rejected.len(),
        });

        effects.push(SideEffect::Speak(message));
        self.clear_draft(cx);
        self.transition(cx, TrainingState::Idle, &mut effects);
        effects
    }

    fn discard(&mut self, cx: &mut KernelCx, kind: TrainingOutcomeKind, message: &str) -> Vec<SideEffect> {
        let mut effects = vec![SideEffect::Speak(message.to_string())];
        if let Some(session) = self.session.take() {
            info!("Training session {} discarded ({:?})", session.id, kind);
        }
        cx.telemetry.record(TelemetryEvent::TrainingOutcome {
            kind,
            saved: 0,
            rejected: 0,
        });
        self.clear_draft(cx);
        self.transition(cx, TrainingState::Idle, &mut effects);
        effects
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    fn resolve_action(&self, dict: &PhraseDictionary, description: &str) -> Option<String> {
        if let Some(action) = dict.action_for(description, &self.known_actions) {
            return Some(action);
        }
        if self.known_actions.is_empty() {
            return action_candidates(&normalize(description)).pop();
        }
        None
    }

    fn transition(&mut self, cx: &mut KernelCx, to: TrainingState, effects: &mut Vec<SideEffect>) {
        let from = self.state;
        self.cancel_timers(cx);
        self.generation += 1;
        self.state = to;

        match to {
            TrainingState::Idle | TrainingState::Saving => {}
            TrainingState::AwaitingRecovery => self.arm(cx),
            _ => {
                if let Some(session) = self.session.as_mut() {
                    session.state = to;
                }
                self.arm(cx);
                self.save_draft(cx);
            }
        }

        if from != to {
            debug!("Training {:?} -> {:?}", from, to);
            cx.telemetry.record(TelemetryEvent::TrainingTransition { from, to });
            effects.push(SideEffect::StateChanged(StateChange::Training { from, to }));
        }
    }

    /// Restart the current state's timeout after new content.
    fn rearm(&mut self, cx: &mut KernelCx) {
        self.cancel_timers(cx);
        self.generation += 1;
        self.arm(cx);
    }

    fn arm(&mut self, cx: &mut KernelCx) {
        let timeout_ms = match self.state {
            TrainingState::Listening => self.cfg.listen_timeout_ms,
            TrainingState::CollectingVariations | TrainingState::CollectingSteps => self.cfg.collect_timeout_ms,
            TrainingState::Confirming | TrainingState::AwaitingRecovery => self.cfg.confirm_timeout_ms,
            TrainingState::Idle | TrainingState::Saving => return,
        };
        let timeout = cx.timers.schedule(
            TimerOwner::Training,
            TimerKind::TrainingTimeout,
            self.generation,
            cx.now.plus_millis(timeout_ms),
        );
        self.timers.push(timeout);
        if timeout_ms > self.cfg.warning_lead_ms {
            let warning = cx.timers.schedule(
                TimerOwner::Training,
                TimerKind::TrainingWarning,
                self.generation,
                cx.now.plus_millis(timeout_ms - self.cfg.warning_lead_ms),
            );
            self.timers.push(warning);
        }
    }

    fn cancel_timers(&mut self, cx: &mut KernelCx) {
        for token in self.timers.drain(..) {
            cx.timers.cancel(token);
        }
    }

    fn save_draft(&mut self, cx: &mut KernelCx) {
        let Some(session) = &self.session else {
            return;
        };
        if let Err(e) = self.drafts.save(session) {
            warn!("Training draft write failed: {}", e);
            cx.telemetry.record(TelemetryEvent::PersistenceFailed { count: 1 });
        }
    }

    fn clear_draft(&mut self, cx: &mut KernelCx) {
        if let Err(e) = self.drafts.clear() {
            warn!("Training draft clear failed: {}", e);
            cx.telemetry.record(TelemetryEvent::PersistenceFailed { count: 1 });
        }
    }
}

fn commit_command(dict: &mut PhraseDictionary, session: &TrainingSession) -> (usize, Vec<String>, String) {
    let action = session.action.clone().unwrap_or_default();
    let mut saved = Vec::new();
    let mut rejected = Vec::new();
    for phrase in &session.trigger_phrases {
        if dict.learn(phrase, &action, CommandSource::Trained) {
            saved.push(phrase.clone());
        } else {
            rejected.push(phrase.clone());
        }
    }
    let message = saved_message(&saved, &rejected, &humanize(&action));
    (saved.len(), rejected, message)
}

fn commit_context_rule(dict: &mut PhraseDictionary, session: &TrainingSession) -> (usize, Vec<String>, String) {
    let action = session.action.clone().unwrap_or_default();
    let matcher = session.context.clone().unwrap_or_default();
    let mut saved = Vec::new();
    let mut rejected = Vec::new();
    for phrase in &session.trigger_phrases {
        if !dict.is_phrase_taken(phrase) {
            dict.learn(phrase, &action, CommandSource::Trained);
        }
        let rule = ContextRule {
            matcher: matcher.clone(),
            action: action.clone(),
            priority: TRAINED_RULE_PRIORITY,
        };
        if dict.add_context_rule(phrase, rule) {
            saved.push(phrase.clone());
        } else {
            rejected.push(phrase.clone());
        }
    }
    let app = matcher.app_id.clone().unwrap_or_default();
    let message = saved_message(&saved, &rejected, &format!("{} in {}", humanize(&action), app));
    (saved.len(), rejected, message)
}

fn commit_workflow(dict: &mut PhraseDictionary, session: &TrainingSession) -> (usize, Vec<String>, String) {
    let name = session.workflow_name.clone().unwrap_or_default();
    match dict.add_workflow(&name, &session.trigger_phrases, session.steps.clone()) {
        Some(_) => (
            session.trigger_phrases.len(),
            Vec::new(),
            format!("Saved routine \"{}\" with {} steps.", name, session.steps.len()),
        ),
        None => (
            0,
            session.trigger_phrases.clone(),
            format!("Couldn't save routine \"{}\". Its name is already in use.", name),
        ),
    }
}

fn saved_message(saved: &[String], rejected: &[String], what: &str) -> String {
    let quote = |ps: &[String]| ps.iter().map(|p| format!("\"{}\"", p)).collect::<Vec<_>>().join(", ");
    let mut message = if saved.is_empty() {
        "Nothing was saved.".to_string()
    } else {
        format!("Saved. {} will now {}.", quote(saved), what)
    };
    if !rejected.is_empty() {
        message.push_str(&format!(" Skipped {}: already in use.", quote(rejected)));
    }
    message
}
