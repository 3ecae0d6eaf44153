use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::event::{ClassifyEpoch, Event, Utterance};
use super::learning::LearningLoop;
use super::scheduler::{Scheduler, SideEffect};
use super::telemetry::{ClassificationEventKind, TelemetryEvent, TelemetryRecorder, TelemetrySnapshot};
use super::time::Tick;
use super::timer::{TimerOwner, TimerWheel};
use super::training::{DraftStore, InMemoryDraftStore, TrainingMode};
use super::KernelCx;
use crate::config::Config;
use crate::context::{ContextEntry, ContextWindow};
use crate::dictionary::{DictionaryStats, PhraseDictionary};
use crate::resolve::{ClassifierOutcome, Decision, Resolution, ResolutionPipeline};

struct PendingClassification {
    epoch: ClassifyEpoch,
    utterance: Utterance,
}

pub struct Reactor {
    pub receiver: mpsc::Receiver<Event>,
    pub config: Config,
    pub dictionary: PhraseDictionary,
    pub pipeline: ResolutionPipeline,
    pub learning: LearningLoop,
    pub training: TrainingMode,
    pub window: ContextWindow,
    pub timers: TimerWheel,
    pub telemetry: TelemetryRecorder,
    pub scheduler: Scheduler,
    pub tick: Tick,
    pending: Option<PendingClassification>,
    last_epoch: u64,
    maintenance_frames: u64,
    last_maintenance: Tick,
}

impl Reactor {
    pub fn new(
        receiver: mpsc::Receiver<Event>,
        config: Config,
        dictionary: PhraseDictionary,
        drafts: Box<dyn DraftStore>,
    ) -> Self {
        Self {
            receiver,
            pipeline: ResolutionPipeline::new(&config),
            learning: LearningLoop::new(config.learning.clone(), config.known_actions.clone()),
            training: TrainingMode::new(config.training.clone(), config.known_actions.clone(), drafts),
            window: ContextWindow::new(config.context_window_capacity),
            timers: TimerWheel::new(),
            telemetry: TelemetryRecorder::new(),
            scheduler: Scheduler,
            tick: Tick::new(),
            pending: None,
            last_epoch: 0,
            maintenance_frames: Tick::frames_for_millis(config.learning.maintenance_interval_secs * 1_000).max(1),
            last_maintenance: Tick::new(),
            dictionary,
            config,
        }
    }

    /// Reactor over an in-memory dictionary and draft slot.
    pub fn in_memory(receiver: mpsc::Receiver<Event>, config: Config) -> Self {
        let dictionary = PhraseDictionary::in_memory(&config.dictionary);
        Self::new(receiver, config, dictionary, Box::new(InMemoryDraftStore::new()))
    }

    /// Startup work: offer to resume an interrupted training session and
    /// run one maintenance pass.
    pub fn start(&mut self) -> Vec<SideEffect> {
        self.run_maintenance();
        let (_, training, _, mut cx) = self.parts();
        training.recover(&mut cx)
    }

    /// Pure Tick Step: advances logical time, fires due timers, then applies
    /// events in arrival order. Returns side effects for the driver.
    /// MUST NOT await I/O or timers.
    pub fn tick_step(&mut self, events: Vec<Event>) -> Vec<SideEffect> {
        self.tick = self.tick.next();
        let mut effects = Vec::new();

        for fired in self.timers.expire(self.tick) {
            let (learning, training, _, mut cx) = self.parts();
            let out = match fired.owner {
                TimerOwner::Learning => learning.on_timer(&mut cx, fired),
                TimerOwner::Training => training.on_timer(&mut cx, fired),
            };
            effects.extend(out);
        }

        for event in events {
            match event {
                Event::Input(utterance) => effects.extend(self.on_utterance(utterance)),
                Event::ClassificationProposed(epoch, outcome) => {
                    effects.extend(self.on_classification(epoch, outcome))
                }
            }
        }

        if self.tick.frame.saturating_sub(self.last_maintenance.frame) >= self.maintenance_frames {
            self.run_maintenance();
        }

        let failures = self.dictionary.drain_persist_failures();
        if failures > 0 {
            self.telemetry.record(TelemetryEvent::PersistenceFailed { count: failures });
        }

        effects
    }

    /// Run empty ticks covering `ms` of logical time.
    pub fn advance(&mut self, ms: u64) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        for _ in 0..Tick::frames_for_millis(ms) {
            effects.extend(self.tick_step(Vec::new()));
        }
        effects
    }

    /// Everything queued on the channel right now.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn stats(&self) -> DictionaryStats {
        self.dictionary.stats()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    // ── Routing ────────────────────────────────────────────────────────────

    fn on_utterance(&mut self, utterance: Utterance) -> Vec<SideEffect> {
        let text = utterance.text.trim().to_string();
        if text.is_empty() {
            return Vec::new();
        }
        self.window.push(ContextEntry::Speech {
            at: self.tick,
            text: text.clone(),
        });
        self.telemetry
            .record(TelemetryEvent::UtteranceReceived { tick: self.tick });
        if let Some(stale) = self.pending.take() {
            debug!("Utterance supersedes classification {:?}", stale.epoch);
            self.telemetry.record(TelemetryEvent::Classification {
                kind: ClassificationEventKind::Superseded,
            });
        }

        let mut effects = Vec::new();
        let (learning, training, _, mut cx) = self.parts();
        if training.is_active() {
            return training.handle_utterance(&mut cx, &text).effects;
        }
        let handled = learning.handle_utterance(&mut cx, &text);
        effects.extend(handled.effects);
        if handled.consumed {
            return effects;
        }
        let handled = training.handle_utterance(&mut cx, &text);
        effects.extend(handled.effects);
        if handled.consumed {
            return effects;
        }

        match self
            .pipeline
            .resolve_local(&mut self.dictionary, &text, &utterance.context)
        {
            Some(resolution) => effects.extend(self.act(&text, resolution)),
            None => effects.extend(self.escalate(utterance)),
        }
        effects
    }

    /// Tiers 0-2 missed: consult the cache, else ask the driver to classify.
    fn escalate(&mut self, utterance: Utterance) -> Vec<SideEffect> {
        let text = utterance.text.trim().to_string();
        if !self.pipeline.classifier_enabled() {
            return self.unresolved(&text);
        }
        if let Some(outcome) = self.pipeline.cached(&text, &utterance.context, self.tick) {
            self.telemetry.record(TelemetryEvent::Classification {
                kind: ClassificationEventKind::CacheHit,
            });
            return self.accept(&text, outcome);
        }

        self.last_epoch += 1;
        let epoch = ClassifyEpoch(self.last_epoch);
        let recent = self.window.recent_actions(self.config.classifier.recent_actions);
        let request = self
            .pipeline
            .build_request(&self.dictionary, &text, &utterance.context, &recent);
        self.pending = Some(PendingClassification { epoch, utterance });
        self.telemetry.record(TelemetryEvent::Classification {
            kind: ClassificationEventKind::Requested,
        });
        vec![SideEffect::Classify { epoch, request }]
    }

    fn on_classification(&mut self, epoch: ClassifyEpoch, outcome: ClassifierOutcome) -> Vec<SideEffect> {
        let current = self.pending.as_ref().map(|p| p.epoch);
        if current != Some(epoch) {
            info!("Discarded stale classification {:?} (pending {:?})", epoch, current);
            self.telemetry.record(TelemetryEvent::Classification {
                kind: ClassificationEventKind::StaleDiscarded,
            });
            return Vec::new();
        }
        let Some(pending) = self.pending.take() else {
            return Vec::new();
        };
        let text = pending.utterance.text.trim().to_string();
        self.pipeline
            .remember(&text, &pending.utterance.context, outcome.clone(), self.tick);
        self.accept(&text, outcome)
    }

    fn accept(&mut self, text: &str, outcome: ClassifierOutcome) -> Vec<SideEffect> {
        match self
            .pipeline
            .accept_classification(&mut self.dictionary, text, outcome)
        {
            Some(resolution) => self.act(text, resolution),
            None => self.unresolved(text),
        }
    }

    /// Apply the confidence policy to a resolution.
    fn act(&mut self, text: &str, resolution: Resolution) -> Vec<SideEffect> {
        let decision = self.pipeline.policy().decide(resolution.confidence);
        self.telemetry.record(TelemetryEvent::Resolved {
            tier: resolution.tier,
            decision,
        });

        match decision {
            Decision::ExecuteImmediately | Decision::ExecuteAndObserve => {
                let workflow = resolution
                    .workflow_id
                    .as_ref()
                    .and_then(|id| self.dictionary.workflows().iter().find(|w| &w.id == id))
                    .cloned();
                let mut effects = self.scheduler.execute(&resolution, workflow.as_ref());
                let (learning, _, _, mut cx) = self.parts();
                cx.record_action(&resolution);
                effects.extend(learning.observe(&mut cx, text, resolution));
                effects
            }
            Decision::AskConfirmation => {
                let (learning, _, _, mut cx) = self.parts();
                learning.request_confirmation(&mut cx, text, resolution)
            }
            Decision::Reject => self.unresolved(text),
        }
    }

    fn unresolved(&mut self, text: &str) -> Vec<SideEffect> {
        self.telemetry.record(TelemetryEvent::Unresolved);
        vec![SideEffect::Unresolved {
            utterance: text.to_string(),
        }]
    }

    fn run_maintenance(&mut self) {
        self.last_maintenance = self.tick;
        let now = self.tick;
        let (learning, _, pipeline, mut cx) = self.parts();
        learning.run_maintenance(&mut cx, Utc::now());
        pipeline.purge_cache(now);
    }

    fn parts(&mut self) -> (&mut LearningLoop, &mut TrainingMode, &mut ResolutionPipeline, KernelCx<'_>) {
        (
            &mut self.learning,
            &mut self.training,
            &mut self.pipeline,
            KernelCx {
                dict: &mut self.dictionary,
                timers: &mut self.timers,
                window: &mut self.window,
                telemetry: &mut self.telemetry,
                now: self.tick,
            },
        )
    }
}
