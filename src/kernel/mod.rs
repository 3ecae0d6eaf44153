//! The pure core: a tick-driven reactor plus the two dialogue controllers.
//! Nothing in here awaits; I/O is requested through `SideEffect`s.

pub mod event;
pub mod feedback;
pub mod learning;
pub mod reactor;
pub mod scheduler;
pub mod telemetry;
pub mod time;
pub mod timer;
pub mod training;

use crate::context::{ContextEntry, ContextWindow};
use crate::dictionary::PhraseDictionary;
use crate::resolve::Resolution;
use telemetry::TelemetryRecorder;
use time::Tick;
use timer::TimerWheel;

/// Shared reactor state lent to a controller for one step.
pub struct KernelCx<'a> {
    pub dict: &'a mut PhraseDictionary,
    pub timers: &'a mut TimerWheel,
    pub window: &'a mut ContextWindow,
    pub telemetry: &'a mut TelemetryRecorder,
    pub now: Tick,
}

impl KernelCx<'_> {
    pub fn record_action(&mut self, resolution: &Resolution) {
        self.window.push(ContextEntry::Action {
            at: self.now,
            action: resolution.action.clone(),
            phrase: resolution.phrase.clone(),
            confidence: resolution.confidence,
            tier: resolution.tier,
        });
    }
}
