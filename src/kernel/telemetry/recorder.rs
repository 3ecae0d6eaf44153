use std::collections::VecDeque;

use super::event::TelemetryEvent;
use super::metrics::{compute_snapshot, TelemetrySnapshot};

const MAX_EVENTS: usize = 10_000;

#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<TelemetryEvent>,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(1024),
        }
    }

    pub fn record(&mut self, event: TelemetryEvent) {
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        compute_snapshot(&self.buffer)
    }

    pub fn events(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Tier;
    use crate::kernel::telemetry::event::FeedbackKind;
    use crate::resolve::Decision;

    #[test]
    fn buffer_is_bounded() {
        let mut rec = TelemetryRecorder::new();
        for _ in 0..MAX_EVENTS + 5 {
            rec.record(TelemetryEvent::Unresolved);
        }
        assert_eq!(rec.len(), MAX_EVENTS);
    }

    #[test]
    fn snapshot_aggregates() {
        let mut rec = TelemetryRecorder::new();
        rec.record(TelemetryEvent::Resolved {
            tier: Tier::Fuzzy,
            decision: Decision::ExecuteAndObserve,
        });
        rec.record(TelemetryEvent::Resolved {
            tier: Tier::Classifier,
            decision: Decision::AskConfirmation,
        });
        rec.record(TelemetryEvent::Feedback {
            kind: FeedbackKind::ImplicitPositive,
        });
        rec.record(TelemetryEvent::PersistenceFailed { count: 2 });

        let snap = rec.snapshot();
        assert_eq!(snap.resolution.hits(Tier::Fuzzy), 1);
        assert_eq!(snap.resolution.hits(Tier::Classifier), 1);
        assert_eq!(snap.resolution.executed, 1);
        assert_eq!(snap.resolution.confirmations_asked, 1);
        assert_eq!(snap.feedback.implicit_positive, 1);
        assert_eq!(snap.persistence_failures, 2);
    }
}
