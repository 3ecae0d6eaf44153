use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::time::Tick;

/// Which controller a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerOwner {
    Learning,
    Training,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    Observation,
    Confirmation,
    Correction,
    TrainingWarning,
    TrainingTimeout,
}

/// Cancellation handle returned by `TimerWheel::schedule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub token: TimerToken,
    pub owner: TimerOwner,
    pub kind: TimerKind,
    /// Owner generation at scheduling time. The owner drops the fire if it
    /// has transitioned since.
    pub generation: u64,
    pub deadline: Tick,
}

/// Pending deadlines. Pure bookkeeping: nothing fires unless the reactor
/// calls `expire` with the current tick.
#[derive(Debug, Default)]
pub struct TimerWheel {
    next_id: u64,
    pending: BTreeMap<TimerToken, TimerFired>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, owner: TimerOwner, kind: TimerKind, generation: u64, deadline: Tick) -> TimerToken {
        self.next_id += 1;
        let token = TimerToken(self.next_id);
        self.pending.insert(
            token,
            TimerFired {
                token,
                owner,
                kind,
                generation,
                deadline,
            },
        );
        token
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        self.pending.remove(&token).is_some()
    }

    pub fn cancel_owner(&mut self, owner: TimerOwner) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, t| t.owner != owner);
        before - self.pending.len()
    }

    /// Remove and return every timer due at `now`, earliest deadline first.
    pub fn expire(&mut self, now: Tick) -> Vec<TimerFired> {
        let due: Vec<TimerToken> = self
            .pending
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(k, _)| *k)
            .collect();
        let mut fired: Vec<TimerFired> = due.iter().filter_map(|k| self.pending.remove(k)).collect();
        fired.sort_by_key(|t| (t.deadline, t.token));
        fired
    }

    pub fn is_pending(&self, owner: TimerOwner) -> bool {
        self.pending.values().any(|t| t.owner == owner)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(TimerOwner::Training, TimerKind::TrainingTimeout, 1, Tick { frame: 30 });
        wheel.schedule(TimerOwner::Learning, TimerKind::Observation, 1, Tick { frame: 10 });
        assert!(wheel.expire(Tick { frame: 9 }).is_empty());

        let fired = wheel.expire(Tick { frame: 40 });
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].kind, TimerKind::Observation);
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut wheel = TimerWheel::new();
        let token = wheel.schedule(TimerOwner::Learning, TimerKind::Confirmation, 3, Tick { frame: 5 });
        assert!(wheel.cancel(token));
        assert!(!wheel.cancel(token));
        assert!(wheel.expire(Tick { frame: 100 }).is_empty());
    }

    #[test]
    fn cancel_owner_leaves_others() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(TimerOwner::Learning, TimerKind::Observation, 1, Tick { frame: 5 });
        wheel.schedule(TimerOwner::Training, TimerKind::TrainingWarning, 1, Tick { frame: 5 });
        assert_eq!(wheel.cancel_owner(TimerOwner::Learning), 1);
        assert!(wheel.is_pending(TimerOwner::Training));
        assert!(!wheel.is_pending(TimerOwner::Learning));
    }
}
