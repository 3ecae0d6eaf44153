use std::collections::VecDeque;
use std::time::Duration;

use crate::dictionary::{CommandId, Tier};
use crate::kernel::time::Tick;

pub const DEFAULT_CAPACITY: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Speech,
    Action,
    Feedback,
    Confirmation,
    Correction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// Immutable record of something that happened recently.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEntry {
    Speech {
        at: Tick,
        text: String,
    },
    Action {
        at: Tick,
        action: String,
        phrase: String,
        confidence: f32,
        tier: Tier,
    },
    Feedback {
        at: Tick,
        command_id: Option<CommandId>,
        polarity: Polarity,
    },
    Confirmation {
        at: Tick,
        action: String,
        accepted: bool,
    },
    Correction {
        at: Tick,
        wrong_action: String,
        target: String,
    },
}

impl ContextEntry {
    pub fn at(&self) -> Tick {
        match self {
            ContextEntry::Speech { at, .. }
            | ContextEntry::Action { at, .. }
            | ContextEntry::Feedback { at, .. }
            | ContextEntry::Confirmation { at, .. }
            | ContextEntry::Correction { at, .. } => *at,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            ContextEntry::Speech { .. } => EntryKind::Speech,
            ContextEntry::Action { .. } => EntryKind::Action,
            ContextEntry::Feedback { .. } => EntryKind::Feedback,
            ContextEntry::Confirmation { .. } => EntryKind::Confirmation,
            ContextEntry::Correction { .. } => EntryKind::Correction,
        }
    }
}

/// Fixed-capacity FIFO of recent events. Append-only; queries never mutate.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    capacity: usize,
    entries: VecDeque<ContextEntry>,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ContextWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: ContextEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ContextEntry> {
        self.entries.iter()
    }

    pub fn latest(&self, kind: EntryKind) -> Option<&ContextEntry> {
        self.entries.iter().rev().find(|e| e.kind() == kind)
    }

    /// Entries no older than `window` as of `now`, oldest first.
    pub fn within(&self, window: Duration, now: Tick) -> Vec<&ContextEntry> {
        self.entries.iter().filter(|e| now.since(e.at()) <= window).collect()
    }

    /// The last speech entry before the most recent action entry.
    pub fn speech_before_latest_action(&self) -> Option<&ContextEntry> {
        let action_pos = self.entries.iter().rposition(|e| e.kind() == EntryKind::Action)?;
        self.entries
            .iter()
            .take(action_pos)
            .rev()
            .find(|e| e.kind() == EntryKind::Speech)
    }

    /// Up to `n` most recent executed actions, newest first.
    pub fn recent_actions(&self, n: usize) -> Vec<String> {
        self.entries
            .iter()
            .rev()
            .filter_map(|e| match e {
                ContextEntry::Action { action, .. } => Some(action.clone()),
                _ => None,
            })
            .take(n)
            .collect()
    }
}
