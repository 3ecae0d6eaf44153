use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Logical kernel time. One frame per `tick_step`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick {
    pub frame: u64,
}

pub const TICK_MS: u64 = 50;

impl Tick {
    pub fn new() -> Self {
        Tick { frame: 0 }
    }

    pub fn next(&self) -> Self {
        Tick { frame: self.frame + 1 }
    }

    /// Frames needed to cover `ms`, rounded up so a timer never fires early.
    pub fn frames_for_millis(ms: u64) -> u64 {
        ms.div_ceil(TICK_MS)
    }

    pub fn plus_millis(&self, ms: u64) -> Self {
        Tick { frame: self.frame + Self::frames_for_millis(ms) }
    }

    /// Saturating: a later `earlier` yields zero.
    pub fn since(&self, earlier: Tick) -> Duration {
        Duration::from_millis(self.frame.saturating_sub(earlier.frame) * TICK_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_round_up() {
        assert_eq!(Tick::frames_for_millis(5_000), 100);
        assert_eq!(Tick::frames_for_millis(51), 2);
        assert_eq!(Tick::new().plus_millis(0), Tick::new());
    }

    #[test]
    fn since_saturates() {
        let a = Tick { frame: 10 };
        let b = Tick { frame: 30 };
        assert_eq!(b.since(a), Duration::from_millis(1_000));
        assert_eq!(a.since(b), Duration::ZERO);
    }
}
