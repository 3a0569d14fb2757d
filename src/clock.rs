//! Lamport logical clock shared by the mutual exclusion and snapshot protocols.

use crate::Timestamp;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LamportClock {
    time: Timestamp,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Advances the clock for a locally originated send and returns the value to embed.
    pub fn tick(&mut self) -> Timestamp {
        self.time += 1;
        self.time
    }

    /// Merges a received timestamp: `time = max(time, remote) + 1`.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.time = self.time.max(remote) + 1;
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_increments() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.time(), 2);
    }

    #[test]
    fn observe_jumps_past_remote() {
        let mut clock = LamportClock::new();
        clock.tick();
        assert_eq!(clock.observe(10), 11);
    }

    #[test]
    fn observe_older_timestamp_still_advances() {
        let mut clock = LamportClock::new();
        clock.observe(7);
        assert_eq!(clock.observe(3), 9);
    }
}
