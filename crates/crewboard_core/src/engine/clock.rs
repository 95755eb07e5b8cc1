//! Lamport clock for `issued_at` values and remote timestamp arbitration.

/// Logical clock local to one engine instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    last: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock for a local mutation and returns its timestamp.
    pub fn tick(&mut self) -> u64 {
        self.last = self.last.saturating_add(1);
        self.last
    }

    /// Folds in a timestamp observed from elsewhere.
    pub fn witness(&mut self, timestamp: u64) {
        self.last = self.last.max(timestamp);
    }

    pub fn now(&self) -> u64 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::LamportClock;

    #[test]
    fn tick_is_strictly_increasing_after_witness() {
        let mut clock = LamportClock::new();
        assert_eq!(clock.tick(), 1);
        clock.witness(9);
        assert_eq!(clock.tick(), 10);
        clock.witness(3);
        assert_eq!(clock.tick(), 11);
        assert_eq!(clock.now(), 11);
    }
}
