use std::time::Duration;

/// Growth factor applied after a cycle that found nothing to do.
pub const FACTOR: u32 = 4;

/// Adaptive poll interval.
///
/// Starts at `initial`, multiplies by [`FACTOR`] after every idle cycle up to
/// `max`, and drops back to `initial` as soon as a cycle changes something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Sleep before the next cycle.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn record(&mut self, changed: bool) {
        self.current = if changed {
            self.initial
        } else {
            self.current.saturating_mul(FACTOR).min(self.max)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_idle_cycles_grow_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(300));
        let mut seen = vec![backoff.current().as_secs()];
        for _ in 0..6 {
            backoff.record(false);
            seen.push(backoff.current().as_secs());
        }
        assert_eq!(seen, vec![1, 4, 16, 64, 256, 300, 300]);
    }

    #[test]
    fn test_change_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(300));
        backoff.record(false);
        backoff.record(false);
        backoff.record(true);
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn test_cap_below_initial_is_raised() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.current(), Duration::from_secs(10));
        let mut b = backoff;
        b.record(false);
        assert_eq!(b.current(), Duration::from_secs(10));
    }

    proptest! {
        #[test]
        fn prop_idle_strictly_increases_until_cap(
            initial_ms in 1u64..10_000,
            extra_ms in 0u64..1_000_000,
            idle in 1usize..40,
        ) {
            let initial = Duration::from_millis(initial_ms);
            let max = Duration::from_millis(initial_ms + extra_ms);
            let mut backoff = Backoff::new(initial, max);

            for _ in 0..idle {
                let before = backoff.current();
                backoff.record(false);
                let after = backoff.current();
                prop_assert!(after <= max);
                if before < max {
                    prop_assert!(after > before);
                } else {
                    prop_assert_eq!(after, max);
                }
            }

            backoff.record(true);
            prop_assert_eq!(backoff.current(), initial);
        }
    }
}
