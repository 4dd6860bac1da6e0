/// Counts consecutive failed health checks. Up to `threshold` in a row are
/// tolerated; one more means the engine is killed.
#[derive(Debug, Clone)]
pub(super) struct HealthTracker {
    threshold: u32,
    failures: u32,
}

impl HealthTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            failures: 0,
        }
    }

    pub fn record_ok(&mut self) {
        self.failures = 0;
    }

    /// Record a failure. Returns true when the engine should be killed; the
    /// counter starts over afterwards.
    pub fn record_failure(&mut self) -> bool {
        self.failures += 1;
        if self.failures > self.threshold {
            self.failures = 0;
            return true;
        }
        false
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kills_once_the_threshold_is_exceeded() {
        let mut h = HealthTracker::new(3);
        assert!(!h.record_failure());
        assert!(!h.record_failure());
        h.record_ok();
        assert!(!h.record_failure());
        assert!(!h.record_failure());
        assert!(!h.record_failure());
        assert_eq!(h.failures(), 3);
        assert!(h.record_failure());
        assert_eq!(h.failures(), 0);
    }

    #[test]
    fn zero_threshold_kills_on_the_first_failure() {
        let mut h = HealthTracker::new(0);
        assert!(h.record_failure());
    }
}
