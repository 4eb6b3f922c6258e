use std::time::{Duration, Instant};

/// Capture health inside one session: consecutive acquisition failures and the telemetry
/// timer.
#[derive(Debug)]
pub(crate) struct CaptureHealth {
    consecutive_failures: u32,
    threshold: u32,
    telemetry_interval: Duration,
    last_telemetry: Instant,
}

impl CaptureHealth {
    pub(crate) fn new(threshold: u32, telemetry_interval: Duration, now: Instant) -> Self {
        Self {
            consecutive_failures: 0,
            threshold: threshold.max(1),
            telemetry_interval,
            last_telemetry: now,
        }
    }

    /// Count one failure. Returns true when the threshold is reached, in which case the
    /// counter has already been reset to zero.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.consecutive_failures = 0;
            return true;
        }
        false
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    #[cfg(test)]
    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// True at most once per telemetry interval of wall time.
    pub(crate) fn telemetry_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_telemetry) > self.telemetry_interval {
            self.last_telemetry = now;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_fires_once_per_window() {
        let mut health = CaptureHealth::new(5, Duration::from_secs(5), Instant::now());
        let fired: Vec<bool> = (0..10).map(|_| health.record_failure()).collect();
        assert_eq!(
            fired,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[test]
    fn success_resets_the_run() {
        let mut health = CaptureHealth::new(5, Duration::from_secs(5), Instant::now());
        for _ in 0..4 {
            assert!(!health.record_failure());
        }
        health.record_success();
        for _ in 0..4 {
            assert!(!health.record_failure());
        }
        assert_eq!(health.consecutive_failures(), 4);
    }

    #[test]
    fn telemetry_follows_wall_clock() {
        let start = Instant::now();
        let mut health = CaptureHealth::new(5, Duration::from_secs(5), start);
        assert!(!health.telemetry_due(start + Duration::from_secs(1)));
        assert!(!health.telemetry_due(start + Duration::from_secs(5)));
        assert!(health.telemetry_due(start + Duration::from_millis(5_001)));
        assert!(!health.telemetry_due(start + Duration::from_secs(6)));
        assert!(health.telemetry_due(start + Duration::from_secs(11)));
    }
}
