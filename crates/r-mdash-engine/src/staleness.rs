//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Advisory alert raised when no sample has advanced the cursor for longer
/// than `threshold`. Never halts playback.
#[derive(Debug, Clone)]
pub struct StalenessDetector {
    threshold: Duration,
    last_arrival: Instant,
    alerting: bool,
}

impl StalenessDetector {
    pub const DEFAULT_THRESHOLD: Duration = Duration::from_millis(10_000);

    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last_arrival: now,
            alerting: false,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_alerting(&self) -> bool {
        self.alerting
    }

    pub fn last_arrival(&self) -> Instant {
        self.last_arrival
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_arrival)
    }

    /// Note a cursor advance. Clears a raised alert immediately.
    pub fn record_arrival(&mut self, now: Instant) {
        self.last_arrival = now;
        if self.alerting {
            self.alerting = false;
            info!("telemetry flowing again; staleness alert cleared");
        }
    }

    /// Restart the clock without counting it as an arrival, e.g. when replay
    /// resumes after a pause.
    pub fn rearm(&mut self, now: Instant) {
        self.last_arrival = now;
        self.alerting = false;
    }

    /// Re-evaluate the alert at `now` and return it.
    pub fn poll(&mut self, now: Instant) -> bool {
        let elapsed = self.elapsed(now);
        let stale = elapsed > self.threshold;
        if stale && !self.alerting {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "no telemetry within staleness threshold"
            );
        }
        self.alerting = stale;
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raises_only_after_threshold_is_exceeded() {
        let start = Instant::now();
        let mut detector = StalenessDetector::new(Duration::from_secs(10), start);
        assert!(!detector.poll(start + Duration::from_secs(10)));
        assert!(detector.poll(start + Duration::from_millis(10_001)));
        assert!(detector.is_alerting());
    }

    #[test]
    fn arrival_clears_alert() {
        let start = Instant::now();
        let mut detector = StalenessDetector::new(Duration::from_secs(10), start);
        assert!(detector.poll(start + Duration::from_secs(11)));
        detector.record_arrival(start + Duration::from_secs(11));
        assert!(!detector.is_alerting());
        assert!(!detector.poll(start + Duration::from_secs(12)));
    }

    #[test]
    fn rearm_restarts_clock() {
        let start = Instant::now();
        let mut detector = StalenessDetector::new(Duration::from_secs(1), start);
        assert!(detector.poll(start + Duration::from_secs(5)));
        detector.rearm(start + Duration::from_secs(5));
        assert!(!detector.is_alerting());
        assert_eq!(detector.elapsed(start + Duration::from_secs(5)), Duration::ZERO);
        assert!(!detector.poll(start + Duration::from_millis(5_900)));
    }

    #[test]
    fn clock_before_last_arrival_is_not_stale() {
        let start = Instant::now() + Duration::from_secs(60);
        let mut detector = StalenessDetector::new(Duration::from_secs(1), start);
        assert!(!detector.poll(start - Duration::from_secs(30)));
    }
}
