//! Fixed-rate tick scheduling on the monotonic clock
//!
//! Deadlines advance by whole periods from the first one, so a slow tick
//! does not shift every later tick. When the loop wakes more than a full
//! period late the missed deadlines are skipped and reported.

use log::warn;
use std::time::Duration;
use tokio::time::Instant;

/// What happened on one wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Ticks run so far, including this one
    pub tick: u64,
    /// How late the wake-up was against its deadline
    pub drift: Duration,
    /// Deadlines that passed without running a tick
    pub skipped: u64,
}

#[derive(Debug)]
pub struct TickScheduler {
    period: Duration,
    next_deadline: Instant,
    tick: u64,
    skipped_total: u64,
    max_drift: Duration,
}

impl TickScheduler {
    /// First deadline is one period after `start`
    pub fn new(tick_rate: u32, start: Instant) -> Self {
        let period = Duration::from_nanos(1_000_000_000 / u64::from(tick_rate.max(1)));
        Self {
            period,
            next_deadline: start + period,
            tick: 0,
            skipped_total: 0,
            max_drift: Duration::ZERO,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    /// Largest drift seen since the last call
    pub fn take_max_drift(&mut self) -> Duration {
        std::mem::take(&mut self.max_drift)
    }

    /// Accounts for a wake-up at `now` and schedules the next deadline
    pub fn on_wake(&mut self, now: Instant) -> TickInfo {
        let drift = now.saturating_duration_since(self.next_deadline);
        let skipped = (drift.as_nanos() / self.period.as_nanos()) as u64;

        self.tick += 1;
        self.skipped_total += skipped;
        self.max_drift = self.max_drift.max(drift);
        self.next_deadline += self.period * (skipped as u32 + 1);

        if skipped > 0 {
            warn!(
                "Tick {} ran {:?} late, skipped {} tick(s)",
                self.tick, drift, skipped
            );
        }
        TickInfo {
            tick: self.tick,
            drift,
            skipped,
        }
    }

    /// Sleeps until the next deadline
    pub async fn wait(&mut self) -> TickInfo {
        tokio::time::sleep_until(self.next_deadline).await;
        self.on_wake(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_rate() {
        let scheduler = TickScheduler::new(120, Instant::now());
        assert_eq!(scheduler.period(), Duration::from_nanos(8_333_333));

        let scheduler = TickScheduler::new(0, Instant::now());
        assert_eq!(scheduler.period(), Duration::from_secs(1));
    }

    #[test]
    fn test_on_time_wake_keeps_cadence() {
        let start = Instant::now();
        let mut scheduler = TickScheduler::new(100, start);
        let period = scheduler.period();

        let info = scheduler.on_wake(start + period);
        assert_eq!(
            info,
            TickInfo {
                tick: 1,
                drift: Duration::ZERO,
                skipped: 0
            }
        );
        assert_eq!(scheduler.next_deadline(), start + period * 2);
    }

    #[test]
    fn test_small_drift_does_not_shift_deadlines() {
        let start = Instant::now();
        let mut scheduler = TickScheduler::new(100, start);
        let period = scheduler.period();

        let late = Duration::from_millis(3);
        let info = scheduler.on_wake(start + period + late);
        assert_eq!(info.drift, late);
        assert_eq!(info.skipped, 0);
        assert_eq!(scheduler.next_deadline(), start + period * 2);
        assert_eq!(scheduler.take_max_drift(), late);
        assert_eq!(scheduler.take_max_drift(), Duration::ZERO);
    }

    #[test]
    fn test_long_stall_reports_skipped_ticks() {
        let start = Instant::now();
        let mut scheduler = TickScheduler::new(100, start);
        let period = scheduler.period();

        let info = scheduler.on_wake(start + period * 4 + Duration::from_millis(1));
        assert_eq!(info.skipped, 3);
        assert_eq!(scheduler.skipped_total(), 3);
        assert_eq!(scheduler.next_deadline(), start + period * 5);

        let info = scheduler.on_wake(start + period * 5);
        assert_eq!(info.tick, 2);
        assert_eq!(info.skipped, 0);
    }

    #[tokio::test]
    async fn test_wait_sleeps_until_deadline() {
        let start = Instant::now();
        let mut scheduler = TickScheduler::new(200, start);
        let info = scheduler.wait().await;
        assert!(Instant::now() >= start + scheduler.period());
        assert_eq!(info.tick, 1);
    }
}
