use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{error::SpectraError, Result};

/// Fixed-period pacing clock.
///
/// Deadlines advance by exactly one period per tick so the long-run rate does
/// not drift with sleep jitter. When a caller falls more than one period
/// behind, the schedule restarts from "now" instead of bursting to catch up,
/// and the miss is counted as a slip.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    next: Option<Instant>,
    ticks: u64,
    slips: u64,
}

impl Cadence {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: None,
            ticks: 0,
            slips: 0,
        }
    }

    pub fn from_hz(rate: f64) -> Result<Self> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(SpectraError::config(format!(
                "cadence rate must be positive, got {rate}"
            )));
        }
        Ok(Self::new(Duration::from_secs_f64(1.0 / rate)))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Changes the period from the next tick on.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn slips(&self) -> u64 {
        self.slips
    }

    /// Forgets the schedule; the next tick fires immediately.
    pub fn reset(&mut self) {
        self.next = None;
    }

    /// Records a tick at `now` and returns how long to sleep before it is due.
    pub fn delay_at(&mut self, now: Instant) -> Duration {
        self.ticks += 1;
        let due = match self.next {
            None => now,
            Some(due) if now.saturating_duration_since(due) > self.period => {
                self.slips += 1;
                now
            }
            Some(due) => due,
        };
        self.next = Some(due + self.period);
        due.saturating_duration_since(now)
    }

    /// Sleeps until the next deadline.
    pub fn wait(&mut self) {
        let delay = self.delay_at(Instant::now());
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn first_tick_is_immediate() {
        let mut cadence = Cadence::new(10 * MS);
        assert_eq!(cadence.delay_at(Instant::now()), Duration::ZERO);
        assert_eq!(cadence.ticks(), 1);
    }

    #[test]
    fn deadlines_advance_by_one_period() {
        let start = Instant::now();
        let mut cadence = Cadence::new(10 * MS);
        cadence.delay_at(start);
        assert_eq!(cadence.delay_at(start + 3 * MS), 7 * MS);
        // The second deadline was start + 10ms regardless of when we woke.
        assert_eq!(cadence.delay_at(start + 12 * MS), 8 * MS);
        assert_eq!(cadence.slips(), 0);
    }

    #[test]
    fn late_ticks_fire_immediately() {
        let start = Instant::now();
        let mut cadence = Cadence::new(10 * MS);
        cadence.delay_at(start);
        assert_eq!(cadence.delay_at(start + 15 * MS), Duration::ZERO);
        assert_eq!(cadence.slips(), 0);
        assert_eq!(cadence.delay_at(start + 20 * MS), Duration::ZERO);
    }

    #[test]
    fn falling_far_behind_restarts_the_schedule() {
        let start = Instant::now();
        let mut cadence = Cadence::new(10 * MS);
        cadence.delay_at(start);
        assert_eq!(cadence.delay_at(start + 100 * MS), Duration::ZERO);
        assert_eq!(cadence.slips(), 1);
        assert_eq!(cadence.delay_at(start + 101 * MS), 9 * MS);
    }

    #[test]
    fn period_changes_apply_to_the_next_deadline() {
        let start = Instant::now();
        let mut cadence = Cadence::new(10 * MS);
        cadence.delay_at(start);
        cadence.set_period(20 * MS);
        assert_eq!(cadence.delay_at(start), 10 * MS);
        assert_eq!(cadence.delay_at(start + 10 * MS), 20 * MS);
    }

    #[test]
    fn invalid_rates_are_rejected() {
        assert!(Cadence::from_hz(0.0).is_err());
        assert!(Cadence::from_hz(f64::NAN).is_err());
        assert_eq!(Cadence::from_hz(50.0).unwrap().period(), 20 * MS);
    }

    #[test]
    fn wait_paces_real_time() {
        let mut cadence = Cadence::new(5 * MS);
        let start = Instant::now();
        for _ in 0..4 {
            cadence.wait();
        }
        assert!(start.elapsed() >= 15 * MS);
    }
}
