//! Debounced completion polling.
//!
//! The terminal cannot signal that a turn finished, so callers poll state
//! on an interval, under a ceiling, and only trust a run of idle readings.

use super::state::AgentState;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};

/// Consecutive idle readings needed before a session counts as settled.
pub const SETTLE_READINGS: u32 = 2;

/// Counts consecutive idle readings. Anything other than `Idle` resets it.
#[derive(Debug, Clone)]
pub struct IdleDebouncer {
    required: u32,
    streak: u32,
}

impl Default for IdleDebouncer {
    fn default() -> Self {
        Self::new(SETTLE_READINGS)
    }
}

impl IdleDebouncer {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            streak: 0,
        }
    }

    /// Record a reading; true once the idle streak reaches the threshold.
    pub fn observe(&mut self, state: AgentState) -> bool {
        if state == AgentState::Idle {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
        self.is_settled()
    }

    pub fn is_settled(&self) -> bool {
        self.streak >= self.required
    }
}

/// Timing of one wait loop.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Pause before the ceiling starts counting.
    pub initial_delay: Duration,
    pub interval: Duration,
    pub ceiling: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Settled,
    TimedOut,
}

/// Probe on every tick until the debouncer settles or the ceiling passes.
/// The first probe happens one interval after the initial delay.
pub async fn wait_until_settled<F, Fut>(policy: PollPolicy, mut probe: F) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AgentState>,
{
    sleep(policy.initial_delay).await;

    let start = Instant::now();
    let deadline = start + policy.ceiling;
    let mut ticker = interval_at(start + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut debouncer = IdleDebouncer::default();

    loop {
        tokio::select! {
            biased;
            _ = sleep_until(deadline) => return PollOutcome::TimedOut,
            _ = ticker.tick() => {
                if debouncer.observe(probe().await) {
                    return PollOutcome::Settled;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use AgentState::*;

    fn settles_at(readings: &[AgentState]) -> Option<usize> {
        let mut debouncer = IdleDebouncer::default();
        readings.iter().position(|&s| debouncer.observe(s))
    }

    #[test]
    fn two_consecutive_idles_settle() {
        assert_eq!(settles_at(&[Busy, Idle, Idle]), Some(2));
        assert_eq!(settles_at(&[Idle, Idle, Busy]), Some(1));
    }

    #[test]
    fn single_idle_between_busy_never_settles() {
        assert_eq!(settles_at(&[Busy, Idle, Busy, Idle, Busy]), None);
    }

    #[test]
    fn unknown_breaks_the_streak() {
        assert_eq!(settles_at(&[Idle, Unknown, Idle]), None);
        assert_eq!(settles_at(&[Idle, Unknown, Idle, Idle]), Some(3));
    }

    #[test]
    fn any_sequence_settles_only_after_two_idles() {
        // Exhaustive over short sequences of the three observable states.
        let states = [Idle, Busy, Unknown];
        for len in 1..=6u32 {
            for code in 0..3usize.pow(len) {
                let mut c = code;
                let seq: Vec<AgentState> = (0..len)
                    .map(|_| {
                        let s = states[c % 3];
                        c /= 3;
                        s
                    })
                    .collect();
                if let Some(at) = settles_at(&seq) {
                    assert!(at >= 1);
                    assert_eq!(seq[at], Idle);
                    assert_eq!(seq[at - 1], Idle);
                }
            }
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_millis(500),
            interval: Duration::from_secs(2),
            ceiling: Duration::from_secs(300),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settles_after_busy_phase() {
        let mut readings = VecDeque::from([Busy, Busy, Idle, Busy, Idle, Idle]);
        let started = Instant::now();
        let outcome = wait_until_settled(policy(), || {
            let next = readings.pop_front().unwrap_or(Idle);
            async move { next }
        })
        .await;
        assert_eq!(outcome, PollOutcome::Settled);
        // 500ms warm-up + 6 ticks of 2s.
        assert_eq!(started.elapsed(), Duration::from_millis(12_500));
    }

    #[tokio::test(start_paused = true)]
    async fn never_idle_times_out_at_ceiling() {
        let started = Instant::now();
        let outcome = wait_until_settled(policy(), || async { Unknown }).await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_millis(300_500));
    }
}
