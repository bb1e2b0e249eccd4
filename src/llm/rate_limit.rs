//! Sliding-window call budget.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Admits at most `max_calls` attempts in any trailing `window`.
///
/// Pruning, counting and recording happen under one lock, so concurrent callers
/// never overshoot the budget. A caller over budget sleeps until the oldest
/// attempt leaves the window.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    history: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(60))
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Block until an attempt is admitted and record it. Returns the time spent waiting.
    pub fn acquire(&self) -> Duration {
        let started = Instant::now();
        loop {
            let wait = {
                let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
                let now = Instant::now();
                self.prune(&mut history, now);

                if history.len() < self.max_calls {
                    history.push_back(now);
                    return started.elapsed();
                }

                history
                    .front()
                    .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                    .unwrap_or_default()
            };
            thread::sleep(wait.max(Duration::from_millis(1)));
        }
    }

    /// Attempts currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        self.prune(&mut history, Instant::now());
        history.len()
    }

    fn prune(&self, history: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = history.front() {
            if now.duration_since(oldest) >= self.window {
                history.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_up_to_budget_without_waiting() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.acquire() < Duration::from_millis(50));
        }
        assert_eq!(limiter.in_window(), 3);
    }

    #[test]
    fn over_budget_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_millis(200));
        limiter.acquire();
        limiter.acquire();

        let waited = limiter.acquire();
        assert!(waited >= Duration::from_millis(150), "waited {:?}", waited);
    }

    #[test]
    fn window_expiry_frees_slots() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        limiter.acquire();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(limiter.in_window(), 0);
    }

    #[test]
    fn zero_budget_is_clamped_to_one() {
        let limiter = RateLimiter::per_minute(0);
        assert_eq!(limiter.max_calls(), 1);
    }

    #[test]
    fn concurrent_callers_never_exceed_budget() {
        let limiter = Arc::new(RateLimiter::new(4, Duration::from_millis(300)));
        let started = Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    limiter.acquire();
                    Instant::now()
                })
            })
            .collect();

        let mut admitted: Vec<Duration> = handles
            .into_iter()
            .map(|h| h.join().unwrap().duration_since(started))
            .collect();
        admitted.sort();

        let immediate = admitted
            .iter()
            .filter(|d| **d < Duration::from_millis(250))
            .count();
        assert_eq!(immediate, 4);
    }
}
