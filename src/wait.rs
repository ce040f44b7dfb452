use std::time::Duration;

use crossbeam_utils::Backoff;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStrategy {
    /// True busy-spinning. Burns a core for the lowest wake-up latency.
    BusySpin,
    /// Give up the scheduling quantum between polls.
    #[default]
    Yield,
    /// Spin with exponential backoff, then yield once the backoff saturates.
    Backoff,
    /// Low-priority periodic polling.
    Sleep(Duration),
}

/// Per-thread idle state for a [`WaitStrategy`].
pub struct Idler {
    strategy: WaitStrategy,
    backoff: Backoff,
}

impl Idler {
    pub fn new(strategy: WaitStrategy) -> Self {
        Self {
            strategy,
            backoff: Backoff::new(),
        }
    }

    pub fn strategy(&self) -> WaitStrategy {
        self.strategy
    }

    /// Called after a poll that made no progress.
    pub fn idle(&mut self) {
        match self.strategy {
            WaitStrategy::BusySpin => std::hint::spin_loop(),
            WaitStrategy::Yield => std::thread::yield_now(),
            WaitStrategy::Backoff => {
                if self.backoff.is_completed() {
                    std::thread::yield_now();
                } else {
                    self.backoff.snooze();
                }
            }
            WaitStrategy::Sleep(duration) => std::thread::sleep(duration),
        }
    }

    /// Called after a poll that made progress.
    pub fn reset(&mut self) {
        self.backoff.reset();
    }
}
