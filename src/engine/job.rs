use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Future;
use futures_timer::Delay;

/// A background job run periodically by an event loop.
#[derive(Debug)]
pub(crate) struct PeriodicJob {
    interval: Duration,
    delay: Delay,
}

impl PeriodicJob {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            delay: Delay::new(interval),
            interval,
        }
    }

    /// Returns `true` if the job is due, rearming the timer for the next
    /// interval.
    pub(crate) fn is_ready(&mut self, cx: &mut Context<'_>) -> bool {
        if Future::poll(Pin::new(&mut self.delay), cx).is_ready() {
            self.delay.reset(self.interval);
            return true;
        }
        false
    }
}
