//! Paced throttle
//!
//! Permits are spaced `1s / rate` apart. A caller that falls behind does not
//! get a burst of catch-up permits: missed ticks are skipped and the schedule
//! continues from the next period boundary.

use std::num::NonZeroU32;

use crate::TICKS_PER_SECOND;

use super::{Clock, RealClock};

#[derive(Debug)]
/// A throttle granting evenly spaced permits.
pub struct Paced<C = RealClock> {
    metronome: Metronome,
    clock: C,
}

impl<C> Paced<C>
where
    C: Clock + Send + Sync,
{
    pub(crate) async fn wait(&mut self) {
        loop {
            let slop = self.metronome.request(self.clock.ticks_elapsed());
            if slop == 0 {
                break;
            }
            self.clock.wait(slop).await;
        }
    }

    pub(crate) fn with_clock(ticks_per_second: NonZeroU32, clock: C) -> Self {
        Self {
            metronome: Metronome::new(ticks_per_second),
            clock,
        }
    }
}

/// The non-async interior to `Paced`.
#[derive(Debug)]
struct Metronome {
    /// Ticks between permits, never zero.
    period: u64,
    /// Absolute tick at which the next permit is due.
    next: u64,
}

impl Metronome {
    fn new(ticks_per_second: NonZeroU32) -> Self {
        let period = (TICKS_PER_SECOND / u64::from(ticks_per_second.get())).max(1);
        Self {
            period,
            next: period,
        }
    }

    /// Return how many ticks the caller must wait for the next permit, zero if
    /// it is granted now.
    fn request(&mut self, ticks_elapsed: u64) -> u64 {
        if ticks_elapsed < self.next {
            return self.next - ticks_elapsed;
        }
        let behind = ticks_elapsed - self.next;
        self.next = ticks_elapsed - (behind % self.period) + self.period;
        0
    }
}
