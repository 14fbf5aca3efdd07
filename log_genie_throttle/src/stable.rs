//! Stable throttle
//!
//! The whole per-second budget becomes available at the start of each second
//! and is drawn down by every permit. Output is bursty within a second but
//! never exceeds the configured rate across any second boundary.

use std::num::NonZeroU32;

use crate::TICKS_PER_SECOND;

use super::{Clock, RealClock};

/// Errors produced by [`Stable`].
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum Error {
    /// Requested capacity is greater than maximum allowed capacity.
    #[error("Capacity")]
    Capacity,
}

#[derive(Debug)]
/// A throttle that refills its budget once per second.
pub struct Stable<C = RealClock> {
    valve: Valve,
    clock: C,
}

impl<C> Stable<C>
where
    C: Clock + Send + Sync,
{
    pub(crate) async fn wait(&mut self) -> Result<(), Error> {
        loop {
            let slop: u64 = self.valve.request(self.clock.ticks_elapsed(), 1)?;
            if slop == 0 {
                break;
            }
            self.clock.wait(slop).await;
        }
        Ok(())
    }

    pub(crate) fn with_clock(ticks_per_second: NonZeroU32, clock: C) -> Self {
        Self {
            valve: Valve::new(ticks_per_second),
            clock,
        }
    }
}

/// The non-async interior to `Stable`.
#[derive(Debug)]
struct Valve {
    /// Budget granted at the start of every second.
    maximum_capacity: u32,
    /// Budget left in the current second.
    capacity: u32,
    /// Index of the current second.
    interval: u64,
}

impl Valve {
    fn new(maximum_capacity: NonZeroU32) -> Self {
        let maximum_capacity = maximum_capacity.get();
        Self {
            capacity: maximum_capacity,
            maximum_capacity,
            interval: 0,
        }
    }

    /// Return how many ticks the caller must wait before `capacity_request`
    /// can be granted, zero if it was granted now. `ticks_elapsed` is
    /// absolute.
    fn request(&mut self, ticks_elapsed: u64, capacity_request: u32) -> Result<u64, Error> {
        if capacity_request == 0 {
            return Ok(0);
        }

        if capacity_request > self.maximum_capacity {
            return Err(Error::Capacity);
        }

        let current_interval = ticks_elapsed / TICKS_PER_SECOND;
        if current_interval > self.interval {
            self.capacity = self.maximum_capacity;
            self.interval = current_interval;
        }

        if capacity_request <= self.capacity {
            self.capacity -= capacity_request;
            Ok(0)
        } else {
            Ok(TICKS_PER_SECOND - (ticks_elapsed % TICKS_PER_SECOND))
        }
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroU32;

    use proptest::{collection, prelude::*};

    use crate::{
        TICKS_PER_SECOND,
        stable::{Error, Valve},
    };

    fn granted_never_exceeds_rate_inner(
        maximum_capacity: u32,
        requests: Vec<NonZeroU32>,
    ) -> Result<(), proptest::test_runner::TestCaseError> {
        let mut valve = Valve::new(NonZeroU32::new(maximum_capacity).unwrap());
        let maximum_capacity = u64::from(maximum_capacity);

        let mut ticks_elapsed: u64 = 0;
        let mut granted: u64 = 0;
        let mut interval: u64 = 0;

        let mut slop = 0;
        for request in requests {
            ticks_elapsed += slop;

            let current_interval = ticks_elapsed / TICKS_PER_SECOND;
            if interval < current_interval {
                prop_assert!(granted <= maximum_capacity);
                granted = 0;
                interval = current_interval;
            }

            match valve.request(ticks_elapsed, request.get()) {
                Ok(0) => {
                    granted += u64::from(request.get());
                    slop = 0;
                }
                Ok(s) => slop = s,
                Err(Error::Capacity) => {
                    prop_assert!(u64::from(request.get()) > maximum_capacity);
                }
            }
            prop_assert!(granted <= maximum_capacity);
        }
        Ok(())
    }

    #[test]
    fn exhausted_budget_waits_for_next_second() {
        let mut valve = Valve::new(NonZeroU32::new(2).unwrap());
        assert_eq!(valve.request(10, 1).unwrap(), 0);
        assert_eq!(valve.request(20, 1).unwrap(), 0);
        assert_eq!(valve.request(30, 1).unwrap(), TICKS_PER_SECOND - 30);
        assert_eq!(valve.request(TICKS_PER_SECOND, 1).unwrap(), 0);
    }

    fn cap_requests(max: u32) -> impl Strategy<Value = Vec<NonZeroU32>> {
        collection::vec((1..max).prop_map(|i| NonZeroU32::new(i).unwrap()), 1..100)
    }

    proptest! {
        #[test]
        fn granted_never_exceeds_rate(
            maximum_capacity in (1..u32::from(u16::MAX)),
            requests in cap_requests(u32::from(u16::MAX))
        ) {
            granted_never_exceeds_rate_inner(maximum_capacity, requests)?;
        }
    }
}
