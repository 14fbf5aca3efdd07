//! The log-genie rate source
//!
//! log-genie emits logs at a configured number of ticks per second. This
//! library turns that rate into a stream of permits: every call to
//! [`Throttle::wait`] returns once the next log may be produced.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use tokio::time::{self, Duration, Instant};

pub mod paced;
pub mod stable;

/// Ticks per second of every [`Clock`]. One tick is one microsecond.
pub const TICKS_PER_SECOND: u64 = 1_000_000;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration of the rate source.
pub enum Config {
    /// No waiting at all, produce as fast as the caller can.
    AllOut,
    /// Permits evenly spaced across each second, like a wall-clock ticker.
    #[default]
    Paced,
    /// The full per-second budget is available at the start of each second.
    Stable,
}

/// Errors produced by [`Throttle`].
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum Error {
    /// Stable
    #[error(transparent)]
    Stable(#[from] stable::Error),
}

#[async_trait]
/// The `Clock` used by every throttle
pub trait Clock {
    /// The number of ticks elapsed since the clock was created
    fn ticks_elapsed(&self) -> u64;
    /// Wait for `ticks` amount of time
    async fn wait(&self, ticks: u64);
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to tokio's clock.
///
/// Pausing tokio's clock in tests pauses this clock too.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for RealClock {
    /// Return the number of ticks since `Clock` was created.
    ///
    /// # Panics
    ///
    /// Function will panic if the number of ticks elapsed is greater than u64::MAX.
    #[allow(clippy::cast_possible_truncation)]
    fn ticks_elapsed(&self) -> u64 {
        let now = Instant::now();
        let ticks_since: u128 = now.duration_since(self.start).as_micros();
        assert!(
            ticks_since <= u128::from(u64::MAX),
            "584,554 years elapsed since last call!"
        );
        ticks_since as u64
    }

    async fn wait(&self, ticks: u64) {
        time::sleep(Duration::from_micros(ticks)).await;
    }
}

/// The throttle mechanism
#[derive(Debug)]
pub enum Throttle<C = RealClock> {
    /// Evenly spaced permits
    Paced(paced::Paced<C>),
    /// Per-second budget
    Stable(stable::Stable<C>),
    /// No waiting
    AllOut,
}

impl Throttle<RealClock> {
    /// Create a new instance of `Throttle` with a real-time clock
    #[must_use]
    pub fn new_with_config(config: Config, ticks_per_second: NonZeroU32) -> Self {
        Self::with_clock(config, ticks_per_second, RealClock::default())
    }
}

impl<C> Throttle<C>
where
    C: Clock + Sync + Send,
{
    /// Create a new instance of `Throttle` driven by `clock`
    #[must_use]
    pub fn with_clock(config: Config, ticks_per_second: NonZeroU32, clock: C) -> Self {
        match config {
            Config::Paced => Throttle::Paced(paced::Paced::with_clock(ticks_per_second, clock)),
            Config::Stable => Throttle::Stable(stable::Stable::with_clock(ticks_per_second, clock)),
            Config::AllOut => Throttle::AllOut,
        }
    }

    /// Wait for the next permit.
    ///
    /// # Errors
    ///
    /// See documentation in `Error`
    #[inline]
    pub async fn wait(&mut self) -> Result<(), Error> {
        match self {
            Throttle::Paced(inner) => inner.wait().await,
            Throttle::Stable(inner) => inner.wait().await?,
            Throttle::AllOut => (),
        }

        Ok(())
    }
}
