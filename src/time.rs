//! Time primitives: instants and injectable time sources.
//!
//! The scheduler never reads the system clock directly. All eligibility
//! decisions go through a [`TimeSource`], so production code runs on a
//! monotonic [`WallClock`] while tests drive a [`VirtualClock`] whose time
//! only advances when told to.
//!
//! # Example
//!
//! ```
//! use delayq::time::{Time, TimeSource, VirtualClock};
//! use std::time::Duration;
//!
//! let clock = VirtualClock::new();
//! assert_eq!(clock.now(), Time::ZERO);
//!
//! clock.advance(Duration::from_secs(1));
//! assert_eq!(clock.now(), Time::from_secs(1));
//! ```

use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A scheduler instant, in nanoseconds since an arbitrary epoch.
///
/// For a [`WallClock`] the epoch is the clock's creation; for a
/// [`VirtualClock`] it is whatever the test decides. Only differences
/// between instants produced by the same source are meaningful.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The zero instant (epoch).
    pub const ZERO: Self = Self(0);

    /// The maximum representable instant.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates an instant from nanoseconds since the epoch.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates an instant from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates an instant from seconds since the epoch.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the instant as nanoseconds since the epoch.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Adds a duration, saturating at [`Time::MAX`].
    #[must_use]
    pub fn saturating_add(self, d: Duration) -> Self {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// Returns the duration from `earlier` to `self`, or zero if `self`
    /// is not later than `earlier`.
    ///
    /// This is the clamp that makes past deadlines immediately eligible
    /// rather than an error.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

/// Supplies the current instant to the scheduler.
///
/// Implementations must be monotonically non-decreasing: a later call to
/// [`now`](TimeSource::now) never returns an earlier instant.
pub trait TimeSource: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Time;
}

/// Monotonic wall-clock time source for production use.
///
/// Backed by [`std::time::Instant`]; the epoch is the moment the clock
/// was created.
#[derive(Debug)]
pub struct WallClock {
    epoch: Instant,
}

impl WallClock {
    /// Creates a wall clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let elapsed = self.epoch.elapsed();
        Time::from_nanos(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }
}

/// Virtual time source for deterministic tests.
///
/// Time stands still until [`advance`](VirtualClock::advance),
/// [`advance_to`](VirtualClock::advance_to), or [`set`](VirtualClock::set)
/// moves it. `advance_to` with a past target is a no-op, preserving
/// monotonicity even under concurrent advancement.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// Creates a virtual clock at [`Time::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a virtual clock starting at the given instant.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Advances time by the given duration.
    pub fn advance(&self, d: Duration) {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        self.now.fetch_add(nanos, Ordering::Release);
    }

    /// Advances time to the given instant; no-op if already past it.
    pub fn advance_to(&self, time: Time) {
        let target = time.as_nanos();
        loop {
            let current = self.now.load(Ordering::Acquire);
            if current >= target {
                break;
            }
            if self
                .now
                .compare_exchange_weak(current, target, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Sets the current instant, forwards or backwards.
    pub fn set(&self, time: Time) {
        self.now.store(time.as_nanos(), Ordering::Release);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}
