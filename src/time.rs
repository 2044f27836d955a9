//! Time APIs for obtaining the current time and calculating with points in time and durations.
//!
//! These APIs are made for the mesh stack and are not meant to be general-purpose. They have
//! millisecond resolution (the granularity of the SoC tick counter the stack is driven by) and use
//! 32-bit arithmetic throughout.

use core::fmt;
use core::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// A duration with millisecond resolution.
///
/// This can represent a maximum duration of about 49 days. Overflows will result in a panic, but
/// shouldn't happen since the mesh stack doesn't deal with durations that large.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(u32);

impl Duration {
    /// Creates a [`Duration`] from a number of milliseconds.
    pub const fn from_millis(millis: u32) -> Self {
        Duration(millis)
    }

    /// Creates a [`Duration`] representing a number of seconds.
    pub const fn from_secs(secs: u16) -> Self {
        Duration(secs as u32 * 1_000)
    }

    /// Returns the number of whole seconds that fit in `self`.
    pub fn whole_secs(&self) -> u32 {
        self.0 / 1_000
    }

    /// Returns the number of milliseconds represented by `self`.
    pub fn as_millis(&self) -> u32 {
        self.0
    }

    /// Returns the fractional part of milliseconds in `self`.
    pub fn subsec_millis(&self) -> u32 {
        self.0 % 1_000
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Duration(self.0.checked_add(rhs.0).expect("duration overflow"))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Duration(self.0.checked_sub(rhs.0).expect("duration underflow"))
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<u32> for Duration {
    type Output = Self;

    fn mul(self, rhs: u32) -> Self {
        Duration(self.0.checked_mul(rhs).expect("duration overflow"))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1000 {
            let (secs, subsec_millis) = (self.whole_secs(), self.subsec_millis());
            if subsec_millis == 0 {
                write!(f, "{}s", secs)
            } else {
                write!(f, "{}.{:03}s", secs, subsec_millis)
            }
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// A point in time, relative to an unspecified epoch (usually boot).
///
/// This has millisecond resolution and may wrap around after about 49 days. Apart from the
/// wraparound, it is monotonic.
///
/// `Instant`s are obtained from an implementation of [`Timer`]. `Instant`s created from different
/// [`Timer`] instances (even when using the same implementation) are not compatible, and mixing
/// them in operations causes unspecified results.
#[derive(Copy, Clone)]
pub struct Instant(u32);

impl Instant {
    /// Creates an `Instant` from raw milliseconds since an arbitrary implementation-defined
    /// reference point.
    ///
    /// This should only be called from a [`Timer`] implementation.
    pub fn from_raw_millis(millis: u32) -> Self {
        Instant(millis)
    }

    /// Returns the raw value from which this `Instant` was created.
    pub fn raw_millis(&self) -> u32 {
        self.0
    }

    /// Calculates the duration of time that has passed between `earlier` and `self`.
    ///
    /// Both `self` and `earlier` must have been created by the same [`Timer`], or the result of
    /// this function will be unspecified. The subtraction wraps, so the result is only meaningful
    /// when the instants are less than one wraparound period apart.
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.wrapping_sub(earlier.0))
    }
}

/// [`Instant`]s can be subtracted, which computes the [`Duration`] between the rhs and lhs using
/// [`Instant::duration_since`].
impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.duration_since(rhs)
    }
}

/// A [`Duration`] can be added to an [`Instant`], moving the [`Instant`] forwards in time.
impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, d: Duration) -> Self {
        Instant(self.0.wrapping_add(d.as_millis()))
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, d: Duration) {
        *self = *self + d;
    }
}

/// A [`Duration`] can be subtracted from an [`Instant`], moving the [`Instant`] backwards in time.
impl Sub<Duration> for Instant {
    type Output = Self;

    fn sub(self, d: Duration) -> Self {
        Instant(self.0.wrapping_sub(d.as_millis()))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1000 {
            let (secs, subsec_millis) = (self.0 / 1000, self.0 % 1000);
            if subsec_millis == 0 {
                write!(f, "{}s", secs)
            } else {
                write!(f, "{}.{:03}s", secs, subsec_millis)
            }
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

/// Trait for time providers.
///
/// The hardware interface has to provide an implementation of `Timer` to the stack. The
/// implementation must have millisecond accuracy.
///
/// This trait can also be implemented by a mock timer for testing.
pub trait Timer {
    /// Obtain the current time as an [`Instant`].
    ///
    /// The [`Instant`]s returned by this function must never move backwards in time, except when
    /// the underlying value wraps around.
    fn now(&self) -> Instant;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_arithmetic() {
        let d = Duration::from_secs(3) + Duration::from_millis(500);
        assert_eq!(d.as_millis(), 3_500);
        assert_eq!(d * 2, Duration::from_millis(7_000));
        assert!(Duration::from_millis(2_999) < Duration::from_secs(3));
    }

    #[test]
    fn instant_wraps_around() {
        let before = Instant::from_raw_millis(u32::max_value() - 10);
        let after = before + Duration::from_millis(25);
        assert_eq!(after.duration_since(before), Duration::from_millis(25));
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Duration::from_millis(250)), "250ms");
        assert_eq!(format!("{}", Duration::from_millis(3_000)), "3s");
        assert_eq!(format!("{}", Duration::from_millis(3_250)), "3.250s");
    }
}
