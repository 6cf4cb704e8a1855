use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Signed media time with microsecond precision.
///
/// `TimeDelta::INFINITE` stands for an unbounded duration (live streams).
/// Arithmetic saturates so that infinite values stay infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeDelta(i64);

impl TimeDelta {
    pub const ZERO: TimeDelta = TimeDelta(0);
    pub const INFINITE: TimeDelta = TimeDelta(i64::MAX);

    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000))
    }

    /// Converts a floating point second count, rounding to the nearest
    /// microsecond. Non-finite or out of range input maps to `INFINITE`.
    pub fn from_secs_f64(secs: f64) -> Self {
        let micros = (secs * 1_000_000.0).round();
        if !micros.is_finite() || micros >= i64::MAX as f64 {
            return Self::INFINITE;
        }
        if micros <= i64::MIN as f64 {
            return Self(i64::MIN);
        }
        Self(micros as i64)
    }

    #[inline]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Whole milliseconds, truncated toward zero.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / 1_000
    }

    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    #[inline]
    pub const fn is_infinite(&self) -> bool {
        self.0 == i64::MAX
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl Add for TimeDelta {
    type Output = TimeDelta;

    fn add(self, rhs: TimeDelta) -> TimeDelta {
        if self.is_infinite() || rhs.is_infinite() {
            return TimeDelta::INFINITE;
        }
        TimeDelta(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for TimeDelta {
    fn add_assign(&mut self, rhs: TimeDelta) {
        *self = *self + rhs;
    }
}

impl Sub for TimeDelta {
    type Output = TimeDelta;

    fn sub(self, rhs: TimeDelta) -> TimeDelta {
        if self.is_infinite() {
            return TimeDelta::INFINITE;
        }
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<i64> for TimeDelta {
    type Output = TimeDelta;

    fn mul(self, rhs: i64) -> TimeDelta {
        if self.is_infinite() {
            return TimeDelta::INFINITE;
        }
        TimeDelta(self.0.saturating_mul(rhs))
    }
}

impl Neg for TimeDelta {
    type Output = TimeDelta;

    fn neg(self) -> TimeDelta {
        TimeDelta(self.0.saturating_neg())
    }
}

impl fmt::Display for TimeDelta {
    /// Milliseconds, with a fractional part only when needed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            return f.write_str("inf");
        }
        let sub = (self.0 % 1_000).unsigned_abs();
        if sub == 0 {
            write!(f, "{}", self.0 / 1_000)
        } else {
            let sign = if self.0 < 0 { "-" } else { "" };
            write!(f, "{}{}.{:03}", sign, (self.0 / 1_000).unsigned_abs(), sub)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(TimeDelta::from_millis(46).as_micros(), 46_000);
        assert_eq!(TimeDelta::from_secs(2).as_millis(), 2_000);
        assert_eq!(TimeDelta::from_secs_f64(0.0235).as_micros(), 23_500);
    }

    #[test]
    fn test_infinite_saturates() {
        let inf = TimeDelta::INFINITE;
        assert!((inf + TimeDelta::from_millis(5)).is_infinite());
        assert!((inf - TimeDelta::from_millis(5)).is_infinite());
        assert!((inf * 2).is_infinite());
        assert!(TimeDelta::from_secs_f64(f64::INFINITY).is_infinite());
        assert!(TimeDelta::from_millis(5) < inf);
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeDelta::from_millis(132).to_string(), "132");
        assert_eq!(TimeDelta::from_micros(1_500).to_string(), "1.500");
        assert_eq!(TimeDelta::from_micros(-2_250).to_string(), "-2.250");
        assert_eq!(TimeDelta::INFINITE.to_string(), "inf");
    }

    #[test]
    fn test_negative() {
        let t = TimeDelta::from_millis(10) - TimeDelta::from_millis(25);
        assert!(t.is_negative());
        assert_eq!(t, -TimeDelta::from_millis(15));
    }
}
