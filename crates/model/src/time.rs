//! Rational media time.
//!
//! A [`MediaTime`] is `value / timescale` seconds. Arithmetic between times
//! with different timescales rescales both operands to a common timescale
//! first, so sums of frame durations stay exact.

use std::cmp::Ordering;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point in media time, `value / timescale` seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a time. A zero timescale is treated as 1.
    pub const fn new(value: i64, timescale: u32) -> Self {
        Self {
            value,
            timescale: if timescale == 0 { 1 } else { timescale },
        }
    }

    /// Nearest representable time for `secs` in the given timescale.
    pub fn from_seconds(secs: f64, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        Self::new((secs * timescale as f64).round() as i64, timescale)
    }

    pub fn seconds(self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    pub fn is_zero(self) -> bool {
        self.value == 0
    }

    pub fn is_negative(self) -> bool {
        self.value < 0
    }

    /// Express this time in another timescale, rounding to the nearest unit.
    pub fn convert_scale(self, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return self;
        }
        let scaled = self.value as i128 * timescale as i128;
        let den = self.timescale as i128;
        let rounded = if scaled >= 0 {
            (scaled + den / 2) / den
        } else {
            (scaled - den / 2) / den
        };
        Self::new(rounded as i64, timescale)
    }

    /// `self × multiplier`, exact.
    pub fn multiply(self, multiplier: i64) -> Self {
        Self::new(self.value.saturating_mul(multiplier), self.timescale)
    }

    /// Half of this time, exact when the value is even, otherwise in a doubled timescale.
    pub fn halved(self) -> Self {
        if self.value % 2 == 0 {
            Self::new(self.value / 2, self.timescale)
        } else {
            match self.timescale.checked_mul(2) {
                Some(ts) => Self::new(self.value, ts),
                None => Self::new(self.value / 2, self.timescale),
            }
        }
    }

    pub fn max(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }

    pub fn min(self, other: Self) -> Self {
        if other < self {
            other
        } else {
            self
        }
    }

    /// Common timescale for two operands: their least common multiple when it
    /// fits, otherwise the larger of the two.
    fn common_timescale(a: u32, b: u32) -> u32 {
        if a == b {
            return a;
        }
        let lcm = a as u64 / gcd(a as u64, b as u64) * b as u64;
        u32::try_from(lcm).unwrap_or(a.max(b))
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        let ts = Self::common_timescale(self.timescale, rhs.timescale);
        let a = self.convert_scale(ts);
        let b = rhs.convert_scale(ts);
        MediaTime::new(a.value.saturating_add(b.value), ts)
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        let ts = Self::common_timescale(self.timescale, rhs.timescale);
        let a = self.convert_scale(ts);
        let b = rhs.convert_scale(ts);
        MediaTime::new(a.value.saturating_sub(b.value), ts)
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl std::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({:.3}s)", self.value, self.timescale, self.seconds())
    }
}

/// Move an insertion offset forward by a duration.
pub fn advance(offset: MediaTime, by: MediaTime) -> MediaTime {
    offset + by
}

/// A span of media time. `duration` is never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TimeRange {
    /// Create a range; `None` when the duration is negative.
    pub fn new(start: MediaTime, duration: MediaTime) -> Option<Self> {
        if duration.is_negative() {
            return None;
        }
        Some(Self { start, duration })
    }

    /// Range from `start` up to `end`; `None` when `end` precedes `start`.
    pub fn from_start_end(start: MediaTime, end: MediaTime) -> Option<Self> {
        Self::new(start, end - start)
    }

    /// Range starting at zero.
    pub fn from_zero(duration: MediaTime) -> Option<Self> {
        Self::new(MediaTime::ZERO, duration)
    }

    pub fn end(&self) -> MediaTime {
        self.start + self.duration
    }

    pub fn is_empty(&self) -> bool {
        self.duration.is_zero()
    }

    pub fn contains_time(&self, t: MediaTime) -> bool {
        t >= self.start && t < self.end()
    }

    /// Whether `other` lies entirely within this range.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }

    /// The part of this range that also lies within `other`.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end().min(other.end());
        TimeRange::from_start_end(start, end)
    }
}
