use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wall-clock position in 100 ns units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MetricTime(i64);

impl MetricTime {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(i64::MAX);
    pub const UNITS_PER_SECOND: i64 = 10_000_000;
    const NANOS_PER_UNIT: u128 = 100;

    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    pub const fn units(self) -> i64 {
        self.0
    }

    pub fn from_duration(duration: Duration) -> Self {
        let units = duration.as_nanos() / Self::NANOS_PER_UNIT;
        Self(units.min(i64::MAX as u128) as i64)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(10_000))
    }

    pub fn as_duration(self) -> Duration {
        let units = self.0.max(0);
        let secs = units / Self::UNITS_PER_SECOND;
        let nanos = (units % Self::UNITS_PER_SECOND) * 100;
        Duration::new(secs as u64, nanos as u32)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0).max(0))
    }
}

impl Add for MetricTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for MetricTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

/// A time or length in one of the three representations the playback
/// understands. Converted through the tempo map of the playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSpan {
    Metric(Duration),
    /// Ticks.
    Midi(u64),
    BarBeat { bars: u64, beats: u64, ticks: u64 },
}

impl TimeSpan {
    pub fn kind(&self) -> TimeSpanKind {
        match self {
            TimeSpan::Metric(_) => TimeSpanKind::Metric,
            TimeSpan::Midi(_) => TimeSpanKind::Midi,
            TimeSpan::BarBeat { .. } => TimeSpanKind::BarBeat,
        }
    }

    pub fn millis(millis: u64) -> Self {
        TimeSpan::Metric(Duration::from_millis(millis))
    }
}

impl From<Duration> for TimeSpan {
    fn from(duration: Duration) -> Self {
        TimeSpan::Metric(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSpanKind {
    Metric,
    Midi,
    BarBeat,
}
