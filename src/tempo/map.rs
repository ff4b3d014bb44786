//! Tick/metric conversions over piecewise-constant tempo and time-signature
//! lines.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::error::{PlaybackError, Result};
use crate::time::{MetricTime, TimeSpan, TimeSpanKind};

/// Microseconds per quarter note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tempo(u32);

impl Tempo {
    pub const DEFAULT: Tempo = Tempo(500_000);

    pub fn new(microseconds_per_quarter_note: u32) -> Result<Self> {
        if microseconds_per_quarter_note == 0 {
            return Err(PlaybackError::InvalidTempo(0));
        }
        Ok(Self(microseconds_per_quarter_note))
    }

    pub fn from_bpm(bpm: f64) -> Result<Self> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(PlaybackError::InvalidArgument(format!("invalid bpm {bpm}")));
        }
        Self::new((60_000_000.0 / bpm).round() as u32)
    }

    pub fn microseconds_per_quarter_note(self) -> u32 {
        self.0
    }

    pub fn bpm(self) -> f64 {
        60_000_000.0 / self.0 as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl TimeSignature {
    pub const DEFAULT: TimeSignature = TimeSignature {
        numerator: 4,
        denominator: 4,
    };

    pub fn new(numerator: u8, denominator: u8) -> Result<Self> {
        if numerator == 0 || !denominator.is_power_of_two() {
            return Err(PlaybackError::InvalidTimeSignature {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    fn beat_length(self, ticks_per_quarter_note: u16) -> u64 {
        (ticks_per_quarter_note as u64 * 4 / self.denominator as u64).max(1)
    }

    fn bar_length(self, ticks_per_quarter_note: u16) -> u64 {
        self.beat_length(ticks_per_quarter_note) * self.numerator as u64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Tempo and time-signature lines over ticks. A breakpoint is kept only
/// where the value actually changes.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    ticks_per_quarter_note: u16,
    tempo_line: BTreeMap<u64, Tempo>,
    time_signature_line: BTreeMap<u64, TimeSignature>,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self {
            ticks_per_quarter_note: Self::DEFAULT_TICKS_PER_QUARTER_NOTE,
            tempo_line: BTreeMap::new(),
            time_signature_line: BTreeMap::new(),
        }
    }
}

impl TempoMap {
    pub const DEFAULT_TICKS_PER_QUARTER_NOTE: u16 = 480;

    pub fn new(ticks_per_quarter_note: u16) -> Result<Self> {
        if ticks_per_quarter_note == 0 {
            return Err(PlaybackError::InvalidArgument(
                "ticks per quarter note must be positive".into(),
            ));
        }
        Ok(Self {
            ticks_per_quarter_note,
            ..Self::default()
        })
    }

    pub fn with_tempo(mut self, time: u64, tempo: Tempo) -> Self {
        self.set_tempo(time, tempo);
        self
    }

    pub fn with_time_signature(mut self, time: u64, signature: TimeSignature) -> Self {
        self.set_time_signature(time, signature);
        self
    }

    pub fn ticks_per_quarter_note(&self) -> u16 {
        self.ticks_per_quarter_note
    }

    pub fn tempo_at(&self, time: u64) -> Tempo {
        self.tempo_line
            .range(..=time)
            .next_back()
            .map(|(_, tempo)| *tempo)
            .unwrap_or_default()
    }

    pub fn time_signature_at(&self, time: u64) -> TimeSignature {
        self.time_signature_line
            .range(..=time)
            .next_back()
            .map(|(_, signature)| *signature)
            .unwrap_or_default()
    }

    /// Tempo breakpoints in time order.
    pub fn tempo_changes(&self) -> impl Iterator<Item = (u64, Tempo)> + '_ {
        self.tempo_line.iter().map(|(time, tempo)| (*time, *tempo))
    }

    pub fn time_signature_changes(&self) -> impl Iterator<Item = (u64, TimeSignature)> + '_ {
        self.time_signature_line
            .iter()
            .map(|(time, signature)| (*time, *signature))
    }

    pub fn tempo_change_at(&self, time: u64) -> Option<Tempo> {
        self.tempo_line.get(&time).copied()
    }

    pub fn time_signature_change_at(&self, time: u64) -> Option<TimeSignature> {
        self.time_signature_line.get(&time).copied()
    }

    pub fn next_tempo_change_after(&self, time: u64) -> Option<u64> {
        self.tempo_line
            .range((Bound::Excluded(time), Bound::Unbounded))
            .next()
            .map(|(time, _)| *time)
    }

    /// Tempo in effect just before `time`.
    pub fn tempo_before(&self, time: u64) -> Tempo {
        match time.checked_sub(1) {
            Some(previous) => self.tempo_at(previous),
            None => Tempo::DEFAULT,
        }
    }

    pub fn time_signature_before(&self, time: u64) -> TimeSignature {
        match time.checked_sub(1) {
            Some(previous) => self.time_signature_at(previous),
            None => TimeSignature::DEFAULT,
        }
    }

    pub fn set_tempo(&mut self, time: u64, tempo: Tempo) {
        set_value(&mut self.tempo_line, time, tempo, Tempo::DEFAULT);
    }

    pub fn set_time_signature(&mut self, time: u64, signature: TimeSignature) {
        set_value(
            &mut self.time_signature_line,
            time,
            signature,
            TimeSignature::DEFAULT,
        );
    }

    /// Tick time to metric time, rounded half away from zero to 100 ns.
    pub fn to_metric(&self, time: u64) -> MetricTime {
        let tpqn = self.ticks_per_quarter_note as u128;
        let scaled = self.scaled_metric(time);
        let units = (2 * scaled + tpqn) / (2 * tpqn);
        MetricTime::from_units(units.min(i64::MAX as u128) as i64)
    }

    /// Metric time to the nearest tick.
    pub fn to_ticks(&self, time: MetricTime) -> u64 {
        if time <= MetricTime::ZERO {
            return 0;
        }

        let tpqn = self.ticks_per_quarter_note as u128;
        let target = time.units() as u128 * tpqn;

        let mut segment_start = 0u64;
        let mut segment_scaled = 0u128;
        let mut tempo = Tempo::DEFAULT;
        for (&change, &next_tempo) in &self.tempo_line {
            let segment_end_scaled =
                segment_scaled + (change - segment_start) as u128 * units_per_tick(tempo);
            if target < segment_end_scaled {
                break;
            }
            segment_start = change;
            segment_scaled = segment_end_scaled;
            tempo = next_tempo;
        }

        let per_tick = units_per_tick(tempo);
        let ticks = (2 * (target - segment_scaled) + per_tick) / (2 * per_tick);
        segment_start.saturating_add(ticks.min(u64::MAX as u128) as u64)
    }

    pub fn to_metric_span(&self, span: TimeSpan) -> MetricTime {
        match span {
            TimeSpan::Metric(duration) => MetricTime::from_duration(duration),
            other => self.to_metric(self.span_to_ticks(other)),
        }
    }

    pub fn span_to_ticks(&self, span: TimeSpan) -> u64 {
        match span {
            TimeSpan::Metric(duration) => self.to_ticks(MetricTime::from_duration(duration)),
            TimeSpan::Midi(ticks) => ticks,
            TimeSpan::BarBeat { bars, beats, ticks } => self.bar_beat_to_ticks(bars, beats, ticks),
        }
    }

    pub fn from_metric(&self, time: MetricTime, kind: TimeSpanKind) -> TimeSpan {
        match kind {
            TimeSpanKind::Metric => TimeSpan::Metric(time.as_duration()),
            TimeSpanKind::Midi => TimeSpan::Midi(self.to_ticks(time)),
            TimeSpanKind::BarBeat => self.ticks_to_bar_beat(self.to_ticks(time)),
        }
    }

    /// Metric length of `span` when it starts at `start`.
    pub fn length_to_metric(&self, start: MetricTime, span: TimeSpan) -> MetricTime {
        let start_ticks = self.to_ticks(start);
        let Some(ticks) = self.length_in_ticks(start_ticks, span) else {
            return self.to_metric_span(span);
        };
        self.to_metric(start_ticks.saturating_add(ticks))
            .saturating_sub(self.to_metric(start_ticks))
    }

    /// Metric length of `span` when it ends at `end`.
    pub fn length_before_metric(&self, end: MetricTime, span: TimeSpan) -> MetricTime {
        let end_ticks = self.to_ticks(end);
        let Some(ticks) = self.length_in_ticks(end_ticks, span) else {
            return self.to_metric_span(span);
        };
        end.saturating_sub(self.to_metric(end_ticks.saturating_sub(ticks)))
    }

    /// Tick length of a musical span measured with the time signature at
    /// `at`. `None` for metric spans.
    fn length_in_ticks(&self, at: u64, span: TimeSpan) -> Option<u64> {
        match span {
            TimeSpan::Metric(_) => None,
            TimeSpan::Midi(ticks) => Some(ticks),
            TimeSpan::BarBeat { bars, beats, ticks } => {
                let signature = self.time_signature_at(at);
                let tpqn = self.ticks_per_quarter_note;
                Some(bars * signature.bar_length(tpqn) + beats * signature.beat_length(tpqn) + ticks)
            }
        }
    }

    /// Absolute bar/beat position to ticks. A time signature change always
    /// starts a new bar.
    pub fn bar_beat_to_ticks(&self, bars: u64, beats: u64, ticks: u64) -> u64 {
        let tpqn = self.ticks_per_quarter_note;
        let mut remaining_bars = bars;
        let mut position = 0u64;
        let mut signature = TimeSignature::DEFAULT;

        for (&change, &next_signature) in &self.time_signature_line {
            let bar = signature.bar_length(tpqn);
            let segment_bars = (change - position).div_ceil(bar);
            if remaining_bars < segment_bars {
                break;
            }
            remaining_bars -= segment_bars;
            position = change;
            signature = next_signature;
        }

        position
            + remaining_bars * signature.bar_length(tpqn)
            + beats * signature.beat_length(tpqn)
            + ticks
    }

    pub fn ticks_to_bar_beat(&self, time: u64) -> TimeSpan {
        let tpqn = self.ticks_per_quarter_note;
        let mut bars = 0u64;
        let mut position = 0u64;
        let mut signature = TimeSignature::DEFAULT;

        for (&change, &next_signature) in self.time_signature_line.range(..=time) {
            bars += (change - position).div_ceil(signature.bar_length(tpqn));
            position = change;
            signature = next_signature;
        }

        let offset = time - position;
        let bar = signature.bar_length(tpqn);
        let beat = signature.beat_length(tpqn);
        TimeSpan::BarBeat {
            bars: bars + offset / bar,
            beats: offset % bar / beat,
            ticks: offset % bar % beat,
        }
    }

    /// Metric time multiplied by ticks per quarter note, kept exact.
    fn scaled_metric(&self, time: u64) -> u128 {
        let mut scaled = 0u128;
        let mut segment_start = 0u64;
        let mut tempo = Tempo::DEFAULT;
        for (&change, &next_tempo) in self.tempo_line.range(..time) {
            scaled += (change - segment_start) as u128 * units_per_tick(tempo);
            segment_start = change;
            tempo = next_tempo;
        }
        scaled + (time - segment_start) as u128 * units_per_tick(tempo)
    }
}

/// 100 ns units per tick, multiplied by ticks per quarter note.
fn units_per_tick(tempo: Tempo) -> u128 {
    tempo.0 as u128 * 10
}

fn set_value<V: Copy + PartialEq>(line: &mut BTreeMap<u64, V>, time: u64, value: V, default: V) {
    let before = match time.checked_sub(1) {
        Some(previous) => line
            .range(..=previous)
            .next_back()
            .map(|(_, v)| *v)
            .unwrap_or(default),
        None => default,
    };

    if before == value {
        line.remove(&time);
    } else {
        line.insert(time, value);
    }

    let next = line
        .range((Bound::Excluded(time), Bound::Unbounded))
        .next()
        .map(|(t, v)| (*t, *v));
    if let Some((next_time, next_value)) = next {
        if next_value == value {
            line.remove(&next_time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempo(us: u32) -> Tempo {
        Tempo::new(us).unwrap()
    }

    #[test]
    fn default_tempo_maps_a_quarter_note_to_half_a_second() {
        let map = TempoMap::default();
        assert_eq!(map.to_metric(480), MetricTime::from_millis(500));
        assert_eq!(map.to_ticks(MetricTime::from_millis(500)), 480);
        assert_eq!(map.to_metric(100), MetricTime::from_units(1_041_667));
    }

    #[test]
    fn conversion_follows_tempo_changes() {
        let map = TempoMap::default().with_tempo(480, tempo(250_000));
        assert_eq!(map.to_metric(960), MetricTime::from_millis(750));
        assert_eq!(map.to_ticks(MetricTime::from_millis(750)), 960);
        assert_eq!(map.to_ticks(MetricTime::from_millis(250)), 240);
    }

    #[test]
    fn equal_breakpoints_are_dropped() {
        let mut map = TempoMap::default();
        map.set_tempo(0, Tempo::DEFAULT);
        assert_eq!(map.tempo_changes().count(), 0);

        map.set_tempo(100, tempo(400_000));
        map.set_tempo(200, tempo(400_000));
        assert_eq!(map.tempo_changes().collect::<Vec<_>>(), vec![(100, tempo(400_000))]);

        map.set_tempo(100, Tempo::DEFAULT);
        assert_eq!(map.tempo_changes().count(), 0);
    }

    #[test]
    fn bar_beat_round_trip_across_signature_change() {
        let map = TempoMap::default().with_time_signature(1920, TimeSignature::new(3, 4).unwrap());
        assert_eq!(map.bar_beat_to_ticks(1, 0, 0), 1920);
        assert_eq!(map.bar_beat_to_ticks(2, 1, 10), 1920 + 1440 + 480 + 10);
        assert_eq!(
            map.ticks_to_bar_beat(1920 + 1440 + 480 + 10),
            TimeSpan::BarBeat {
                bars: 2,
                beats: 1,
                ticks: 10
            }
        );
    }

    #[test]
    fn bar_length_uses_signature_at_start() {
        let map = TempoMap::default();
        let length = map.length_to_metric(
            MetricTime::ZERO,
            TimeSpan::BarBeat {
                bars: 1,
                beats: 0,
                ticks: 0,
            },
        );
        assert_eq!(length, MetricTime::from_millis(2000));
    }
}
