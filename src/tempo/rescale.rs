use crate::tempo::map::{Tempo, TempoMap};
use crate::time::MetricTime;

/// Metric-time remapping caused by a tempo change at `change_time` that
/// lasts until the next tempo breakpoint (`next_change_time`).
///
/// Times up to and including the change keep their value. Times inside the
/// affected segment are stretched by `old / new`, later times shift by the
/// segment's change in length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TempoRescale {
    change_time: MetricTime,
    next_change_time: Option<MetricTime>,
    scale: f64,
    shift: i64,
}

impl TempoRescale {
    fn new(
        change_time: MetricTime,
        next_change_time: Option<MetricTime>,
        old: Tempo,
        new: Tempo,
    ) -> Option<Self> {
        if old == new {
            return None;
        }

        let scale =
            old.microseconds_per_quarter_note() as f64 / new.microseconds_per_quarter_note() as f64;
        let mut rescale = Self {
            change_time,
            next_change_time,
            scale,
            shift: 0,
        };
        if let Some(next) = next_change_time {
            rescale.shift = next.units() - rescale.stretch(next).units();
        }
        Some(rescale)
    }

    pub fn change_time(&self) -> MetricTime {
        self.change_time
    }

    pub fn affects(&self, time: MetricTime) -> bool {
        time > self.change_time
    }

    pub fn apply(&self, time: MetricTime) -> MetricTime {
        if !self.affects(time) {
            return time;
        }
        match self.next_change_time {
            Some(next) if time > next => MetricTime::from_units(time.units() - self.shift),
            _ => self.stretch(time),
        }
    }

    fn stretch(&self, time: MetricTime) -> MetricTime {
        let offset = (time.units() - self.change_time.units()) as f64 / self.scale;
        MetricTime::from_units(self.change_time.units() + offset.round() as i64)
    }
}

/// Remapping for setting `tempo` at tick `time`, computed against the map
/// before the change. `None` when the tempo in effect there already equals
/// `tempo`.
pub(crate) fn plan_tempo_insert(map: &TempoMap, time: u64, tempo: Tempo) -> Option<TempoRescale> {
    let old = map.tempo_at(time);
    let next = map.next_tempo_change_after(time).map(|t| map.to_metric(t));
    TempoRescale::new(map.to_metric(time), next, old, tempo)
}

/// Remapping for removing the tempo breakpoint at tick `time`, together with
/// the tempo that takes over there.
pub(crate) fn plan_tempo_remove(map: &TempoMap, time: u64) -> Option<(TempoRescale, Tempo)> {
    let old = map.tempo_change_at(time)?;
    let new = map.tempo_before(time);
    let next = map.next_tempo_change_after(time).map(|t| map.to_metric(t));
    TempoRescale::new(map.to_metric(time), next, old, new).map(|rescale| (rescale, new))
}
