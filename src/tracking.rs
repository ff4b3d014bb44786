//! Per-channel program, pitch bend and controller history, used to bring
//! the output in line with the timeline after a jump.

use std::collections::BTreeMap;

use tracing::trace;

use crate::events::{Metadata, MidiEvent};

const CHANNELS: usize = 16;
const DEFAULT_PROGRAM: u8 = 0;
const DEFAULT_CONTROL_VALUE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TrackedParameter {
    Program,
    PitchValue,
    ControlValue,
}

impl TrackedParameter {
    pub const ALL: [TrackedParameter; 3] = [
        TrackedParameter::Program,
        TrackedParameter::PitchValue,
        TrackedParameter::ControlValue,
    ];
}

#[derive(Clone)]
struct ValueChange<V> {
    value: V,
    metadata: Option<Metadata>,
}

/// Values keyed by tick time, plus the value most recently sent.
#[derive(Clone)]
struct ValueTimeline<V> {
    changes: BTreeMap<u64, Vec<ValueChange<V>>>,
    current: Option<V>,
    default: V,
}

impl<V: Copy + PartialEq> ValueTimeline<V> {
    fn new(default: V) -> Self {
        Self {
            changes: BTreeMap::new(),
            current: None,
            default,
        }
    }

    fn record(&mut self, time: u64, value: V, metadata: Option<Metadata>) {
        self.changes
            .entry(time)
            .or_default()
            .push(ValueChange { value, metadata });
    }

    fn forget(&mut self, time: u64, value: V) {
        let Some(changes) = self.changes.get_mut(&time) else {
            return;
        };
        if let Some(position) = changes.iter().position(|c| c.value == value) {
            changes.remove(position);
        }
        if changes.is_empty() {
            self.changes.remove(&time);
        }
    }

    /// The value to send so the output matches the timeline just before
    /// `time`. Nothing when a change sits exactly at `time` (the tick will
    /// play it), when the output already has that value, or when nothing was
    /// ever sent and the value is the default.
    fn catch_up(&self, time: u64) -> Option<(V, Option<Metadata>)> {
        if self.changes.contains_key(&time) {
            return None;
        }

        let (value, metadata) = self
            .changes
            .range(..time)
            .next_back()
            .and_then(|(_, changes)| changes.last())
            .map(|c| (c.value, c.metadata.clone()))
            .unwrap_or((self.default, None));

        if self.current == Some(value) {
            return None;
        }
        if self.current.is_none() && value == self.default {
            return None;
        }
        Some((value, metadata))
    }
}

#[derive(Clone)]
pub(crate) struct ParameterTrackers {
    programs: Vec<ValueTimeline<u8>>,
    pitch_values: Vec<ValueTimeline<u16>>,
    control_values: Vec<BTreeMap<u8, ValueTimeline<u8>>>,
}

impl Default for ParameterTrackers {
    fn default() -> Self {
        Self {
            programs: vec![ValueTimeline::new(DEFAULT_PROGRAM); CHANNELS],
            pitch_values: vec![ValueTimeline::new(MidiEvent::PITCH_BEND_CENTER); CHANNELS],
            control_values: vec![BTreeMap::new(); CHANNELS],
        }
    }
}

impl ParameterTrackers {
    /// Adds a timeline event to the history.
    pub fn record(&mut self, event: &MidiEvent, time: u64, metadata: Option<Metadata>) {
        if !tracked_channel(event) {
            return;
        }
        match *event {
            MidiEvent::ProgramChange { channel, program } => {
                self.programs[channel as usize].record(time, program, metadata)
            }
            MidiEvent::PitchBend { channel, value } => {
                self.pitch_values[channel as usize].record(time, value, metadata)
            }
            MidiEvent::ControlChange {
                channel,
                control,
                value,
            } => self.control_values[channel as usize]
                .entry(control)
                .or_insert_with(|| ValueTimeline::new(DEFAULT_CONTROL_VALUE))
                .record(time, value, metadata),
            _ => {}
        }
    }

    pub fn forget(&mut self, event: &MidiEvent, time: u64) {
        if !tracked_channel(event) {
            return;
        }
        match *event {
            MidiEvent::ProgramChange { channel, program } => {
                self.programs[channel as usize].forget(time, program)
            }
            MidiEvent::PitchBend { channel, value } => {
                self.pitch_values[channel as usize].forget(time, value)
            }
            MidiEvent::ControlChange {
                channel,
                control,
                value,
            } => {
                if let Some(timeline) = self.control_values[channel as usize].get_mut(&control) {
                    timeline.forget(time, value);
                }
            }
            _ => {}
        }
    }

    /// Notes a value that was just sent to the output.
    pub fn sent(&mut self, event: &MidiEvent) {
        if !tracked_channel(event) {
            return;
        }
        match *event {
            MidiEvent::ProgramChange { channel, program } => {
                self.programs[channel as usize].current = Some(program)
            }
            MidiEvent::PitchBend { channel, value } => {
                self.pitch_values[channel as usize].current = Some(value)
            }
            MidiEvent::ControlChange {
                channel,
                control,
                value,
            } => {
                self.control_values[channel as usize]
                    .entry(control)
                    .or_insert_with(|| ValueTimeline::new(DEFAULT_CONTROL_VALUE))
                    .current = Some(value)
            }
            _ => {}
        }
    }

    /// Events that bring the output to the tracked state at `time`.
    pub fn catch_up(
        &self,
        time: u64,
        parameters: &[TrackedParameter],
    ) -> Vec<(MidiEvent, Option<Metadata>)> {
        let mut events = Vec::new();
        for parameter in parameters {
            for channel in 0..CHANNELS as u8 {
                match parameter {
                    TrackedParameter::Program => {
                        if let Some((program, metadata)) =
                            self.programs[channel as usize].catch_up(time)
                        {
                            events.push((MidiEvent::program_change(channel, program), metadata));
                        }
                    }
                    TrackedParameter::PitchValue => {
                        if let Some((value, metadata)) =
                            self.pitch_values[channel as usize].catch_up(time)
                        {
                            events.push((MidiEvent::pitch_bend(channel, value), metadata));
                        }
                    }
                    TrackedParameter::ControlValue => {
                        for (control, timeline) in &self.control_values[channel as usize] {
                            if let Some((value, metadata)) = timeline.catch_up(time) {
                                events.push((
                                    MidiEvent::control_change(channel, *control, value),
                                    metadata,
                                ));
                            }
                        }
                    }
                }
            }
        }

        if !events.is_empty() {
            trace!(time, count = events.len(), "tracked parameters out of sync");
        }
        events
    }
}

fn tracked_channel(event: &MidiEvent) -> bool {
    event.channel().is_some_and(|channel| (channel as usize) < CHANNELS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[TrackedParameter] = &TrackedParameter::ALL;

    fn events(trackers: &ParameterTrackers, time: u64) -> Vec<MidiEvent> {
        trackers
            .catch_up(time, ALL)
            .into_iter()
            .map(|(e, _)| e)
            .collect()
    }

    #[test]
    fn jump_past_program_change_sends_it_once() {
        let mut trackers = ParameterTrackers::default();
        trackers.record(&MidiEvent::program_change(0, 5), 0, None);

        assert_eq!(events(&trackers, 480), vec![MidiEvent::program_change(0, 5)]);
        trackers.sent(&MidiEvent::program_change(0, 5));
        assert!(events(&trackers, 480).is_empty());
    }

    #[test]
    fn change_exactly_at_target_is_left_to_the_tick() {
        let mut trackers = ParameterTrackers::default();
        trackers.record(&MidiEvent::program_change(0, 5), 100, None);
        assert!(events(&trackers, 100).is_empty());
    }

    #[test]
    fn default_is_restored_only_after_something_was_sent() {
        let mut trackers = ParameterTrackers::default();
        trackers.record(&MidiEvent::pitch_bend(3, 0), 100, None);

        assert!(events(&trackers, 50).is_empty());

        trackers.sent(&MidiEvent::pitch_bend(3, 0));
        assert_eq!(events(&trackers, 50), vec![MidiEvent::pitch_bend(3, 8192)]);
    }

    #[test]
    fn forgotten_change_is_not_replayed() {
        let mut trackers = ParameterTrackers::default();
        let cc = MidiEvent::control_change(1, 7, 90);
        trackers.record(&cc, 10, None);
        trackers.forget(&cc, 10);
        assert!(events(&trackers, 100).is_empty());
    }

    #[test]
    fn only_requested_parameters_are_caught_up() {
        let mut trackers = ParameterTrackers::default();
        trackers.record(&MidiEvent::program_change(0, 5), 0, None);
        trackers.record(&MidiEvent::control_change(0, 7, 90), 0, None);

        let caught: Vec<_> = trackers
            .catch_up(10, &[TrackedParameter::ControlValue])
            .into_iter()
            .map(|(e, _)| e)
            .collect();
        assert_eq!(caught, vec![MidiEvent::control_change(0, 7, 90)]);
    }
}
