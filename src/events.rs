use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{PlaybackError, Result};

/// Opaque caller data attached to events, notes and snap points. It travels
/// with the event it belongs to and is handed back in notifications.
pub type Metadata = Arc<dyn Any + Send + Sync>;

/// Identity of a timed object. Clones keep the id, so a clone of an object
/// can be used to remove or change the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// (channel, note number). Identifies a sounding note on the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId {
    pub channel: u8,
    pub note: u8,
}

impl NoteId {
    pub fn new(channel: u8, note: u8) -> Self {
        Self { channel, note }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// 14-bit value, 8192 is the centre.
    PitchBend { channel: u8, value: u16 },
    ChannelPressure { channel: u8, pressure: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    SetTempo { microseconds_per_quarter_note: u32 },
    TimeSignature { numerator: u8, denominator: u8 },
    Marker(String),
    Text(String),
    SysEx(Vec<u8>),
}

impl MidiEvent {
    pub const PITCH_BEND_CENTER: u16 = 8192;

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        MidiEvent::NoteOn {
            channel,
            note,
            velocity,
        }
    }

    pub fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        MidiEvent::NoteOff {
            channel,
            note,
            velocity,
        }
    }

    pub fn control_change(channel: u8, control: u8, value: u8) -> Self {
        MidiEvent::ControlChange {
            channel,
            control,
            value,
        }
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        MidiEvent::ProgramChange { channel, program }
    }

    pub fn pitch_bend(channel: u8, value: u16) -> Self {
        MidiEvent::PitchBend { channel, value }
    }

    pub fn set_tempo(microseconds_per_quarter_note: u32) -> Self {
        MidiEvent::SetTempo {
            microseconds_per_quarter_note,
        }
    }

    pub fn time_signature(numerator: u8, denominator: u8) -> Self {
        MidiEvent::TimeSignature {
            numerator,
            denominator,
        }
    }

    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ChannelPressure { channel, .. }
            | MidiEvent::PolyPressure { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Note identity of note-on and note-off events.
    pub fn note_id(&self) -> Option<NoteId> {
        match *self {
            MidiEvent::NoteOn { channel, note, .. } | MidiEvent::NoteOff { channel, note, .. } => {
                Some(NoteId::new(channel, note))
            }
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiEvent::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self, MidiEvent::NoteOff { .. })
    }

    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            MidiEvent::SetTempo { .. }
                | MidiEvent::TimeSignature { .. }
                | MidiEvent::Marker(_)
                | MidiEvent::Text(_)
        )
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(channel) = self.channel() {
            if channel > 15 {
                return Err(PlaybackError::InvalidChannel(channel));
            }
        }

        match *self {
            MidiEvent::NoteOn { note, velocity, .. } | MidiEvent::NoteOff { note, velocity, .. } => {
                data_byte("note", note)?;
                data_byte("velocity", velocity)
            }
            MidiEvent::ControlChange { control, value, .. } => {
                data_byte("control", control)?;
                data_byte("control value", value)
            }
            MidiEvent::ProgramChange { program, .. } => data_byte("program", program),
            MidiEvent::PitchBend { value, .. } if value > 0x3FFF => {
                Err(PlaybackError::InvalidPitchValue(value))
            }
            MidiEvent::ChannelPressure { pressure, .. } => data_byte("pressure", pressure),
            MidiEvent::PolyPressure { note, pressure, .. } => {
                data_byte("note", note)?;
                data_byte("pressure", pressure)
            }
            MidiEvent::SetTempo {
                microseconds_per_quarter_note,
            } if microseconds_per_quarter_note == 0 => {
                Err(PlaybackError::InvalidTempo(microseconds_per_quarter_note))
            }
            MidiEvent::TimeSignature {
                numerator,
                denominator,
            } if numerator == 0 || !denominator.is_power_of_two() => {
                Err(PlaybackError::InvalidTimeSignature {
                    numerator,
                    denominator,
                })
            }
            _ => Ok(()),
        }
    }

    /// Ordering among events sharing a timestamp: meta events, then other
    /// channel and system events, then note-offs, then note-ons. The off of a
    /// zero-length note sorts after its own on.
    pub(crate) fn rank(&self, zero_length_note: bool) -> u8 {
        match self {
            e if e.is_meta() => 0,
            MidiEvent::NoteOff { .. } if zero_length_note => 4,
            MidiEvent::NoteOff { .. } => 2,
            MidiEvent::NoteOn { .. } => 3,
            _ => 1,
        }
    }
}

fn data_byte(name: &'static str, value: u8) -> Result<()> {
    if value > 127 {
        return Err(PlaybackError::InvalidDataByte { name, value });
    }
    Ok(())
}

/// An event placed at an absolute time in ticks.
#[derive(Clone)]
pub struct TimedEvent {
    id: ObjectId,
    pub time: u64,
    pub event: MidiEvent,
    pub metadata: Option<Metadata>,
}

impl TimedEvent {
    pub fn new(time: u64, event: MidiEvent) -> Self {
        Self {
            id: ObjectId::next(),
            time,
            event,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl fmt::Debug for TimedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedEvent")
            .field("id", &self.id)
            .field("time", &self.time)
            .field("event", &self.event)
            .field("metadata", &self.metadata.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_out_of_range_values() {
        assert_eq!(
            MidiEvent::note_on(16, 60, 100).validate(),
            Err(PlaybackError::InvalidChannel(16))
        );
        assert_eq!(
            MidiEvent::note_on(0, 128, 100).validate(),
            Err(PlaybackError::InvalidDataByte {
                name: "note",
                value: 128
            })
        );
        assert_eq!(
            MidiEvent::pitch_bend(0, 16384).validate(),
            Err(PlaybackError::InvalidPitchValue(16384))
        );
        assert!(MidiEvent::pitch_bend(0, 16383).validate().is_ok());
        assert!(MidiEvent::time_signature(3, 6).validate().is_err());
        assert!(MidiEvent::set_tempo(0).validate().is_err());
    }

    #[test]
    fn same_time_rank() {
        let meta = MidiEvent::set_tempo(500_000).rank(false);
        let cc = MidiEvent::control_change(0, 7, 100).rank(false);
        let off = MidiEvent::note_off(0, 60, 0).rank(false);
        let on = MidiEvent::note_on(0, 60, 100).rank(false);
        let zero_off = MidiEvent::note_off(0, 60, 0).rank(true);
        assert!(meta < cc && cc < off && off < on && on < zero_off);
    }

    #[test]
    fn clones_share_identity() {
        let event = TimedEvent::new(10, MidiEvent::program_change(0, 5));
        let other = TimedEvent::new(10, MidiEvent::program_change(0, 5));
        assert_eq!(event.clone().id(), event.id());
        assert_ne!(event.id(), other.id());
    }
}
