use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{Metadata, MidiEvent, NoteId, ObjectId, TimedEvent};

/// A note in ticks. Notes paired from raw note-on/off events remember those
/// events, and removing either of them breaks the pairing again.
#[derive(Clone)]
pub struct Note {
    id: ObjectId,
    pub time: u64,
    pub length: u64,
    pub channel: u8,
    pub note_number: u8,
    pub velocity: u8,
    pub off_velocity: u8,
    pub metadata: Option<Metadata>,
    source: Option<NoteSource>,
}

#[derive(Debug, Clone)]
pub(crate) struct NoteSource {
    pub on: TimedEvent,
    pub off: TimedEvent,
}

impl Note {
    pub const DEFAULT_VELOCITY: u8 = 100;

    pub fn new(note_number: u8, time: u64, length: u64) -> Self {
        Self {
            id: ObjectId::next(),
            time,
            length,
            channel: 0,
            note_number,
            velocity: Self::DEFAULT_VELOCITY,
            off_velocity: 0,
            metadata: None,
            source: None,
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_off_velocity(mut self, off_velocity: u8) -> Self {
        self.off_velocity = off_velocity;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Pairs a note-on with the note-off that ends it.
    pub(crate) fn from_events(on: TimedEvent, off: TimedEvent) -> Self {
        let (channel, note_number, velocity) = match on.event {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => (channel, note, velocity),
            _ => (0, 0, 0),
        };
        let off_velocity = match off.event {
            MidiEvent::NoteOff { velocity, .. } => velocity,
            _ => 0,
        };

        Self {
            id: ObjectId::next(),
            time: on.time,
            length: off.time.saturating_sub(on.time),
            channel,
            note_number,
            velocity,
            off_velocity,
            metadata: None,
            source: Some(NoteSource { on, off }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn end_time(&self) -> u64 {
        self.time.saturating_add(self.length)
    }

    pub fn note_id(&self) -> NoteId {
        NoteId::new(self.channel, self.note_number)
    }

    pub(crate) fn source(&self) -> Option<&NoteSource> {
        self.source.as_ref()
    }

    pub(crate) fn on_metadata(&self) -> Option<Metadata> {
        match &self.source {
            Some(source) => source.on.metadata.clone(),
            None => self.metadata.clone(),
        }
    }

    pub(crate) fn off_metadata(&self) -> Option<Metadata> {
        match &self.source {
            Some(source) => source.off.metadata.clone(),
            None => self.metadata.clone(),
        }
    }

    pub(crate) fn playback_data(&self) -> NotePlaybackData {
        NotePlaybackData {
            note_number: self.note_number,
            velocity: self.velocity,
            off_velocity: self.off_velocity,
            channel: self.channel,
        }
    }

    /// Same note with pitch, velocities and channel taken from `data`.
    pub(crate) fn with_playback_data(&self, data: &NotePlaybackData) -> Self {
        Self {
            note_number: data.note_number,
            velocity: data.velocity,
            off_velocity: data.off_velocity,
            channel: data.channel,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Note")
            .field("id", &self.id)
            .field("time", &self.time)
            .field("length", &self.length)
            .field("channel", &self.channel)
            .field("note_number", &self.note_number)
            .field("velocity", &self.velocity)
            .field("off_velocity", &self.off_velocity)
            .finish()
    }
}

/// What is actually sent for a note. The note callback may return a
/// different value to transpose or re-voice a note at playback time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotePlaybackData {
    pub note_number: u8,
    pub velocity: u8,
    pub off_velocity: u8,
    pub channel: u8,
}

impl NotePlaybackData {
    pub fn note_on_event(&self) -> MidiEvent {
        MidiEvent::note_on(self.channel, self.note_number, self.velocity)
    }

    pub fn note_off_event(&self) -> MidiEvent {
        MidiEvent::note_off(self.channel, self.note_number, self.off_velocity)
    }
}

#[derive(Debug, Clone)]
pub struct Chord {
    id: ObjectId,
    pub notes: Vec<Note>,
}

impl Chord {
    pub fn new(notes: Vec<Note>) -> Self {
        Self {
            id: ObjectId::next(),
            notes,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn time(&self) -> u64 {
        self.notes.iter().map(|n| n.time).min().unwrap_or(0)
    }
}

/// An object that expands into several timed events, like a registered
/// parameter change.
pub trait CompositeObject: fmt::Debug + Send + Sync {
    fn id(&self) -> ObjectId;

    fn time(&self) -> u64;

    fn timed_events(&self) -> Vec<TimedEvent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisteredParameterKind {
    PitchBendSensitivity,
    ChannelFineTuning,
    ChannelCoarseTuning,
    TuningProgramChange,
    TuningBankSelect,
    ModulationDepthRange,
}

impl RegisteredParameterKind {
    fn number(self) -> u16 {
        match self {
            RegisteredParameterKind::PitchBendSensitivity => 0,
            RegisteredParameterKind::ChannelFineTuning => 1,
            RegisteredParameterKind::ChannelCoarseTuning => 2,
            RegisteredParameterKind::TuningProgramChange => 3,
            RegisteredParameterKind::TuningBankSelect => 4,
            RegisteredParameterKind::ModulationDepthRange => 5,
        }
    }
}

/// RPN change, sent as CC 101/100 (parameter) then CC 6/38 (data entry).
#[derive(Debug, Clone)]
pub struct RegisteredParameter {
    id: ObjectId,
    pub time: u64,
    pub channel: u8,
    pub kind: RegisteredParameterKind,
    pub data_msb: u8,
    pub data_lsb: Option<u8>,
}

impl RegisteredParameter {
    pub const PARAMETER_MSB: u8 = 101;
    pub const PARAMETER_LSB: u8 = 100;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const DATA_ENTRY_LSB: u8 = 38;

    pub fn new(
        time: u64,
        channel: u8,
        kind: RegisteredParameterKind,
        data_msb: u8,
        data_lsb: Option<u8>,
    ) -> Self {
        Self {
            id: ObjectId::next(),
            time,
            channel,
            kind,
            data_msb,
            data_lsb,
        }
    }
}

impl CompositeObject for RegisteredParameter {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn time(&self) -> u64 {
        self.time
    }

    fn timed_events(&self) -> Vec<TimedEvent> {
        let number = self.kind.number();
        let mut controls = vec![
            (Self::PARAMETER_MSB, (number >> 7) as u8 & 0x7F),
            (Self::PARAMETER_LSB, number as u8 & 0x7F),
            (Self::DATA_ENTRY_MSB, self.data_msb),
        ];
        if let Some(lsb) = self.data_lsb {
            controls.push((Self::DATA_ENTRY_LSB, lsb));
        }

        controls
            .into_iter()
            .map(|(control, value)| {
                TimedEvent::new(
                    self.time,
                    MidiEvent::control_change(self.channel, control, value),
                )
            })
            .collect()
    }
}

/// Anything the playback can schedule.
#[derive(Debug, Clone)]
pub enum TimedObject {
    Event(TimedEvent),
    Note(Note),
    Chord(Chord),
    Composite(Arc<dyn CompositeObject>),
}

impl TimedObject {
    pub fn id(&self) -> ObjectId {
        match self {
            TimedObject::Event(event) => event.id(),
            TimedObject::Note(note) => note.id(),
            TimedObject::Chord(chord) => chord.id(),
            TimedObject::Composite(composite) => composite.id(),
        }
    }

    pub fn time(&self) -> u64 {
        match self {
            TimedObject::Event(event) => event.time,
            TimedObject::Note(note) => note.time,
            TimedObject::Chord(chord) => chord.time(),
            TimedObject::Composite(composite) => composite.time(),
        }
    }
}

impl From<TimedEvent> for TimedObject {
    fn from(event: TimedEvent) -> Self {
        TimedObject::Event(event)
    }
}

impl From<Note> for TimedObject {
    fn from(note: Note) -> Self {
        TimedObject::Note(note)
    }
}

impl From<Chord> for TimedObject {
    fn from(chord: Chord) -> Self {
        TimedObject::Chord(chord)
    }
}

impl From<RegisteredParameter> for TimedObject {
    fn from(parameter: RegisteredParameter) -> Self {
        TimedObject::Composite(Arc::new(parameter))
    }
}

/// Hook that turns an object into timed events before the built-in
/// expansion runs. Returning `None` falls back to the built-in expansion.
pub trait ObjectExpander: Send + Sync {
    fn expand(&self, object: &TimedObject) -> Option<Vec<TimedEvent>>;
}
