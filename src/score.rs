//! A score file: tempo map, playback settings and timed objects in RON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};
use crate::events::{MidiEvent, TimedEvent};
use crate::settings::PlaybackSettings;
use crate::tempo::{Tempo, TempoMap, TimeSignature};
use crate::timing::objects::{Chord, Note, RegisteredParameter, RegisteredParameterKind, TimedObject};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreNote {
    pub time: u64,
    pub length: u64,
    pub note: u8,
    #[serde(default)]
    pub channel: u8,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
    #[serde(default)]
    pub off_velocity: u8,
}

fn default_velocity() -> u8 {
    Note::DEFAULT_VELOCITY
}

fn default_ticks_per_quarter_note() -> u16 {
    TempoMap::DEFAULT_TICKS_PER_QUARTER_NOTE
}

impl ScoreNote {
    fn to_note(&self) -> Note {
        Note::new(self.note, self.time, self.length)
            .with_channel(self.channel)
            .with_velocity(self.velocity)
            .with_off_velocity(self.off_velocity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScoreItem {
    Event {
        time: u64,
        event: MidiEvent,
    },
    Note(ScoreNote),
    Chord(Vec<ScoreNote>),
    RegisteredParameter {
        time: u64,
        channel: u8,
        kind: RegisteredParameterKind,
        data_msb: u8,
        #[serde(default)]
        data_lsb: Option<u8>,
    },
}

impl ScoreItem {
    fn to_object(&self) -> TimedObject {
        match self {
            ScoreItem::Event { time, event } => TimedEvent::new(*time, event.clone()).into(),
            ScoreItem::Note(note) => note.to_note().into(),
            ScoreItem::Chord(notes) => Chord::new(notes.iter().map(ScoreNote::to_note).collect()).into(),
            ScoreItem::RegisteredParameter {
                time,
                channel,
                kind,
                data_msb,
                data_lsb,
            } => RegisteredParameter::new(*time, *channel, *kind, *data_msb, *data_lsb).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_ticks_per_quarter_note")]
    pub ticks_per_quarter_note: u16,
    /// (tick, microseconds per quarter note)
    #[serde(default)]
    pub tempo: Vec<(u64, u32)>,
    /// (tick, numerator, denominator)
    #[serde(default)]
    pub time_signatures: Vec<(u64, u8, u8)>,
    #[serde(default)]
    pub settings: PlaybackSettings,
    #[serde(default)]
    pub items: Vec<ScoreItem>,
}

impl Score {
    pub fn save(&self, path: &Path) -> std::result::Result<(), ScoreError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> std::result::Result<Self, ScoreError> {
        let ron_string = fs::read_to_string(path)?;
        let score: Score = ron::from_str(&ron_string)?;
        score.tempo_map()?;
        score.settings.validate()?;
        Ok(score)
    }

    pub fn tempo_map(&self) -> Result<TempoMap> {
        let mut map = TempoMap::new(self.ticks_per_quarter_note)?;
        for &(time, microseconds) in &self.tempo {
            map.set_tempo(time, Tempo::new(microseconds)?);
        }
        for &(time, numerator, denominator) in &self.time_signatures {
            map.set_time_signature(time, TimeSignature::new(numerator, denominator)?);
        }
        Ok(map)
    }

    pub fn objects(&self) -> Vec<TimedObject> {
        self.items.iter().map(ScoreItem::to_object).collect()
    }
}
