//! Real-time playback of timed MIDI objects against a tempo map.
//!
//! A [`Playback`] owns a timeline built from [`TimedObject`]s, drives it
//! with a clock and sends what is due to an [`OutputDevice`]. Objects, the
//! tempo and the play position can change while it runs.

mod arena;
mod clock;
mod device;
mod error;
mod events;
mod notes;
mod observable;
mod playback;
mod score;
mod settings;
mod snapping;
mod tempo;
mod time;
mod timeline;
mod timing;
mod tracking;

pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
#[cfg(feature = "midir-output")]
pub use device::MidirOutput;
pub use device::{EventRecorder, LogDevice, OutputDevice};
pub use error::{DeviceError, PlaybackError, Result, ScoreError};
pub use events::{Metadata, MidiEvent, NoteId, ObjectId, TimedEvent};
pub use observable::{ChangedObject, CollectionChange, ObservableTimedObjects};
pub use playback::{EventCallback, NoteCallback, Playback, PlaybackNotification, ScheduledEvent};
pub use score::{Score, ScoreItem, ScoreNote};
pub use settings::{ClockSettings, PlaybackSettings, TickGeneratorKind};
pub use snapping::{SnapGroupId, SnapPoint, SnapPointId};
pub use tempo::{Tempo, TempoMap, TimeSignature};
pub use time::{MetricTime, TimeSpan, TimeSpanKind};
pub use timing::{
    Chord, CompositeObject, Note, NotePlaybackData, ObjectExpander, RegisteredParameter,
    RegisteredParameterKind, TimedObject,
};
