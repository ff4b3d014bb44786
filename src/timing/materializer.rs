//! Expansion of timed objects into playback events, including pairing of
//! raw note-on/note-off events into notes.

use std::collections::HashMap;

use tracing::trace;

use crate::error::Result;
use crate::events::{Metadata, MidiEvent, NoteId, ObjectId, TimedEvent};
use crate::tempo::TempoMap;
use crate::time::MetricTime;
use crate::timing::objects::{Note, ObjectExpander, TimedObject};

#[derive(Debug, Clone)]
pub(crate) struct MaterializedEvent {
    pub event: MidiEvent,
    pub raw_time: u64,
    pub time: MetricTime,
    pub rank: u8,
    pub metadata: Option<Metadata>,
    /// Index into [`Materialized::notes`] for note-on/off events of a note.
    pub note: Option<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct MaterializedNote {
    pub note: Note,
    pub start: MetricTime,
    pub end: MetricTime,
}

/// Playback events produced by one object.
#[derive(Debug, Clone)]
pub(crate) struct Materialized {
    pub object: ObjectId,
    /// Other ids the group answers to, such as the raw events of a paired
    /// note.
    pub aliases: Vec<ObjectId>,
    pub events: Vec<MaterializedEvent>,
    pub notes: Vec<MaterializedNote>,
}

/// Unmatched raw note events, one slot per note identity and direction.
/// A newer event overwrites the parked one.
#[derive(Debug, Default)]
pub(crate) struct NotePairing {
    pending_on: HashMap<NoteId, TimedEvent>,
    pending_off: HashMap<NoteId, TimedEvent>,
}

impl NotePairing {
    /// Pairs `event` with its parked partner or parks it.
    pub fn offer(&mut self, event: &TimedEvent) -> Option<Note> {
        let id = event.event.note_id()?;

        if event.event.is_note_on() {
            match self.pending_off.get(&id) {
                Some(off) if event.time <= off.time => {
                    let off = self.pending_off.remove(&id)?;
                    Some(Note::from_events(event.clone(), off))
                }
                _ => {
                    self.pending_on.insert(id, event.clone());
                    None
                }
            }
        } else {
            match self.pending_on.get(&id) {
                Some(on) if on.time <= event.time => {
                    let on = self.pending_on.remove(&id)?;
                    Some(Note::from_events(on, event.clone()))
                }
                _ => {
                    self.pending_off.insert(id, event.clone());
                    None
                }
            }
        }
    }

    /// Drops the parked event with the given id. Returns whether one was
    /// parked.
    pub fn withdraw(&mut self, object: ObjectId) -> bool {
        for slots in [&mut self.pending_on, &mut self.pending_off] {
            let found = slots
                .iter()
                .find(|(_, event)| event.id() == object)
                .map(|(id, _)| *id);
            if let Some(id) = found {
                slots.remove(&id);
                return true;
            }
        }
        false
    }

    /// Parks an event whose partner was removed.
    pub fn park(&mut self, event: TimedEvent) {
        let Some(id) = event.event.note_id() else {
            return;
        };
        if event.event.is_note_on() {
            self.pending_on.insert(id, event);
        } else {
            self.pending_off.insert(id, event);
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending_on.len() + self.pending_off.len()
    }
}

/// Expands `object` into playback events. `Ok(None)` means the object was
/// a raw note event that is now waiting for its partner.
pub(crate) fn materialize(
    object: &TimedObject,
    tempo_map: &TempoMap,
    pairing: &mut NotePairing,
    expander: Option<&dyn ObjectExpander>,
) -> Result<Option<Materialized>> {
    if let TimedObject::Event(event) = object {
        if event.event.note_id().is_some() {
            event.event.validate()?;
            let Some(note) = pairing.offer(event) else {
                return Ok(None);
            };

            trace!(note = ?note.note_id(), time = note.time, "paired raw note events");
            let aliases = note
                .source()
                .map(|source| vec![source.on.id(), source.off.id()])
                .unwrap_or_default();
            let mut materialized = notes(note.id(), std::iter::once(note), tempo_map)?;
            materialized.aliases = aliases;
            return Ok(Some(materialized));
        }
    }

    if let Some(events) = expander.and_then(|expander| expander.expand(object)) {
        return events_of(object.id(), events, tempo_map).map(Some);
    }

    let materialized = match object {
        TimedObject::Event(event) => events_of(object.id(), vec![event.clone()], tempo_map)?,
        TimedObject::Note(note) => notes(note.id(), std::iter::once(note.clone()), tempo_map)?,
        TimedObject::Chord(chord) => notes(chord.id(), chord.notes.iter().cloned(), tempo_map)?,
        TimedObject::Composite(composite) => {
            events_of(composite.id(), composite.timed_events(), tempo_map)?
        }
    };
    Ok(Some(materialized))
}

fn events_of(
    object: ObjectId,
    events: Vec<TimedEvent>,
    tempo_map: &TempoMap,
) -> Result<Materialized> {
    let mut materialized = Vec::with_capacity(events.len());
    for timed in events {
        timed.event.validate()?;
        materialized.push(MaterializedEvent {
            rank: timed.event.rank(false),
            time: tempo_map.to_metric(timed.time),
            raw_time: timed.time,
            event: timed.event,
            metadata: timed.metadata,
            note: None,
        });
    }

    Ok(Materialized {
        object,
        aliases: Vec::new(),
        events: materialized,
        notes: Vec::new(),
    })
}

fn notes(
    object: ObjectId,
    notes: impl IntoIterator<Item = Note>,
    tempo_map: &TempoMap,
) -> Result<Materialized> {
    let mut materialized = Materialized {
        object,
        aliases: Vec::new(),
        events: Vec::new(),
        notes: Vec::new(),
    };

    for note in notes {
        let data = note.playback_data();
        let on = data.note_on_event();
        let off = data.note_off_event();
        on.validate()?;
        off.validate()?;

        let start = tempo_map.to_metric(note.time);
        let end = tempo_map.to_metric(note.end_time());
        let index = materialized.notes.len();
        materialized.events.push(MaterializedEvent {
            rank: on.rank(false),
            event: on,
            raw_time: note.time,
            time: start,
            metadata: note.on_metadata(),
            note: Some(index),
        });
        materialized.events.push(MaterializedEvent {
            rank: off.rank(note.length == 0),
            event: off,
            raw_time: note.end_time(),
            time: end,
            metadata: note.off_metadata(),
            note: Some(index),
        });
        materialized.notes.push(MaterializedNote { note, start, end });
    }

    Ok(materialized)
}
