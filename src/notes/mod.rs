//! Notes of the timeline with their metric extents, searchable by "sounding
//! at time t".

mod interval_tree;

use crate::arena::{Arena, ArenaKey};
use crate::events::NoteId;
use crate::time::MetricTime;
use crate::timing::objects::{Note, NotePlaybackData};

use interval_tree::{IntervalHandle, IntervalTree};

pub(crate) type NoteKey = ArenaKey;

/// Playback-side record of a note. `custom` caches the note callback's
/// answer from the note-on so the note-off matches it.
#[derive(Debug, Clone)]
pub(crate) struct NoteMetadata {
    pub note: Note,
    pub start: MetricTime,
    pub end: MetricTime,
    pub custom: Option<Option<NotePlaybackData>>,
    interval: Option<IntervalHandle>,
}

impl NoteMetadata {
    pub fn new(note: Note, start: MetricTime, end: MetricTime) -> Self {
        Self {
            note,
            start,
            end,
            custom: None,
            interval: None,
        }
    }

    pub fn note_id(&self) -> NoteId {
        self.note.note_id()
    }

    pub fn raw_data(&self) -> NotePlaybackData {
        self.note.playback_data()
    }

    /// The note as it was sent, after the note callback.
    pub fn effective_note(&self) -> Note {
        match &self.custom {
            Some(Some(data)) => self.note.with_playback_data(data),
            _ => self.note.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct NoteActivityIndex {
    notes: Arena<NoteMetadata>,
    tree: IntervalTree<NoteKey>,
}

impl NoteActivityIndex {
    pub fn insert(&mut self, metadata: NoteMetadata) -> NoteKey {
        let (start, end) = (metadata.start, metadata.end);
        let key = self.notes.insert(metadata);
        let handle = self.tree.insert(start, end, key);
        if let Some(metadata) = self.notes.get_mut(key) {
            metadata.interval = Some(handle);
        }
        key
    }

    pub fn remove(&mut self, key: NoteKey) -> Option<NoteMetadata> {
        let metadata = self.notes.remove(key)?;
        if let Some(handle) = metadata.interval {
            self.tree.remove(handle);
        }
        Some(metadata)
    }

    pub fn get(&self, key: NoteKey) -> Option<&NoteMetadata> {
        self.notes.get(key)
    }

    pub fn get_mut(&mut self, key: NoteKey) -> Option<&mut NoteMetadata> {
        self.notes.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Notes with `start < time < end`.
    pub fn active_at(&self, time: MetricTime) -> Vec<NoteKey> {
        self.tree.containing(time).into_iter().copied().collect()
    }

    /// Remaps note extents, keeping the search structure in sync.
    pub fn retime(&mut self, remap: impl Fn(MetricTime) -> MetricTime) {
        let keys: Vec<NoteKey> = self.notes.iter().map(|(key, _)| key).collect();
        for key in keys {
            let Some(metadata) = self.notes.get_mut(key) else {
                continue;
            };
            let (start, end) = (remap(metadata.start), remap(metadata.end));
            if (start, end) == (metadata.start, metadata.end) {
                continue;
            }
            metadata.start = start;
            metadata.end = end;
            if let Some(handle) = metadata.interval {
                self.tree.update(handle, start, end);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: i64) -> MetricTime {
        MetricTime::from_millis(millis)
    }

    fn insert(index: &mut NoteActivityIndex, number: u8, start: i64, end: i64) -> NoteKey {
        index.insert(NoteMetadata::new(
            Note::new(number, 0, 0),
            ms(start),
            ms(end),
        ))
    }

    #[test]
    fn active_notes_exclude_boundaries() {
        let mut index = NoteActivityIndex::default();
        let a = insert(&mut index, 60, 0, 100);
        let b = insert(&mut index, 62, 100, 200);

        assert_eq!(index.active_at(ms(50)), vec![a]);
        assert!(index.active_at(ms(100)).is_empty());
        assert_eq!(index.active_at(ms(150)), vec![b]);
    }

    #[test]
    fn retime_moves_search_extents() {
        let mut index = NoteActivityIndex::default();
        let a = insert(&mut index, 60, 100, 300);
        index.retime(|t| if t > ms(100) { MetricTime::from_units(t.units() / 2) } else { t });

        let metadata = index.get(a).unwrap();
        assert_eq!((metadata.start, metadata.end), (ms(100), ms(150)));
        assert_eq!(index.active_at(ms(120)), vec![a]);
        assert!(index.active_at(ms(200)).is_empty());
    }

    #[test]
    fn removed_note_is_no_longer_found() {
        let mut index = NoteActivityIndex::default();
        let a = insert(&mut index, 60, 0, 100);
        assert!(index.remove(a).is_some());
        assert!(index.active_at(ms(50)).is_empty());
        assert_eq!(index.len(), 0);
    }
}
