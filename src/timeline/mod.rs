//! Time-ordered playback events with a play cursor.

pub(crate) mod index;

use std::collections::{HashMap, HashSet};

use crate::arena::{Arena, ArenaKey};
use crate::events::{Metadata, MidiEvent, ObjectId};
use crate::notes::NoteKey;
use crate::time::MetricTime;

pub(crate) use index::{NodeId, NodeKey, TimeIndex};

pub(crate) type GroupId = ArenaKey;

#[derive(Debug, Clone)]
pub(crate) struct PlaybackEvent {
    pub event: MidiEvent,
    pub raw_time: u64,
    pub metadata: Option<Metadata>,
    pub note: Option<NoteKey>,
}

/// Everything one timed object put into the timeline.
#[derive(Debug, Default)]
struct Group {
    object: Option<ObjectId>,
    aliases: Vec<ObjectId>,
    nodes: Vec<NodeId>,
    notes: Vec<NoteKey>,
}

#[derive(Debug)]
pub(crate) struct RemovedGroup {
    pub events: Vec<PlaybackEvent>,
    pub notes: Vec<NoteKey>,
}

/// Next event to play. `BeforeStart` advances to the first event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cursor {
    BeforeStart,
    At(NodeId),
    AfterEnd,
}

#[derive(Debug)]
pub(crate) struct TimelineStore {
    index: TimeIndex<PlaybackEvent>,
    groups: Arena<Group>,
    by_object: HashMap<ObjectId, Vec<GroupId>>,
    cursor: Cursor,
}

impl Default for TimelineStore {
    fn default() -> Self {
        Self {
            index: TimeIndex::default(),
            groups: Arena::new(),
            by_object: HashMap::new(),
            cursor: Cursor::BeforeStart,
        }
    }
}

impl TimelineStore {
    pub fn begin_group(&mut self, object: ObjectId, aliases: Vec<ObjectId>) -> GroupId {
        let group = self.groups.insert(Group {
            object: Some(object),
            aliases: aliases.clone(),
            ..Group::default()
        });
        for id in std::iter::once(object).chain(aliases) {
            self.by_object.entry(id).or_default().push(group);
        }
        group
    }

    pub fn insert(
        &mut self,
        time: MetricTime,
        rank: u8,
        event: MidiEvent,
        raw_time: u64,
        metadata: Option<Metadata>,
        group: GroupId,
        note: Option<NoteKey>,
    ) -> NodeId {
        let node = self.index.insert(
            time,
            rank,
            PlaybackEvent {
                event,
                raw_time,
                metadata,
                note,
            },
        );
        if let Some(group) = self.groups.get_mut(group) {
            group.nodes.push(node);
        }
        node
    }

    pub fn attach_note(&mut self, group: GroupId, note: NoteKey) {
        if let Some(group) = self.groups.get_mut(group) {
            group.notes.push(note);
        }
    }

    /// Removes every group the id belongs to. A cursor sitting on a removed
    /// node moves to the next surviving one.
    pub fn remove_object(&mut self, object: ObjectId) -> Vec<RemovedGroup> {
        let Some(groups) = self.by_object.remove(&object) else {
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(groups.len());
        for group_id in groups {
            let Some(group) = self.groups.remove(group_id) else {
                continue;
            };
            for id in group.object.iter().chain(&group.aliases) {
                if let Some(groups) = self.by_object.get_mut(id) {
                    groups.retain(|g| *g != group_id);
                    if groups.is_empty() {
                        self.by_object.remove(id);
                    }
                }
            }

            self.step_cursor_off(&group.nodes);
            let events = group
                .nodes
                .iter()
                .filter_map(|node| self.index.remove(*node))
                .collect();
            removed.push(RemovedGroup {
                events,
                notes: group.notes,
            });
        }
        removed
    }

    pub fn get(&self, node: NodeId) -> Option<&PlaybackEvent> {
        self.index.get(node)
    }

    pub fn key(&self, node: NodeId) -> Option<NodeKey> {
        self.index.key(node)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Time of the last event.
    pub fn end_time(&self) -> MetricTime {
        self.index
            .last()
            .and_then(|node| self.index.time(node))
            .unwrap_or(MetricTime::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricTime, &PlaybackEvent)> + '_ {
        self.index
            .iter()
            .filter_map(|(node, event)| self.index.time(node).map(|time| (time, event)))
    }

    pub fn after(&self, time: MetricTime) -> impl Iterator<Item = (MetricTime, &PlaybackEvent)> + '_ {
        self.index.after(time)
    }

    pub fn before(&self, time: MetricTime) -> impl Iterator<Item = (MetricTime, &PlaybackEvent)> + '_ {
        self.index.before(time)
    }

    pub fn retime_after(&mut self, threshold: MetricTime, remap: impl Fn(MetricTime) -> MetricTime) {
        self.index.retime_after(threshold, remap);
    }

    /// Whether any event at exactly `time` matches.
    /// Events at exactly `time`, in play order.
    pub fn events_at(&self, time: MetricTime) -> impl Iterator<Item = &PlaybackEvent> + '_ {
        self.index
            .first_at_or_after(time)
            .into_iter()
            .flat_map(move |node| {
                std::iter::successors(Some(node), move |node| self.index.next(*node))
            })
            .map_while(move |node| {
                let key = self.index.key(node)?;
                (key.time == time).then(|| self.index.get(node)).flatten()
            })
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// The event under the cursor.
    pub fn current(&self) -> Option<(NodeId, MetricTime, &PlaybackEvent)> {
        let Cursor::At(node) = self.cursor else {
            return None;
        };
        let time = self.index.time(node)?;
        self.index.get(node).map(|event| (node, time, event))
    }

    /// Moves the cursor one event forward. Returns whether it now points at
    /// an event.
    pub fn advance(&mut self) -> bool {
        let next = match self.cursor {
            Cursor::BeforeStart => self.index.first(),
            Cursor::At(node) => self.index.next(node),
            Cursor::AfterEnd => None,
        };
        self.cursor = next.map_or(Cursor::AfterEnd, Cursor::At);
        next.is_some()
    }

    pub fn move_to_first(&mut self) {
        self.cursor = self.index.first().map_or(Cursor::AfterEnd, Cursor::At);
    }

    /// Puts the cursor on the first event at or after `time`.
    pub fn seek(&mut self, time: MetricTime) {
        self.cursor = self
            .index
            .first_at_or_after(time)
            .map_or(Cursor::AfterEnd, Cursor::At);
    }

    fn step_cursor_off(&mut self, removed: &[NodeId]) {
        let Cursor::At(mut node) = self.cursor else {
            return;
        };
        let removed: HashSet<NodeId> = removed.iter().copied().collect();
        while removed.contains(&node) {
            match self.index.next(node) {
                Some(next) => node = next,
                None => {
                    self.cursor = Cursor::AfterEnd;
                    return;
                }
            }
        }
        self.cursor = Cursor::At(node);
    }
}
