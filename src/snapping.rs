//! Named positions to jump to: explicit snap points and groups of points
//! derived from timeline events.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PlaybackError, Result};
use crate::events::{Metadata, MidiEvent};
use crate::time::MetricTime;
use crate::timeline::{NodeId, TimeIndex, TimelineStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapPointId(NodeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapGroupId(u64);

pub type SnapPredicate = Arc<dyn Fn(&MidiEvent) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct SnapPoint {
    pub id: SnapPointId,
    pub time: Duration,
    pub enabled: bool,
    pub data: Option<Metadata>,
}

impl SnapPoint {
    pub fn data<D: 'static>(&self) -> Option<&D> {
        self.data.as_ref().and_then(|data| data.downcast_ref::<D>())
    }
}

impl fmt::Debug for SnapPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapPoint")
            .field("id", &self.id)
            .field("time", &self.time)
            .field("enabled", &self.enabled)
            .finish()
    }
}

struct SnapEntry {
    enabled: bool,
    data: Option<Metadata>,
}

struct SnapGroup {
    id: SnapGroupId,
    predicate: SnapPredicate,
    enabled: bool,
}

/// Which snap points a jump may land on.
pub(crate) enum SnapFilter<'a> {
    Any,
    Data(&'a dyn Fn(&Metadata) -> bool),
    Group(SnapGroupId),
}

#[derive(Default)]
pub(crate) struct SnapIndex {
    points: TimeIndex<SnapEntry>,
    groups: Vec<SnapGroup>,
    next_group: u64,
}

impl SnapIndex {
    /// A point at zero would never be "after" the start, so it lands one
    /// unit later.
    pub fn add_point(&mut self, time: MetricTime, data: Option<Metadata>) -> SnapPointId {
        let time = time.max(MetricTime::from_units(1));
        SnapPointId(self.points.insert(time, 0, SnapEntry { enabled: true, data }))
    }

    pub fn remove_point(&mut self, id: SnapPointId) -> bool {
        self.points.remove(id.0).is_some()
    }

    pub fn remove_points_where(&mut self, predicate: impl Fn(&SnapPoint) -> bool) {
        let doomed: Vec<SnapPointId> = self
            .points()
            .into_iter()
            .filter(|point| predicate(point))
            .map(|point| point.id)
            .collect();
        for id in doomed {
            self.remove_point(id);
        }
    }

    pub fn set_point_enabled(&mut self, id: SnapPointId, enabled: bool) -> Result<()> {
        let entry = self
            .points
            .get_mut(id.0)
            .ok_or(PlaybackError::UnknownSnapPoint)?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn points(&self) -> Vec<SnapPoint> {
        self.points
            .iter()
            .filter_map(|(node, entry)| {
                self.points
                    .time(node)
                    .map(|time| snap_point(node, time, entry))
            })
            .collect()
    }

    pub fn point_time(&self, id: SnapPointId) -> Option<(MetricTime, bool)> {
        let time = self.points.time(id.0)?;
        self.points.get(id.0).map(|entry| (time, entry.enabled))
    }

    pub fn add_group(&mut self, predicate: SnapPredicate) -> SnapGroupId {
        let id = SnapGroupId(self.next_group);
        self.next_group += 1;
        self.groups.push(SnapGroup {
            id,
            predicate,
            enabled: true,
        });
        id
    }

    pub fn remove_group(&mut self, id: SnapGroupId) -> bool {
        let before = self.groups.len();
        self.groups.retain(|group| group.id != id);
        self.groups.len() != before
    }

    pub fn set_group_enabled(&mut self, id: SnapGroupId, enabled: bool) -> Result<()> {
        let group = self
            .groups
            .iter_mut()
            .find(|group| group.id == id)
            .ok_or(PlaybackError::UnknownSnapPointsGroup)?;
        group.enabled = enabled;
        Ok(())
    }

    pub fn retime_after(&mut self, threshold: MetricTime, remap: impl Fn(MetricTime) -> MetricTime) {
        self.points.retime_after(threshold, remap);
    }

    /// Closest snap time strictly after `time`.
    pub fn next(
        &self,
        time: MetricTime,
        filter: &SnapFilter<'_>,
        store: &TimelineStore,
    ) -> Option<MetricTime> {
        let explicit = self
            .points
            .after(time)
            .find(|(_, entry)| entry.enabled && explicit_matches(entry, filter))
            .map(|(time, _)| time);
        let derived = self
            .groups_for(filter)
            .filter_map(|group| {
                store
                    .after(time)
                    .find(|(_, event)| (group.predicate)(&event.event))
                    .map(|(time, _)| time)
            })
            .min();

        match (explicit, derived) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Closest snap time strictly before `time`.
    pub fn previous(
        &self,
        time: MetricTime,
        filter: &SnapFilter<'_>,
        store: &TimelineStore,
    ) -> Option<MetricTime> {
        let explicit = self
            .points
            .before(time)
            .find(|(_, entry)| entry.enabled && explicit_matches(entry, filter))
            .map(|(time, _)| time);
        let derived = self
            .groups_for(filter)
            .filter_map(|group| {
                store
                    .before(time)
                    .find(|(_, event)| (group.predicate)(&event.event))
                    .map(|(time, _)| time)
            })
            .max();

        match (explicit, derived) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    fn groups_for<'s>(&'s self, filter: &SnapFilter<'_>) -> impl Iterator<Item = &'s SnapGroup> + 's {
        let wanted = match filter {
            SnapFilter::Any => None,
            SnapFilter::Group(id) => Some(Some(*id)),
            SnapFilter::Data(_) => Some(None),
        };
        self.groups
            .iter()
            .filter(move |group| group.enabled && wanted.is_none_or(|id| id == Some(group.id)))
    }
}

fn explicit_matches(entry: &SnapEntry, filter: &SnapFilter<'_>) -> bool {
    match filter {
        SnapFilter::Any => true,
        SnapFilter::Data(predicate) => entry.data.as_ref().is_some_and(|data| predicate(data)),
        SnapFilter::Group(_) => false,
    }
}

fn snap_point(node: NodeId, time: MetricTime, entry: &SnapEntry) -> SnapPoint {
    SnapPoint {
        id: SnapPointId(node),
        time: time.as_duration(),
        enabled: entry.enabled,
        data: entry.data.clone(),
    }
}
