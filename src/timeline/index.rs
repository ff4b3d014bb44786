use std::collections::BTreeMap;
use std::ops::Bound;

use crate::arena::{Arena, ArenaKey};
use crate::time::MetricTime;

pub(crate) type NodeId = ArenaKey;

/// Total order of nodes: time, then rank among events sharing the time,
/// then insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct NodeKey {
    pub time: MetricTime,
    pub rank: u8,
    seq: u64,
}

impl NodeKey {
    fn lowest(time: MetricTime) -> Self {
        Self {
            time,
            rank: 0,
            seq: 0,
        }
    }

    fn highest(time: MetricTime) -> Self {
        Self {
            time,
            rank: u8::MAX,
            seq: u64::MAX,
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    key: NodeKey,
    value: V,
}

/// Ordered multiset of values keyed by metric time with stable node handles.
#[derive(Debug)]
pub(crate) struct TimeIndex<V> {
    entries: Arena<Entry<V>>,
    order: BTreeMap<NodeKey, NodeId>,
    next_seq: u64,
}

impl<V> Default for TimeIndex<V> {
    fn default() -> Self {
        Self {
            entries: Arena::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }
}

impl<V> TimeIndex<V> {
    pub fn insert(&mut self, time: MetricTime, rank: u8, value: V) -> NodeId {
        let key = self.next_key(time, rank);
        let id = self.entries.insert(Entry { key, value });
        self.order.insert(key, id);
        id
    }

    pub fn remove(&mut self, id: NodeId) -> Option<V> {
        let entry = self.entries.remove(id)?;
        self.order.remove(&entry.key);
        Some(entry.value)
    }

    pub fn get(&self, id: NodeId) -> Option<&V> {
        self.entries.get(id).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut V> {
        self.entries.get_mut(id).map(|entry| &mut entry.value)
    }

    pub fn key(&self, id: NodeId) -> Option<NodeKey> {
        self.entries.get(id).map(|entry| entry.key)
    }

    pub fn time(&self, id: NodeId) -> Option<MetricTime> {
        self.key(id).map(|key| key.time)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<NodeId> {
        self.order.values().next().copied()
    }

    pub fn last(&self) -> Option<NodeId> {
        self.order.values().next_back().copied()
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        let key = self.key(id)?;
        self.order
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(_, id)| *id)
    }

    /// First node with time >= `time`.
    pub fn first_at_or_after(&self, time: MetricTime) -> Option<NodeId> {
        self.order
            .range(NodeKey::lowest(time)..)
            .next()
            .map(|(_, id)| *id)
    }

    /// Values later than `time`, earliest first.
    pub fn after(&self, time: MetricTime) -> impl Iterator<Item = (MetricTime, &V)> + '_ {
        self.order
            .range((Bound::Excluded(NodeKey::highest(time)), Bound::Unbounded))
            .filter_map(|(key, id)| self.get(*id).map(|value| (key.time, value)))
    }

    /// Values earlier than `time`, latest first.
    pub fn before(&self, time: MetricTime) -> impl Iterator<Item = (MetricTime, &V)> + '_ {
        self.order
            .range(..NodeKey::lowest(time))
            .rev()
            .filter_map(|(key, id)| self.get(*id).map(|value| (key.time, value)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &V)> + '_ {
        self.order
            .values()
            .filter_map(|id| self.get(*id).map(|value| (*id, value)))
    }

    /// Moves every node later than `threshold` to `remap(time)`. Relative
    /// order is kept as long as `remap` is monotonic. Returns the moved
    /// nodes with their new times.
    pub fn retime_after(
        &mut self,
        threshold: MetricTime,
        remap: impl Fn(MetricTime) -> MetricTime,
    ) -> Vec<(NodeId, MetricTime)> {
        let moved: Vec<(NodeKey, NodeId)> = self
            .order
            .range((Bound::Excluded(NodeKey::highest(threshold)), Bound::Unbounded))
            .map(|(key, id)| (*key, *id))
            .collect();

        let mut result = Vec::with_capacity(moved.len());
        for (key, _) in &moved {
            self.order.remove(key);
        }
        for (key, id) in moved {
            let new_key = NodeKey {
                time: remap(key.time),
                ..key
            };
            if let Some(entry) = self.entries.get_mut(id) {
                entry.key = new_key;
            }
            self.order.insert(new_key, id);
            result.push((id, new_key.time));
        }
        result
    }

    fn next_key(&mut self, time: MetricTime, rank: u8) -> NodeKey {
        let seq = self.next_seq;
        self.next_seq += 1;
        NodeKey { time, rank, seq }
    }
}
