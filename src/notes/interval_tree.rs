//! Treap of half-open intervals keyed by start, augmented with the maximum
//! end of each subtree so "intervals containing t" prunes whole branches.

use crate::time::MetricTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct IntervalHandle(usize);

#[derive(Debug)]
struct Node<V> {
    start: MetricTime,
    end: MetricTime,
    tie: u64,
    priority: u64,
    max_end: MetricTime,
    left: Option<usize>,
    right: Option<usize>,
    value: V,
}

impl<V> Node<V> {
    fn key(&self) -> (MetricTime, u64) {
        (self.start, self.tie)
    }
}

#[derive(Debug)]
pub(crate) struct IntervalTree<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    root: Option<usize>,
    next_tie: u64,
    len: usize,
}

impl<V> Default for IntervalTree<V> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            next_tie: 0,
            len: 0,
        }
    }
}

impl<V> IntervalTree<V> {
    pub fn insert(&mut self, start: MetricTime, end: MetricTime, value: V) -> IntervalHandle {
        let tie = self.next_tie;
        self.next_tie += 1;
        let node = Node {
            start,
            end,
            tie,
            priority: splitmix64(tie),
            max_end: end,
            left: None,
            right: None,
            value,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                index
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        self.root = self.attach(self.root, index);
        self.len += 1;
        IntervalHandle(index)
    }

    pub fn remove(&mut self, handle: IntervalHandle) -> Option<V> {
        let key = self.node(handle.0)?.key();
        self.root = self.detach(self.root, key);
        self.free.push(handle.0);
        self.len -= 1;
        self.nodes[handle.0].take().map(|node| node.value)
    }

    /// Moves an interval. The handle stays valid.
    pub fn update(&mut self, handle: IntervalHandle, start: MetricTime, end: MetricTime) {
        let Some(key) = self.node(handle.0).map(Node::key) else {
            return;
        };
        self.root = self.detach(self.root, key);
        if let Some(node) = self.nodes[handle.0].as_mut() {
            node.start = start;
            node.end = end;
            node.max_end = end;
            node.left = None;
            node.right = None;
        }
        self.root = self.attach(self.root, handle.0);
    }

    #[cfg(test)]
    pub fn interval(&self, handle: IntervalHandle) -> Option<(MetricTime, MetricTime)> {
        self.node(handle.0).map(|node| (node.start, node.end))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Values of all intervals with `start < time < end`, in start order.
    pub fn containing(&self, time: MetricTime) -> Vec<&V> {
        let mut result = Vec::new();
        self.collect_containing(self.root, time, &mut result);
        result
    }

    fn collect_containing<'a>(&'a self, root: Option<usize>, time: MetricTime, out: &mut Vec<&'a V>) {
        let Some(node) = root.and_then(|index| self.node(index)) else {
            return;
        };
        if node.max_end <= time {
            return;
        }

        self.collect_containing(node.left, time, out);
        if node.start >= time {
            return;
        }
        if time < node.end {
            out.push(&node.value);
        }
        self.collect_containing(node.right, time, out);
    }

    fn node(&self, index: usize) -> Option<&Node<V>> {
        self.nodes.get(index).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Node<V>> {
        self.nodes.get_mut(index).and_then(Option::as_mut)
    }

    fn attach(&mut self, root: Option<usize>, index: usize) -> Option<usize> {
        let Some(root) = root else {
            return Some(index);
        };
        let (Some(root_node), Some(new_node)) = (self.node(root), self.node(index)) else {
            return Some(root);
        };

        let goes_left = new_node.key() < root_node.key();
        let new_priority = new_node.priority;
        if goes_left {
            let left = self.node(root).and_then(|n| n.left);
            let left = self.attach(left, index);
            self.set_left(root, left);
            if new_priority > self.priority(root) && left == Some(index) {
                return Some(self.rotate_right(root));
            }
        } else {
            let right = self.node(root).and_then(|n| n.right);
            let right = self.attach(right, index);
            self.set_right(root, right);
            if new_priority > self.priority(root) && right == Some(index) {
                return Some(self.rotate_left(root));
            }
        }
        self.refresh(root);
        Some(root)
    }

    fn detach(&mut self, root: Option<usize>, key: (MetricTime, u64)) -> Option<usize> {
        let root = root?;
        let (node_key, left, right) = {
            let node = self.node(root)?;
            (node.key(), node.left, node.right)
        };

        if key < node_key {
            let left = self.detach(left, key);
            self.set_left(root, left);
        } else if key > node_key {
            let right = self.detach(right, key);
            self.set_right(root, right);
        } else {
            return self.merge(left, right);
        }
        self.refresh(root);
        Some(root)
    }

    fn merge(&mut self, a: Option<usize>, b: Option<usize>) -> Option<usize> {
        match (a, b) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => {
                if self.priority(a) > self.priority(b) {
                    let right = self.node(a).and_then(|n| n.right);
                    let merged = self.merge(right, Some(b));
                    self.set_right(a, merged);
                    self.refresh(a);
                    Some(a)
                } else {
                    let left = self.node(b).and_then(|n| n.left);
                    let merged = self.merge(Some(a), left);
                    self.set_left(b, merged);
                    self.refresh(b);
                    Some(b)
                }
            }
        }
    }

    fn rotate_right(&mut self, root: usize) -> usize {
        let Some(pivot) = self.node(root).and_then(|n| n.left) else {
            return root;
        };
        let inner = self.node(pivot).and_then(|n| n.right);
        self.set_left(root, inner);
        self.set_right(pivot, Some(root));
        self.refresh(root);
        self.refresh(pivot);
        pivot
    }

    fn rotate_left(&mut self, root: usize) -> usize {
        let Some(pivot) = self.node(root).and_then(|n| n.right) else {
            return root;
        };
        let inner = self.node(pivot).and_then(|n| n.left);
        self.set_right(root, inner);
        self.set_left(pivot, Some(root));
        self.refresh(root);
        self.refresh(pivot);
        pivot
    }

    fn priority(&self, index: usize) -> u64 {
        self.node(index).map(|n| n.priority).unwrap_or(0)
    }

    fn set_left(&mut self, index: usize, left: Option<usize>) {
        if let Some(node) = self.node_mut(index) {
            node.left = left;
        }
    }

    fn set_right(&mut self, index: usize, right: Option<usize>) {
        if let Some(node) = self.node_mut(index) {
            node.right = right;
        }
    }

    fn refresh(&mut self, index: usize) {
        let Some((end, left, right)) = self.node(index).map(|n| (n.end, n.left, n.right)) else {
            return;
        };
        let child_max = |child: Option<usize>| {
            child
                .and_then(|c| self.node(c))
                .map(|n| n.max_end)
                .unwrap_or(MetricTime::ZERO)
        };
        let max_end = end.max(child_max(left)).max(child_max(right));
        if let Some(node) = self.node_mut(index) {
            node.max_end = max_end;
        }
    }
}

fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
