//! A shared collection of timed objects whose edits reach every playback
//! created from it.

use parking_lot::Mutex;
use tracing::trace;

use crate::events::ObjectId;
use crate::timing::objects::TimedObject;

#[derive(Debug, Clone)]
pub struct ChangedObject {
    pub object: TimedObject,
    /// Tick time before the change.
    pub old_time: u64,
}

/// One batch of edits, as delivered to observers.
#[derive(Debug, Clone, Default)]
pub struct CollectionChange {
    pub added: Vec<TimedObject>,
    pub removed: Vec<TimedObject>,
    pub changed: Vec<ChangedObject>,
}

impl CollectionChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Returns `false` once the observer is gone and should be dropped.
pub(crate) type Observer = Box<dyn Fn(&CollectionChange) -> bool + Send + Sync>;

#[derive(Default)]
pub struct ObservableTimedObjects {
    objects: Mutex<Vec<TimedObject>>,
    observers: Mutex<Vec<Observer>>,
}

impl ObservableTimedObjects {
    pub fn new(objects: impl IntoIterator<Item = TimedObject>) -> Self {
        Self {
            objects: Mutex::new(objects.into_iter().collect()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<TimedObject> {
        self.objects.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    pub fn add(&self, objects: impl IntoIterator<Item = TimedObject>) {
        let added: Vec<TimedObject> = objects.into_iter().collect();
        self.edit(|objects| {
            objects.extend(added.iter().cloned());
            let change = CollectionChange {
                added,
                ..CollectionChange::default()
            };
            (change, ())
        });
    }

    /// Removes the objects with the given ids and returns them.
    pub fn remove(&self, ids: &[ObjectId]) -> Vec<TimedObject> {
        self.edit(|objects| {
            let (removed, kept): (Vec<TimedObject>, Vec<TimedObject>) = objects
                .drain(..)
                .partition(|object| ids.contains(&object.id()));
            *objects = kept;
            let change = CollectionChange {
                removed: removed.clone(),
                ..CollectionChange::default()
            };
            (change, removed)
        })
    }

    /// Edits the object with `id` in place. Returns `false` for an unknown id.
    pub fn change(&self, id: ObjectId, edit: impl FnOnce(&mut TimedObject)) -> bool {
        self.edit(|objects| {
            let Some(object) = objects.iter_mut().find(|object| object.id() == id) else {
                return (CollectionChange::default(), false);
            };
            let old_time = object.time();
            edit(object);
            let change = CollectionChange {
                changed: vec![ChangedObject {
                    object: object.clone(),
                    old_time,
                }],
                ..CollectionChange::default()
            };
            (change, true)
        })
    }

    /// Builds an observer from the current contents and registers it before
    /// any other edit can land, so the observer misses nothing.
    pub(crate) fn attach<T, E>(
        &self,
        build: impl FnOnce(Vec<TimedObject>) -> Result<(T, Observer), E>,
    ) -> Result<T, E> {
        let mut observers = self.observers.lock();
        let snapshot = self.objects.lock().clone();
        let (value, observer) = build(snapshot)?;
        observers.push(observer);
        Ok(value)
    }

    /// Observers are locked before objects, here and in `attach`.
    fn edit<R>(&self, apply: impl FnOnce(&mut Vec<TimedObject>) -> (CollectionChange, R)) -> R {
        let mut observers = self.observers.lock();
        let (change, result) = apply(&mut self.objects.lock());
        if !change.is_empty() {
            observers.retain(|observer| observer(&change));
            trace!(observers = observers.len(), "collection change delivered");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::timing::objects::Note;

    fn observe(collection: &ObservableTimedObjects, observer: Observer) -> Vec<TimedObject> {
        collection
            .attach(|snapshot| Ok::<_, ()>((snapshot, observer)))
            .unwrap()
    }

    #[test]
    fn change_reports_the_old_time() {
        let note = Note::new(60, 100, 50);
        let id = note.id();
        let collection = ObservableTimedObjects::new([TimedObject::from(note)]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let snapshot = observe(
            &collection,
            Box::new(move |change| {
                sink.lock().push(change.clone());
                true
            }),
        );
        assert_eq!(snapshot.len(), 1);

        assert!(collection.change(id, |object| {
            if let TimedObject::Note(note) = object {
                note.time = 200;
            }
        }));
        assert!(!collection.change(ObjectId::next(), |_| {}));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].changed[0].old_time, 100);
        assert_eq!(seen[0].changed[0].object.time(), 200);
    }

    #[test]
    fn finished_observers_are_dropped() {
        let collection = ObservableTimedObjects::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        observe(
            &collection,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }),
        );

        collection.add([TimedObject::from(Note::new(60, 0, 10))]);
        collection.add([TimedObject::from(Note::new(62, 0, 10))]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn remove_returns_only_matching_objects() {
        let a = Note::new(60, 0, 10);
        let b = Note::new(62, 0, 10);
        let a_id = a.id();
        let collection = ObservableTimedObjects::new([a.into(), b.into()]);

        let removed = collection.remove(&[a_id]);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), a_id);
        assert_eq!(collection.len(), 1);
        assert!(collection.remove(&[a_id]).is_empty());
    }
}
