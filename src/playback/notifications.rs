use std::fmt;

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::error::DeviceError;
use crate::events::{Metadata, MidiEvent};
use crate::timing::objects::Note;

#[derive(Clone)]
pub enum PlaybackNotification {
    Started,
    Stopped,
    Finished,
    RepeatStarted,
    /// Notes as sent (after the note callback) and as stored.
    NotesPlaybackStarted {
        notes: Vec<Note>,
        original_notes: Vec<Note>,
    },
    NotesPlaybackFinished {
        notes: Vec<Note>,
        original_notes: Vec<Note>,
    },
    EventPlayed {
        event: MidiEvent,
        metadata: Option<Metadata>,
    },
    /// `event` is `None` when preparing the device failed.
    DeviceErrorOccurred {
        event: Option<MidiEvent>,
        error: DeviceError,
    },
}

impl fmt::Debug for PlaybackNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackNotification::Started => write!(f, "Started"),
            PlaybackNotification::Stopped => write!(f, "Stopped"),
            PlaybackNotification::Finished => write!(f, "Finished"),
            PlaybackNotification::RepeatStarted => write!(f, "RepeatStarted"),
            PlaybackNotification::NotesPlaybackStarted { notes, .. } => {
                f.debug_tuple("NotesPlaybackStarted").field(notes).finish()
            }
            PlaybackNotification::NotesPlaybackFinished { notes, .. } => {
                f.debug_tuple("NotesPlaybackFinished").field(notes).finish()
            }
            PlaybackNotification::EventPlayed { event, .. } => {
                f.debug_tuple("EventPlayed").field(event).finish()
            }
            PlaybackNotification::DeviceErrorOccurred { event, error } => f
                .debug_struct("DeviceErrorOccurred")
                .field("event", event)
                .field("error", error)
                .finish(),
        }
    }
}

/// Fans notifications out to every live subscriber. Subscribers whose
/// receiver was dropped are pruned on the next send.
#[derive(Default)]
pub(crate) struct Notifier {
    subscribers: Mutex<Vec<Sender<PlaybackNotification>>>,
}

impl Notifier {
    pub fn subscribe(&self) -> Receiver<PlaybackNotification> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn notify(&self, notification: PlaybackNotification) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_receivers_are_pruned() {
        let notifier = Notifier::default();
        let kept = notifier.subscribe();
        drop(notifier.subscribe());

        notifier.notify(PlaybackNotification::Started);
        assert!(matches!(kept.try_recv(), Ok(PlaybackNotification::Started)));
        assert_eq!(notifier.subscribers.lock().len(), 1);

        drop(kept);
        notifier.notify(PlaybackNotification::Stopped);
        assert!(notifier.subscribers.lock().is_empty());
    }
}
