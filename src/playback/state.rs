//! Everything the tick thread and the public API share, guarded by one
//! lock.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemTimeSource, TickThread, TimeSource};
use crate::device::OutputDevice;
use crate::events::{Metadata, MidiEvent, NoteId};
use crate::notes::{NoteActivityIndex, NoteKey, NoteMetadata};
use crate::playback::notifications::{Notifier, PlaybackNotification};
use crate::settings::PlaybackSettings;
use crate::snapping::SnapIndex;
use crate::tempo::TempoMap;
use crate::time::{MetricTime, TimeSpan};
use crate::timeline::{Cursor, NodeId, TimelineStore};
use crate::timing::materializer::NotePairing;
use crate::timing::objects::{Note, NotePlaybackData, ObjectExpander};
use crate::tracking::{ParameterTrackers, TrackedParameter};

/// Decides what is sent for a note: receives the stored playback data, the
/// note's time and length in ticks and the current playback time. `None`
/// mutes the note.
pub type NoteCallback =
    dyn Fn(&NotePlaybackData, u64, u64, Duration) -> Option<NotePlaybackData> + Send + Sync;

/// Filters or replaces non-note events: receives the event, its time in
/// ticks and the current playback time. `None` skips the event.
pub type EventCallback = dyn Fn(MidiEvent, u64, Duration) -> Option<MidiEvent> + Send + Sync;

/// Caller hooks read by the tick thread. They run with the playback lock
/// held and must not call back into the playback.
#[derive(Default)]
pub(crate) struct Hooks {
    pub note_callback: ArcSwapOption<Box<NoteCallback>>,
    pub event_callback: ArcSwapOption<Box<EventCallback>>,
    pub expander: ArcSwapOption<Box<dyn ObjectExpander>>,
    pub notifier: Notifier,
}

impl Hooks {
    fn notify(&self, notification: PlaybackNotification) {
        self.notifier.notify(notification);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Options {
    pub looped: bool,
    pub interrupt_notes_on_stop: bool,
    pub track_notes: bool,
    pub track_program: bool,
    pub track_pitch_value: bool,
    pub track_control_value: bool,
    pub send_note_on_events_for_active_notes: bool,
    pub send_note_off_events_for_non_active_notes: bool,
    pub calculate_tempo_map: bool,
}

impl From<&PlaybackSettings> for Options {
    fn from(settings: &PlaybackSettings) -> Self {
        Self {
            looped: settings.looped,
            interrupt_notes_on_stop: settings.interrupt_notes_on_stop,
            track_notes: settings.track_notes,
            track_program: settings.track_program,
            track_pitch_value: settings.track_pitch_value,
            track_control_value: settings.track_control_value,
            send_note_on_events_for_active_notes: settings.send_note_on_events_for_active_notes,
            send_note_off_events_for_non_active_notes: settings
                .send_note_off_events_for_non_active_notes,
            calculate_tempo_map: settings.calculate_tempo_map,
        }
    }
}

pub(crate) struct PlaybackState {
    pub tempo_map: TempoMap,
    pub store: TimelineStore,
    pub notes: NoteActivityIndex,
    pub trackers: ParameterTrackers,
    pub snapping: SnapIndex,
    pub pairing: NotePairing,
    pub clock: Clock,
    pub ticker: Option<TickThread>,
    pub output: Option<Box<dyn OutputDevice>>,
    /// Sounding notes by the identity they were sent with.
    pub active_notes: BTreeMap<NoteId, NoteMetadata>,
    pub options: Options,
    pub playback_start: Option<TimeSpan>,
    pub playback_end: Option<TimeSpan>,
    pub start_bound: MetricTime,
    pub end_bound: MetricTime,
    pub duration: MetricTime,
    pub has_been_started: bool,
    pub disposed: bool,
}

impl PlaybackState {
    pub fn new(
        tempo_map: TempoMap,
        output: Option<Box<dyn OutputDevice>>,
        settings: &PlaybackSettings,
    ) -> Self {
        let source: Arc<dyn TimeSource> = settings
            .clock
            .time_source
            .clone()
            .unwrap_or_else(|| Arc::new(SystemTimeSource::default()));
        let mut clock = Clock::new(source);
        clock.set_speed(settings.speed);

        Self {
            tempo_map,
            store: TimelineStore::default(),
            notes: NoteActivityIndex::default(),
            trackers: ParameterTrackers::default(),
            snapping: SnapIndex::default(),
            pairing: NotePairing::default(),
            clock,
            ticker: None,
            output,
            active_notes: BTreeMap::new(),
            options: Options::from(settings),
            playback_start: settings.playback_start,
            playback_end: settings.playback_end,
            start_bound: MetricTime::ZERO,
            end_bound: MetricTime::MAX,
            duration: MetricTime::ZERO,
            has_been_started: false,
            disposed: false,
        }
    }

    pub fn start(&mut self, hooks: &Hooks) {
        if self.clock.is_running() {
            return;
        }

        if !self.has_been_started
            && self.playback_start.is_some()
            && self.clock.current_time() < self.start_bound
        {
            self.set_start_time(self.start_bound);
        }

        self.prepare_output(hooks);
        self.send_tracked_data(&TrackedParameter::ALL, hooks);
        self.stop_start_notes(hooks);

        self.clock.start();
        if let Some(ticker) = &self.ticker {
            ticker.start();
        }
        debug!(time = ?self.clock.current_time().as_duration(), "playback started");

        let first_start = !self.has_been_started;
        self.has_been_started = true;
        hooks.notify(PlaybackNotification::Started);
        if first_start {
            self.tick(hooks);
        }
    }

    pub fn stop(&mut self, hooks: &Hooks) {
        if !self.clock.is_running() {
            return;
        }

        self.halt_clock();
        if self.options.interrupt_notes_on_stop {
            self.interrupt_active_notes(hooks);
        }
        debug!(time = ?self.clock.current_time().as_duration(), "playback stopped");
        hooks.notify(PlaybackNotification::Stopped);
    }

    /// Plays everything due up to the clock's current reading. The playback
    /// end is exclusive, and playback finishes once the clock reaches it.
    pub fn tick(&mut self, hooks: &Hooks) {
        let Some(now) = self.clock.tick() else {
            return;
        };

        loop {
            let current = self.store.current().map(|(node, time, _)| (node, time));
            if let Some((node, time)) = current {
                if time > now || time >= self.end_bound {
                    if now >= self.end_bound {
                        break;
                    }
                    return;
                }
                self.play_node(node, now, hooks);
            }
            if !self.store.advance() {
                break;
            }
        }

        self.finish_or_repeat(hooks);
    }

    pub fn move_to_time(&mut self, time: MetricTime, hooks: &Hooks) {
        let running = self.clock.is_running();
        self.set_start_time(time);
        if running {
            self.prepare_output(hooks);
            self.send_tracked_data(&TrackedParameter::ALL, hooks);
            self.stop_start_notes(hooks);
        }
    }

    pub fn move_to_start(&mut self, hooks: &Hooks) {
        self.move_to_time(self.start_bound, hooks);
    }

    /// Jumps to a snap target if it lies inside the playable range.
    pub fn move_to_snap(&mut self, target: Option<MetricTime>, hooks: &Hooks) -> bool {
        let Some(time) = target else {
            return false;
        };
        if (self.playback_start.is_some() && time < self.start_bound)
            || time > self.end_bound
            || time > self.duration
        {
            return false;
        }
        self.move_to_time(time, hooks);
        true
    }

    pub fn send_tracked_data(&mut self, parameters: &[TrackedParameter], hooks: &Hooks) {
        let enabled: Vec<TrackedParameter> = parameters
            .iter()
            .copied()
            .filter(|parameter| self.is_tracked(*parameter))
            .collect();
        if enabled.is_empty() {
            return;
        }

        let time = self.tempo_map.to_ticks(self.clock.current_time());
        for (event, metadata) in self.trackers.catch_up(time, &enabled) {
            self.play_event(event, metadata, hooks);
        }
    }

    /// Turns off sounding notes that are not sounding on the timeline at the
    /// current time and turns on timeline notes that are not sounding yet.
    pub fn stop_start_notes(&mut self, hooks: &Hooks) {
        if !self.options.track_notes {
            return;
        }

        let now = self.clock.current_time();
        let current = self.notes.active_at(now);
        let current_ids: HashSet<NoteId> = current
            .iter()
            .filter_map(|key| self.notes.get(*key))
            .map(NoteMetadata::note_id)
            .collect();
        let sounding_ids: HashSet<NoteId> = self
            .active_notes
            .values()
            .map(NoteMetadata::note_id)
            .collect();

        let to_stop: Vec<NoteMetadata> = self
            .active_notes
            .values()
            .filter(|metadata| !current_ids.contains(&metadata.note_id()))
            .cloned()
            .collect();
        let to_start: Vec<NoteKey> = current
            .into_iter()
            .filter(|key| {
                self.notes
                    .get(*key)
                    .is_some_and(|metadata| !sounding_ids.contains(&metadata.note_id()))
            })
            .collect();

        if to_stop.is_empty() && to_start.is_empty() {
            return;
        }
        trace!(stop = to_stop.len(), start = to_start.len(), "resyncing notes");

        let mut finished = NoteBatch::default();
        for mut metadata in to_stop {
            finished.push(self.play_note(&mut metadata, None, false, now, hooks));
        }
        if let Some(notification) = finished.into_finished() {
            hooks.notify(notification);
        }

        let mut started = NoteBatch::default();
        for key in to_start {
            started.push(self.play_stored_note(key, None, true, now, hooks));
        }
        if let Some(notification) = started.into_started() {
            hooks.notify(notification);
        }
    }

    pub fn interrupt_active_notes(&mut self, hooks: &Hooks) {
        if self.active_notes.is_empty() {
            return;
        }

        let now = self.clock.current_time();
        let sounding: Vec<NoteMetadata> = self.active_notes.values().cloned().collect();
        let mut finished = NoteBatch::default();
        for mut metadata in sounding {
            finished.push(self.play_note(&mut metadata, None, false, now, hooks));
        }
        self.active_notes.clear();

        if let Some(notification) = finished.into_finished() {
            hooks.notify(notification);
        }
    }

    pub fn update_bounds(&mut self) {
        self.start_bound = self
            .playback_start
            .map(|span| self.tempo_map.to_metric_span(span))
            .unwrap_or(MetricTime::ZERO);
        self.end_bound = self
            .playback_end
            .map(|span| self.tempo_map.to_metric_span(span))
            .unwrap_or(MetricTime::MAX);
    }

    pub fn is_tracked(&self, parameter: TrackedParameter) -> bool {
        match parameter {
            TrackedParameter::Program => self.options.track_program,
            TrackedParameter::PitchValue => self.options.track_pitch_value,
            TrackedParameter::ControlValue => self.options.track_control_value,
        }
    }

    pub fn prepare_output(&mut self, hooks: &Hooks) {
        let Some(output) = self.output.as_mut() else {
            return;
        };
        if let Err(error) = output.prepare_for_events_sending() {
            warn!(%error, "failed to prepare output device");
            hooks.notify(PlaybackNotification::DeviceErrorOccurred { event: None, error });
        }
    }

    /// Stops the clock without the stop notifications.
    pub fn halt_clock(&mut self) {
        self.clock.stop();
        if let Some(ticker) = &self.ticker {
            ticker.stop();
        }
    }

    /// Positions clock and cursor at `time`, clamped to the playable end.
    fn set_start_time(&mut self, time: MetricTime) {
        let limit = self.end_bound.min(self.duration);
        let beyond = time > limit;
        let time = time.min(limit);

        self.clock.set_current_time(time);
        if beyond {
            self.store.set_cursor(Cursor::AfterEnd);
        } else if time == MetricTime::ZERO {
            self.store.move_to_first();
        } else {
            self.store.seek(time);
        }
    }

    fn finish_or_repeat(&mut self, hooks: &Hooks) {
        if !self.options.looped {
            self.halt_clock();
            if self.options.interrupt_notes_on_stop {
                self.interrupt_active_notes(hooks);
            }
            debug!("playback finished");
            hooks.notify(PlaybackNotification::Finished);
            return;
        }

        self.clock.stop();
        self.set_start_time(self.start_bound);
        self.send_tracked_data(&TrackedParameter::ALL, hooks);
        self.stop_start_notes(hooks);
        self.clock.start();
        debug!("playback repeat started");
        hooks.notify(PlaybackNotification::RepeatStarted);
    }

    fn play_node(&mut self, node: NodeId, now: MetricTime, hooks: &Hooks) {
        let Some(event) = self.store.get(node).cloned() else {
            return;
        };

        if let Some(key) = event.note {
            let is_on = event.event.is_note_on();
            let played = self.play_stored_note(key, Some(event.event), is_on, now, hooks);
            if let Some((note, original)) = played {
                let batch = NoteBatch {
                    notes: vec![note],
                    original_notes: vec![original],
                };
                let notification = if is_on {
                    batch.into_started()
                } else {
                    batch.into_finished()
                };
                if let Some(notification) = notification {
                    hooks.notify(notification);
                }
            }
            return;
        }

        let mut midi = event.event;
        let callback = hooks.event_callback.load();
        if let Some(callback) = &*callback {
            match callback(midi, event.raw_time, now.as_duration()) {
                Some(replacement) => midi = replacement,
                None => {
                    trace!(raw_time = event.raw_time, "event skipped by callback");
                    return;
                }
            }
        }
        self.play_event(midi, event.metadata, hooks);
    }

    /// Plays a note event of a stored note and keeps the note callback's
    /// answer on the stored record.
    fn play_stored_note(
        &mut self,
        key: NoteKey,
        event: Option<MidiEvent>,
        is_on: bool,
        now: MetricTime,
        hooks: &Hooks,
    ) -> Option<(Note, Note)> {
        let mut metadata = self.notes.get(key)?.clone();
        let played = self.play_note(&mut metadata, event, is_on, now, hooks);
        if let Some(stored) = self.notes.get_mut(key) {
            stored.custom = metadata.custom;
        }
        played
    }

    /// Sends the on or off of a note. Returns the note as sent and as stored
    /// when something was sent.
    fn play_note(
        &mut self,
        metadata: &mut NoteMetadata,
        event: Option<MidiEvent>,
        is_on: bool,
        now: MetricTime,
        hooks: &Hooks,
    ) -> Option<(Note, Note)> {
        if is_on {
            metadata.custom = None;
            let callback = hooks.note_callback.load();
            if let Some(callback) = &*callback {
                let data = metadata.raw_data();
                metadata.custom = Some(callback(
                    &data,
                    metadata.note.time,
                    metadata.note.length,
                    now.as_duration(),
                ));
            }
        }

        let to_send = match &metadata.custom {
            Some(None) => return None,
            Some(Some(data)) => note_event(data, is_on),
            None => event.unwrap_or_else(|| note_event(&metadata.raw_data(), is_on)),
        };
        let note_id = to_send.note_id()?;

        if is_on {
            if self.active_notes.contains_key(&note_id) {
                if !self.options.send_note_on_events_for_active_notes {
                    return None;
                }
            } else {
                self.active_notes.insert(note_id, metadata.clone());
            }
        } else if self.active_notes.remove(&note_id).is_none()
            && !self.options.send_note_off_events_for_non_active_notes
        {
            return None;
        }

        let side = if is_on {
            metadata.note.on_metadata()
        } else {
            metadata.note.off_metadata()
        };
        self.play_event(to_send, side, hooks);
        Some((metadata.effective_note(), metadata.note.clone()))
    }

    fn play_event(&mut self, event: MidiEvent, metadata: Option<Metadata>, hooks: &Hooks) {
        self.trackers.sent(&event);

        if let Some(output) = self.output.as_mut() {
            if let Err(error) = output.send_event(&event) {
                warn!(%error, ?event, "output device failed");
                hooks.notify(PlaybackNotification::DeviceErrorOccurred {
                    event: Some(event),
                    error,
                });
                return;
            }
        }

        trace!(?event, "event played");
        hooks.notify(PlaybackNotification::EventPlayed { event, metadata });
    }
}

fn note_event(data: &NotePlaybackData, is_on: bool) -> MidiEvent {
    if is_on {
        data.note_on_event()
    } else {
        data.note_off_event()
    }
}

#[derive(Default)]
struct NoteBatch {
    notes: Vec<Note>,
    original_notes: Vec<Note>,
}

impl NoteBatch {
    fn push(&mut self, played: Option<(Note, Note)>) {
        if let Some((note, original)) = played {
            self.notes.push(note);
            self.original_notes.push(original);
        }
    }

    fn into_started(self) -> Option<PlaybackNotification> {
        (!self.notes.is_empty()).then_some(PlaybackNotification::NotesPlaybackStarted {
            notes: self.notes,
            original_notes: self.original_notes,
        })
    }

    fn into_finished(self) -> Option<PlaybackNotification> {
        (!self.notes.is_empty()).then_some(PlaybackNotification::NotesPlaybackFinished {
            notes: self.notes,
            original_notes: self.original_notes,
        })
    }
}
