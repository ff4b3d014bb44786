//! The playback: schedules timed objects against a clock and sends them to
//! an output device, while objects, tempo and position change live.

mod edits;
pub mod notifications;
pub(crate) mod state;

use std::any::Any;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::TickThread;
use crate::device::OutputDevice;
use crate::error::{PlaybackError, Result};
use crate::events::{Metadata, MidiEvent};
use crate::observable::{CollectionChange, ObservableTimedObjects, Observer};
use crate::settings::{PlaybackSettings, TickGeneratorKind, validate_speed};
use crate::snapping::{SnapFilter, SnapGroupId, SnapPoint, SnapPointId};
use crate::tempo::TempoMap;
use crate::time::{MetricTime, TimeSpan, TimeSpanKind};
use crate::timing::objects::{Note, NotePlaybackData, ObjectExpander, TimedObject};
use crate::tracking::TrackedParameter;

pub use notifications::PlaybackNotification;
pub use state::{EventCallback, NoteCallback};
use state::{Hooks, PlaybackState};

/// An event as scheduled on the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub time: Duration,
    pub raw_time: u64,
    pub event: MidiEvent,
}

struct Shared {
    state: Mutex<PlaybackState>,
    hooks: Hooks,
}

impl Shared {
    fn tick(&self) {
        let mut state = self.state.lock();
        if !state.disposed {
            state.tick(&self.hooks);
        }
    }

    fn apply(&self, change: &CollectionChange) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }

        for object in &change.removed {
            state.remove_object(object);
        }
        for changed in &change.changed {
            if let Err(error) = state.change_object(&changed.object, &self.hooks) {
                warn!(%error, "changed object rejected");
            }
        }
        for object in &change.added {
            if let Err(error) = state.add_object(object, false, &self.hooks) {
                warn!(%error, "added object rejected");
            }
        }
        state.after_edit(&self.hooks);
    }
}

/// Plays timed objects through an [`OutputDevice`].
///
/// All methods take `&self` and may be called from any thread. Callbacks
/// and the output device run on the tick thread with the playback locked,
/// so they must not call back into the playback.
pub struct Playback {
    shared: Arc<Shared>,
    tick_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Playback {
    pub fn new(
        objects: impl IntoIterator<Item = TimedObject>,
        tempo_map: TempoMap,
        settings: PlaybackSettings,
    ) -> Result<Self> {
        Self::build(objects, tempo_map, None, settings)
    }

    pub fn with_output(
        objects: impl IntoIterator<Item = TimedObject>,
        tempo_map: TempoMap,
        output: impl OutputDevice + 'static,
        settings: PlaybackSettings,
    ) -> Result<Self> {
        Self::build(objects, tempo_map, Some(Box::new(output)), settings)
    }

    /// Plays the contents of `collection` and follows its later changes.
    pub fn from_observable(
        collection: &ObservableTimedObjects,
        tempo_map: TempoMap,
        output: Option<Box<dyn OutputDevice>>,
        settings: PlaybackSettings,
    ) -> Result<Self> {
        collection.attach(|objects| {
            let playback = Self::build(objects, tempo_map, output, settings)?;
            let weak: Weak<Shared> = Arc::downgrade(&playback.shared);
            let observer: Observer = Box::new(move |change| match weak.upgrade() {
                Some(shared) => {
                    shared.apply(change);
                    true
                }
                None => false,
            });
            Ok::<_, PlaybackError>((playback, observer))
        })
    }

    fn build(
        objects: impl IntoIterator<Item = TimedObject>,
        tempo_map: TempoMap,
        output: Option<Box<dyn OutputDevice>>,
        settings: PlaybackSettings,
    ) -> Result<Self> {
        settings.validate()?;

        let hooks = Hooks::default();
        let mut state = PlaybackState::new(tempo_map, output, &settings);
        let mut count = 0usize;
        for object in objects {
            state.add_object(&object, true, &hooks)?;
            count += 1;
        }
        state.duration = state.store.end_time();
        state.update_bounds();
        debug!(
            objects = count,
            events = state.store.len(),
            notes = state.notes.len(),
            "playback created"
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            hooks,
        });

        let mut tick_thread = None;
        if settings.clock.generator == TickGeneratorKind::Thread {
            let weak = Arc::downgrade(&shared);
            let (ticker, handle) =
                TickThread::spawn(settings.clock.interval(), move || match weak.upgrade() {
                    Some(shared) => {
                        shared.tick();
                        true
                    }
                    None => false,
                })
                .map_err(|e| PlaybackError::TickThread(e.to_string()))?;
            shared.state.lock().ticker = Some(ticker);
            tick_thread = Some(handle);
        }

        Ok(Self {
            shared,
            tick_thread: Mutex::new(tick_thread),
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PlaybackState, &Hooks) -> T) -> Result<T> {
        let mut state = self.shared.state.lock();
        if state.disposed {
            return Err(PlaybackError::Disposed);
        }
        Ok(f(&mut state, &self.shared.hooks))
    }

    fn read<T>(&self, f: impl FnOnce(&PlaybackState) -> T) -> T {
        f(&self.shared.state.lock())
    }

    pub fn subscribe(&self) -> Receiver<PlaybackNotification> {
        self.shared.hooks.notifier.subscribe()
    }

    pub fn start(&self) -> Result<()> {
        self.with_state(|state, hooks| state.start(hooks))
    }

    pub fn stop(&self) -> Result<()> {
        self.with_state(|state, hooks| state.stop(hooks))
    }

    /// Starts and blocks until the playback stops or finishes. With a
    /// manual tick generator another thread has to call
    /// [`tick_clock`](Self::tick_clock).
    pub fn play(&self) -> Result<()> {
        self.start()?;
        while self.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// Samples the clock and plays whatever is due.
    pub fn tick_clock(&self) -> Result<()> {
        self.with_state(|state, hooks| state.tick(hooks))
    }

    pub fn is_running(&self) -> bool {
        self.read(|state| state.clock.is_running())
    }

    /// Stops playback and the tick thread. Later calls return
    /// [`PlaybackError::Disposed`]. Calling it again is a no-op.
    pub fn dispose(&self) {
        let is_tick_thread = {
            let mut state = self.shared.state.lock();
            if state.disposed {
                return;
            }
            state.stop(&self.shared.hooks);
            state.disposed = true;
            let ticker = state.ticker.take();
            if let Some(ticker) = &ticker {
                ticker.shutdown();
            }
            ticker.is_some_and(|ticker| ticker.is_current_thread())
        };

        if let Some(handle) = self.tick_thread.lock().take() {
            if !is_tick_thread && handle.join().is_err() {
                warn!("tick thread panicked");
            }
        }
        debug!("playback disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.read(|state| state.disposed)
    }

    pub fn move_to_start(&self) -> Result<()> {
        self.with_state(|state, hooks| state.move_to_start(hooks))
    }

    pub fn move_to_time(&self, time: TimeSpan) -> Result<()> {
        self.with_state(|state, hooks| {
            let time = state.tempo_map.to_metric_span(time);
            state.move_to_time(time, hooks);
        })
    }

    pub fn move_forward(&self, step: TimeSpan) -> Result<()> {
        self.with_state(|state, hooks| {
            let now = state.clock.current_time();
            let time = now + state.tempo_map.length_to_metric(now, step);
            state.move_to_time(time, hooks);
        })
    }

    /// Moves back by `step`, not before zero or the playback start.
    pub fn move_back(&self, step: TimeSpan) -> Result<()> {
        self.with_state(|state, hooks| {
            let now = state.clock.current_time();
            let time = now
                .saturating_sub(state.tempo_map.length_before_metric(now, step))
                .max(state.start_bound);
            state.move_to_time(time, hooks);
        })
    }

    pub fn current_time(&self, kind: TimeSpanKind) -> TimeSpan {
        self.read(|state| state.tempo_map.from_metric(state.clock.current_time(), kind))
    }

    /// Time of the last scheduled event.
    pub fn duration(&self, kind: TimeSpanKind) -> TimeSpan {
        self.read(|state| state.tempo_map.from_metric(state.duration, kind))
    }

    pub fn tempo_map(&self) -> TempoMap {
        self.read(|state| state.tempo_map.clone())
    }

    pub fn speed(&self) -> f64 {
        self.read(|state| state.clock.speed())
    }

    pub fn set_speed(&self, speed: f64) -> Result<()> {
        validate_speed(speed)?;
        self.with_state(|state, _| state.clock.set_speed(speed))
    }

    pub fn looped(&self) -> bool {
        self.read(|state| state.options.looped)
    }

    pub fn set_looped(&self, looped: bool) -> Result<()> {
        self.with_state(|state, _| state.options.looped = looped)
    }

    pub fn interrupt_notes_on_stop(&self) -> bool {
        self.read(|state| state.options.interrupt_notes_on_stop)
    }

    pub fn set_interrupt_notes_on_stop(&self, interrupt: bool) -> Result<()> {
        self.with_state(|state, _| state.options.interrupt_notes_on_stop = interrupt)
    }

    pub fn send_note_on_events_for_active_notes(&self) -> bool {
        self.read(|state| state.options.send_note_on_events_for_active_notes)
    }

    pub fn set_send_note_on_events_for_active_notes(&self, send: bool) -> Result<()> {
        self.with_state(|state, _| state.options.send_note_on_events_for_active_notes = send)
    }

    pub fn send_note_off_events_for_non_active_notes(&self) -> bool {
        self.read(|state| state.options.send_note_off_events_for_non_active_notes)
    }

    pub fn set_send_note_off_events_for_non_active_notes(&self, send: bool) -> Result<()> {
        self.with_state(|state, _| state.options.send_note_off_events_for_non_active_notes = send)
    }

    pub fn track_notes(&self) -> bool {
        self.read(|state| state.options.track_notes)
    }

    /// Turning note tracking on while playing starts the notes sounding
    /// at the current time.
    pub fn set_track_notes(&self, track: bool) -> Result<()> {
        self.with_state(|state, hooks| {
            let enabled = track && !state.options.track_notes;
            state.options.track_notes = track;
            if enabled && state.clock.is_running() {
                state.stop_start_notes(hooks);
            }
        })
    }

    pub fn track_program(&self) -> bool {
        self.read(|state| state.options.track_program)
    }

    pub fn set_track_program(&self, track: bool) -> Result<()> {
        self.set_tracking(TrackedParameter::Program, track)
    }

    pub fn track_pitch_value(&self) -> bool {
        self.read(|state| state.options.track_pitch_value)
    }

    pub fn set_track_pitch_value(&self, track: bool) -> Result<()> {
        self.set_tracking(TrackedParameter::PitchValue, track)
    }

    pub fn track_control_value(&self) -> bool {
        self.read(|state| state.options.track_control_value)
    }

    pub fn set_track_control_value(&self, track: bool) -> Result<()> {
        self.set_tracking(TrackedParameter::ControlValue, track)
    }

    /// Enabling a parameter immediately sends its value at the current
    /// time if the output is out of date.
    fn set_tracking(&self, parameter: TrackedParameter, track: bool) -> Result<()> {
        self.with_state(|state, hooks| {
            let flag = match parameter {
                TrackedParameter::Program => &mut state.options.track_program,
                TrackedParameter::PitchValue => &mut state.options.track_pitch_value,
                TrackedParameter::ControlValue => &mut state.options.track_control_value,
            };
            let enabled = track && !*flag;
            *flag = track;
            if enabled {
                state.send_tracked_data(&[parameter], hooks);
            }
        })
    }

    pub fn playback_start(&self) -> Option<TimeSpan> {
        self.read(|state| state.playback_start)
    }

    pub fn set_playback_start(&self, start: Option<TimeSpan>) -> Result<()> {
        self.with_state(|state, _| {
            state.playback_start = start;
            state.update_bounds();
        })
    }

    pub fn playback_end(&self) -> Option<TimeSpan> {
        self.read(|state| state.playback_end)
    }

    pub fn set_playback_end(&self, end: Option<TimeSpan>) -> Result<()> {
        self.with_state(|state, _| {
            state.playback_end = end;
            state.update_bounds();
        })
    }

    pub fn set_output_device(&self, output: Option<Box<dyn OutputDevice>>) -> Result<()> {
        self.with_state(|state, _| state.output = output)
    }

    pub fn set_note_callback(
        &self,
        callback: impl Fn(&NotePlaybackData, u64, u64, Duration) -> Option<NotePlaybackData>
        + Send
        + Sync
        + 'static,
    ) {
        let callback: Box<NoteCallback> = Box::new(callback);
        self.shared.hooks.note_callback.store(Some(Arc::new(callback)));
    }

    pub fn clear_note_callback(&self) {
        self.shared.hooks.note_callback.store(None);
    }

    pub fn set_event_callback(
        &self,
        callback: impl Fn(MidiEvent, u64, Duration) -> Option<MidiEvent> + Send + Sync + 'static,
    ) {
        let callback: Box<EventCallback> = Box::new(callback);
        self.shared.hooks.event_callback.store(Some(Arc::new(callback)));
    }

    pub fn clear_event_callback(&self) {
        self.shared.hooks.event_callback.store(None);
    }

    /// Used for objects added from now on.
    pub fn set_object_expander(&self, expander: Option<Box<dyn ObjectExpander>>) {
        self.shared.hooks.expander.store(expander.map(Arc::new));
    }

    /// Adds objects. On an invalid object the objects before it stay added.
    pub fn add_objects(&self, objects: impl IntoIterator<Item = TimedObject>) -> Result<()> {
        self.with_state(|state, hooks| {
            let mut result = Ok(());
            for object in objects {
                if let Err(error) = state.add_object(&object, false, hooks) {
                    result = Err(error);
                    break;
                }
            }
            state.after_edit(hooks);
            result
        })?
    }

    /// Removes objects by identity. Unknown objects are ignored.
    pub fn remove_objects<'a>(&self, objects: impl IntoIterator<Item = &'a TimedObject>) -> Result<()> {
        self.with_state(|state, hooks| {
            for object in objects {
                state.remove_object(object);
            }
            state.after_edit(hooks);
        })
    }

    /// Reschedules objects that were changed in place, matched by identity.
    pub fn change_objects<'a>(&self, objects: impl IntoIterator<Item = &'a TimedObject>) -> Result<()> {
        self.with_state(|state, hooks| {
            let mut result = Ok(());
            for object in objects {
                if let Err(error) = state.change_object(object, hooks) {
                    result = Err(error);
                    break;
                }
            }
            state.after_edit(hooks);
            result
        })?
    }

    /// Notes sounding on the output, as sent.
    pub fn active_notes(&self) -> Vec<Note> {
        self.read(|state| {
            state
                .active_notes
                .values()
                .map(|metadata| metadata.effective_note())
                .collect()
        })
    }

    /// Timeline notes sounding at `time`, exclusive of their start and end.
    pub fn notes_at(&self, time: TimeSpan) -> Vec<Note> {
        self.read(|state| {
            let time = state.tempo_map.to_metric_span(time);
            state
                .notes
                .active_at(time)
                .into_iter()
                .filter_map(|key| state.notes.get(key))
                .map(|metadata| metadata.note.clone())
                .collect()
        })
    }

    pub fn scheduled_events(&self) -> Vec<ScheduledEvent> {
        self.read(|state| {
            state
                .store
                .iter()
                .map(|(time, event)| ScheduledEvent {
                    time: time.as_duration(),
                    raw_time: event.raw_time,
                    event: event.event.clone(),
                })
                .collect()
        })
    }

    pub fn add_snap_point(&self, time: TimeSpan) -> Result<SnapPointId> {
        self.with_state(|state, _| {
            let time = state.tempo_map.to_metric_span(time);
            state.snapping.add_point(time, None)
        })
    }

    pub fn add_snap_point_with_data<D: Any + Send + Sync>(
        &self,
        time: TimeSpan,
        data: D,
    ) -> Result<SnapPointId> {
        self.with_state(|state, _| {
            let time = state.tempo_map.to_metric_span(time);
            let data: Metadata = Arc::new(data);
            state.snapping.add_point(time, Some(data))
        })
    }

    pub fn remove_snap_point(&self, id: SnapPointId) -> Result<()> {
        self.with_state(|state, _| {
            if state.snapping.remove_point(id) {
                Ok(())
            } else {
                Err(PlaybackError::UnknownSnapPoint)
            }
        })?
    }

    /// Removes snap points whose data is a `D` matching `predicate`.
    pub fn remove_snap_points_by_data<D: Any>(&self, predicate: impl Fn(&D) -> bool) -> Result<()> {
        self.with_state(|state, _| {
            state
                .snapping
                .remove_points_where(|point| point.data::<D>().is_some_and(&predicate))
        })
    }

    pub fn remove_all_snap_points(&self) -> Result<()> {
        self.with_state(|state, _| state.snapping.remove_points_where(|_| true))
    }

    pub fn set_snap_point_enabled(&self, id: SnapPointId, enabled: bool) -> Result<()> {
        self.with_state(|state, _| state.snapping.set_point_enabled(id, enabled))?
    }

    pub fn snap_points(&self) -> Vec<SnapPoint> {
        self.read(|state| state.snapping.points())
    }

    /// Snap points at every event matching `predicate`.
    pub fn snap_to_events(
        &self,
        predicate: impl Fn(&MidiEvent) -> bool + Send + Sync + 'static,
    ) -> Result<SnapGroupId> {
        self.with_state(|state, _| state.snapping.add_group(Arc::new(predicate)))
    }

    pub fn snap_to_notes_starts(&self) -> Result<SnapGroupId> {
        self.snap_to_events(MidiEvent::is_note_on)
    }

    pub fn snap_to_notes_ends(&self) -> Result<SnapGroupId> {
        self.snap_to_events(MidiEvent::is_note_off)
    }

    pub fn remove_snap_points_group(&self, id: SnapGroupId) -> Result<()> {
        self.with_state(|state, _| {
            if state.snapping.remove_group(id) {
                Ok(())
            } else {
                Err(PlaybackError::UnknownSnapPointsGroup)
            }
        })?
    }

    pub fn set_snap_points_group_enabled(&self, id: SnapGroupId, enabled: bool) -> Result<()> {
        self.with_state(|state, _| state.snapping.set_group_enabled(id, enabled))?
    }

    /// Returns whether the playback moved. Disabled points and points
    /// outside the playable range are refused.
    pub fn move_to_snap_point(&self, id: SnapPointId) -> Result<bool> {
        self.with_state(|state, hooks| {
            let (time, enabled) = state
                .snapping
                .point_time(id)
                .ok_or(PlaybackError::UnknownSnapPoint)?;
            Ok(enabled && state.move_to_snap(Some(time), hooks))
        })?
    }

    /// Earliest snap target of any point or group.
    pub fn move_to_first_snap_point(&self) -> Result<bool> {
        self.with_state(|state, hooks| {
            let target = state.snapping.next(
                MetricTime::from_units(-1),
                &SnapFilter::Any,
                &state.store,
            );
            state.move_to_snap(target, hooks)
        })
    }

    pub fn move_to_next_snap_point(&self) -> Result<bool> {
        self.snap(Direction::Next, &SnapFilter::Any)
    }

    pub fn move_to_previous_snap_point(&self) -> Result<bool> {
        self.snap(Direction::Previous, &SnapFilter::Any)
    }

    pub fn move_to_next_snap_point_in_group(&self, id: SnapGroupId) -> Result<bool> {
        self.snap(Direction::Next, &SnapFilter::Group(id))
    }

    pub fn move_to_previous_snap_point_in_group(&self, id: SnapGroupId) -> Result<bool> {
        self.snap(Direction::Previous, &SnapFilter::Group(id))
    }

    pub fn move_to_next_snap_point_with_data<D: Any + PartialEq>(&self, data: &D) -> Result<bool> {
        let matches = |metadata: &Metadata| metadata.downcast_ref::<D>() == Some(data);
        self.snap(Direction::Next, &SnapFilter::Data(&matches))
    }

    pub fn move_to_previous_snap_point_with_data<D: Any + PartialEq>(
        &self,
        data: &D,
    ) -> Result<bool> {
        let matches = |metadata: &Metadata| metadata.downcast_ref::<D>() == Some(data);
        self.snap(Direction::Previous, &SnapFilter::Data(&matches))
    }

    fn snap(&self, direction: Direction, filter: &SnapFilter<'_>) -> Result<bool> {
        self.with_state(|state, hooks| {
            let now = state.clock.current_time();
            let target = match direction {
                Direction::Next => state.snapping.next(now, filter, &state.store),
                Direction::Previous => state.snapping.previous(now, filter, &state.store),
            };
            state.move_to_snap(target, hooks)
        })
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Next,
    Previous,
}
