use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;
use cueline::{
    ClockSettings, DeviceError, EventRecorder, ManualTimeSource, MidiEvent, Note, ObservableTimedObjects,
    OutputDevice, Playback, PlaybackError, PlaybackNotification, PlaybackSettings, Tempo, TempoMap,
    TimeSpan, TimeSpanKind, TimedEvent, TimedObject,
};
use proptest::prelude::*;

/// One tick is one millisecond.
fn millisecond_ticks() -> TempoMap {
    TempoMap::default().with_tempo(0, Tempo::new(480_000).unwrap())
}

struct Harness {
    playback: Playback,
    source: ManualTimeSource,
    recorder: EventRecorder,
    notifications: Receiver<PlaybackNotification>,
}

impl Harness {
    fn new(objects: Vec<TimedObject>) -> Self {
        Self::with_settings(objects, millisecond_ticks(), PlaybackSettings::default())
    }

    fn with_settings(objects: Vec<TimedObject>, tempo_map: TempoMap, settings: PlaybackSettings) -> Self {
        let source = ManualTimeSource::new();
        let recorder = EventRecorder::new();
        let settings = PlaybackSettings {
            clock: ClockSettings::manual(Arc::new(source.clone())),
            ..settings
        };
        let playback = Playback::with_output(objects, tempo_map, recorder.clone(), settings).unwrap();
        let notifications = playback.subscribe();
        Self {
            playback,
            source,
            recorder,
            notifications,
        }
    }

    fn advance(&self, millis: u64) {
        self.source.advance(Duration::from_millis(millis));
        self.playback.tick_clock().unwrap();
    }

    fn drain(&self) -> Vec<PlaybackNotification> {
        self.notifications.try_iter().collect()
    }
}

fn note(number: u8, time: u64, length: u64) -> TimedObject {
    Note::new(number, time, length).into()
}

fn event(time: u64, event: MidiEvent) -> TimedObject {
    TimedEvent::new(time, event).into()
}

/// (is note-on, note number) of every note event.
fn note_events(events: &[MidiEvent]) -> Vec<(bool, u8)> {
    events
        .iter()
        .filter_map(|event| match *event {
            MidiEvent::NoteOn { note, .. } => Some((true, note)),
            MidiEvent::NoteOff { note, .. } => Some((false, note)),
            _ => None,
        })
        .collect()
}

fn metric_times(playback: &Playback) -> Vec<(u64, Duration)> {
    playback
        .scheduled_events()
        .into_iter()
        .map(|event| (event.raw_time, event.time))
        .collect()
}

#[test]
fn plays_notes_in_time_order_and_finishes() {
    let h = Harness::new(vec![note(62, 50, 100), note(60, 0, 100)]);
    h.playback.start().unwrap();
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 60)]);

    h.advance(120);
    assert_eq!(
        note_events(&h.recorder.events()),
        vec![(true, 60), (true, 62), (false, 60)]
    );
    assert!(h.playback.is_running());

    h.advance(100);
    assert_eq!(note_events(&h.recorder.events()).len(), 4);
    assert!(!h.playback.is_running());

    let notifications = h.drain();
    assert!(matches!(notifications.first(), Some(PlaybackNotification::Started)));
    assert!(matches!(notifications.last(), Some(PlaybackNotification::Finished)));
    let started = notifications
        .iter()
        .filter(|n| matches!(n, PlaybackNotification::NotesPlaybackStarted { .. }))
        .count();
    assert_eq!(started, 2);
}

#[test]
fn note_off_precedes_note_on_at_the_same_time() {
    let h = Harness::new(vec![note(60, 10, 10), note(60, 0, 10), note(64, 30, 0)]);
    h.playback.start().unwrap();
    h.advance(50);

    assert_eq!(
        note_events(&h.recorder.events()),
        vec![
            (true, 60),
            (false, 60),
            (true, 60),
            (false, 60),
            (true, 64),
            (false, 64),
        ]
    );
}

#[test]
fn live_tempo_change_rescales_later_events() {
    let h = Harness::new(vec![note(60, 0, 100)]);
    let tempo = event(50, MidiEvent::set_tempo(240_000));

    h.playback.add_objects([tempo.clone()]).unwrap();
    let times = metric_times(&h.playback);
    assert!(times.contains(&(100, Duration::from_millis(75))));
    assert_eq!(
        h.playback.tempo_map().tempo_at(60).microseconds_per_quarter_note(),
        240_000
    );
    assert_eq!(h.playback.duration(TimeSpanKind::Metric), TimeSpan::millis(75));

    h.playback.remove_objects([&tempo]).unwrap();
    assert!(metric_times(&h.playback).contains(&(100, Duration::from_millis(100))));
    assert_eq!(
        h.playback.tempo_map().tempo_at(60).microseconds_per_quarter_note(),
        480_000
    );
}

#[test]
fn removing_the_tempo_in_force_falls_back_to_its_twin() {
    let h = Harness::new(vec![note(60, 0, 10), note(62, 200, 10)]);
    let fast = event(100, MidiEvent::set_tempo(240_000));
    let slow = event(100, MidiEvent::set_tempo(960_000));
    h.playback.add_objects([fast.clone()]).unwrap();
    h.playback.add_objects([slow.clone()]).unwrap();
    assert_eq!(
        h.playback.tempo_map().tempo_at(100).microseconds_per_quarter_note(),
        960_000
    );
    assert!(metric_times(&h.playback).contains(&(200, Duration::from_millis(300))));

    h.playback.remove_objects([&slow]).unwrap();
    assert_eq!(
        h.playback.tempo_map().tempo_at(100).microseconds_per_quarter_note(),
        240_000
    );
    assert!(metric_times(&h.playback).contains(&(200, Duration::from_millis(150))));

    h.playback.remove_objects([&fast]).unwrap();
    assert_eq!(
        h.playback.tempo_map().tempo_at(100).microseconds_per_quarter_note(),
        480_000
    );
    assert!(metric_times(&h.playback).contains(&(200, Duration::from_millis(200))));
}

#[test]
fn initial_tempo_events_only_count_when_asked() {
    let objects = || vec![note(60, 0, 100), event(50, MidiEvent::set_tempo(240_000))];

    let plain = Harness::new(objects());
    assert!(metric_times(&plain.playback).contains(&(100, Duration::from_millis(100))));

    let calculated = Harness::with_settings(
        objects(),
        millisecond_ticks(),
        PlaybackSettings {
            calculate_tempo_map: true,
            ..PlaybackSettings::default()
        },
    );
    assert!(metric_times(&calculated.playback).contains(&(100, Duration::from_millis(75))));
}

#[test]
fn tempo_change_while_playing_keeps_the_tick_position() {
    let h = Harness::new(vec![note(60, 0, 200)]);
    h.playback.start().unwrap();
    h.advance(100);

    h.playback
        .add_objects([event(50, MidiEvent::set_tempo(240_000))])
        .unwrap();
    assert_eq!(h.playback.current_time(TimeSpanKind::Midi), TimeSpan::Midi(100));
    assert_eq!(h.playback.current_time(TimeSpanKind::Metric), TimeSpan::millis(75));

    // 100 ticks left at half a millisecond each.
    h.advance(49);
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 60)]);
    h.advance(1);
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 60), (false, 60)]);
}

#[test]
fn seeking_while_playing_resyncs_sounding_notes() {
    let h = Harness::new(vec![
        event(0, MidiEvent::program_change(0, 5)),
        note(60, 100, 200),
    ]);
    h.playback.start().unwrap();
    h.advance(10);
    assert_eq!(h.recorder.take(), vec![MidiEvent::program_change(0, 5)]);

    h.playback.move_to_time(TimeSpan::millis(150)).unwrap();
    assert_eq!(h.recorder.take(), vec![MidiEvent::note_on(0, 60, 100)]);
    assert_eq!(h.playback.active_notes().len(), 1);

    h.playback.move_to_time(TimeSpan::Midi(20)).unwrap();
    assert_eq!(h.recorder.take(), vec![MidiEvent::note_off(0, 60, 0)]);
    assert!(h.playback.active_notes().is_empty());
}

#[test]
fn starting_mid_score_sends_tracked_values_first() {
    let h = Harness::new(vec![
        event(0, MidiEvent::program_change(0, 5)),
        event(0, MidiEvent::control_change(0, 7, 90)),
        note(60, 100, 200),
    ]);
    h.playback.move_to_time(TimeSpan::millis(150)).unwrap();
    assert!(h.recorder.is_empty());

    h.playback.start().unwrap();
    let sent = h.recorder.take();
    assert!(sent.contains(&MidiEvent::program_change(0, 5)));
    assert!(sent.contains(&MidiEvent::control_change(0, 7, 90)));
    assert_eq!(sent.last(), Some(&MidiEvent::note_on(0, 60, 100)));

    h.advance(200);
    assert_eq!(h.recorder.take(), vec![MidiEvent::note_off(0, 60, 0)]);
}

#[test]
fn enabling_program_tracking_catches_up() {
    let h = Harness::with_settings(
        vec![event(0, MidiEvent::program_change(1, 9)), note(60, 100, 10)],
        millisecond_ticks(),
        PlaybackSettings {
            track_program: false,
            ..PlaybackSettings::default()
        },
    );
    h.playback.move_to_time(TimeSpan::millis(50)).unwrap();
    h.playback.start().unwrap();
    assert!(h.recorder.take().is_empty());

    h.playback.set_track_program(true).unwrap();
    assert_eq!(h.recorder.take(), vec![MidiEvent::program_change(1, 9)]);

    // Already current, nothing to resend.
    h.playback.set_track_program(false).unwrap();
    h.playback.set_track_program(true).unwrap();
    assert!(h.recorder.take().is_empty());
}

#[test]
fn second_unmatched_note_on_replaces_the_first() {
    let h = Harness::new(vec![
        event(0, MidiEvent::note_on(0, 60, 80)),
        event(10, MidiEvent::note_on(0, 60, 90)),
        event(20, MidiEvent::note_off(0, 60, 0)),
    ]);

    let scheduled: Vec<u64> = metric_times(&h.playback).into_iter().map(|(raw, _)| raw).collect();
    assert_eq!(scheduled, vec![10, 20]);
}

#[test]
fn unpaired_note_events_are_never_played() {
    let h = Harness::new(vec![
        event(0, MidiEvent::note_on(0, 60, 80)),
        event(5, MidiEvent::control_change(0, 1, 1)),
    ]);
    assert_eq!(h.playback.scheduled_events().len(), 1);

    h.playback.start().unwrap();
    h.advance(100);
    assert_eq!(h.recorder.events(), vec![MidiEvent::control_change(0, 1, 1)]);
    assert!(!h.playback.is_running());
}

#[test]
fn removing_a_paired_note_event_unpairs_its_partner() {
    let on = event(0, MidiEvent::note_on(0, 60, 80));
    let off = event(20, MidiEvent::note_off(0, 60, 0));
    let h = Harness::new(vec![on.clone(), off.clone()]);
    assert_eq!(h.playback.scheduled_events().len(), 2);

    h.playback.remove_objects([&off]).unwrap();
    assert!(h.playback.scheduled_events().is_empty());

    let late_off = event(30, MidiEvent::note_off(0, 60, 0));
    h.playback.add_objects([late_off]).unwrap();
    let scheduled: Vec<u64> = metric_times(&h.playback).into_iter().map(|(raw, _)| raw).collect();
    assert_eq!(scheduled, vec![0, 30]);
}

struct FlakyDevice {
    fail_next: bool,
    recorder: EventRecorder,
}

impl OutputDevice for FlakyDevice {
    fn send_event(&mut self, event: &MidiEvent) -> Result<(), DeviceError> {
        if std::mem::take(&mut self.fail_next) {
            return Err(DeviceError::Send("port closed".into()));
        }
        self.recorder.send_event(event)
    }
}

#[test]
fn device_errors_are_reported_and_playback_goes_on() {
    let h = Harness::new(vec![
        event(0, MidiEvent::control_change(0, 1, 1)),
        event(10, MidiEvent::control_change(0, 1, 2)),
    ]);
    let recorder = EventRecorder::new();
    h.playback
        .set_output_device(Some(Box::new(FlakyDevice {
            fail_next: true,
            recorder: recorder.clone(),
        })))
        .unwrap();

    h.playback.start().unwrap();
    h.advance(20);

    assert_eq!(recorder.events(), vec![MidiEvent::control_change(0, 1, 2)]);
    let errors: Vec<_> = h
        .drain()
        .into_iter()
        .filter_map(|n| match n {
            PlaybackNotification::DeviceErrorOccurred { event, .. } => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![Some(MidiEvent::control_change(0, 1, 1))]);
}

#[test]
fn looped_playback_repeats_from_the_start() {
    let h = Harness::with_settings(
        vec![note(60, 0, 100)],
        millisecond_ticks(),
        PlaybackSettings {
            looped: true,
            ..PlaybackSettings::default()
        },
    );
    h.playback.start().unwrap();
    h.advance(100);
    assert!(h.playback.is_running());
    assert!(h
        .drain()
        .iter()
        .any(|n| matches!(n, PlaybackNotification::RepeatStarted)));

    h.advance(1);
    assert_eq!(
        note_events(&h.recorder.events()),
        vec![(true, 60), (false, 60), (true, 60)]
    );
}

#[test]
fn playback_range_limits_start_and_end() {
    let h = Harness::with_settings(
        vec![note(60, 0, 10), note(62, 50, 10), note(64, 100, 10)],
        millisecond_ticks(),
        PlaybackSettings {
            playback_start: Some(TimeSpan::Midi(40)),
            playback_end: Some(TimeSpan::millis(90)),
            ..PlaybackSettings::default()
        },
    );
    h.playback.start().unwrap();
    assert_eq!(h.playback.current_time(TimeSpanKind::Midi), TimeSpan::Midi(40));

    h.advance(100);
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 62), (false, 62)]);
    assert!(!h.playback.is_running());
}

#[test]
fn playback_end_waits_for_the_clock() {
    let h = Harness::with_settings(
        vec![note(60, 0, 2000)],
        millisecond_ticks(),
        PlaybackSettings {
            playback_end: Some(TimeSpan::millis(1000)),
            ..PlaybackSettings::default()
        },
    );
    h.playback.start().unwrap();
    h.advance(10);
    assert!(h.playback.is_running());

    h.advance(989);
    assert!(h.playback.is_running());
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 60)]);

    h.advance(1);
    assert!(!h.playback.is_running());
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 60), (false, 60)]);
    assert!(matches!(h.drain().last(), Some(PlaybackNotification::Finished)));
}

#[test]
fn finishing_leaves_notes_sounding_without_interrupt() {
    let h = Harness::with_settings(
        vec![note(60, 0, 2000)],
        millisecond_ticks(),
        PlaybackSettings {
            playback_end: Some(TimeSpan::millis(1000)),
            interrupt_notes_on_stop: false,
            ..PlaybackSettings::default()
        },
    );
    h.playback.start().unwrap();
    h.advance(1000);

    assert!(!h.playback.is_running());
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 60)]);
    let notifications = h.drain();
    assert!(!notifications
        .iter()
        .any(|n| matches!(n, PlaybackNotification::NotesPlaybackFinished { .. })));
    assert!(matches!(notifications.last(), Some(PlaybackNotification::Finished)));
}

#[test]
fn move_back_is_clamped_to_the_playback_start() {
    let h = Harness::new(vec![note(60, 0, 500)]);
    h.playback.move_to_time(TimeSpan::Midi(100)).unwrap();
    h.playback.move_forward(TimeSpan::Midi(50)).unwrap();
    assert_eq!(h.playback.current_time(TimeSpanKind::Midi), TimeSpan::Midi(150));

    h.playback.move_back(TimeSpan::millis(500)).unwrap();
    assert_eq!(h.playback.current_time(TimeSpanKind::Midi), TimeSpan::Midi(0));
}

#[test]
fn snap_points_move_the_playback() {
    let h = Harness::new(vec![note(60, 0, 100), note(62, 50, 100)]);

    let origin = h.playback.add_snap_point(TimeSpan::Midi(0)).unwrap();
    let points = h.playback.snap_points();
    assert_eq!(points[0].time, Duration::from_nanos(100));
    assert!(h.playback.move_to_snap_point(origin).unwrap());

    let beyond = h.playback.add_snap_point(TimeSpan::millis(500)).unwrap();
    assert!(!h.playback.move_to_snap_point(beyond).unwrap());

    let middle = h.playback.add_snap_point_with_data(TimeSpan::millis(120), "verse").unwrap();
    h.playback.set_snap_point_enabled(middle, false).unwrap();
    assert!(!h.playback.move_to_snap_point(middle).unwrap());
    h.playback.set_snap_point_enabled(middle, true).unwrap();

    let starts = h.playback.snap_to_notes_starts().unwrap();
    assert!(h.playback.move_to_next_snap_point_in_group(starts).unwrap());
    assert_eq!(h.playback.current_time(TimeSpanKind::Metric), TimeSpan::millis(50));
    assert!(!h.playback.move_to_next_snap_point_in_group(starts).unwrap());

    assert!(h.playback.move_to_next_snap_point_with_data(&"verse").unwrap());
    assert_eq!(h.playback.current_time(TimeSpanKind::Metric), TimeSpan::millis(120));
    assert!(h.playback.move_to_previous_snap_point().unwrap());
    assert_eq!(h.playback.current_time(TimeSpanKind::Metric), TimeSpan::millis(50));

    h.playback
        .remove_snap_points_by_data::<&'static str>(|tag| *tag == "verse")
        .unwrap();
    assert_eq!(h.playback.snap_points().len(), 2);
    assert_eq!(
        h.playback.remove_snap_point(middle),
        Err(PlaybackError::UnknownSnapPoint)
    );
}

#[test]
fn callbacks_can_skip_and_replace() {
    let h = Harness::new(vec![
        event(0, MidiEvent::program_change(0, 3)),
        event(0, MidiEvent::control_change(0, 7, 100)),
        note(60, 10, 10),
    ]);
    h.playback.set_event_callback(|event, _, _| match event {
        MidiEvent::ProgramChange { .. } => None,
        MidiEvent::ControlChange { channel, control, .. } => {
            Some(MidiEvent::control_change(channel, control, 50))
        }
        other => Some(other),
    });
    h.playback.set_note_callback(|data, _, _, _| {
        let mut data = *data;
        data.note_number += 12;
        Some(data)
    });

    h.playback.start().unwrap();
    h.advance(15);
    assert_eq!(h.playback.active_notes()[0].note_number, 72);
    h.advance(10);

    assert_eq!(
        h.recorder.events(),
        vec![
            MidiEvent::control_change(0, 7, 50),
            MidiEvent::note_on(0, 72, 100),
            MidiEvent::note_off(0, 72, 0),
        ]
    );
    let started = h.drain().into_iter().find_map(|n| match n {
        PlaybackNotification::NotesPlaybackStarted {
            notes,
            original_notes,
        } => Some((notes, original_notes)),
        _ => None,
    });
    let (notes, original_notes) = started.unwrap();
    assert_eq!(notes[0].note_number, 72);
    assert_eq!(original_notes[0].note_number, 60);
}

#[test]
fn muted_note_sends_neither_on_nor_off() {
    let h = Harness::new(vec![note(60, 0, 10), note(62, 0, 10)]);
    h.playback.set_note_callback(|data, _, _, _| (data.note_number != 60).then_some(*data));
    h.playback.start().unwrap();
    h.advance(20);

    assert_eq!(note_events(&h.recorder.events()), vec![(true, 62), (false, 62)]);
}

#[test]
fn metadata_travels_with_played_events() {
    let tagged = TimedEvent::new(0, MidiEvent::control_change(0, 1, 1)).with_metadata(Arc::new(7u32));
    let h = Harness::new(vec![tagged.into()]);
    h.playback.start().unwrap();

    let metadata = h.drain().into_iter().find_map(|n| match n {
        PlaybackNotification::EventPlayed { metadata, .. } => metadata,
        _ => None,
    });
    assert_eq!(metadata.unwrap().downcast_ref::<u32>(), Some(&7));
}

#[test]
fn speed_must_be_positive() {
    let h = Harness::new(vec![note(60, 0, 10)]);
    assert_eq!(h.playback.set_speed(0.0), Err(PlaybackError::NonPositiveSpeed(0.0)));
    h.playback.set_speed(2.0).unwrap();
    h.playback.start().unwrap();
    h.advance(5);
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 60), (false, 60)]);

    let rejected = Playback::new(
        Vec::new(),
        TempoMap::default(),
        PlaybackSettings {
            speed: -1.0,
            ..PlaybackSettings::default()
        },
    );
    assert!(matches!(rejected, Err(PlaybackError::NonPositiveSpeed(_))));
}

#[test]
fn disposed_playback_rejects_operations() {
    let h = Harness::new(vec![note(60, 0, 100)]);
    h.playback.start().unwrap();
    h.advance(10);

    h.playback.dispose();
    h.playback.dispose();
    assert!(h.playback.is_disposed());
    assert!(!h.playback.is_running());
    assert_eq!(note_events(&h.recorder.events()), vec![(true, 60), (false, 60)]);
    assert_eq!(h.playback.start(), Err(PlaybackError::Disposed));
    assert_eq!(
        h.playback.add_objects([note(62, 0, 10)]),
        Err(PlaybackError::Disposed)
    );
}

#[test]
fn live_edits_resync_sounding_notes() {
    let a = note(60, 0, 100);
    let h = Harness::new(vec![a.clone()]);
    h.playback.start().unwrap();
    h.advance(30);
    h.recorder.take();

    h.playback.add_objects([note(64, 10, 100), note(62, 50, 10)]).unwrap();
    assert_eq!(note_events(&h.recorder.take()), vec![(true, 64)]);

    h.advance(25);
    assert_eq!(note_events(&h.recorder.take()), vec![(true, 62)]);

    h.playback.remove_objects([&a]).unwrap();
    assert_eq!(note_events(&h.recorder.take()), vec![(false, 60)]);
}

#[test]
fn edit_past_the_playback_end_finishes() {
    let h = Harness::new(vec![note(60, 0, 200)]);
    h.playback.start().unwrap();
    h.advance(50);

    h.playback.set_playback_end(Some(TimeSpan::Midi(40))).unwrap();
    h.playback.add_objects(Vec::new()).unwrap();

    assert!(!h.playback.is_running());
    assert!(h
        .drain()
        .iter()
        .any(|n| matches!(n, PlaybackNotification::Finished)));
}

#[test]
fn observable_collection_edits_reach_the_playback() {
    let collection = ObservableTimedObjects::new([note(60, 0, 10)]);
    let source = ManualTimeSource::new();
    let playback = Playback::from_observable(
        &collection,
        millisecond_ticks(),
        None,
        PlaybackSettings {
            clock: ClockSettings::manual(Arc::new(source)),
            ..PlaybackSettings::default()
        },
    )
    .unwrap();
    assert_eq!(playback.scheduled_events().len(), 2);

    let moved = Note::new(62, 0, 10);
    let id = moved.id();
    collection.add([moved.into()]);
    assert_eq!(playback.scheduled_events().len(), 4);

    collection.change(id, |object| {
        if let TimedObject::Note(note) = object {
            note.time = 100;
        }
    });
    assert_eq!(playback.duration(TimeSpanKind::Midi), TimeSpan::Midi(110));

    collection.remove(&[id]);
    assert_eq!(playback.duration(TimeSpanKind::Midi), TimeSpan::Midi(10));

    drop(playback);
    collection.add([note(64, 0, 10)]);
}

#[test]
fn playback_attached_during_edits_sees_every_object() {
    let collection = ObservableTimedObjects::new([note(60, 0, 10)]);
    let settings = || PlaybackSettings {
        clock: ClockSettings::manual(Arc::new(ManualTimeSource::new())),
        ..PlaybackSettings::default()
    };

    let playbacks = std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for time in 0..200 {
                collection.add([note(62, time, 10)]);
            }
        });
        let playbacks: Vec<Playback> = (0..20)
            .map(|_| {
                Playback::from_observable(&collection, millisecond_ticks(), None, settings()).unwrap()
            })
            .collect();
        writer.join().unwrap();
        playbacks
    });

    assert_eq!(collection.len(), 201);
    for playback in &playbacks {
        assert_eq!(playback.scheduled_events().len(), 2 * collection.len());
    }
}

#[test]
fn thread_generator_plays_to_the_end() {
    let recorder = EventRecorder::new();
    let playback = Playback::with_output(
        vec![note(60, 0, 5), note(62, 5, 5)],
        millisecond_ticks(),
        recorder.clone(),
        PlaybackSettings::default(),
    )
    .unwrap();

    playback.play().unwrap();
    assert_eq!(
        note_events(&recorder.events()),
        vec![(true, 60), (false, 60), (true, 62), (false, 62)]
    );
}

proptest! {
    #[test]
    fn rescaled_times_match_the_new_tempo_map(
        notes in proptest::collection::vec((0u64..2000, 0u64..300), 1..20),
        change_at in 1u64..2000,
        microseconds in 240_000u32..960_000,
    ) {
        let objects: Vec<TimedObject> = notes
            .iter()
            .map(|&(time, length)| note(60, time, length))
            .collect();
        let h = Harness::with_settings(objects, TempoMap::default(), PlaybackSettings::default());
        h.playback
            .add_objects([event(change_at, MidiEvent::set_tempo(microseconds))])
            .unwrap();

        let map = h.playback.tempo_map();
        let scheduled = h.playback.scheduled_events();
        for pair in scheduled.windows(2) {
            prop_assert!(pair[0].time <= pair[1].time);
        }
        for event in &scheduled {
            let expected = map.to_metric(event.raw_time).as_duration();
            let error = expected.abs_diff(event.time);
            prop_assert!(error <= Duration::from_nanos(500), "raw {} off by {:?}", event.raw_time, error);
        }
    }

    #[test]
    fn tempo_insert_then_remove_restores_times(
        notes in proptest::collection::vec((0u64..2000, 0u64..300), 1..20),
        change_at in 1u64..1000,
        later_at in 1000u64..2000,
        microseconds in 240_000u32..960_000,
        later_microseconds in 240_000u32..960_000,
    ) {
        let objects: Vec<TimedObject> = notes
            .iter()
            .map(|&(time, length)| note(60, time, length))
            .collect();
        let tempo_map = TempoMap::default().with_tempo(later_at, Tempo::new(later_microseconds).unwrap());
        let h = Harness::with_settings(objects, tempo_map, PlaybackSettings::default());
        let mut before = metric_times(&h.playback);

        let tempo = event(change_at, MidiEvent::set_tempo(microseconds));
        h.playback.add_objects([tempo.clone()]).unwrap();
        let map = h.playback.tempo_map();
        let scheduled = h.playback.scheduled_events();
        for pair in scheduled.windows(2) {
            prop_assert!(pair[0].time <= pair[1].time);
        }
        for event in &scheduled {
            let error = map.to_metric(event.raw_time).as_duration().abs_diff(event.time);
            prop_assert!(error <= Duration::from_nanos(500), "raw {} off by {:?}", event.raw_time, error);
        }

        h.playback.remove_objects([&tempo]).unwrap();
        let mut after = metric_times(&h.playback);
        before.sort();
        after.sort();
        prop_assert_eq!(before.len(), after.len());
        for (&(raw, expected), &(restored_raw, restored)) in before.iter().zip(&after) {
            prop_assert_eq!(raw, restored_raw);
            prop_assert!(
                expected.abs_diff(restored) <= Duration::from_nanos(100),
                "raw {} drifted from {:?} to {:?}", raw, expected, restored
            );
        }
    }
}
