//! Adding, removing and changing timed objects while the playback exists,
//! including the retiming that tempo changes cause.

use tracing::{debug, trace};

use crate::error::Result;
use crate::events::MidiEvent;
use crate::notes::NoteMetadata;
use crate::playback::state::{Hooks, PlaybackState};
use crate::tempo::rescale::{TempoRescale, plan_tempo_insert, plan_tempo_remove};
use crate::tempo::{Tempo, TimeSignature};
use crate::time::{MetricTime, TimeSpan};
use crate::timeline::{Cursor, NodeId};
use crate::timing::materializer::materialize;
use crate::timing::objects::TimedObject;
use crate::tracking::TrackedParameter;

impl PlaybackState {
    /// Schedules `object`. Objects of the initial set only touch the tempo
    /// map when `calculate_tempo_map` is on.
    pub fn add_object(&mut self, object: &TimedObject, initial: bool, hooks: &Hooks) -> Result<()> {
        let expander = hooks.expander.load();
        let materialized = materialize(
            object,
            &self.tempo_map,
            &mut self.pairing,
            expander.as_ref().map(|expander| &***expander),
        )?;
        let Some(materialized) = materialized else {
            return Ok(());
        };

        let group = self
            .store
            .begin_group(materialized.object, materialized.aliases);
        let note_keys: Vec<_> = materialized
            .notes
            .into_iter()
            .map(|note| {
                let key = self
                    .notes
                    .insert(NoteMetadata::new(note.note, note.start, note.end));
                self.store.attach_note(group, key);
                key
            })
            .collect();

        let now = self.clock.current_time();
        let mut meta_changes = Vec::new();
        for event in materialized.events {
            self.trackers
                .record(&event.event, event.raw_time, event.metadata.clone());
            if matches!(
                event.event,
                MidiEvent::SetTempo { .. } | MidiEvent::TimeSignature { .. }
            ) {
                meta_changes.push((event.raw_time, event.event.clone()));
            }

            let node = self.store.insert(
                event.time,
                event.rank,
                event.event,
                event.raw_time,
                event.metadata,
                group,
                event.note.map(|index| note_keys[index]),
            );
            if !initial {
                self.pull_cursor_back(node, event.time, now);
            }
        }

        if !initial || self.options.calculate_tempo_map {
            for (time, event) in meta_changes {
                self.apply_meta_added(time, &event);
            }
        }
        Ok(())
    }

    pub fn remove_object(&mut self, object: &TimedObject) {
        let id = object.id();
        if self.pairing.withdraw(id) {
            trace!(?id, "withdrew unpaired note event");
            return;
        }

        for group in self.store.remove_object(id) {
            for key in group.notes {
                let Some(metadata) = self.notes.remove(key) else {
                    continue;
                };
                let Some(source) = metadata.note.source() else {
                    continue;
                };
                if source.on.id() == id {
                    self.pairing.park(source.off.clone());
                } else if source.off.id() == id {
                    self.pairing.park(source.on.clone());
                }
            }

            for event in group.events {
                self.trackers.forget(&event.event, event.raw_time);
                self.apply_meta_removed(event.raw_time, &event.event);
            }
        }
    }

    pub fn change_object(&mut self, object: &TimedObject, hooks: &Hooks) -> Result<()> {
        self.remove_object(object);
        self.add_object(object, false, hooks)
    }

    /// Brings derived state up to date after a batch of edits and, while
    /// playing, resyncs the output with the new timeline.
    pub fn after_edit(&mut self, hooks: &Hooks) {
        self.duration = self.store.end_time();
        self.update_bounds();
        if self.store.is_empty() {
            self.store.set_cursor(Cursor::BeforeStart);
        }

        if !self.clock.is_running() {
            return;
        }

        self.prepare_output(hooks);
        self.send_tracked_data(&TrackedParameter::ALL, hooks);
        self.stop_start_notes(hooks);

        if !self.options.looped && self.clock.current_time() >= self.end_bound {
            self.tick(hooks);
        }
    }

    /// An event added after the play position but before the cursor
    /// becomes the next event to play.
    fn pull_cursor_back(&mut self, node: NodeId, time: MetricTime, now: MetricTime) {
        let ahead = time > now || (!self.has_been_started && time >= now);
        if !ahead {
            return;
        }

        let pull = match self.store.cursor() {
            Cursor::BeforeStart => false,
            Cursor::AfterEnd => true,
            Cursor::At(current) => match (self.store.key(node), self.store.key(current)) {
                (Some(added), Some(current)) => added < current,
                _ => true,
            },
        };
        if pull {
            self.store.set_cursor(Cursor::At(node));
        }
    }

    fn apply_meta_added(&mut self, time: u64, event: &MidiEvent) {
        match *event {
            MidiEvent::SetTempo {
                microseconds_per_quarter_note,
            } => {
                let Ok(tempo) = Tempo::new(microseconds_per_quarter_note) else {
                    return;
                };
                if let Some(rescale) = plan_tempo_insert(&self.tempo_map, time, tempo) {
                    self.rescale(&rescale);
                }
                self.tempo_map.set_tempo(time, tempo);
                debug!(time, bpm = tempo.bpm(), "tempo set");
            }
            MidiEvent::TimeSignature {
                numerator,
                denominator,
            } => {
                if let Ok(signature) = TimeSignature::new(numerator, denominator) {
                    self.tempo_map.set_time_signature(time, signature);
                }
            }
            _ => {}
        }
    }

    fn apply_meta_removed(&mut self, time: u64, event: &MidiEvent) {
        let metric = self.tempo_map.to_metric(time);
        let survivors: Vec<MidiEvent> = self
            .store
            .events_at(metric)
            .filter(|e| e.raw_time == time && e.event.is_meta())
            .map(|e| e.event.clone())
            .collect();

        match *event {
            MidiEvent::SetTempo {
                microseconds_per_quarter_note,
            } => {
                let breakpoint = self.tempo_map.tempo_change_at(time);
                if breakpoint.map(|t| t.microseconds_per_quarter_note())
                    != Some(microseconds_per_quarter_note)
                {
                    return;
                }

                // The latest remaining tempo event at this tick takes over.
                let surviving = survivors.iter().rev().find_map(|e| match *e {
                    MidiEvent::SetTempo {
                        microseconds_per_quarter_note,
                    } => Tempo::new(microseconds_per_quarter_note).ok(),
                    _ => None,
                });
                let restored = match surviving {
                    Some(tempo) => {
                        if let Some(rescale) = plan_tempo_insert(&self.tempo_map, time, tempo) {
                            self.rescale(&rescale);
                        }
                        tempo
                    }
                    None => {
                        if let Some((rescale, _)) = plan_tempo_remove(&self.tempo_map, time) {
                            self.rescale(&rescale);
                        }
                        self.tempo_map.tempo_before(time)
                    }
                };
                self.tempo_map.set_tempo(time, restored);
                debug!(time, bpm = restored.bpm(), "tempo change removed");
            }
            MidiEvent::TimeSignature {
                numerator,
                denominator,
            } => {
                let matches_breakpoint = self
                    .tempo_map
                    .time_signature_change_at(time)
                    .is_some_and(|s| s.numerator == numerator && s.denominator == denominator);
                if !matches_breakpoint {
                    return;
                }
                let surviving = survivors.iter().rev().find_map(|e| match *e {
                    MidiEvent::TimeSignature {
                        numerator,
                        denominator,
                    } => TimeSignature::new(numerator, denominator).ok(),
                    _ => None,
                });
                let restored =
                    surviving.unwrap_or_else(|| self.tempo_map.time_signature_before(time));
                self.tempo_map.set_time_signature(time, restored);
            }
            _ => {}
        }
    }

    /// Moves everything keyed by metric time after a tempo change so it
    /// stays on the same tick.
    fn rescale(&mut self, rescale: &TempoRescale) {
        let threshold = rescale.change_time();
        let remap = |time: MetricTime| rescale.apply(time);

        self.store.retime_after(threshold, remap);
        self.notes.retime(remap);
        self.snapping.retime_after(threshold, remap);

        for bound in [&mut self.playback_start, &mut self.playback_end] {
            if let Some(TimeSpan::Metric(duration)) = *bound {
                let time = MetricTime::from_duration(duration);
                if rescale.affects(time) {
                    *bound = Some(TimeSpan::Metric(rescale.apply(time).as_duration()));
                }
            }
        }

        let now = self.clock.current_time();
        if rescale.affects(now) {
            self.clock.set_current_time(rescale.apply(now));
        }
        trace!(change = ?threshold.as_duration(), "rescaled timeline");
    }
}
