use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::TimeSource;
use crate::error::{PlaybackError, Result, ScoreError};
use crate::time::TimeSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TickGeneratorKind {
    /// Background thread ticking every `interval_ms`.
    #[default]
    Thread,
    /// Ticks only through [`Playback::tick_clock`](crate::Playback::tick_clock).
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    pub interval_ms: u64,
    pub generator: TickGeneratorKind,
    /// Wall clock when unset.
    #[serde(skip)]
    pub time_source: Option<Arc<dyn TimeSource>>,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1,
            generator: TickGeneratorKind::Thread,
            time_source: None,
        }
    }
}

impl ClockSettings {
    pub fn manual(time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            generator: TickGeneratorKind::Manual,
            time_source: Some(time_source),
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub track_notes: bool,
    pub track_program: bool,
    pub track_pitch_value: bool,
    pub track_control_value: bool,
    pub interrupt_notes_on_stop: bool,
    pub looped: bool,
    pub speed: f64,
    /// Let tempo and time signature events already in the initial objects
    /// rewrite the tempo map.
    pub calculate_tempo_map: bool,
    pub send_note_on_events_for_active_notes: bool,
    pub send_note_off_events_for_non_active_notes: bool,
    pub playback_start: Option<TimeSpan>,
    pub playback_end: Option<TimeSpan>,
    pub clock: ClockSettings,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            track_notes: true,
            track_program: true,
            track_pitch_value: true,
            track_control_value: true,
            interrupt_notes_on_stop: true,
            looped: false,
            speed: 1.0,
            calculate_tempo_map: false,
            send_note_on_events_for_active_notes: false,
            send_note_off_events_for_non_active_notes: false,
            playback_start: None,
            playback_end: None,
            clock: ClockSettings::default(),
        }
    }
}

impl PlaybackSettings {
    pub fn validate(&self) -> Result<()> {
        validate_speed(self.speed)
    }

    pub fn save(&self, path: &Path) -> std::result::Result<(), ScoreError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> std::result::Result<Self, ScoreError> {
        let ron_string = fs::read_to_string(path)?;
        let settings: PlaybackSettings = ron::from_str(&ron_string)?;
        settings.validate()?;
        Ok(settings)
    }
}

pub(crate) fn validate_speed(speed: f64) -> Result<()> {
    if !(speed.is_finite() && speed > 0.0) {
        return Err(PlaybackError::NonPositiveSpeed(speed));
    }
    Ok(())
}
