//! Output sinks for played events.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::DeviceError;
use crate::events::MidiEvent;

/// Receives every event the playback plays, on the tick thread.
pub trait OutputDevice: Send {
    /// Called before a batch of events after start and after jumps.
    fn prepare_for_events_sending(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn send_event(&mut self, event: &MidiEvent) -> Result<(), DeviceError>;
}

/// Collects sent events in memory. Clones share the same buffer, so a
/// clone kept outside the playback can inspect what was played.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<MidiEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MidiEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded events and empties the buffer.
    pub fn take(&self) -> Vec<MidiEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl OutputDevice for EventRecorder {
    fn send_event(&mut self, event: &MidiEvent) -> Result<(), DeviceError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Writes every event to the log.
#[derive(Debug, Default)]
pub struct LogDevice {
    sent: u64,
}

impl OutputDevice for LogDevice {
    fn prepare_for_events_sending(&mut self) -> Result<(), DeviceError> {
        debug!(sent = self.sent, "log device ready");
        Ok(())
    }

    fn send_event(&mut self, event: &MidiEvent) -> Result<(), DeviceError> {
        self.sent += 1;
        info!(?event, "event");
        Ok(())
    }
}

#[cfg(feature = "midir-output")]
pub use midir_output::MidirOutput;

#[cfg(feature = "midir-output")]
mod midir_output {
    use midir::{MidiOutput, MidiOutputConnection};
    use tracing::{debug, warn};

    use super::OutputDevice;
    use crate::error::DeviceError;
    use crate::events::MidiEvent;

    /// Hardware or virtual MIDI port.
    pub struct MidirOutput {
        connection: MidiOutputConnection,
        port_name: String,
    }

    impl MidirOutput {
        /// Connects to the first port whose name contains `name`, or to the
        /// first port when `name` is `None`.
        pub fn connect(name: Option<&str>) -> Result<Self, DeviceError> {
            let output =
                MidiOutput::new("cueline").map_err(|e| DeviceError::Send(e.to_string()))?;

            let ports = output.ports();
            let port = ports
                .iter()
                .find(|port| match name {
                    Some(name) => output
                        .port_name(port)
                        .map(|port_name| port_name.contains(name))
                        .unwrap_or(false),
                    None => true,
                })
                .ok_or(DeviceError::NotConnected)?;
            let port_name = output
                .port_name(port)
                .unwrap_or_else(|_| "unknown".to_string());

            let connection = output
                .connect(port, "cueline-output")
                .map_err(|e| DeviceError::Send(e.to_string()))?;
            debug!(port = %port_name, "connected MIDI output");

            Ok(Self {
                connection,
                port_name,
            })
        }

        pub fn port_names() -> Vec<String> {
            let Ok(output) = MidiOutput::new("cueline") else {
                return Vec::new();
            };
            output
                .ports()
                .iter()
                .filter_map(|port| output.port_name(port).ok())
                .collect()
        }

        pub fn port_name(&self) -> &str {
            &self.port_name
        }
    }

    impl OutputDevice for MidirOutput {
        fn send_event(&mut self, event: &MidiEvent) -> Result<(), DeviceError> {
            let Some(bytes) = encode(event) else {
                return Ok(());
            };
            self.connection.send(&bytes).map_err(|e| {
                warn!(port = %self.port_name, error = %e, "MIDI send failed");
                DeviceError::Send(e.to_string())
            })
        }
    }

    /// Wire bytes of channel and system exclusive messages. Meta events have
    /// no wire form.
    pub(super) fn encode(event: &MidiEvent) -> Option<Vec<u8>> {
        let bytes = match *event {
            MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            } => vec![0x80 | channel, note, velocity],
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | channel, note, velocity],
            MidiEvent::PolyPressure {
                channel,
                note,
                pressure,
            } => vec![0xA0 | channel, note, pressure],
            MidiEvent::ControlChange {
                channel,
                control,
                value,
            } => vec![0xB0 | channel, control, value],
            MidiEvent::ProgramChange { channel, program } => vec![0xC0 | channel, program],
            MidiEvent::ChannelPressure { channel, pressure } => vec![0xD0 | channel, pressure],
            MidiEvent::PitchBend { channel, value } => {
                vec![0xE0 | channel, (value & 0x7F) as u8, (value >> 7) as u8 & 0x7F]
            }
            MidiEvent::SysEx(ref data) => {
                let mut bytes = Vec::with_capacity(data.len() + 2);
                bytes.push(0xF0);
                bytes.extend_from_slice(data);
                if data.last() != Some(&0xF7) {
                    bytes.push(0xF7);
                }
                bytes
            }
            _ => return None,
        };
        Some(bytes)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn pitch_bend_is_lsb_first() {
            assert_eq!(
                encode(&MidiEvent::pitch_bend(1, 8192)),
                Some(vec![0xE1, 0x00, 0x40])
            );
            assert_eq!(encode(&MidiEvent::set_tempo(500_000)), None);
        }
    }
}
