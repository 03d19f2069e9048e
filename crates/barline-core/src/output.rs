//! MIDI output sinks.
//!
//! The scheduler drives an opaque [`MidiOutput`]. Calls are fire-and-forget
//! and keep the order they were made in.
//!
//! - [`DummyMidiOutput`] logs every call
//! - [`MemoryOutput`] records every call (tests, dry runs)
//! - `JackMidiOutput` writes to a JACK MIDI port (`jack` feature)

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Controller number of the "All Notes Off" channel mode message.
pub const ALL_NOTES_OFF_CC: u8 = 123;

/// MIDI message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Timing clock pulse (24 per quarter note)
    Clock,
    /// Transport start
    Start,
    /// Transport stop
    Stop,
    /// Note on: channel, note, velocity
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note off: channel, note
    NoteOff { channel: u8, note: u8 },
    /// Control change: channel, controller, value
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl MidiMessage {
    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::Clock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), *note & 0x7F, *velocity & 0x7F]
            }
            MidiMessage::NoteOff { channel, note } => {
                vec![0x80 | (channel & 0x0F), *note & 0x7F, 0]
            }
            MidiMessage::ControlChange { channel, controller, value } => {
                vec![0xB0 | (channel & 0x0F), *controller & 0x7F, *value & 0x7F]
            }
        }
    }
}

/// Output sink driven by the clock and the player.
pub trait MidiOutput: Send + Sync {
    /// Send one timing clock pulse
    fn clock_pulse(&self);

    /// Start the receiving transport
    fn transport_start(&self);

    /// Stop the receiving transport
    fn transport_stop(&self);

    /// Silence every sounding note on a channel
    fn all_notes_off(&self, channel: u8);

    /// Send a note on message
    fn note_on(&self, channel: u8, note: u8, velocity: u8);

    /// Send a note off message
    fn note_off(&self, channel: u8, note: u8);

    /// Send a control change message `at_offset` from now
    fn control_change(&self, channel: u8, controller: u8, value: u8, at_offset: Duration);

    /// Get the port name
    fn port_name(&self) -> &str;
}

/// Dummy MIDI output (for testing or when no backend is available)
pub struct DummyMidiOutput;

impl MidiOutput for DummyMidiOutput {
    fn clock_pulse(&self) {
        log::trace!("MIDI Clock");
    }

    fn transport_start(&self) {
        log::debug!("MIDI Start");
    }

    fn transport_stop(&self) {
        log::debug!("MIDI Stop");
    }

    fn all_notes_off(&self, channel: u8) {
        log::debug!("MIDI All Notes Off: ch={}", channel);
    }

    fn note_on(&self, channel: u8, note: u8, velocity: u8) {
        log::debug!("MIDI Note On: ch={} note={} vel={}", channel, note, velocity);
    }

    fn note_off(&self, channel: u8, note: u8) {
        log::debug!("MIDI Note Off: ch={} note={}", channel, note);
    }

    fn control_change(&self, channel: u8, controller: u8, value: u8, at_offset: Duration) {
        log::debug!(
            "MIDI CC: ch={} cc={} val={} at=+{}ms",
            channel,
            controller,
            value,
            at_offset.as_millis()
        );
    }

    fn port_name(&self) -> &str {
        "dummy"
    }
}

/// A message captured by [`MemoryOutput`], with its requested offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedMessage {
    pub message: MidiMessage,
    pub at_offset: Duration,
}

/// Output that records every message in call order.
///
/// Clones share the same recording.
#[derive(Clone, Default)]
pub struct MemoryOutput {
    messages: Arc<Mutex<Vec<RecordedMessage>>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, message: MidiMessage, at_offset: Duration) {
        self.messages
            .lock()
            .expect("Output lock poisoned")
            .push(RecordedMessage { message, at_offset });
    }

    /// Everything recorded so far.
    pub fn recorded(&self) -> Vec<RecordedMessage> {
        self.messages.lock().expect("Output lock poisoned").clone()
    }

    /// Recorded messages without clock pulses.
    pub fn messages(&self) -> Vec<MidiMessage> {
        self.recorded()
            .into_iter()
            .map(|r| r.message)
            .filter(|m| *m != MidiMessage::Clock)
            .collect()
    }

    /// Number of clock pulses recorded.
    pub fn clock_pulses(&self) -> usize {
        self.recorded()
            .iter()
            .filter(|r| r.message == MidiMessage::Clock)
            .count()
    }

    pub fn clear(&self) {
        self.messages.lock().expect("Output lock poisoned").clear();
    }
}

impl MidiOutput for MemoryOutput {
    fn clock_pulse(&self) {
        self.push(MidiMessage::Clock, Duration::ZERO);
    }

    fn transport_start(&self) {
        self.push(MidiMessage::Start, Duration::ZERO);
    }

    fn transport_stop(&self) {
        self.push(MidiMessage::Stop, Duration::ZERO);
    }

    fn all_notes_off(&self, channel: u8) {
        self.push(
            MidiMessage::ControlChange { channel, controller: ALL_NOTES_OFF_CC, value: 0 },
            Duration::ZERO,
        );
    }

    fn note_on(&self, channel: u8, note: u8, velocity: u8) {
        self.push(MidiMessage::NoteOn { channel, note, velocity }, Duration::ZERO);
    }

    fn note_off(&self, channel: u8, note: u8) {
        self.push(MidiMessage::NoteOff { channel, note }, Duration::ZERO);
    }

    fn control_change(&self, channel: u8, controller: u8, value: u8, at_offset: Duration) {
        self.push(MidiMessage::ControlChange { channel, controller, value }, at_offset);
    }

    fn port_name(&self) -> &str {
        "memory"
    }
}

#[cfg(feature = "jack")]
pub use self::jack_backend::{is_jack_running, list_jack_midi_ports, JackMidiOutput};

#[cfg(feature = "jack")]
mod jack_backend {
    use super::{MidiMessage, MidiOutput, ALL_NOTES_OFF_CC};
    use crate::config::MidiSettings;
    use crate::error::Result;
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::time::{Duration, Instant};

    /// JACK MIDI output
    pub struct JackMidiOutput {
        /// Sender for MIDI messages to the JACK process callback
        tx: Sender<(Instant, MidiMessage)>,
        /// Port name
        port_name: String,
        /// Keep the client alive
        _client: jack::AsyncClient<(), JackMidiHandler>,
    }

    impl JackMidiOutput {
        /// Create a new JACK MIDI output
        pub fn new(client_name: &str, port_name: &str) -> Result<Self> {
            let (client, _status) =
                jack::Client::new(client_name, jack::ClientOptions::NO_START_SERVER)?;
            let midi_out = client.register_port(port_name, jack::MidiOut::default())?;

            let (tx, rx) = channel();
            let handler = JackMidiHandler {
                midi_out,
                rx,
                delayed: Vec::new(),
            };
            let active_client = client.activate_async((), handler)?;

            Ok(Self {
                tx,
                port_name: format!("{}:{}", client_name, port_name),
                _client: active_client,
            })
        }

        /// Create from settings
        pub fn from_settings(settings: &MidiSettings) -> Result<Self> {
            let output = Self::new(&settings.client_name, &settings.port_name)?;
            if let Some(ref destinations) = settings.auto_connect {
                for dest in destinations {
                    log::info!("To connect: jack_connect {} {}", output.port_name, dest);
                }
            }
            Ok(output)
        }

        fn send(&self, message: MidiMessage, at_offset: Duration) {
            let _ = self.tx.send((Instant::now() + at_offset, message));
        }
    }

    impl MidiOutput for JackMidiOutput {
        fn clock_pulse(&self) {
            self.send(MidiMessage::Clock, Duration::ZERO);
        }

        fn transport_start(&self) {
            self.send(MidiMessage::Start, Duration::ZERO);
        }

        fn transport_stop(&self) {
            self.send(MidiMessage::Stop, Duration::ZERO);
        }

        fn all_notes_off(&self, channel: u8) {
            self.send(
                MidiMessage::ControlChange { channel, controller: ALL_NOTES_OFF_CC, value: 0 },
                Duration::ZERO,
            );
        }

        fn note_on(&self, channel: u8, note: u8, velocity: u8) {
            self.send(MidiMessage::NoteOn { channel, note, velocity }, Duration::ZERO);
        }

        fn note_off(&self, channel: u8, note: u8) {
            self.send(MidiMessage::NoteOff { channel, note }, Duration::ZERO);
        }

        fn control_change(&self, channel: u8, controller: u8, value: u8, at_offset: Duration) {
            self.send(MidiMessage::ControlChange { channel, controller, value }, at_offset);
        }

        fn port_name(&self) -> &str {
            &self.port_name
        }
    }

    /// JACK process handler for MIDI output
    struct JackMidiHandler {
        midi_out: jack::Port<jack::MidiOut>,
        rx: Receiver<(Instant, MidiMessage)>,
        /// Messages sent with an offset that is not due yet, in arrival order
        delayed: Vec<(Instant, MidiMessage)>,
    }

    impl jack::ProcessHandler for JackMidiHandler {
        fn process(&mut self, _client: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
            let mut writer = self.midi_out.writer(ps);
            let now = Instant::now();

            while let Ok(entry) = self.rx.try_recv() {
                self.delayed.push(entry);
            }

            self.delayed.retain(|(due, msg)| {
                if *due > now {
                    return true;
                }
                let bytes = msg.to_bytes();
                let raw = jack::RawMidi {
                    time: 0,
                    bytes: &bytes,
                };
                let _ = writer.write(&raw);
                false
            });

            jack::Control::Continue
        }
    }

    /// Check if JACK is running
    pub fn is_jack_running() -> bool {
        jack::Client::new("barline-check", jack::ClientOptions::NO_START_SERVER).is_ok()
    }

    /// List available JACK MIDI ports
    pub fn list_jack_midi_ports() -> Vec<String> {
        if let Ok((client, _)) =
            jack::Client::new("barline-list", jack::ClientOptions::NO_START_SERVER)
        {
            client.ports(None, Some("midi"), jack::PortFlags::IS_INPUT)
        } else {
            Vec::new()
        }
    }
}
