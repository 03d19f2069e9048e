//! barline-core - Bar-aligned request scheduling for MIDI
//!
//! Requests to play chord progressions arrive at any time. Barline queues
//! them on two lanes and starts each one on a bar boundary of a MIDI clock
//! it drives itself:
//!
//! - The chord lane plays each request once and always has priority
//! - The loop lane repeats its current request until a newer one replaces it
//! - Loops can be stopped with a backup, resumed later, and pinned
//! - Control change commands are sent right away, with interpolated sweeps
//!
//! # Usage as a Library
//!
//! ```no_run
//! use std::sync::Arc;
//! use barline_core::{Config, DummyMidiOutput, Player, PlayerSettings, Scheduler};
//!
//! # async fn run() -> barline_core::Result<()> {
//! let config = Config::load_or_default();
//! let scheduler = Scheduler::new(Arc::new(DummyMidiOutput), &config)?;
//! let player = Player::new(scheduler, PlayerSettings::from_config(&config));
//! player.start()?;
//!
//! // Plays on the next bar, then repeats until replaced
//! player.send_loop("Am F C G").await?;
//! # Ok(())
//! # }
//! ```

pub mod chord;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod output;
pub mod player;
pub mod policy;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod sweep;
pub mod timing;
pub mod turn;

// Re-export main types
pub use chord::{parse_chord, parse_progression, Chord};
pub use clock::{BarEvent, Clock, ClockState};
pub use config::{Config, MidiSettings, SweepSettings, TimingSettings};
pub use control::{expand_sweeps, parse_control_changes, ControlChange, ScheduledControlChange};
pub use error::{Error, Result};
pub use output::{DummyMidiOutput, MemoryOutput, MidiMessage, MidiOutput, RecordedMessage};
pub use player::{Player, PlayerSettings};
pub use policy::SyncMode;
pub use queue::{Lane, NowPlaying, RequestQueue, Turn};
pub use scheduler::{RenderGuard, Scheduler, SchedulerStatus};
pub use state::{SchedulerState, SharedState};
pub use sweep::{sweep, SweepStep};
pub use timing::{calculate_timeout, tick_period, Timing};
pub use turn::{wait_for_turn, TurnStatus};

#[cfg(feature = "jack")]
pub use output::{is_jack_running, list_jack_midi_ports, JackMidiOutput};
