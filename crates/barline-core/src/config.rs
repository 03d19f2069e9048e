//! Configuration file support for barline
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/barline/config.toml`
//! - macOS: `~/Library/Application Support/barline/config.toml`
//! - Windows: `%APPDATA%\barline\config.toml`

use crate::error::{Error, Result};
use crate::sweep::DEFAULT_PRECISION;
use crate::timing::{
    Timing, BEATS_PER_BAR, DEFAULT_FINAL_NOTE_RATIO, DEFAULT_MULTIPLIER, PULSES_PER_QUARTER,
};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Tempo used when nothing else is configured.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Velocity used for chord notes when nothing else is configured.
pub const DEFAULT_VELOCITY: u8 = 100;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tempo and clock resolution
    pub timing: TimingSettings,
    /// Controller sweeps
    pub sweep: SweepSettings,
    /// MIDI output
    pub midi: MidiSettings,
}

/// Tempo and clock resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Beats per minute
    pub tempo: f64,
    /// Clock pulses per quarter note
    pub pulses_per_quarter: u32,
    /// Quarter notes per bar
    pub beats_per_bar: u32,
    /// Share of its length the last chord of a render keeps
    pub final_note_ratio: f64,
    /// Quarter notes per chord when a token has no duration suffix
    pub default_multiplier: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            pulses_per_quarter: PULSES_PER_QUARTER,
            beats_per_bar: BEATS_PER_BAR,
            final_note_ratio: DEFAULT_FINAL_NOTE_RATIO,
            default_multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl TimingSettings {
    pub fn to_timing(&self) -> Timing {
        Timing {
            pulses_per_quarter: self.pulses_per_quarter,
            beats_per_bar: self.beats_per_bar,
            default_multiplier: self.default_multiplier,
            final_note_ratio: self.final_note_ratio,
        }
    }
}

/// Controller sweeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Steps between two control change values
    pub precision: usize,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
        }
    }
}

/// MIDI output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// MIDI channel (0-15)
    pub channel: u8,
    /// Note velocity (1-127)
    pub velocity: u8,
    /// JACK client name
    pub client_name: String,
    /// JACK MIDI output port name
    pub port_name: String,
    /// JACK MIDI inputs to connect to
    pub auto_connect: Option<Vec<String>>,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            channel: 0,
            velocity: DEFAULT_VELOCITY,
            client_name: "barline".to_string(),
            port_name: "midi_out".to_string(),
            auto_connect: None,
        }
    }
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "barline") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)?;
        Ok(path)
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if !(t.tempo.is_finite() && t.tempo > 0.0) {
            return Err(Error::Config(format!("tempo must be positive, got {}", t.tempo)));
        }
        if t.pulses_per_quarter == 0 || t.beats_per_bar == 0 {
            return Err(Error::Config("clock resolution must be at least 1".to_string()));
        }
        if !(t.final_note_ratio > 0.0 && t.final_note_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "final_note_ratio must be in (0, 1], got {}",
                t.final_note_ratio
            )));
        }
        if !(t.default_multiplier.is_finite() && t.default_multiplier > 0.0) {
            return Err(Error::Config("default_multiplier must be positive".to_string()));
        }
        if self.sweep.precision == 0 {
            return Err(Error::Config("sweep precision must be at least 1".to_string()));
        }
        if self.midi.channel > 15 {
            return Err(Error::Config(format!("MIDI channel {} out of range", self.midi.channel)));
        }
        if !(1..=127).contains(&self.midi.velocity) {
            return Err(Error::Config(format!("velocity {} out of range", self.midi.velocity)));
        }
        Ok(())
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"# barline configuration file

[timing]
# Beats per minute
tempo = 120.0

# MIDI clock resolution (24 pulses per quarter note, 4 quarter notes per bar)
pulses_per_quarter = 24
beats_per_bar = 4

# The last chord of a request is shortened to this share of its length,
# leaving a gap before the next bar
final_note_ratio = 0.8

# Length in quarter notes of a chord written without "(n)"
default_multiplier = 4.0

[sweep]
# Steps between two control change values on the same controller
precision = 128

[midi]
# MIDI channel (0-15)
channel = 0

# Note velocity (1-127)
velocity = 100

# JACK client and port name
client_name = "barline"
port_name = "midi_out"

# Auto-connect to these JACK MIDI inputs (optional)
# auto_connect = ["a2j:Synth"]
"#;
