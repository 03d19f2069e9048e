//! Timing calculator for progression tokens and clock pulses.
//!
//! This module converts musical durations into wall-clock durations:
//!
//! - [`calculate_timeout`] - How long a progression token holds its notes
//! - [`tick_period`] - Interval between two clock pulses at a given tempo
//! - [`Timing`] - The configurable resolution these are computed with
//!
//! A token carries its length as an optional parenthesized multiplier of
//! quarter notes: `Am(2)` lasts half a bar in 4/4, `Am` lasts a whole bar.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Clock pulses per quarter note (MIDI beat clock resolution).
pub const PULSES_PER_QUARTER: u32 = 24;

/// Quarter notes per bar.
pub const BEATS_PER_BAR: u32 = 4;

/// Clock pulses per bar.
pub const PULSES_PER_BAR: u32 = PULSES_PER_QUARTER * BEATS_PER_BAR;

/// Multiplier used when a token carries no usable duration suffix.
pub const DEFAULT_MULTIPLIER: f64 = 4.0;

/// How much of its nominal length the last token of a render keeps.
pub const DEFAULT_FINAL_NOTE_RATIO: f64 = 0.8;

const NANOS_PER_MINUTE: f64 = 60e9;

static DURATION_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<body>[^()]*)\((?P<multiplier>[^()]*)\)$").expect("valid duration regex")
});

/// Check that a tempo is usable and return it.
pub fn validate_tempo(tempo: f64) -> Result<f64> {
    if tempo.is_finite() && tempo > 0.0 {
        Ok(tempo)
    } else {
        Err(Error::InvalidTempo(tempo))
    }
}

/// Split a token into its body and the raw text of its duration suffix.
///
/// ```
/// use barline_core::timing::split_duration;
///
/// assert_eq!(split_duration("Am(2)"), ("Am", Some("2")));
/// assert_eq!(split_duration("Am"), ("Am", None));
/// ```
pub fn split_duration(token: &str) -> (&str, Option<&str>) {
    let token = token.trim();
    match DURATION_SUFFIX.captures(token) {
        Some(caps) => {
            let body = caps.name("body").map_or("", |m| m.as_str());
            let multiplier = caps.name("multiplier").map(|m| m.as_str().trim());
            (body.trim(), multiplier)
        }
        None => (token, None),
    }
}

/// Clock and duration settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// Clock pulses per quarter note.
    pub pulses_per_quarter: u32,
    /// Quarter notes per bar.
    pub beats_per_bar: u32,
    /// Multiplier for tokens without a numeric suffix.
    pub default_multiplier: f64,
    /// Shortening applied to the last token of a render.
    pub final_note_ratio: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            pulses_per_quarter: PULSES_PER_QUARTER,
            beats_per_bar: BEATS_PER_BAR,
            default_multiplier: DEFAULT_MULTIPLIER,
            final_note_ratio: DEFAULT_FINAL_NOTE_RATIO,
        }
    }
}

impl Timing {
    /// Number of clock pulses in one bar.
    pub fn pulses_per_bar(&self) -> u32 {
        (self.pulses_per_quarter * self.beats_per_bar).max(1)
    }

    /// Interval between two clock pulses.
    pub fn tick_period(&self, tempo: f64) -> Result<Duration> {
        let tempo = validate_tempo(tempo)?;
        let pulses = self.pulses_per_quarter.max(1) as f64;
        Ok(Duration::from_nanos(
            (NANOS_PER_MINUTE / (tempo * pulses)).round() as u64,
        ))
    }

    /// Parse the quarter-note multiplier of a token.
    ///
    /// Absent or non-numeric suffixes fall back to the default multiplier.
    /// Numeric suffixes that are zero, negative or not finite are rejected.
    pub fn multiplier(&self, token: &str) -> Result<f64> {
        let Some(raw) = split_duration(token).1 else {
            return Ok(self.default_multiplier);
        };
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
            Ok(value) => Err(Error::InvalidDuration(format!(
                "multiplier {value} in '{token}' must be positive"
            ))),
            Err(_) => Ok(self.default_multiplier),
        }
    }

    /// How long a token holds its notes at the given tempo.
    pub fn calculate_timeout(&self, token: &str, tempo: f64) -> Result<Duration> {
        let tempo = validate_tempo(tempo)?;
        let multiplier = self.multiplier(token)?;
        Ok(Duration::from_nanos(
            (NANOS_PER_MINUTE * multiplier / tempo).round() as u64,
        ))
    }

    /// Hold durations for a whole token sequence.
    ///
    /// The last duration is shortened by the final-note ratio so the render
    /// ends before the next bar boundary.
    pub fn sequence_timeouts<S: AsRef<str>>(&self, tokens: &[S], tempo: f64) -> Result<Vec<Duration>> {
        let mut timeouts = tokens
            .iter()
            .map(|token| self.calculate_timeout(token.as_ref(), tempo))
            .collect::<Result<Vec<_>>>()?;
        if let Some(last) = timeouts.last_mut() {
            *last = self.shorten(*last);
        }
        Ok(timeouts)
    }

    /// Apply the final-note ratio to a duration.
    pub fn shorten(&self, duration: Duration) -> Duration {
        duration.mul_f64(self.final_note_ratio.clamp(0.0, 1.0))
    }
}

/// Hold duration of a token at the default resolution.
pub fn calculate_timeout(token: &str, tempo: f64) -> Result<Duration> {
    Timing::default().calculate_timeout(token, tempo)
}

/// Clock pulse interval at the default resolution.
pub fn tick_period(tempo: f64) -> Result<Duration> {
    Timing::default().tick_period(tempo)
}
