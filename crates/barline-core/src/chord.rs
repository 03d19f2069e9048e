//! Progression token resolution.
//!
//! A progression is a whitespace-separated list of chord tokens such as
//! `Cmaj7 Am(2) F G7(2)`. Each token resolves to a [`Chord`]: the MIDI notes
//! to hold and the token text the timing calculator reads the duration from.

use crate::error::{Error, Result};
use crate::timing::split_duration;

/// Octave used when a token does not name one (C4 = MIDI 60).
pub const DEFAULT_OCTAVE: i32 = 4;

/// Octaves a token may name, C-1 (MIDI 0) to G9 (MIDI 127).
pub const OCTAVE_RANGE: std::ops::RangeInclusive<i32> = -1..=9;

/// A resolved progression token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chord {
    /// The token as written, duration suffix included.
    pub token: String,
    /// MIDI notes to sound, lowest first.
    pub notes: Vec<u8>,
}

/// Semitone offsets from the root for a chord quality.
fn chord_intervals(quality: &str) -> Option<&'static [i16]> {
    let intervals: &'static [i16] = match quality {
        // Triads
        "" | "M" | "maj" | "major" => &[0, 4, 7],
        "m" | "min" | "minor" | "-" => &[0, 3, 7],
        "dim" | "o" => &[0, 3, 6],
        "aug" | "+" => &[0, 4, 8],
        "sus2" => &[0, 2, 7],
        "sus4" | "sus" => &[0, 5, 7],

        // Seventh chords
        "7" | "dom7" => &[0, 4, 7, 10],
        "maj7" | "M7" => &[0, 4, 7, 11],
        "m7" | "min7" | "-7" => &[0, 3, 7, 10],
        "dim7" | "o7" => &[0, 3, 6, 9],
        "m7b5" => &[0, 3, 6, 10],
        "mmaj7" | "mM7" => &[0, 3, 7, 11],

        // Extended
        "9" => &[0, 4, 7, 10, 14],
        "maj9" | "M9" => &[0, 4, 7, 11, 14],
        "m9" | "min9" => &[0, 3, 7, 10, 14],
        "add9" => &[0, 4, 7, 14],
        "6" => &[0, 4, 7, 9],
        "m6" | "min6" => &[0, 3, 7, 9],

        // Power chord
        "5" => &[0, 7],

        _ => return None,
    };
    Some(intervals)
}

/// Parse a root letter and its accidentals, returning the pitch class offset
/// and the remaining text.
fn parse_root(text: &str) -> Option<(i32, &str)> {
    let mut chars = text.char_indices().peekable();
    let (_, letter) = chars.next()?;
    let base: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let mut accidental = 0i32;
    let mut rest = &text[letter.len_utf8()..];
    while let Some(&(idx, c)) = chars.peek() {
        match c {
            '#' | '♯' => accidental = accidental.saturating_add(1),
            'b' | '♭' => accidental = accidental.saturating_sub(1),
            _ => break,
        }
        chars.next();
        rest = &text[idx + c.len_utf8()..];
    }
    Some((base.saturating_add(accidental), rest))
}

fn build_notes(root: i32, intervals: &[i16]) -> Vec<u8> {
    intervals
        .iter()
        .filter_map(|&offset| {
            let midi = root.saturating_add(offset as i32);
            if (0..=127).contains(&midi) {
                Some(midi as u8)
            } else {
                None
            }
        })
        .collect()
}

/// Resolve a single progression token.
///
/// ```
/// use barline_core::chord::parse_chord;
///
/// assert_eq!(parse_chord("C").unwrap().notes, vec![60, 64, 67]);
/// assert_eq!(parse_chord("Am7(2)").unwrap().notes, vec![69, 72, 76, 79]);
/// assert_eq!(parse_chord("E3:m").unwrap().notes, vec![52, 55, 59]);
/// ```
pub fn parse_chord(token: &str) -> Result<Chord> {
    let (body, _) = split_duration(token);
    let invalid = || Error::InvalidChord(token.trim().to_string());

    let (pitch_class, rest) = parse_root(body).ok_or_else(invalid)?;

    // "C3:maj7" names the octave explicitly, "Cmaj7" uses the default octave
    let (octave, quality) = match rest.split_once(':') {
        Some((octave, quality)) => match octave.parse::<i32>() {
            Ok(octave) if OCTAVE_RANGE.contains(&octave) => (octave, quality),
            _ => return Err(invalid()),
        },
        None => (DEFAULT_OCTAVE, rest),
    };

    let intervals = chord_intervals(quality).ok_or_else(invalid)?;
    let root = ((octave + 1) * 12).saturating_add(pitch_class);
    let notes = build_notes(root, intervals);
    if notes.is_empty() {
        return Err(invalid());
    }

    Ok(Chord {
        token: token.trim().to_string(),
        notes,
    })
}

/// Resolve every token of a progression.
///
/// Fails on the first token that does not resolve, so a request is either
/// playable in full or rejected before it touches the queue.
pub fn parse_progression(progression: &str) -> Result<Vec<Chord>> {
    let chords = progression
        .split_whitespace()
        .map(parse_chord)
        .collect::<Result<Vec<_>>>()?;
    if chords.is_empty() {
        return Err(Error::InvalidChord("empty progression".to_string()));
    }
    Ok(chords)
}
