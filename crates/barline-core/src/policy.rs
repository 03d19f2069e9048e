//! Advance and collision policy between the two lanes.
//!
//! Both decisions are pure functions over a small snapshot of queue state so
//! they can be tested without a clock or a runtime.

use crate::queue::Lane;

/// Scheduler-wide instruction for how the loop lane advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Normal advance.
    #[default]
    Off,
    /// Replay the current loop entry once more. Set by a clock restart.
    Repeat,
    /// Skip past the current loop entry on the next advance. Set by a clock stop.
    Forward,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Off => write!(f, "off"),
            SyncMode::Repeat => write!(f, "repeat"),
            SyncMode::Forward => write!(f, "forward"),
        }
    }
}

/// Everything [`should_suppress_advance`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceContext {
    pub lane: Lane,
    pub sync_mode: SyncMode,
    /// The entry at the current turn is still pending.
    pub current_exists: bool,
    /// The entry right after the current turn is pending.
    pub next_exists: bool,
    pub intake_open: bool,
    /// The chord lane has pending entries.
    pub chord_lane_busy: bool,
    /// The current turn is the lane's pinned favorite.
    pub current_is_favorite: bool,
}

/// Decide whether a `forward` on a lane must leave the current turn in place.
///
/// Only a pending loop entry is ever held back. It replays while a repeat is
/// forced, and otherwise while it has no successor, intake is closed, a chord
/// burst is pending, or it is pinned.
pub fn should_suppress_advance(ctx: &AdvanceContext) -> bool {
    if ctx.lane != Lane::Loop || !ctx.current_exists {
        return false;
    }
    match ctx.sync_mode {
        SyncMode::Repeat => true,
        SyncMode::Forward => false,
        SyncMode::Off => {
            !ctx.next_exists || !ctx.intake_open || ctx.chord_lane_busy || ctx.current_is_favorite
        }
    }
}

/// Decide whether a lane may start playing given the other lane's state.
///
/// Loops always yield to pending chord bursts. Chords never wait on loops.
pub fn is_collision_free(lane: Lane, chord_lane_busy: bool) -> bool {
    match lane {
        Lane::Chord => true,
        Lane::Loop => !chord_lane_busy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_ctx() -> AdvanceContext {
        AdvanceContext {
            lane: Lane::Loop,
            sync_mode: SyncMode::Off,
            current_exists: true,
            next_exists: true,
            intake_open: true,
            chord_lane_busy: false,
            current_is_favorite: false,
        }
    }

    #[test]
    fn test_loop_with_successor_advances() {
        assert!(!should_suppress_advance(&loop_ctx()));
    }

    #[test]
    fn test_lone_loop_repeats() {
        let ctx = AdvanceContext { next_exists: false, ..loop_ctx() };
        assert!(should_suppress_advance(&ctx));
    }

    #[test]
    fn test_loop_held_by_closed_intake_chords_or_favorite() {
        assert!(should_suppress_advance(&AdvanceContext { intake_open: false, ..loop_ctx() }));
        assert!(should_suppress_advance(&AdvanceContext { chord_lane_busy: true, ..loop_ctx() }));
        assert!(should_suppress_advance(&AdvanceContext { current_is_favorite: true, ..loop_ctx() }));
    }

    #[test]
    fn test_repeat_forces_replay() {
        let ctx = AdvanceContext { sync_mode: SyncMode::Repeat, ..loop_ctx() };
        assert!(should_suppress_advance(&ctx));
    }

    #[test]
    fn test_forward_skips_even_lone_loop() {
        let ctx = AdvanceContext {
            sync_mode: SyncMode::Forward,
            next_exists: false,
            current_is_favorite: true,
            ..loop_ctx()
        };
        assert!(!should_suppress_advance(&ctx));
    }

    #[test]
    fn test_withdrawn_current_never_suppressed() {
        let ctx = AdvanceContext {
            current_exists: false,
            sync_mode: SyncMode::Repeat,
            ..loop_ctx()
        };
        assert!(!should_suppress_advance(&ctx));
    }

    #[test]
    fn test_chord_lane_never_suppressed() {
        let ctx = AdvanceContext {
            lane: Lane::Chord,
            next_exists: false,
            sync_mode: SyncMode::Repeat,
            ..loop_ctx()
        };
        assert!(!should_suppress_advance(&ctx));
    }

    #[test]
    fn test_collision_policy() {
        assert!(is_collision_free(Lane::Chord, true));
        assert!(is_collision_free(Lane::Loop, false));
        assert!(!is_collision_free(Lane::Loop, true));
    }
}
