//! Turn-indexed request queue with one lane per request category.
//!
//! Every lane hands out turns in arrival order and serves them strictly in
//! that order. Served or removed entries stay behind as tombstones so a turn
//! number is never reused. A lane can be cleared tentatively and rolled back
//! as long as no new request arrived in between.

use crate::error::{Error, Result};
use crate::policy::{is_collision_free, should_suppress_advance, AdvanceContext, SyncMode};
use std::collections::BTreeMap;

/// Sequence number of a request within its lane.
pub type Turn = u64;

/// Request category. Each lane has its own turn sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    /// One-shot chord progressions.
    Chord,
    /// Repeating progressions.
    Loop,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Chord, Lane::Loop];
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lane::Chord => write!(f, "chord lane"),
            Lane::Loop => write!(f, "loop lane"),
        }
    }
}

/// The entry currently being rendered to the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub lane: Lane,
    pub turn: Turn,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Pending(String),
    /// Served or removed.
    Done,
}

/// State of a lane at the moment it was cleared with backup.
#[derive(Debug, Clone)]
struct Snapshot {
    entries: BTreeMap<Turn, Slot>,
    current_turn: Turn,
    next_turn: Turn,
    last_payload: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct LaneQueue {
    entries: BTreeMap<Turn, Slot>,
    next_turn: Turn,
    current_turn: Turn,
    last_payload: Option<String>,
    favorite: Option<Turn>,
    backup: Option<Snapshot>,
}

impl LaneQueue {
    fn is_pending(&self, turn: Turn) -> bool {
        matches!(self.entries.get(&turn), Some(Slot::Pending(_)))
    }

    /// Pending entries never sit below the current turn, so only the tail
    /// is scanned.
    fn has_pending(&self) -> bool {
        self.entries
            .range(self.current_turn..)
            .any(|(_, slot)| matches!(slot, Slot::Pending(_)))
    }
}

/// Per-lane request queues plus the scheduler-wide flags that steer them.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    chord: LaneQueue,
    loops: LaneQueue,
    intake_open: bool,
    sync_mode: SyncMode,
    now_playing: Option<NowPlaying>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    /// Create an empty queue with intake open and sync mode off.
    pub fn new() -> Self {
        Self {
            chord: LaneQueue::default(),
            loops: LaneQueue::default(),
            intake_open: true,
            sync_mode: SyncMode::Off,
            now_playing: None,
        }
    }

    fn lane(&self, lane: Lane) -> &LaneQueue {
        match lane {
            Lane::Chord => &self.chord,
            Lane::Loop => &self.loops,
        }
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut LaneQueue {
        match lane {
            Lane::Chord => &mut self.chord,
            Lane::Loop => &mut self.loops,
        }
    }

    /// Append a request and return its turn.
    ///
    /// Rejects a payload identical to the previous one on the same lane.
    pub fn enqueue(&mut self, lane: Lane, payload: impl Into<String>) -> Result<Turn> {
        let payload = payload.into();
        if !self.intake_open {
            return Err(Error::IntakeClosed(lane));
        }
        let queue = self.lane_mut(lane);
        if queue.last_payload.as_deref() == Some(payload.as_str()) {
            return Err(Error::DuplicateRequest { lane, payload });
        }

        let turn = queue.next_turn;
        queue.next_turn += 1;
        queue.entries.insert(turn, Slot::Pending(payload.clone()));
        queue.last_payload = Some(payload);
        log::debug!("[QUEUE] {} enqueued turn {}", lane, turn);
        Ok(turn)
    }

    /// Whether a turn still has a pending entry.
    pub fn is_in_queue(&self, lane: Lane, turn: Turn) -> bool {
        self.lane(lane).is_pending(turn)
    }

    /// The turn currently eligible to play.
    pub fn current_turn(&self, lane: Lane) -> Turn {
        self.lane(lane).current_turn
    }

    /// Whether a lane has no pending entries.
    pub fn is_empty(&self, lane: Lane) -> bool {
        !self.lane(lane).has_pending()
    }

    /// Pending entries of a lane in turn order.
    pub fn pending(&self, lane: Lane) -> Vec<(Turn, String)> {
        self.lane(lane)
            .entries
            .iter()
            .filter_map(|(turn, slot)| match slot {
                Slot::Pending(payload) => Some((*turn, payload.clone())),
                Slot::Done => None,
            })
            .collect()
    }

    /// Payload of a pending entry.
    pub fn payload(&self, lane: Lane, turn: Turn) -> Option<&str> {
        match self.lane(lane).entries.get(&turn) {
            Some(Slot::Pending(payload)) => Some(payload),
            _ => None,
        }
    }

    fn advance_context(&self, lane: Lane) -> AdvanceContext {
        let queue = self.lane(lane);
        AdvanceContext {
            lane,
            sync_mode: self.sync_mode,
            current_exists: queue.is_pending(queue.current_turn),
            next_exists: queue.is_pending(queue.current_turn + 1),
            intake_open: self.intake_open,
            chord_lane_busy: !self.is_empty(Lane::Chord),
            current_is_favorite: queue.favorite == Some(queue.current_turn),
        }
    }

    /// Move a lane on to its next turn, unless the current loop entry has to
    /// repeat. Returns whether the lane advanced.
    pub fn forward(&mut self, lane: Lane) -> bool {
        let ctx = self.advance_context(lane);
        if should_suppress_advance(&ctx) {
            if lane == Lane::Loop && self.sync_mode == SyncMode::Repeat {
                log::debug!("[QUEUE] forced repeat done, sync mode off");
                self.sync_mode = SyncMode::Off;
            }
            return false;
        }

        let queue = self.lane_mut(lane);
        if queue.current_turn >= queue.next_turn {
            return false;
        }
        let previous = queue.current_turn;
        if let Some(slot) = queue.entries.get_mut(&previous) {
            *slot = Slot::Done;
        }
        // Only the latest tombstone is kept
        queue.entries = queue.entries.split_off(&previous);
        queue.current_turn += 1;
        log::debug!("[QUEUE] {} forwarded to turn {}", lane, previous + 1);

        if lane == Lane::Loop && self.sync_mode == SyncMode::Forward {
            self.sync_mode = SyncMode::Off;
        }
        if self.is_empty(Lane::Chord) && self.is_empty(Lane::Loop) {
            self.now_playing = None;
        }
        true
    }

    /// Drop every entry of a lane.
    ///
    /// With `backup`, the outgoing entries are kept for [`rollback`]. Without
    /// it, any earlier backup is discarded as well.
    ///
    /// [`rollback`]: RequestQueue::rollback
    pub fn clear(&mut self, lane: Lane, backup: bool) {
        let queue = self.lane_mut(lane);
        let entries = std::mem::take(&mut queue.entries);
        let last_payload = queue.last_payload.take();

        if !backup {
            queue.backup = None;
            log::debug!("[QUEUE] {} cleared", lane);
            return;
        }

        let snapshot = match queue.backup.take() {
            // An older backup is the state to roll back to; newer entries win
            Some(mut older) => {
                older.entries.extend(entries);
                older
            }
            None => Snapshot {
                entries,
                current_turn: queue.current_turn,
                next_turn: queue.next_turn,
                last_payload,
            },
        };
        queue.backup = Some(snapshot);
        log::debug!("[QUEUE] {} cleared with backup", lane);
    }

    /// Merge the last backup back under the lane's current entries.
    ///
    /// If nothing was enqueued since the clear, the lane's current turn is
    /// restored too, so the interrupted entry resumes. Otherwise only backed
    /// up entries at or after the current turn come back. Returns the turns
    /// that became pending again.
    pub fn rollback(&mut self, lane: Lane) -> Vec<Turn> {
        let queue = self.lane_mut(lane);
        let Some(snapshot) = queue.backup.take() else {
            return Vec::new();
        };

        let untouched = queue.next_turn == snapshot.next_turn;
        if untouched {
            queue.current_turn = snapshot.current_turn;
            queue.last_payload = snapshot.last_payload;
        }

        let mut restored = Vec::new();
        for (turn, slot) in snapshot.entries {
            if !untouched && turn < queue.current_turn {
                continue;
            }
            if queue.entries.contains_key(&turn) {
                continue;
            }
            if matches!(slot, Slot::Pending(_)) {
                restored.push(turn);
            }
            queue.entries.insert(turn, slot);
        }
        log::debug!("[QUEUE] {} rolled back {} entries", lane, restored.len());
        restored
    }

    /// Whether a cleared lane can still be rolled back.
    pub fn has_backup(&self, lane: Lane) -> bool {
        self.lane(lane).backup.is_some()
    }

    /// Pin a turn so it keeps repeating even when successors are queued.
    pub fn mark_favorite(&mut self, lane: Lane, turn: Turn) {
        self.lane_mut(lane).favorite = Some(turn);
    }

    pub fn unmark_favorite(&mut self, lane: Lane) {
        self.lane_mut(lane).favorite = None;
    }

    pub fn favorite(&self, lane: Lane) -> Option<Turn> {
        self.lane(lane).favorite
    }

    /// Whether a lane may start playing now.
    pub fn is_collision_free(&self, lane: Lane) -> bool {
        is_collision_free(lane, !self.is_empty(Lane::Chord))
    }

    pub fn set_intake_open(&mut self, open: bool) {
        self.intake_open = open;
    }

    pub fn is_intake_open(&self) -> bool {
        self.intake_open
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode) {
        if self.sync_mode != mode {
            log::debug!("[QUEUE] sync mode {} -> {}", self.sync_mode, mode);
        }
        self.sync_mode = mode;
    }

    pub fn now_playing(&self) -> Option<&NowPlaying> {
        self.now_playing.as_ref()
    }

    /// Record what is being rendered. Returns false if nothing changed.
    pub fn set_now_playing(&mut self, lane: Lane, turn: Turn, payload: &str) -> bool {
        let unchanged = self
            .now_playing
            .as_ref()
            .is_some_and(|np| np.lane == lane && np.payload == payload);
        if unchanged {
            return false;
        }
        log::info!("Now playing on {}: {}", lane, payload);
        self.now_playing = Some(NowPlaying {
            lane,
            turn,
            payload: payload.to_string(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_increase_by_one() {
        let mut queue = RequestQueue::new();
        let turns: Vec<Turn> = ["C G", "Am F", "Dm G"]
            .iter()
            .map(|p| queue.enqueue(Lane::Chord, *p).unwrap())
            .collect();
        assert_eq!(turns, vec![0, 1, 2]);
        assert!(turns.iter().all(|t| queue.is_in_queue(Lane::Chord, *t)));
        // Lanes count independently
        assert_eq!(queue.enqueue(Lane::Loop, "C G").unwrap(), 0);
    }

    #[test]
    fn test_duplicate_request() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Chord, "C G").unwrap();
        let err = queue.enqueue(Lane::Chord, "C G").unwrap_err();
        assert!(matches!(err, Error::DuplicateRequest { lane: Lane::Chord, .. }));
        assert_eq!(queue.pending(Lane::Chord).len(), 1);

        // Other lane or after a different payload is fine
        assert!(queue.enqueue(Lane::Loop, "C G").is_ok());
        assert!(queue.enqueue(Lane::Chord, "Am").is_ok());
        assert!(queue.enqueue(Lane::Chord, "C G").is_ok());
    }

    #[test]
    fn test_forward_tombstones_previous() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Chord, "C").unwrap();
        queue.enqueue(Lane::Chord, "G").unwrap();
        assert!(queue.forward(Lane::Chord));
        assert!(!queue.is_in_queue(Lane::Chord, 0));
        assert!(queue.is_in_queue(Lane::Chord, 1));
        assert_eq!(queue.current_turn(Lane::Chord), 1);
    }

    #[test]
    fn test_old_tombstones_are_pruned() {
        let mut queue = RequestQueue::new();
        for i in 0..100 {
            queue.enqueue(Lane::Chord, format!("C({})", i + 1)).unwrap();
            assert!(queue.forward(Lane::Chord));
        }
        assert!(queue.is_empty(Lane::Chord));
        assert_eq!(queue.chord.entries.len(), 1);
        assert!(matches!(queue.chord.entries.get(&99), Some(Slot::Done)));
    }

    #[test]
    fn test_forward_never_passes_next_turn() {
        let mut queue = RequestQueue::new();
        assert!(!queue.forward(Lane::Chord));
        queue.enqueue(Lane::Chord, "C").unwrap();
        assert!(queue.forward(Lane::Chord));
        assert!(!queue.forward(Lane::Chord));
        assert_eq!(queue.current_turn(Lane::Chord), 1);
    }

    #[test]
    fn test_lone_loop_repeats() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        for _ in 0..5 {
            assert!(!queue.forward(Lane::Loop));
        }
        assert_eq!(queue.current_turn(Lane::Loop), 0);
        assert!(queue.is_in_queue(Lane::Loop, 0));
    }

    #[test]
    fn test_loop_advances_to_successor() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        queue.enqueue(Lane::Loop, "Am F").unwrap();
        assert!(queue.forward(Lane::Loop));
        assert!(!queue.is_in_queue(Lane::Loop, 0));
        assert_eq!(queue.current_turn(Lane::Loop), 1);
        // Now alone, it repeats
        assert!(!queue.forward(Lane::Loop));
    }

    #[test]
    fn test_loop_yields_to_chords_and_favorite() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        queue.enqueue(Lane::Loop, "Am F").unwrap();

        queue.enqueue(Lane::Chord, "D").unwrap();
        assert!(!queue.forward(Lane::Loop));
        queue.forward(Lane::Chord);

        queue.mark_favorite(Lane::Loop, 0);
        assert!(!queue.forward(Lane::Loop));
        queue.unmark_favorite(Lane::Loop);
        assert!(queue.forward(Lane::Loop));
    }

    #[test]
    fn test_closed_intake() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        queue.enqueue(Lane::Loop, "Am F").unwrap();
        queue.set_intake_open(false);
        assert!(matches!(queue.enqueue(Lane::Chord, "C"), Err(Error::IntakeClosed(Lane::Chord))));
        assert!(!queue.forward(Lane::Loop));
        queue.set_intake_open(true);
        assert!(queue.forward(Lane::Loop));
    }

    #[test]
    fn test_repeat_mode_resets_after_one_replay() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        queue.enqueue(Lane::Loop, "Am F").unwrap();
        queue.set_sync_mode(SyncMode::Repeat);
        assert!(!queue.forward(Lane::Loop));
        assert_eq!(queue.sync_mode(), SyncMode::Off);
        assert!(queue.forward(Lane::Loop));
    }

    #[test]
    fn test_forward_mode_is_one_shot() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        queue.set_sync_mode(SyncMode::Forward);
        assert!(queue.forward(Lane::Loop));
        assert_eq!(queue.sync_mode(), SyncMode::Off);
        assert!(queue.is_empty(Lane::Loop));
    }

    #[test]
    fn test_clear_then_rollback_restores_contents() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        queue.enqueue(Lane::Loop, "Am F").unwrap();
        queue.forward(Lane::Loop);
        let before = queue.pending(Lane::Loop);
        let current = queue.current_turn(Lane::Loop);

        queue.clear(Lane::Loop, true);
        assert!(queue.is_empty(Lane::Loop));
        assert!(queue.has_backup(Lane::Loop));

        let restored = queue.rollback(Lane::Loop);
        assert_eq!(restored, vec![1]);
        assert_eq!(queue.pending(Lane::Loop), before);
        assert_eq!(queue.current_turn(Lane::Loop), current);
        assert!(!queue.has_backup(Lane::Loop));
    }

    #[test]
    fn test_rollback_restores_turn_after_withdrawn_forward() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        queue.clear(Lane::Loop, true);
        // The waiting request notices the withdrawal and still forwards
        assert!(queue.forward(Lane::Loop));
        assert_eq!(queue.current_turn(Lane::Loop), 1);

        queue.rollback(Lane::Loop);
        assert_eq!(queue.current_turn(Lane::Loop), 0);
        assert!(queue.is_in_queue(Lane::Loop, 0));
    }

    #[test]
    fn test_rollback_after_new_enqueue_keeps_new_entries_first() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        queue.enqueue(Lane::Loop, "Am F").unwrap();
        queue.clear(Lane::Loop, true);
        queue.forward(Lane::Loop);
        let turn = queue.enqueue(Lane::Loop, "D A").unwrap();
        assert_eq!(turn, 2);

        let restored = queue.rollback(Lane::Loop);
        // Turn 0 is behind the current turn and stays dropped
        assert_eq!(restored, vec![1]);
        assert_eq!(queue.current_turn(Lane::Loop), 1);
        assert_eq!(
            queue.pending(Lane::Loop),
            vec![(1, "Am F".to_string()), (2, "D A".to_string())]
        );
    }

    #[test]
    fn test_clear_without_backup_discards_backup() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Chord, "C").unwrap();
        queue.clear(Lane::Chord, true);
        queue.clear(Lane::Chord, false);
        assert!(queue.rollback(Lane::Chord).is_empty());
        assert!(queue.is_empty(Lane::Chord));
        // Clearing forgets the last payload
        assert!(queue.enqueue(Lane::Chord, "C").is_ok());
    }

    #[test]
    fn test_now_playing() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Chord, "C").unwrap();
        assert!(queue.set_now_playing(Lane::Chord, 0, "C"));
        assert!(!queue.set_now_playing(Lane::Chord, 0, "C"));
        assert_eq!(queue.now_playing().map(|np| np.payload.as_str()), Some("C"));

        queue.forward(Lane::Chord);
        assert!(queue.now_playing().is_none());
    }

    #[test]
    fn test_collision_free() {
        let mut queue = RequestQueue::new();
        queue.enqueue(Lane::Loop, "C G").unwrap();
        assert!(queue.is_collision_free(Lane::Loop));
        queue.enqueue(Lane::Chord, "D").unwrap();
        assert!(!queue.is_collision_free(Lane::Loop));
        assert!(queue.is_collision_free(Lane::Chord));
    }
}
