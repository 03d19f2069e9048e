//! Scheduler context.
//!
//! A [`Scheduler`] bundles the shared state, the clock and the output sink
//! into one explicitly constructed value. Independent schedulers do not share
//! anything, which keeps tests deterministic.

use std::future::Future;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::output::MidiOutput;
use crate::policy::SyncMode;
use crate::queue::{Lane, NowPlaying, Turn};
use crate::state::{SchedulerState, SharedState};
use crate::timing::{validate_tempo, Timing};
use crate::turn;

/// Point-in-time view of the scheduler for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStatus {
    pub tempo: f64,
    pub clock_running: bool,
    pub tick_index: u32,
    pub bars: u64,
    pub sync_mode: SyncMode,
    pub intake_open: bool,
    pub now_playing: Option<NowPlaying>,
    pub chord_queue: Vec<(Turn, String)>,
    pub loop_queue: Vec<(Turn, String)>,
    pub loop_favorite: Option<Turn>,
}

/// Holds back bar events while alive.
///
/// Created by [`Scheduler::begin_render`] for as long as notes are sounding.
pub struct RenderGuard {
    state: SharedState,
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        self.state
            .with_write(|s| s.renders_in_progress = s.renders_in_progress.saturating_sub(1));
    }
}

/// Shared scheduler context. Clones refer to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    state: SharedState,
    clock: Clock,
    output: Arc<dyn MidiOutput>,
    timing: Timing,
}

impl Scheduler {
    /// Build a stopped scheduler from a validated configuration.
    pub fn new(output: Arc<dyn MidiOutput>, config: &Config) -> Result<Self> {
        config.validate()?;
        let state = SharedState::new(SchedulerState::new(config.timing.tempo));
        let timing = config.timing.to_timing();
        let clock = Clock::new(state.clone(), output.clone(), timing, config.midi.channel);
        Ok(Self {
            state,
            clock,
            output,
            timing,
        })
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn output(&self) -> &Arc<dyn MidiOutput> {
        &self.output
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn tempo(&self) -> f64 {
        self.state.tempo()
    }

    /// Change the tempo and restart the clock on it.
    pub fn set_tempo(&self, tempo: f64) -> Result<()> {
        let tempo = validate_tempo(tempo)?;
        self.state.with_write(|s| s.tempo = tempo);
        log::info!("Tempo set to {:.1} BPM", tempo);
        self.clock.restart()
    }

    pub fn enqueue(&self, lane: Lane, payload: &str) -> Result<Turn> {
        self.state.with_write(|s| s.queue.enqueue(lane, payload))
    }

    pub fn is_in_queue(&self, lane: Lane, turn: Turn) -> bool {
        self.state.with_read(|s| s.queue.is_in_queue(lane, turn))
    }

    pub fn forward(&self, lane: Lane) -> bool {
        self.state.with_write(|s| s.queue.forward(lane))
    }

    pub fn clear(&self, lane: Lane, backup: bool) {
        self.state.with_write(|s| s.queue.clear(lane, backup))
    }

    /// Roll a cleared lane back and return the entries that came back.
    pub fn rollback(&self, lane: Lane) -> Vec<(Turn, String)> {
        self.state.with_write(|s| {
            let restored = s.queue.rollback(lane);
            restored
                .into_iter()
                .filter_map(|turn| s.queue.payload(lane, turn).map(|p| (turn, p.to_string())))
                .collect()
        })
    }

    pub fn is_empty(&self, lane: Lane) -> bool {
        self.state.with_read(|s| s.queue.is_empty(lane))
    }

    pub fn has_backup(&self, lane: Lane) -> bool {
        self.state.with_read(|s| s.queue.has_backup(lane))
    }

    pub fn set_sync_mode(&self, mode: SyncMode) {
        self.state.with_write(|s| s.queue.set_sync_mode(mode))
    }

    pub fn mark_favorite(&self, lane: Lane, turn: Turn) {
        self.state.with_write(|s| s.queue.mark_favorite(lane, turn))
    }

    pub fn unmark_favorite(&self, lane: Lane) {
        self.state.with_write(|s| s.queue.unmark_favorite(lane))
    }

    pub fn set_intake_open(&self, open: bool) {
        self.state.with_write(|s| s.queue.set_intake_open(open))
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.state.with_read(|s| s.queue.now_playing().cloned())
    }

    /// Wait for a queued turn. See [`turn::wait_for_turn`].
    pub fn wait_for_turn(
        &self,
        lane: Lane,
        turn: Turn,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        turn::wait_for_turn(self.state.clone(), &self.clock, lane, turn)
    }

    /// Mark a render as in progress until the guard is dropped.
    pub fn begin_render(&self) -> RenderGuard {
        self.state.with_write(|s| s.renders_in_progress += 1);
        RenderGuard {
            state: self.state.clone(),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        self.state.with_read(|s| SchedulerStatus {
            tempo: s.tempo,
            clock_running: s.clock.active,
            tick_index: s.clock.tick_index,
            bars: s.clock.bars,
            sync_mode: s.queue.sync_mode(),
            intake_open: s.queue.is_intake_open(),
            now_playing: s.queue.now_playing().cloned(),
            chord_queue: s.queue.pending(Lane::Chord),
            loop_queue: s.queue.pending(Lane::Loop),
            loop_favorite: s.queue.favorite(Lane::Loop),
        })
    }
}
