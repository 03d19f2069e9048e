//! Shared scheduler state.
//!
//! The queue, the clock position and the tempo live in one [`SchedulerState`]
//! behind a single lock. Every mutation runs to completion inside one
//! closure, so the clock callback and request tasks never observe a
//! half-applied change. The lock is never held across an `.await`.

use std::sync::{Arc, RwLock};

use crate::clock::ClockState;
use crate::queue::RequestQueue;

/// Everything the scheduler mutates.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    /// Per-lane request queues, sync mode and now-playing entry.
    pub queue: RequestQueue,
    /// Beats per minute.
    pub tempo: f64,
    /// Position of the pulse clock.
    pub clock: ClockState,
    /// Number of renders currently holding notes. Bar signals are held back
    /// while this is non-zero.
    pub renders_in_progress: usize,
}

impl SchedulerState {
    pub fn new(tempo: f64) -> Self {
        Self {
            queue: RequestQueue::new(),
            tempo,
            clock: ClockState::default(),
            renders_in_progress: 0,
        }
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TEMPO)
    }
}

/// Cloneable handle to the shared [`SchedulerState`].
#[derive(Clone)]
pub struct SharedState {
    state: Arc<RwLock<SchedulerState>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(SchedulerState::default())
    }
}

impl SharedState {
    pub fn new(state: SchedulerState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Read the state with a closure.
    pub fn with_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&SchedulerState) -> R,
    {
        let state = self.state.read().expect("State lock poisoned");
        f(&state)
    }

    /// Write to the state with a closure.
    pub fn with_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut SchedulerState) -> R,
    {
        let mut state = self.state.write().expect("State lock poisoned");
        f(&mut state)
    }

    /// Get a clone of the current state.
    pub fn snapshot(&self) -> SchedulerState {
        self.with_read(|s| s.clone())
    }

    pub fn tempo(&self) -> f64 {
        self.with_read(|s| s.tempo)
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("tempo", &self.tempo())
            .finish_non_exhaustive()
    }
}
