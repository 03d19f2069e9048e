//! MIDI beat clock with bar-boundary notifications.
//!
//! The clock sends one pulse to the output per tick (24 per quarter note by
//! default) and publishes a [`BarEvent`] once per bar, on the first pulse of
//! the bar, unless a render is holding notes at that moment. Waiting requests
//! subscribe to these events; they are the only thing that wakes them up.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::output::MidiOutput;
use crate::policy::SyncMode;
use crate::state::SharedState;
use crate::timing::Timing;

const BAR_CHANNEL_CAPACITY: usize = 64;

/// Position of the pulse clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockState {
    /// Pulse index within the bar, `0..pulses_per_bar`.
    pub tick_index: u32,
    /// Whether the internal timer is running.
    pub active: bool,
    /// Number of bar events published so far.
    pub bars: u64,
}

/// Published once per bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarEvent {
    /// Running bar count, starting at 1.
    pub bar: u64,
}

struct ClockInner {
    state: SharedState,
    output: Arc<dyn MidiOutput>,
    timing: Timing,
    channel: u8,
    bar_tx: broadcast::Sender<BarEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClockInner {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

/// Cloneable handle to the pulse clock.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

impl Clock {
    /// Create a stopped clock.
    ///
    /// `channel` is the MIDI channel flushed with all-notes-off on restart.
    pub fn new(state: SharedState, output: Arc<dyn MidiOutput>, timing: Timing, channel: u8) -> Self {
        let (bar_tx, _) = broadcast::channel(BAR_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ClockInner {
                state,
                output,
                timing,
                channel,
                bar_tx,
                task: Mutex::new(None),
            }),
        }
    }

    /// Listen for bar events.
    pub fn subscribe(&self) -> broadcast::Receiver<BarEvent> {
        self.inner.bar_tx.subscribe()
    }

    /// Current clock position.
    pub fn state(&self) -> ClockState {
        self.inner.state.with_read(|s| s.clock)
    }

    pub fn is_running(&self) -> bool {
        self.state().active
    }

    /// Interval between pulses at the current tempo.
    pub fn tick_period(&self) -> Result<Duration> {
        self.inner.timing.tick_period(self.inner.state.tempo())
    }

    /// Advance the clock by one pulse.
    ///
    /// Called by the internal timer. An external pulse source may call it
    /// directly instead of starting the timer.
    pub fn tick(&self) {
        let pulses_per_bar = self.inner.timing.pulses_per_bar();
        let bar = self.inner.state.with_write(|s| {
            s.clock.tick_index = (s.clock.tick_index + 1) % pulses_per_bar;
            if s.clock.tick_index == 1 % pulses_per_bar && s.renders_in_progress == 0 {
                s.clock.bars += 1;
                Some(s.clock.bars)
            } else {
                None
            }
        });

        self.inner.output.clock_pulse();

        if let Some(bar) = bar {
            log::trace!("[CLOCK] bar {}", bar);
            // No receivers just means nobody is waiting
            let _ = self.inner.bar_tx.send(BarEvent { bar });
        }
    }

    /// Start the internal timer at the current tempo.
    ///
    /// Sends a transport start to the output. Does nothing if already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let period = self.tick_period()?;
        let started = self.inner.state.with_write(|s| {
            if s.clock.active {
                false
            } else {
                s.clock.active = true;
                true
            }
        });
        if !started {
            log::debug!("[CLOCK] already running");
            return Ok(());
        }

        log::info!(
            "Clock started at {:.1} BPM ({}us per pulse)",
            self.inner.state.tempo(),
            period.as_micros()
        );
        self.inner.output.transport_start();

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(run_timer(weak, period));
        let previous = self
            .inner
            .task
            .lock()
            .expect("Clock task lock poisoned")
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    /// Stop the timer, rewind to the start of the bar and make the next loop
    /// advance skip the stale entry.
    pub fn stop(&self) {
        if let Some(handle) = self.inner.task.lock().expect("Clock task lock poisoned").take() {
            handle.abort();
        }
        self.inner.state.with_write(|s| {
            s.clock.active = false;
            s.clock.tick_index = 0;
            s.queue.set_sync_mode(SyncMode::Forward);
        });
        self.inner.output.transport_stop();
        log::info!("Clock stopped");
    }

    /// Stop, flush sounding notes and start again from the top of a bar.
    ///
    /// Used after a tempo change or an explicit resync. The current loop
    /// entry replays once so every pending turn realigns on the new first bar.
    pub fn restart(&self) -> Result<()> {
        // Validate before tearing anything down
        self.tick_period()?;
        self.stop();
        self.inner.output.all_notes_off(self.inner.channel);
        self.inner
            .state
            .with_write(|s| s.queue.set_sync_mode(SyncMode::Repeat));
        log::info!("Clock restarting");
        self.start()
    }
}

async fn run_timer(clock: Weak<ClockInner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    loop {
        interval.tick().await;
        let Some(inner) = clock.upgrade() else {
            break;
        };
        Clock { inner }.tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{MemoryOutput, MidiMessage, ALL_NOTES_OFF_CC};
    use crate::state::SchedulerState;

    fn make_clock() -> (Clock, SharedState, MemoryOutput) {
        let state = SharedState::new(SchedulerState::new(120.0));
        let output = MemoryOutput::new();
        let clock = Clock::new(state.clone(), Arc::new(output.clone()), Timing::default(), 0);
        (clock, state, output)
    }

    #[test]
    fn test_bar_fires_once_per_cycle() {
        let (clock, _state, output) = make_clock();
        let mut bars = clock.subscribe();

        for _ in 0..96 * 3 {
            clock.tick();
        }

        assert_eq!(output.clock_pulses(), 96 * 3);
        assert_eq!(bars.try_recv().unwrap(), BarEvent { bar: 1 });
        assert_eq!(bars.try_recv().unwrap(), BarEvent { bar: 2 });
        assert_eq!(bars.try_recv().unwrap(), BarEvent { bar: 3 });
        assert!(bars.try_recv().is_err());
        assert_eq!(clock.state().tick_index, 0);
    }

    #[test]
    fn test_bar_fires_on_first_pulse() {
        let (clock, _state, _output) = make_clock();
        let mut bars = clock.subscribe();
        clock.tick();
        assert_eq!(clock.state().tick_index, 1);
        assert!(bars.try_recv().is_ok());
    }

    #[test]
    fn test_render_in_progress_holds_bar() {
        let (clock, state, output) = make_clock();
        let mut bars = clock.subscribe();
        state.with_write(|s| s.renders_in_progress = 1);

        for _ in 0..96 {
            clock.tick();
        }
        assert!(bars.try_recv().is_err());
        // Pulses keep flowing
        assert_eq!(output.clock_pulses(), 96);

        state.with_write(|s| s.renders_in_progress = 0);
        clock.tick();
        assert_eq!(bars.try_recv().unwrap().bar, 1);
    }

    #[tokio::test]
    async fn test_stop_sets_forward() {
        let (clock, state, output) = make_clock();
        clock.start().unwrap();
        clock.tick();
        clock.stop();

        assert_eq!(clock.state().tick_index, 0);
        assert!(!clock.is_running());
        assert_eq!(state.with_read(|s| s.queue.sync_mode()), SyncMode::Forward);
        assert_eq!(output.messages(), vec![MidiMessage::Start, MidiMessage::Stop]);
    }

    #[tokio::test]
    async fn test_restart_resets_tick_and_repeats() {
        let (clock, state, output) = make_clock();
        for _ in 0..10 {
            clock.tick();
        }
        state.with_write(|s| s.queue.set_sync_mode(SyncMode::Forward));

        clock.restart().unwrap();

        assert_eq!(clock.state().tick_index, 0);
        assert!(clock.is_running());
        assert_eq!(state.with_read(|s| s.queue.sync_mode()), SyncMode::Repeat);
        assert_eq!(
            output.messages(),
            vec![
                MidiMessage::Stop,
                MidiMessage::ControlChange { channel: 0, controller: ALL_NOTES_OFF_CC, value: 0 },
                MidiMessage::Start,
            ]
        );
        clock.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_emits_bars() {
        let (clock, _state, output) = make_clock();
        let mut bars = clock.subscribe();
        clock.start().unwrap();

        // First pulse is immediate, so the first bar comes right away
        let first = bars.recv().await.unwrap();
        assert_eq!(first.bar, 1);

        // One bar at 120 BPM is two seconds
        let second = tokio::time::timeout(Duration::from_millis(2100), bars.recv())
            .await
            .expect("second bar within a bar length")
            .unwrap();
        assert_eq!(second.bar, 2);
        assert!(output.clock_pulses() >= 97);
        clock.stop();
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (clock, _state, output) = make_clock();
        clock.start().unwrap();
        clock.start().unwrap();
        assert_eq!(output.messages(), vec![MidiMessage::Start]);
        clock.stop();
    }

    #[test]
    fn test_invalid_tempo_rejected_before_restart() {
        let (clock, state, output) = make_clock();
        state.with_write(|s| s.tempo = 0.0);
        assert!(clock.restart().is_err());
        assert!(output.messages().is_empty());
    }
}
