//! Playback of queued requests.
//!
//! The [`Player`] turns a request into queue operations and sound:
//!
//! 1. resolve the progression (rejecting it before it touches the queue)
//! 2. enqueue it on its lane
//! 3. wait for its turn
//! 4. hold each chord for its calculated duration
//! 5. forward the lane, also when the request was withdrawn
//!
//! Loops repeat steps 3 to 5 for as long as their entry stays queued.
//!
//! A chord burst that starts while loops are queued parks the loop lane
//! (cleared with a backup) and rolls it back once the chord lane drains.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::chord::{parse_progression, Chord};
use crate::config::Config;
use crate::control::{expand_sweeps, parse_control_changes};
use crate::error::{Error, Result};
use crate::output::MidiOutput;
use crate::policy::SyncMode;
use crate::queue::{Lane, Turn};
use crate::scheduler::Scheduler;

/// Per-player output settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSettings {
    pub channel: u8,
    pub velocity: u8,
    pub sweep_precision: usize,
}

impl PlayerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel: config.midi.channel,
            velocity: config.midi.velocity,
            sweep_precision: config.sweep.precision,
        }
    }
}

/// Notes that are on. Dropping releases them, so an aborted render
/// never leaves notes hanging.
struct HeldNotes<'a> {
    output: &'a dyn MidiOutput,
    channel: u8,
    notes: &'a [u8],
}

impl<'a> HeldNotes<'a> {
    fn press(output: &'a dyn MidiOutput, channel: u8, velocity: u8, notes: &'a [u8]) -> Self {
        for &note in notes {
            output.note_on(channel, note, velocity);
        }
        Self { output, channel, notes }
    }
}

impl Drop for HeldNotes<'_> {
    fn drop(&mut self) {
        for &note in self.notes {
            self.output.note_off(self.channel, note);
        }
    }
}

/// Removes a turn from the live set when its playback task ends.
struct LiveTurn {
    live: Arc<Mutex<HashSet<(Lane, Turn)>>>,
    key: (Lane, Turn),
}

impl Drop for LiveTurn {
    fn drop(&mut self) {
        self.live.lock().expect("Live set lock poisoned").remove(&self.key);
    }
}

/// Plays chord and loop requests through a [`Scheduler`].
#[derive(Clone)]
pub struct Player {
    scheduler: Scheduler,
    settings: PlayerSettings,
    /// Turns that currently have a playback task.
    live: Arc<Mutex<HashSet<(Lane, Turn)>>>,
    /// The loop lane was cleared by a chord burst and is due for rollback.
    loops_parked: Arc<AtomicBool>,
}

impl Player {
    pub fn new(scheduler: Scheduler, settings: PlayerSettings) -> Self {
        Self {
            scheduler,
            settings,
            live: Arc::new(Mutex::new(HashSet::new())),
            loops_parked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> PlayerSettings {
        self.settings
    }

    /// Start the clock.
    pub fn start(&self) -> Result<()> {
        self.scheduler.clock().start()
    }

    /// Queue a chord progression and play it once when its turn comes.
    pub async fn send_chords(&self, progression: &str) -> Result<()> {
        let (turn, chords) = self.submit(Lane::Chord, progression)?;
        self.park_loops();
        self.play_once(turn, chords).await
    }

    /// Queue a loop and keep playing it until a successor replaces it or it
    /// is removed.
    pub async fn send_loop(&self, progression: &str) -> Result<()> {
        let (turn, chords) = self.submit(Lane::Loop, progression)?;
        self.play_loop(turn, chords).await
    }

    fn submit(&self, lane: Lane, progression: &str) -> Result<(Turn, Vec<Chord>)> {
        let chords = parse_progression(progression)?;
        let payload = chords
            .iter()
            .map(|c| c.token.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let turn = self.scheduler.enqueue(lane, &payload)?;
        log::info!("Queued '{}' on {} as turn {}", payload, lane, turn);
        Ok((turn, chords))
    }

    fn track(&self, lane: Lane, turn: Turn) -> LiveTurn {
        let key = (lane, turn);
        self.live.lock().expect("Live set lock poisoned").insert(key);
        LiveTurn {
            live: self.live.clone(),
            key,
        }
    }

    fn is_live(&self, lane: Lane, turn: Turn) -> bool {
        self.live
            .lock()
            .expect("Live set lock poisoned")
            .contains(&(lane, turn))
    }

    async fn play_once(&self, turn: Turn, chords: Vec<Chord>) -> Result<()> {
        let _live = self.track(Lane::Chord, turn);
        let result = match self.scheduler.wait_for_turn(Lane::Chord, turn).await {
            Ok(()) => self.render(&chords).await,
            Err(e) => Err(e),
        };
        if !matches!(result, Err(Error::ClockClosed)) {
            self.scheduler.forward(Lane::Chord);
            self.unpark_loops();
        }
        result
    }

    /// Clear the loop lane with a backup if loops are queued and no backup
    /// is held already.
    fn park_loops(&self) {
        if self.scheduler.is_empty(Lane::Loop) || self.scheduler.has_backup(Lane::Loop) {
            return;
        }
        self.scheduler.clear(Lane::Loop, true);
        self.loops_parked.store(true, Ordering::SeqCst);
        log::info!("Loops parked for a chord burst");
    }

    /// Roll parked loops back once the chord lane has drained.
    fn unpark_loops(&self) {
        let drained = self.scheduler.is_empty(Lane::Chord);
        if !drained || !self.loops_parked.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.resume(Lane::Loop) {
            log::warn!("Parked loops could not resume: {}", e);
        }
    }

    async fn play_loop(&self, turn: Turn, chords: Vec<Chord>) -> Result<()> {
        let _live = self.track(Lane::Loop, turn);
        let mut rounds = 0u64;
        loop {
            let result = match self.scheduler.wait_for_turn(Lane::Loop, turn).await {
                Ok(()) => self.render(&chords).await,
                Err(e) => Err(e),
            };
            match result {
                Err(Error::ClockClosed) => return Err(Error::ClockClosed),
                Err(e) => {
                    self.scheduler.forward(Lane::Loop);
                    // A loop that already played simply ended
                    return if rounds > 0 && matches!(e, Error::RequestWithdrawn { .. }) {
                        log::info!("Loop turn {} stopped after {} rounds", turn, rounds);
                        Ok(())
                    } else {
                        Err(e)
                    };
                }
                Ok(()) => {
                    rounds += 1;
                    self.scheduler.forward(Lane::Loop);
                    if !self.scheduler.is_in_queue(Lane::Loop, turn) {
                        log::info!("Loop turn {} replaced after {} rounds", turn, rounds);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Hold every chord for its duration. Bar events are held back meanwhile.
    async fn render(&self, chords: &[Chord]) -> Result<()> {
        let tempo = self.scheduler.tempo();
        let tokens: Vec<&str> = chords.iter().map(|c| c.token.as_str()).collect();
        let holds = self.scheduler.timing().sequence_timeouts(&tokens, tempo)?;

        let _rendering = self.scheduler.begin_render();
        let output = self.scheduler.output().as_ref();
        for (chord, hold) in chords.iter().zip(holds) {
            log::debug!("Playing {} for {}ms", chord.token, hold.as_millis());
            let held = HeldNotes::press(output, self.settings.channel, self.settings.velocity, &chord.notes);
            tokio::time::sleep(hold).await;
            drop(held);
        }
        Ok(())
    }

    /// Send a control change command right away, with sweeps between
    /// consecutive values of the same controller.
    pub fn send_control_changes(&self, command: &str) -> Result<usize> {
        let changes = parse_control_changes(command)?;
        let scheduled = expand_sweeps(&changes, self.settings.sweep_precision)?;
        let output = self.scheduler.output();
        for cc in &scheduled {
            output.control_change(self.settings.channel, cc.controller, cc.value, cc.at_offset);
        }
        log::info!("Sent {} control changes", scheduled.len());
        Ok(scheduled.len())
    }

    /// Change tempo. Restarts the clock.
    pub fn set_tempo(&self, tempo: f64) -> Result<()> {
        self.scheduler.set_tempo(tempo)
    }

    /// Restart the clock on the current tempo to realign the receiver.
    pub fn sync(&self) -> Result<()> {
        self.scheduler.clock().restart()
    }

    /// Remove all loops, keeping them for [`Player::resume_loop`].
    pub fn stop_loop(&self) {
        self.loops_parked.store(false, Ordering::SeqCst);
        self.scheduler.clear(Lane::Loop, true);
        self.scheduler.output().all_notes_off(self.settings.channel);
        log::info!("Loops stopped");
    }

    /// Bring back loops removed by [`Player::stop_loop`].
    pub fn resume_loop(&self) -> Result<usize> {
        self.resume(Lane::Loop)
    }

    /// Roll a lane back and give every restored entry a playback task again.
    ///
    /// Entries whose task is still waiting pick up where they were on the
    /// next bar; only entries whose task already gave up get a new one.
    /// Returns the number of restored entries.
    pub fn resume(&self, lane: Lane) -> Result<usize> {
        let restored = self.scheduler.rollback(lane);
        for (turn, payload) in &restored {
            if self.is_live(lane, *turn) {
                continue;
            }
            let chords = parse_progression(payload)?;
            let player = self.clone();
            let turn = *turn;
            tokio::spawn(async move {
                let result = match lane {
                    Lane::Chord => player.play_once(turn, chords).await,
                    Lane::Loop => player.play_loop(turn, chords).await,
                };
                if let Err(e) = result {
                    log::warn!("Resumed {} turn {} failed: {}", lane, turn, e);
                }
            });
        }
        log::info!("Resumed {} entries on {}", restored.len(), lane);
        Ok(restored.len())
    }

    /// Drop everything, silence the output and stop the clock.
    ///
    /// Both lanes are empty afterwards, so nothing is left for the stopped
    /// clock's forced advance to skip and the sync mode goes back to off.
    pub fn full_stop(&self) {
        self.loops_parked.store(false, Ordering::SeqCst);
        for lane in Lane::ALL {
            self.scheduler.clear(lane, false);
        }
        self.scheduler.output().all_notes_off(self.settings.channel);
        self.scheduler.clock().stop();
        self.scheduler.set_sync_mode(SyncMode::Off);
        log::info!("Full stop");
    }

    /// Pin the loop that is playing now so it keeps repeating.
    pub fn pin_loop(&self) -> Option<Turn> {
        let now_playing = self.scheduler.now_playing()?;
        if now_playing.lane != Lane::Loop {
            return None;
        }
        self.scheduler.mark_favorite(Lane::Loop, now_playing.turn);
        log::info!("Pinned loop '{}'", now_playing.payload);
        Some(now_playing.turn)
    }

    pub fn unpin_loop(&self) {
        self.scheduler.unmark_favorite(Lane::Loop);
    }

    pub fn open_requests(&self) {
        self.scheduler.set_intake_open(true);
    }

    pub fn close_requests(&self) {
        self.scheduler.set_intake_open(false);
    }
}
