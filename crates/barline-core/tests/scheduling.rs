//! End-to-end scheduling scenarios on a paused tokio clock.
//!
//! At the default 120 BPM a bar lasts two seconds and a whole-bar chord is
//! held for 1.6 seconds.

use std::sync::Arc;
use std::time::Duration;

use barline_core::{
    Config, Error, Lane, MemoryOutput, MidiMessage, Player, PlayerSettings, Scheduler,
};
use tokio::time::sleep;

fn make_player(config: &Config) -> (Player, MemoryOutput) {
    let _ = env_logger::builder().is_test(true).try_init();
    let output = MemoryOutput::new();
    let scheduler = Scheduler::new(Arc::new(output.clone()), config).unwrap();
    (Player::new(scheduler, PlayerSettings::from_config(config)), output)
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Lowest note of every chord that started, in order.
fn chord_roots(output: &MemoryOutput) -> Vec<u8> {
    let notes: Vec<u8> = output
        .messages()
        .into_iter()
        .filter_map(|m| match m {
            MidiMessage::NoteOn { note, .. } => Some(note),
            _ => None,
        })
        .collect();
    notes.chunks(3).map(|chord| chord[0]).collect()
}

fn spawn_loop(player: &Player, progression: &'static str) -> tokio::task::JoinHandle<Result<(), Error>> {
    let player = player.clone();
    tokio::spawn(async move { player.send_loop(progression).await })
}

fn spawn_chords(player: &Player, progression: &'static str) -> tokio::task::JoinHandle<Result<(), Error>> {
    let player = player.clone();
    tokio::spawn(async move { player.send_chords(progression).await })
}

#[tokio::test(start_paused = true)]
async fn lone_loop_repeats_every_bar() {
    let (player, output) = make_player(&Config::default());
    let _task = spawn_loop(&player, "C");
    settle().await;
    player.start().unwrap();

    sleep(Duration::from_millis(5000)).await;
    assert_eq!(chord_roots(&output), vec![60, 60, 60]);
    assert_eq!(player.scheduler().status().loop_queue, vec![(0, "C".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn chord_burst_preempts_loop() {
    let (player, output) = make_player(&Config::default());
    let _loop_task = spawn_loop(&player, "C");
    settle().await;
    player.start().unwrap();

    sleep(Duration::from_millis(500)).await;
    let chord_task = spawn_chords(&player, "A");

    // The loop lane is parked for the burst
    sleep(Duration::from_millis(500)).await;
    let status = player.scheduler().status();
    assert!(status.loop_queue.is_empty());
    assert_eq!(status.chord_queue, vec![(0, "A".to_string())]);

    // The chord takes the next bar, then the loop comes back
    sleep(Duration::from_millis(4000)).await;
    assert_eq!(chord_roots(&output), vec![60, 69, 60]);
    assert!(chord_task.is_finished());
    chord_task.await.unwrap().unwrap();
    let status = player.scheduler().status();
    assert!(status.chord_queue.is_empty());
    assert_eq!(status.loop_queue, vec![(0, "C".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn newer_loop_replaces_older() {
    let (player, output) = make_player(&Config::default());
    let first = spawn_loop(&player, "C");
    settle().await;
    player.start().unwrap();

    sleep(Duration::from_millis(500)).await;
    let _second = spawn_loop(&player, "D");

    sleep(Duration::from_millis(4500)).await;
    assert_eq!(chord_roots(&output), vec![60, 62, 62]);
    assert!(first.is_finished());
    first.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stopped_loop_resumes_from_backup() {
    let (player, output) = make_player(&Config::default());
    let _task = spawn_loop(&player, "C");
    settle().await;
    player.start().unwrap();

    sleep(Duration::from_millis(500)).await;
    player.stop_loop();
    assert!(player.scheduler().status().loop_queue.is_empty());

    sleep(Duration::from_millis(2500)).await;
    // The bar at two seconds passed in silence
    assert_eq!(chord_roots(&output), vec![60]);

    assert_eq!(player.resume_loop().unwrap(), 1);
    sleep(Duration::from_millis(2000)).await;
    assert_eq!(chord_roots(&output), vec![60, 60]);
}

#[tokio::test(start_paused = true)]
async fn tempo_change_realigns_bars() {
    let (player, output) = make_player(&Config::default());
    let _task = spawn_loop(&player, "C");
    settle().await;
    player.start().unwrap();

    sleep(Duration::from_millis(500)).await;
    player.set_tempo(60.0).unwrap();

    // The restart falls inside a render, so the first bar at 60 BPM is one
    // full bar (four seconds) after the restart
    sleep(Duration::from_millis(3900)).await;
    assert_eq!(chord_roots(&output), vec![60]);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(chord_roots(&output), vec![60, 60]);

    let status = player.scheduler().status();
    assert!((status.tempo - 60.0).abs() < 0.001);
    assert!(status.clock_running);
    let starts = output
        .messages()
        .into_iter()
        .filter(|m| *m == MidiMessage::Start)
        .count();
    assert_eq!(starts, 2);
}

#[tokio::test(start_paused = true)]
async fn full_stop_withdraws_waiting_requests() {
    let (player, output) = make_player(&Config::default());
    let playing = spawn_chords(&player, "C");
    settle().await;
    let waiting = spawn_chords(&player, "D");
    settle().await;
    player.start().unwrap();

    sleep(Duration::from_millis(1000)).await;
    player.full_stop();
    let status = player.scheduler().status();
    assert!(!status.clock_running);
    assert!(status.chord_queue.is_empty());
    assert!(output.messages().contains(&MidiMessage::Stop));

    // The playing request finishes its render
    sleep(Duration::from_millis(1000)).await;
    playing.await.unwrap().unwrap();

    // The waiting one learns it was withdrawn on the next bar
    assert!(!waiting.is_finished());
    player.start().unwrap();
    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::RequestWithdrawn { lane: Lane::Chord, turn: 1 }));
    assert_eq!(chord_roots(&output), vec![60]);
}

#[tokio::test(start_paused = true)]
async fn lone_loop_repeats_after_full_stop() {
    let (player, output) = make_player(&Config::default());
    player.start().unwrap();
    sleep(Duration::from_millis(500)).await;
    player.full_stop();

    let task = spawn_loop(&player, "C");
    settle().await;
    player.start().unwrap();

    sleep(Duration::from_millis(5000)).await;
    assert_eq!(chord_roots(&output), vec![60, 60, 60]);
    assert!(!task.is_finished());
    assert_eq!(player.scheduler().status().loop_queue, vec![(0, "C".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn control_change_sweep_reaches_output() {
    let mut config = Config::default();
    config.sweep.precision = 4;
    let (player, output) = make_player(&config);

    assert_eq!(player.send_control_changes("74 0(0), 74 100(400)").unwrap(), 5);
    let sweep: Vec<(u8, u64)> = output
        .recorded()
        .into_iter()
        .filter_map(|r| match r.message {
            MidiMessage::ControlChange { controller: 74, value, .. } => {
                Some((value, r.at_offset.as_millis() as u64))
            }
            _ => None,
        })
        .collect();
    assert_eq!(sweep, vec![(0, 0), (25, 100), (50, 200), (75, 300), (100, 400)]);
}

#[tokio::test(start_paused = true)]
async fn closed_intake_rejects_requests() {
    let (player, _output) = make_player(&Config::default());
    player.close_requests();
    let err = player.send_loop("C").await.unwrap_err();
    assert!(matches!(err, Error::IntakeClosed(Lane::Loop)));
}
