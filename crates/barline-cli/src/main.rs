//! barline - Bar-aligned chord and loop player
//!
//! Reads commands from stdin and plays the requested progressions on a MIDI
//! output, each one starting on a bar boundary of the clock barline drives.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};

use barline_core::{
    Config, DummyMidiOutput, MemoryOutput, MidiMessage, MidiOutput, Player, PlayerSettings,
    Scheduler,
};
use commands::{Command, HELP};

#[derive(Parser)]
#[command(name = "barline")]
#[command(author, version, about = "Bar-aligned chord and loop player", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: ~/.config/barline/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tempo in BPM
    #[arg(short, long)]
    tempo: Option<f64>,

    /// MIDI channel (0-15)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=15))]
    channel: Option<u8>,

    /// MIDI output backend
    #[arg(long, value_enum, default_value_t = Backend::Dummy)]
    backend: Backend,

    /// Record MIDI traffic instead of sending it and print it on exit
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read commands from stdin and play them (default)
    Run,
    /// Create a default configuration file
    Init,
    /// Show the configuration file path
    ConfigPath,
    /// List available JACK MIDI ports
    ListPorts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Log MIDI traffic only
    Dummy,
    /// JACK MIDI output port
    Jack,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => {
            let path = Config::create_default_config_file()?;
            println!("Created default config at: {}", path.display());
            return Ok(());
        }
        Some(Commands::ConfigPath) => {
            let path = Config::config_path()?;
            println!("{}", path.display());
            return Ok(());
        }
        Some(Commands::ListPorts) => {
            list_ports();
            return Ok(());
        }
        Some(Commands::Run) | None => {}
    }

    // Load config
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(),
    };

    // Apply CLI overrides
    if let Some(tempo) = cli.tempo {
        config.timing.tempo = tempo;
    }
    if let Some(channel) = cli.channel {
        config.midi.channel = channel;
    }

    let recorder = cli.dry_run.then(MemoryOutput::new);
    let output: Arc<dyn MidiOutput> = match recorder {
        Some(ref recorder) => Arc::new(recorder.clone()),
        None => open_backend(cli.backend, &config)?,
    };
    log::info!("MIDI output: {}", output.port_name());

    let scheduler = Scheduler::new(output, &config).context("Invalid configuration")?;
    let player = Player::new(scheduler, PlayerSettings::from_config(&config));
    player.start().context("Failed to start clock")?;

    run_commands(&player).await?;

    player.full_stop();
    if let Some(recorder) = recorder {
        print_recording(&recorder);
    }
    Ok(())
}

fn open_backend(backend: Backend, config: &Config) -> Result<Arc<dyn MidiOutput>> {
    match backend {
        Backend::Dummy => Ok(Arc::new(DummyMidiOutput)),
        #[cfg(feature = "jack")]
        Backend::Jack => {
            if !barline_core::is_jack_running() {
                bail!("JACK is not running");
            }
            let output = barline_core::JackMidiOutput::from_settings(&config.midi)
                .context("Failed to open JACK MIDI output")?;
            Ok(Arc::new(output))
        }
        #[cfg(not(feature = "jack"))]
        Backend::Jack => {
            let _ = config;
            bail!("barline was built without JACK support (enable the 'jack' feature)")
        }
    }
}

#[cfg(feature = "jack")]
fn list_ports() {
    if !barline_core::is_jack_running() {
        println!("JACK is not running");
        return;
    }
    let ports = barline_core::list_jack_midi_ports();
    if ports.is_empty() {
        println!("No JACK MIDI input ports found");
    } else {
        println!("Available JACK MIDI input ports:");
        for port in ports {
            println!("  {}", port);
        }
    }
}

#[cfg(not(feature = "jack"))]
fn list_ports() {
    println!("barline was built without JACK support");
}

async fn run_commands(player: &Player) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(e) = dispatch(player, command) {
            eprintln!("error: {}", e);
        }
    }
    Ok(())
}

fn dispatch(player: &Player, command: Command) -> Result<()> {
    match command {
        Command::Chords(progression) => {
            let player = player.clone();
            tokio::spawn(async move {
                if let Err(e) = player.send_chords(&progression).await {
                    log::warn!("Chords '{}' not played: {}", progression, e);
                }
            });
        }
        Command::Loop(progression) => {
            let player = player.clone();
            tokio::spawn(async move {
                if let Err(e) = player.send_loop(&progression).await {
                    log::warn!("Loop '{}' ended: {}", progression, e);
                }
            });
        }
        Command::ControlChange(items) => {
            player.send_control_changes(&items)?;
        }
        Command::Tempo(bpm) => player.set_tempo(bpm)?,
        Command::Start => player.start()?,
        Command::Sync => player.sync()?,
        Command::StopLoop => player.stop_loop(),
        Command::ResumeLoop => {
            let restored = player.resume_loop()?;
            println!("resumed {} loop(s)", restored);
        }
        Command::Pin => match player.pin_loop() {
            Some(turn) => println!("pinned loop turn {}", turn),
            None => println!("no loop is playing"),
        },
        Command::Unpin => player.unpin_loop(),
        Command::Open => player.open_requests(),
        Command::Close => player.close_requests(),
        Command::Status => print_status(player),
        Command::FullStop => player.full_stop(),
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn print_status(player: &Player) {
    let status = player.scheduler().status();
    println!(
        "tempo {:.1} BPM, clock {}, bar {}, pulse {}",
        status.tempo,
        if status.clock_running { "running" } else { "stopped" },
        status.bars,
        status.tick_index
    );
    println!(
        "requests {}, sync {}",
        if status.intake_open { "open" } else { "closed" },
        status.sync_mode
    );
    match status.now_playing {
        Some(np) => println!("now playing: {} (turn {} on {})", np.payload, np.turn, np.lane),
        None => println!("now playing: nothing"),
    }
    for (name, queue) in [("chords", &status.chord_queue), ("loops", &status.loop_queue)] {
        println!("{}:", name);
        for (turn, payload) in queue {
            let pinned = if name == "loops" && status.loop_favorite == Some(*turn) {
                " (pinned)"
            } else {
                ""
            };
            println!("  {:>4}  {}{}", turn, payload, pinned);
        }
    }
}

fn print_recording(recorder: &MemoryOutput) {
    println!("{} clock pulses", recorder.clock_pulses());
    for recorded in recorder.recorded() {
        if recorded.message == MidiMessage::Clock {
            continue;
        }
        if recorded.at_offset.is_zero() {
            println!("{:?}", recorded.message);
        } else {
            println!("{:?} +{}ms", recorded.message, recorded.at_offset.as_millis());
        }
    }
}
