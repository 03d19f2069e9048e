//! Line commands read from stdin.

use anyhow::{anyhow, bail, Result};

/// A parsed stdin command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chords(String),
    Loop(String),
    ControlChange(String),
    Tempo(f64),
    Start,
    Sync,
    StopLoop,
    ResumeLoop,
    Pin,
    Unpin,
    Open,
    Close,
    Status,
    FullStop,
    Quit,
    Help,
}

pub const HELP: &str = "\
commands:
  chord <progression>   play a chord progression once (sendchord)
  loop <progression>    loop a progression until replaced (sendloop)
  cc <items>            send control changes, e.g. '74 0(0), 74 127(2000)' (sendcc)
  tempo <bpm>           change tempo and restart the clock (settempo)
  start                 start the clock
  sync                  restart the clock on the current tempo (syncmidi)
  stoploop              stop loops, keeping them for resumeloop
  resumeloop            bring stopped loops back
  pin / unpin           keep the playing loop / release it
  open / close          accept / refuse new requests
  status                show queues and clock
  stop                  clear everything and stop the clock (fullstop), 'start' resumes
  quit                  exit";

impl Command {
    /// Parse one input line. Returns `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        let line = line.strip_prefix('!').unwrap_or(line).trim_start();
        if line.is_empty() {
            return Ok(None);
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let argument = |name: &str| -> Result<String> {
            if rest.is_empty() {
                bail!("'{}' needs an argument", name);
            }
            Ok(rest.to_string())
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "chord" | "chords" | "sendchord" => Command::Chords(argument(word)?),
            "loop" | "sendloop" => Command::Loop(argument(word)?),
            "cc" | "sendcc" => Command::ControlChange(argument(word)?),
            "tempo" | "settempo" => {
                let raw = argument(word)?;
                let bpm = raw
                    .parse::<f64>()
                    .map_err(|_| anyhow!("'{}' is not a tempo", raw))?;
                Command::Tempo(bpm)
            }
            "start" => Command::Start,
            "sync" | "syncmidi" => Command::Sync,
            "stoploop" => Command::StopLoop,
            "resumeloop" => Command::ResumeLoop,
            "pin" => Command::Pin,
            "unpin" => Command::Unpin,
            "open" => Command::Open,
            "close" => Command::Close,
            "status" => Command::Status,
            "stop" | "fullstop" => Command::FullStop,
            "quit" | "exit" => Command::Quit,
            "help" | "?" => Command::Help,
            other => bail!("unknown command '{}', try 'help'", other),
        };
        Ok(Some(command))
    }
}
