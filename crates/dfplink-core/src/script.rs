//! Text command scripts.
//!
//! One command per line, `#` starts a comment. Arguments are separated by
//! spaces, commas or parentheses, so `trk 3 5` and `track(3, 5)` are the same.
//! A repeat (`rpt`) runs until stopped and must be the last command.

use log::info;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::sequence::SequenceOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOp {
    /// Play the tracks in order, each to the end.
    Tracks(Vec<u16>),
    Next,
    Prev,
    Reset,
    Volume(u8),
    Stop,
    Play,
    Sleep(u32),
    /// Loop the tracks until stopped.
    Repeat(Vec<u16>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("line {line}: unknown command `{name}`")]
    UnknownCommand { line: usize, name: String },

    #[error("line {line}: `{name}` needs an argument")]
    MissingArgument { line: usize, name: String },

    #[error("line {line}: bad argument `{arg}`")]
    BadArgument { line: usize, arg: String },

    #[error("line {line}: `rpt` must be the last command")]
    RepeatNotLast { line: usize },

    #[error("cannot read script: {0}")]
    Io(String),

    #[error("line {line}: {source}")]
    Player { line: usize, source: Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    Finished,
    /// A repeating sequence is still playing.
    Repeating,
    /// Playback was stopped from elsewhere mid-script.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    ops: Vec<(usize, ScriptOp)>,
}

fn numbers<T: std::str::FromStr>(line: usize, args: &[&str]) -> Result<Vec<T>, ScriptError> {
    args.iter()
        .map(|a| {
            a.parse().map_err(|_| ScriptError::BadArgument {
                line,
                arg: a.to_string(),
            })
        })
        .collect()
}

fn first<T: Copy>(line: usize, name: &str, values: &[T]) -> Result<T, ScriptError> {
    values.first().copied().ok_or_else(|| ScriptError::MissingArgument {
        line,
        name: name.to_string(),
    })
}

fn parse_line(line: usize, text: &str) -> Result<Option<ScriptOp>, ScriptError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }
    let cleaned: String = text
        .chars()
        .map(|c| if matches!(c, ',' | '(' | ')') { ' ' } else { c })
        .collect();
    let mut tokens = cleaned.split_whitespace();
    let Some(name) = tokens.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = tokens.collect();
    let name = name.to_ascii_lowercase();

    let tracks = |args: &[&str]| -> Result<Vec<u16>, ScriptError> {
        let tracks: Vec<u16> = numbers(line, args)?;
        if tracks.is_empty() {
            return Err(ScriptError::MissingArgument {
                line,
                name: name.clone(),
            });
        }
        Ok(tracks)
    };

    let op = match name.as_str() {
        "trk" | "track" => ScriptOp::Tracks(tracks(&args)?),
        "rpt" | "repeat" => ScriptOp::Repeat(tracks(&args)?),
        "nxt" | "next" => ScriptOp::Next,
        "prv" | "prev" => ScriptOp::Prev,
        "rst" | "reset" => ScriptOp::Reset,
        "stp" | "stop" => ScriptOp::Stop,
        "ply" | "play" => ScriptOp::Play,
        "vol" | "volume" => ScriptOp::Volume(first(line, &name, &numbers(line, &args)?)?),
        "zzz" | "sleep" => ScriptOp::Sleep(first(line, &name, &numbers(line, &args)?)?),
        _ => return Err(ScriptError::UnknownCommand { line, name }),
    };
    Ok(Some(op))
}

impl Script {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut ops = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            if let Some(op) = parse_line(index + 1, raw)? {
                ops.push((index + 1, op));
            }
        }
        if let Some((line, _)) = ops
            .iter()
            .rev()
            .skip(1)
            .find(|(_, op)| matches!(op, ScriptOp::Repeat(_)))
        {
            return Err(ScriptError::RepeatNotLast { line: *line });
        }
        Ok(Self { ops })
    }

    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ScriptError::Io(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn ops(&self) -> impl Iterator<Item = &ScriptOp> {
        self.ops.iter().map(|(_, op)| op)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Execute against `player`. Returns early, still playing, on a repeat.
    pub fn run(&self, player: &Dispatcher) -> Result<ScriptOutcome, ScriptError> {
        let track_wait = player.config().track_end_timeout();
        // A resumed track is still playing until its finish is seen.
        let mut playing = false;
        for (line, op) in &self.ops {
            let line = *line;
            let fail = |source: Error| ScriptError::Player { line, source };
            info!("script line {line}: {op:?}");
            match op {
                ScriptOp::Tracks(tracks) => {
                    player.play_sequence(tracks, false).map_err(fail)?;
                    match player.wait_sequence() {
                        Some(SequenceOutcome::Completed { .. }) => {}
                        Some(SequenceOutcome::Failed { error, .. }) => return Err(fail(error)),
                        Some(SequenceOutcome::Cancelled) | None => return Ok(ScriptOutcome::Stopped),
                    }
                }
                ScriptOp::Next => {
                    player.next_track().map_err(fail)?;
                    player.wait_track_end(track_wait).map_err(fail)?;
                }
                ScriptOp::Prev => {
                    player.prev_track().map_err(fail)?;
                    player.wait_track_end(track_wait).map_err(fail)?;
                }
                ScriptOp::Reset => {
                    player.reset().map_err(fail)?;
                    playing = false;
                }
                ScriptOp::Volume(level) => {
                    player.set_volume(*level).map_err(fail)?;
                }
                ScriptOp::Stop => {
                    player.stop().map_err(fail)?;
                    playing = false;
                }
                ScriptOp::Play => {
                    player.resume().map_err(fail)?;
                    playing = true;
                }
                ScriptOp::Sleep(secs) => {
                    // The pause starts when the current track ends.
                    if playing {
                        player.wait_track_end(track_wait).map_err(fail)?;
                        playing = false;
                    }
                    std::thread::sleep(Duration::from_secs(u64::from(*secs)));
                }
                ScriptOp::Repeat(tracks) => {
                    player.play_sequence(tracks, true).map_err(fail)?;
                    return Ok(ScriptOutcome::Repeating);
                }
            }
        }
        Ok(ScriptOutcome::Finished)
    }
}
