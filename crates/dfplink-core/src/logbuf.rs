use dfplink_decode::{decode, hex_string, Command};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub elapsed: Duration,
    pub direction: Direction,
    pub frame: Vec<u8>,
}

impl LogEntry {
    pub fn command(&self) -> Option<Command> {
        decode(&self.frame).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Bounded record of the frames exchanged with the player.
pub struct FrameLog {
    started: Instant,
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    filter_rx: bool,
    filter_tx: bool,
}

impl FrameLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            started: Instant::now(),
            entries: VecDeque::new(),
            max_entries,
            filter_rx: true,
            filter_tx: true,
        }
    }

    pub fn set_filter(&mut self, show_rx: bool, show_tx: bool) {
        self.filter_rx = show_rx;
        self.filter_tx = show_tx;
    }

    pub fn push(&mut self, direction: Direction, frame: &[u8]) {
        self.entries.push_back(LogEntry {
            elapsed: self.started.elapsed(),
            direction,
            frame: frame.to_vec(),
        });

        if self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// Decoded commands in one direction, oldest first.
    pub fn commands(&self, direction: Direction) -> Vec<Command> {
        self.entries
            .iter()
            .filter(|e| e.direction == direction)
            .filter_map(LogEntry::command)
            .collect()
    }

    pub fn to_text(&self, show_timestamp: bool) -> String {
        let mut result = String::new();
        for entry in &self.entries {
            if (entry.direction == Direction::Rx && !self.filter_rx)
                || (entry.direction == Direction::Tx && !self.filter_tx)
            {
                continue;
            }

            if show_timestamp {
                let ms = entry.elapsed.as_millis();
                result.push_str(&format!("[{:>6}.{:03}] ", ms / 1000, ms % 1000));
            }
            result.push_str(match entry.direction {
                Direction::Rx => "RX: ",
                Direction::Tx => "TX: ",
            });
            result.push_str(&hex_string(&entry.frame));
            if let Some(command) = entry.command() {
                result.push_str(&format!("  ({command})"));
            }
            result.push('\n');
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfplink_decode::{encode, Opcode};

    #[test]
    fn oldest_entries_fall_off() {
        let mut log = FrameLog::new(2);
        for track in 1..=3 {
            log.push(Direction::Tx, &encode(&Command::new(Opcode::PlayTrack, track)));
        }
        let params: Vec<u16> = log.commands(Direction::Tx).iter().map(|c| c.param()).collect();
        assert_eq!(params, vec![2, 3]);
    }

    #[test]
    fn text_shows_hex_and_decoded_command() {
        let mut log = FrameLog::new(10);
        log.push(Direction::Tx, &encode(&Command::new(Opcode::PlayTrack, 1)));
        log.push(Direction::Rx, &encode(&Command::new(Opcode::Ack, 0)));
        let text = log.to_text(false);
        assert_eq!(
            text,
            "TX: 7E FF 06 03 01 00 01 FE F6 EF  (track: 1)\n\
             RX: 7E FF 06 41 01 00 00 FE B9 EF  (ack: 0)\n"
        );
    }

    #[test]
    fn filter_hides_a_direction() {
        let mut log = FrameLog::new(10);
        log.push(Direction::Tx, &encode(&Command::new(Opcode::Pause, 0)));
        log.push(Direction::Rx, &encode(&Command::new(Opcode::Ack, 0)));
        log.set_filter(false, true);
        let text = log.to_text(true);
        assert!(text.contains("TX: "));
        assert!(!text.contains("RX: "));
        assert!(text.starts_with('['));
    }
}
