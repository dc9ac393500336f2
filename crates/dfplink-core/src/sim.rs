//! In-process stand-in for a DFPlayer Mini on the far end of the UART.
//!
//! Answers commands the way the module does: an ACK for actions that asked
//! for feedback, a data frame for queries, a track-finished notification a
//! fixed time after a track starts, and an error frame for missing tracks.

use dfplink_decode::{encode, Command, Equalizer, FrameReader, Opcode, PlaybackStatus};
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ERR_TRACK_NOT_FOUND: u16 = 6;
const STORAGE_SD: u16 = 0x0002;
/// Commands kept for inspection; older ones fall off.
const RECEIVED_MAX: usize = 1000;
/// Gap between a finish notification and its echo.
const ECHO_DELAY: Duration = Duration::from_millis(15);

struct Pending {
    due: Instant,
    frame: [u8; dfplink_decode::FRAME_LEN],
    /// Track-finished notifications are dropped when playback stops.
    finish: bool,
}

struct SimState {
    reader: FrameReader,
    received: VecDeque<Command>,
    pending: Vec<Pending>,
    outbound: VecDeque<u8>,
    track_count: u16,
    track_duration: Duration,
    volume: u16,
    eq: Equalizer,
    status: PlaybackStatus,
    current_track: u16,
    media: bool,
    storage: u16,
    duplicate_finish: bool,
    mute_queries: bool,
    mute_acks: bool,
}

#[derive(Clone)]
pub struct SimulatedPlayer {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlayer {
    pub fn new(track_count: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                reader: FrameReader::new(),
                received: VecDeque::new(),
                pending: Vec::new(),
                outbound: VecDeque::new(),
                track_count,
                track_duration: Duration::from_secs(2),
                volume: 15,
                eq: Equalizer::Normal,
                status: PlaybackStatus::Stopped,
                current_track: 0,
                media: true,
                storage: STORAGE_SD,
                duplicate_finish: false,
                mute_queries: false,
                mute_acks: false,
            })),
        }
    }

    pub fn with_track_duration(self, duration: Duration) -> Self {
        self.state.lock().track_duration = duration;
        self
    }

    /// Leave queries unanswered.
    pub fn mute_queries(&self, mute: bool) {
        self.state.lock().mute_queries = mute;
    }

    /// Stop sending ACK frames.
    pub fn mute_acks(&self, mute: bool) {
        self.state.lock().mute_acks = mute;
    }

    /// Send no storage-online frame after a reset.
    pub fn remove_media(&self) {
        self.state.lock().media = false;
    }

    /// Parameter of the storage-online frame sent after a reset.
    pub fn storage_online(&self, param: u16) {
        self.state.lock().storage = param;
    }

    /// Report every finished track twice, like some module clones do.
    pub fn duplicate_finish(&self, on: bool) {
        self.state.lock().duplicate_finish = on;
    }

    /// The most recent commands received, oldest first.
    pub fn received(&self) -> Vec<Command> {
        self.state.lock().received.iter().copied().collect()
    }

    pub fn received_ops(&self, opcode: Opcode) -> Vec<u16> {
        self.state
            .lock()
            .received
            .iter()
            .filter(|c| c.opcode() == opcode)
            .map(Command::param)
            .collect()
    }

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.lock().status
    }
}

impl SimState {
    fn reply(&mut self, opcode: Opcode, param: u16, after: Duration, finish: bool) {
        self.pending.push(Pending {
            due: Instant::now() + after,
            frame: encode(&Command::new(opcode, param).with_feedback(false)),
            finish,
        });
    }

    fn ack(&mut self, command: &Command) {
        if command.feedback() && !self.mute_acks {
            self.reply(Opcode::Ack, 0, Duration::ZERO, false);
        }
    }

    fn stop_playback(&mut self, status: PlaybackStatus) {
        self.pending.retain(|p| !p.finish);
        self.status = status;
    }

    fn start_track(&mut self, command: &Command, track: u16) {
        if track == 0 || track > self.track_count {
            self.reply(Opcode::Error, ERR_TRACK_NOT_FOUND, Duration::ZERO, false);
            return;
        }
        self.ack(command);
        self.pending.retain(|p| !p.finish);
        self.current_track = track;
        self.status = PlaybackStatus::Playing;
        let duration = self.track_duration;
        self.reply(Opcode::FinishedSd, track, duration, true);
        if self.duplicate_finish {
            // Already on the wire by the time the host reacts: a new play
            // does not cancel it.
            self.reply(Opcode::FinishedSd, track, duration + ECHO_DELAY, false);
        }
    }

    fn handle(&mut self, command: Command) {
        debug!("sim received {command}");
        self.received.push_back(command);
        if self.received.len() > RECEIVED_MAX {
            self.received.pop_front();
        }
        let param = command.param();
        match command.opcode() {
            Opcode::PlayTrack => self.start_track(&command, param),
            Opcode::Next => {
                let track = self.current_track % self.track_count.max(1) + 1;
                self.start_track(&command, track);
            }
            Opcode::Previous => {
                let track = if self.current_track <= 1 {
                    self.track_count
                } else {
                    self.current_track - 1
                };
                self.start_track(&command, track);
            }
            Opcode::Play => {
                let track = self.current_track.max(1);
                self.start_track(&command, track);
            }
            Opcode::Stop => {
                self.ack(&command);
                self.stop_playback(PlaybackStatus::Stopped);
            }
            Opcode::Pause => {
                self.ack(&command);
                self.stop_playback(PlaybackStatus::Paused);
            }
            Opcode::SetVolume => {
                self.volume = param.min(30);
                self.ack(&command);
            }
            Opcode::VolumeUp => {
                self.volume = (self.volume + 1).min(30);
                self.ack(&command);
            }
            Opcode::VolumeDown => {
                self.volume = self.volume.saturating_sub(1);
                self.ack(&command);
            }
            Opcode::SetEq => {
                self.eq = Equalizer::from_code(param).unwrap_or_default();
                self.ack(&command);
            }
            Opcode::Reset => {
                self.ack(&command);
                self.stop_playback(PlaybackStatus::Stopped);
                self.current_track = 0;
                if self.media {
                    let storage = self.storage;
                    self.reply(Opcode::StorageOnline, storage, Duration::from_millis(20), false);
                }
            }
            op if op.is_query() => {
                if self.mute_queries {
                    return;
                }
                let value = match op {
                    Opcode::QueryVolume => self.volume,
                    Opcode::QueryEq => self.eq.code(),
                    Opcode::QueryStatus => match self.status {
                        PlaybackStatus::Stopped => 0,
                        PlaybackStatus::Playing => 1,
                        PlaybackStatus::Paused => 2,
                        PlaybackStatus::Other(v) => v,
                    },
                    Opcode::QuerySdFiles => self.track_count,
                    Opcode::QuerySdTrack => self.current_track,
                    _ => 0,
                };
                self.reply(op, value, Duration::ZERO, false);
            }
            _ => self.ack(&command),
        }
    }

    fn release_due(&mut self) {
        let now = Instant::now();
        self.pending.sort_by_key(|p| p.due);
        while self.pending.first().is_some_and(|p| p.due <= now) {
            let pending = self.pending.remove(0);
            if pending.finish {
                self.status = PlaybackStatus::Stopped;
            }
            self.outbound.extend(pending.frame);
        }
    }
}

impl Read for SimulatedPlayer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        state.release_due();
        let n = buf.len().min(state.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedPlayer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock();
        state.reader.push(buf);
        while let Some(decoded) = state.reader.next_frame() {
            if let Ok(command) = decoded {
                state.handle(command);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfplink_decode::decode;

    fn read_frames(sim: &mut SimulatedPlayer) -> Vec<Command> {
        let mut buf = [0u8; 128];
        let n = sim.read(&mut buf).unwrap();
        buf[..n]
            .chunks(dfplink_decode::FRAME_LEN)
            .map(|f| decode(f).unwrap())
            .collect()
    }

    #[test]
    fn acks_and_answers_queries() {
        let mut sim = SimulatedPlayer::new(12);
        sim.write_all(&encode(&Command::new(Opcode::SetVolume, 40))).unwrap();
        sim.write_all(&encode(&Command::new(Opcode::QuerySdFiles, 0))).unwrap();
        let frames = read_frames(&mut sim);
        assert_eq!(frames[0].opcode(), Opcode::Ack);
        assert_eq!(frames[1].opcode(), Opcode::QuerySdFiles);
        assert_eq!(frames[1].param(), 12);
        assert_eq!(sim.volume(), 30);
    }

    #[test]
    fn missing_track_gets_error_frame() {
        let mut sim = SimulatedPlayer::new(3);
        sim.write_all(&encode(&Command::new(Opcode::PlayTrack, 9))).unwrap();
        let frames = read_frames(&mut sim);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opcode(), Opcode::Error);
        assert_eq!(frames[0].param(), ERR_TRACK_NOT_FOUND);
    }

    #[test]
    fn finished_notification_follows_track_duration() {
        let mut sim = SimulatedPlayer::new(3).with_track_duration(Duration::from_millis(30));
        sim.write_all(&encode(&Command::new(Opcode::PlayTrack, 2))).unwrap();
        assert_eq!(read_frames(&mut sim)[0].opcode(), Opcode::Ack);
        assert_eq!(sim.status(), PlaybackStatus::Playing);
        std::thread::sleep(Duration::from_millis(50));
        let frames = read_frames(&mut sim);
        assert_eq!(frames[0].opcode(), Opcode::FinishedSd);
        assert_eq!(frames[0].param(), 2);
        assert_eq!(sim.status(), PlaybackStatus::Stopped);
    }

    #[test]
    fn duplicate_finish_sends_an_echo() {
        let mut sim = SimulatedPlayer::new(3).with_track_duration(Duration::from_millis(20));
        sim.duplicate_finish(true);
        sim.write_all(&encode(&Command::new(Opcode::PlayTrack, 2))).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        let finishes: Vec<u16> = read_frames(&mut sim)
            .iter()
            .filter(|f| f.opcode() == Opcode::FinishedSd)
            .map(|f| f.param())
            .collect();
        assert_eq!(finishes, vec![2, 2]);
    }

    #[test]
    fn received_commands_are_bounded() {
        let mut sim = SimulatedPlayer::new(3);
        sim.mute_acks(true);
        for level in 0..(RECEIVED_MAX + 5) {
            let cmd = Command::new(Opcode::SetVolume, (level % 31) as u16);
            sim.write_all(&encode(&cmd)).unwrap();
        }
        let received = sim.received();
        assert_eq!(received.len(), RECEIVED_MAX);
        assert_eq!(received[0].param(), 5);
        assert_eq!(received.last().map(|c| c.param()), Some(((RECEIVED_MAX + 4) % 31) as u16));
    }

    #[test]
    fn stop_cancels_pending_finish() {
        let mut sim = SimulatedPlayer::new(3).with_track_duration(Duration::from_millis(20));
        sim.write_all(&encode(&Command::new(Opcode::PlayTrack, 1))).unwrap();
        sim.write_all(&encode(&Command::new(Opcode::Stop, 0))).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let frames = read_frames(&mut sim);
        assert!(frames.iter().all(|f| f.opcode() == Opcode::Ack));
        assert_eq!(sim.received_ops(Opcode::PlayTrack), vec![1]);
    }
}
