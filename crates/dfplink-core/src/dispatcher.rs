//! High-level control of a DFPlayer over one serial link.
//!
//! All frames go through [`Inner::send`], which holds the link for the whole
//! write-and-wait exchange, so a running sequence and ad-hoc commands never
//! interleave on the wire.

use crossbeam_channel::{at, select, unbounded, Receiver, Sender};
use dfplink_decode::{
    encode, Command, Equalizer, ModuleError, Opcode, PlaybackSource, PlaybackStatus,
};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capability::Capabilities;
use crate::config::{BusyPolicy, PlayerConfig, VOLUME_MAX};
use crate::error::{Error, Result, TransportError};
use crate::logbuf::{Direction, FrameLog};
use crate::sequence::{Sequence, SequenceOutcome};
use crate::serial_link::{LinkEvent, Port, SerialLink};

/// Highest root index the play-track command accepts.
pub const MAX_TRACK: u16 = 2999;
const QUERY_ATTEMPTS: u32 = 2;
const FRAME_LOG_LEN: usize = 1000;

/// What the host currently knows about the player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    pub track_count: Option<u16>,
    pub current_track: Option<u16>,
    pub volume: Option<u8>,
    pub eq: Option<Equalizer>,
    pub media_present: Option<bool>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Ack,
    Error(ModuleError),
}

pub(crate) struct Inner {
    link: Mutex<SerialLink>,
    pub(crate) config: PlayerConfig,
    caps: Capabilities,
    acks: Receiver<Reply>,
    replies: Receiver<Command>,
    pub(crate) track_end: Receiver<u16>,
    state: Arc<Mutex<PlayerState>>,
    log: Arc<Mutex<FrameLog>>,
}

fn drain<T>(rx: &Receiver<T>) {
    while rx.try_recv().is_ok() {}
}

impl Inner {
    fn command(&self, opcode: Opcode, param: u16) -> Command {
        Command::new(opcode, param).with_feedback(self.config.feedback)
    }

    fn write(&self, link: &SerialLink, command: &Command) -> Result<()> {
        let frame = encode(command);
        debug!("tx {command}");
        link.write_frame(&frame)?;
        self.log.lock().push(Direction::Tx, &frame);
        Ok(())
    }

    pub(crate) fn send(&self, command: Command) -> Result<Option<Command>> {
        let opcode = command.opcode();
        if !self.caps.supports(opcode) {
            return Err(Error::Unsupported(opcode));
        }
        let link = self.link.lock();

        if opcode.is_query() {
            for attempt in 1..=QUERY_ATTEMPTS {
                drain(&self.replies);
                drain(&self.acks);
                self.write(&link, &command)?;
                if let Some(reply) = self.await_reply(opcode)? {
                    return Ok(Some(reply));
                }
                if attempt < QUERY_ATTEMPTS {
                    warn!("no reply to {opcode}, retrying");
                }
            }
            return Err(Error::Timeout {
                opcode,
                attempts: QUERY_ATTEMPTS,
            });
        }

        drain(&self.acks);
        if opcode.starts_playback() {
            drain(&self.track_end);
        }
        self.write(&link, &command)?;
        if !command.feedback() {
            return Ok(None);
        }
        match self.acks.recv_timeout(self.config.response_timeout()) {
            Ok(Reply::Ack) => Ok(None),
            Ok(Reply::Error(e)) => Err(Error::Protocol(e)),
            Err(_) => Err(Error::Timeout {
                opcode,
                attempts: 1,
            }),
        }
    }

    /// `Ok(None)` on timeout.
    fn await_reply(&self, opcode: Opcode) -> Result<Option<Command>> {
        let deadline = Instant::now() + self.config.response_timeout();
        loop {
            select! {
                recv(self.replies) -> msg => match msg {
                    Ok(reply) if reply.opcode() == opcode => return Ok(Some(reply)),
                    Ok(other) => debug!("ignoring stray reply {other}"),
                    Err(_) => return Err(TransportError::Closed.into()),
                },
                recv(self.acks) -> msg => match msg {
                    Ok(Reply::Error(e)) => return Err(Error::Protocol(e)),
                    Ok(Reply::Ack) => {}
                    Err(_) => return Err(TransportError::Closed.into()),
                },
                recv(at(deadline)) -> _ => return Ok(None),
            }
        }
    }

    fn track_limit(&self) -> u16 {
        self.state.lock().track_count.unwrap_or(MAX_TRACK).min(MAX_TRACK)
    }

    pub(crate) fn play_track(&self, track: u16) -> Result<()> {
        let limit = self.track_limit();
        if track == 0 || track > limit {
            return Err(Error::TrackOutOfRange { track, limit });
        }
        info!("play track {track}");
        self.send(self.command(Opcode::PlayTrack, track))?;
        self.state.lock().current_track = Some(track);
        Ok(())
    }

    fn query(&self, opcode: Opcode) -> Result<u16> {
        let reply = self.send(self.command(opcode, 0))?;
        Ok(reply.map(|r| r.param()).unwrap_or_default())
    }
}

fn route(
    events: Receiver<LinkEvent>,
    acks: Sender<Reply>,
    replies: Sender<Command>,
    track_end: Sender<u16>,
    state: Arc<Mutex<PlayerState>>,
    log: Arc<Mutex<FrameLog>>,
) {
    for event in events.iter() {
        match event {
            LinkEvent::Frame(command) => {
                log.lock().push(Direction::Rx, &encode(&command));
                debug!("rx {command}");
                match command.opcode() {
                    Opcode::Ack => {
                        let _ = acks.send(Reply::Ack);
                    }
                    Opcode::Error => {
                        let err = ModuleError::from(command.param());
                        warn!("player error: {err}");
                        let _ = acks.send(Reply::Error(err));
                    }
                    op if op.is_track_finished() => {
                        let _ = track_end.send(command.param());
                    }
                    Opcode::MediaInserted => {
                        info!("media inserted");
                        state.lock().media_present = Some(true);
                    }
                    Opcode::MediaRemoved => {
                        warn!("media removed");
                        state.lock().media_present = Some(false);
                    }
                    op if op == Opcode::StorageOnline || op.is_query() => {
                        let _ = replies.send(command);
                    }
                    other => debug!("ignoring {other}"),
                }
            }
            LinkEvent::Garbled(e) => warn!("discarded frame: {e}"),
            LinkEvent::Error(e) => error!("serial link: {e}"),
            LinkEvent::Closed => break,
        }
    }
}

/// Owner of the serial link and of the single track-sequence task.
pub struct Dispatcher {
    inner: Arc<Inner>,
    sequence: Mutex<Option<Sequence>>,
}

impl Dispatcher {
    /// Open the configured serial port.
    pub fn open(config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        let link = SerialLink::open(&config.link)?;
        Self::new(link, config)
    }

    pub fn with_port(port: Box<dyn Port>, config: PlayerConfig) -> Result<Self> {
        Self::new(SerialLink::with_port(port), config)
    }

    pub fn new(link: SerialLink, config: PlayerConfig) -> Result<Self> {
        let caps = config.validate()?;
        let (tx_ack, acks) = unbounded();
        let (tx_reply, replies) = unbounded();
        let (tx_end, track_end) = unbounded();
        let state = Arc::new(Mutex::new(PlayerState::default()));
        let log = Arc::new(Mutex::new(FrameLog::new(FRAME_LOG_LEN)));

        let events = link.events().clone();
        let (router_state, router_log) = (state.clone(), log.clone());
        std::thread::spawn(move || route(events, tx_ack, tx_reply, tx_end, router_state, router_log));

        Ok(Self {
            inner: Arc::new(Inner {
                link: Mutex::new(link),
                config,
                caps,
                acks,
                replies,
                track_end,
                state,
                log,
            }),
            sequence: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.caps
    }

    pub fn state(&self) -> PlayerState {
        self.inner.state.lock().clone()
    }

    pub fn frame_log(&self) -> String {
        self.inner.log.lock().to_text(true)
    }

    /// Choose which directions [`Dispatcher::frame_log`] renders.
    pub fn set_frame_filter(&self, show_rx: bool, show_tx: bool) {
        self.inner.log.lock().set_filter(show_rx, show_tx);
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.inner.log.lock().commands(Direction::Tx)
    }

    pub fn is_sequence_active(&self) -> bool {
        self.sequence
            .lock()
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }

    fn guard(&self) -> Result<()> {
        if self.inner.config.busy_policy == BusyPolicy::Reject && self.is_sequence_active() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Send one command. Queries return the reply frame.
    pub fn send(&self, command: Command) -> Result<Option<Command>> {
        self.guard()?;
        self.inner.send(command)
    }

    pub fn play_track(&self, track: u16) -> Result<()> {
        self.guard()?;
        self.inner.play_track(track)
    }

    pub fn next_track(&self) -> Result<u16> {
        self.guard()?;
        let limit = self.inner.track_limit();
        let track = match self.inner.state.lock().current_track {
            Some(current) if current < limit => current + 1,
            _ => 1,
        };
        self.inner.play_track(track)?;
        Ok(track)
    }

    pub fn prev_track(&self) -> Result<u16> {
        self.guard()?;
        let limit = self.inner.track_limit();
        let track = match self.inner.state.lock().current_track {
            Some(current) if current > 1 && current <= limit => current - 1,
            _ => limit,
        };
        self.inner.play_track(track)?;
        Ok(track)
    }

    /// Start playing `tracks` in order on a background task.
    ///
    /// With `repeat`, the list restarts until [`Dispatcher::stop`] or
    /// `set_repeat(false)`. Nothing else should be sent while it runs.
    pub fn play_sequence(&self, tracks: &[u16], repeat: bool) -> Result<()> {
        if tracks.is_empty() {
            return Err(Error::EmptySequence);
        }
        let limit = self.inner.track_limit();
        if let Some(&track) = tracks.iter().find(|&&t| t == 0 || t > limit) {
            return Err(Error::TrackOutOfRange { track, limit });
        }
        let mut slot = self.sequence.lock();
        if slot.as_ref().is_some_and(|s| !s.is_finished()) {
            return Err(Error::Busy);
        }
        if let Some(done) = slot.take() {
            debug!("previous sequence ended: {:?}", done.join());
        }
        info!("starting sequence {tracks:?}, repeat: {repeat}");
        *slot = Some(Sequence::spawn(self.inner.clone(), tracks.to_vec(), repeat));
        Ok(())
    }

    /// Turn repeating on or off for the running sequence.
    pub fn set_repeat(&self, repeat: bool) -> bool {
        match self.sequence.lock().as_mut() {
            Some(seq) if !seq.is_finished() => {
                seq.set_repeat(repeat);
                true
            }
            _ => false,
        }
    }

    pub fn repeat_state(&self) -> bool {
        self.sequence
            .lock()
            .as_ref()
            .is_some_and(|s| !s.is_finished() && s.repeat())
    }

    /// Block until the running sequence ends.
    ///
    /// The sequence stays cancellable by [`Dispatcher::stop`] from another
    /// thread meanwhile; `None` if there was none, or `stop` reaped it first.
    pub fn wait_sequence(&self) -> Option<SequenceOutcome> {
        let done = self.sequence.lock().as_ref()?.finished();
        let _ = done.recv();
        let mut slot = self.sequence.lock();
        // A newer sequence may have been started in the meantime.
        if !slot.as_ref().is_some_and(|s| s.finished().same_channel(&done)) {
            return None;
        }
        slot.take().map(Sequence::join)
    }

    /// Cancel any sequence, then halt playback on the player.
    pub fn stop(&self) -> Result<()> {
        let running = self.sequence.lock().take();
        if let Some(seq) = running {
            info!("sequence ended: {:?}", seq.cancel());
        }
        self.inner.send(self.inner.command(self.inner.caps.stop_opcode(), 0))?;
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.guard()?;
        self.inner.send(self.inner.command(Opcode::Pause, 0))?;
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.guard()?;
        drain(&self.inner.track_end);
        self.inner.send(self.inner.command(Opcode::Play, 0))?;
        Ok(())
    }

    /// Wait for the player to report the end of the current track.
    ///
    /// `Ok(None)` on timeout. Refused while a sequence runs, since the
    /// sequence consumes those reports itself.
    pub fn wait_track_end(&self, timeout: Duration) -> Result<Option<u16>> {
        if self.is_sequence_active() {
            return Err(Error::Busy);
        }
        Ok(self.inner.track_end.recv_timeout(timeout).ok())
    }

    pub fn set_volume(&self, level: u8) -> Result<u8> {
        self.guard()?;
        let level = level.min(VOLUME_MAX);
        self.inner
            .send(self.inner.command(Opcode::SetVolume, u16::from(level)))?;
        self.inner.state.lock().volume = Some(level);
        Ok(level)
    }

    pub fn volume_up(&self) -> Result<()> {
        self.guard()?;
        self.inner.send(self.inner.command(Opcode::VolumeUp, 0))?;
        let mut state = self.inner.state.lock();
        state.volume = state.volume.map(|v| (v + 1).min(VOLUME_MAX));
        Ok(())
    }

    pub fn volume_down(&self) -> Result<()> {
        self.guard()?;
        self.inner.send(self.inner.command(Opcode::VolumeDown, 0))?;
        let mut state = self.inner.state.lock();
        state.volume = state.volume.map(|v| v.saturating_sub(1));
        Ok(())
    }

    pub fn set_eq(&self, eq: Equalizer) -> Result<()> {
        self.guard()?;
        self.inner.send(self.inner.command(Opcode::SetEq, eq.code()))?;
        self.inner.state.lock().eq = Some(eq);
        Ok(())
    }

    pub fn query_volume(&self) -> Result<u8> {
        self.guard()?;
        let volume = self.inner.query(Opcode::QueryVolume)?.min(u16::from(VOLUME_MAX)) as u8;
        self.inner.state.lock().volume = Some(volume);
        Ok(volume)
    }

    pub fn query_eq(&self) -> Result<Equalizer> {
        self.guard()?;
        let code = self.inner.query(Opcode::QueryEq)?;
        let eq = Equalizer::from_code(code).unwrap_or_else(|| {
            warn!("unknown equalizer code {code}");
            Equalizer::Normal
        });
        self.inner.state.lock().eq = Some(eq);
        Ok(eq)
    }

    pub fn query_status(&self) -> Result<PlaybackStatus> {
        self.guard()?;
        Ok(PlaybackStatus::from(self.inner.query(Opcode::QueryStatus)?))
    }

    /// Number of files on the SD card; also bounds later track numbers.
    pub fn query_track_count(&self) -> Result<u16> {
        self.guard()?;
        let count = self.inner.query(Opcode::QuerySdFiles)?;
        self.inner.state.lock().track_count = Some(count);
        Ok(count)
    }

    pub fn query_current_track(&self) -> Result<u16> {
        self.guard()?;
        let track = self.inner.query(Opcode::QuerySdTrack)?;
        self.inner.state.lock().current_track = Some(track);
        Ok(track)
    }

    /// Reset the module and wait for it to report its storage.
    ///
    /// Refreshes the track count and applies the configured volume and EQ.
    pub fn reset(&self) -> Result<Vec<PlaybackSource>> {
        self.guard()?;
        drain(&self.inner.replies);
        self.inner.send(self.inner.command(Opcode::Reset, 0))?;

        let deadline = Instant::now() + self.inner.config.reset_settle();
        let online = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.inner.replies.recv_timeout(remaining) {
                Ok(reply) if reply.opcode() == Opcode::StorageOnline => break reply.param(),
                Ok(other) => debug!("ignoring {other} while resetting"),
                Err(_) => {
                    return Err(Error::Timeout {
                        opcode: Opcode::Reset,
                        attempts: 1,
                    })
                }
            }
        };

        let sources = PlaybackSource::online(online);
        {
            let mut state = self.inner.state.lock();
            *state = PlayerState {
                media_present: Some(sources.contains(&PlaybackSource::SdCard)),
                ..PlayerState::default()
            };
        }
        if !sources.contains(&PlaybackSource::SdCard) {
            return Err(Error::NoMedia);
        }
        info!("player online: {sources:?}");

        let count = self.query_track_count()?;
        info!("{count} tracks on SD card");
        if let Some(volume) = self.inner.config.volume {
            self.set_volume(volume)?;
        }
        if let Some(eq) = self.inner.config.eq {
            self.set_eq(eq)?;
        }
        Ok(sources)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(seq) = self.sequence.get_mut().take() {
            seq.cancel();
        }
        self.inner.link.lock().close();
    }
}
