//! Background task that plays an ordered list of tracks.
//!
//! The task talks to its owner only through a control channel: repeat on/off
//! updates, and cancellation either as an explicit message or by the owner
//! dropping its sender. The channel is checked before every `play_track` and
//! throughout every wait for a track to finish.

use crossbeam_channel::{at, bounded, select, unbounded, Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::dispatcher::Inner;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOutcome {
    /// Ran to the end of the list after `cycles` passes.
    Completed { cycles: u32 },
    Cancelled,
    /// `play_track` failed; repeating was switched off.
    Failed { track: u16, error: Error },
}

enum Control {
    Repeat(bool),
    Cancel,
}

/// Whether the sequence restarts when it reaches the end of its list.
///
/// Owned by the task; the owner changes it only through [`Control`].
struct RepeatState {
    enabled: bool,
}

impl RepeatState {
    /// Apply pending control messages. `false` once cancelled.
    fn poll(&mut self, control: &Receiver<Control>) -> bool {
        loop {
            match control.try_recv() {
                Ok(Control::Repeat(on)) => self.enabled = on,
                Ok(Control::Cancel) | Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => return true,
            }
        }
    }

    fn clear(&mut self) {
        self.enabled = false;
    }
}

/// Owner's handle on a running sequence.
pub(crate) struct Sequence {
    control: Sender<Control>,
    repeat: bool,
    /// Disconnects when the task exits.
    done: Receiver<()>,
    handle: JoinHandle<SequenceOutcome>,
}

impl Sequence {
    pub(crate) fn spawn(inner: Arc<Inner>, tracks: Vec<u16>, repeat: bool) -> Self {
        let (control, rx) = unbounded();
        let (done_tx, done) = bounded::<()>(0);
        let state = RepeatState { enabled: repeat };
        let handle = std::thread::spawn(move || {
            let _done = done_tx;
            run(&inner, &tracks, state, &rx)
        });
        Self {
            control,
            repeat,
            done,
            handle,
        }
    }

    /// Blocks in `recv` until the task exits.
    pub(crate) fn finished(&self) -> Receiver<()> {
        self.done.clone()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub(crate) fn repeat(&self) -> bool {
        self.repeat
    }

    pub(crate) fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
        let _ = self.control.send(Control::Repeat(repeat));
    }

    pub(crate) fn join(self) -> SequenceOutcome {
        self.handle.join().unwrap_or_else(|_| {
            warn!("sequence task panicked");
            SequenceOutcome::Cancelled
        })
    }

    /// Clear repeat, cancel, and wait for the task to exit.
    pub(crate) fn cancel(self) -> SequenceOutcome {
        let _ = self.control.send(Control::Repeat(false));
        let _ = self.control.send(Control::Cancel);
        self.join()
    }
}

enum Wait {
    Finished,
    Cancelled,
}

/// Window within which a repeat of the previous finish is an echo.
const ECHO_WINDOW: Duration = Duration::from_millis(100);

/// Drops the second copy of a track-finished notification.
///
/// Some modules send every finish twice a few milliseconds apart. The echo
/// can land after the next track has started, so it is recognised by its
/// number and its distance from the previous finish, not by the track now
/// playing.
#[derive(Default)]
struct FinishFilter {
    last: Option<(u16, Instant)>,
}

impl FinishFilter {
    /// `true` if `finished` ends the track now playing.
    fn accept(&mut self, finished: u16, playing: u16, now: Instant) -> bool {
        if let Some((last, at)) = self.last {
            if finished == last && (finished != playing || now.duration_since(at) < ECHO_WINDOW) {
                return false;
            }
        }
        self.last = Some((finished, now));
        true
    }
}

fn run(
    inner: &Inner,
    tracks: &[u16],
    mut repeat: RepeatState,
    control: &Receiver<Control>,
) -> SequenceOutcome {
    let mut cycles = 0;
    let mut filter = FinishFilter::default();
    loop {
        for &track in tracks {
            if !repeat.poll(control) {
                return SequenceOutcome::Cancelled;
            }
            if let Err(error) = inner.play_track(track) {
                repeat.clear();
                warn!("sequence aborted at track {track}: {error}");
                return SequenceOutcome::Failed { track, error };
            }
            match wait_for_finish(inner, track, &mut filter, &mut repeat, control) {
                Wait::Finished => {}
                Wait::Cancelled => return SequenceOutcome::Cancelled,
            }
        }
        cycles += 1;
        if !repeat.poll(control) {
            return SequenceOutcome::Cancelled;
        }
        if !repeat.enabled {
            return SequenceOutcome::Completed { cycles };
        }
        info!("repeating sequence, cycle {}", cycles + 1);
    }
}

fn wait_for_finish(
    inner: &Inner,
    track: u16,
    filter: &mut FinishFilter,
    repeat: &mut RepeatState,
    control: &Receiver<Control>,
) -> Wait {
    let deadline = Instant::now() + inner.config.track_end_timeout();
    loop {
        select! {
            recv(inner.track_end) -> msg => match msg {
                Ok(finished) if filter.accept(finished, track, Instant::now()) => {
                    return Wait::Finished;
                }
                Ok(finished) => debug!("duplicate finish for track {finished}"),
                Err(_) => return Wait::Finished,
            },
            recv(control) -> msg => match msg {
                Ok(Control::Repeat(on)) => repeat.enabled = on,
                Ok(Control::Cancel) | Err(_) => return Wait::Cancelled,
            },
            recv(at(deadline)) -> _ => {
                warn!("no finish notification for track {track}, moving on");
                return Wait::Finished;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_state_follows_control_messages() {
        let (tx, rx) = unbounded();
        let mut state = RepeatState { enabled: true };
        tx.send(Control::Repeat(false)).unwrap();
        assert!(state.poll(&rx));
        assert!(!state.enabled);
        tx.send(Control::Repeat(true)).unwrap();
        tx.send(Control::Cancel).unwrap();
        assert!(!state.poll(&rx));
    }

    #[test]
    fn echo_of_previous_finish_is_dropped() {
        let mut filter = FinishFilter::default();
        let start = Instant::now();
        assert!(filter.accept(3, 3, start));
        // Same track replayed: the echo 15 ms later is not its end.
        assert!(!filter.accept(3, 3, start + Duration::from_millis(15)));
        // The replay's real finish comes a full track later.
        assert!(filter.accept(3, 3, start + Duration::from_millis(200)));
    }

    #[test]
    fn stale_finish_of_another_track_is_dropped() {
        let mut filter = FinishFilter::default();
        let start = Instant::now();
        assert!(filter.accept(3, 3, start));
        assert!(!filter.accept(3, 5, start + Duration::from_millis(500)));
        assert!(filter.accept(5, 5, start + Duration::from_millis(600)));
    }

    #[test]
    fn dropped_owner_cancels() {
        let (tx, rx) = unbounded::<Control>();
        let mut state = RepeatState { enabled: true };
        drop(tx);
        assert!(!state.poll(&rx));
    }
}
