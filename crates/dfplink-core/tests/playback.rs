use dfplink_core::decode::{ModuleError, Opcode, PlaybackStatus};
use dfplink_core::{
    BusyPolicy, Dispatcher, Error, PlayerConfig, Revision, Script, ScriptOutcome,
    SequenceOutcome, SimulatedPlayer,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TRACK: Duration = Duration::from_millis(30);

fn config() -> PlayerConfig {
    PlayerConfig {
        response_timeout_ms: 100,
        track_end_timeout_ms: 1000,
        reset_settle_ms: 300,
        ..Default::default()
    }
}

fn connect(sim: &SimulatedPlayer, config: PlayerConfig) -> Dispatcher {
    Dispatcher::with_port(Box::new(sim.clone()), config).unwrap()
}

fn wait_for_plays(sim: &SimulatedPlayer, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while sim.received_ops(Opcode::PlayTrack).len() < count {
        assert!(Instant::now() < deadline, "player stalled");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn sequence_plays_each_track_once_in_order() {
    let sim = SimulatedPlayer::new(10).with_track_duration(TRACK);
    let player = connect(&sim, config());
    player.play_sequence(&[3, 5, 7], false).unwrap();
    assert_eq!(
        player.wait_sequence(),
        Some(SequenceOutcome::Completed { cycles: 1 })
    );
    assert_eq!(sim.received_ops(Opcode::PlayTrack), vec![3, 5, 7]);
    assert!(!player.is_sequence_active());
}

#[test]
fn stop_ends_a_repeating_sequence() {
    let sim = SimulatedPlayer::new(10).with_track_duration(TRACK);
    let player = connect(&sim, config());
    player.play_sequence(&[3, 5], true).unwrap();
    assert!(player.repeat_state());
    wait_for_plays(&sim, 4);

    player.stop().unwrap();
    let played = sim.received_ops(Opcode::PlayTrack);
    std::thread::sleep(TRACK * 5);
    assert_eq!(sim.received_ops(Opcode::PlayTrack), played);
    assert_eq!(played[..4], [3, 5, 3, 5]);

    let last = sim.received().last().map(|c| c.opcode());
    assert_eq!(last, Some(Opcode::Stop));
    assert!(!player.is_sequence_active());
    assert!(!player.repeat_state());
}

#[test]
fn stop_from_another_thread_releases_a_waiter() {
    let sim = SimulatedPlayer::new(10).with_track_duration(TRACK);
    let player = Arc::new(connect(&sim, config()));
    player.play_sequence(&[1, 2], true).unwrap();
    let waiter = {
        let player = player.clone();
        std::thread::spawn(move || player.wait_sequence())
    };
    wait_for_plays(&sim, 2);

    player.stop().unwrap();
    let outcome = waiter.join().unwrap();
    assert!(matches!(outcome, None | Some(SequenceOutcome::Cancelled)));
    let played = sim.received_ops(Opcode::PlayTrack).len();
    std::thread::sleep(TRACK * 4);
    assert_eq!(sim.received_ops(Opcode::PlayTrack).len(), played);
}

#[test]
fn clearing_repeat_lets_the_cycle_finish() {
    let sim = SimulatedPlayer::new(10).with_track_duration(TRACK);
    let player = connect(&sim, config());
    player.play_sequence(&[1, 2], true).unwrap();
    wait_for_plays(&sim, 3);
    assert!(player.set_repeat(false));
    match player.wait_sequence() {
        Some(SequenceOutcome::Completed { cycles }) => assert!(cycles >= 2),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(sim.received_ops(Opcode::PlayTrack).len() % 2, 0);
    assert!(!player.set_repeat(true));
}

#[test]
fn second_sequence_is_refused_while_one_runs() {
    let sim = SimulatedPlayer::new(10).with_track_duration(Duration::from_millis(300));
    let player = connect(&sim, config());
    player.play_sequence(&[1, 2], false).unwrap();
    assert_eq!(player.play_sequence(&[4], false), Err(Error::Busy));
    player.stop().unwrap();
    assert_eq!(player.play_sequence(&[], false), Err(Error::EmptySequence));
}

#[test]
fn failed_track_aborts_sequence_and_clears_repeat() {
    let sim = SimulatedPlayer::new(3).with_track_duration(TRACK);
    let player = connect(&sim, config());
    player.play_sequence(&[1, 9], true).unwrap();
    assert_eq!(
        player.wait_sequence(),
        Some(SequenceOutcome::Failed {
            track: 9,
            error: Error::Protocol(ModuleError::TrackNotFound),
        })
    );
    assert!(!player.repeat_state());
    assert_eq!(sim.received_ops(Opcode::PlayTrack), vec![1, 9]);
}

#[test]
fn unanswered_query_retries_once() {
    let sim = SimulatedPlayer::new(10);
    sim.mute_queries(true);
    let player = connect(&sim, config());
    assert_eq!(
        player.query_volume(),
        Err(Error::Timeout {
            opcode: Opcode::QueryVolume,
            attempts: 2
        })
    );
    assert_eq!(sim.received_ops(Opcode::QueryVolume).len(), 2);
}

#[test]
fn reject_policy_refuses_commands_during_a_sequence() {
    let sim = SimulatedPlayer::new(10).with_track_duration(Duration::from_millis(500));
    let cfg = PlayerConfig {
        busy_policy: BusyPolicy::Reject,
        ..config()
    };
    let player = connect(&sim, cfg);
    player.play_sequence(&[1, 2], false).unwrap();
    assert_eq!(player.set_volume(10), Err(Error::Busy));
    assert_eq!(player.query_status(), Err(Error::Busy));
    player.stop().unwrap();
    assert_eq!(player.set_volume(10), Ok(10));
}

#[test]
fn queue_policy_waits_for_the_link() {
    let sim = SimulatedPlayer::new(10).with_track_duration(Duration::from_millis(200));
    let player = connect(&sim, config());
    player.play_sequence(&[1, 2], false).unwrap();
    assert_eq!(player.set_volume(11), Ok(11));
    assert_eq!(sim.volume(), 11);
    player.stop().unwrap();
}

#[test]
fn legacy_module_stops_with_pause() {
    let sim = SimulatedPlayer::new(10);
    let cfg = PlayerConfig {
        revision: Revision::Legacy,
        ..config()
    };
    let player = connect(&sim, cfg);
    player.stop().unwrap();
    assert_eq!(sim.received_ops(Opcode::Pause).len(), 1);
    assert!(sim.received_ops(Opcode::Stop).is_empty());
    assert_eq!(
        player.send(dfplink_core::decode::Command::new(Opcode::QueryMode, 0)),
        Err(Error::Unsupported(Opcode::QueryMode))
    );
}

#[test]
fn script_runs_against_the_player() {
    let sim = SimulatedPlayer::new(10).with_track_duration(TRACK);
    let player = connect(&sim, config());
    let script = Script::parse("# warmup\nvol 7\ntrk 4, 6\nstp\n").unwrap();
    assert_eq!(script.run(&player), Ok(ScriptOutcome::Finished));
    assert_eq!(sim.volume(), 7);
    assert_eq!(sim.received_ops(Opcode::PlayTrack), vec![4, 6]);
    assert_eq!(sim.received_ops(Opcode::Stop).len(), 1);
}

#[test]
fn script_sleep_waits_for_the_playing_track() {
    let sim = SimulatedPlayer::new(10).with_track_duration(Duration::from_millis(200));
    let player = connect(&sim, config());
    let script = Script::parse("ply\nzzz 0\nvol 3\n").unwrap();
    let started = Instant::now();
    assert_eq!(script.run(&player), Ok(ScriptOutcome::Finished));
    assert!(started.elapsed() >= Duration::from_millis(180));
    assert_eq!(sim.status(), PlaybackStatus::Stopped);

    let started = Instant::now();
    let idle = Script::parse("zzz 0\nvol 4\n").unwrap();
    assert_eq!(idle.run(&player), Ok(ScriptOutcome::Finished));
    assert!(started.elapsed() < Duration::from_millis(150));
}

#[test]
fn same_track_twice_waits_out_each_play() {
    let sim = SimulatedPlayer::new(10).with_track_duration(Duration::from_millis(150));
    sim.duplicate_finish(true);
    let player = connect(&sim, config());
    let started = Instant::now();
    player.play_sequence(&[3, 3, 3], false).unwrap();
    assert_eq!(
        player.wait_sequence(),
        Some(SequenceOutcome::Completed { cycles: 1 })
    );
    assert_eq!(sim.received_ops(Opcode::PlayTrack), vec![3, 3, 3]);
    // Three full plays; an echoed finish taken as an end would cut this short.
    assert!(started.elapsed() >= Duration::from_millis(420));
}

#[test]
fn echoed_finish_does_not_skip_the_next_track() {
    let sim = SimulatedPlayer::new(10).with_track_duration(Duration::from_millis(150));
    sim.duplicate_finish(true);
    let player = connect(&sim, config());
    player.play_sequence(&[1, 2], false).unwrap();
    std::thread::sleep(Duration::from_millis(220));
    // Track 1 has finished twice; track 2 must still be playing.
    assert_eq!(sim.received_ops(Opcode::PlayTrack), vec![1, 2]);
    assert!(player.is_sequence_active());
    assert_eq!(
        player.wait_sequence(),
        Some(SequenceOutcome::Completed { cycles: 1 })
    );
}

#[test]
fn waiter_does_not_claim_a_newer_sequence() {
    let sim = SimulatedPlayer::new(10).with_track_duration(TRACK);
    let player = Arc::new(connect(&sim, config()));
    player.play_sequence(&[1, 2], true).unwrap();
    let (tx, rx) = crossbeam_channel::bounded(1);
    {
        let player = player.clone();
        std::thread::spawn(move || {
            let _ = tx.send(player.wait_sequence());
        });
    }
    wait_for_plays(&sim, 2);
    player.stop().unwrap();
    player.play_sequence(&[4], true).unwrap();

    let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(outcome, None | Some(SequenceOutcome::Cancelled)));
    assert!(player.is_sequence_active());
    player.stop().unwrap();
}

#[test]
fn script_repeat_leaves_sequence_running() {
    let sim = SimulatedPlayer::new(10).with_track_duration(TRACK);
    let player = connect(&sim, config());
    let script = Script::parse("rpt(2, 3)\n").unwrap();
    assert_eq!(script.run(&player), Ok(ScriptOutcome::Repeating));
    assert!(player.repeat_state());
    wait_for_plays(&sim, 3);
    player.stop().unwrap();
    assert!(!player.is_sequence_active());
}
