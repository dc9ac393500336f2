use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{bounded, select};
use dfplink_core::decode::Equalizer;
use dfplink_core::{
    Dispatcher, PlayerConfig, Revision, Script, ScriptOutcome, SequenceOutcome, SerialLink,
    SimulatedPlayer,
};
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Tracks on the card of the built-in simulated player.
const SIM_TRACKS: u16 = 20;

#[derive(Parser)]
#[command(name = "dfplink")]
#[command(version, about = "Control a DFPlayer Mini over a serial port", long_about = None)]
struct Cli {
    /// Serial port (overrides the config file)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides the config file)
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Config file (defaults to <config dir>/dfplink/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Firmware revision of the module
    #[arg(long, global = true)]
    revision: Option<Revision>,

    /// Talk to a built-in simulated player instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Print the exchanged frames on exit (--frames, --frames=rx, --frames=tx)
    #[arg(long, global = true, value_enum, num_args = 0..=1, require_equals = true, default_missing_value = "all")]
    frames: Option<FrameFilter>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Print the effective configuration as JSON
    Config,

    /// Play one track from the SD card root
    Play {
        track: u16,

        /// Wait for the track to finish
        #[arg(short, long)]
        wait: bool,
    },

    /// Stop playback
    Stop,

    Pause,

    Resume,

    Next,

    Prev,

    /// Reset the module and report its storage
    Reset,

    /// Set the volume (0-30)
    Volume { level: u8 },

    /// Set the equalizer (normal, pop, rock, jazz, classic, bass)
    Eq { preset: Equalizer },

    /// Ask the module for a value
    Query {
        #[arg(value_enum)]
        what: QueryKind,
    },

    /// Play tracks in order, each to the end
    Sequence {
        #[arg(required = true)]
        tracks: Vec<u16>,

        /// Loop until Ctrl-C
        #[arg(short, long)]
        repeat: bool,
    },

    /// Run a command script
    Run { script: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum FrameFilter {
    All,
    Rx,
    Tx,
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryKind {
    Volume,
    Eq,
    Status,
    Tracks,
    Current,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(
        level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("cannot initialise logging")?;

    match cli.command {
        Commands::Ports => {
            list_ports();
            return Ok(());
        }
        Commands::Config => {
            println!("{}", load_config(&cli)?.to_json());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&cli)?;
    let player = Arc::new(connect(&cli, config)?);

    let (interrupt_tx, interrupt) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("cannot install Ctrl-C handler")?;

    // Commands can block for a whole track; run them off the main thread so
    // Ctrl-C can still stop the player.
    let (done_tx, done) = bounded(1);
    {
        let player = player.clone();
        let command = cli.command;
        std::thread::spawn(move || {
            let _ = done_tx.send(execute(&player, command));
        });
    }

    let result = select! {
        recv(done) -> r => r.unwrap_or_else(|_| Err(anyhow!("command thread exited"))),
        recv(interrupt) -> _ => {
            info!("interrupted, stopping playback");
            player.stop().context("stop failed")?;
            done.recv_timeout(Duration::from_secs(1)).unwrap_or(Ok(()))
        }
    };

    if let Some(filter) = cli.frames {
        match filter {
            FrameFilter::All => player.set_frame_filter(true, true),
            FrameFilter::Rx => player.set_frame_filter(true, false),
            FrameFilter::Tx => player.set_frame_filter(false, true),
        }
        print!("{}", player.frame_log());
    }
    result
}

fn list_ports() {
    let ports = SerialLink::list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for p in ports {
        match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => println!("{} ({:04X}:{:04X})", p.port_name, vid, pid),
            _ => println!("{} [{}]", p.port_name, p.port_type),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dfplink").join("config.json"))
}

fn load_file(path: &Path) -> Result<PlayerConfig> {
    PlayerConfig::load(path).with_context(|| format!("cannot load config {}", path.display()))
}

fn load_config(cli: &Cli) -> Result<PlayerConfig> {
    let mut config = match &cli.config {
        Some(path) => load_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_file(&path)?,
            _ => PlayerConfig::default(),
        },
    };
    if let Some(port) = &cli.port {
        config.link.port_name = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.link.baud_rate = baud;
    }
    if let Some(revision) = cli.revision {
        config.revision = revision;
    }
    Ok(config)
}

fn connect(cli: &Cli, config: PlayerConfig) -> Result<Dispatcher> {
    if cli.simulate {
        info!("using simulated player with {SIM_TRACKS} tracks");
        let sim = SimulatedPlayer::new(SIM_TRACKS);
        return Dispatcher::with_port(Box::new(sim), config).context("invalid configuration");
    }
    if config.link.port_name.is_empty() {
        bail!("no serial port given; pass --port or set link.port_name in the config file");
    }
    let port = config.link.port_name.clone();
    Dispatcher::open(config).with_context(|| format!("cannot open {port}"))
}

fn report(outcome: Option<SequenceOutcome>) -> Result<()> {
    match outcome {
        Some(SequenceOutcome::Completed { cycles }) => {
            println!("finished after {cycles} cycle(s)");
            Ok(())
        }
        Some(SequenceOutcome::Failed { track, error }) => {
            Err(anyhow!(error).context(format!("sequence failed at track {track}")))
        }
        Some(SequenceOutcome::Cancelled) | None => {
            println!("stopped");
            Ok(())
        }
    }
}

fn execute(player: &Dispatcher, command: Commands) -> Result<()> {
    match command {
        Commands::Ports | Commands::Config => {}
        Commands::Play { track, wait } => {
            player.play_track(track)?;
            if wait {
                let timeout = player.config().track_end_timeout();
                match player.wait_track_end(timeout)? {
                    Some(finished) => println!("track {finished} finished"),
                    None => println!("no end-of-track report within {timeout:?}"),
                }
            }
        }
        Commands::Stop => player.stop()?,
        Commands::Pause => player.pause()?,
        Commands::Resume => player.resume()?,
        Commands::Next => println!("track {}", player.next_track()?),
        Commands::Prev => println!("track {}", player.prev_track()?),
        Commands::Reset => {
            let sources = player.reset()?;
            println!("online: {sources:?}");
            if let Some(count) = player.state().track_count {
                println!("{count} tracks");
            }
        }
        Commands::Volume { level } => println!("volume {}", player.set_volume(level)?),
        Commands::Eq { preset } => player.set_eq(preset)?,
        Commands::Query { what } => match what {
            QueryKind::Volume => println!("{}", player.query_volume()?),
            QueryKind::Eq => println!("{:?}", player.query_eq()?),
            QueryKind::Status => println!("{:?}", player.query_status()?),
            QueryKind::Tracks => println!("{}", player.query_track_count()?),
            QueryKind::Current => println!("{}", player.query_current_track()?),
        },
        Commands::Sequence { tracks, repeat } => {
            player.play_sequence(&tracks, repeat)?;
            report(player.wait_sequence())?;
        }
        Commands::Run { script } => {
            let path = script;
            let script = Script::load(&path)?;
            if script.is_empty() {
                warn!("{} has no commands", path.display());
            }
            info!("running {} commands from {}", script.len(), path.display());
            match script.run(player)? {
                ScriptOutcome::Finished => {}
                ScriptOutcome::Stopped => println!("stopped"),
                ScriptOutcome::Repeating => report(player.wait_sequence())?,
            }
        }
    }
    Ok(())
}
