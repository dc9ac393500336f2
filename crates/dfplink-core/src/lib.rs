//! Core functionalities: serial link, dispatcher, sequences, scripts, settings.

pub mod capability;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logbuf;
pub mod script;
pub mod sequence;
pub mod serial_link;
pub mod sim;

pub use dfplink_decode as decode;

pub use capability::{Capabilities, Revision};
pub use config::{BusyPolicy, PlayerConfig, VOLUME_MAX};
pub use dispatcher::{Dispatcher, PlayerState, MAX_TRACK};
pub use error::{Error, Result, TransportError};
pub use logbuf::{Direction, FrameLog};
pub use script::{Script, ScriptError, ScriptOp, ScriptOutcome};
pub use sequence::SequenceOutcome;
pub use serial_link::{LinkConfig, LinkEvent, Port, PortInfo, SerialLink};
pub use sim::SimulatedPlayer;
