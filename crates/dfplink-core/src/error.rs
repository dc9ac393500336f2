use dfplink_decode::{DecodeError, ModuleError, Opcode};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("cannot open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("serial write failed: {0}")]
    Write(String),

    #[error("serial link closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no response to {opcode} after {attempts} attempt(s)")]
    Timeout { opcode: Opcode, attempts: u32 },

    #[error("player reported: {0}")]
    Protocol(ModuleError),

    #[error("a track sequence is running; stop it first")]
    Busy,

    #[error("{0} is not supported by this player revision")]
    Unsupported(Opcode),

    #[error("track {track} outside 1..={limit}")]
    TrackOutOfRange { track: u16, limit: u16 },

    #[error("empty track sequence")]
    EmptySequence,

    #[error("no SD card reported after reset")]
    NoMedia,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
