//! DFPlayer Mini command frames: opcode table, codec and stream reader.

pub mod error;
pub mod frame;
pub mod opcode;
pub mod params;

pub use error::DecodeError;
pub use frame::{checksum, decode, encode, hex_string, Command, FrameReader, FRAME_LEN};
pub use opcode::Opcode;
pub use params::{Equalizer, ModuleError, PlaybackSource, PlaybackStatus};
