//! Frame encoding/decoding.
//!
//! Every message in either direction is a fixed 10-byte frame:
//!
//! ```text
//! +------+------+------+--------+----------+---------+---------+---------+---------+------+
//! | 0x7E | 0xFF | 0x06 | opcode | feedback | param_h | param_l | csum_h  | csum_l  | 0xEF |
//! +------+------+------+--------+----------+---------+---------+---------+---------+------+
//! ```
//!
//! The checksum is the 16-bit two's complement of the sum of bytes 1..=6.

use crate::error::DecodeError;
use crate::opcode::Opcode;

pub const FRAME_LEN: usize = 10;
pub const START_BYTE: u8 = 0x7E;
pub const VERSION: u8 = 0xFF;
pub const PAYLOAD_LEN: u8 = 0x06;
pub const END_BYTE: u8 = 0xEF;

const INDEX_VERSION: usize = 1;
const INDEX_LEN: usize = 2;
const INDEX_CMD: usize = 3;
const INDEX_FEEDBACK: usize = 4;
const INDEX_PARAM_H: usize = 5;
const INDEX_PARAM_L: usize = 6;
const INDEX_CHECKSUM_H: usize = 7;
const INDEX_CHECKSUM_L: usize = 8;
const INDEX_END: usize = 9;

/// One command or response, independent of its wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    opcode: Opcode,
    feedback: bool,
    param: u16,
}

impl Command {
    /// A command that asks the module for an ACK.
    pub fn new(opcode: Opcode, param: u16) -> Self {
        Self {
            opcode,
            feedback: true,
            param,
        }
    }

    pub fn from_bytes(opcode: Opcode, param_h: u8, param_l: u8) -> Self {
        Self::new(opcode, u16::from_be_bytes([param_h, param_l]))
    }

    pub fn with_feedback(mut self, feedback: bool) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn feedback(&self) -> bool {
        self.feedback
    }

    pub fn param(&self) -> u16 {
        self.param
    }

    /// Parameter as (MSB, LSB).
    pub fn param_bytes(&self) -> (u8, u8) {
        let [h, l] = self.param.to_be_bytes();
        (h, l)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.opcode.name(), self.param)
    }
}

/// Checksum over the six bytes from version to parameter LSB.
pub fn checksum(payload: &[u8]) -> u16 {
    let sum = payload
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
    0u16.wrapping_sub(sum)
}

pub fn encode(command: &Command) -> [u8; FRAME_LEN] {
    let (param_h, param_l) = command.param_bytes();
    let mut frame = [
        START_BYTE,
        VERSION,
        PAYLOAD_LEN,
        command.opcode.code(),
        u8::from(command.feedback),
        param_h,
        param_l,
        0,
        0,
        END_BYTE,
    ];
    let [csum_h, csum_l] = checksum(&frame[INDEX_VERSION..=INDEX_PARAM_L]).to_be_bytes();
    frame[INDEX_CHECKSUM_H] = csum_h;
    frame[INDEX_CHECKSUM_L] = csum_l;
    frame
}

/// Decode the first frame in `bytes`. Trailing bytes are ignored.
pub fn decode(bytes: &[u8]) -> Result<Command, DecodeError> {
    if bytes.len() < FRAME_LEN {
        return Err(DecodeError::Truncated {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }
    let frame = &bytes[..FRAME_LEN];
    if frame[0] != START_BYTE {
        return Err(DecodeError::Malformed(format!(
            "start byte 0x{:02X}",
            frame[0]
        )));
    }
    if frame[INDEX_END] != END_BYTE {
        return Err(DecodeError::Malformed(format!(
            "end byte 0x{:02X}",
            frame[INDEX_END]
        )));
    }

    let expected = checksum(&frame[INDEX_VERSION..=INDEX_PARAM_L]);
    let actual = u16::from_be_bytes([frame[INDEX_CHECKSUM_H], frame[INDEX_CHECKSUM_L]]);
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }

    if frame[INDEX_VERSION] != VERSION || frame[INDEX_LEN] != PAYLOAD_LEN {
        return Err(DecodeError::Malformed(format!(
            "version 0x{:02X}, length 0x{:02X}",
            frame[INDEX_VERSION], frame[INDEX_LEN]
        )));
    }

    Ok(Command::from_bytes(
        Opcode::from(frame[INDEX_CMD]),
        frame[INDEX_PARAM_H],
        frame[INDEX_PARAM_L],
    )
    .with_feedback(frame[INDEX_FEEDBACK] != 0))
}

/// Space-separated upper-case hex, e.g. `7E FF 06`.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .chunks(1)
        .map(hex::encode_upper)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a received byte stream into frames.
///
/// Bytes before a start marker are dropped. A candidate that fails to decode
/// is reported and the reader resynchronises on the next start marker.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_LEN * 4),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// `None` when more data is needed.
    pub fn next_frame(&mut self) -> Option<Result<Command, DecodeError>> {
        match self.buffer.iter().position(|&b| b == START_BYTE) {
            Some(pos) => {
                self.buffer.drain(..pos);
            }
            None => {
                self.buffer.clear();
                return None;
            }
        }

        if self.buffer.len() < FRAME_LEN {
            return None;
        }

        match decode(&self.buffer) {
            Ok(command) => {
                self.buffer.drain(..FRAME_LEN);
                Some(Ok(command))
            }
            Err(e) => {
                self.buffer.drain(..1);
                Some(Err(e))
            }
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
