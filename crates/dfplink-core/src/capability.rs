//! Firmware revision quirks, resolved once into a capability set.

use dfplink_decode::Opcode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Revision {
    /// YX5200 / YX5300 / FN-M16P.
    #[default]
    Standard,
    /// Clone boards that ignore 0x16 and never answer mode or folder queries.
    Legacy,
}

impl std::str::FromStr for Revision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown player revision: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const STOP: Self = Self(1 << 0);
    pub const MODE_QUERY: Self = Self(1 << 1);
    pub const FOLDER_QUERY: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);
    pub const NONE: Self = Self(0);

    pub fn for_revision(revision: Revision) -> Self {
        match revision {
            Revision::Standard => Self::ALL,
            Revision::Legacy => Self::NONE,
        }
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn supports(self, opcode: Opcode) -> bool {
        match opcode {
            Opcode::Stop => self.contains(Self::STOP),
            Opcode::QueryMode => self.contains(Self::MODE_QUERY),
            Opcode::QueryFolderFiles | Opcode::QueryFolders => self.contains(Self::FOLDER_QUERY),
            // Device-to-host codes are never sent.
            op if op.is_notification() || op.is_track_finished() => false,
            Opcode::Unknown(_) => false,
            _ => true,
        }
    }

    /// Opcode that halts playback on this revision.
    pub fn stop_opcode(self) -> Opcode {
        if self.contains(Self::STOP) {
            Opcode::Stop
        } else {
            Opcode::Pause
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_supports_everything_sendable() {
        let caps = Capabilities::for_revision(Revision::Standard);
        assert!(caps.supports(Opcode::Stop));
        assert!(caps.supports(Opcode::QueryFolders));
        assert!(caps.supports(Opcode::PlayTrack));
        assert!(!caps.supports(Opcode::Ack));
        assert!(!caps.supports(Opcode::Unknown(0x30)));
        assert_eq!(caps.stop_opcode(), Opcode::Stop);
    }

    #[test]
    fn legacy_stops_with_pause() {
        let caps = Capabilities::for_revision(Revision::Legacy);
        assert!(!caps.supports(Opcode::Stop));
        assert!(!caps.supports(Opcode::QueryMode));
        assert!(caps.supports(Opcode::Pause));
        assert!(caps.supports(Opcode::QuerySdFiles));
        assert_eq!(caps.stop_opcode(), Opcode::Pause);
    }

    #[test]
    fn capability_masks() {
        assert!(Capabilities::ALL.contains(Capabilities::STOP));
        assert!(Capabilities::ALL.contains(Capabilities::FOLDER_QUERY));
        assert!(!Capabilities::NONE.contains(Capabilities::MODE_QUERY));
        assert!(Capabilities::NONE.contains(Capabilities::NONE));
    }

    #[test]
    fn revision_from_str() {
        assert_eq!("Legacy".parse::<Revision>(), Ok(Revision::Legacy));
        assert!("mk3".parse::<Revision>().is_err());
    }
}
