//! Typed parameter values carried in the two parameter bytes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Equalizer {
    #[default]
    Normal,
    Pop,
    Rock,
    Jazz,
    Classic,
    Bass,
}

impl Equalizer {
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 0,
            Self::Pop => 1,
            Self::Rock => 2,
            Self::Jazz => 3,
            Self::Classic => 4,
            Self::Bass => 5,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::Normal,
            1 => Self::Pop,
            2 => Self::Rock,
            3 => Self::Jazz,
            4 => Self::Classic,
            5 => Self::Bass,
            _ => return None,
        })
    }
}

impl std::str::FromStr for Equalizer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "normal" => Self::Normal,
            "pop" => Self::Pop,
            "rock" => Self::Rock,
            "jazz" => Self::Jazz,
            "classic" => Self::Classic,
            "bass" | "base" => Self::Bass,
            other => return Err(format!("unknown equalizer preset: {other}")),
        })
    }
}

/// Storage devices, as bits in the storage-online parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackSource {
    UsbFlash,
    SdCard,
    UsbHost,
}

impl PlaybackSource {
    pub fn mask(self) -> u16 {
        match self {
            Self::UsbFlash => 0b001,
            Self::SdCard => 0b010,
            Self::UsbHost => 0b100,
        }
    }

    /// Sources flagged in a storage-online (0x3F) parameter.
    pub fn online(param: u16) -> Vec<Self> {
        [Self::UsbFlash, Self::SdCard, Self::UsbHost]
            .into_iter()
            .filter(|s| param & s.mask() != 0)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
    Other(u16),
}

impl From<u16> for PlaybackStatus {
    fn from(param: u16) -> Self {
        // The high byte carries the active source; the state is in the low byte.
        match param & 0x00FF {
            0 => Self::Stopped,
            1 => Self::Playing,
            2 => Self::Paused,
            _ => Self::Other(param),
        }
    }
}

/// Error code reported in an 0x40 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleError {
    Busy,
    Sleeping,
    SerialRx,
    Checksum,
    TrackOutOfScope,
    TrackNotFound,
    Insertion,
    EnteringSleep,
    Unknown(u8),
}

impl From<u16> for ModuleError {
    fn from(param: u16) -> Self {
        match (param & 0x00FF) as u8 {
            1 => Self::Busy,
            2 => Self::Sleeping,
            3 => Self::SerialRx,
            4 => Self::Checksum,
            5 => Self::TrackOutOfScope,
            6 => Self::TrackNotFound,
            7 => Self::Insertion,
            8 => Self::EnteringSleep,
            code => Self::Unknown(code),
        }
    }
}

impl std::fmt::Display for ModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "module busy"),
            Self::Sleeping => write!(f, "module sleeping"),
            Self::SerialRx => write!(f, "serial receive error"),
            Self::Checksum => write!(f, "checksum error"),
            Self::TrackOutOfScope => write!(f, "track out of scope"),
            Self::TrackNotFound => write!(f, "track not found"),
            Self::Insertion => write!(f, "insertion error"),
            Self::EnteringSleep => write!(f, "entering sleep"),
            Self::Unknown(code) => write!(f, "unknown error (0x{code:02X})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equalizer_names_parse_case_insensitively() {
        assert_eq!("Rock".parse::<Equalizer>(), Ok(Equalizer::Rock));
        assert_eq!("base".parse::<Equalizer>(), Ok(Equalizer::Bass));
        assert!("disco".parse::<Equalizer>().is_err());
    }

    #[test]
    fn equalizer_codes() {
        assert_eq!(Equalizer::Classic.code(), 4);
        assert_eq!(Equalizer::from_code(5), Some(Equalizer::Bass));
        assert_eq!(Equalizer::from_code(6), None);
    }

    #[test]
    fn storage_online_bits() {
        assert_eq!(PlaybackSource::online(0x0002), vec![PlaybackSource::SdCard]);
        assert_eq!(
            PlaybackSource::online(0x0003),
            vec![PlaybackSource::UsbFlash, PlaybackSource::SdCard]
        );
        assert!(PlaybackSource::online(0).is_empty());
    }

    #[test]
    fn status_ignores_source_byte() {
        assert_eq!(PlaybackStatus::from(0x0201), PlaybackStatus::Playing);
        assert_eq!(PlaybackStatus::from(0x0200), PlaybackStatus::Stopped);
    }

    #[test]
    fn module_error_codes() {
        assert_eq!(ModuleError::from(6), ModuleError::TrackNotFound);
        assert_eq!(ModuleError::from(0x20), ModuleError::Unknown(0x20));
        assert_eq!(ModuleError::Busy.to_string(), "module busy");
    }
}
