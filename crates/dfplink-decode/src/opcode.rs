/// Command byte of a DFPlayer frame.
///
/// Covers the published command set of the DFPlayer Mini / FN-M16P. Codes
/// outside the table are kept as `Unknown` so any received byte round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Next,
    Previous,
    /// Play track by root index, 1-2999.
    PlayTrack,
    VolumeUp,
    VolumeDown,
    /// Set volume, 0-30.
    SetVolume,
    SetEq,
    LoopTrack,
    SetSource,
    Standby,
    Normal,
    Reset,
    /// Start or resume playback.
    Play,
    Pause,
    /// MSB: folder 1-99, LSB: track 1-255.
    PlayFolderTrack,
    /// MSB: enable, LSB: gain 0-31.
    AmplifierGain,
    LoopAll,
    PlayMp3FolderTrack,
    Advert,
    PlayLargeFolderTrack,
    StopAdvert,
    Stop,
    LoopFolder,
    Random,
    LoopCurrent,
    SetDac,
    MediaInserted,
    MediaRemoved,
    FinishedUsbFlash,
    FinishedSd,
    FinishedUsbHost,
    /// Storage online bitmap, sent after power-up or reset.
    StorageOnline,
    Error,
    Ack,
    QueryStatus,
    QueryVolume,
    QueryEq,
    QueryMode,
    QueryVersion,
    QueryUsbFiles,
    QuerySdFiles,
    QueryFlashFiles,
    QueryKeepOn,
    QueryUsbTrack,
    QuerySdTrack,
    QueryFlashTrack,
    QueryFolderFiles,
    QueryFolders,
    Unknown(u8),
}

impl Opcode {
    pub fn code(self) -> u8 {
        self.into()
    }

    /// Queries expect a response frame carrying the same opcode.
    pub fn is_query(self) -> bool {
        matches!(self.code(), 0x42..=0x4F)
    }

    /// Actions get no data back, only an ACK when feedback is requested.
    pub fn is_action(self) -> bool {
        matches!(self.code(), 0x01..=0x1A)
    }

    /// Device-to-host only.
    pub fn is_notification(self) -> bool {
        matches!(self.code(), 0x3A..=0x41)
    }

    pub fn is_track_finished(self) -> bool {
        matches!(
            self,
            Opcode::FinishedUsbFlash | Opcode::FinishedSd | Opcode::FinishedUsbHost
        )
    }

    /// Commands after which the module will eventually report a finished track.
    pub fn starts_playback(self) -> bool {
        matches!(
            self,
            Opcode::Next
                | Opcode::Previous
                | Opcode::PlayTrack
                | Opcode::LoopTrack
                | Opcode::Play
                | Opcode::PlayFolderTrack
                | Opcode::LoopAll
                | Opcode::PlayMp3FolderTrack
                | Opcode::PlayLargeFolderTrack
                | Opcode::LoopFolder
                | Opcode::Random
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Next => "next",
            Opcode::Previous => "previous",
            Opcode::PlayTrack => "track",
            Opcode::VolumeUp => "vol_inc",
            Opcode::VolumeDown => "vol_dec",
            Opcode::SetVolume => "vol_set",
            Opcode::SetEq => "eq_set",
            Opcode::LoopTrack => "loop_track",
            Opcode::SetSource => "source",
            Opcode::Standby => "standby",
            Opcode::Normal => "normal",
            Opcode::Reset => "reset",
            Opcode::Play => "play",
            Opcode::Pause => "pause",
            Opcode::PlayFolderTrack => "folder_track",
            Opcode::AmplifierGain => "amp_gain",
            Opcode::LoopAll => "loop_all",
            Opcode::PlayMp3FolderTrack => "mp3_track",
            Opcode::Advert => "advert",
            Opcode::PlayLargeFolderTrack => "large_folder_track",
            Opcode::StopAdvert => "stop_advert",
            Opcode::Stop => "stop",
            Opcode::LoopFolder => "loop_folder",
            Opcode::Random => "random",
            Opcode::LoopCurrent => "loop_current",
            Opcode::SetDac => "dac",
            Opcode::MediaInserted => "media_insert",
            Opcode::MediaRemoved => "media_remove",
            Opcode::FinishedUsbFlash => "usb_flash_fin",
            Opcode::FinishedSd => "sd_fin",
            Opcode::FinishedUsbHost => "usb_host_fin",
            Opcode::StorageOnline => "q_init",
            Opcode::Error => "error",
            Opcode::Ack => "ack",
            Opcode::QueryStatus => "q_status",
            Opcode::QueryVolume => "q_vol",
            Opcode::QueryEq => "q_eq",
            Opcode::QueryMode => "q_mode",
            Opcode::QueryVersion => "q_version",
            Opcode::QueryUsbFiles => "q_usb_files",
            Opcode::QuerySdFiles => "q_sd_files",
            Opcode::QueryFlashFiles => "q_flash_files",
            Opcode::QueryKeepOn => "q_keep_on",
            Opcode::QueryUsbTrack => "q_usb_trk",
            Opcode::QuerySdTrack => "q_sd_trk",
            Opcode::QueryFlashTrack => "q_flash_trk",
            Opcode::QueryFolderFiles => "q_folder_files",
            Opcode::QueryFolders => "q_folders",
            Opcode::Unknown(_) => "unknown",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

impl From<u8> for Opcode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Opcode::Next,
            0x02 => Opcode::Previous,
            0x03 => Opcode::PlayTrack,
            0x04 => Opcode::VolumeUp,
            0x05 => Opcode::VolumeDown,
            0x06 => Opcode::SetVolume,
            0x07 => Opcode::SetEq,
            0x08 => Opcode::LoopTrack,
            0x09 => Opcode::SetSource,
            0x0A => Opcode::Standby,
            0x0B => Opcode::Normal,
            0x0C => Opcode::Reset,
            0x0D => Opcode::Play,
            0x0E => Opcode::Pause,
            0x0F => Opcode::PlayFolderTrack,
            0x10 => Opcode::AmplifierGain,
            0x11 => Opcode::LoopAll,
            0x12 => Opcode::PlayMp3FolderTrack,
            0x13 => Opcode::Advert,
            0x14 => Opcode::PlayLargeFolderTrack,
            0x15 => Opcode::StopAdvert,
            0x16 => Opcode::Stop,
            0x17 => Opcode::LoopFolder,
            0x18 => Opcode::Random,
            0x19 => Opcode::LoopCurrent,
            0x1A => Opcode::SetDac,
            0x3A => Opcode::MediaInserted,
            0x3B => Opcode::MediaRemoved,
            0x3C => Opcode::FinishedUsbFlash,
            0x3D => Opcode::FinishedSd,
            0x3E => Opcode::FinishedUsbHost,
            0x3F => Opcode::StorageOnline,
            0x40 => Opcode::Error,
            0x41 => Opcode::Ack,
            0x42 => Opcode::QueryStatus,
            0x43 => Opcode::QueryVolume,
            0x44 => Opcode::QueryEq,
            0x45 => Opcode::QueryMode,
            0x46 => Opcode::QueryVersion,
            0x47 => Opcode::QueryUsbFiles,
            0x48 => Opcode::QuerySdFiles,
            0x49 => Opcode::QueryFlashFiles,
            0x4A => Opcode::QueryKeepOn,
            0x4B => Opcode::QueryUsbTrack,
            0x4C => Opcode::QuerySdTrack,
            0x4D => Opcode::QueryFlashTrack,
            0x4E => Opcode::QueryFolderFiles,
            0x4F => Opcode::QueryFolders,
            other => Opcode::Unknown(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        match op {
            Opcode::Next => 0x01,
            Opcode::Previous => 0x02,
            Opcode::PlayTrack => 0x03,
            Opcode::VolumeUp => 0x04,
            Opcode::VolumeDown => 0x05,
            Opcode::SetVolume => 0x06,
            Opcode::SetEq => 0x07,
            Opcode::LoopTrack => 0x08,
            Opcode::SetSource => 0x09,
            Opcode::Standby => 0x0A,
            Opcode::Normal => 0x0B,
            Opcode::Reset => 0x0C,
            Opcode::Play => 0x0D,
            Opcode::Pause => 0x0E,
            Opcode::PlayFolderTrack => 0x0F,
            Opcode::AmplifierGain => 0x10,
            Opcode::LoopAll => 0x11,
            Opcode::PlayMp3FolderTrack => 0x12,
            Opcode::Advert => 0x13,
            Opcode::PlayLargeFolderTrack => 0x14,
            Opcode::StopAdvert => 0x15,
            Opcode::Stop => 0x16,
            Opcode::LoopFolder => 0x17,
            Opcode::Random => 0x18,
            Opcode::LoopCurrent => 0x19,
            Opcode::SetDac => 0x1A,
            Opcode::MediaInserted => 0x3A,
            Opcode::MediaRemoved => 0x3B,
            Opcode::FinishedUsbFlash => 0x3C,
            Opcode::FinishedSd => 0x3D,
            Opcode::FinishedUsbHost => 0x3E,
            Opcode::StorageOnline => 0x3F,
            Opcode::Error => 0x40,
            Opcode::Ack => 0x41,
            Opcode::QueryStatus => 0x42,
            Opcode::QueryVolume => 0x43,
            Opcode::QueryEq => 0x44,
            Opcode::QueryMode => 0x45,
            Opcode::QueryVersion => 0x46,
            Opcode::QueryUsbFiles => 0x47,
            Opcode::QuerySdFiles => 0x48,
            Opcode::QueryFlashFiles => 0x49,
            Opcode::QueryKeepOn => 0x4A,
            Opcode::QueryUsbTrack => 0x4B,
            Opcode::QuerySdTrack => 0x4C,
            Opcode::QueryFlashTrack => 0x4D,
            Opcode::QueryFolderFiles => 0x4E,
            Opcode::QueryFolders => 0x4F,
            Opcode::Unknown(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_maps_back_to_itself() {
        for code in 0..=u8::MAX {
            assert_eq!(u8::from(Opcode::from(code)), code);
        }
    }

    #[test]
    fn unknown_codes_are_preserved() {
        assert_eq!(Opcode::from(0x20), Opcode::Unknown(0x20));
        assert_eq!(Opcode::from(0xFF), Opcode::Unknown(0xFF));
    }

    #[test]
    fn classification() {
        assert!(Opcode::PlayTrack.is_action());
        assert!(Opcode::PlayTrack.starts_playback());
        assert!(!Opcode::SetVolume.starts_playback());
        assert!(Opcode::QuerySdFiles.is_query());
        assert!(!Opcode::StorageOnline.is_query());
        assert!(Opcode::Ack.is_notification());
        assert!(Opcode::FinishedSd.is_track_finished());
        assert!(!Opcode::Unknown(0x30).is_action());
    }

    #[test]
    fn display_shows_name_and_code() {
        assert_eq!(Opcode::QueryVolume.to_string(), "q_vol (0x43)");
    }
}
