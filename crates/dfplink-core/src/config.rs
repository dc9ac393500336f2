use dfplink_decode::Equalizer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::capability::{Capabilities, Revision};
use crate::error::{Error, Result};
use crate::serial_link::LinkConfig;

pub const VOLUME_MAX: u8 = 30;

/// What to do with an ad-hoc command while a track sequence owns the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait for the sequence to release the link between tracks.
    #[default]
    Queue,
    /// Fail with `Error::Busy`.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub link: LinkConfig,
    pub revision: Revision,
    /// Ask the module to ACK every command.
    pub feedback: bool,
    pub response_timeout_ms: u64,
    /// Fallback when no track-finished notification arrives.
    pub track_end_timeout_ms: u64,
    pub reset_settle_ms: u64,
    pub busy_policy: BusyPolicy,
    /// Applied after a reset.
    pub volume: Option<u8>,
    pub eq: Option<Equalizer>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            revision: Revision::Standard,
            feedback: true,
            response_timeout_ms: 1000,
            track_end_timeout_ms: 300_000,
            reset_settle_ms: 2000,
            busy_policy: BusyPolicy::Queue,
            volume: None,
            eq: None,
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Check ranges and resolve the revision into its capability set.
    pub fn validate(&self) -> Result<Capabilities> {
        if self.response_timeout_ms == 0 {
            return Err(Error::Config("response_timeout_ms must be positive".into()));
        }
        if self.track_end_timeout_ms == 0 {
            return Err(Error::Config("track_end_timeout_ms must be positive".into()));
        }
        if let Some(volume) = self.volume {
            if volume > VOLUME_MAX {
                return Err(Error::Config(format!(
                    "volume {volume} above {VOLUME_MAX}"
                )));
            }
        }
        Ok(Capabilities::for_revision(self.revision))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn track_end_timeout(&self) -> Duration {
        Duration::from_millis(self.track_end_timeout_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }
}
