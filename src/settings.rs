use serde::{Deserialize, Serialize};

/// Destination port for the RGB/transport broadcast datagrams.
pub const UDP_PORT: u16 = 8221;

/// Payload cap per datagram, seven 188-byte transport packets.
pub const UDP_CHUNK_SIZE: usize = 1316;

/// Resolutions offered by a controlling UI. Free-form values within the
/// validation bounds are accepted too.
pub const PRESET_RESOLUTIONS: &[(u32, u32)] = &[
    (640, 360),
    (854, 480),
    (1280, 720),
    (1600, 900),
    (1920, 1080),
    (2560, 1440),
    (3440, 1440),
    (3840, 2160),
];

pub const PRESET_FPS: &[u32] = &[15, 30, 45, 60, 90, 120, 144, 165];

const MAX_DIMENSION: u32 = 9999;
const MAX_FPS: u32 = 300;

/// Capture targets below this are treated as misconfiguration.
const MIN_CAPTURE_DIMENSION: u32 = 100;

/// Sanity clamp for the capture target: dimensions under 100 fall back to
/// the default frame size instead of producing a sliver of a desktop.
pub fn clamp_capture_target(width: u32, height: u32) -> (u32, u32) {
    let default = StreamSettings::default();
    let w = if width < MIN_CAPTURE_DIMENSION {
        default.width
    } else {
        width
    };
    let h = if height < MIN_CAPTURE_DIMENSION {
        default.height
    } else {
        height
    };
    (w, h)
}

/// Which producer feeds the pipeline. The two modes are mutually
/// exclusive; switching tears the active one down first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// External encoder feeds compressed video over the byte transport.
    Piped,
    /// Capture the local desktop via display duplication.
    Capture,
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineMode::Piped => write!(f, "piped"),
            PipelineMode::Capture => write!(f, "capture"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub mode: PipelineMode,
}

impl StreamSettings {
    pub fn new(width: u32, height: u32, fps: u32, mode: PipelineMode) -> anyhow::Result<Self> {
        let settings = Self {
            width,
            height,
            fps,
            mode,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.width > MAX_DIMENSION {
            anyhow::bail!("width {} out of range 1..={}", self.width, MAX_DIMENSION);
        }
        if self.height == 0 || self.height > MAX_DIMENSION {
            anyhow::bail!("height {} out of range 1..={}", self.height, MAX_DIMENSION);
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            anyhow::bail!("fps {} out of range 1..={}", self.fps, MAX_FPS);
        }
        Ok(())
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            mode: PipelineMode::Piped,
        }
    }
}

/// Independent output switches, snapshotted by the hot loops once per
/// iteration. Both off leaves the pipeline draining but emitting nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Toggles {
    pub preview: bool,
    pub broadcast: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bounds() {
        assert!(StreamSettings::new(1280, 720, 60, PipelineMode::Piped).is_ok());
        assert!(StreamSettings::new(1, 1, 1, PipelineMode::Capture).is_ok());
        assert!(StreamSettings::new(9999, 9999, 300, PipelineMode::Piped).is_ok());

        assert!(StreamSettings::new(0, 720, 60, PipelineMode::Piped).is_err());
        assert!(StreamSettings::new(10000, 720, 60, PipelineMode::Piped).is_err());
        assert!(StreamSettings::new(1280, 0, 60, PipelineMode::Piped).is_err());
        assert!(StreamSettings::new(1280, 10000, 60, PipelineMode::Piped).is_err());
        assert!(StreamSettings::new(1280, 720, 0, PipelineMode::Piped).is_err());
        assert!(StreamSettings::new(1280, 720, 301, PipelineMode::Piped).is_err());
    }

    #[test]
    fn test_capture_target_clamps_tiny_dimensions() {
        assert_eq!(clamp_capture_target(1, 1), (1280, 720));
        assert_eq!(clamp_capture_target(99, 1080), (1280, 1080));
        assert_eq!(clamp_capture_target(1920, 99), (1920, 720));
        assert_eq!(clamp_capture_target(100, 100), (100, 100));
        assert_eq!(clamp_capture_target(1920, 1080), (1920, 1080));
    }

    #[test]
    fn test_settings_json_round_trip() {
        let settings = StreamSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"piped\""));
        let back: StreamSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
