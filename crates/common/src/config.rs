//! Configuration structs for decode sessions and the accelerator runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodecProfile;
use crate::types::{Rational, Resolution};

/// Stream parameters negotiated with the client, passed to `initialize()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub profile: VideoCodecProfile,
    /// Largest coded size the stream is expected to reach. Used for the
    /// resource request and for sizing input buffers.
    pub coded_size: Resolution,
    pub framerate: Rational,
}

impl DecoderConfig {
    pub fn new(profile: VideoCodecProfile, coded_size: Resolution) -> Self {
        Self {
            profile,
            coded_size,
            framerate: Rational::FPS_30,
        }
    }
}

/// Which hardware specialization drives the component.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    /// Plain OMX-IL behavior, linear NV12 output.
    Generic,
    /// Samsung MFC: tiled output and the flush-marker timestamp workaround.
    #[default]
    Mfc,
}

/// Runtime tunables of the accelerator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    pub variant: VariantKind,
    /// Upper bound on each hardware acknowledgment during teardown before the
    /// phase is forced.
    pub teardown_timeout_ms: u64,
    /// Upper bound on waiting for a client fence before overwriting a texture.
    pub fence_timeout_ms: u64,
    /// Records requested on top of the variant minimum at every grow.
    pub extra_picture_buffers: u32,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            variant: VariantKind::default(),
            teardown_timeout_ms: 2000,
            fence_timeout_ms: 500,
            extra_picture_buffers: 0,
        }
    }
}

impl AcceleratorConfig {
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerator_config_defaults_fill_missing_fields() {
        let cfg: AcceleratorConfig = serde_json::from_str(r#"{"variant":"generic"}"#).unwrap();
        assert_eq!(cfg.variant, VariantKind::Generic);
        assert_eq!(cfg.teardown_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.extra_picture_buffers, 0);
    }

    #[test]
    fn decoder_config_json_round_trip() {
        let cfg = DecoderConfig::new(VideoCodecProfile::H264Main, Resolution::FHD);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: DecoderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
