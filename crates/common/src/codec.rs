//! Video codec and negotiated stream profile enums.

use serde::{Deserialize, Serialize};

/// Video codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    H265,
    Vp8,
    Vp9,
    Mpeg4,
}

impl VideoCodec {
    /// Human-readable codec name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::H265 => "H.265/HEVC",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::Mpeg4 => "MPEG-4 Part 2",
        }
    }

    /// OMX component role suffix for this codec (`video_decoder.<role>`).
    pub fn omx_role(self) -> &'static str {
        match self {
            Self::H264 => "avc",
            Self::H265 => "hevc",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Mpeg4 => "mpeg4",
        }
    }
}

/// Stream profile negotiated with the client at initialization.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodecProfile {
    H264Baseline,
    H264Main,
    H264High,
    HevcMain,
    HevcMain10,
    Vp8,
    Vp9Profile0,
    Vp9Profile2,
    Mpeg4Simple,
}

impl VideoCodecProfile {
    pub fn codec(self) -> VideoCodec {
        match self {
            Self::H264Baseline | Self::H264Main | Self::H264High => VideoCodec::H264,
            Self::HevcMain | Self::HevcMain10 => VideoCodec::H265,
            Self::Vp8 => VideoCodec::Vp8,
            Self::Vp9Profile0 | Self::Vp9Profile2 => VideoCodec::Vp9,
            Self::Mpeg4Simple => VideoCodec::Mpeg4,
        }
    }

    /// Luma bit depth implied by the profile.
    pub fn bit_depth(self) -> u8 {
        match self {
            Self::HevcMain10 | Self::Vp9Profile2 => 10,
            _ => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_maps_to_codec() {
        assert_eq!(VideoCodecProfile::H264High.codec(), VideoCodec::H264);
        assert_eq!(VideoCodecProfile::HevcMain10.codec(), VideoCodec::H265);
        assert_eq!(VideoCodecProfile::Vp9Profile0.codec(), VideoCodec::Vp9);
    }

    #[test]
    fn ten_bit_profiles() {
        assert_eq!(VideoCodecProfile::HevcMain10.bit_depth(), 10);
        assert_eq!(VideoCodecProfile::Vp9Profile2.bit_depth(), 10);
        assert_eq!(VideoCodecProfile::H264Main.bit_depth(), 8);
    }

    #[test]
    fn codec_display() {
        assert_eq!(VideoCodec::H264.display_name(), "H.264/AVC");
        assert_eq!(VideoCodec::H264.omx_role(), "avc");
    }
}
