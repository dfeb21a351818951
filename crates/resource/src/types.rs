//! Resource request / grant value types.

use std::fmt;

use serde::{Deserialize, Serialize};

use vda_common::{DecoderConfig, Resolution, VideoCodec};

/// Platform-assigned resource id. Ids are recycled by the broker after release.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rsc#{}", self.0)
    }
}

/// Manager-assigned id of a registered client.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Kind of hardware unit being requested.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceCategory {
    VideoDecoder,
    Scaler,
}

/// Whether the unit may be shared with other clients.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExclusivityMode {
    #[default]
    Exclusive,
    Shared,
}

/// What the requested unit must be able to do.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityFingerprint {
    pub codec: Option<VideoCodec>,
    pub max_resolution: Resolution,
    /// Frames per second, rounded up.
    pub framerate: u32,
    pub bit_depth: u8,
}

/// One entry of an allocation batch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub category: ResourceCategory,
    pub capability: CapabilityFingerprint,
    pub mode: ExclusivityMode,
}

impl ResourceRequest {
    /// Exclusive video decoder request derived from the negotiated stream.
    pub fn video_decoder(config: &DecoderConfig) -> Self {
        Self {
            category: ResourceCategory::VideoDecoder,
            capability: CapabilityFingerprint {
                codec: Some(config.profile.codec()),
                max_resolution: config.coded_size,
                framerate: config.framerate.ceil_fps(),
                bit_depth: config.profile.bit_depth(),
            },
            mode: ExclusivityMode::Exclusive,
        }
    }

    /// Scaler request able to handle `max_resolution`.
    pub fn scaler(max_resolution: Resolution) -> Self {
        Self {
            category: ResourceCategory::Scaler,
            capability: CapabilityFingerprint {
                codec: None,
                max_resolution,
                framerate: 0,
                bit_depth: 8,
            },
            mode: ExclusivityMode::Exclusive,
        }
    }
}

/// A granted resource as seen by its owner.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AllocatedResource {
    pub id: ResourceId,
    pub category: ResourceCategory,
    /// Name of the hardware component backing this unit (e.g. an OMX
    /// component name).
    pub component_name: String,
    pub owner: ClientId,
}

/// Why the broker is reclaiming resources.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConflictType {
    /// Another client with higher priority needs the unit.
    Conflict,
    /// The user explicitly moved the unit to another application.
    UserRequested,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vda_common::{Rational, VideoCodecProfile};

    #[test]
    fn decoder_request_from_config() {
        let mut config = DecoderConfig::new(VideoCodecProfile::HevcMain10, Resolution::UHD);
        config.framerate = Rational { num: 60000, den: 1001 };
        let req = ResourceRequest::video_decoder(&config);
        assert_eq!(req.category, ResourceCategory::VideoDecoder);
        assert_eq!(req.capability.codec, Some(VideoCodec::H265));
        assert_eq!(req.capability.bit_depth, 10);
        assert_eq!(req.capability.framerate, 60);
        assert_eq!(req.mode, ExclusivityMode::Exclusive);
    }
}
