//! Hardware variants.
//!
//! The state machine is shared; what differs between OMX implementations is
//! captured here: pool sizes, the output pixel layout, and the timestamp the
//! end-of-stream marker is stamped with.

use std::fmt::Debug;
use std::sync::Arc;

use vda_common::{
    PixelFormat, Resolution, TextureTarget, VariantKind, VideoCodec, VideoCodecProfile,
};

/// The MFC firmware drops an end-of-stream buffer whose timestamp lies too
/// close to the last frame's. Stamping the marker this far (µs) ahead of the
/// newest timestamp makes it emit the final frames.
pub const MFC_FLUSH_PTS_OFFSET: i64 = 100_000;

pub trait HardwareVariant: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Number of input (bitstream) buffers allocated on the component.
    fn input_frame_buffers_count(&self) -> usize;

    /// Capacity of one input buffer for a stream of `coded_size`.
    fn input_buffer_size(&self, coded_size: Resolution) -> usize;

    /// Records requested from the client on every grow.
    fn output_record_count(&self) -> usize;

    fn output_format(&self) -> PixelFormat;

    fn texture_target(&self) -> TextureTarget;

    /// Offset added to the newest hardware timestamp to stamp the flush marker.
    fn flush_marker_pts_offset(&self) -> i64 {
        1
    }

    /// OMX role string for `codec`.
    fn component_role(&self, codec: VideoCodec) -> String {
        format!("video_decoder.{}", codec.omx_role())
    }

    fn supports(&self, profile: VideoCodecProfile) -> bool;
}

/// Build the variant selected in configuration.
pub fn variant_for(kind: VariantKind) -> Arc<dyn HardwareVariant> {
    match kind {
        VariantKind::Generic => Arc::new(GenericVariant),
        VariantKind::Mfc => Arc::new(MfcVariant),
    }
}

// ---------------------------------------------------------------------------
// Generic OMX
// ---------------------------------------------------------------------------

/// Plain OMX decoder writing linear NV12.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericVariant;

impl HardwareVariant for GenericVariant {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn input_frame_buffers_count(&self) -> usize {
        4
    }

    fn input_buffer_size(&self, coded_size: Resolution) -> usize {
        // Half an uncompressed 4:2:0 frame, with a floor for tiny streams.
        let raw = coded_size.area() as usize * 3 / 2;
        (raw / 2).max(512 * 1024)
    }

    fn output_record_count(&self) -> usize {
        4
    }

    fn output_format(&self) -> PixelFormat {
        PixelFormat::Nv12
    }

    fn texture_target(&self) -> TextureTarget {
        TextureTarget::Texture2D
    }

    fn supports(&self, _profile: VideoCodecProfile) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Samsung MFC
// ---------------------------------------------------------------------------

/// Samsung Multi Format Codec. Outputs tiled NV12 that is only sampleable
/// through an external texture, and needs the flush marker workaround.
#[derive(Debug, Default, Clone, Copy)]
pub struct MfcVariant;

impl HardwareVariant for MfcVariant {
    fn name(&self) -> &'static str {
        "mfc"
    }

    fn input_frame_buffers_count(&self) -> usize {
        8
    }

    fn input_buffer_size(&self, coded_size: Resolution) -> usize {
        if coded_size.area() > Resolution::FHD.area() {
            4 * 1024 * 1024
        } else {
            2 * 1024 * 1024
        }
    }

    fn output_record_count(&self) -> usize {
        5
    }

    fn output_format(&self) -> PixelFormat {
        PixelFormat::Nv12Tiled
    }

    fn texture_target(&self) -> TextureTarget {
        TextureTarget::External
    }

    fn flush_marker_pts_offset(&self) -> i64 {
        MFC_FLUSH_PTS_OFFSET
    }

    fn supports(&self, profile: VideoCodecProfile) -> bool {
        profile.bit_depth() == 8
    }
}
