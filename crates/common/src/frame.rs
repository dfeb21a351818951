//! Data flowing through the accelerator: bitstream input, hardware output
//! snapshots, and client-visible pictures.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{GeometryDescriptor, PlaneLayout};
use crate::types::{BitstreamId, PictureBufferId, Resolution, TextureId};

// ---------------------------------------------------------------------------
// Bitstream input
// ---------------------------------------------------------------------------

/// Failure to map a client bitstream region into the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot map bitstream region: {0}")]
pub struct MapError(pub String);

/// Memory holding one encoded chunk (shared memory in a real embedder).
pub trait MappableRegion: Send + Sync {
    /// Map the region and return its bytes.
    fn map(&self) -> Result<&[u8], MapError>;
}

impl MappableRegion for Vec<u8> {
    fn map(&self) -> Result<&[u8], MapError> {
        Ok(self.as_slice())
    }
}

impl MappableRegion for Arc<[u8]> {
    fn map(&self) -> Result<&[u8], MapError> {
        Ok(self)
    }
}

/// A timestamped chunk of encoded bitstream submitted via `decode()`.
#[derive(Clone)]
pub struct BitstreamBuffer {
    pub id: BitstreamId,
    /// Client timestamp in microseconds, echoed back in `Picture::timestamp`.
    pub timestamp: i64,
    region: Arc<dyn MappableRegion>,
}

impl BitstreamBuffer {
    pub fn new(id: BitstreamId, timestamp: i64, region: impl MappableRegion + 'static) -> Self {
        Self {
            id,
            timestamp,
            region: Arc::new(region),
        }
    }

    /// Convenience constructor for an owned byte vector.
    pub fn from_bytes(id: i32, timestamp: i64, bytes: Vec<u8>) -> Self {
        Self::new(BitstreamId(id), timestamp, bytes)
    }

    pub fn map(&self) -> Result<&[u8], MapError> {
        self.region.map()
    }
}

impl fmt::Debug for BitstreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitstreamBuffer")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("size", &self.region.map().map(|b| b.len()).ok())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Hardware output snapshot
// ---------------------------------------------------------------------------

/// Flags attached to a fill-buffer completion.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags {
    /// Last frame before the end-of-stream (flush) marker.
    pub end_of_stream: bool,
    /// Whether the frame is meant to be displayed.
    pub show: bool,
}

/// Immutable snapshot of one fill-buffer completion of the rotating hardware
/// output buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedVideoFrame {
    /// Hardware timestamp (the surrogate stamped on the input buffer).
    pub timestamp: i64,
    /// Picture layout; `None` when the hardware produced no picture metadata.
    pub geometry: Option<GeometryDescriptor>,
    pub planes: Vec<PlaneLayout>,
    pub flags: FrameFlags,
}

impl DecodedVideoFrame {
    /// A frame that carries only the end-of-stream flag.
    pub fn end_of_stream(timestamp: i64) -> Self {
        Self {
            timestamp,
            geometry: None,
            planes: Vec::new(),
            flags: FrameFlags {
                end_of_stream: true,
                show: false,
            },
        }
    }

    /// Whether the frame can be delivered to the client at all.
    pub fn is_displayable(&self) -> bool {
        self.flags.show && self.geometry.is_some()
    }
}

// ---------------------------------------------------------------------------
// Client-visible pictures
// ---------------------------------------------------------------------------

/// A client texture handed to the decoder in `assign_picture_buffers()`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PictureBuffer {
    pub id: PictureBufferId,
    pub texture: TextureId,
    pub size: Resolution,
}

/// A decoded picture ready for display, delivered via `PictureReady`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Picture {
    pub picture_buffer_id: PictureBufferId,
    /// Bitstream buffer the picture was decoded from, when known.
    pub bitstream_id: Option<BitstreamId>,
    /// Client timestamp of that bitstream buffer.
    pub timestamp: i64,
    pub visible_size: Resolution,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unmappable;

    impl MappableRegion for Unmappable {
        fn map(&self) -> Result<&[u8], MapError> {
            Err(MapError("revoked".to_string()))
        }
    }

    #[test]
    fn bitstream_maps_owned_bytes() {
        let buf = BitstreamBuffer::from_bytes(7, 1000, vec![1, 2, 3]);
        assert_eq!(buf.map().unwrap(), &[1, 2, 3]);
        assert_eq!(buf.id, BitstreamId(7));
    }

    #[test]
    fn bitstream_map_failure_is_reported() {
        let buf = BitstreamBuffer::new(BitstreamId(1), 0, Unmappable);
        assert!(buf.map().is_err());
        assert!(format!("{buf:?}").contains("None"));
    }

    #[test]
    fn eos_frame_is_not_displayable() {
        let frame = DecodedVideoFrame::end_of_stream(42);
        assert!(frame.flags.end_of_stream);
        assert!(!frame.is_displayable());
    }
}
