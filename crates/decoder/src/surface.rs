//! Surface layer: binding client textures to images the decoder can write.
//!
//! Picture buffers are client textures. Each one is bound once into an
//! [`EglImage`] when its record is created, and every delivered frame is
//! written into that image. A client may return a picture together with a
//! [`SyncFence`] that must signal before the image is overwritten.

use std::time::Duration;

use thiserror::Error;

use vda_common::{DecodedVideoFrame, GeometryDescriptor, TextureId, VdaError};

/// Image bound to a client texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EglImage(pub u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("cannot bind texture {texture:?}: {reason}")]
    BindFailed { texture: TextureId, reason: String },

    #[error("write into image {image:?} failed: {reason}")]
    WriteFailed { image: EglImage, reason: String },

    #[error("frame geometry {frame} does not fit image geometry {image}")]
    GeometryMismatch {
        frame: GeometryDescriptor,
        image: GeometryDescriptor,
    },
}

impl From<SurfaceError> for VdaError {
    fn from(e: SurfaceError) -> Self {
        VdaError::PlatformFailure(e.to_string())
    }
}

pub trait SurfaceBinder: Send + Sync {
    /// Create an image for `texture` laid out as `geometry`.
    fn bind(&self, texture: TextureId, geometry: &GeometryDescriptor)
        -> Result<EglImage, SurfaceError>;

    fn unbind(&self, image: EglImage);

    /// Copy (or detile) the decoded frame into `image`.
    fn write_frame(&self, image: EglImage, frame: &DecodedVideoFrame) -> Result<(), SurfaceError>;
}

/// Client-supplied fence guarding a returned picture.
pub trait SyncFence: Send {
    /// Block until the fence signals. Returns `false` on timeout.
    fn wait(&self, timeout: Duration) -> bool;
}

/// A [`Waitable`](vda_resource::Waitable) doubles as a CPU-side fence.
impl SyncFence for vda_resource::Waitable {
    fn wait(&self, timeout: Duration) -> bool {
        self.wait_timeout(timeout)
    }
}
