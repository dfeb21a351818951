//! Recording surface binder.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::trace;

use vda_common::{DecodedVideoFrame, GeometryDescriptor, Resolution, TextureId};

use crate::surface::{EglImage, SurfaceBinder, SurfaceError};

/// One frame written into a bound image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SurfaceWrite {
    pub texture: TextureId,
    pub timestamp: i64,
    pub size: Resolution,
}

#[derive(Default)]
struct Inner {
    next_image: u64,
    bound: HashMap<EglImage, (TextureId, GeometryDescriptor)>,
    writes: Vec<SurfaceWrite>,
    unbound: Vec<TextureId>,
    fail_bind: bool,
}

/// [`SurfaceBinder`] that keeps images in memory and records every write.
#[derive(Default)]
pub struct RecordingSurface {
    inner: Mutex<Inner>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `bind` fail.
    pub fn set_fail_bind(&self, fail: bool) {
        self.inner.lock().fail_bind = fail;
    }

    pub fn bound_count(&self) -> usize {
        self.inner.lock().bound.len()
    }

    pub fn writes(&self) -> Vec<SurfaceWrite> {
        self.inner.lock().writes.clone()
    }

    /// Textures whose images were released, in release order.
    pub fn unbound_textures(&self) -> Vec<TextureId> {
        self.inner.lock().unbound.clone()
    }
}

impl SurfaceBinder for RecordingSurface {
    fn bind(
        &self,
        texture: TextureId,
        geometry: &GeometryDescriptor,
    ) -> Result<EglImage, SurfaceError> {
        let mut inner = self.inner.lock();
        if inner.fail_bind {
            return Err(SurfaceError::BindFailed {
                texture,
                reason: "binding disabled".to_string(),
            });
        }
        inner.next_image += 1;
        let image = EglImage(inner.next_image);
        inner.bound.insert(image, (texture, *geometry));
        trace!(?image, ?texture, %geometry, "Image bound");
        Ok(image)
    }

    fn unbind(&self, image: EglImage) {
        let mut inner = self.inner.lock();
        if let Some((texture, _)) = inner.bound.remove(&image) {
            inner.unbound.push(texture);
        }
    }

    fn write_frame(&self, image: EglImage, frame: &DecodedVideoFrame) -> Result<(), SurfaceError> {
        let mut inner = self.inner.lock();
        let Some((texture, bound)) = inner.bound.get(&image).copied() else {
            return Err(SurfaceError::WriteFailed {
                image,
                reason: "image is not bound".to_string(),
            });
        };
        let Some(geometry) = frame.geometry else {
            return Err(SurfaceError::WriteFailed {
                image,
                reason: "frame has no picture".to_string(),
            });
        };
        if geometry.format != bound.format || !bound.size.contains(geometry.size) {
            return Err(SurfaceError::GeometryMismatch {
                frame: geometry,
                image: bound,
            });
        }
        inner.writes.push(SurfaceWrite {
            texture,
            timestamp: frame.timestamp,
            size: geometry.size,
        });
        Ok(())
    }
}
