//! Picture geometry fingerprint.
//!
//! A [`GeometryDescriptor`] describes the layout the hardware writes decoded
//! pictures in: coded resolution plus the stride of every plane. Two frames
//! with equal descriptors can share output records; any difference (a
//! resolution change, or a stride change at the same resolution) forces the
//! output record pool to be regrown.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PixelFormat, Resolution};

/// Upper bound on planes per picture (I420 has three).
pub const MAX_PLANES: usize = 3;

/// Address and stride of one plane inside the hardware output buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaneLayout {
    /// Hardware-visible address of the first byte of the plane.
    pub address: u64,
    /// Row pitch in bytes.
    pub stride: u32,
}

/// Structural fingerprint of a picture layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometryDescriptor {
    pub size: Resolution,
    pub format: PixelFormat,
    strides: [u32; MAX_PLANES],
}

impl GeometryDescriptor {
    /// Build a descriptor from explicit strides. Strides past the format's
    /// plane count are ignored so they never affect equality.
    pub fn new(size: Resolution, format: PixelFormat, strides: &[u32]) -> Self {
        let mut packed = [0u32; MAX_PLANES];
        for (slot, stride) in packed
            .iter_mut()
            .zip(strides.iter())
            .take(format.num_planes())
        {
            *slot = *stride;
        }
        Self {
            size,
            format,
            strides: packed,
        }
    }

    /// Descriptor for a tightly packed picture (stride == width per plane,
    /// chroma planes of I420 at half width).
    pub fn packed(size: Resolution, format: PixelFormat) -> Self {
        let luma = match format {
            PixelFormat::P010 => size.width * 2,
            _ => size.width,
        };
        let strides = match format {
            PixelFormat::I420 => [luma, luma / 2, luma / 2],
            _ => [luma, luma, 0],
        };
        Self::new(size, format, &strides)
    }

    pub fn num_planes(&self) -> usize {
        self.format.num_planes()
    }

    pub fn stride(&self, plane: usize) -> Option<u32> {
        (plane < self.num_planes()).then(|| self.strides[plane])
    }

    pub fn strides(&self) -> &[u32] {
        &self.strides[..self.num_planes()]
    }
}

impl fmt::Display for GeometryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} strides={:?}", self.size, self.format, self.strides())
    }
}
