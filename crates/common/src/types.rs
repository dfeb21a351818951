//! Core types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame or surface size in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const VGA: Self = Self::new(640, 480);
    pub const HD: Self = Self::new(1280, 720);
    pub const FHD: Self = Self::new(1920, 1080);
    pub const UHD: Self = Self::new(3840, 2160);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether `other` fits inside this resolution in both dimensions.
    pub fn contains(self, other: Resolution) -> bool {
        other.width <= self.width && other.height <= self.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rational number, used for frame rates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FPS_30: Self = Self { num: 30, den: 1 };
    pub const FPS_60: Self = Self { num: 60, den: 1 };

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Frame rate rounded up to whole frames per second.
    pub fn ceil_fps(self) -> u32 {
        if self.den == 0 {
            0
        } else {
            self.num.div_ceil(self.den)
        }
    }
}

/// Client-assigned id of a bitstream buffer passed to `decode()`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BitstreamId(pub i32);

impl fmt::Display for BitstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bitstream#{}", self.0)
    }
}

/// Client-assigned id of a picture buffer (one per output texture).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PictureBufferId(pub i32);

impl fmt::Display for PictureBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "picture#{}", self.0)
    }
}

/// GL texture name owned by the client.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureId(pub u32);

/// Texture target the client must allocate picture textures for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureTarget {
    #[default]
    Texture2D,
    /// `GL_TEXTURE_EXTERNAL_OES`, sampled directly from an EGL image.
    External,
}

/// Pixel layout of decoded pictures.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Semi-planar 4:2:0, linear.
    #[default]
    Nv12,
    /// Semi-planar 4:2:0 in the MFC 64x32 macroblock tiling.
    Nv12Tiled,
    /// Semi-planar 4:2:0, 16 bits per component.
    P010,
    /// Planar 4:2:0.
    I420,
}

impl PixelFormat {
    pub fn num_planes(self) -> usize {
        match self {
            Self::Nv12 | Self::Nv12Tiled | Self::P010 => 2,
            Self::I420 => 3,
        }
    }
}
