//! `vda-common` - Shared types, errors, and configuration for the OMX video
//! decode accelerator.
//!
//! This crate is the foundation the resource manager and decoder crates
//! depend on. It defines:
//!
//! - **Codec**: `VideoCodec`, `VideoCodecProfile` (negotiated stream profile)
//! - **Types**: `Resolution`, `Rational`, id newtypes for bitstream buffers,
//!   picture buffers, and textures
//! - **Geometry**: `GeometryDescriptor` (resolution + per-plane strides, used as
//!   a change fingerprint)
//! - **Frames**: `BitstreamBuffer`, `DecodedVideoFrame`, `PictureBuffer`, `Picture`
//! - **Errors**: `VdaError`, `ErrorKind`, `OmxError` (thiserror-based)
//! - **Config**: `DecoderConfig`, `AcceleratorConfig`, `VariantKind`

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::{VideoCodec, VideoCodecProfile};
pub use config::{AcceleratorConfig, DecoderConfig, VariantKind};
pub use error::{ErrorKind, OmxError, VdaError, VdaResult};
pub use frame::{
    BitstreamBuffer, DecodedVideoFrame, FrameFlags, MapError, MappableRegion, Picture,
    PictureBuffer,
};
pub use geometry::{GeometryDescriptor, PlaneLayout, MAX_PLANES};
pub use types::{BitstreamId, PictureBufferId, PixelFormat, Rational, Resolution, TextureId, TextureTarget};
