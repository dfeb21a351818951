//! `vda-decoder` - Hardware video decode accelerator on top of an OMX-IL
//! component.
//!
//! An [`OmxVideoDecodeAccelerator`] acquires a decoder unit from the
//! [`ResourceManager`](vda_resource::ResourceManager), drives the component
//! through its state machine, feeds it client bitstream chunks and writes
//! every decoded picture into a client-provided texture.
//!
//! ```text
//!   client ──decode/flush/reset──► decoder thread ──EmptyThisBuffer──► OMX
//!     ▲                                 │  ▲                              │
//!     │                          Deliver│  │OutputReleased     callbacks │
//!     │                                 ▼  │                              │
//!     └──────PictureReady──────── output thread ◄──────────────────────────┘
//! ```
//!
//! Hardware differences between the generic and the MFC decoder live behind
//! [`HardwareVariant`].
//!
//! ## Module Overview
//!
//! - [`accelerator`] - client façade and preemption listener
//! - [`event`] - client notifications
//! - [`omx`] - the component interface the decoder drives
//! - [`output`] - picture records and the rotating hardware output buffer
//! - [`sim`] - simulated OMX hardware and a recording surface
//! - [`state`] - decoder state machine and counters
//! - [`surface`] - texture binding and fences
//! - [`variant`] - per-hardware parameters

pub mod accelerator;
pub mod event;
pub(crate) mod input;
pub mod omx;
pub mod output;
pub(crate) mod output_thread;
pub(crate) mod session;
pub mod sim;
pub mod state;
pub mod surface;
pub mod variant;
pub(crate) mod worker;

pub use accelerator::OmxVideoDecodeAccelerator;
pub use event::{EventReceiver, VdaClient, VdaEvent};
pub use omx::{
    BufferFlags, BufferHandle, EventCallback, OmxCommand, OmxComponent, OmxCore, OmxEvent,
    OmxState, Port, PortDefinition,
};
pub use output::RecordCensus;
pub use state::{DecoderState, DecoderStats};
pub use surface::{EglImage, SurfaceBinder, SurfaceError, SyncFence};
pub use variant::{variant_for, GenericVariant, HardwareVariant, MfcVariant, MFC_FLUSH_PTS_OFFSET};
