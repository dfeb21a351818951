//! OMX-IL component abstraction.
//!
//! The hardware decoder is driven through an OpenMAX IL style component: a
//! handle opened by name, two ports (bitstream in, decoded picture out),
//! asynchronous commands acknowledged through events, and buffers whose
//! ownership moves between the client and the component.
//!
//! Instead of C callbacks receiving an opaque `this` pointer, the component
//! is given a typed [`EventCallback`] closure when it is opened. Events may be
//! raised on any thread; the decoder forwards them onto its own command thread.

use std::fmt;
use std::sync::Arc;

use vda_common::{DecodedVideoFrame, OmxError, PixelFormat, Resolution};

// ---------------------------------------------------------------------------
// States, ports, commands
// ---------------------------------------------------------------------------

/// Component state (`OMX_STATETYPE`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OmxState {
    Loaded,
    Idle,
    Executing,
    Pause,
    WaitForResources,
    Invalid,
}

/// Component port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Port {
    /// Encoded bitstream in.
    Input,
    /// Decoded pictures out.
    Output,
}

impl Port {
    pub fn index(self) -> usize {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }
}

/// Asynchronous component command (`OMX_SendCommand`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OmxCommand {
    StateSet(OmxState),
    Flush(Port),
    PortDisable(Port),
    PortEnable(Port),
}

impl OmxCommand {
    /// Port the command targets, if any.
    pub fn port(self) -> Option<Port> {
        match self {
            Self::StateSet(_) => None,
            Self::Flush(p) | Self::PortDisable(p) | Self::PortEnable(p) => Some(p),
        }
    }
}

impl fmt::Display for OmxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateSet(s) => write!(f, "StateSet({s:?})"),
            Self::Flush(p) => write!(f, "Flush({p:?})"),
            Self::PortDisable(p) => write!(f, "PortDisable({p:?})"),
            Self::PortEnable(p) => write!(f, "PortEnable({p:?})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

/// Opaque handle of a buffer allocated by the component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Flags attached to an input buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferFlags {
    pub end_of_stream: bool,
}

/// Port configuration (`OMX_PARAM_PORTDEFINITIONTYPE`, reduced).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortDefinition {
    pub buffer_count: usize,
    pub buffer_size: usize,
    pub frame_size: Resolution,
    pub format: PixelFormat,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Asynchronous notification raised by the component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OmxEvent {
    /// A command sent with `send_command` finished.
    CommandComplete(OmxCommand),
    /// The component is done reading an input buffer.
    EmptyBufferDone(BufferHandle),
    /// The component returned the output buffer. `frame` is `None` when the
    /// buffer comes back empty (port flush, transition to Idle).
    FillBufferDone {
        handle: BufferHandle,
        frame: Option<DecodedVideoFrame>,
    },
    /// Component-level fault.
    Error(OmxError),
}

/// Event callback registered when the component is opened.
pub type EventCallback = Arc<dyn Fn(OmxEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// Component / core traits
// ---------------------------------------------------------------------------

/// An opened component handle. Dropping it frees the handle.
pub trait OmxComponent: Send {
    fn name(&self) -> &str;

    /// Select the component role, e.g. `video_decoder.avc`.
    fn set_role(&mut self, role: &str) -> Result<(), OmxError>;

    fn set_port_definition(&mut self, port: Port, definition: &PortDefinition)
        -> Result<(), OmxError>;

    /// Issue an asynchronous command; completion arrives as
    /// [`OmxEvent::CommandComplete`].
    fn send_command(&mut self, command: OmxCommand) -> Result<(), OmxError>;

    fn allocate_buffer(&mut self, port: Port, size: usize) -> Result<BufferHandle, OmxError>;

    fn free_buffer(&mut self, port: Port, handle: BufferHandle) -> Result<(), OmxError>;

    /// Hand an input buffer holding `payload` to the component.
    fn empty_this_buffer(
        &mut self,
        handle: BufferHandle,
        payload: &[u8],
        timestamp: i64,
        flags: BufferFlags,
    ) -> Result<(), OmxError>;

    /// Hand the output buffer to the component to be filled.
    fn fill_this_buffer(&mut self, handle: BufferHandle) -> Result<(), OmxError>;
}

/// Entry point of the OMX implementation (`OMX_GetHandle`).
pub trait OmxCore: Send + Sync {
    fn open(
        &self,
        component_name: &str,
        callback: EventCallback,
    ) -> Result<Box<dyn OmxComponent>, OmxError>;
}

/// Map a component result onto the command name for logging.
pub fn check_omx_result<T>(result: Result<T, OmxError>, operation: &str) -> Result<T, OmxError> {
    result.map_err(|e| match e {
        OmxError::CommandRejected { reason, .. } => OmxError::CommandRejected {
            command: operation.to_string(),
            reason,
        },
        other => other,
    })
}
