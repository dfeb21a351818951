//! Simulated OMX core and component.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use vda_common::{
    DecodedVideoFrame, FrameFlags, GeometryDescriptor, OmxError, PixelFormat, PlaneLayout,
};

use super::{SimScript, SIM_FAULT_CODE};
use crate::omx::{
    BufferFlags, BufferHandle, EventCallback, OmxCommand, OmxComponent, OmxCore, OmxEvent,
    OmxState, Port, PortDefinition,
};

/// Base of the fake hardware address space frames are "decoded" into.
const SIM_FRAME_BASE: u64 = 0x1000_0000;

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

pub struct SimulatedCore {
    script: SimScript,
    opened: Mutex<Vec<String>>,
    live: Arc<AtomicUsize>,
}

impl SimulatedCore {
    pub fn new(script: SimScript) -> Self {
        Self {
            script,
            opened: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Names of every component opened so far.
    pub fn opened_components(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Components currently open (not yet dropped).
    pub fn live_components(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

impl OmxCore for SimulatedCore {
    fn open(
        &self,
        component_name: &str,
        callback: EventCallback,
    ) -> Result<Box<dyn OmxComponent>, OmxError> {
        if self.script.fail_open {
            return Err(OmxError::ComponentNotFound(component_name.to_string()));
        }
        let component = SimComponent::spawn(
            component_name,
            self.script.clone(),
            callback,
            self.live.clone(),
        )?;
        self.opened.lock().push(component_name.to_string());
        Ok(Box::new(component))
    }
}

// ---------------------------------------------------------------------------
// Component handle (caller side)
// ---------------------------------------------------------------------------

enum HwRequest {
    Configure(Port, PortDefinition),
    Command(OmxCommand),
    Empty {
        handle: BufferHandle,
        len: usize,
        timestamp: i64,
        flags: BufferFlags,
    },
    Fill(BufferHandle),
    Shutdown,
}

/// Handle to a simulated component. Calls are validated here and executed
/// asynchronously on the component's own thread.
pub struct SimComponent {
    name: String,
    tx: Sender<HwRequest>,
    thread: Option<JoinHandle<()>>,
    buffers: HashMap<BufferHandle, (Port, usize)>,
    next_handle: u64,
    role: Option<String>,
    live: Arc<AtomicUsize>,
}

impl SimComponent {
    fn spawn(
        name: &str,
        script: SimScript,
        callback: EventCallback,
        live: Arc<AtomicUsize>,
    ) -> Result<Self, OmxError> {
        let (tx, rx) = channel::unbounded();
        let hardware = SimHardware::new(script, callback);
        let thread = thread::Builder::new()
            .name("sim-omx".to_string())
            .spawn(move || hardware.run(rx))
            .map_err(|e| OmxError::InsufficientResources(format!("component thread: {e}")))?;
        live.fetch_add(1, Ordering::AcqRel);
        debug!(component = name, "Simulated component opened");
        Ok(Self {
            name: name.to_string(),
            tx,
            thread: Some(thread),
            buffers: HashMap::new(),
            next_handle: 1,
            role: None,
            live,
        })
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    fn request(&self, request: HwRequest) -> Result<(), OmxError> {
        self.tx.send(request).map_err(|_| OmxError::IncorrectState {
            operation: "request".to_string(),
            state: "component thread stopped".to_string(),
        })
    }

    fn buffer(&self, handle: BufferHandle, port: Port) -> Result<usize, OmxError> {
        match self.buffers.get(&handle) {
            Some((p, size)) if *p == port => Ok(*size),
            _ => Err(OmxError::UnknownBuffer(handle.0)),
        }
    }
}

impl OmxComponent for SimComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_role(&mut self, role: &str) -> Result<(), OmxError> {
        if !role.starts_with("video_decoder.") {
            return Err(OmxError::CommandRejected {
                command: "SetParameter(StandardComponentRole)".to_string(),
                reason: format!("unsupported role {role}"),
            });
        }
        self.role = Some(role.to_string());
        Ok(())
    }

    fn set_port_definition(
        &mut self,
        port: Port,
        definition: &PortDefinition,
    ) -> Result<(), OmxError> {
        if definition.buffer_count == 0 || definition.buffer_size == 0 {
            return Err(OmxError::CommandRejected {
                command: "SetParameter(PortDefinition)".to_string(),
                reason: "empty port".to_string(),
            });
        }
        self.request(HwRequest::Configure(port, *definition))
    }

    fn send_command(&mut self, command: OmxCommand) -> Result<(), OmxError> {
        self.request(HwRequest::Command(command))
    }

    fn allocate_buffer(&mut self, port: Port, size: usize) -> Result<BufferHandle, OmxError> {
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(handle, (port, size));
        trace!(?handle, ?port, size, "Simulated buffer allocated");
        Ok(handle)
    }

    fn free_buffer(&mut self, port: Port, handle: BufferHandle) -> Result<(), OmxError> {
        self.buffer(handle, port)?;
        self.buffers.remove(&handle);
        Ok(())
    }

    fn empty_this_buffer(
        &mut self,
        handle: BufferHandle,
        payload: &[u8],
        timestamp: i64,
        flags: BufferFlags,
    ) -> Result<(), OmxError> {
        let capacity = self.buffer(handle, Port::Input)?;
        if payload.len() > capacity {
            return Err(OmxError::InsufficientResources(format!(
                "{} bytes into a {capacity} byte buffer",
                payload.len()
            )));
        }
        self.request(HwRequest::Empty {
            handle,
            len: payload.len(),
            timestamp,
            flags,
        })
    }

    fn fill_this_buffer(&mut self, handle: BufferHandle) -> Result<(), OmxError> {
        self.buffer(handle, Port::Output)?;
        self.request(HwRequest::Fill(handle))
    }
}

impl Drop for SimComponent {
    fn drop(&mut self) {
        let _ = self.tx.send(HwRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(component = %self.name, "Simulated component thread panicked");
            }
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
        debug!(component = %self.name, "Simulated component freed");
    }
}

// ---------------------------------------------------------------------------
// Hardware thread
// ---------------------------------------------------------------------------

struct SimHardware {
    script: SimScript,
    callback: EventCallback,
    state: OmxState,
    format: PixelFormat,
    output_buffer: Option<BufferHandle>,
    decoded: VecDeque<DecodedVideoFrame>,
    frame_index: u64,
    faulted: bool,
}

impl SimHardware {
    fn new(script: SimScript, callback: EventCallback) -> Self {
        Self {
            script,
            callback,
            state: OmxState::Loaded,
            format: PixelFormat::Nv12,
            output_buffer: None,
            decoded: VecDeque::new(),
            frame_index: 0,
            faulted: false,
        }
    }

    fn run(mut self, rx: Receiver<HwRequest>) {
        for request in rx.iter() {
            match request {
                HwRequest::Configure(port, definition) => {
                    if port == Port::Output {
                        self.format = definition.format;
                    }
                }
                HwRequest::Command(command) => self.command(command),
                HwRequest::Empty {
                    handle,
                    len,
                    timestamp,
                    flags,
                } => self.empty(handle, len, timestamp, flags),
                HwRequest::Fill(handle) => {
                    self.output_buffer = Some(handle);
                    self.pump();
                }
                HwRequest::Shutdown => break,
            }
        }
    }

    fn emit(&self, event: OmxEvent) {
        (self.callback)(event);
    }

    fn command(&mut self, command: OmxCommand) {
        match command {
            OmxCommand::StateSet(target) => self.transition(target),
            OmxCommand::Flush(Port::Input) => {
                // Inputs are consumed on arrival; nothing is held.
                self.emit(OmxEvent::CommandComplete(command));
            }
            OmxCommand::Flush(Port::Output) => {
                self.decoded.clear();
                self.return_output_empty();
                self.emit(OmxEvent::CommandComplete(command));
            }
            OmxCommand::PortDisable(_) | OmxCommand::PortEnable(_) => {
                self.emit(OmxEvent::CommandComplete(command));
            }
        }
    }

    fn transition(&mut self, target: OmxState) {
        let valid = matches!(
            (self.state, target),
            (OmxState::Loaded, OmxState::Idle)
                | (OmxState::Idle, OmxState::Executing)
                | (OmxState::Idle, OmxState::Loaded)
                | (OmxState::Executing, OmxState::Idle)
                | (OmxState::Executing, OmxState::Pause)
                | (OmxState::Pause, OmxState::Executing)
                | (OmxState::Pause, OmxState::Idle)
        );
        if !valid {
            self.emit(OmxEvent::Error(OmxError::IncorrectState {
                operation: format!("StateSet({target:?})"),
                state: format!("{:?}", self.state),
            }));
            return;
        }
        if self.script.stall_on == Some(target) {
            debug!(?target, "Simulated component stalling on transition");
            return;
        }
        if target == OmxState::Idle {
            // Every buffer comes home before Idle is reported.
            self.decoded.clear();
            self.return_output_empty();
        }
        self.state = target;
        self.emit(OmxEvent::CommandComplete(OmxCommand::StateSet(target)));
        self.pump();
    }

    fn return_output_empty(&mut self) {
        if let Some(handle) = self.output_buffer.take() {
            self.emit(OmxEvent::FillBufferDone {
                handle,
                frame: None,
            });
        }
    }

    fn empty(&mut self, handle: BufferHandle, len: usize, timestamp: i64, flags: BufferFlags) {
        if !matches!(self.state, OmxState::Executing | OmxState::Pause) {
            self.emit(OmxEvent::Error(OmxError::IncorrectState {
                operation: "EmptyThisBuffer".to_string(),
                state: format!("{:?}", self.state),
            }));
            return;
        }

        if len > 0 {
            if self.script.fault_after.is_some_and(|n| self.frame_index >= n) {
                if !self.faulted {
                    self.faulted = true;
                    self.emit(OmxEvent::Error(OmxError::Hardware {
                        code: SIM_FAULT_CODE,
                    }));
                }
            } else {
                let frame = self.decode_frame(timestamp);
                self.decoded.push_back(frame);
                self.frame_index += 1;
            }
        }
        if flags.end_of_stream {
            self.decoded
                .push_back(DecodedVideoFrame::end_of_stream(timestamp));
        }
        self.emit(OmxEvent::EmptyBufferDone(handle));
        self.pump();
    }

    fn decode_frame(&self, timestamp: i64) -> DecodedVideoFrame {
        let size = self.script.size_for(self.frame_index);
        let geometry = GeometryDescriptor::packed(size, self.format);
        let base = SIM_FRAME_BASE + (self.frame_index % 4) * 0x0100_0000;
        let luma_bytes = u64::from(size.height) * u64::from(geometry.stride(0).unwrap_or(0));
        let planes = geometry
            .strides()
            .iter()
            .enumerate()
            .map(|(i, stride)| PlaneLayout {
                address: base + i as u64 * luma_bytes,
                stride: *stride,
            })
            .collect();
        DecodedVideoFrame {
            timestamp,
            geometry: Some(geometry),
            planes,
            flags: FrameFlags {
                end_of_stream: false,
                show: self.script.is_shown(self.frame_index),
            },
        }
    }

    fn pump(&mut self) {
        if self.state != OmxState::Executing {
            return;
        }
        let Some(handle) = self.output_buffer else {
            return;
        };
        if let Some(frame) = self.decoded.pop_front() {
            self.output_buffer = None;
            self.emit(OmxEvent::FillBufferDone {
                handle,
                frame: Some(frame),
            });
        }
    }
}
