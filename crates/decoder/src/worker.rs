//! Decoder-command thread.
//!
//! The only thread that talks to the OMX component. Client requests, hardware
//! callbacks, output-thread releases and preemption notices all arrive as
//! [`Task`]s on one crossbeam channel and are handled strictly in order.
//!
//! Component lifecycle:
//!
//! ```text
//!   initialize:  open ─► set role / ports ─► StateSet(Idle) + allocate buffers
//!                 ─► [ack Idle] ─► StateSet(Executing) ─► [ack] ─► fill output
//!
//!   teardown:    StopExecuting: StateSet(Idle), wait for every buffer back
//!                Unload:        StateSet(Loaded) + free every buffer
//!                Release:       free component, release resource grant,
//!                               stop output thread (destroy only)
//! ```
//!
//! Each teardown phase waits for the hardware at most `teardown_timeout`;
//! after that the phase is forced so destruction always finishes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, trace, warn};

use vda_common::{
    AcceleratorConfig, BitstreamBuffer, BitstreamId, DecodedVideoFrame, DecoderConfig,
    GeometryDescriptor, OmxError, VdaError, VdaResult,
};
use vda_resource::{ClientId, ResourceId, ResourceManager, ResourceRequest, Waitable};

use crate::event::VdaEvent;
use crate::input::{CompletionQueue, InputFrameBuffer, TimestampSurrogate};
use crate::omx::{
    check_omx_result, BufferHandle, EventCallback, OmxCommand, OmxComponent, OmxCore, OmxEvent,
    OmxState, Port, PortDefinition,
};
use crate::output::{OutputRecord, PendingFrame, RotatingBuffer};
use crate::output_thread::OutputTask;
use crate::session::Session;
use crate::state::{DecoderState, StatsCounters};
use crate::surface::SurfaceBinder;
use crate::variant::HardwareVariant;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub(crate) enum Task {
    Initialize {
        config: DecoderConfig,
        reply: Sender<VdaResult<()>>,
    },
    Decode(BitstreamBuffer),
    Flush,
    Reset,
    Destroy,
    /// Forwarded component callback.
    Hardware(OmxEvent),
    /// The output thread delivered or dropped the current frame.
    OutputReleased { end_of_stream: bool },
    /// The client returned a picture that was then dismissed.
    PictureRetired,
    /// The platform reclaimed the decoder; signal `waitable` once released.
    ResourceConflict { waitable: Waitable },
}

enum PendingInput {
    Chunk(BitstreamBuffer),
    FlushMarker,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TeardownPhase {
    StopExecuting,
    Unload,
    Release,
}

struct Teardown {
    phase: TeardownPhase,
    deadline: Instant,
    unload_sent: bool,
    /// Stop the threads once released (destroy) or keep the shell alive in
    /// Error state (preemption).
    destroy: bool,
    waitables: Vec<Waitable>,
}

/// Everything the decoder thread needs from its creator.
pub(crate) struct WorkerContext {
    pub(crate) session: Arc<Session>,
    pub(crate) core: Arc<dyn OmxCore>,
    pub(crate) resources: Arc<ResourceManager>,
    pub(crate) client: ClientId,
    pub(crate) variant: Arc<dyn HardwareVariant>,
    pub(crate) binder: Arc<dyn SurfaceBinder>,
    pub(crate) config: AcceleratorConfig,
    pub(crate) self_tx: Sender<Task>,
    pub(crate) output_tx: Sender<OutputTask>,
    pub(crate) output_thread: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub(crate) struct DecoderWorker {
    session: Arc<Session>,
    core: Arc<dyn OmxCore>,
    resources: Arc<ResourceManager>,
    client: ClientId,
    variant: Arc<dyn HardwareVariant>,
    binder: Arc<dyn SurfaceBinder>,
    config: AcceleratorConfig,
    self_tx: Sender<Task>,
    output_tx: Sender<OutputTask>,
    output_thread: Option<JoinHandle<()>>,

    component: Option<Box<dyn OmxComponent>>,
    component_state: OmxState,
    pending_transition: Option<OmxState>,
    port_flushing: [bool; 2],
    output_handle: Option<BufferHandle>,
    granted: Vec<ResourceId>,
    hardware_released: bool,

    queue: VecDeque<PendingInput>,
    completions: CompletionQueue,
    timestamps: TimestampSurrogate,
    /// Flush marker submitted; pulling is paused until the flush completes.
    flushing: bool,
    flush_eos_seen: bool,
    resetting: bool,
    teardown: Option<Teardown>,
    done: bool,
}

impl DecoderWorker {
    pub(crate) fn new(ctx: WorkerContext) -> Self {
        Self {
            session: ctx.session,
            core: ctx.core,
            resources: ctx.resources,
            client: ctx.client,
            variant: ctx.variant,
            binder: ctx.binder,
            config: ctx.config,
            self_tx: ctx.self_tx,
            output_tx: ctx.output_tx,
            output_thread: Some(ctx.output_thread),
            component: None,
            component_state: OmxState::Loaded,
            pending_transition: None,
            port_flushing: [false; 2],
            output_handle: None,
            granted: Vec::new(),
            hardware_released: false,
            queue: VecDeque::new(),
            completions: CompletionQueue::default(),
            timestamps: TimestampSurrogate::default(),
            flushing: false,
            flush_eos_seen: false,
            resetting: false,
            teardown: None,
            done: false,
        }
    }

    pub(crate) fn run(mut self, rx: Receiver<Task>) {
        info!(variant = self.variant.name(), "Decoder thread started");
        while !self.done {
            let task = match self.teardown.as_ref().map(|t| t.deadline) {
                Some(deadline) => match rx.recv_deadline(deadline) {
                    Ok(task) => task,
                    Err(RecvTimeoutError::Timeout) => {
                        self.force_teardown_phase();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(task) => task,
                    Err(_) => break,
                },
            };
            self.handle(task);
        }
        info!("Decoder thread exiting");
    }

    fn handle(&mut self, task: Task) {
        match task {
            Task::Initialize { config, reply } => {
                let result = self.initialize(&config);
                if let Err(e) = &result {
                    warn!(error = %e, "Initialization failed");
                    self.abandon_initialize();
                }
                let _ = reply.send(result);
            }
            Task::Decode(buffer) => self.enqueue_decode(buffer),
            Task::Flush => self.enqueue_flush(),
            Task::Reset => self.start_reset(),
            Task::Destroy => self.start_destroy(),
            Task::Hardware(event) => self.on_hardware_event(event),
            Task::OutputReleased { end_of_stream } => self.on_output_released(end_of_stream),
            Task::PictureRetired => self.maybe_finish_reset(),
            Task::ResourceConflict { waitable } => self.on_resource_conflict(waitable),
        }
        self.advance_teardown();
    }

    fn fail(&self, err: VdaError) {
        self.session.fail(&err);
    }

    fn post_output(&self, task: OutputTask) {
        if self.output_tx.send(task).is_err() {
            debug!("Output thread gone");
        }
    }

    fn component_mut(&mut self) -> Result<&mut (dyn OmxComponent + 'static), OmxError> {
        self.component
            .as_deref_mut()
            .ok_or_else(|| OmxError::IncorrectState {
                operation: "component access".to_string(),
                state: "released".to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    fn initialize(&mut self, config: &DecoderConfig) -> VdaResult<()> {
        if self.session.state() != DecoderState::Uninitialized {
            return Err(VdaError::InvalidState("initialize"));
        }
        self.session.set_state(DecoderState::Initializing);

        if !self.variant.supports(config.profile) {
            return Err(VdaError::InvalidArgument(format!(
                "{:?} is not supported by the {} decoder",
                config.profile,
                self.variant.name()
            )));
        }
        if config.coded_size.is_empty() {
            return Err(VdaError::InvalidArgument(format!(
                "empty coded size {}",
                config.coded_size
            )));
        }

        let granted = self
            .resources
            .allocate_resources(self.client, &[ResourceRequest::video_decoder(config)])?;
        self.granted = granted.iter().map(|r| r.id).collect();
        let name = granted
            .first()
            .map(|r| r.component_name.clone())
            .ok_or_else(|| VdaError::ResourceUnavailable("empty grant".to_string()))?;

        info!(
            component = %name,
            profile = ?config.profile,
            size = %config.coded_size,
            "Opening OMX component"
        );
        let tx = self.self_tx.clone();
        let callback: EventCallback = Arc::new(move |event| {
            let _ = tx.send(Task::Hardware(event));
        });
        let component = self
            .core
            .open(&name, callback)
            .map_err(|e| VdaError::PlatformFailure(format!("cannot open {name}: {e}")))?;
        self.component = Some(component);

        let codec = config.profile.codec();
        let role = self.variant.component_role(codec);
        let format = self.variant.output_format();
        let input_count = self.variant.input_frame_buffers_count();
        let input_size = self.variant.input_buffer_size(config.coded_size);
        let output_size = config.coded_size.area() as usize * 3 / 2;

        let component = self.component_mut()?;
        component.set_role(&role)?;
        component.set_port_definition(
            Port::Input,
            &PortDefinition {
                buffer_count: input_count,
                buffer_size: input_size,
                frame_size: config.coded_size,
                format,
            },
        )?;
        component.set_port_definition(
            Port::Output,
            &PortDefinition {
                buffer_count: 1,
                buffer_size: output_size,
                frame_size: config.coded_size,
                format,
            },
        )?;

        // Loaded -> Idle completes once every port buffer is allocated.
        self.send_state(OmxState::Idle)?;
        for _ in 0..input_count {
            let handle = self.component_mut()?.allocate_buffer(Port::Input, input_size)?;
            self.session
                .input
                .lock()
                .add(InputFrameBuffer::new(handle, input_size));
        }
        let handle = self.component_mut()?.allocate_buffer(Port::Output, output_size)?;
        self.output_handle = Some(handle);
        self.session.output.lock().buffer = RotatingBuffer::Idle;

        debug!(input_count, input_size, output_size, "Port buffers allocated");
        Ok(())
    }

    fn finish_initialize(&mut self) {
        self.session.set_state(DecoderState::Initialized);
        info!("Decoder initialized");
        self.queue_output_buffer();
        self.pump();
    }

    /// Undo a failed synchronous initialization. No client notification.
    fn abandon_initialize(&mut self) {
        self.release_hardware_units();
        self.shutdown_output();
        self.session.set_state(DecoderState::Uninitialized);
        self.done = true;
    }

    fn send_state(&mut self, target: OmxState) -> VdaResult<()> {
        if let Some(in_flight) = self.pending_transition {
            return Err(VdaError::PlatformFailure(format!(
                "transition to {target:?} requested while {in_flight:?} is in flight"
            )));
        }
        let command = OmxCommand::StateSet(target);
        check_omx_result(
            self.component_mut()?.send_command(command),
            &command.to_string(),
        )?;
        self.pending_transition = Some(target);
        debug!(from = ?self.component_state, to = ?target, "Component state change requested");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    fn accepting_requests(&self) -> bool {
        !self.session.is_error()
            && self.teardown.is_none()
            && self.session.state() != DecoderState::Destroying
    }

    fn enqueue_decode(&mut self, buffer: BitstreamBuffer) {
        if !self.accepting_requests() {
            trace!(id = %buffer.id, "Ignoring decode");
            return;
        }
        self.completions.submitted(buffer.id);
        self.queue.push_back(PendingInput::Chunk(buffer));
        self.pump();
    }

    fn enqueue_flush(&mut self) {
        if !self.accepting_requests() {
            return;
        }
        debug!(queued = self.queue.len(), "Flush requested");
        self.queue.push_back(PendingInput::FlushMarker);
        self.pump();
    }

    fn can_submit(&self) -> bool {
        self.accepting_requests()
            && self.session.state().is_running()
            && self.component_state == OmxState::Executing
            && !self.resetting
            && !self.flushing
    }

    /// Move queued chunks into free input buffers while both are available.
    fn pump(&mut self) {
        loop {
            if !self.can_submit() {
                return;
            }
            let head = match self.queue.front() {
                None => return,
                Some(PendingInput::FlushMarker) => None,
                Some(PendingInput::Chunk(buffer)) => Some(buffer.clone()),
            };
            match head {
                Some(buffer) => {
                    if !self.submit_chunk(buffer) {
                        return;
                    }
                }
                None => {
                    self.submit_flush_marker();
                    return;
                }
            }
        }
    }

    /// Returns `false` when pulling must stop (no free buffer, or error).
    fn submit_chunk(&mut self, buffer: BitstreamBuffer) -> bool {
        let bytes = match buffer.map() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.queue.pop_front();
                self.fail(VdaError::UnreadableInput {
                    id: buffer.id,
                    reason: e.to_string(),
                });
                return false;
            }
        };

        if bytes.is_empty() {
            self.queue.pop_front();
            trace!(id = %buffer.id, "Zero-length chunk, completing without hardware");
            self.complete_bitstream(buffer.id);
            return true;
        }

        let taken = self.session.input.lock().take_free();
        let Some(mut input) = taken else {
            trace!(queued = self.queue.len(), "No free input buffer");
            return false;
        };
        if bytes.len() > input.capacity() {
            let capacity = input.capacity();
            self.session.input.lock().return_free(input);
            self.queue.pop_front();
            self.fail(VdaError::ChunkTooLarge {
                id: buffer.id,
                size: bytes.len(),
                capacity,
            });
            return false;
        }

        let ts = self.timestamps.stamp(buffer.id, buffer.timestamp);
        if let Err(e) = input.fill(buffer.id, bytes, ts) {
            self.session.input.lock().return_free(input);
            self.fail(e);
            return false;
        }
        self.queue.pop_front();
        trace!(id = %buffer.id, size = bytes.len(), ts, "Submitting chunk");
        if let Err(e) = self.submit_input(input) {
            self.fail(e);
            return false;
        }

        StatsCounters::bump(&self.session.stats.inputs_submitted);
        if matches!(
            self.session.state(),
            DecoderState::Initialized | DecoderState::AfterReset
        ) {
            self.session.set_state(DecoderState::Decoding);
        }
        true
    }

    fn submit_flush_marker(&mut self) {
        let taken = self.session.input.lock().take_free();
        let Some(mut input) = taken else {
            return;
        };
        self.queue.pop_front();
        let ts = self
            .timestamps
            .flush_marker(self.variant.flush_marker_pts_offset());
        input.mark_end_of_stream(ts);
        if let Err(e) = self.submit_input(input) {
            self.fail(e);
            return;
        }
        self.flushing = true;
        self.flush_eos_seen = false;
        debug!(ts, "End-of-stream marker submitted");
    }

    fn submit_input(&mut self, input: InputFrameBuffer) -> VdaResult<()> {
        let handle = input.handle();
        let result = self.component_mut().and_then(|c| {
            c.empty_this_buffer(handle, input.payload(), input.timestamp(), input.flags())
        });
        match result {
            Ok(()) => {
                self.session.input.lock().give_to_hardware(input);
                Ok(())
            }
            Err(e) => {
                self.session.input.lock().return_free(input);
                Err(e.into())
            }
        }
    }

    fn complete_bitstream(&mut self, id: BitstreamId) {
        let ready = self.completions.complete(id);
        if self.session.is_error() {
            return;
        }
        for id in ready {
            self.session.emit(VdaEvent::NotifyEndOfBitstreamBuffer(id));
        }
    }

    // -----------------------------------------------------------------------
    // Hardware events
    // -----------------------------------------------------------------------

    fn on_hardware_event(&mut self, event: OmxEvent) {
        if self.component.is_none() {
            trace!(?event, "Event after component release");
            return;
        }
        match event {
            OmxEvent::CommandComplete(command) => self.on_command_complete(command),
            OmxEvent::EmptyBufferDone(handle) => self.on_empty_buffer_done(handle),
            OmxEvent::FillBufferDone { handle, frame } => self.on_fill_buffer_done(handle, frame),
            OmxEvent::Error(e) => {
                if self.teardown.is_some() {
                    warn!(error = %e, "Component error during teardown");
                } else {
                    self.fail(e.into());
                }
            }
        }
    }

    fn on_command_complete(&mut self, command: OmxCommand) {
        debug!(%command, "Command complete");
        match command {
            OmxCommand::StateSet(state) => {
                if self.pending_transition != Some(state) {
                    warn!(?state, pending = ?self.pending_transition, "Unexpected state acknowledgment");
                }
                self.pending_transition = None;
                self.component_state = state;
                if self.teardown.is_none()
                    && self.session.state() == DecoderState::Initializing
                {
                    match state {
                        OmxState::Idle => {
                            if let Err(e) = self.send_state(OmxState::Executing) {
                                self.fail(e);
                            }
                        }
                        OmxState::Executing => self.finish_initialize(),
                        _ => {}
                    }
                }
            }
            OmxCommand::Flush(port) => {
                self.port_flushing[port.index()] = false;
                self.maybe_finish_reset();
            }
            OmxCommand::PortDisable(_) | OmxCommand::PortEnable(_) => {}
        }
    }

    fn on_empty_buffer_done(&mut self, handle: BufferHandle) {
        let taken = self.session.input.lock().take_back(handle);
        let buffer = match taken {
            Ok(buffer) => buffer,
            Err(e) => {
                if self.teardown.is_none() {
                    self.fail(e);
                }
                return;
            }
        };
        trace!(?handle, bytes = buffer.bytes_used(), "Input buffer returned");
        if let Some(id) = buffer.correlation() {
            self.complete_bitstream(id);
        }
        self.session.input.lock().release(buffer);

        self.pump();
        self.maybe_finish_flush();
        self.maybe_finish_reset();
    }

    fn on_fill_buffer_done(&mut self, handle: BufferHandle, frame: Option<DecodedVideoFrame>) {
        if self.output_handle != Some(handle) {
            if self.teardown.is_none() {
                self.fail(VdaError::InvalidArgument(format!(
                    "FillBufferDone for unknown output {handle:?}"
                )));
            }
            return;
        }

        let Some(frame) = frame else {
            self.session.output.lock().buffer = RotatingBuffer::Idle;
            trace!("Output buffer returned empty");
            if self.can_refill() {
                self.queue_output_buffer();
            }
            self.maybe_finish_reset();
            return;
        };

        if self.teardown.is_some() || self.session.is_error() {
            self.session.output.lock().buffer = RotatingBuffer::Idle;
            return;
        }

        if frame.is_displayable() {
            StatsCounters::bump(&self.session.stats.frames_decoded);
        }
        let origin = self.timestamps.resolve(frame.timestamp);

        if let (Some(geometry), false) = (frame.geometry, self.resetting) {
            let needs_grow =
                frame.flags.show && self.session.output.lock().needs_grow(&geometry);
            if needs_grow && !self.grow(geometry) {
                self.session.output.lock().buffer = RotatingBuffer::Idle;
                StatsCounters::bump(&self.session.stats.frames_dropped);
                self.on_output_released(frame.flags.end_of_stream);
                return;
            }
        }

        {
            let mut st = self.session.output.lock();
            if let Some(old) = st.set_current(PendingFrame { frame, origin }) {
                warn!(ts = old.frame.timestamp, "Undelivered frame superseded");
                StatsCounters::bump(&self.session.stats.frames_dropped);
            }
            st.buffer = RotatingBuffer::Held;
        }
        self.post_output(OutputTask::Deliver);
    }

    fn on_output_released(&mut self, end_of_stream: bool) {
        {
            let mut st = self.session.output.lock();
            if st.buffer == RotatingBuffer::Held {
                st.buffer = RotatingBuffer::Idle;
            }
        }
        if end_of_stream && self.flushing {
            self.flush_eos_seen = true;
        }
        if self.can_refill() {
            self.queue_output_buffer();
        }
        self.maybe_finish_flush();
        self.maybe_finish_reset();
    }

    fn can_refill(&self) -> bool {
        self.accepting_requests()
            && self.session.state().is_running()
            && self.component_state == OmxState::Executing
            && !self.resetting
    }

    fn queue_output_buffer(&mut self) {
        let Some(handle) = self.output_handle else {
            return;
        };
        {
            let mut st = self.session.output.lock();
            if st.buffer != RotatingBuffer::Idle {
                return;
            }
            st.buffer = RotatingBuffer::AtHardware;
        }
        if let Err(e) = self.component_mut().and_then(|c| c.fill_this_buffer(handle)) {
            self.session.output.lock().buffer = RotatingBuffer::Idle;
            self.fail(e.into());
        }
    }

    // -----------------------------------------------------------------------
    // Geometry change
    // -----------------------------------------------------------------------

    /// Ask the client for a new record set and bind it. Blocks this thread
    /// until the client answers or the wait is aborted.
    fn grow(&mut self, geometry: GeometryDescriptor) -> bool {
        let count = self.variant.output_record_count() + self.config.extra_picture_buffers as usize;
        let begun = {
            let mut st = self.session.output.lock();
            if st.abort_grow {
                return false;
            }
            st.begin_grow(geometry, count)
        };
        if let Err(e) = begun {
            self.fail(e);
            return false;
        }

        info!(%geometry, count, "Requesting picture buffers");
        StatsCounters::bump(&self.session.stats.geometry_changes);
        self.session.emit(VdaEvent::ProvidePictureBuffers {
            count: count as u32,
            format: geometry.format,
            planes: geometry.num_planes() as u32,
            size: geometry.size,
            target: self.variant.texture_target(),
        });

        let Some(buffers) = self.session.output.wait_for_assignment() else {
            info!("Picture buffer request abandoned");
            return false;
        };

        let mut bound = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            match self.binder.bind(buffer.texture, &geometry) {
                Ok(image) => bound.push((buffer, image)),
                Err(e) => {
                    for (_, image) in &bound {
                        self.binder.unbind(*image);
                    }
                    self.fail(e.into());
                    return false;
                }
            }
        }

        let retired = self.session.output.lock().install_records(bound, geometry);
        self.dismiss(retired);
        true
    }

    fn dismiss(&self, retired: Vec<OutputRecord>) {
        for record in retired {
            if let Some(image) = record.image {
                self.binder.unbind(image);
            }
            StatsCounters::bump(&self.session.stats.records_dismissed);
            debug!(picture = %record.id(), "Dismissing free picture");
            self.session
                .emit(VdaEvent::DismissPictureBuffer(record.id()));
        }
    }

    // -----------------------------------------------------------------------
    // Flush / reset
    // -----------------------------------------------------------------------

    fn maybe_finish_flush(&mut self) {
        if !self.flushing || !self.flush_eos_seen {
            return;
        }
        if !self.session.input.lock().all_free() {
            return;
        }
        self.flushing = false;
        self.flush_eos_seen = false;
        if self.session.is_error() {
            return;
        }
        info!("Flush complete");
        self.session.emit(VdaEvent::NotifyFlushDone);
        self.pump();
    }

    fn start_reset(&mut self) {
        if !self.accepting_requests() {
            return;
        }
        match self.session.state() {
            DecoderState::Uninitialized | DecoderState::Initializing => {
                self.session.output.resume();
                self.fail(VdaError::InvalidState("reset"));
                return;
            }
            DecoderState::Resetting => {
                debug!("Reset already in progress");
                return;
            }
            _ => {}
        }

        info!(queued = self.queue.len(), "Reset requested");
        self.session.set_state(DecoderState::Resetting);
        self.resetting = true;

        // Queued chunks never reach the hardware; hand them back.
        let dropped: Vec<BitstreamId> = self
            .queue
            .drain(..)
            .filter_map(|p| match p {
                PendingInput::Chunk(buffer) => Some(buffer.id),
                PendingInput::FlushMarker => None,
            })
            .collect();
        for id in dropped {
            self.complete_bitstream(id);
        }
        if self.flushing {
            debug!("Reset cancels the flush in progress");
        }
        self.flushing = false;
        self.flush_eos_seen = false;

        self.session.output.abort();
        self.session.output.lock().clear_geometry();
        self.post_output(OutputTask::Deliver);
        self.flush_port(Port::Input);
        self.flush_port(Port::Output);
        self.maybe_finish_reset();
    }

    fn flush_port(&mut self, port: Port) {
        if self.component_state != OmxState::Executing || self.port_flushing[port.index()] {
            return;
        }
        match self
            .component_mut()
            .and_then(|c| c.send_command(OmxCommand::Flush(port)))
        {
            Ok(()) => self.port_flushing[port.index()] = true,
            Err(e) => self.fail(e.into()),
        }
    }

    /// Resume once both ports are flushed, every input buffer is back, the
    /// output buffer is idle and every record has been dismissed.
    fn maybe_finish_reset(&mut self) {
        if !self.resetting || self.port_flushing.iter().any(|f| *f) {
            return;
        }
        if !self.session.input.lock().all_free() {
            return;
        }
        let retired = {
            let mut st = self.session.output.lock();
            if st.buffer_busy() || st.has_pending_writes() || st.current().is_some() {
                return;
            }
            st.retire_marked()
        };
        self.dismiss(retired);
        if self.session.output.lock().has_marked_records() {
            trace!("Reset waiting for the client to return pictures");
            return;
        }

        self.timestamps.clear();
        self.session.output.resume();
        self.resetting = false;
        if self.session.is_error() {
            return;
        }
        self.session.set_state(DecoderState::AfterReset);
        info!("Reset complete");
        self.queue_output_buffer();
        self.session.emit(VdaEvent::NotifyResetDone);
        self.pump();
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn start_destroy(&mut self) {
        info!("Destroy requested");
        self.session.set_state(DecoderState::Destroying);
        self.session.output.abort();
        self.post_output(OutputTask::Deliver);
        self.queue.clear();
        self.resetting = false;
        self.flushing = false;
        match self.teardown.as_mut() {
            Some(teardown) => teardown.destroy = true,
            None => self.begin_teardown(true, Vec::new()),
        }
    }

    fn on_resource_conflict(&mut self, waitable: Waitable) {
        warn!("Releasing hardware reclaimed by the platform");
        if self.hardware_released || (self.component.is_none() && self.granted.is_empty()) {
            waitable.signal();
            return;
        }
        self.queue.clear();
        // A frame parked for want of a free record would hold the buffer.
        self.post_output(OutputTask::Deliver);
        match self.teardown.as_mut() {
            Some(teardown) => teardown.waitables.push(waitable),
            None => self.begin_teardown(false, vec![waitable]),
        }
    }

    fn begin_teardown(&mut self, destroy: bool, waitables: Vec<Waitable>) {
        self.teardown = Some(Teardown {
            phase: TeardownPhase::StopExecuting,
            deadline: Instant::now() + self.config.teardown_timeout(),
            unload_sent: false,
            destroy,
            waitables,
        });
    }

    fn teardown_buffers_returned(&self) -> bool {
        self.session.input.lock().all_free() && !self.session.output.lock().buffer_busy()
    }

    fn advance_teardown(&mut self) {
        loop {
            let Some((phase, unload_sent)) =
                self.teardown.as_ref().map(|t| (t.phase, t.unload_sent))
            else {
                return;
            };

            let next = match phase {
                TeardownPhase::StopExecuting => {
                    if self.component.is_none() {
                        Some(TeardownPhase::Release)
                    } else if self.pending_transition.is_some() {
                        None
                    } else if matches!(self.component_state, OmxState::Executing | OmxState::Pause)
                    {
                        if let Err(e) = self.send_state(OmxState::Idle) {
                            warn!(error = %e, "Cannot stop component, forcing Idle");
                            self.component_state = OmxState::Idle;
                            self.session.input.lock().reclaim_all();
                            continue;
                        }
                        None
                    } else if self.teardown_buffers_returned() {
                        Some(TeardownPhase::Unload)
                    } else {
                        None
                    }
                }
                TeardownPhase::Unload => {
                    if self.pending_transition.is_some() {
                        None
                    } else if self.component_state == OmxState::Loaded {
                        Some(TeardownPhase::Release)
                    } else if !unload_sent {
                        if let Err(e) = self.send_state(OmxState::Loaded) {
                            warn!(error = %e, "Cannot unload component, forcing Loaded");
                            self.component_state = OmxState::Loaded;
                        }
                        self.free_hardware_buffers();
                        if let Some(teardown) = self.teardown.as_mut() {
                            teardown.unload_sent = true;
                        }
                        continue;
                    } else {
                        None
                    }
                }
                TeardownPhase::Release => {
                    self.finish_teardown();
                    return;
                }
            };

            match (next, self.teardown.as_mut()) {
                (Some(next), Some(teardown)) => {
                    debug!(from = ?teardown.phase, to = ?next, "Teardown phase");
                    teardown.phase = next;
                    teardown.deadline = Instant::now() + self.config.teardown_timeout();
                }
                _ => return,
            }
        }
    }

    /// The hardware did not acknowledge in time; assume it did.
    fn force_teardown_phase(&mut self) {
        let Some(phase) = self.teardown.as_ref().map(|t| t.phase) else {
            return;
        };
        warn!(
            ?phase,
            timeout_ms = self.config.teardown_timeout_ms,
            "Teardown phase timed out, forcing"
        );
        self.pending_transition = None;
        let next = match phase {
            TeardownPhase::StopExecuting => {
                self.component_state = OmxState::Idle;
                self.session.input.lock().reclaim_all();
                let mut st = self.session.output.lock();
                st.take_current();
                st.buffer = RotatingBuffer::Idle;
                TeardownPhase::Unload
            }
            TeardownPhase::Unload | TeardownPhase::Release => {
                self.component_state = OmxState::Loaded;
                TeardownPhase::Release
            }
        };
        if let Some(teardown) = self.teardown.as_mut() {
            teardown.phase = next;
            teardown.deadline = Instant::now() + self.config.teardown_timeout();
        }
        self.advance_teardown();
    }

    fn finish_teardown(&mut self) {
        self.release_hardware_units();
        let Some(teardown) = self.teardown.take() else {
            return;
        };
        for waitable in teardown.waitables {
            waitable.signal();
        }
        if teardown.destroy {
            self.shutdown_output();
            self.done = true;
        } else {
            info!("Hardware released after preemption");
        }
    }

    fn free_hardware_buffers(&mut self) {
        let inputs = self.session.input.lock().drain();
        let output = self.output_handle.take();
        self.session.output.lock().buffer = RotatingBuffer::Unallocated;
        let Some(component) = self.component.as_deref_mut() else {
            return;
        };
        for input in inputs {
            if let Err(e) = component.free_buffer(Port::Input, input.handle()) {
                warn!(handle = ?input.handle(), error = %e, "Failed to free input buffer");
            }
        }
        if let Some(handle) = output {
            if let Err(e) = component.free_buffer(Port::Output, handle) {
                warn!(?handle, error = %e, "Failed to free output buffer");
            }
        }
    }

    /// Free every hardware buffer, the component and the resource grant.
    fn release_hardware_units(&mut self) {
        self.free_hardware_buffers();
        if let Some(component) = self.component.take() {
            info!(component = component.name(), "Freeing OMX component");
            drop(component);
        }
        self.component_state = OmxState::Loaded;
        self.pending_transition = None;
        self.port_flushing = [false; 2];

        let ids = std::mem::take(&mut self.granted);
        if !ids.is_empty() && !self.resources.release_resources(self.client, &ids) {
            warn!(?ids, "Resource grant was already gone");
        }
        self.hardware_released = true;
    }

    fn shutdown_output(&mut self) {
        self.post_output(OutputTask::Shutdown);
        if let Some(handle) = self.output_thread.take() {
            if handle.join().is_err() {
                error!("Output thread panicked");
            }
        }
        let records = self.session.output.lock().drain_records();
        for record in records {
            if let Some(image) = record.image {
                self.binder.unbind(image);
            }
        }
    }
}
