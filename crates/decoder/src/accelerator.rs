//! Client façade.
//!
//! [`OmxVideoDecodeAccelerator`] is what an embedder holds. Its methods never
//! block on hardware: they post work to the decoder thread (or the output
//! thread, for returned pictures) and return. `initialize` waits only for the
//! synchronous part of bring-up; `destroy` waits for the whole teardown.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vda_common::{AcceleratorConfig, DecoderConfig, Resolution, VideoCodecProfile};
//! use vda_decoder::sim::{RecordingSurface, SimScript, SimulatedCore};
//! use vda_decoder::OmxVideoDecodeAccelerator;
//! use vda_resource::{FakeBroker, ResourceManager};
//!
//! let core = Arc::new(SimulatedCore::new(SimScript::default()));
//! let resources = ResourceManager::new(Arc::new(FakeBroker::new()));
//! let surface = Arc::new(RecordingSurface::new());
//! let mut vda =
//!     OmxVideoDecodeAccelerator::new(core, resources, surface, AcceleratorConfig::default());
//! let events = vda
//!     .initialize(&DecoderConfig::new(VideoCodecProfile::H264Main, Resolution::VGA))
//!     .unwrap();
//! // decode(), drain `events`, assign_picture_buffers(), ...
//! vda.destroy();
//! # drop(events);
//! ```

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use tracing::{debug, error, info, warn};

use vda_common::{
    AcceleratorConfig, BitstreamBuffer, DecoderConfig, PictureBuffer, PictureBufferId, VdaError,
    VdaResult,
};
use vda_resource::{ClientId, ConflictType, ResourceClient, ResourceId, ResourceManager, Waitable};

use crate::event::{EventReceiver, EventSink};
use crate::omx::OmxCore;
use crate::output::RecordCensus;
use crate::output_thread::{OutputTask, OutputWorker};
use crate::session::Session;
use crate::state::{DecoderState, DecoderStats};
use crate::surface::{SurfaceBinder, SyncFence};
use crate::variant::{variant_for, HardwareVariant};
use crate::worker::{DecoderWorker, Task, WorkerContext};

// ---------------------------------------------------------------------------
// Preemption listener
// ---------------------------------------------------------------------------

/// Registered with the resource manager for the lifetime of a session.
struct PreemptionListener {
    session: Weak<Session>,
    tx: Sender<Task>,
}

impl ResourceClient for PreemptionListener {
    fn on_resource_conflict(
        &self,
        waitable: Waitable,
        conflict: ConflictType,
        ids: &[ResourceId],
    ) -> bool {
        warn!(?conflict, ?ids, "Decoder hardware is being reclaimed");
        if let Some(session) = self.session.upgrade() {
            session.fail(&VdaError::PlatformFailure(format!(
                "hardware reclaimed by the platform ({conflict:?})"
            )));
        }
        // The decoder thread signals the waitable once the component is gone.
        match self.tx.send(Task::ResourceConflict { waitable }) {
            Ok(()) => false,
            Err(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Running session
// ---------------------------------------------------------------------------

struct Running {
    session: Arc<Session>,
    tx: Sender<Task>,
    output_tx: Sender<OutputTask>,
    worker: Option<JoinHandle<()>>,
    client: ClientId,
    // Kept alive so the manager's weak reference stays valid.
    _listener: Arc<PreemptionListener>,
}

// ---------------------------------------------------------------------------
// Façade
// ---------------------------------------------------------------------------

pub struct OmxVideoDecodeAccelerator {
    core: Arc<dyn OmxCore>,
    resources: Arc<ResourceManager>,
    binder: Arc<dyn SurfaceBinder>,
    variant: Arc<dyn HardwareVariant>,
    config: AcceleratorConfig,
    running: Option<Running>,
}

impl OmxVideoDecodeAccelerator {
    /// Build an accelerator for the variant named in `config`.
    pub fn new(
        core: Arc<dyn OmxCore>,
        resources: Arc<ResourceManager>,
        binder: Arc<dyn SurfaceBinder>,
        config: AcceleratorConfig,
    ) -> Self {
        let variant = variant_for(config.variant);
        Self::with_variant(core, resources, binder, variant, config)
    }

    pub fn with_variant(
        core: Arc<dyn OmxCore>,
        resources: Arc<ResourceManager>,
        binder: Arc<dyn SurfaceBinder>,
        variant: Arc<dyn HardwareVariant>,
        config: AcceleratorConfig,
    ) -> Self {
        Self {
            core,
            resources,
            binder,
            variant,
            config,
            running: None,
        }
    }

    /// Acquire the hardware and start the session.
    ///
    /// Returns the event stream once the component has been opened and its
    /// buffers allocated; the remaining Idle → Executing transition completes
    /// asynchronously. Any failure here leaves nothing allocated and emits no
    /// `NotifyError`.
    pub fn initialize(&mut self, config: &DecoderConfig) -> VdaResult<EventReceiver> {
        if self.running.is_some() {
            return Err(VdaError::InvalidState("initialize"));
        }

        let (event_tx, event_rx) = channel::unbounded();
        let (tx, rx) = channel::unbounded::<Task>();
        let (output_tx, output_rx) = channel::unbounded::<OutputTask>();
        let session = Arc::new(Session::new(EventSink::new(event_tx)));

        let listener = Arc::new(PreemptionListener {
            session: Arc::downgrade(&session),
            tx: tx.clone(),
        });
        let as_client: Arc<dyn ResourceClient> = listener.clone();
        let client = self.resources.register_client(Arc::downgrade(&as_client));

        let output_worker = OutputWorker::new(
            session.clone(),
            self.binder.clone(),
            tx.clone(),
            self.config.fence_timeout(),
        );
        let output_thread = match thread::Builder::new()
            .name("vda-output".to_string())
            .spawn(move || output_worker.run(output_rx))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.resources.unregister_client(client);
                return Err(VdaError::PlatformFailure(format!(
                    "failed to spawn output thread: {e}"
                )));
            }
        };

        let worker = DecoderWorker::new(WorkerContext {
            session: session.clone(),
            core: self.core.clone(),
            resources: self.resources.clone(),
            client,
            variant: self.variant.clone(),
            binder: self.binder.clone(),
            config: self.config.clone(),
            self_tx: tx.clone(),
            output_tx: output_tx.clone(),
            output_thread,
        });
        let worker_thread = match thread::Builder::new()
            .name("vda-decoder".to_string())
            .spawn(move || worker.run(rx))
        {
            Ok(handle) => handle,
            Err(e) => {
                // The worker (and with it the output thread's handle) was
                // dropped; closing the channel stops the output thread.
                let _ = output_tx.send(OutputTask::Shutdown);
                self.resources.unregister_client(client);
                return Err(VdaError::PlatformFailure(format!(
                    "failed to spawn decoder thread: {e}"
                )));
            }
        };

        let (reply_tx, reply_rx) = channel::bounded(1);
        let sent = tx.send(Task::Initialize {
            config: config.clone(),
            reply: reply_tx,
        });
        let result = match sent {
            Ok(()) => reply_rx.recv().unwrap_or_else(|_| {
                Err(VdaError::PlatformFailure(
                    "decoder thread exited during initialization".to_string(),
                ))
            }),
            Err(_) => Err(VdaError::PlatformFailure(
                "decoder thread is not running".to_string(),
            )),
        };

        if let Err(e) = result {
            // The decoder thread has already released everything and exits.
            if worker_thread.join().is_err() {
                error!("Decoder thread panicked during initialization");
            }
            self.resources.unregister_client(client);
            return Err(e);
        }

        info!(
            variant = self.variant.name(),
            profile = ?config.profile,
            size = %config.coded_size,
            "Accelerator initialized"
        );
        self.running = Some(Running {
            session,
            tx,
            output_tx,
            worker: Some(worker_thread),
            client,
            _listener: listener,
        });
        Ok(event_rx)
    }

    /// The running session, unless it is in Error or being destroyed.
    fn live(&self) -> Option<&Running> {
        let running = self.running.as_ref()?;
        match running.session.state() {
            DecoderState::Error | DecoderState::Destroying => None,
            _ => Some(running),
        }
    }

    fn post(&self, task: Task) {
        if let Some(running) = self.live() {
            if running.tx.send(task).is_err() {
                warn!("Decoder thread is gone");
            }
        }
    }

    /// Queue a bitstream chunk. `NotifyEndOfBitstreamBuffer` reports when the
    /// buffer may be reused.
    pub fn decode(&self, buffer: BitstreamBuffer) {
        self.post(Task::Decode(buffer));
    }

    /// Answer a `ProvidePictureBuffers` request.
    pub fn assign_picture_buffers(&self, buffers: Vec<PictureBuffer>) {
        let Some(running) = self.live() else {
            return;
        };
        let output = &running.session.output;
        let assigned = output.lock().assign(buffers);
        match assigned {
            Ok(true) => output.notify_assigned(),
            Ok(false) => debug!("Ignoring picture buffers for an abandoned request"),
            Err(e) => {
                running.session.fail(&e);
            }
        }
    }

    /// Return a delivered picture. When `fence` is given, the picture is not
    /// overwritten before it signals.
    pub fn reuse_picture_buffer(&self, id: PictureBufferId, fence: Option<Box<dyn SyncFence>>) {
        if let Some(running) = self.live() {
            if running.output_tx.send(OutputTask::Reuse { id, fence }).is_err() {
                warn!(picture = %id, "Output thread is gone");
            }
        }
    }

    /// Drain everything queued so far. Completes with `NotifyFlushDone`.
    pub fn flush(&self) {
        self.post(Task::Flush);
    }

    /// Drop queued input and pending output and dismiss every picture
    /// buffer. Completes with `NotifyResetDone` once the client has returned
    /// all pictures it holds.
    pub fn reset(&self) {
        if let Some(running) = self.live() {
            // Unblock a pending picture buffer request before the decoder
            // thread gets to the reset.
            running.session.output.interrupt_grow();
            if running.tx.send(Task::Reset).is_err() {
                warn!("Decoder thread is gone");
            }
        }
    }

    /// Tear the session down and wait until every hardware unit is released.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        info!("Destroying accelerator");
        running.session.output.abort();
        if running.tx.send(Task::Destroy).is_err() {
            debug!("Decoder thread already stopped");
        }
        if let Some(worker) = running.worker.take() {
            if worker.join().is_err() {
                error!("Decoder thread panicked");
            }
        }
        self.resources.unregister_client(running.client);
        info!("Accelerator destroyed");
    }

    pub fn state(&self) -> DecoderState {
        self.running
            .as_ref()
            .map_or(DecoderState::Uninitialized, |r| r.session.state())
    }

    pub fn stats(&self) -> DecoderStats {
        self.running
            .as_ref()
            .map(|r| r.session.stats.snapshot())
            .unwrap_or_default()
    }

    /// Current partition of picture records.
    pub fn record_census(&self) -> RecordCensus {
        self.running
            .as_ref()
            .map(|r| r.session.output.lock().census())
            .unwrap_or_default()
    }

    /// Input buffers currently free / at the hardware.
    pub fn input_occupancy(&self) -> (usize, usize) {
        self.running
            .as_ref()
            .map(|r| {
                let pool = r.session.input.lock();
                (pool.free_count(), pool.at_hardware_count())
            })
            .unwrap_or((0, 0))
    }

    pub fn variant(&self) -> &dyn HardwareVariant {
        self.variant.as_ref()
    }
}

impl Drop for OmxVideoDecodeAccelerator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
