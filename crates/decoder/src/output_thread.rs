//! Decoder-output thread.
//!
//! Delivers the current decoded frame into a free picture record and handles
//! pictures the client returns. Fence waits and texture writes happen here so
//! the decoder thread never blocks on the client's GPU work.
//!
//! Every frame the decoder thread hands over is answered with exactly one
//! [`Task::OutputReleased`], whether it was delivered or dropped, so the
//! decoder thread knows when it may re-queue the hardware output buffer.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, info, trace, warn};

use vda_common::{Picture, PictureBufferId, VdaError};

use crate::event::VdaEvent;
use crate::output::{ReuseOutcome, RotatingBuffer};
use crate::session::Session;
use crate::state::StatsCounters;
use crate::surface::{SurfaceBinder, SyncFence};
use crate::worker::Task;

pub(crate) enum OutputTask {
    /// A new current frame is waiting.
    Deliver,
    /// The client returned a picture.
    Reuse {
        id: PictureBufferId,
        fence: Option<Box<dyn SyncFence>>,
    },
    Shutdown,
}

pub(crate) struct OutputWorker {
    session: Arc<Session>,
    binder: Arc<dyn SurfaceBinder>,
    decoder_tx: Sender<Task>,
    fence_timeout: Duration,
}

impl OutputWorker {
    pub(crate) fn new(
        session: Arc<Session>,
        binder: Arc<dyn SurfaceBinder>,
        decoder_tx: Sender<Task>,
        fence_timeout: Duration,
    ) -> Self {
        Self {
            session,
            binder,
            decoder_tx,
            fence_timeout,
        }
    }

    pub(crate) fn run(self, rx: Receiver<OutputTask>) {
        debug!("Output thread started");
        for task in rx.iter() {
            match task {
                OutputTask::Deliver => self.try_deliver(),
                OutputTask::Reuse { id, fence } => {
                    self.reuse(id, fence);
                    self.try_deliver();
                }
                OutputTask::Shutdown => break,
            }
        }
        debug!("Output thread exiting");
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    fn try_deliver(&self) {
        let mut st = self.session.output.lock();
        let Some(pending) = st.current() else {
            return;
        };

        if st.dropping || self.session.is_error() || !pending.frame.is_displayable() {
            let Some(dropped) = st.take_current() else {
                return;
            };
            st.buffer = RotatingBuffer::Idle;
            drop(st);
            let end_of_stream = dropped.frame.flags.end_of_stream;
            if dropped.frame.is_displayable() {
                StatsCounters::bump(&self.session.stats.frames_dropped);
            }
            trace!(
                ts = dropped.frame.timestamp,
                end_of_stream,
                "Frame not delivered"
            );
            self.release(end_of_stream);
            return;
        }

        let Some(mut slot) = st.take_free_record() else {
            trace!("No free picture record, deferring delivery");
            return;
        };
        let Some(pending) = st.take_current() else {
            st.abort_delivery(slot.id);
            return;
        };
        drop(st);

        if let Some(fence) = slot.fence.take() {
            if !fence.wait(self.fence_timeout) {
                warn!(
                    picture = %slot.id,
                    timeout_ms = self.fence_timeout.as_millis() as u64,
                    "Fence did not signal, overwriting anyway"
                );
            }
        }

        let written = match slot.image {
            Some(image) => self
                .binder
                .write_frame(image, &pending.frame)
                .map_err(VdaError::from),
            None => Err(VdaError::PlatformFailure(format!(
                "picture record {} has no bound image",
                slot.id
            ))),
        };

        let mut st = self.session.output.lock();
        st.buffer = RotatingBuffer::Idle;
        let end_of_stream = pending.frame.flags.end_of_stream;
        if let Err(e) = written {
            st.abort_delivery(slot.id);
            drop(st);
            self.session.fail(&e);
            self.release(end_of_stream);
            return;
        }
        st.finish_delivery(slot.id);
        drop(st);

        let (bitstream_id, timestamp) = match pending.origin {
            Some((id, ts)) => (Some(id), ts),
            None => (None, pending.frame.timestamp),
        };
        let visible_size = pending
            .frame
            .geometry
            .map(|g| g.size)
            .unwrap_or_default();
        StatsCounters::bump(&self.session.stats.frames_delivered);
        trace!(picture = %slot.id, timestamp, "Picture ready");
        self.session.emit(VdaEvent::PictureReady(Picture {
            picture_buffer_id: slot.id,
            bitstream_id,
            timestamp,
            visible_size,
        }));
        self.release(end_of_stream);
    }

    /// Tell the decoder thread the rotating buffer is free again.
    fn release(&self, end_of_stream: bool) {
        if self
            .decoder_tx
            .send(Task::OutputReleased { end_of_stream })
            .is_err()
        {
            debug!("Decoder thread gone, dropping output release");
        }
    }

    // -----------------------------------------------------------------------
    // Reuse
    // -----------------------------------------------------------------------

    fn reuse(&self, id: PictureBufferId, fence: Option<Box<dyn SyncFence>>) {
        let outcome = self.session.output.lock().reuse(id, fence);
        match outcome {
            Ok(ReuseOutcome::Freed) => trace!(picture = %id, "Picture returned"),
            Ok(ReuseOutcome::Retired(record)) => {
                if let Some(image) = record.image {
                    self.binder.unbind(image);
                }
                StatsCounters::bump(&self.session.stats.records_dismissed);
                info!(picture = %id, "Dismissing returned picture");
                self.session.emit(VdaEvent::DismissPictureBuffer(id));
                if self.decoder_tx.send(Task::PictureRetired).is_err() {
                    debug!("Decoder thread gone, dropping retire notice");
                }
            }
            Err(e) => {
                self.session.fail(&e);
            }
        }
    }
}
