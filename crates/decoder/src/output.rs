//! Output side: picture records, the rotating hardware output buffer, and the
//! geometry-change ("grow") handshake.
//!
//! All of it lives behind one lock, [`OutputContext`]. The decoder thread
//! touches it when the hardware returns the output buffer and while it waits
//! for the client to assign textures; the output thread touches it to deliver
//! frames and recycle returned pictures; the client thread touches it to
//! answer a grow request.
//!
//! ```text
//!                   install_records()
//!                          │
//!                          ▼
//!   ┌──────── Free ──take_free_record()──► Pending ──finish_delivery()──► AtClient
//!   │          ▲                                                            │
//!   │          └──────────────────── reuse() ◄─────────────────────────────┘
//!   │                                   │ (should_destroy)
//!   └─ install_records() ──► retired ◄──┘   ──► unbind + DismissPictureBuffer
//! ```
//!
//! A record marked `should_destroy` never re-enters the free list and is only
//! retired once the client no longer holds it.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;

use vda_common::{
    BitstreamId, DecodedVideoFrame, GeometryDescriptor, PictureBuffer, PictureBufferId,
    VdaError, VdaResult,
};

use crate::surface::{EglImage, SyncFence};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum RecordState {
    /// In the free list, ready to receive a frame.
    Free,
    /// Taken by the output thread, frame being written.
    Pending,
    /// Delivered through `PictureReady`, not yet returned.
    AtClient,
}

pub(crate) struct OutputRecord {
    pub(crate) buffer: PictureBuffer,
    pub(crate) image: Option<EglImage>,
    pub(crate) geometry: GeometryDescriptor,
    pub(crate) state: RecordState,
    pub(crate) should_destroy: bool,
    pub(crate) fence: Option<Box<dyn SyncFence>>,
}

impl OutputRecord {
    pub(crate) fn id(&self) -> PictureBufferId {
        self.buffer.id
    }
}

impl fmt::Debug for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputRecord")
            .field("id", &self.buffer.id)
            .field("image", &self.image)
            .field("state", &self.state)
            .field("should_destroy", &self.should_destroy)
            .field("fenced", &self.fence.is_some())
            .finish()
    }
}

/// Partition of the record set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordCensus {
    pub free: usize,
    pub pending: usize,
    pub at_client: usize,
    /// Held by the client and waiting to be dismissed on return.
    pub pending_destroy: usize,
}

impl RecordCensus {
    pub fn total(&self) -> usize {
        self.free + self.pending + self.at_client + self.pending_destroy
    }
}

/// A record taken for delivery.
pub(crate) struct DeliverySlot {
    pub(crate) id: PictureBufferId,
    pub(crate) image: Option<EglImage>,
    pub(crate) fence: Option<Box<dyn SyncFence>>,
}

pub(crate) enum ReuseOutcome {
    Freed,
    Retired(OutputRecord),
}

// ---------------------------------------------------------------------------
// Rotating buffer, current frame, grow slot
// ---------------------------------------------------------------------------

/// Where the single hardware output buffer currently is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum RotatingBuffer {
    Unallocated,
    /// Queued with `fill_this_buffer`.
    AtHardware,
    /// Returned with a frame that is not yet delivered or dropped.
    Held,
    /// Returned and not re-queued.
    Idle,
}

/// Decoded frame waiting for delivery, with the bitstream it came from.
#[derive(Clone, Debug)]
pub(crate) struct PendingFrame {
    pub(crate) frame: DecodedVideoFrame,
    pub(crate) origin: Option<(BitstreamId, i64)>,
}

#[derive(Debug)]
pub(crate) enum GrowSlot {
    Idle,
    Pending {
        geometry: GeometryDescriptor,
        count: usize,
    },
    Assigned(Vec<PictureBuffer>),
    /// The waiter gave up; a late assignment is ignored.
    Abandoned,
}

// ---------------------------------------------------------------------------
// State behind the lock
// ---------------------------------------------------------------------------

pub(crate) struct OutputState {
    records: BTreeMap<PictureBufferId, OutputRecord>,
    free: VecDeque<PictureBufferId>,
    pub(crate) buffer: RotatingBuffer,
    current: Option<PendingFrame>,
    grow: GrowSlot,
    active_geometry: Option<GeometryDescriptor>,
    /// Set by reset, destroy and errors; wakes and fails a grow wait.
    pub(crate) abort_grow: bool,
    /// Frames arriving while set are dropped instead of delivered.
    pub(crate) dropping: bool,
}

impl OutputState {
    fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            free: VecDeque::new(),
            buffer: RotatingBuffer::Unallocated,
            current: None,
            grow: GrowSlot::Idle,
            active_geometry: None,
            abort_grow: false,
            dropping: false,
        }
    }

    // -- current frame --------------------------------------------------------

    /// Make `frame` the current frame. Returns the one it superseded, which
    /// only happens when the hardware returns the buffer twice.
    pub(crate) fn set_current(&mut self, frame: PendingFrame) -> Option<PendingFrame> {
        self.current.replace(frame)
    }

    pub(crate) fn take_current(&mut self) -> Option<PendingFrame> {
        self.current.take()
    }

    pub(crate) fn current(&self) -> Option<&PendingFrame> {
        self.current.as_ref()
    }

    // -- grow -----------------------------------------------------------------

    pub(crate) fn active_geometry(&self) -> Option<GeometryDescriptor> {
        self.active_geometry
    }

    pub(crate) fn needs_grow(&self, geometry: &GeometryDescriptor) -> bool {
        self.active_geometry.as_ref() != Some(geometry)
    }

    pub(crate) fn begin_grow(&mut self, geometry: GeometryDescriptor, count: usize) -> VdaResult<()> {
        if matches!(self.grow, GrowSlot::Pending { .. } | GrowSlot::Assigned(_)) {
            return Err(VdaError::InvalidArgument(
                "picture buffer request already outstanding".to_string(),
            ));
        }
        self.grow = GrowSlot::Pending { geometry, count };
        Ok(())
    }

    pub(crate) fn grow_pending(&self) -> bool {
        matches!(self.grow, GrowSlot::Pending { .. })
    }

    /// Client answer to a grow request. `Ok(false)` means the request was
    /// abandoned and the assignment is ignored.
    pub(crate) fn assign(&mut self, buffers: Vec<PictureBuffer>) -> VdaResult<bool> {
        match self.grow {
            GrowSlot::Pending { geometry, count } => {
                if buffers.len() != count {
                    return Err(VdaError::InvalidArgument(format!(
                        "expected {count} picture buffers, got {}",
                        buffers.len()
                    )));
                }
                let mut seen = HashSet::new();
                for b in &buffers {
                    if !b.size.contains(geometry.size) {
                        return Err(VdaError::InvalidArgument(format!(
                            "picture buffer {} is {}, need {}",
                            b.id, b.size, geometry.size
                        )));
                    }
                    if !seen.insert(b.id) || self.records.contains_key(&b.id) {
                        return Err(VdaError::InvalidArgument(format!(
                            "picture buffer id {} reused",
                            b.id
                        )));
                    }
                }
                self.grow = GrowSlot::Assigned(buffers);
                Ok(true)
            }
            GrowSlot::Abandoned => {
                self.grow = GrowSlot::Idle;
                Ok(false)
            }
            GrowSlot::Idle | GrowSlot::Assigned(_) => Err(VdaError::InvalidArgument(
                "picture buffers assigned without a request".to_string(),
            )),
        }
    }

    fn take_assignment(&mut self) -> Option<Vec<PictureBuffer>> {
        match std::mem::replace(&mut self.grow, GrowSlot::Idle) {
            GrowSlot::Assigned(buffers) => Some(buffers),
            other => {
                self.grow = other;
                None
            }
        }
    }

    fn abandon_grow(&mut self) {
        if matches!(self.grow, GrowSlot::Pending { .. }) {
            self.grow = GrowSlot::Abandoned;
        }
    }

    /// Add freshly bound records for `geometry` and mark every other record
    /// for destruction. Returns the records that can be retired right away.
    pub(crate) fn install_records(
        &mut self,
        bound: Vec<(PictureBuffer, EglImage)>,
        geometry: GeometryDescriptor,
    ) -> Vec<OutputRecord> {
        for record in self.records.values_mut() {
            if record.geometry != geometry {
                record.should_destroy = true;
            }
        }
        let retired = self.retire_marked();

        for (buffer, image) in bound {
            self.records.insert(
                buffer.id,
                OutputRecord {
                    buffer,
                    image: Some(image),
                    geometry,
                    state: RecordState::Free,
                    should_destroy: false,
                    fence: None,
                },
            );
            self.free.push_back(buffer.id);
        }
        self.active_geometry = Some(geometry);
        retired
    }

    // -- delivery -------------------------------------------------------------

    pub(crate) fn take_free_record(&mut self) -> Option<DeliverySlot> {
        while let Some(id) = self.free.pop_front() {
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            if record.should_destroy {
                continue;
            }
            record.state = RecordState::Pending;
            return Some(DeliverySlot {
                id,
                image: record.image,
                fence: record.fence.take(),
            });
        }
        None
    }

    pub(crate) fn finish_delivery(&mut self, id: PictureBufferId) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if record.state == RecordState::Pending => {
                record.state = RecordState::AtClient;
                true
            }
            _ => false,
        }
    }

    /// Put a record taken for delivery back at the head of the free list.
    pub(crate) fn abort_delivery(&mut self, id: PictureBufferId) {
        if let Some(record) = self.records.get_mut(&id) {
            if record.state == RecordState::Pending {
                record.state = RecordState::Free;
                self.free.push_front(id);
            }
        }
    }

    pub(crate) fn has_free_record(&self) -> bool {
        !self.free.is_empty()
    }

    // -- reuse ----------------------------------------------------------------

    pub(crate) fn reuse(
        &mut self,
        id: PictureBufferId,
        fence: Option<Box<dyn SyncFence>>,
    ) -> VdaResult<ReuseOutcome> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(VdaError::UnknownPictureBuffer(id))?;
        if record.state != RecordState::AtClient {
            return Err(VdaError::InvalidArgument(format!(
                "picture buffer {id} returned while not held by the client"
            )));
        }
        if record.should_destroy {
            return self
                .records
                .remove(&id)
                .map(ReuseOutcome::Retired)
                .ok_or(VdaError::UnknownPictureBuffer(id));
        }
        record.state = RecordState::Free;
        record.fence = fence;
        self.free.push_back(id);
        Ok(ReuseOutcome::Freed)
    }

    // -- accounting -----------------------------------------------------------

    pub(crate) fn census(&self) -> RecordCensus {
        let mut census = RecordCensus::default();
        for record in self.records.values() {
            match (record.state, record.should_destroy) {
                (RecordState::Free, _) => census.free += 1,
                (RecordState::Pending, _) => census.pending += 1,
                (RecordState::AtClient, false) => census.at_client += 1,
                (RecordState::AtClient, true) => census.pending_destroy += 1,
            }
        }
        census
    }

    pub(crate) fn has_pending_writes(&self) -> bool {
        self.records
            .values()
            .any(|r| r.state == RecordState::Pending)
    }

    /// Whether the hardware output buffer is out of our hands.
    pub(crate) fn buffer_busy(&self) -> bool {
        matches!(self.buffer, RotatingBuffer::AtHardware | RotatingBuffer::Held)
    }

    /// Forget the active geometry and mark every record for destruction, so
    /// the next displayable frame requests a fresh record set.
    pub(crate) fn clear_geometry(&mut self) {
        self.active_geometry = None;
        for record in self.records.values_mut() {
            record.should_destroy = true;
        }
    }

    /// Remove free records marked for destruction.
    pub(crate) fn retire_marked(&mut self) -> Vec<OutputRecord> {
        let ids: Vec<PictureBufferId> = self
            .records
            .values()
            .filter(|r| r.should_destroy && r.state == RecordState::Free)
            .map(OutputRecord::id)
            .collect();
        self.free.retain(|id| !ids.contains(id));
        ids.iter().filter_map(|id| self.records.remove(id)).collect()
    }

    /// Whether a record marked for destruction is still out of our hands.
    pub(crate) fn has_marked_records(&self) -> bool {
        self.records.values().any(|r| r.should_destroy)
    }

    /// Remove every record (teardown).
    pub(crate) fn drain_records(&mut self) -> Vec<OutputRecord> {
        self.free.clear();
        self.active_geometry = None;
        std::mem::take(&mut self.records).into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// The output lock plus the condition variable the grow wait sleeps on.
pub(crate) struct OutputContext {
    state: Mutex<OutputState>,
    grow_cv: Condvar,
}

impl OutputContext {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(OutputState::new()),
            grow_cv: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock()
    }

    /// Wake the grow waiter after an assignment.
    pub(crate) fn notify_assigned(&self) {
        self.grow_cv.notify_all();
    }

    /// Fail any grow wait and start dropping frames.
    pub(crate) fn abort(&self) {
        {
            let mut st = self.state.lock();
            st.abort_grow = true;
            st.dropping = true;
        }
        self.grow_cv.notify_all();
    }

    /// Fail any grow wait without touching delivery.
    pub(crate) fn interrupt_grow(&self) {
        self.state.lock().abort_grow = true;
        self.grow_cv.notify_all();
    }

    /// Accept grow requests and deliver frames again.
    pub(crate) fn resume(&self) {
        let mut st = self.state.lock();
        st.abort_grow = false;
        st.dropping = false;
    }

    /// Block until the client assigns buffers for the outstanding request.
    /// Returns `None` when the wait was aborted. The lock is released while
    /// sleeping.
    pub(crate) fn wait_for_assignment(&self) -> Option<Vec<PictureBuffer>> {
        let mut st = self.state.lock();
        loop {
            if let Some(buffers) = st.take_assignment() {
                return Some(buffers);
            }
            if st.abort_grow {
                st.abandon_grow();
                return None;
            }
            self.grow_cv.wait(&mut st);
        }
    }
}
