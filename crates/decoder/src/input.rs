//! Bitstream side: input buffer pool, timestamp surrogates, and in-order
//! end-of-bitstream notification.
//!
//! ```text
//!   decode() ──► pending FIFO ──► take_free() ──► fill ──► give_to_hardware()
//!                                      ▲                          │
//!                                      └──── return_free() ◄── take_back()
//!                                                          (EmptyBufferDone)
//! ```
//!
//! A buffer value lives either in the free list or in the at-hardware table,
//! never both; handing it to the component moves it.

use std::collections::{BTreeMap, HashMap, VecDeque};

use vda_common::{BitstreamId, VdaError};

use crate::omx::{BufferFlags, BufferHandle};

/// Origins kept for timestamp resolution; older entries are evicted.
pub(crate) const MAX_TIMESTAMP_ORIGINS: usize = 64;

// ---------------------------------------------------------------------------
// Input buffer
// ---------------------------------------------------------------------------

/// One hardware input buffer and what it currently carries.
#[derive(Debug)]
pub(crate) struct InputFrameBuffer {
    handle: BufferHandle,
    capacity: usize,
    staging: Vec<u8>,
    correlation: Option<BitstreamId>,
    timestamp: i64,
    flags: BufferFlags,
}

impl InputFrameBuffer {
    pub(crate) fn new(handle: BufferHandle, capacity: usize) -> Self {
        Self {
            handle,
            capacity,
            staging: Vec::new(),
            correlation: None,
            timestamp: 0,
            flags: BufferFlags::default(),
        }
    }

    pub(crate) fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy one chunk in. Fails (leaving the buffer untouched) when the chunk
    /// exceeds the capacity.
    pub(crate) fn fill(
        &mut self,
        id: BitstreamId,
        bytes: &[u8],
        timestamp: i64,
    ) -> Result<(), VdaError> {
        if bytes.len() > self.capacity {
            return Err(VdaError::ChunkTooLarge {
                id,
                size: bytes.len(),
                capacity: self.capacity,
            });
        }
        self.staging.clear();
        self.staging.extend_from_slice(bytes);
        self.correlation = Some(id);
        self.timestamp = timestamp;
        self.flags = BufferFlags::default();
        Ok(())
    }

    /// Turn the buffer into the zero-length end-of-stream marker.
    pub(crate) fn mark_end_of_stream(&mut self, timestamp: i64) {
        self.staging.clear();
        self.correlation = None;
        self.timestamp = timestamp;
        self.flags = BufferFlags { end_of_stream: true };
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.staging
    }

    pub(crate) fn bytes_used(&self) -> usize {
        self.staging.len()
    }

    pub(crate) fn correlation(&self) -> Option<BitstreamId> {
        self.correlation
    }

    pub(crate) fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub(crate) fn flags(&self) -> BufferFlags {
        self.flags
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct InputPool {
    free: VecDeque<InputFrameBuffer>,
    at_hardware: HashMap<BufferHandle, InputFrameBuffer>,
}

impl InputPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, buffer: InputFrameBuffer) {
        self.free.push_back(buffer);
    }

    pub(crate) fn take_free(&mut self) -> Option<InputFrameBuffer> {
        self.free.pop_front()
    }

    /// Put back a buffer taken with `take_free` that never reached hardware.
    pub(crate) fn return_free(&mut self, buffer: InputFrameBuffer) {
        self.free.push_front(buffer);
    }

    pub(crate) fn give_to_hardware(&mut self, buffer: InputFrameBuffer) {
        self.at_hardware.insert(buffer.handle, buffer);
    }

    /// Reclaim a buffer the component reports as consumed.
    pub(crate) fn take_back(&mut self, handle: BufferHandle) -> Result<InputFrameBuffer, VdaError> {
        self.at_hardware.remove(&handle).ok_or_else(|| {
            VdaError::InvalidArgument(format!("EmptyBufferDone for unknown input {handle:?}"))
        })
    }

    pub(crate) fn release(&mut self, buffer: InputFrameBuffer) {
        self.free.push_back(buffer);
    }

    /// Move every at-hardware buffer back to the free list. Used when a
    /// teardown phase is forced after the component stopped answering.
    pub(crate) fn reclaim_all(&mut self) -> usize {
        let reclaimed = self.at_hardware.len();
        let mut handles: Vec<BufferHandle> = self.at_hardware.keys().copied().collect();
        handles.sort();
        for handle in handles {
            if let Some(buffer) = self.at_hardware.remove(&handle) {
                self.free.push_back(buffer);
            }
        }
        reclaimed
    }

    /// Remove every buffer from the pool, free or not.
    pub(crate) fn drain(&mut self) -> Vec<InputFrameBuffer> {
        self.reclaim_all();
        self.free.drain(..).collect()
    }

    pub(crate) fn all_free(&self) -> bool {
        self.at_hardware.is_empty()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn at_hardware_count(&self) -> usize {
        self.at_hardware.len()
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Strictly increasing hardware timestamps derived from client timestamps.
///
/// The component orders output by timestamp and misbehaves on duplicates, so
/// each submission is stamped with `max(client_ts, last + 1)` and the origin
/// is remembered to map decoded frames back onto bitstream ids.
#[derive(Debug, Default)]
pub(crate) struct TimestampSurrogate {
    last: Option<i64>,
    origins: BTreeMap<i64, (BitstreamId, i64)>,
}

impl TimestampSurrogate {
    pub(crate) fn stamp(&mut self, id: BitstreamId, client_ts: i64) -> i64 {
        let ts = match self.last {
            Some(last) => client_ts.max(last.saturating_add(1)),
            None => client_ts,
        };
        self.last = Some(ts);
        self.origins.insert(ts, (id, client_ts));
        while self.origins.len() > MAX_TIMESTAMP_ORIGINS {
            self.origins.pop_first();
        }
        ts
    }

    /// Timestamp for the end-of-stream marker.
    pub(crate) fn flush_marker(&mut self, offset: i64) -> i64 {
        let ts = self.last.unwrap_or(0).saturating_add(offset);
        self.last = Some(ts);
        ts
    }

    pub(crate) fn resolve(&mut self, hw_ts: i64) -> Option<(BitstreamId, i64)> {
        self.origins.remove(&hw_ts)
    }

    pub(crate) fn clear(&mut self) {
        self.last = None;
        self.origins.clear();
    }
}

// ---------------------------------------------------------------------------
// End-of-bitstream ordering
// ---------------------------------------------------------------------------

/// Releases `NotifyEndOfBitstreamBuffer` in submission order even when the
/// chunks complete out of order (zero-length chunks complete immediately).
#[derive(Debug, Default)]
pub(crate) struct CompletionQueue {
    order: VecDeque<(BitstreamId, bool)>,
}

impl CompletionQueue {
    pub(crate) fn submitted(&mut self, id: BitstreamId) {
        self.order.push_back((id, false));
    }

    /// Mark `id` complete and return every id now releasable, in order.
    pub(crate) fn complete(&mut self, id: BitstreamId) -> Vec<BitstreamId> {
        if let Some(entry) = self.order.iter_mut().find(|(i, done)| *i == id && !*done) {
            entry.1 = true;
        }
        let mut ready = Vec::new();
        while let Some((head, true)) = self.order.front().copied() {
            self.order.pop_front();
            ready.push(head);
        }
        ready
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(n: u64, capacity: usize) -> InputPool {
        let mut pool = InputPool::new();
        for i in 0..n {
            pool.add(InputFrameBuffer::new(BufferHandle(i + 1), capacity));
        }
        pool
    }

    // -----------------------------------------------------------------------
    // Pool
    // -----------------------------------------------------------------------

    #[test]
    fn ownership_moves_between_free_and_hardware() {
        let mut pool = pool_of(2, 16);
        let mut buf = pool.take_free().unwrap();
        buf.fill(BitstreamId(1), &[1, 2, 3], 10).unwrap();
        let handle = buf.handle();
        pool.give_to_hardware(buf);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.at_hardware_count(), 1);
        assert!(!pool.all_free());

        let back = pool.take_back(handle).unwrap();
        assert_eq!(back.correlation(), Some(BitstreamId(1)));
        assert_eq!(back.payload(), &[1, 2, 3]);
        pool.release(back);
        assert!(pool.all_free());
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn unknown_handle_is_rejected() {
        let mut pool = pool_of(1, 16);
        assert!(matches!(
            pool.take_back(BufferHandle(99)),
            Err(VdaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn oversize_chunk_is_refused() {
        let mut buf = InputFrameBuffer::new(BufferHandle(1), 4);
        let err = buf.fill(BitstreamId(5), &[0; 5], 0).unwrap_err();
        assert_eq!(
            err,
            VdaError::ChunkTooLarge {
                id: BitstreamId(5),
                size: 5,
                capacity: 4
            }
        );
        assert_eq!(buf.bytes_used(), 0);
    }

    #[test]
    fn reclaim_and_drain() {
        let mut pool = pool_of(3, 8);
        for _ in 0..2 {
            let b = pool.take_free().unwrap();
            pool.give_to_hardware(b);
        }
        assert_eq!(pool.reclaim_all(), 2);
        assert!(pool.all_free());
        assert_eq!(pool.drain().len(), 3);
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn end_of_stream_marker_is_empty() {
        let mut buf = InputFrameBuffer::new(BufferHandle(1), 8);
        buf.fill(BitstreamId(1), &[9; 8], 5).unwrap();
        buf.mark_end_of_stream(100);
        assert_eq!(buf.bytes_used(), 0);
        assert!(buf.flags().end_of_stream);
        assert_eq!(buf.correlation(), None);
        assert_eq!(buf.timestamp(), 100);
    }

    // -----------------------------------------------------------------------
    // Timestamps
    // -----------------------------------------------------------------------

    #[test]
    fn surrogate_is_strictly_increasing() {
        let mut ts = TimestampSurrogate::default();
        assert_eq!(ts.stamp(BitstreamId(1), 1000), 1000);
        assert_eq!(ts.stamp(BitstreamId(2), 1000), 1001);
        assert_eq!(ts.stamp(BitstreamId(3), 500), 1002);
        assert_eq!(ts.stamp(BitstreamId(4), 5000), 5000);
        assert_eq!(ts.resolve(1001), Some((BitstreamId(2), 1000)));
        assert_eq!(ts.resolve(1001), None);
    }

    #[test]
    fn flush_marker_advances_past_last() {
        let mut ts = TimestampSurrogate::default();
        ts.stamp(BitstreamId(1), 40);
        assert_eq!(ts.flush_marker(100_000), 100_040);
        assert_eq!(ts.stamp(BitstreamId(2), 50), 100_041);
        ts.clear();
        assert_eq!(ts.stamp(BitstreamId(3), 50), 50);
    }

    #[test]
    fn timestamps_near_the_end_of_the_range_saturate() {
        let mut ts = TimestampSurrogate::default();
        assert_eq!(ts.stamp(BitstreamId(1), i64::MAX), i64::MAX);
        assert_eq!(ts.stamp(BitstreamId(2), 0), i64::MAX);
        assert_eq!(ts.flush_marker(100_000), i64::MAX);
        assert_eq!(ts.resolve(i64::MAX), Some((BitstreamId(2), 0)));
    }

    #[test]
    fn origins_are_bounded() {
        let mut ts = TimestampSurrogate::default();
        for i in 0..(MAX_TIMESTAMP_ORIGINS as i64 + 10) {
            ts.stamp(BitstreamId(i as i32), i);
        }
        assert_eq!(ts.resolve(0), None);
        assert!(ts.resolve(MAX_TIMESTAMP_ORIGINS as i64 + 9).is_some());
    }

    // -----------------------------------------------------------------------
    // Completion order
    // -----------------------------------------------------------------------

    #[test]
    fn completion_is_released_in_submission_order() {
        let mut q = CompletionQueue::default();
        for id in [1, 2, 3] {
            q.submitted(BitstreamId(id));
        }
        assert!(q.complete(BitstreamId(2)).is_empty());
        assert_eq!(q.complete(BitstreamId(1)), vec![BitstreamId(1), BitstreamId(2)]);
        assert_eq!(q.complete(BitstreamId(3)), vec![BitstreamId(3)]);
        assert_eq!(q.outstanding(), 0);
    }

    #[test]
    fn repeated_ids_complete_one_at_a_time() {
        let mut q = CompletionQueue::default();
        q.submitted(BitstreamId(7));
        q.submitted(BitstreamId(7));
        assert_eq!(q.complete(BitstreamId(7)), vec![BitstreamId(7)]);
        assert_eq!(q.outstanding(), 1);
        assert_eq!(q.complete(BitstreamId(7)), vec![BitstreamId(7)]);
    }
}
