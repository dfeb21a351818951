//! Decoder lifecycle state and session statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle of one accelerator session.
///
/// ```text
///  Uninitialized ─► Initializing ─► Initialized ─► Decoding ◄──┐
///                                        │            │        │
///                                        └──► Resetting ─► AfterReset
///                        any ─► Error          any ─► Destroying
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum DecoderState {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Decoding = 3,
    Resetting = 4,
    AfterReset = 5,
    Destroying = 6,
    Error = 7,
}

impl DecoderState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Initialized,
            3 => Self::Decoding,
            4 => Self::Resetting,
            5 => Self::AfterReset,
            6 => Self::Destroying,
            _ => Self::Error,
        }
    }

    /// States in which new bitstream may be pushed to the hardware.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Initialized | Self::Decoding | Self::AfterReset)
    }
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Atomically readable state value.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(DecoderState::Uninitialized as u8))
    }

    pub(crate) fn get(&self) -> DecoderState {
        DecoderState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next`. Error and Destroying are only left for Destroying;
    /// returns whether the transition happened.
    pub(crate) fn set(&self, next: DecoderState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = DecoderState::from_u8(current);
            let allowed = match from {
                DecoderState::Destroying => false,
                DecoderState::Error => next == DecoderState::Destroying,
                _ => true,
            };
            if !allowed {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Snapshot of session counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    pub inputs_submitted: u64,
    pub frames_decoded: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub geometry_changes: u64,
    pub records_dismissed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) inputs_submitted: AtomicU64,
    pub(crate) frames_decoded: AtomicU64,
    pub(crate) frames_delivered: AtomicU64,
    pub(crate) frames_dropped: AtomicU64,
    pub(crate) geometry_changes: AtomicU64,
    pub(crate) records_dismissed: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DecoderStats {
        DecoderStats {
            inputs_submitted: self.inputs_submitted.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            geometry_changes: self.geometry_changes.load(Ordering::Relaxed),
            records_dismissed: self.records_dismissed.load(Ordering::Relaxed),
        }
    }
}
