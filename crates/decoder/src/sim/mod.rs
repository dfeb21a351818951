//! Simulated OMX hardware.
//!
//! A software stand-in for the platform decoder so the accelerator can be
//! exercised end to end without a device: [`SimulatedCore`] opens
//! components that run on their own thread, honour state transitions, port
//! flushes and buffer ownership, and emit one decoded frame per non-empty
//! input buffer. [`SimScript`] scripts resolution changes, hidden frames,
//! hardware faults and stalled acknowledgments.
//!
//! [`RecordingSurface`] is the matching surface layer: it hands out image
//! ids and records every frame written into them.

mod component;
mod surface;

pub use component::{SimComponent, SimulatedCore};
pub use surface::{RecordingSurface, SurfaceWrite};

use vda_common::Resolution;

use crate::omx::OmxState;

/// Fault code raised by [`SimScript::fault_after`].
pub const SIM_FAULT_CODE: u32 = 0x8000_1001;

/// What the simulated hardware will do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimScript {
    /// Resolution of the first frame.
    pub initial: Resolution,
    /// `(frame index, resolution)` pairs, in increasing frame order.
    pub resizes: Vec<(u64, Resolution)>,
    /// Every n-th frame is decoded but not meant for display.
    pub hide_every: Option<u64>,
    /// Raise a hardware fault instead of decoding frame n.
    pub fault_after: Option<u64>,
    /// Never acknowledge a transition into this state.
    pub stall_on: Option<OmxState>,
    /// Make `open` fail as if the component did not exist.
    pub fail_open: bool,
}

impl Default for SimScript {
    fn default() -> Self {
        Self::new(Resolution::VGA)
    }
}

impl SimScript {
    pub fn new(initial: Resolution) -> Self {
        Self {
            initial,
            resizes: Vec::new(),
            hide_every: None,
            fault_after: None,
            stall_on: None,
            fail_open: false,
        }
    }

    pub fn resize_at(mut self, frame: u64, size: Resolution) -> Self {
        self.resizes.push((frame, size));
        self.resizes.sort_by_key(|(f, _)| *f);
        self
    }

    pub fn hide_every(mut self, n: u64) -> Self {
        self.hide_every = Some(n.max(1));
        self
    }

    pub fn fault_after(mut self, frames: u64) -> Self {
        self.fault_after = Some(frames);
        self
    }

    pub fn stall_on(mut self, state: OmxState) -> Self {
        self.stall_on = Some(state);
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Resolution of frame `index`.
    pub fn size_for(&self, index: u64) -> Resolution {
        self.resizes
            .iter()
            .take_while(|(from, _)| *from <= index)
            .last()
            .map_or(self.initial, |(_, size)| *size)
    }

    pub fn is_shown(&self, index: u64) -> bool {
        self.hide_every.map_or(true, |n| (index + 1) % n != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_follows_resizes() {
        let script = SimScript::new(Resolution::VGA)
            .resize_at(10, Resolution::FHD)
            .resize_at(3, Resolution::HD);
        assert_eq!(script.size_for(0), Resolution::VGA);
        assert_eq!(script.size_for(2), Resolution::VGA);
        assert_eq!(script.size_for(3), Resolution::HD);
        assert_eq!(script.size_for(9), Resolution::HD);
        assert_eq!(script.size_for(10), Resolution::FHD);
    }

    #[test]
    fn hidden_frames() {
        let script = SimScript::default().hide_every(3);
        let shown: Vec<bool> = (0..6).map(|i| script.is_shown(i)).collect();
        assert_eq!(shown, vec![true, true, false, true, true, false]);
        assert!(SimScript::default().is_shown(2));
    }
}
