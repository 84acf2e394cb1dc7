//! Buffer ownership tracking
//!
//! A slot is in flight from the commit that attached it until the compositor
//! sends `wl_buffer.release` for it. Writing into an in-flight slot could tear
//! the frame the compositor is still reading.

use crate::shm::Slot;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SlotTracker {
    in_flight: [bool; 2],
}

impl SlotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The compositor now owns `slot`
    pub fn presented(&mut self, slot: Slot) {
        self.in_flight[slot.index()] = true;
    }

    /// The compositor handed `slot` back
    pub fn released(&mut self, slot: Slot) {
        if !self.in_flight[slot.index()] {
            debug!("Release for idle slot {:?}", slot);
        }
        self.in_flight[slot.index()] = false;
    }

    pub fn is_in_flight(&self, slot: Slot) -> bool {
        self.in_flight[slot.index()]
    }

    /// Forget all ownership, used when the pool is replaced
    pub fn reset(&mut self) {
        self.in_flight = [false; 2];
    }
}
