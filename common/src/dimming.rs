//! Dim-ramp bookkeeping and the arc-poll cadence table.
//!
//! State is tracked per representative short address: a group dims
//! through one designated member so repeated holds on the same group
//! never hold two conflicting ramp states. The side-effectful ramp and
//! poll operations live on [`crate::device::Device`], which owns the bus
//! and scheduler; this module owns the data.

use std::collections::HashMap;

use crate::scheduler::TimerHandle;

/// Step-repeat period, bounded below by the bus's minimum step duration.
pub const DIM_STEP_PERIOD_MS: u64 = 150;
pub const ARC_POLL_PERIOD_MS: u64 = 500;

/// Readback polls scheduled after a direct level set, indexed by fade
/// time. Longer fades settle later and get proportionally more polls;
/// fade time 15 runs ~92 s, which at the 500 ms cadence needs 184.
pub const ARC_POLL_COUNTS: [u32; 16] = [
    2, 3, 4, 5, 6, 8, 10, 13, 18, 25, 34, 47, 66, 92, 130, 184,
];

pub fn poll_count_for_fade(fade: u8) -> u32 {
    ARC_POLL_COUNTS[usize::from(fade.min(15))]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimDirection {
    Up,
    Down,
}

impl DimDirection {
    pub fn flipped(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DimState {
    pub direction: DimDirection,
    pub step_timer: Option<TimerHandle>,
    pub poll_timer: Option<TimerHandle>,
}

impl Default for DimState {
    fn default() -> Self {
        Self {
            direction: DimDirection::Up,
            step_timer: None,
            poll_timer: None,
        }
    }
}

/// Dim state per representative short address.
#[derive(Debug, Default)]
pub struct DimStates {
    states: HashMap<u8, DimState>,
}

impl DimStates {
    pub fn entry(&mut self, representative: u8) -> &mut DimState {
        self.states.entry(representative).or_default()
    }

    pub fn get(&self, representative: u8) -> Option<&DimState> {
        self.states.get(&representative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn poll_counts_grow_with_fade_time() {
        assert_eq!(poll_count_for_fade(0), 2);
        assert_eq!(poll_count_for_fade(15), 184);
        for fade in 1..16u8 {
            assert!(poll_count_for_fade(fade) > poll_count_for_fade(fade - 1));
        }
        // Out-of-range fade values clamp instead of panicking.
        assert_eq!(poll_count_for_fade(200), 184);
    }

    #[test]
    fn direction_flip_is_involutive() {
        assert_eq!(DimDirection::Up.flipped(), DimDirection::Down);
        assert_eq!(DimDirection::Down.flipped().flipped(), DimDirection::Down);
    }
}
