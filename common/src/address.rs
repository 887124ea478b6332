//! The unified address codec.
//!
//! Every actuation target on the device lives in a single byte-sized
//! address space: bus short addresses, bus group addresses, a reserved
//! scene range, and local relay outputs. Button mappings and network
//! commands both speak this space.

use crate::directory::SlaveDirectory;

/// A value in the unified address space. 0-63 short address, 64-79 group,
/// 80-95 reserved scene range, 96+ relay index.
pub type UnifiedAddress = u8;

pub const MAX_SHORT_ADDRESS: u8 = 64;
pub const GROUP_BASE: u8 = 64;
pub const GROUP_COUNT: u8 = 16;
pub const SCENE_BASE: u8 = 80;
pub const RELAY_BASE: u8 = 96;

/// An addressable target on the lamp bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusTarget {
    Short(u8),
    Group(u8),
}

/// Decodes a unified address into a bus target. Scene and relay ranges
/// are not bus targets and yield `None`.
pub fn to_bus_target(addr: UnifiedAddress) -> Option<BusTarget> {
    match addr {
        0..=63 => Some(BusTarget::Short(addr)),
        64..=79 => Some(BusTarget::Group(addr - GROUP_BASE)),
        _ => None,
    }
}

/// Encodes a bus target back into the unified space. Inverse of
/// [`to_bus_target`] for the 0-79 range.
pub fn from_bus_target(target: BusTarget) -> UnifiedAddress {
    match target {
        BusTarget::Short(short) => short,
        BusTarget::Group(group) => GROUP_BASE + group,
    }
}

/// Decodes a relay index for addresses at or above the relay base.
pub fn relay_index(addr: UnifiedAddress) -> Option<u8> {
    addr.checked_sub(RELAY_BASE)
}

pub fn is_scene(addr: UnifiedAddress) -> bool {
    (SCENE_BASE..RELAY_BASE).contains(&addr)
}

/// Picks the short address that stands in for a group's shared dim/poll
/// state: the first present member of the group. When no member is
/// present the group index itself is returned; nothing answers that
/// short address, so the gesture goes nowhere.
pub fn representative_short_address(group: u8, directory: &SlaveDirectory) -> u8 {
    directory
        .group_members(group)
        .next()
        .unwrap_or(group)
}
