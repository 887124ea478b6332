//! Topic names for the convention-based pub/sub tree.

pub const BASE: &str = "homie";
pub const CONVENTION_VERSION: &str = "4.0.0";

pub const STATE_READY: &str = "ready";
pub const STATE_DISCONNECTED: &str = "disconnected";
pub const STATE_LOST: &str = "lost";

pub fn device_prefix(device_id: &str) -> String {
    format!("{BASE}/{device_id}")
}

pub fn state_topic(device_id: &str) -> String {
    format!("{BASE}/{device_id}/$state")
}

/// Wildcard matching every settable property under the device.
pub fn set_pattern(device_id: &str) -> String {
    format!("{BASE}/{device_id}/+/+/set")
}
