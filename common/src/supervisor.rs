//! Connection supervisor.
//!
//! Watches the link status reported by the session collaborator and
//! decides whether the broker session must be established, torn down, or
//! the interface re-initialized. The decision is pure; the device
//! executes it.

use crate::hal::LinkStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bring the interface up, connect the broker, republish topology.
    Establish,
    /// Publish the disconnected marker, then close the session.
    Teardown,
    /// Link reports up but no address was acquired: force interface
    /// re-initialization and re-establish. Idempotent against a healthy
    /// session.
    Reinitialize,
}

#[derive(Debug, Default)]
pub struct LinkSupervisor {
    /// `None` until the first evaluation; unknown is treated as up.
    last_up: Option<bool>,
}

impl LinkSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&mut self, status: LinkStatus) -> Option<LinkEvent> {
        let up = matches!(status, LinkStatus::Up { .. });
        let was_up = self.last_up;
        self.last_up = Some(up);

        match (was_up, status) {
            (_, LinkStatus::Up { has_address: false }) => Some(LinkEvent::Reinitialize),
            (None | Some(false), LinkStatus::Up { .. }) => Some(LinkEvent::Establish),
            (Some(true), LinkStatus::Down) => Some(LinkEvent::Teardown),
            (None, LinkStatus::Down) => Some(LinkEvent::Teardown),
            _ => None,
        }
    }
}
