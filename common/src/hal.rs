//! Collaborator contracts.
//!
//! The engine never touches hardware or sockets directly; the lamp bus,
//! the broker session and the board (storage, relays, buttons, reset)
//! each enter through one of these traits. All calls are synchronous and
//! may block the single thread of control for the duration of a bus or
//! network transaction; that stall is bounded by the collaborators, not
//! handled here.

use thiserror::Error;

use crate::address::BusTarget;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,
    #[error("broker transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage access out of bounds at offset {offset}, len {len}")]
    OutOfBounds { offset: usize, len: usize },
    #[error("write-back verification failed")]
    VerifyFailed,
    #[error("storage i/o error: {0}")]
    Io(String),
}

/// Reported by the session collaborator's link-status primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up { has_address: bool },
    Down,
}

/// The bus driver. `command` returns the response frame when the opcode
/// elicits one; `None` means no endpoint answered (or the opcode has no
/// reply), never an error.
pub trait LampBus {
    fn command(&mut self, target: BusTarget, opcode: u8) -> Option<u8>;
    fn set_level(&mut self, target: BusTarget, level: u8);
    fn send_special(&mut self, opcode: u8, data: u8);
    /// Runs bus commissioning. `only_unassigned` restricts address
    /// assignment to endpoints without a short address.
    fn commission(&mut self, only_unassigned: bool);
}

/// The pub/sub session. Inbound messages are not part of this trait: the
/// embedding loop delivers them to `Device::handle_message` from
/// whatever receive path the session implementation has.
pub trait MqttSession {
    fn connect(
        &mut self,
        client_id: &str,
        will_topic: &str,
        will_payload: &[u8],
    ) -> Result<(), SessionError>;
    fn disconnect(&mut self);
    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), SessionError>;
    fn subscribe(&mut self, pattern: &str) -> Result<(), SessionError>;
    fn link_status(&self) -> LinkStatus;
    /// Brings the network interface up. Idempotent.
    fn bring_link_up(&mut self);
    /// Forces interface re-initialization after a flaky-link detection.
    fn reinit_link(&mut self);
}

/// The board: raw byte storage, relay outputs, button inputs, and the
/// reset path.
pub trait Platform {
    fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;
    fn set_relay(&mut self, index: u8, on: bool);
    fn relay(&self, index: u8) -> bool;
    fn button_pressed(&self, index: u8) -> bool;
    /// Requests a full hardware reset. On real hardware this stops
    /// feeding the watchdog and never returns; host implementations exit.
    fn restart(&mut self);
}
