//! Lamp-bus opcode constants.
//!
//! The subset of the bus command set this device issues. The electrical
//! protocol, frame retries and send-twice rules for configuration
//! commands belong to the bus driver behind [`crate::hal::LampBus`].

pub const OFF: u8 = 0x00;
pub const UP: u8 = 0x01;
pub const DOWN: u8 = 0x02;
pub const RECALL_MAX: u8 = 0x05;
pub const ON_AND_STEP_UP: u8 = 0x08;

/// Programs the fade time from the data transfer register.
pub const SET_FADE_TIME: u8 = 0x2E;

pub const QUERY_STATUS: u8 = 0x90;
pub const QUERY_ACTUAL_LEVEL: u8 = 0xA0;
/// Response carries fade time in the high nibble, fade rate in the low.
pub const QUERY_FADE_TIME_RATE: u8 = 0xA5;
pub const QUERY_GROUPS_0_7: u8 = 0xC0;
pub const QUERY_GROUPS_8_15: u8 = 0xC1;

/// Special-command address byte loading the data transfer register.
pub const DTR0: u8 = 0xA3;

pub const MAX_LEVEL: u8 = 254;
pub const MAX_FADE_TIME: u8 = 15;

/// Fade time encoded in the high nibble of a QUERY_FADE_TIME_RATE reply.
pub fn fade_time_from_reply(reply: u8) -> u8 {
    reply >> 4
}
