//! Inbound command router.
//!
//! Pure parsing from (topic, payload) to a typed [`Command`]; execution
//! lives on the device aggregate. Parsing is strict: anything malformed,
//! out of range, or oversized yields `None` and the message is dropped
//! without an error echo and without partial mutation.

use crate::{
    address::{self, UnifiedAddress, GROUP_BASE, GROUP_COUNT, MAX_SHORT_ADDRESS},
    bus,
    config::{BUTTON_COUNT, RELAY_COUNT},
    topics,
};

/// Dropped before any parsing; a well-formed command never comes close.
pub const MAX_TOPIC_LEN: usize = 128;
pub const MAX_PAYLOAD_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Level set with optional fade-time override.
    SetArc {
        target: UnifiedAddress,
        level: u8,
        fade: Option<u8>,
    },
    /// Raw bus opcode forwarded as-is.
    RawCommand { target: UnifiedAddress, opcode: u8 },
    RelaySet { index: u8, on: bool },
    /// Overwrites the click-2..click-5 mapping slots of one button.
    ButtonConfig { button: u8, slots: Vec<u8> },
    /// `full` re-addresses the whole bus; otherwise only unaddressed
    /// endpoints are assigned.
    Commission { full: bool },
    SaveConfig,
    ResetConfig,
    Reboot,
    SetNetwork {
        ip: [u8; 4],
        netmask: [u8; 4],
        gateway: [u8; 4],
    },
    SetBroker { addr: [u8; 4], port: u16 },
    SetDeviceId(String),
}

/// Parses one inbound message addressed to this device. Returns `None`
/// for anything that is not a valid settable-property write.
pub fn parse(device_id: &str, topic: &str, payload: &str) -> Option<Command> {
    if topic.len() > MAX_TOPIC_LEN || payload.len() > MAX_PAYLOAD_LEN {
        return None;
    }

    let prefix = topics::device_prefix(device_id);
    let local = topic.strip_prefix(prefix.as_str())?.strip_prefix('/')?;
    let local = local.strip_suffix("/set")?;
    let (node, property) = local.split_once('/')?;

    if let Some(index) = node.strip_prefix("slave") {
        let short: u8 = parse_index(index, MAX_SHORT_ADDRESS)?;
        return parse_lamp_property(short, property, payload);
    }
    if let Some(index) = node.strip_prefix("group") {
        let group: u8 = parse_index(index, GROUP_COUNT)?;
        return parse_lamp_property(GROUP_BASE + group, property, payload);
    }
    if let Some(index) = node.strip_prefix("relay") {
        let relay = parse_index(index, RELAY_COUNT as u8)?;
        if property != "on" {
            return None;
        }
        return Some(Command::RelaySet {
            index: relay,
            on: parse_bool(payload)?,
        });
    }
    if let Some(index) = node.strip_prefix("button") {
        let button = parse_index(index, BUTTON_COUNT as u8)?;
        if property != "config" {
            return None;
        }
        return parse_button_config(button, payload);
    }
    if node == "config" {
        return parse_config_property(property, payload);
    }
    None
}

fn parse_lamp_property(target: UnifiedAddress, property: &str, payload: &str) -> Option<Command> {
    match property {
        "arc" => {
            let mut tokens = payload.split(',').map(str::trim);
            let level: u8 = tokens.next()?.parse().ok()?;
            if level > bus::MAX_LEVEL {
                return None;
            }
            let fade = match tokens.next() {
                Some(token) => {
                    let fade: u8 = token.parse().ok()?;
                    if fade > bus::MAX_FADE_TIME {
                        return None;
                    }
                    Some(fade)
                }
                None => None,
            };
            if tokens.next().is_some() {
                return None;
            }
            Some(Command::SetArc {
                target,
                level,
                fade,
            })
        }
        "cmd" => {
            let opcode: u8 = payload.trim().parse().ok()?;
            Some(Command::RawCommand { target, opcode })
        }
        _ => None,
    }
}

fn parse_button_config(button: u8, payload: &str) -> Option<Command> {
    let slots: Option<Vec<u8>> = payload
        .split(',')
        .map(|token| token.trim().parse::<u8>().ok())
        .collect();
    let slots = slots?;
    if slots.is_empty() || slots.len() > 4 {
        return None;
    }
    Some(Command::ButtonConfig { button, slots })
}

fn parse_config_property(property: &str, payload: &str) -> Option<Command> {
    match property {
        "commission" => Some(Command::Commission {
            full: parse_bool(payload)?,
        }),
        "save" => parse_bool(payload)?.then_some(Command::SaveConfig),
        "reset" => parse_bool(payload)?.then_some(Command::ResetConfig),
        "reboot" => parse_bool(payload)?.then_some(Command::Reboot),
        "network" => {
            let mut quads = payload.split('/').map(parse_quad);
            let ip = quads.next()??;
            let netmask = quads.next()??;
            let gateway = quads.next()??;
            if quads.next().is_some() {
                return None;
            }
            Some(Command::SetNetwork {
                ip,
                netmask,
                gateway,
            })
        }
        "mqttbroker" => {
            let (addr, port) = match payload.split_once(':') {
                Some((addr, port)) => (addr, port.trim().parse::<u16>().ok()?),
                None => (payload, 1883),
            };
            Some(Command::SetBroker {
                addr: parse_quad(addr)?,
                port,
            })
        }
        "deviceid" => {
            let id = payload.trim();
            let valid = !id.is_empty()
                && id.len() <= crate::config::DEVICE_ID_MAX
                && id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            valid.then(|| Command::SetDeviceId(id.to_string()))
        }
        _ => None,
    }
}

fn parse_index(token: &str, bound: u8) -> Option<u8> {
    // Reject "slave007"-style aliases so every target has one topic.
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    let index: u8 = token.parse().ok()?;
    (index < bound).then_some(index)
}

fn parse_bool(payload: &str) -> Option<bool> {
    match payload.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_quad(token: &str) -> Option<[u8; 4]> {
    let mut parts = token.trim().split('.');
    let mut quad = [0u8; 4];
    for slot in &mut quad {
        *slot = parts.next()?.parse().ok()?;
    }
    parts.next().is_none().then_some(quad)
}

/// Used by address dispatch: a scene-range or otherwise unreachable
/// unified address is a configured but inert mapping slot.
pub fn is_dispatchable(addr: UnifiedAddress) -> bool {
    if address::is_scene(addr) {
        return false;
    }
    address::to_bus_target(addr).is_some()
        || address::relay_index(addr).is_some_and(|relay| (relay as usize) < RELAY_COUNT)
}
