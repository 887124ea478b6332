//! Persistent device configuration.
//!
//! One versioned flat record over a raw byte-addressable store: sentinel
//! byte, device id, network triple, broker address, button-mapping
//! table. Reads and writes are wholesale; durability comes from writing
//! the full record and reading it back for verification. A sentinel
//! mismatch is "no config yet", not corruption: defaults are written.

use serde::{Deserialize, Serialize};

use crate::hal::{Platform, StorageError};

/// Bumped when the record layout changes; old records then read as fresh
/// storage.
pub const CONFIG_MAGIC: u8 = 0xB7;

pub const BUTTON_COUNT: usize = 4;
pub const RELAY_COUNT: usize = 2;
pub const MAPPING_SLOTS: usize = 5;
pub const DEVICE_ID_MAX: usize = 24;

/// sentinel + id len + id field + ip/mask/gw + broker + port + mappings
pub const RECORD_LEN: usize = 1 + 1 + DEVICE_ID_MAX + 12 + 4 + 2 + BUTTON_COUNT * MAPPING_SLOTS;

const DEFAULT_DEVICE_ID: &str = "lampbus-gw";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentConfig {
    pub device_id: String,
    /// All-zero address means dynamic address assignment.
    pub ip: [u8; 4],
    pub netmask: [u8; 4],
    pub gateway: [u8; 4],
    pub broker: [u8; 4],
    pub broker_port: u16,
    /// Per button, unified addresses indexed by click count - 1.
    pub mappings: [[u8; MAPPING_SLOTS]; BUTTON_COUNT],
}

impl Default for PersistentConfig {
    fn default() -> Self {
        let mut mappings = [[0u8; MAPPING_SLOTS]; BUTTON_COUNT];
        for (button, mapping) in mappings.iter_mut().enumerate() {
            mapping[0] = button as u8;
        }
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            ip: [0; 4],
            netmask: [0; 4],
            gateway: [0; 4],
            broker: [192, 168, 1, 100],
            broker_port: 1883,
            mappings,
        }
    }
}

impl PersistentConfig {
    pub fn uses_dynamic_address(&self) -> bool {
        self.ip == [0; 4]
    }

    /// Clamps the device id to the persisted bound and the topic id
    /// charset (lowercase alphanumerics and dashes). An id that clamps
    /// to nothing falls back to the default.
    pub fn sanitize(&mut self) {
        let cleaned: String = self
            .device_id
            .chars()
            .map(|c| c.to_ascii_lowercase())
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
            .take(DEVICE_ID_MAX)
            .collect();
        self.device_id = if cleaned.is_empty() {
            DEFAULT_DEVICE_ID.to_string()
        } else {
            cleaned
        };
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        record[0] = CONFIG_MAGIC;

        let id = self.device_id.as_bytes();
        let id_len = id.len().min(DEVICE_ID_MAX);
        record[1] = id_len as u8;
        record[2..2 + id_len].copy_from_slice(&id[..id_len]);

        let mut offset = 2 + DEVICE_ID_MAX;
        for field in [&self.ip, &self.netmask, &self.gateway, &self.broker] {
            record[offset..offset + 4].copy_from_slice(field.as_slice());
            offset += 4;
        }
        record[offset..offset + 2].copy_from_slice(&self.broker_port.to_be_bytes());
        offset += 2;

        for mapping in &self.mappings {
            record[offset..offset + MAPPING_SLOTS].copy_from_slice(mapping);
            offset += MAPPING_SLOTS;
        }
        record
    }

    /// `None` when the record is short or the sentinel does not match the
    /// current schema. Mapping bytes are not range-checked here; dispatch
    /// treats out-of-range addresses as no-ops.
    pub fn decode(record: &[u8]) -> Option<Self> {
        if record.len() < RECORD_LEN || record[0] != CONFIG_MAGIC {
            return None;
        }

        let id_len = (record[1] as usize).min(DEVICE_ID_MAX);
        let device_id = String::from_utf8(record[2..2 + id_len].to_vec()).ok()?;

        let mut offset = 2 + DEVICE_ID_MAX;
        let mut quads = [[0u8; 4]; 4];
        for quad in &mut quads {
            quad.copy_from_slice(&record[offset..offset + 4]);
            offset += 4;
        }
        let broker_port = u16::from_be_bytes([record[offset], record[offset + 1]]);
        offset += 2;

        let mut mappings = [[0u8; MAPPING_SLOTS]; BUTTON_COUNT];
        for mapping in &mut mappings {
            mapping.copy_from_slice(&record[offset..offset + MAPPING_SLOTS]);
            offset += MAPPING_SLOTS;
        }

        let mut config = Self {
            device_id,
            ip: quads[0],
            netmask: quads[1],
            gateway: quads[2],
            broker: quads[3],
            broker_port,
            mappings,
        };
        config.sanitize();
        Some(config)
    }

    /// Reads the record at offset 0. Fresh or mismatched storage yields
    /// the compiled-in defaults, written back immediately so the next
    /// boot finds a matching sentinel. The boolean is true when defaults
    /// were installed.
    pub fn load<P: Platform>(platform: &mut P) -> (Self, bool) {
        let mut record = [0u8; RECORD_LEN];
        let existing = platform
            .read_bytes(0, &mut record)
            .ok()
            .and_then(|_| Self::decode(&record));

        match existing {
            Some(config) => (config, false),
            None => {
                let defaults = Self::default();
                if let Err(err) = defaults.save(platform) {
                    tracing::warn!("failed to install default config: {err}");
                }
                (defaults, true)
            }
        }
    }

    /// Wholesale write-then-verify. The raw store is not transactional;
    /// the read-back is what guarantees no half-written record is left
    /// behind unnoticed.
    pub fn save<P: Platform>(&self, platform: &mut P) -> Result<(), StorageError> {
        let record = self.encode();
        platform.write_bytes(0, &record)?;

        let mut verify = [0u8; RECORD_LEN];
        platform.read_bytes(0, &mut verify)?;
        if verify != record {
            return Err(StorageError::VerifyFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// In-memory board used across the crate's tests.
    pub struct TestPlatform {
        pub storage: Vec<u8>,
        pub relays: [bool; RELAY_COUNT],
        pub buttons: [bool; BUTTON_COUNT],
        pub restarted: bool,
    }

    impl Default for TestPlatform {
        fn default() -> Self {
            Self {
                storage: vec![0xFF; RECORD_LEN * 2],
                relays: [false; RELAY_COUNT],
                buttons: [false; BUTTON_COUNT],
                restarted: false,
            }
        }
    }

    impl Platform for TestPlatform {
        fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
            let end = offset + buf.len();
            let slice = self
                .storage
                .get(offset..end)
                .ok_or(StorageError::OutOfBounds {
                    offset,
                    len: buf.len(),
                })?;
            buf.copy_from_slice(slice);
            Ok(())
        }

        fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
            let end = offset + bytes.len();
            let slice =
                self.storage
                    .get_mut(offset..end)
                    .ok_or(StorageError::OutOfBounds {
                        offset,
                        len: bytes.len(),
                    })?;
            slice.copy_from_slice(bytes);
            Ok(())
        }

        fn set_relay(&mut self, index: u8, on: bool) {
            if let Some(relay) = self.relays.get_mut(index as usize) {
                *relay = on;
            }
        }

        fn relay(&self, index: u8) -> bool {
            self.relays.get(index as usize).copied().unwrap_or(false)
        }

        fn button_pressed(&self, index: u8) -> bool {
            self.buttons.get(index as usize).copied().unwrap_or(false)
        }

        fn restart(&mut self) {
            self.restarted = true;
        }
    }
}
