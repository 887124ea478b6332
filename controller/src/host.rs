//! Host build of the controller.
//!
//! Runs the shared device engine against a simulated lamp bus, a file
//! blob for config storage, and a real MQTT broker through rumqttc's
//! synchronous client. The loop is the same single-threaded cooperative
//! shape as on hardware: tick the device, drain the broker connection
//! with a short receive timeout, repeat.

use std::{
    cell::Cell,
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::Context;
use rumqttc::{Client, Connection, Event, LastWill, MqttOptions, Packet, QoS};
use serde::Deserialize;
use tracing::{debug, info, warn};

use lampbus_common::{
    bus,
    config::{PersistentConfig, RECORD_LEN, RELAY_COUNT},
    BusTarget, Device, LampBus, LinkStatus, MqttSession, Platform, SessionError, StorageError,
};

const RECV_TIMEOUT: Duration = Duration::from_millis(10);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("LAMPBUS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".lampbus"));
    let mut platform = FilePlatform::open(&data_dir)?;
    let lamp_bus = SimulatedBus::load(&data_dir)?;

    // The broker address lives in the persisted config; env vars win for
    // bench setups. Device::new re-reads the same record.
    let (config, _) = PersistentConfig::load(&mut platform);
    let broker_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| {
        let [a, b, c, d] = config.broker;
        format!("{a}.{b}.{c}.{d}")
    });
    let broker_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.broker_port);
    info!(%broker_host, broker_port, "starting host controller");

    let session = HostSession::new(broker_host, broker_port);
    let start = Instant::now();
    let mut device = Device::new(lamp_bus, session, platform, 0);
    let mut connection: Option<Connection> = None;

    loop {
        let now = start.elapsed().as_millis() as u64;
        device.tick(now);

        if let Some(fresh) = device.session.take_connection() {
            connection = Some(fresh);
        }

        let Some(conn) = connection.as_mut() else {
            std::thread::sleep(RECV_TIMEOUT);
            continue;
        };
        match conn.recv_timeout(RECV_TIMEOUT) {
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                let now = start.elapsed().as_millis() as u64;
                device.handle_message(&publish.topic, &publish.payload, now);
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!("broker connection lost: {err}");
                connection = None;
                // Latched until a link check reads it: that check tears
                // the session down, the one after re-establishes.
                device.session.note_flap();
                std::thread::sleep(RECONNECT_BACKOFF);
            }
            Err(_) => {} // receive timeout, nothing pending
        }
    }
}

/// Broker session over the synchronous rumqttc client. The connection
/// half is handed out to the run loop, which owns the receive path.
struct HostSession {
    broker_host: String,
    broker_port: u16,
    client: Option<Client>,
    pending_connection: Option<Connection>,
    /// Set on a broker connection loss, cleared by the status read that
    /// observes it.
    flap: Cell<bool>,
}

impl HostSession {
    fn new(broker_host: String, broker_port: u16) -> Self {
        Self {
            broker_host,
            broker_port,
            client: None,
            pending_connection: None,
            flap: Cell::new(false),
        }
    }

    fn take_connection(&mut self) -> Option<Connection> {
        self.pending_connection.take()
    }

    fn note_flap(&mut self) {
        self.flap.set(true);
    }
}

impl MqttSession for HostSession {
    fn connect(
        &mut self,
        client_id: &str,
        will_topic: &str,
        will_payload: &[u8],
    ) -> Result<(), SessionError> {
        let mut options = MqttOptions::new(client_id, self.broker_host.clone(), self.broker_port);
        options.set_keep_alive(Duration::from_secs(5));
        options.set_last_will(LastWill::new(
            will_topic,
            will_payload.to_vec(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, connection) = Client::new(options, 64);
        self.client = Some(client);
        self.pending_connection = Some(connection);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.disconnect();
        }
        self.pending_connection = None;
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), SessionError> {
        self.client
            .as_ref()
            .ok_or(SessionError::NotConnected)?
            .publish(topic, QoS::AtLeastOnce, retained, payload.to_vec())
            .map_err(|err| SessionError::Transport(err.to_string()))
    }

    fn subscribe(&mut self, pattern: &str) -> Result<(), SessionError> {
        self.client
            .as_ref()
            .ok_or(SessionError::NotConnected)?
            .subscribe(pattern, QoS::AtLeastOnce)
            .map_err(|err| SessionError::Transport(err.to_string()))
    }

    fn link_status(&self) -> LinkStatus {
        if self.flap.take() {
            // Reported exactly once so the supervisor sees the down
            // transition and the up edge that follows it.
            LinkStatus::Down
        } else {
            // The host network stack always has an address.
            LinkStatus::Up { has_address: true }
        }
    }

    fn bring_link_up(&mut self) {}

    fn reinit_link(&mut self) {
        debug!("link reinit requested, nothing to do on the host");
    }
}

/// Raw-byte config storage over a single file, held as an in-memory
/// image and rewritten wholesale on every write so the engine's
/// write-then-verify sees exactly what a reboot would read.
struct FilePlatform {
    path: PathBuf,
    image: Vec<u8>,
    relays: [bool; RELAY_COUNT],
}

const STORAGE_LEN: usize = RECORD_LEN * 2;

impl FilePlatform {
    fn open(data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
        let path = data_dir.join("config.bin");
        // Missing or truncated storage reads as erased flash.
        let mut image = std::fs::read(&path).unwrap_or_default();
        image.resize(STORAGE_LEN.max(image.len()), 0xFF);
        Ok(Self {
            path,
            image,
            relays: [false; RELAY_COUNT],
        })
    }

    fn flush(&self) -> Result<(), StorageError> {
        std::fs::write(&self.path, &self.image).map_err(|err| StorageError::Io(err.to_string()))
    }
}

impl Platform for FilePlatform {
    fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let end = offset + buf.len();
        let slice = self
            .image
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
        let slice = self
            .image
            .get_mut(offset..end)
            .ok_or(StorageError::OutOfBounds {
                offset,
                len: bytes.len(),
            })?;
        slice.copy_from_slice(bytes);
        self.flush()
    }

    fn set_relay(&mut self, index: u8, on: bool) {
        if let Some(relay) = self.relays.get_mut(index as usize) {
            *relay = on;
        }
    }

    fn relay(&self, index: u8) -> bool {
        self.relays.get(index as usize).copied().unwrap_or(false)
    }

    fn button_pressed(&self, _index: u8) -> bool {
        // No physical inputs on the host build.
        false
    }

    fn restart(&mut self) {
        info!("restart requested, exiting");
        std::process::exit(0);
    }
}

/// How far one UP/DOWN command moves a simulated lamp.
const SIM_DIM_STEP: u8 = 8;

#[derive(Debug, Deserialize)]
struct LampFixture {
    short: u8,
    #[serde(default)]
    groups: Vec<u8>,
    #[serde(default)]
    level: u8,
    #[serde(default)]
    fade: u8,
}

#[derive(Debug, Clone, Copy)]
struct SimLamp {
    level: u8,
    fade: u8,
    groups: u16,
}

/// In-process stand-in for the lamp bus. Lamps come from an optional
/// `bus.json` fixture in the data dir.
struct SimulatedBus {
    lamps: BTreeMap<u8, SimLamp>,
    dtr: u8,
}

impl SimulatedBus {
    fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = data_dir.join("bus.json");
        let fixtures = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("malformed bus fixture {}", path.display()))?,
            Err(_) => {
                info!("no bus fixture, simulating three lamps");
                (0..3)
                    .map(|short| LampFixture {
                        short,
                        groups: Vec::new(),
                        level: 0,
                        fade: 0,
                    })
                    .collect()
            }
        };
        Ok(Self::from_fixtures(fixtures))
    }

    fn from_fixtures(fixtures: Vec<LampFixture>) -> Self {
        let mut lamps = BTreeMap::new();
        for fixture in fixtures {
            let groups = fixture
                .groups
                .iter()
                .fold(0u16, |mask, group| mask | 1 << (group % 16));
            lamps.insert(
                fixture.short,
                SimLamp {
                    level: fixture.level,
                    fade: fixture.fade.min(bus::MAX_FADE_TIME),
                    groups,
                },
            );
        }
        Self { lamps, dtr: 0 }
    }

    fn members(&self, target: BusTarget) -> Vec<u8> {
        match target {
            BusTarget::Short(short) => {
                if self.lamps.contains_key(&short) {
                    vec![short]
                } else {
                    Vec::new()
                }
            }
            BusTarget::Group(group) => {
                let bit = 1u16 << (group % 16);
                self.lamps
                    .iter()
                    .filter(|(_, lamp)| lamp.groups & bit != 0)
                    .map(|(short, _)| *short)
                    .collect()
            }
        }
    }
}

impl LampBus for SimulatedBus {
    fn command(&mut self, target: BusTarget, opcode: u8) -> Option<u8> {
        // Queries answer for a single short address only; a group query
        // would collide on a real bus.
        if let BusTarget::Short(short) = target {
            let lamp = self.lamps.get(&short);
            match opcode {
                bus::QUERY_STATUS => return lamp.map(|_| 0),
                bus::QUERY_ACTUAL_LEVEL => return lamp.map(|lamp| lamp.level),
                bus::QUERY_FADE_TIME_RATE => return lamp.map(|lamp| lamp.fade << 4),
                bus::QUERY_GROUPS_0_7 => return lamp.map(|lamp| lamp.groups as u8),
                bus::QUERY_GROUPS_8_15 => return lamp.map(|lamp| (lamp.groups >> 8) as u8),
                _ => {}
            }
        }

        let dtr = self.dtr;
        for short in self.members(target) {
            let Some(lamp) = self.lamps.get_mut(&short) else {
                continue;
            };
            match opcode {
                bus::OFF => lamp.level = 0,
                bus::UP if lamp.level > 0 => {
                    lamp.level = lamp.level.saturating_add(SIM_DIM_STEP).min(bus::MAX_LEVEL)
                }
                bus::DOWN if lamp.level > 0 => {
                    // Dimming down stops at the minimum, it never turns off.
                    lamp.level = lamp.level.saturating_sub(SIM_DIM_STEP).max(1)
                }
                bus::RECALL_MAX => lamp.level = bus::MAX_LEVEL,
                bus::ON_AND_STEP_UP => {
                    lamp.level = if lamp.level == 0 {
                        1
                    } else {
                        lamp.level.saturating_add(SIM_DIM_STEP).min(bus::MAX_LEVEL)
                    }
                }
                bus::SET_FADE_TIME => lamp.fade = dtr.min(bus::MAX_FADE_TIME),
                _ => {}
            }
        }
        None
    }

    fn set_level(&mut self, target: BusTarget, level: u8) {
        for short in self.members(target) {
            if let Some(lamp) = self.lamps.get_mut(&short) {
                lamp.level = level;
            }
        }
    }

    fn send_special(&mut self, opcode: u8, data: u8) {
        if opcode == bus::DTR0 {
            self.dtr = data;
        }
    }

    fn commission(&mut self, only_unassigned: bool) {
        // Fixture lamps are always addressed; nothing to assign.
        info!(only_unassigned, "commissioning simulated bus");
    }
}
