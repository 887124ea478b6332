pub mod address;
pub mod bus;
pub mod buttons;
pub mod config;
pub mod device;
pub mod dimming;
pub mod directory;
pub mod hal;
pub mod router;
pub mod scheduler;
pub mod supervisor;
pub mod topics;
pub mod topology;

pub use address::{BusTarget, UnifiedAddress};
pub use buttons::{ButtonEngine, ButtonEvent};
pub use config::PersistentConfig;
pub use device::Device;
pub use directory::{SlaveDirectory, SlaveRecord};
pub use hal::{LampBus, LinkStatus, MqttSession, Platform, SessionError, StorageError};
pub use router::Command;
pub use scheduler::{Scheduler, TimerHandle, TimerTask};
pub use topics::*;
