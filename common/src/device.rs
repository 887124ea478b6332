//! Device orchestration.
//!
//! `Device` is the single owned aggregate for all runtime state: config,
//! slave directory, button engine, dim states, timer scheduler, link
//! supervisor. The embedding loop calls `tick` on its cadence and
//! forwards inbound publishes to `handle_message`; everything else flows
//! from those two entry points on one thread of control. Bus and broker
//! calls are synchronous and block the whole device for their (bounded)
//! duration; that is the accepted tradeoff of the cooperative model.

use tracing::{debug, info, warn};

use crate::{
    address::{self, BusTarget, UnifiedAddress, GROUP_BASE},
    buttons::{ButtonEngine, ButtonEvent, SAMPLE_PERIOD_MS},
    bus,
    config::{PersistentConfig, BUTTON_COUNT, MAPPING_SLOTS},
    dimming::{self, DimDirection, DimStates, ARC_POLL_PERIOD_MS, DIM_STEP_PERIOD_MS},
    directory::SlaveDirectory,
    hal::{LampBus, MqttSession, Platform},
    router::{self, Command},
    scheduler::{Scheduler, TimerTask},
    supervisor::{LinkEvent, LinkSupervisor},
    topics, topology,
};

pub const LINK_CHECK_PERIOD_MS: u64 = 1_000;

pub struct Device<B, S, P>
where
    B: LampBus,
    S: MqttSession,
    P: Platform,
{
    pub bus: B,
    pub session: S,
    pub platform: P,
    config: PersistentConfig,
    directory: SlaveDirectory,
    buttons: ButtonEngine,
    dim: DimStates,
    scheduler: Scheduler,
    supervisor: LinkSupervisor,
}

impl<B, S, P> Device<B, S, P>
where
    B: LampBus,
    S: MqttSession,
    P: Platform,
{
    /// Boots the device: loads (or installs) the persisted config, scans
    /// the bus, and registers the base timers. The broker session is
    /// established by the first link check.
    pub fn new(bus: B, session: S, mut platform: P, now_ms: u64) -> Self {
        let (config, fresh) = PersistentConfig::load(&mut platform);
        if fresh {
            info!("no persisted config found, defaults installed");
        }

        let mut device = Self {
            bus,
            session,
            platform,
            config,
            directory: SlaveDirectory::new(),
            buttons: ButtonEngine::new(BUTTON_COUNT),
            dim: DimStates::default(),
            scheduler: Scheduler::new(),
            supervisor: LinkSupervisor::new(),
        };
        device.directory.scan(&mut device.bus);
        info!(
            slaves = device.directory.present_shorts().count(),
            "bus scan complete"
        );

        device
            .scheduler
            .every(now_ms, SAMPLE_PERIOD_MS, TimerTask::SampleButtons);
        device
            .scheduler
            .every(now_ms, LINK_CHECK_PERIOD_MS, TimerTask::LinkCheck);
        device
    }

    pub fn config(&self) -> &PersistentConfig {
        &self.config
    }

    pub fn directory(&self) -> &SlaveDirectory {
        &self.directory
    }

    /// One scheduler tick. The embedding loop calls this every iteration
    /// and resets the watchdog itself.
    pub fn tick(&mut self, now_ms: u64) {
        for task in self.scheduler.tick(now_ms) {
            self.dispatch(task, now_ms);
        }
    }

    /// Inbound publish from the session's receive path. Runs on the same
    /// thread as `tick`, never concurrently with it.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8], now_ms: u64) {
        if topic.len() > router::MAX_TOPIC_LEN || payload.len() > router::MAX_PAYLOAD_LEN {
            debug!(topic, len = payload.len(), "dropping oversized message");
            return;
        }
        let Ok(payload) = std::str::from_utf8(payload) else {
            return;
        };
        let Some(command) = router::parse(&self.config.device_id, topic, payload) else {
            debug!(topic, payload, "unroutable message dropped");
            return;
        };
        self.execute(command, now_ms);
    }

    fn dispatch(&mut self, task: TimerTask, now_ms: u64) {
        match task {
            TimerTask::SampleButtons => self.sample_buttons(now_ms),
            TimerTask::LinkCheck => self.check_link(),
            TimerTask::DimStep(target) => self.dim_step(target),
            TimerTask::ArcPoll(target) => self.arc_poll(target),
        }
    }

    // ---- buttons ----

    fn sample_buttons(&mut self, now_ms: u64) {
        let mut levels = [false; BUTTON_COUNT];
        for (index, level) in levels.iter_mut().enumerate() {
            *level = self.platform.button_pressed(index as u8);
        }
        for event in self.buttons.sample(&levels, now_ms) {
            self.handle_button_event(event, now_ms);
        }
    }

    fn handle_button_event(&mut self, event: ButtonEvent, now_ms: u64) {
        match event {
            ButtonEvent::Clicked { button, clicks } => {
                // Every resolved burst is an event, even when its mapping
                // slot actuates nothing.
                self.publish_press(button, clicks);
                let Some(target) = self.mapped_address(button, clicks) else {
                    return;
                };
                debug!(button, clicks, target, "click gesture");
                if address::to_bus_target(target).is_some() {
                    self.toggle(target);
                } else if let Some(relay) = address::relay_index(target) {
                    let on = !self.platform.relay(relay);
                    self.set_relay(relay, on);
                }
            }
            ButtonEvent::HoldStart { button } => {
                // Holds dim through the single-click mapping.
                let Some(target) = self.mapped_address(button, 1) else {
                    return;
                };
                if address::to_bus_target(target).is_some() {
                    self.hold_start(target, now_ms);
                }
            }
            ButtonEvent::HoldStop { button } => {
                let Some(target) = self.mapped_address(button, 1) else {
                    return;
                };
                if address::to_bus_target(target).is_some() {
                    self.hold_stop(target);
                }
            }
        }
    }

    fn mapped_address(&self, button: u8, clicks: u8) -> Option<UnifiedAddress> {
        let slot = usize::from(clicks.saturating_sub(1)).min(MAPPING_SLOTS - 1);
        let addr = self.config.mappings.get(button as usize)?[slot];
        router::is_dispatchable(addr).then_some(addr)
    }

    fn publish_press(&mut self, button: u8, clicks: u8) {
        let topic = format!(
            "{}/button{button}/press{clicks}",
            topics::device_prefix(&self.config.device_id)
        );
        // Gesture events are transient, not retained topology state.
        if let Err(err) = self.session.publish(&topic, b"true", false) {
            debug!("press publish failed: {err}");
        }
    }

    // ---- dimming ----

    fn representative(&self, target: UnifiedAddress) -> u8 {
        match address::to_bus_target(target) {
            Some(BusTarget::Short(short)) => short,
            Some(BusTarget::Group(group)) => {
                address::representative_short_address(group, &self.directory)
            }
            None => target,
        }
    }

    fn hold_start(&mut self, target: UnifiedAddress, now_ms: u64) {
        let Some(bus_target) = address::to_bus_target(target) else {
            return;
        };
        let representative = self.representative(target);
        let level = self
            .bus
            .command(BusTarget::Short(representative), bus::QUERY_ACTUAL_LEVEL);

        let state = self.dim.entry(representative);
        match level {
            Some(0) => state.direction = DimDirection::Up,
            Some(level) if level >= bus::MAX_LEVEL => state.direction = DimDirection::Down,
            // Otherwise keep the stored direction: repeated holds reverse.
            _ => {}
        }
        let direction = state.direction;

        // Stale handles here would double-drive the ramp; cancel before
        // re-arming.
        if let Some(handle) = state.step_timer.take() {
            self.scheduler.cancel(handle);
        }
        if let Some(handle) = state.poll_timer.take() {
            self.scheduler.cancel(handle);
        }

        if level == Some(0) && direction == DimDirection::Up {
            self.bus.command(bus_target, bus::ON_AND_STEP_UP);
        }

        let step_timer =
            self.scheduler
                .every(now_ms, DIM_STEP_PERIOD_MS, TimerTask::DimStep(target));
        let poll_timer =
            self.scheduler
                .every(now_ms, ARC_POLL_PERIOD_MS, TimerTask::ArcPoll(target));
        let state = self.dim.entry(representative);
        state.step_timer = Some(step_timer);
        state.poll_timer = Some(poll_timer);
        debug!(target, representative, ?direction, "dim ramp started");
    }

    fn hold_stop(&mut self, target: UnifiedAddress) {
        let representative = self.representative(target);
        let state = self.dim.entry(representative);
        let step_timer = state.step_timer.take();
        let poll_timer = state.poll_timer.take();
        state.direction = state.direction.flipped();

        if let Some(handle) = step_timer {
            self.scheduler.cancel(handle);
        }
        if let Some(handle) = poll_timer {
            self.scheduler.cancel(handle);
        }
        // One final readback so observers see the settled level.
        self.arc_poll(target);
    }

    fn dim_step(&mut self, target: UnifiedAddress) {
        let Some(bus_target) = address::to_bus_target(target) else {
            return;
        };
        let representative = self.representative(target);
        let opcode = match self.dim.entry(representative).direction {
            DimDirection::Up => bus::UP,
            DimDirection::Down => bus::DOWN,
        };
        self.bus.command(bus_target, opcode);
    }

    /// Sets a level directly, bracketing an optional fade-time override
    /// so concurrent group members never inherit a lingering fade, then
    /// schedules a bounded run of readback polls sized to the fade.
    fn direct_set(&mut self, target: UnifiedAddress, level: u8, fade: Option<u8>, now_ms: u64) {
        let Some(bus_target) = address::to_bus_target(target) else {
            return;
        };
        let representative = self.representative(target);
        let current_fade = self
            .bus
            .command(BusTarget::Short(representative), bus::QUERY_FADE_TIME_RATE)
            .map(bus::fade_time_from_reply);

        let override_fade = fade.filter(|fade| Some(*fade) != current_fade);
        if let Some(new_fade) = override_fade {
            self.bus.send_special(bus::DTR0, new_fade);
            self.bus.command(bus_target, bus::SET_FADE_TIME);
        }

        self.bus.set_level(bus_target, level);

        if let (Some(_), Some(prior)) = (override_fade, current_fade) {
            self.bus.send_special(bus::DTR0, prior);
            self.bus.command(bus_target, bus::SET_FADE_TIME);
        }

        let fade_used = fade.or(current_fade).unwrap_or(0);
        let polls = dimming::poll_count_for_fade(fade_used);
        let state = self.dim.entry(representative);
        if let Some(handle) = state.poll_timer.take() {
            self.scheduler.cancel(handle);
        }
        let poll_timer = self.scheduler.every_limited(
            now_ms,
            ARC_POLL_PERIOD_MS,
            polls,
            TimerTask::ArcPoll(target),
        );
        self.dim.entry(representative).poll_timer = Some(poll_timer);
        debug!(target, level, fade_used, polls, "direct level set");
    }

    fn toggle(&mut self, target: UnifiedAddress) {
        let Some(bus_target) = address::to_bus_target(target) else {
            return;
        };
        let representative = self.representative(target);
        let level = self
            .bus
            .command(BusTarget::Short(representative), bus::QUERY_ACTUAL_LEVEL);
        match level {
            Some(0) => self.bus.set_level(bus_target, bus::MAX_LEVEL),
            Some(_) => self.bus.set_level(bus_target, 0),
            // No answer: nothing to toggle, nothing published.
            None => return,
        }
        self.arc_poll(target);
    }

    /// One brightness readback-and-publish. Group targets fan out to
    /// every present member plus a single group topic carrying the
    /// representative's level.
    fn arc_poll(&mut self, target: UnifiedAddress) {
        let prefix = topics::device_prefix(&self.config.device_id);
        match address::to_bus_target(target) {
            Some(BusTarget::Short(short)) => {
                if let Some(level) = self
                    .bus
                    .command(BusTarget::Short(short), bus::QUERY_ACTUAL_LEVEL)
                {
                    self.publish_retained(&format!("{prefix}/slave{short}/arc"), &level.to_string());
                }
            }
            Some(BusTarget::Group(group)) => {
                let members: Vec<u8> = self.directory.group_members(group).collect();
                let representative = address::representative_short_address(group, &self.directory);
                let mut group_level = None;
                for member in members {
                    let Some(level) = self
                        .bus
                        .command(BusTarget::Short(member), bus::QUERY_ACTUAL_LEVEL)
                    else {
                        continue;
                    };
                    if member == representative {
                        group_level = Some(level);
                    }
                    self.publish_retained(&format!("{prefix}/slave{member}/arc"), &level.to_string());
                }
                if let Some(level) = group_level {
                    self.publish_retained(&format!("{prefix}/group{group}/arc"), &level.to_string());
                }
            }
            None => {}
        }
    }

    // ---- relays ----

    fn set_relay(&mut self, relay: u8, on: bool) {
        self.platform.set_relay(relay, on);
        let topic = format!(
            "{}/relay{relay}/on",
            topics::device_prefix(&self.config.device_id)
        );
        let payload = if on { "true" } else { "false" };
        self.publish_retained(&topic, payload);
        info!(relay, on, "relay switched");
    }

    // ---- command execution ----

    fn execute(&mut self, command: Command, now_ms: u64) {
        match command {
            Command::SetArc {
                target,
                level,
                fade,
            } => self.direct_set(target, level, fade, now_ms),
            Command::RawCommand { target, opcode } => {
                let Some(bus_target) = address::to_bus_target(target) else {
                    return;
                };
                let response = self.bus.command(bus_target, opcode);
                // Group responses collide on the bus and are unreliable by
                // definition; only short-address answers are echoed.
                if target < GROUP_BASE {
                    if let Some(response) = response {
                        let topic = format!(
                            "{}/slave{target}/cmd",
                            topics::device_prefix(&self.config.device_id)
                        );
                        self.publish_retained(&topic, &response.to_string());
                    }
                }
            }
            Command::RelaySet { index, on } => self.set_relay(index, on),
            Command::ButtonConfig { button, slots } => {
                let mapping = &mut self.config.mappings[button as usize];
                for (offset, slot) in slots.iter().enumerate() {
                    mapping[1 + offset] = *slot;
                }
                let value = topology::mapping_value(&self.config.mappings[button as usize]);
                let topic = format!(
                    "{}/button{button}/config",
                    topics::device_prefix(&self.config.device_id)
                );
                self.publish_retained(&topic, &value);
                info!(button, %value, "button mapping updated");
            }
            Command::Commission { full } => {
                info!(full, "commissioning bus");
                self.bus.commission(!full);
                self.directory.scan(&mut self.bus);
                // Node set may have changed; describe it again.
                self.publish_topology();
            }
            Command::SaveConfig => match self.config.save(&mut self.platform) {
                Ok(()) => info!("config persisted"),
                Err(err) => warn!("config save failed: {err}"),
            },
            Command::ResetConfig => {
                self.config = PersistentConfig::default();
                if let Err(err) = self.config.save(&mut self.platform) {
                    warn!("config reset write failed: {err}");
                }
                self.publish_topology();
                info!("config reset to defaults");
            }
            Command::Reboot => {
                info!("reboot requested, letting the watchdog fire");
                self.platform.restart();
            }
            Command::SetNetwork {
                ip,
                netmask,
                gateway,
            } => {
                self.config.ip = ip;
                self.config.netmask = netmask;
                self.config.gateway = gateway;
                let value = topology::network_value(&self.config);
                let topic = format!(
                    "{}/config/network",
                    topics::device_prefix(&self.config.device_id)
                );
                self.publish_retained(&topic, &value);
            }
            Command::SetBroker { addr, port } => {
                self.config.broker = addr;
                self.config.broker_port = port;
                let value = topology::broker_value(&self.config);
                let topic = format!(
                    "{}/config/mqttbroker",
                    topics::device_prefix(&self.config.device_id)
                );
                self.publish_retained(&topic, &value);
            }
            Command::SetDeviceId(id) => {
                // Publishing moves to the new prefix at once; the broker
                // client id, LWT and subscription follow at the next
                // reconnect.
                self.config.device_id = id;
                self.config.sanitize();
                let topic = format!(
                    "{}/config/deviceid",
                    topics::device_prefix(&self.config.device_id)
                );
                let value = self.config.device_id.clone();
                self.publish_retained(&topic, &value);
            }
        }
    }

    // ---- session & topology ----

    fn check_link(&mut self) {
        let status = self.session.link_status();
        match self.supervisor.evaluate(status) {
            Some(LinkEvent::Establish) => self.establish_session(),
            Some(LinkEvent::Teardown) => self.teardown_session(),
            Some(LinkEvent::Reinitialize) => {
                warn!("link up without address, reinitializing interface");
                self.session.reinit_link();
                self.establish_session();
            }
            None => {}
        }
    }

    fn establish_session(&mut self) {
        self.session.bring_link_up();
        let will_topic = topics::state_topic(&self.config.device_id);
        let client_id = self.config.device_id.clone();
        if let Err(err) =
            self.session
                .connect(&client_id, &will_topic, topics::STATE_LOST.as_bytes())
        {
            warn!("broker connect failed: {err}");
            return;
        }
        let pattern = topics::set_pattern(&self.config.device_id);
        if let Err(err) = self.session.subscribe(&pattern) {
            warn!("subscribe failed: {err}");
        }
        self.publish_topology();
        info!(%client_id, "session established");
    }

    fn teardown_session(&mut self) {
        let topic = topics::state_topic(&self.config.device_id);
        self.publish_retained(&topic, topics::STATE_DISCONNECTED);
        self.session.disconnect();
        info!("session closed");
    }

    /// Rebuilds and publishes the whole description tree from live state.
    fn publish_topology(&mut self) {
        let mut relays = Vec::with_capacity(crate::config::RELAY_COUNT);
        for relay in 0..crate::config::RELAY_COUNT {
            relays.push(self.platform.relay(relay as u8));
        }
        let messages = topology::topology_messages(&self.config, &self.directory, &relays);
        for message in messages {
            self.publish_retained(&message.topic, &message.payload);
        }
    }

    fn publish_retained(&mut self, topic: &str, payload: &str) {
        if let Err(err) = self.session.publish(topic, payload.as_bytes(), true) {
            debug!(topic, "publish failed: {err}");
        }
    }
}
