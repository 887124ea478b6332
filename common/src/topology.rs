//! Topology publisher.
//!
//! Emits the full device/node/property description on every (re)connect.
//! Nothing is cached between connects: the slave directory can change
//! after a re-scan, so every topic segment is generated from live state.
//! The `$nodes` aggregate and the `ready` marker come last; an observer
//! that sees them has seen the whole tree.

use crate::{
    config::{PersistentConfig, BUTTON_COUNT, MAPPING_SLOTS, RELAY_COUNT},
    directory::SlaveDirectory,
    topics,
};

/// One retained publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

struct TreeBuilder {
    prefix: String,
    messages: Vec<Message>,
    nodes: Vec<String>,
}

impl TreeBuilder {
    fn new(device_id: &str) -> Self {
        Self {
            prefix: topics::device_prefix(device_id),
            messages: Vec::new(),
            nodes: Vec::new(),
        }
    }

    fn push(&mut self, topic: String, payload: impl Into<String>) {
        self.messages.push(Message {
            topic,
            payload: payload.into(),
        });
    }

    fn device_attr(&mut self, attr: &str, value: impl Into<String>) {
        self.push(format!("{}/{attr}", self.prefix), value);
    }

    fn node(&mut self, node: &str, name: &str, node_type: &str, properties: &[Property<'_>]) {
        self.nodes.push(node.to_string());
        self.push(format!("{}/{node}/$name", self.prefix), name);
        self.push(format!("{}/{node}/$type", self.prefix), node_type);
        let list: Vec<&str> = properties.iter().map(|p| p.id).collect();
        self.push(
            format!("{}/{node}/$properties", self.prefix),
            list.join(","),
        );
        for property in properties {
            let base = format!("{}/{node}/{}", self.prefix, property.id);
            self.push(format!("{base}/$name"), property.name);
            self.push(format!("{base}/$datatype"), property.datatype);
            self.push(
                format!("{base}/$settable"),
                if property.settable { "true" } else { "false" },
            );
            if !property.format.is_empty() {
                self.push(format!("{base}/$format"), property.format);
            }
            self.push(base, property.value.clone());
        }
    }
}

struct Property<'a> {
    id: &'a str,
    name: &'a str,
    datatype: &'a str,
    settable: bool,
    format: &'a str,
    value: String,
}

fn settable<'a>(id: &'a str, name: &'a str, datatype: &'a str, format: &'a str, value: String) -> Property<'a> {
    Property {
        id,
        name,
        datatype,
        settable: true,
        format,
        value,
    }
}

fn readonly<'a>(id: &'a str, name: &'a str, datatype: &'a str, value: String) -> Property<'a> {
    Property {
        id,
        name,
        datatype,
        settable: false,
        format: "",
        value,
    }
}

fn dotted(quad: &[u8; 4]) -> String {
    format!("{}.{}.{}.{}", quad[0], quad[1], quad[2], quad[3])
}

pub fn network_value(config: &PersistentConfig) -> String {
    format!(
        "{}/{}/{}",
        dotted(&config.ip),
        dotted(&config.netmask),
        dotted(&config.gateway)
    )
}

pub fn broker_value(config: &PersistentConfig) -> String {
    format!("{}:{}", dotted(&config.broker), config.broker_port)
}

pub fn mapping_value(mapping: &[u8; MAPPING_SLOTS]) -> String {
    mapping
        .iter()
        .map(|slot| slot.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// The complete retained description tree, in publish order. The caller
/// publishes each message retained, in order.
pub fn topology_messages(
    config: &PersistentConfig,
    directory: &SlaveDirectory,
    relay_states: &[bool],
) -> Vec<Message> {
    let mut tree = TreeBuilder::new(&config.device_id);

    tree.device_attr("$homie", topics::CONVENTION_VERSION);
    tree.device_attr("$name", config.device_id.clone());

    tree.node(
        "config",
        "Configuration",
        "config",
        &[
            settable("network", "Network", "string", "ip/mask/gateway", network_value(config)),
            settable("mqttbroker", "MQTT broker", "string", "host:port", broker_value(config)),
            settable("deviceid", "Device id", "string", "", config.device_id.clone()),
            settable("commission", "Commission bus", "boolean", "", "false".to_string()),
            settable("save", "Save config", "boolean", "", "false".to_string()),
            settable("reset", "Reset config", "boolean", "", "false".to_string()),
            settable("reboot", "Reboot", "boolean", "", "false".to_string()),
        ],
    );

    for button in 0..BUTTON_COUNT {
        let node = format!("button{button}");
        let name = format!("Button {button}");
        let mut properties = vec![settable(
            "config",
            "Click mapping",
            "string",
            "unified addresses, comma separated",
            mapping_value(&config.mappings[button]),
        )];
        let press_ids = ["press1", "press2", "press3", "press4", "press5"];
        let press_names = ["1 click", "2 clicks", "3 clicks", "4 clicks", "5 clicks"];
        // Press events flow out of the device only; no /set route exists
        // for them.
        for (id, name) in press_ids.into_iter().zip(press_names) {
            properties.push(readonly(id, name, "boolean", "false".to_string()));
        }
        tree.node(&node, &name, "button", &properties);
    }

    for short in directory.present_shorts() {
        let node = format!("slave{short}");
        let name = format!("Slave {short}");
        tree.node(&node, &name, "slave", &lamp_properties());
    }

    for group in directory.groups_in_use() {
        let node = format!("group{group}");
        let name = format!("Group {group}");
        tree.node(&node, &name, "group", &lamp_properties());
    }

    for relay in 0..RELAY_COUNT {
        let node = format!("relay{relay}");
        let name = format!("Relay {relay}");
        let value = relay_states
            .get(relay)
            .map(|on| on.to_string())
            .unwrap_or_else(|| "false".to_string());
        tree.node(
            &node,
            &name,
            "relay",
            &[settable("on", "On", "boolean", "", value)],
        );
    }

    // Published last so observers never act on a partial topology.
    let nodes = tree.nodes.join(",");
    tree.device_attr("$nodes", nodes);
    tree.device_attr("$state", topics::STATE_READY);

    tree.messages
}

fn lamp_properties() -> Vec<Property<'static>> {
    vec![
        settable("arc", "Brightness", "integer", "0:254", String::new()),
        settable("cmd", "Raw command", "integer", "0:255", String::new()),
    ]
}
