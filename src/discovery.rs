//! Home Assistant MQTT discovery documents.
//!
//! The bridge publishes one climate entity and three sensors, all retained, so
//! Home Assistant picks the device up without manual configuration.
use crate::topics::{CommandTopic, InfoTopic, Topics};
use serde_json::{json, Value};

pub const DISCOVERY_PREFIX: &str = "homeassistant";

const VALUE_TEMPLATE: &str = "{{ value_json.value }}";

/// One discovery document and the topic it is published on.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}

fn base_payload(topics: &Topics) -> Value {
    let device_id = topics.device_id();
    json!({
        "availability": [{ "topic": topics.availability() }],
        "device": {
            "identifiers": [device_id],
            "manufacturer": "Breezart",
            "model": "550 Lux",
            "name": "Breezart 550 Lux",
        },
        "origin": { "name": "Breezart Control" },
        "enabled_by_default": true,
        "platform": "mqtt",
        "unique_id": format!("{device_id}_breezart"),
    })
}

fn merge(target: &mut Value, fields: Value) {
    if let (Value::Object(target), Value::Object(fields)) = (target, fields) {
        target.extend(fields);
    }
}

/// Merges `fields` into the shared base payload.
fn with_base(topics: &Topics, fields: Value) -> Value {
    let mut payload = base_payload(topics);
    merge(&mut payload, fields);
    payload
}

fn message(component: &str, object_id: &str, payload: Value) -> DiscoveryMessage {
    DiscoveryMessage {
        topic: format!("{DISCOVERY_PREFIX}/{component}/{object_id}/config"),
        payload,
        retain: true,
    }
}

fn climate(topics: &Topics) -> DiscoveryMessage {
    let device_id = topics.device_id();
    let object_id = format!("{device_id}_hvac");
    let fan_modes = (1..=10).map(|speed| speed.to_string()).collect::<Vec<_>>();
    let payload = with_base(
        topics,
        json!({
            "min_temp": 15,
            "max_temp": 30,
            "modes": ["off", "heat", "fan_only"],
            "mode_state_topic": topics.state(InfoTopic::Mode),
            "mode_state_template": VALUE_TEMPLATE,
            "mode_command_topic": topics.command(CommandTopic::Mode),
            "current_temperature_topic": topics.state(InfoTopic::Temperature),
            "current_temperature_template": VALUE_TEMPLATE,
            "temperature_state_topic": topics.state(InfoTopic::TargetTemperature),
            "temperature_state_template": VALUE_TEMPLATE,
            "temperature_command_topic": topics.command(CommandTopic::Temperature),
            "fan_modes": fan_modes,
            "fan_mode_state_topic": topics.state(InfoTopic::FanMode),
            "fan_mode_state_template": VALUE_TEMPLATE,
            "fan_mode_command_topic": topics.command(CommandTopic::FanMode),
            "unique_id": format!("{object_id}_breezart"),
            "precision": 0.1,
            "temp_step": 1,
            "temperature_unit": "C",
        }),
    );
    message("climate", &object_id, payload)
}

fn sensor(topics: &Topics, info: InfoTopic, fields: Value) -> DiscoveryMessage {
    let object_id = format!("{}_{}", topics.device_id(), info.field());
    let mut payload = with_base(
        topics,
        json!({
            "object_id": object_id,
            "state_topic": topics.state(info),
            "unique_id": format!("{object_id}_breezart"),
            "value_template": VALUE_TEMPLATE,
        }),
    );
    merge(&mut payload, fields);
    message("sensor", &object_id, payload)
}

/// All discovery documents for the device behind `topics`.
pub fn discovery_messages(topics: &Topics) -> Vec<DiscoveryMessage> {
    vec![
        climate(topics),
        sensor(
            topics,
            InfoTopic::Speed,
            json!({
                "entity_category": "config",
                "command_topic": topics.command(CommandTopic::Speed),
                "unit_of_measurement": "%",
            }),
        ),
        sensor(
            topics,
            InfoTopic::Power,
            json!({
                "device_class": "power",
                "state_class": "measurement",
                "unit_of_measurement": "W",
            }),
        ),
        sensor(
            topics,
            InfoTopic::PowerConsumption,
            json!({
                "device_class": "power",
                "state_class": "measurement",
                "unit_of_measurement": "kWh",
            }),
        ),
    ]
}
