//! MQTT topic names and the mapping between topics and device data.
//!
//! Every topic is derived from the device identifier `D`:
//!
//! | kind | topic |
//! |---|---|
//! | state | `breezart/{D}_{field}` |
//! | command | `breezart/{D}_{field}/set` |
//! | liveness | `breezart/bridge/state` |
use crate::error::ValidationError;
use crate::state::DeviceSnapshot;
use serde_json::{json, Value};
use std::fmt;

pub const TOPIC_PREFIX: &str = "breezart";
pub const COMMAND_SUFFIX: &str = "set";
pub const DEFAULT_DEVICE_ID: &str = "breezart_1";

pub const ONLINE_PAYLOAD: &str = "online";
pub const OFFLINE_PAYLOAD: &str = "offline";

/// Telemetry fields published on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoTopic {
    Speed,
    Mode,
    FanMode,
    Temperature,
    TargetTemperature,
    Power,
    PowerConsumption,
}

impl InfoTopic {
    pub const ALL: [InfoTopic; 7] = [
        InfoTopic::Speed,
        InfoTopic::Mode,
        InfoTopic::FanMode,
        InfoTopic::Temperature,
        InfoTopic::TargetTemperature,
        InfoTopic::Power,
        InfoTopic::PowerConsumption,
    ];

    pub fn field(&self) -> &'static str {
        match self {
            InfoTopic::Speed => "speed",
            InfoTopic::Mode => "mode",
            InfoTopic::FanMode => "fan_mode",
            InfoTopic::Temperature => "temperature",
            InfoTopic::TargetTemperature => "target_temperature",
            InfoTopic::Power => "power",
            InfoTopic::PowerConsumption => "power_consumption",
        }
    }

    /// The value this field carries for `snapshot`.
    pub fn value(&self, snapshot: &DeviceSnapshot) -> Value {
        match self {
            InfoTopic::Speed => json!(snapshot.speed_percent()),
            InfoTopic::Mode => json!(snapshot.mode().as_str()),
            InfoTopic::FanMode => json!(snapshot.sensors.speed_target),
            InfoTopic::Temperature => json!(snapshot.main.temperature()),
            InfoTopic::TargetTemperature => json!(snapshot.sensors.target_temperature()),
            InfoTopic::Power => json!(snapshot.sensors.power),
            InfoTopic::PowerConsumption => json!(snapshot.energy),
        }
    }

    /// The MQTT payload, `{"value": ...}`.
    pub fn payload(&self, snapshot: &DeviceSnapshot) -> String {
        json!({ "value": self.value(snapshot) }).to_string()
    }
}

/// Topics the bridge accepts commands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTopic {
    Speed,
    Mode,
    FanMode,
    Temperature,
}

impl CommandTopic {
    pub const ALL: [CommandTopic; 4] = [
        CommandTopic::Speed,
        CommandTopic::Mode,
        CommandTopic::FanMode,
        CommandTopic::Temperature,
    ];

    /// The state field whose topic the command hangs off.
    pub fn info(&self) -> InfoTopic {
        match self {
            CommandTopic::Speed => InfoTopic::Speed,
            CommandTopic::Mode => InfoTopic::Mode,
            CommandTopic::FanMode => InfoTopic::FanMode,
            CommandTopic::Temperature => InfoTopic::TargetTemperature,
        }
    }

    /// Turns a payload received on this topic into a command.
    pub fn parse(&self, payload: &str) -> Result<Command, ValidationError> {
        let payload = payload.trim();
        let integer = || {
            payload
                .parse::<i32>()
                .map_err(|_| ValidationError::InvalidPayload(payload.to_string()))
        };
        Ok(match self {
            CommandTopic::Speed | CommandTopic::FanMode => Command::SetSpeed(integer()?),
            CommandTopic::Temperature => Command::SetTemperature(integer()?),
            // TODO: map "fan_only" to the heater mode register once its address is known.
            CommandTopic::Mode => Command::SetPower(payload != "off"),
        })
    }
}

/// A parsed inbound command.
///
/// Range checks happen in the device client, before anything is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetSpeed(i32),
    SetTemperature(i32),
    SetPower(bool),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetSpeed(speed) => write!(f, "set speed to {speed}"),
            Command::SetTemperature(temperature) => {
                write!(f, "set temperature to {temperature} °C")
            }
            Command::SetPower(true) => write!(f, "power on"),
            Command::SetPower(false) => write!(f, "power off"),
        }
    }
}

/// All topic names of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    device_id: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_ID)
    }
}

impl Topics {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self, info: InfoTopic) -> String {
        format!("{TOPIC_PREFIX}/{}_{}", self.device_id, info.field())
    }

    pub fn command(&self, command: CommandTopic) -> String {
        format!("{}/{COMMAND_SUFFIX}", self.state(command.info()))
    }

    pub fn commands(&self) -> Vec<String> {
        CommandTopic::ALL
            .iter()
            .map(|command| self.command(*command))
            .collect()
    }

    /// Bridge liveness, shared by all devices.
    pub fn availability(&self) -> String {
        format!("{TOPIC_PREFIX}/bridge/state")
    }

    /// Recognizes one of this device's command topics.
    pub fn command_topic(&self, topic: &str) -> Option<CommandTopic> {
        CommandTopic::ALL
            .into_iter()
            .find(|command| self.command(*command) == topic)
    }
}
