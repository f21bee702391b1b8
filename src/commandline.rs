use crate::mqtt::MqttConfig;
use breezart_lib::topics::DEFAULT_DEVICE_ID;
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::time::Duration;

/// Parses a poll interval: a plain number is taken as milliseconds, anything
/// else as a `humantime` duration ("5s", "1m 30s").
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let interval = match s.parse::<u64>() {
        Ok(millis) => Duration::from_millis(millis),
        Err(_) => {
            humantime::parse_duration(s).map_err(|e| format!("Invalid interval '{s}': {e}"))?
        }
    };
    if interval.is_zero() {
        return Err("Update interval must be greater than zero".to_string());
    }
    Ok(interval)
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSwitch {
    On,
    Off,
}

impl PowerSwitch {
    pub fn is_on(&self) -> bool {
        *self == PowerSwitch::On
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Run the MQTT bridge: poll the unit, publish its state and execute
    /// commands received over MQTT. This is the default.
    #[clap(verbatim_doc_comment)]
    Daemon,

    /// Read one snapshot from the unit and print it as JSON.
    Read,

    /// Set the fan speed step.
    SetSpeed {
        /// Speed step, 0 to 10.
        #[arg(allow_negative_numbers = true)]
        speed: i32,
    },

    /// Set the target temperature.
    SetTemperature {
        /// Temperature in °C, 10 to 30.
        #[arg(allow_negative_numbers = true)]
        temperature: i32,
    },

    /// Switch the unit on or off.
    SetPower {
        #[arg(value_enum)]
        state: PowerSwitch,
    },
}

const fn about_text() -> &'static str {
    "Breezart to MQTT bridge - Monitor and control Breezart ventilation units via MQTT and Home Assistant."
}

#[derive(Parser, Debug)]
#[command(name="breezart2mqtt", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -q for warnings only, -v for debug, -vv for trace. Default is info.
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// What to do; runs the bridge when omitted.
    #[command(subcommand)]
    pub command: Option<CliCommands>,

    /// Host name or address of the unit, optionally with a port.
    #[arg(global = true, long, env = "BREEZART_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Round-trip timeout for one request to the unit.
    /// Examples: "3s", "500ms".
    #[arg(global = true, long, env = "BREEZART_TIMEOUT", default_value = "3s", value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Duration,

    /// Interval between two state polls.
    /// A plain number is milliseconds, otherwise e.g. "5s" or "1m".
    #[arg(global = true, long, env = "UPDATE_INTERVAL", default_value = "5000", value_parser = parse_interval, verbatim_doc_comment)]
    pub update_interval: Duration,

    /// Device identifier used in topic names and discovery documents.
    #[arg(global = true, long, env = "DEVICE_ID", default_value = DEFAULT_DEVICE_ID)]
    pub device_id: String,

    /// URL of the MQTT broker.
    #[arg(global = true, long, env = "MQTT_BROKER", default_value = MqttConfig::DEFAULT_BROKER)]
    pub mqtt_broker: String,

    #[arg(global = true, long, env = "MQTT_USER", default_value = "user")]
    pub mqtt_user: String,

    #[arg(global = true, long, env = "MQTT_PASSWORD", default_value = "", hide_env_values = true)]
    pub mqtt_password: String,
}

impl CliArgs {
    pub fn action(&self) -> CliCommands {
        self.command.clone().unwrap_or(CliCommands::Daemon)
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            broker: self.mqtt_broker.clone(),
            user: self.mqtt_user.clone(),
            password: self.mqtt_password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn interval_formats() {
        assert_eq!(parse_interval("5000"), Ok(Duration::from_millis(5000)));
        assert_eq!(parse_interval(" 250 "), Ok(Duration::from_millis(250)));
        assert_eq!(parse_interval("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_interval("1m 30s"), Ok(Duration::from_secs(90)));
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("soon").is_err());
    }

    #[test]
    fn subcommands() {
        let args = CliArgs::try_parse_from(["breezart2mqtt", "--host", "10.0.0.7", "set-speed", "4"])
            .unwrap();
        assert_eq!(args.host, "10.0.0.7");
        assert_eq!(args.action(), CliCommands::SetSpeed { speed: 4 });

        let args = CliArgs::try_parse_from(["breezart2mqtt", "set-power", "off"]).unwrap();
        assert_eq!(
            args.action(),
            CliCommands::SetPower {
                state: PowerSwitch::Off
            }
        );

        let args = CliArgs::try_parse_from(["breezart2mqtt", "set-speed", "-1"]).unwrap();
        assert_eq!(args.action(), CliCommands::SetSpeed { speed: -1 });

        assert!(CliArgs::try_parse_from(["breezart2mqtt", "set-power", "maybe"]).is_err());
    }

    #[test]
    fn daemon_is_the_default() {
        let args = CliArgs::try_parse_from(["breezart2mqtt", "--device-id", "hall"]).unwrap();
        assert_eq!(args.action(), CliCommands::Daemon);
        assert_eq!(args.device_id, "hall");
        assert_eq!(args.mqtt_config().password, args.mqtt_password);
    }
}
