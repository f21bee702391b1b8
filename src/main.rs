//! Breezart to MQTT bridge
//!
//! Polls a Breezart ventilation unit over its HTTP tunnelled register protocol,
//! publishes the state to an MQTT broker together with Home Assistant discovery
//! documents, and executes speed, temperature and power commands received over
//! MQTT. One-shot subcommands read or change the unit directly.
//!
//! The CLI leverages the `breezart_lib` crate for the protocol and client operations.

use anyhow::{Context, Result};
use breezart_lib::{
    client::DeviceClient, safe_client::SafeClient, topics::Topics, transport::HttpTransport,
};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::panic;

mod commandline;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "Breezart bridge started. Log level: {}",
        args.verbose.log_level_filter()
    );

    let transport = HttpTransport::new(&args.host, args.timeout)
        .with_context(|| format!("Cannot create HTTP client for {}", args.host))?;
    info!("Talking to unit at {}", transport.url());
    let mut client = DeviceClient::new(transport);

    match args.action() {
        commandline::CliCommands::Daemon => {
            let topics = Topics::new(args.device_id.as_str());
            info!(
                "Starting daemon mode: device={}, interval={:?}",
                topics.device_id(),
                args.update_interval
            );
            mqtt::run_daemon(
                SafeClient::from_client(client),
                &args.mqtt_config(),
                topics,
                args.update_interval,
            )?;
        }
        commandline::CliCommands::Read => {
            info!("Executing: Read Snapshot");
            let snapshot = client
                .read_snapshot()
                .with_context(|| "Cannot read device state")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).with_context(|| "Cannot format state")?
            );
        }
        commandline::CliCommands::SetSpeed { speed } => {
            info!("Executing: Set Speed to {speed}");
            client
                .write_speed(speed)
                .with_context(|| format!("Failed to set speed to {speed}"))?;
            println!("Speed set to {speed} successfully.");
        }
        commandline::CliCommands::SetTemperature { temperature } => {
            info!("Executing: Set Temperature to {temperature} °C");
            client
                .write_temperature(temperature)
                .with_context(|| format!("Failed to set temperature to {temperature} °C"))?;
            println!("Target temperature set to {temperature} °C successfully.");
        }
        commandline::CliCommands::SetPower { state } => {
            info!("Executing: Set Power {state:?}");
            client
                .write_power(state.is_on())
                .with_context(|| format!("Failed to switch power {state:?}"))?;
            println!(
                "Unit switched {} successfully.",
                if state.is_on() { "on" } else { "off" }
            );
        }
    }

    Ok(())
}
