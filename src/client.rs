//! Synchronous client for the Breezart ventilation unit.
//!
//! [`DeviceClient`] combines the register codec in [`crate::protocol`], the
//! decoders in [`crate::state`] and a [`Transport`]. It owns the session
//! counter, so every request it sends carries a fresh session id and every
//! reply is checked against it.
//!
//! # Example
//!
//! ```no_run
//! use breezart_lib::{client::DeviceClient, transport::{HttpTransport, DEFAULT_TIMEOUT}};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = HttpTransport::new("192.168.1.50", DEFAULT_TIMEOUT)?;
//!     let mut client = DeviceClient::new(transport);
//!
//!     let snapshot = client.read_snapshot()?;
//!     println!("Supply air: {} °C", snapshot.main.temperature());
//!
//!     client.write_speed(4)?;
//!     Ok(())
//! }
//! ```
use crate::error::Result;
use crate::protocol::{self as proto, RegisterMap, RegisterOperation, SessionCounter};
use crate::state::{self, DeviceSnapshot, MainState, SensorTargetState};
use crate::transport::Transport;

/// Client for one device reachable through `T`.
///
/// All methods block until the device answered or the transport gave up.
/// Nothing is retried.
#[derive(Debug)]
pub struct DeviceClient<T> {
    transport: T,
    sessions: SessionCounter,
}

impl<T: Transport> DeviceClient<T> {
    /// Creates a client whose first request carries session id 1.
    pub fn new(transport: T) -> Self {
        Self::with_sessions(transport, SessionCounter::new())
    }

    /// Creates a client whose session ids continue from `sessions`.
    pub fn with_sessions(transport: T, sessions: SessionCounter) -> Self {
        Self {
            transport,
            sessions,
        }
    }

    /// The transport the client sends its frames through.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Performs one read round trip and returns the registers.
    fn read(&mut self, op: &RegisterOperation) -> Result<RegisterMap> {
        let (request, session) = proto::encode(op, &mut self.sessions);
        let response = self.transport.exchange(&request)?;
        proto::decode(&response, session)
    }

    /// Performs one write round trip and checks the acknowledgement.
    fn write(&mut self, op: &RegisterOperation) -> Result<()> {
        let (request, session) = proto::encode(op, &mut self.sessions);
        let response = self.transport.exchange(&request)?;
        proto::acknowledge(&response, session)
    }

    /// Reads the unit status block: temperature, humidity, fan feedback,
    /// status flags, error and warning codes.
    ///
    /// # Returns
    ///
    /// The decoded [`MainState`].
    ///
    /// # Errors
    ///
    /// * [`crate::Error::Transport`] if the round trip failed or timed out.
    /// * [`crate::Error::SessionMismatch`] if the reply belongs to another request.
    /// * [`crate::Error::DeviceFault`] if the device rejected the read.
    /// * [`crate::Error::Decode`] if the reply lacks a register of the block.
    pub fn read_main_state(&mut self) -> Result<MainState> {
        let map = self.read(&RegisterOperation::read_input(
            proto::READ_MAIN_STATE_REG_ADDR,
            proto::READ_MAIN_STATE_REG_QUAN,
        )?)?;
        Ok(state::decode_main_state(&map)?)
    }

    /// Reads setpoints, user mode flags, filter life and power draw.
    ///
    /// # Errors
    ///
    /// Same as [`DeviceClient::read_main_state`].
    pub fn read_sensor_target_state(&mut self) -> Result<SensorTargetState> {
        let map = self.read(&RegisterOperation::read_input(
            proto::READ_SENSOR_STATE_REG_ADDR,
            proto::READ_SENSOR_STATE_REG_QUAN,
        )?)?;
        Ok(state::decode_sensor_target_state(&map)?)
    }

    /// Reads the five energy counters and returns their sum in kWh.
    ///
    /// One round trip per counter. The first failing read aborts the sum.
    ///
    /// # Errors
    ///
    /// Same as [`DeviceClient::read_main_state`].
    pub fn read_energy_total(&mut self) -> Result<f64> {
        let mut readings = [0u16; proto::READ_ENERGY_REG_ADDRS.len()];
        for (reading, address) in readings.iter_mut().zip(proto::READ_ENERGY_REG_ADDRS) {
            let map = self.read(&RegisterOperation::read_holding(
                address,
                proto::READ_ENERGY_REG_QUAN,
            )?)?;
            *reading = state::decode_energy(&map)?;
        }
        Ok(state::energy_total(&readings))
    }

    /// Reads main state, setpoints and energy, in that order.
    ///
    /// The first failing read aborts the snapshot; seven round trips when all
    /// succeed.
    ///
    /// # Errors
    ///
    /// The error of the first failing read, see
    /// [`DeviceClient::read_main_state`].
    pub fn read_snapshot(&mut self) -> Result<DeviceSnapshot> {
        let main = self.read_main_state()?;
        let sensors = self.read_sensor_target_state()?;
        let energy = self.read_energy_total()?;
        Ok(DeviceSnapshot {
            main,
            sensors,
            energy,
        })
    }

    /// Sets the fan speed step (0 to 10).
    ///
    /// # Errors
    ///
    /// * [`crate::Error::Validation`] if `speed` is out of range; nothing is sent then.
    /// * [`crate::Error::Transport`], [`crate::Error::SessionMismatch`] or
    ///   [`crate::Error::DeviceFault`] if the write was not acknowledged.
    pub fn write_speed(&mut self, speed: i32) -> Result<()> {
        let value = proto::write_speed_encode(speed)?;
        self.write(&RegisterOperation::write_single(
            proto::WRITE_SPEED_REG_ADDR,
            value,
        )?)
    }

    /// Sets the target temperature in °C (10 to 30).
    ///
    /// # Errors
    ///
    /// As [`DeviceClient::write_speed`]; out-of-range values are rejected
    /// before anything is sent.
    pub fn write_temperature(&mut self, temperature: i32) -> Result<()> {
        let value = proto::write_temperature_encode(temperature)?;
        self.write(&RegisterOperation::write_single(
            proto::WRITE_TEMPERATURE_REG_ADDR,
            value,
        )?)
    }

    /// Switches the unit on or off.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Transport`], [`crate::Error::SessionMismatch`] or
    /// [`crate::Error::DeviceFault`] if the write was not acknowledged.
    pub fn write_power(&mut self, on: bool) -> Result<()> {
        self.write(&RegisterOperation::write_single(
            proto::WRITE_POWER_REG_ADDR,
            proto::write_power_encode(on),
        )?)
    }
}
