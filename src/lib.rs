//! A library for monitoring and controlling Breezart ventilation units.
//!
//! The unit speaks a Modbus-like register protocol tunnelled through HTTP: each
//! request frame is `POST`ed to the device and the reply frame comes back as the
//! response body. This crate provides:
//!
//! 1.  **The register codec** in [`protocol`]: frame encoding, reply decoding and
//!     session id correlation. Pure functions, no I/O.
//! 2.  **State decoding** in [`state`]: turns register blocks into typed
//!     readings such as temperatures, fan speed, status flags and energy use.
//! 3.  **Clients**: [`client::DeviceClient`] performs the operations over any
//!     [`transport::Transport`], and [`safe_client::SafeClient`] shares one
//!     client between threads while keeping at most one request in flight.
//! 4.  **An MQTT bridge** in [`bridge`], with the topic layout in [`topics`] and
//!     Home Assistant discovery documents in [`discovery`].
//!
//! ## Features
//!
//! - `http-transport`: the blocking [`transport::HttpTransport`].
//! - `bin-dependencies`: everything the `breezart2mqtt` binary needs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use breezart_lib::{
//!     safe_client::SafeClient,
//!     transport::{HttpTransport, DEFAULT_TIMEOUT},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SafeClient::new(HttpTransport::new("192.168.1.50", DEFAULT_TIMEOUT)?);
//!
//!     let snapshot = client.read_snapshot()?;
//!     println!(
//!         "Mode: {}, supply air {} °C, speed {} %",
//!         snapshot.mode(),
//!         snapshot.main.temperature(),
//!         snapshot.speed_percent()
//!     );
//!
//!     client.write_temperature(22)?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod client;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod safe_client;
pub mod state;
pub mod topics;
pub mod transport;

pub use error::{DecodeError, Error, Result, ValidationError};
