//! Shareable, single-flight handle to a [`DeviceClient`].
//!
//! The device correlates replies only through the session id of the one
//! outstanding request, so two requests in flight at the same time corrupt each
//! other. [`SafeClient`] wraps the client in a mutex: clones can be handed to
//! several threads and every operation still runs to completion before the
//! next one starts.
//!
//! ## Example
//!
//! ```no_run
//! use breezart_lib::{safe_client::SafeClient, transport::{HttpTransport, DEFAULT_TIMEOUT}};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SafeClient::new(HttpTransport::new("192.168.1.50", DEFAULT_TIMEOUT)?);
//!
//!     let poller = client.clone();
//!     let handle = std::thread::spawn(move || poller.read_snapshot());
//!     client.write_power(true)?;
//!
//!     let snapshot = handle.join().expect("poller panicked")?;
//!     println!("Mode: {}", snapshot.mode());
//!     Ok(())
//! }
//! ```
use crate::client::DeviceClient;
use crate::error::Result;
use crate::state::{DeviceSnapshot, MainState, SensorTargetState};
use crate::transport::Transport;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub struct SafeClient<T> {
    client: Arc<Mutex<DeviceClient<T>>>,
}

impl<T> Clone for SafeClient<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<T: Transport> SafeClient<T> {
    /// Creates a shareable client for the device behind `transport`.
    pub fn new(transport: T) -> Self {
        Self::from_client(DeviceClient::new(transport))
    }

    /// Wraps an existing client, keeping its session counter.
    pub fn from_client(client: DeviceClient<T>) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }

    /// Creates a new `SafeClient` from a shared client.
    pub fn from_shared(client: Arc<Mutex<DeviceClient<T>>>) -> Self {
        Self { client }
    }

    /// Clones the shared client.
    pub fn clone_shared(&self) -> Arc<Mutex<DeviceClient<T>>> {
        self.client.clone()
    }

    /// Locks the client, recovering the guard from a poisoned mutex.
    fn lock(&self) -> MutexGuard<'_, DeviceClient<T>> {
        self.client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reads the unit status block.
    ///
    /// Blocks while another clone has a request in flight. See
    /// [`DeviceClient::read_main_state`] for the errors.
    pub fn read_main_state(&self) -> Result<MainState> {
        self.lock().read_main_state()
    }

    /// Reads setpoints, user flags, filter life and power draw.
    ///
    /// See [`DeviceClient::read_sensor_target_state`].
    pub fn read_sensor_target_state(&self) -> Result<SensorTargetState> {
        self.lock().read_sensor_target_state()
    }

    /// Reads the energy counters and returns their sum in kWh.
    ///
    /// All five reads happen under one lock. See
    /// [`DeviceClient::read_energy_total`].
    pub fn read_energy_total(&self) -> Result<f64> {
        self.lock().read_energy_total()
    }

    /// Reads a full snapshot without letting any other operation interleave.
    ///
    /// See [`DeviceClient::read_snapshot`].
    pub fn read_snapshot(&self) -> Result<DeviceSnapshot> {
        self.lock().read_snapshot()
    }

    /// Sets the fan speed step (0 to 10).
    ///
    /// See [`DeviceClient::write_speed`].
    pub fn write_speed(&self, speed: i32) -> Result<()> {
        self.lock().write_speed(speed)
    }

    /// Sets the target temperature in °C (10 to 30).
    ///
    /// See [`DeviceClient::write_temperature`].
    pub fn write_temperature(&self, temperature: i32) -> Result<()> {
        self.lock().write_temperature(temperature)
    }

    /// Switches the unit on or off.
    ///
    /// See [`DeviceClient::write_power`].
    pub fn write_power(&self, on: bool) -> Result<()> {
        self.lock().write_power(on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{device_reply, transport};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn operations_never_overlap() {
        let in_flight = Arc::new(AtomicBool::new(false));
        let exchanges = Arc::new(AtomicUsize::new(0));
        let (flag, counter) = (in_flight.clone(), exchanges.clone());
        let client = SafeClient::new(transport(move |request| {
            assert!(
                !flag.swap(true, Ordering::SeqCst),
                "second request sent while one was in flight"
            );
            thread::sleep(Duration::from_millis(2));
            counter.fetch_add(1, Ordering::SeqCst);
            flag.store(false, Ordering::SeqCst);
            Ok(device_reply(request))
        }));

        let handles = (0..4)
            .map(|i| {
                let client = client.clone();
                thread::spawn(move || {
                    for _ in 0..3 {
                        if i % 2 == 0 {
                            client.read_snapshot().unwrap();
                        } else {
                            client.write_speed(i).unwrap();
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        // Two threads x 3 snapshots x 7 reads, two threads x 3 writes.
        assert_eq!(exchanges.load(Ordering::SeqCst), 2 * 3 * 7 + 2 * 3);
    }

    #[test]
    fn clones_share_one_client() {
        let client = SafeClient::new(transport(|request| Ok(request.to_vec())));
        let other = client.clone();
        client.write_power(true).unwrap();
        other.write_power(false).unwrap();
        client.write_speed(3).unwrap();
        assert!(Arc::ptr_eq(&client.clone_shared(), &other.clone_shared()));
    }
}
