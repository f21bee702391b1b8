//! Bridge between the device and an MQTT broker.
//!
//! The [`Bridge`] alternates between two phases:
//!
//! * [`Phase::IdlePolling`]: a snapshot is read and published whenever the
//!   poll deadline passes.
//! * [`Phase::CommandHandling`]: entered when a command arrives. No poll is
//!   issued in this phase. The next [`Bridge::step`] executes the write,
//!   publishes a fresh snapshot and re-arms the poll deadline before the
//!   bridge returns to polling.
//!
//! Messages and poll deadlines are processed one at a time on the caller's
//! thread, so a command never overlaps a poll. Errors are logged and the
//! schedule simply continues.
use crate::discovery::discovery_messages;
use crate::error::Result;
use crate::safe_client::SafeClient;
use crate::state::DeviceSnapshot;
use crate::topics::{Command, InfoTopic, Topics, ONLINE_PAYLOAD};
use crate::transport::Transport;
use log::*;
use std::fmt;
use std::time::{Duration, Instant};

/// Outbound side of the message bus.
pub trait Publisher {
    type Error: fmt::Display;

    fn publish(&mut self, topic: &str, payload: &str, retain: bool)
        -> std::result::Result<(), Self::Error>;
}

/// What an [`Inbox`] produced while waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message { topic: String, payload: String },
    /// The wait timed out without a message.
    Idle,
    /// The connection to the broker was re-established. Retained state the
    /// broker may have replaced (the last will) is published again.
    Reconnected,
    /// No more messages will arrive; the bridge stops.
    Closed,
}

/// Inbound side of the message bus.
pub trait Inbox {
    /// Waits at most `timeout` for the next message.
    fn receive(&mut self, timeout: Duration) -> Inbound;
}

impl<F> Inbox for F
where
    F: FnMut(Duration) -> Inbound,
{
    fn receive(&mut self, timeout: Duration) -> Inbound {
        self(timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    IdlePolling,
    /// A command was accepted and waits for execution.
    CommandHandling(Command),
}

pub struct Bridge<T, P> {
    device: SafeClient<T>,
    publisher: P,
    topics: Topics,
    interval: Duration,
    phase: Phase,
    next_poll: Instant,
}

impl<T: Transport, P: Publisher> Bridge<T, P> {
    /// Creates a bridge whose first poll is due immediately.
    pub fn new(device: SafeClient<T>, publisher: P, topics: Topics, interval: Duration) -> Self {
        Self {
            device,
            publisher,
            topics,
            interval,
            phase: Phase::IdlePolling,
            next_poll: Instant::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Publishes the discovery documents and marks the bridge online.
    ///
    /// Both are retained so that late subscribers see them.
    pub fn announce(&mut self) -> std::result::Result<(), P::Error> {
        for message in discovery_messages(&self.topics) {
            debug!("Publishing discovery document to {}", message.topic);
            self.publisher
                .publish(&message.topic, &message.payload.to_string(), message.retain)?;
        }
        self.publisher
            .publish(&self.topics.availability(), ONLINE_PAYLOAD, true)
    }

    /// Time until [`Bridge::step`] has work to do: zero while a command is
    /// pending or the poll is overdue.
    pub fn time_until_poll(&self, now: Instant) -> Duration {
        match self.phase {
            Phase::CommandHandling(_) => Duration::ZERO,
            Phase::IdlePolling => self.next_poll.saturating_duration_since(now),
        }
    }

    /// Polls if the deadline has passed and no command is pending.
    ///
    /// Returns the published snapshot, if a poll happened and succeeded.
    pub fn poll_if_due(&mut self, now: Instant) -> Option<DeviceSnapshot> {
        if self.phase != Phase::IdlePolling || now < self.next_poll {
            return None;
        }
        let snapshot = self.refresh();
        self.next_poll = Instant::now() + self.interval;
        snapshot
    }

    /// Reads a snapshot and publishes every telemetry field.
    fn refresh(&mut self) -> Option<DeviceSnapshot> {
        match self.device.read_snapshot() {
            Ok(snapshot) => {
                trace!("Snapshot: {snapshot:?}");
                self.publish_snapshot(&snapshot);
                Some(snapshot)
            }
            Err(error) => {
                warn!("Cannot read device state: {error}");
                None
            }
        }
    }

    fn publish_snapshot(&mut self, snapshot: &DeviceSnapshot) {
        for info in InfoTopic::ALL {
            let topic = self.topics.state(info);
            if let Err(error) = self
                .publisher
                .publish(&topic, &info.payload(snapshot), false)
            {
                warn!("Cannot publish to {topic}: {error}");
            }
        }
    }

    fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::SetSpeed(speed) => self.device.write_speed(speed),
            Command::SetTemperature(temperature) => self.device.write_temperature(temperature),
            Command::SetPower(on) => self.device.write_power(on),
        }
    }

    /// Handles one inbound message.
    ///
    /// Messages on unknown topics and payloads that do not parse are logged
    /// and dropped. A valid command moves the bridge to
    /// [`Phase::CommandHandling`]; it is executed by the next
    /// [`Bridge::step`].
    pub fn handle_message(&mut self, topic: &str, payload: &str) -> Option<Command> {
        let Some(command_topic) = self.topics.command_topic(topic) else {
            trace!("Ignoring message on {topic}");
            return None;
        };
        info!("Command on {topic}: {payload}");
        let command = match command_topic.parse(payload) {
            Ok(command) => command,
            Err(error) => {
                error!("Rejected command on {topic}: {error}");
                return None;
            }
        };
        if let Phase::CommandHandling(pending) = self.phase {
            warn!("Dropping pending command '{pending}' in favour of '{command}'");
        }
        self.phase = Phase::CommandHandling(command);
        Some(command)
    }

    /// Executes the pending command, or polls if the deadline has passed.
    ///
    /// A command is followed by a state refresh, whether or not the write
    /// succeeded, and the next poll is due one interval later.
    pub fn step(&mut self, now: Instant) {
        match self.phase {
            Phase::CommandHandling(command) => {
                match self.execute(command) {
                    Ok(()) => info!("Executed: {command}"),
                    Err(error) => error!("Cannot {command}: {error}"),
                }
                self.refresh();
                self.next_poll = Instant::now() + self.interval;
                self.phase = Phase::IdlePolling;
            }
            Phase::IdlePolling => {
                self.poll_if_due(now);
            }
        }
    }

    /// Runs the bridge until `inbox` is closed.
    pub fn run<I: Inbox>(&mut self, inbox: &mut I) {
        loop {
            self.step(Instant::now());
            match inbox.receive(self.time_until_poll(Instant::now())) {
                Inbound::Message { topic, payload } => {
                    self.handle_message(&topic, &payload);
                }
                Inbound::Idle => {}
                Inbound::Reconnected => {
                    if let Err(error) = self.announce() {
                        warn!("Cannot announce bridge after reconnect: {error}");
                    }
                }
                Inbound::Closed => {
                    info!("Message stream closed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{device_reply, transport};
    use crate::protocol::OperationKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::collections::VecDeque;
    use std::sync::{mpsc, Arc, Mutex};

    #[derive(Debug, Default)]
    struct Recorder {
        messages: Vec<(String, String, bool)>,
    }

    impl Recorder {
        fn payload(&self, topic: &str) -> Option<&str> {
            self.messages
                .iter()
                .rev()
                .find(|(t, _, _)| t == topic)
                .map(|(_, payload, _)| payload.as_str())
        }
    }

    impl Publisher for Recorder {
        type Error = String;

        fn publish(
            &mut self,
            topic: &str,
            payload: &str,
            retain: bool,
        ) -> std::result::Result<(), String> {
            self.messages
                .push((topic.to_string(), payload.to_string(), retain));
            Ok(())
        }
    }

    /// Function codes of every request, in order, from a device that fails
    /// the test if two requests overlap.
    fn single_flight_device() -> (
        SafeClient<impl Transport + Send + 'static>,
        Arc<Mutex<Vec<(u8, u16)>>>,
    ) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicBool::new(false));
        let log = requests.clone();
        let device = SafeClient::new(transport(move |request| {
            assert!(!in_flight.swap(true, Ordering::SeqCst), "overlapping requests");
            log.lock()
                .unwrap()
                .push((request[7], u16::from_be_bytes([request[8], request[9]])));
            let reply = device_reply(request);
            in_flight.store(false, Ordering::SeqCst);
            Ok(reply)
        }));
        (device, requests)
    }

    fn bridge<T: Transport>(device: SafeClient<T>, interval: Duration) -> Bridge<T, Recorder> {
        Bridge::new(device, Recorder::default(), Topics::default(), interval)
    }

    #[test]
    fn announce_publishes_retained_discovery_and_online() {
        let (device, requests) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(5));
        bridge.announce().unwrap();

        let messages = &bridge.publisher().messages;
        assert_eq!(messages.len(), 5);
        assert!(messages.iter().all(|(_, _, retain)| *retain));
        assert_eq!(
            messages.last().unwrap(),
            &(
                "breezart/bridge/state".to_string(),
                "online".to_string(),
                true
            )
        );
        assert!(requests.lock().unwrap().is_empty());
    }

    #[test]
    fn poll_publishes_every_field() {
        let (device, _) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(60));
        let snapshot = bridge.poll_if_due(Instant::now()).unwrap();
        assert_eq!(snapshot.energy, 0.5);

        let recorder = bridge.publisher();
        assert_eq!(recorder.messages.len(), InfoTopic::ALL.len());
        assert!(recorder.messages.iter().all(|(_, _, retain)| !retain));
        assert_eq!(
            recorder.payload("breezart/breezart_1_power_consumption"),
            Some(r#"{"value":0.5}"#)
        );
        assert_eq!(
            recorder.payload("breezart/breezart_1_mode"),
            Some(r#"{"value":"heat"}"#)
        );
        assert_eq!(
            recorder.payload("breezart/breezart_1_temperature"),
            Some(r#"{"value":21.5}"#)
        );

        // Not due again before the interval elapsed.
        assert!(bridge.poll_if_due(Instant::now()).is_none());
        assert!(bridge.time_until_poll(Instant::now()) > Duration::from_secs(59));
    }

    #[test]
    fn failed_poll_publishes_nothing() {
        let device = SafeClient::new(transport(|_| {
            Err(crate::transport::TransportError::Timeout(
                crate::transport::DEFAULT_TIMEOUT,
            ))
        }));
        let mut bridge = bridge(device, Duration::from_secs(5));
        assert!(bridge.poll_if_due(Instant::now()).is_none());
        assert!(bridge.publisher().messages.is_empty());
        assert!(bridge.time_until_poll(Instant::now()) > Duration::from_secs(4));
    }

    #[test]
    fn unknown_topics_are_ignored() {
        let (device, requests) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(5));
        assert_eq!(bridge.handle_message("breezart/breezart_1_speed", "3"), None);
        assert_eq!(bridge.handle_message("other/topic/set", "3"), None);
        assert!(requests.lock().unwrap().is_empty());
        assert!(bridge.publisher().messages.is_empty());
    }

    #[test]
    fn command_writes_then_refreshes() {
        let (device, requests) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(5));
        let command = bridge.handle_message("breezart/breezart_1_speed/set", "5");
        assert_eq!(command, Some(Command::SetSpeed(5)));
        bridge.step(Instant::now());
        assert_eq!(bridge.phase(), Phase::IdlePolling);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1 + 7);
        assert_eq!(requests[0], (OperationKind::WriteSingleHolding.code(), 0));
        assert!(requests[1..].iter().all(|(code, _)| *code != 6));
        assert_eq!(bridge.publisher().messages.len(), InfoTopic::ALL.len());
        assert!(bridge.time_until_poll(Instant::now()) > Duration::from_secs(4));
    }

    #[test]
    fn mode_and_temperature_commands() {
        let (device, requests) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(5));
        for (topic, payload) in [
            ("breezart/breezart_1_mode/set", "off"),
            ("breezart/breezart_1_target_temperature/set", "24"),
            ("breezart/breezart_1_fan_mode/set", "2"),
        ] {
            bridge.handle_message(topic, payload);
            bridge.step(Instant::now());
        }

        let writes = requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(code, _)| *code == 6)
            .map(|(_, address)| *address)
            .collect::<Vec<_>>();
        assert_eq!(writes, [3, 1, 0]);
    }

    #[test]
    fn invalid_commands_never_write() {
        let (device, requests) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(5));
        assert_eq!(bridge.handle_message("breezart/breezart_1_speed/set", "fast"), None);
        assert_eq!(bridge.phase(), Phase::IdlePolling);
        assert!(requests.lock().unwrap().is_empty());

        // Out of range: rejected by the client, the state is still refreshed.
        bridge.handle_message("breezart/breezart_1_speed/set", "11");
        bridge.step(Instant::now());
        bridge.handle_message("breezart/breezart_1_target_temperature/set", "35");
        bridge.step(Instant::now());
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2 * 7);
        assert!(requests.iter().all(|(code, _)| *code != 6));
    }

    #[test]
    fn run_serializes_commands_and_polls() {
        let (device, requests) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(3600));
        let (sender, receiver) = mpsc::channel::<(String, String)>();
        sender
            .send((
                "breezart/breezart_1_mode/set".to_string(),
                "heat".to_string(),
            ))
            .unwrap();
        drop(sender);

        let mut inbox = |timeout: Duration| match receiver.recv_timeout(timeout) {
            Ok((topic, payload)) => Inbound::Message { topic, payload },
            Err(mpsc::RecvTimeoutError::Timeout) => Inbound::Idle,
            Err(mpsc::RecvTimeoutError::Disconnected) => Inbound::Closed,
        };
        bridge.run(&mut inbox);

        let codes = requests
            .lock()
            .unwrap()
            .iter()
            .map(|(code, _)| *code)
            .collect::<Vec<_>>();
        // Initial poll, then the write, then the refresh.
        assert_eq!(
            codes,
            [4, 4, 3, 3, 3, 3, 3, 6, 4, 4, 3, 3, 3, 3, 3]
        );
        assert_eq!(bridge.phase(), Phase::IdlePolling);
    }

    #[test]
    fn pending_command_holds_back_polling() {
        let (device, requests) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(5));
        bridge.handle_message("breezart/breezart_1_speed/set", "4");
        assert_eq!(bridge.phase(), Phase::CommandHandling(Command::SetSpeed(4)));
        assert_eq!(bridge.time_until_poll(Instant::now()), Duration::ZERO);

        let later = Instant::now() + Duration::from_secs(3600);
        assert!(bridge.poll_if_due(later).is_none());
        assert!(requests.lock().unwrap().is_empty());

        bridge.step(later);
        let codes = requests
            .lock()
            .unwrap()
            .iter()
            .map(|(code, _)| *code)
            .collect::<Vec<_>>();
        assert_eq!(codes, [6, 4, 4, 3, 3, 3, 3, 3]);
        assert_eq!(bridge.phase(), Phase::IdlePolling);
    }

    #[test]
    fn newer_command_replaces_pending_one() {
        let (device, requests) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(5));
        bridge.handle_message("breezart/breezart_1_speed/set", "4");
        bridge.handle_message("breezart/breezart_1_mode/set", "off");
        bridge.step(Instant::now());

        let writes = requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(code, _)| *code == 6)
            .map(|(_, address)| *address)
            .collect::<Vec<_>>();
        assert_eq!(writes, [3]);
    }

    #[test]
    fn reconnect_announces_again() {
        let (device, _) = single_flight_device();
        let mut bridge = bridge(device, Duration::from_secs(3600));
        let mut events = VecDeque::from([Inbound::Idle, Inbound::Reconnected, Inbound::Closed]);
        let mut inbox = |_: Duration| events.pop_front().unwrap_or(Inbound::Closed);
        bridge.run(&mut inbox);

        let messages = &bridge.publisher().messages;
        // Initial poll, then discovery and liveness after the reconnect.
        assert_eq!(messages.len(), InfoTopic::ALL.len() + 5);
        assert!(messages[..InfoTopic::ALL.len()]
            .iter()
            .all(|(_, _, retain)| !retain));
        assert_eq!(
            messages.last().unwrap(),
            &(
                "breezart/bridge/state".to_string(),
                "online".to_string(),
                true
            )
        );
    }
}
