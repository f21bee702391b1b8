use anyhow::{Context, Result};
use breezart_lib::bridge::{Bridge, Inbound, Publisher};
use breezart_lib::safe_client::SafeClient;
use breezart_lib::topics::{Topics, OFFLINE_PAYLOAD};
use breezart_lib::transport::Transport;
use log::*;
use paho_mqtt as mqtt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const QOS: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub broker: String,
    pub user: String,
    pub password: String,
}

impl MqttConfig {
    pub const DEFAULT_BROKER: &'static str = "tcp://localhost:1883";
}

/// Publishes bridge messages through a connected paho client.
struct MqttPublisher {
    client: mqtt::Client,
}

impl Publisher for MqttPublisher {
    type Error = mqtt::Error;

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), mqtt::Error> {
        let msg = if retain {
            mqtt::Message::new_retained(topic, payload, QOS)
        } else {
            mqtt::Message::new(topic, payload, QOS)
        };
        self.client.publish(msg)
    }
}

/// Broker connection as seen by the inbox.
trait Connection {
    fn is_connected(&self) -> bool;

    /// Re-establishes the connection and its subscriptions.
    fn reconnect(&self) -> Result<()>;
}

struct MqttConnection<'a> {
    client: &'a mqtt::Client,
    commands: &'a [String],
}

impl Connection for MqttConnection<'_> {
    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn reconnect(&self) -> Result<()> {
        self.client
            .reconnect()
            .with_context(|| "Reconnect failed")?;
        subscribe(self.client, self.commands)
    }
}

/// One wait on the paho consumer channel, reduced to what the inbox needs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Received {
    Message { topic: String, payload: String },
    /// paho signals a lost connection with an empty message.
    ConnectionLost,
    Timeout,
    /// The channel is closed, consuming was stopped.
    Stopped,
}

/// Decides what the bridge sees for one wait.
///
/// While disconnected, every wait ends with a reconnect attempt, so a failed
/// attempt is retried after the next wait instead of only once per lost
/// connection.
fn next_inbound<C: Connection>(connection: &C, running: &AtomicBool, received: Received) -> Inbound {
    if !running.load(Ordering::SeqCst) {
        return Inbound::Closed;
    }
    match received {
        Received::Message { topic, payload } => Inbound::Message { topic, payload },
        Received::Stopped => Inbound::Closed,
        Received::ConnectionLost | Received::Timeout if connection.is_connected() => Inbound::Idle,
        Received::ConnectionLost | Received::Timeout => {
            warn!("Connection to MQTT broker lost, reconnecting...");
            match connection.reconnect() {
                Ok(()) => {
                    info!("Reconnected to MQTT broker");
                    Inbound::Reconnected
                }
                Err(error) => {
                    warn!("{error:#}");
                    Inbound::Idle
                }
            }
        }
    }
}

fn connect_options(config: &MqttConfig, availability: &str) -> mqtt::ConnectOptions {
    let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
    let mut conn_builder = conn_builder
        .keep_alive_interval(Duration::from_secs(20))
        .clean_session(true)
        .will_message(mqtt::Message::new_retained(
            availability,
            OFFLINE_PAYLOAD,
            QOS,
        ));
    if !config.user.is_empty() {
        conn_builder = conn_builder.user_name(&config.user);
    }
    if !config.password.is_empty() {
        conn_builder = conn_builder.password(&config.password);
    }
    conn_builder.finalize()
}

fn subscribe(client: &mqtt::Client, topics: &[String]) -> Result<()> {
    let qos = vec![QOS; topics.len()];
    client
        .subscribe_many(topics, &qos)
        .with_context(|| "Cannot subscribe to command topics")?;
    Ok(())
}

/// Connects to the broker and runs the bridge until Ctrl-C.
pub fn run_daemon<T: Transport>(
    device: SafeClient<T>,
    config: &MqttConfig,
    topics: Topics,
    interval: Duration,
) -> Result<()> {
    let create_opts = mqtt::CreateOptionsBuilder::new()
        .server_uri(&config.broker)
        .client_id(format!("breezart2mqtt-{}", topics.device_id()))
        .finalize();
    let mut cli = mqtt::Client::new(create_opts).with_context(|| "Error creating mqtt client")?;
    // Use 5sec timeouts for sync calls.
    cli.set_timeout(Duration::from_secs(5));

    let rx = cli.start_consuming();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let consumer = cli.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        consumer.stop_consuming();
        trace!("Received Ctrl-C")
    })
    .with_context(|| "Error setting Ctrl-C handler")?;

    info!("Connecting to MQTT broker {}", config.broker);
    cli.connect(connect_options(config, &topics.availability()))
        .with_context(|| format!("Mqtt client unable to connect to {}", config.broker))?;

    let commands = topics.commands();
    let publisher = MqttPublisher {
        client: cli.clone(),
    };
    let mut bridge = Bridge::new(device, publisher, topics, interval);
    bridge
        .announce()
        .with_context(|| "Cannot publish discovery documents")?;
    subscribe(&cli, &commands)?;
    info!("Subscribed to {commands:?}");

    let connection = MqttConnection {
        client: &cli,
        commands: &commands,
    };
    let mut inbox = |timeout: Duration| {
        let received = match rx.recv_timeout(timeout) {
            Ok(Some(msg)) => Received::Message {
                topic: msg.topic().to_string(),
                payload: msg.payload_str().into_owned(),
            },
            Ok(None) => Received::ConnectionLost,
            Err(error) if error.is_timeout() => Received::Timeout,
            Err(_) => Received::Stopped,
        };
        next_inbound(&connection, &running, received)
    };
    bridge.run(&mut inbox);

    info!("Stopping...");
    if cli.is_connected() {
        let offline =
            mqtt::Message::new_retained(bridge.topics().availability(), OFFLINE_PAYLOAD, QOS);
        cli.publish(offline)
            .with_context(|| "Cannot publish mqtt message")?;
        cli.disconnect(None)
            .with_context(|| "Error disconnect mqtt client")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Connection whose reconnect attempts succeed or fail from a script.
    struct ScriptedConnection {
        connected: Cell<bool>,
        attempts: RefCell<VecDeque<bool>>,
    }

    impl ScriptedConnection {
        fn new(connected: bool, attempts: &[bool]) -> Self {
            Self {
                connected: Cell::new(connected),
                attempts: RefCell::new(attempts.iter().copied().collect()),
            }
        }

        fn remaining(&self) -> usize {
            self.attempts.borrow().len()
        }
    }

    impl Connection for ScriptedConnection {
        fn is_connected(&self) -> bool {
            self.connected.get()
        }

        fn reconnect(&self) -> Result<()> {
            let success = self.attempts.borrow_mut().pop_front().unwrap_or(false);
            self.connected.set(success);
            if success {
                Ok(())
            } else {
                anyhow::bail!("broker unreachable")
            }
        }
    }

    #[test]
    fn reconnect_is_retried_until_it_succeeds() {
        let connection = ScriptedConnection::new(false, &[false, false, true]);
        let running = AtomicBool::new(true);

        assert_eq!(
            next_inbound(&connection, &running, Received::ConnectionLost),
            Inbound::Idle
        );
        // paho reports the loss once, later waits only time out.
        assert_eq!(
            next_inbound(&connection, &running, Received::Timeout),
            Inbound::Idle
        );
        assert_eq!(
            next_inbound(&connection, &running, Received::Timeout),
            Inbound::Reconnected
        );
        assert_eq!(connection.remaining(), 0);
        assert!(connection.is_connected());

        assert_eq!(
            next_inbound(&connection, &running, Received::Timeout),
            Inbound::Idle
        );
    }

    #[test]
    fn connected_timeouts_do_not_reconnect() {
        let connection = ScriptedConnection::new(true, &[true]);
        let running = AtomicBool::new(true);
        assert_eq!(
            next_inbound(&connection, &running, Received::Timeout),
            Inbound::Idle
        );
        assert_eq!(connection.remaining(), 1);
    }

    #[test]
    fn messages_pass_through() {
        let connection = ScriptedConnection::new(true, &[]);
        let running = AtomicBool::new(true);
        assert_eq!(
            next_inbound(
                &connection,
                &running,
                Received::Message {
                    topic: "breezart/breezart_1_speed/set".to_string(),
                    payload: "3".to_string(),
                }
            ),
            Inbound::Message {
                topic: "breezart/breezart_1_speed/set".to_string(),
                payload: "3".to_string(),
            }
        );
    }

    #[test]
    fn shutdown_closes_the_inbox() {
        let connection = ScriptedConnection::new(false, &[true]);
        let running = AtomicBool::new(false);
        assert_eq!(
            next_inbound(&connection, &running, Received::ConnectionLost),
            Inbound::Closed
        );
        // No reconnect attempt once stopping.
        assert_eq!(connection.remaining(), 1);

        running.store(true, Ordering::SeqCst);
        assert_eq!(
            next_inbound(&connection, &running, Received::Stopped),
            Inbound::Closed
        );
    }
}
