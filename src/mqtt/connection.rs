use super::{Incoming, Outgoing};
use crate::consts;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use rumqttc::{Event, Packet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::{sync::Mutex, task};

use tracing::{debug, error, info, warn};

/// Wait before polling again after a failed connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Messages waiting for the sender task. Further state updates are dropped.
const OUTGOING_QUEUE: usize = 256;

pub struct Initiator {
    client: AsyncClient,
    event_loop: EventLoop,
}

/// MQTT interfacing
pub struct Broker {
    /// Outgoing event queue: things we send to the broker.
    outgoing: Publisher,
    /// Incoming event queue: commands read from the broker.
    incoming: Mutex<mpsc::Receiver<Incoming>>,
}

/// Handle to the outgoing queue, shared by device tasks.
#[derive(Clone, Debug)]
pub struct Publisher {
    queue: mpsc::Sender<Outgoing>,
}

impl Initiator {
    pub async fn new(id: &str, host: &str, port: u16, username: &str, password: &str) -> anyhow::Result<Self> {
        let mut mqttoptions = MqttOptions::new(id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !username.is_empty() {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(mqttoptions, 10);

        // Fail early if parameters are invalid.
        if let Err(err) = event_loop.poll().await {
            warn!("Initial connection to MQTT failed. Check connection parameters");
            anyhow::bail!("Unable to contact MQTT at {}:{}: {}", host, port, err);
        }

        Ok(Initiator { client, event_loop })
    }

    async fn receiver(mut event_loop: EventLoop, queue: mpsc::Sender<Incoming>) {
        loop {
            let notification = event_loop.poll().await;
            let result = match notification {
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    let payload = String::from_utf8_lossy(&msg.payload).into_owned();
                    info!("RX message to {} with payload '{}'", msg.topic, payload);
                    queue
                        .send(Incoming::Publish {
                            topic: msg.topic,
                            payload,
                        })
                        .await
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Reconnected to MQTT");
                    queue.send(Incoming::Connected).await
                }
                Ok(Event::Outgoing(_))
                | Ok(Event::Incoming(Packet::PingResp))
                | Ok(Event::Incoming(Packet::SubAck(_)))
                | Ok(Event::Incoming(Packet::PubAck(_))) => {
                    // Silence common messages
                    continue;
                }
                Ok(other) => {
                    debug!("Received other message = {:?}", other);
                    continue;
                }
                Err(err) => {
                    warn!("MQTT connection error: {}. Retrying", err);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };
            if result.is_err() {
                error!("Error while sending received message to queue. Quitting loop");
                return;
            }
        }
    }

    async fn sender(client: AsyncClient, mut queue: mpsc::Receiver<Outgoing>) {
        while let Some(command) = queue.recv().await {
            let result = match command {
                Outgoing::Subscribe(topic) => {
                    debug!("Subscribing to {}", topic);
                    client.subscribe(topic, QoS::AtMostOnce).await
                }
                Outgoing::Initial => {
                    client
                        .publish(
                            format!("{}/status", consts::GATE_NAME),
                            QoS::AtLeastOnce,
                            false,
                            format!("daemon started, version {}", consts::GATE_VERSION),
                        )
                        .await
                }
                Outgoing::State { topic, payload } => {
                    debug!("Publishing {} to {}", payload, topic);
                    client.publish(topic, QoS::AtMostOnce, false, payload).await
                }
            };
            if let Err(err) = result {
                error!("Unable to queue MQTT request: {:?}", err);
            }
        }
        // Channel end closed - quit.
    }

    pub fn start(self) -> Broker {
        let (out_sender, out_receiver) = mpsc::channel::<Outgoing>(OUTGOING_QUEUE);
        let (in_sender, in_receiver) = mpsc::channel::<Incoming>(10);

        // The first ConnAck was consumed while probing the connection.
        let _ = in_sender.try_send(Incoming::Connected);

        task::spawn(Self::receiver(self.event_loop, in_sender));
        task::spawn(Self::sender(self.client, out_receiver));

        Broker {
            outgoing: Publisher { queue: out_sender },
            incoming: Mutex::new(in_receiver),
        }
    }
}

impl Broker {
    /// Receive incoming message (from MQTT). None means the reading loop
    /// finished.
    pub async fn recv(&self) -> Option<Incoming> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await
    }

    pub async fn send(&self, msg: Outgoing) -> anyhow::Result<()> {
        self.outgoing.send(msg).await
    }

    /// Handle for publishing from device tasks.
    pub fn publisher(&self) -> Publisher {
        self.outgoing.clone()
    }
}

impl Publisher {
    /// Queue a message, waiting for room.
    pub async fn send(&self, msg: Outgoing) -> anyhow::Result<()> {
        self.queue.send(msg).await?;
        Ok(())
    }

    /// Queue a message without waiting. When the queue is full (broker
    /// unreachable) or closed the message is dropped and false returned.
    pub fn publish(&self, msg: Outgoing) -> bool {
        match self.queue.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!("MQTT queue full, dropping {:?}", msg);
                false
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                warn!("MQTT sender is gone, dropping {:?}", msg);
                false
            }
        }
    }
}
