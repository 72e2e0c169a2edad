//! The broker session loop.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, Publish, QoS};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::{decode_payload, Ingested};
use crate::error::SettingsError;
use crate::settings::BrokerSettings;
use crate::state::{LinkEvent, LinkStatus, StateMachine};

/// Capacity of rumqttc's internal request queue.
const REQUEST_CAPACITY: usize = 64;

/// Upper bound on flushing DISCONNECT during shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Owns the connection to the telemetry broker.
#[derive(Debug)]
pub struct BrokerLink {
    settings: BrokerSettings,
    machine: StateMachine,
    status: LinkStatus,
}

impl BrokerLink {
    /// Creates a link in the `Disconnected` state.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if the settings cannot produce a session.
    pub fn new(settings: BrokerSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let (machine, status) = StateMachine::new();
        Ok(Self {
            settings,
            machine,
            status,
        })
    }

    /// A handle reporting the link's current state.
    pub fn status(&self) -> LinkStatus {
        self.status.clone()
    }

    /// Runs the session until `shutdown` is cancelled.
    ///
    /// Connects, subscribes to the configured wildcard topic after every
    /// CONNACK, and forwards decoded samples to `ingest`. Connection failures
    /// are retried on the fixed interval forever. Malformed payloads are
    /// logged and dropped. On shutdown the session is closed with a
    /// DISCONNECT and `ingest` is dropped.
    pub async fn run(self, ingest: mpsc::Sender<Ingested>, shutdown: CancellationToken) {
        let client_id = self.settings.client_id();
        let (client, mut eventloop) =
            AsyncClient::new(self.settings.mqtt_options(&client_id), REQUEST_CAPACITY);

        tracing::info!(
            host = %self.settings.host,
            port = self.settings.port,
            tls = self.settings.tls,
            client_id = %client_id,
            "connecting to MQTT broker"
        );
        self.machine.apply(LinkEvent::Start);

        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.machine.apply(LinkEvent::ConnAck);
                    match client.try_subscribe(self.settings.topic.clone(), QoS::AtLeastOnce) {
                        Ok(()) => {
                            tracing::info!(topic = %self.settings.topic, "subscribed to device topics");
                        }
                        Err(e) => {
                            tracing::error!(topic = %self.settings.topic, "failed to subscribe: {}", e);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if !self.forward(publish, &ingest, &shutdown).await {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    tracing::debug!(pkid = ack.pkid, codes = ?ack.return_codes, "subscription acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        retry_in_secs = self.settings.reconnect_interval.as_secs(),
                        "MQTT connection error: {}",
                        e
                    );
                    self.machine.apply(LinkEvent::Failure);

                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.settings.reconnect_interval) => {}
                    }
                    self.machine.apply(LinkEvent::RetryElapsed);
                    tracing::info!("reconnecting to MQTT broker");
                }
            }
        }

        self.close(&client, &mut eventloop).await;
    }

    /// Decodes one PUBLISH and hands it to the ingest queue.
    ///
    /// Returns `false` when the link should stop: shutdown was requested
    /// while waiting for queue space, or the queue's receiver is gone.
    async fn forward(
        &self,
        publish: Publish,
        ingest: &mpsc::Sender<Ingested>,
        shutdown: &CancellationToken,
    ) -> bool {
        let sample = match decode_payload(&publish.payload) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(
                    topic = %publish.topic,
                    bytes = publish.payload.len(),
                    "dropping undecodable message: {}",
                    e
                );
                return true;
            }
        };

        tracing::debug!(
            topic = %publish.topic,
            farm_id = %sample.farm_id,
            device_id = %sample.device_id,
            "received reading"
        );

        let ingested = Ingested {
            topic: publish.topic,
            sample,
        };
        tokio::select! {
            () = shutdown.cancelled() => false,
            sent = ingest.send(ingested) => match sent {
                Ok(()) => true,
                Err(_) => {
                    tracing::warn!("ingest queue closed, stopping broker link");
                    false
                }
            },
        }
    }

    async fn close(&self, client: &AsyncClient, eventloop: &mut EventLoop) {
        if self.machine.state().is_connected() {
            match client.try_disconnect() {
                Ok(()) => {
                    let flush = async {
                        loop {
                            match eventloop.poll().await {
                                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                                Ok(_) => {}
                            }
                        }
                    };
                    if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
                        tracing::warn!("timed out sending MQTT disconnect");
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to queue MQTT disconnect: {}", e);
                }
            }
        }

        self.machine.apply(LinkEvent::Shutdown);
        tracing::info!("broker link closed");
    }
}
