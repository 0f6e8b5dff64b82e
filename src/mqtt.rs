// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of MQTT handling from cgateweb.js

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, LastWill, MqttOptions, Packet, QoS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::{BridgeEvent, EventSender};
use crate::settings::Settings;

/// Availability topic: `Online` on connect, `Offline` as the broker-side
/// last will.
pub const STATUS_TOPIC: &str = "hello/cgateweb";
pub const PAYLOAD_ONLINE: &str = "Online";
pub const PAYLOAD_OFFLINE: &str = "Offline";
/// Everything the bridge reacts to lives under this filter.
pub const WRITE_TOPIC_FILTER: &str = "cbus/write/#";

/// Delay before re-polling the event loop after a transport error.
const RECONNECT_PERIOD: Duration = Duration::from_secs(5);
/// Per-attempt TCP connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// One outbound MQTT publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttPublication {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl MqttPublication {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self { topic: topic.into(), payload: payload.into(), qos: QoS::AtMostOnce, retain: false }
    }

    pub fn retained(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Events the MQTT layer delivers to the orchestrator.
#[derive(Debug, Clone)]
pub enum MqttEvent {
    Connected,
    Disconnected,
    /// The broker refused our credentials. Unrecoverable.
    AuthFailure,
    Message { topic: String, payload: String },
}

/// Thin wrapper around the rumqttc client: will/birth messages, the write
/// subscription, and a connected guard around publish.
pub struct MqttClient {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Prepare the session and spawn the event-loop driver. The connection
    /// itself is established (and re-established) by the driver task.
    pub fn connect(
        settings: &Settings,
        out: mpsc::Sender<MqttEvent>,
        events: EventSender,
    ) -> Self {
        let mut options =
            MqttOptions::new(&settings.mqtt_client_id, &settings.mqtt_host, settings.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(LastWill::new(
            STATUS_TOPIC,
            PAYLOAD_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if let Some(user) = &settings.mqtt_user {
            options
                .set_credentials(user, settings.mqtt_password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 256);
        let mut network_options = rumqttc::NetworkOptions::new();
        network_options.set_connection_timeout(CONNECT_TIMEOUT_SECS);
        eventloop.set_network_options(network_options);

        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(drive(
            eventloop,
            client.clone(),
            connected.clone(),
            out,
            events,
        ));

        Self { client, connected, task: std::sync::Mutex::new(Some(task)) }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publish one message. Logs and returns false when the broker session
    /// is down or the client rejects the message.
    pub async fn publish(&self, publication: MqttPublication) -> bool {
        if !self.is_connected() {
            warn!("mqtt: not connected, dropping publish to {}", publication.topic);
            return false;
        }
        match self
            .client
            .publish(
                publication.topic.clone(),
                publication.qos,
                publication.retain,
                publication.payload,
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("mqtt: publish to {} failed: {}", publication.topic, e);
                false
            }
        }
    }

    /// Best-effort clean shutdown: retract the availability message and
    /// disconnect.
    pub async fn disconnect(&self) -> Result<()> {
        if self.is_connected() {
            let _ = self
                .client
                .publish(STATUS_TOPIC, QoS::AtLeastOnce, true, PAYLOAD_OFFLINE)
                .await;
            let _ = self.client.disconnect().await;
        }
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Drive the rumqttc event loop: announce availability and subscribe on
/// every (re)connect, forward inbound publishes, classify fatal auth
/// failures, and pace reconnect attempts after transport errors.
async fn drive(
    mut eventloop: rumqttc::EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    out: mpsc::Sender<MqttEvent>,
    events: EventSender,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    error!("mqtt: broker rejected connection: {:?}", ack.code);
                    continue;
                }
                info!("mqtt: connected");
                connected.store(true, Ordering::SeqCst);
                let _ = client
                    .publish(STATUS_TOPIC, QoS::AtLeastOnce, true, PAYLOAD_ONLINE)
                    .await;
                if let Err(e) = client.subscribe(WRITE_TOPIC_FILTER, QoS::AtMostOnce).await {
                    warn!("mqtt: subscribe failed: {e}");
                }
                let _ = events.send(BridgeEvent::MqttConnected);
                if out.send(MqttEvent::Connected).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).to_string();
                debug!("mqtt: message on {}: {}", publish.topic, payload);
                let message = MqttEvent::Message { topic: publish.topic.clone(), payload };
                if out.send(message).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code))
                if matches!(
                    code,
                    ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized
                ) =>
            {
                error!("mqtt: authentication failed ({code:?})");
                connected.store(false, Ordering::SeqCst);
                let _ = out.send(MqttEvent::AuthFailure).await;
                break;
            }
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    warn!("mqtt: connection lost: {e}");
                    let _ = events.send(BridgeEvent::MqttDisconnected);
                    let _ = out.send(MqttEvent::Disconnected).await;
                } else {
                    debug!("mqtt: connect attempt failed: {e}");
                }
                tokio::time::sleep(RECONNECT_PERIOD).await;
            }
        }
    }
}
