// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

/// Observable lifecycle events emitted by the bridge and its connection
/// layers.
///
/// Consumers subscribe via `Bridge::subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<BridgeEvent>`. The daemon binary logs
/// these; tests use them for synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// MQTT broker session established (birth message published)
    MqttConnected,
    /// MQTT broker session lost
    MqttDisconnected,
    /// The C-Gate event channel connected
    EventLinkUp,
    /// The C-Gate event channel dropped
    EventLinkDown,
    /// The command pool reached its initial healthy state
    PoolStarted { healthy: usize, total: usize },
    /// A pool health sweep completed
    HealthCheck { healthy: usize, total: usize },
    /// Every command connection is down
    AllCommandLinksDown,
    /// All three endpoints are healthy; startup actions have run
    Ready,
    /// At least one endpoint fell out of the healthy state
    NotReady,
    /// Shutdown finished
    Stopped,
}

pub type EventSender = tokio::sync::broadcast::Sender<BridgeEvent>;
pub type EventReceiver = tokio::sync::broadcast::Receiver<BridgeEvent>;

/// Create a new bridge event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
