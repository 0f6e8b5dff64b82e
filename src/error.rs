// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

/// All errors that can occur in the cgateweb bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Not connected")]
    NotConnected,

    #[error("No healthy command connection available")]
    NoHealthyConnection,

    #[error("Protocol error: {details}")]
    Protocol { details: String },

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("MQTT broker rejected credentials")]
    MqttAuth,

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Tree XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Reconnect budget exhausted after {attempts} attempts")]
    ReconnectBudgetExhausted { attempts: u32 },

    #[error("Channel closed")]
    ChannelClosed,
}

impl BridgeError {
    /// Whether this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Io(_)
                | BridgeError::ConnectionTimeout
                | BridgeError::NotConnected
                | BridgeError::NoHealthyConnection
                | BridgeError::ChannelClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
