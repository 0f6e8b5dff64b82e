// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of cgateweb
//
//! # cgateweb
//!
//! Bridge between a Clipsal C-Gate server and MQTT.
//!
//! The bridge keeps three endpoints alive (a pool of C-Gate command
//! connections, the C-Gate event channel, and an MQTT broker session)
//! and translates between them: C-Bus events become `cbus/read/...` state
//! publications, `cbus/write/...` messages become C-Gate commands, and the
//! project tree is announced to Home Assistant via MQTT discovery.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cgateweb::{Bridge, RawSettings, normalize};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = normalize(RawSettings {
//!         cgate_host: Some("192.168.1.10".into()),
//!         cgate_project: Some("HOME".into()),
//!         mqtt_broker: Some("localhost:1883".into()),
//!         ..Default::default()
//!     })?;
//!
//!     let mut bridge = Bridge::new(settings);
//!     let shutdown = bridge.shutdown_handle();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         shutdown.shutdown();
//!     });
//!
//!     bridge.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod cgate;
pub mod commands;
pub mod discovery;
pub mod error;
pub mod events;
pub mod framing;
pub mod mqtt;
pub mod protocol;
pub mod publisher;
pub mod queue;
pub mod response;
pub mod router;
pub mod settings;
pub mod tracker;

// Re-exports for convenience
pub use bridge::{Bridge, ShutdownHandle};
pub use error::{BridgeError, Result};
pub use events::{BridgeEvent, EventReceiver};
pub use protocol::{Address, CbusEvent, CgateCommand};
pub use settings::{RawSettings, Settings, normalize};
