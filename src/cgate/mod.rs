// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

pub mod connection;
pub mod pool;

pub use connection::{CgateConnection, ChannelKind, ConnectOptions, LinkEvent};
pub use pool::CommandPool;
