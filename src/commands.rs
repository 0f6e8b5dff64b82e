// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

use std::fmt;

use crate::protocol::{Address, percent_to_level};

/// Relative-dim step applied by INCREASE / DECREASE (≈10% of full scale).
pub const RAMP_STEP: i16 = 26;

/// One parsed inbound MQTT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCommand {
    /// `cbus/write/<n>/<a>//getall`
    GetAll { network: String, application: String },
    /// `cbus/write/<n>///gettree`
    GetTree { network: String },
    /// `cbus/write/<n>/<a>/<g>/switch` with payload ON / OFF
    Switch { address: Address, on: bool },
    /// `cbus/write/<n>/<a>/<g>/ramp` with an absolute target
    RampSet { address: Address, level: u8, ramp_time: Option<String> },
    /// `cbus/write/<n>/<a>/<g>/ramp` with INCREASE / DECREASE
    RampStep { address: Address, step: i16 },
    /// Accepted by the grammar, reserved, dropped with a warning.
    SetValue { address: Address },
    /// `cbus/write/bridge/announce` — re-run discovery
    Announce,
}

/// Why a topic/payload pair was rejected. Callers log these at warn level
/// and drop the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRejection {
    Topic(String),
    Kind(String),
    Address(String),
    Payload { kind: &'static str, payload: String },
}

impl fmt::Display for CommandRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandRejection::Topic(topic) => write!(f, "unrecognized topic {topic:?}"),
            CommandRejection::Kind(kind) => write!(f, "unknown command kind {kind:?}"),
            CommandRejection::Address(path) => write!(f, "incomplete address in {path:?}"),
            CommandRejection::Payload { kind, payload } => {
                write!(f, "invalid {kind} payload {payload:?}")
            }
        }
    }
}

/// Parse an MQTT topic + payload into a [`WriteCommand`].
///
/// The topic grammar is `cbus/write/<network>/<application>/<group>/<kind>`
/// where segments may be empty for kinds that do not need them, plus the
/// special `cbus/write/bridge/announce` topic.
pub fn parse(topic: &str, payload: &str) -> Result<WriteCommand, CommandRejection> {
    if topic == "cbus/write/bridge/announce" {
        return Ok(WriteCommand::Announce);
    }

    let rest = topic
        .strip_prefix("cbus/write/")
        .ok_or_else(|| CommandRejection::Topic(topic.to_string()))?;
    let parts: Vec<&str> = rest.split('/').collect();
    let &[network, application, group, kind] = parts.as_slice() else {
        return Err(CommandRejection::Topic(topic.to_string()));
    };
    if kind.is_empty() {
        return Err(CommandRejection::Topic(topic.to_string()));
    }

    let group_address = || {
        Address::parse(&format!("{network}/{application}/{group}"))
            .ok_or_else(|| CommandRejection::Address(format!("{network}/{application}/{group}")))
    };

    match kind {
        "getall" => {
            if network.is_empty() || application.is_empty() {
                return Err(CommandRejection::Address(rest.to_string()));
            }
            Ok(WriteCommand::GetAll {
                network: network.to_string(),
                application: application.to_string(),
            })
        }
        "gettree" => {
            if network.is_empty() {
                return Err(CommandRejection::Address(rest.to_string()));
            }
            Ok(WriteCommand::GetTree { network: network.to_string() })
        }
        "switch" => {
            let address = group_address()?;
            match payload.trim().to_ascii_uppercase().as_str() {
                "ON" => Ok(WriteCommand::Switch { address, on: true }),
                "OFF" => Ok(WriteCommand::Switch { address, on: false }),
                _ => Err(CommandRejection::Payload { kind: "switch", payload: payload.to_string() }),
            }
        }
        "ramp" => parse_ramp(group_address()?, payload),
        "setvalue" => Ok(WriteCommand::SetValue { address: group_address()? }),
        other => Err(CommandRejection::Kind(other.to_string())),
    }
}

/// Ramp payload grammar: `ON` / `OFF` / `INCREASE` / `DECREASE` /
/// `<percent>[,<ramp time>]`. The ramp time is an opaque suffix handed to
/// C-Gate verbatim (e.g. `2s`, `1m`).
fn parse_ramp(address: Address, payload: &str) -> Result<WriteCommand, CommandRejection> {
    let trimmed = payload.trim();
    match trimmed.to_ascii_uppercase().as_str() {
        "ON" => return Ok(WriteCommand::RampSet { address, level: 255, ramp_time: None }),
        "OFF" => return Ok(WriteCommand::RampSet { address, level: 0, ramp_time: None }),
        "INCREASE" => return Ok(WriteCommand::RampStep { address, step: RAMP_STEP }),
        "DECREASE" => return Ok(WriteCommand::RampStep { address, step: -RAMP_STEP }),
        _ => {}
    }

    let (percent_str, ramp_time) = match trimmed.split_once(',') {
        Some((pct, time)) => (pct.trim(), Some(time.trim().to_string())),
        None => (trimmed, None),
    };
    let ramp_time = ramp_time.filter(|t| !t.is_empty());

    let percent: u32 = percent_str
        .parse()
        .map_err(|_| CommandRejection::Payload { kind: "ramp", payload: payload.to_string() })?;
    let level = percent_to_level(percent.min(100) as u8);
    Ok(WriteCommand::RampSet { address, level, ramp_time })
}
