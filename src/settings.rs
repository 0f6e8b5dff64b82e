// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of settings.js

use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Raw user-supplied options, straight out of the configuration source
/// (TOML file or supervisor options JSON). Keys are camelCase to stay
/// compatible with the original option names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawSettings {
    pub cgate_host: Option<String>,
    pub cgate_command_port: Option<u16>,
    pub cgate_event_port: Option<u16>,
    pub cgate_project: Option<String>,
    pub cgate_user: Option<String>,
    pub cgate_password: Option<String>,
    pub mqtt_broker: Option<String>,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: Option<String>,
    pub message_interval_ms: Option<u32>,
    pub get_all_net_app: Option<String>,
    pub get_all_on_start: Option<bool>,
    pub get_all_period_seconds: Option<u32>,
    pub retain_reads: Option<bool>,
    pub ha_discovery_enabled: Option<bool>,
    pub ha_discovery_networks: Option<Vec<String>>,
    pub ha_discovery_prefix: Option<String>,
    pub ha_cover_app_id: Option<String>,
    pub ha_switch_app_id: Option<String>,
    pub ha_relay_app_id: Option<String>,
    pub ha_pir_app_id: Option<String>,
    pub pool_size: Option<u32>,
    pub health_check_interval_ms: Option<u64>,
    pub keep_alive_interval_ms: Option<u64>,
    pub reconnect_initial_delay_ms: Option<u64>,
    pub reconnect_max_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub max_retries: Option<u32>,
    pub connection_timeout_ms: Option<u64>,
}

/// Fully validated, immutable bridge configuration.
///
/// Produced once by [`normalize`]; every component receives a shared
/// reference and nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cgate_host: String,
    pub cgate_command_port: u16,
    pub cgate_event_port: u16,
    pub cgate_project: String,
    pub cgate_user: Option<String>,
    pub cgate_password: Option<String>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub message_interval: Duration,
    /// `(network, application)` from `getAllNetApp`.
    pub get_all_net_app: Option<(String, String)>,
    pub get_all_on_start: bool,
    pub get_all_period: Option<Duration>,
    pub retain_reads: bool,
    pub ha_discovery_enabled: bool,
    pub ha_discovery_networks: Vec<String>,
    pub ha_discovery_prefix: String,
    pub ha_cover_app_id: Option<String>,
    pub ha_switch_app_id: Option<String>,
    pub ha_relay_app_id: Option<String>,
    pub ha_pir_app_id: Option<String>,
    pub pool_size: u32,
    pub health_check_interval: Duration,
    pub keep_alive_interval: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub max_retries: u32,
    pub connection_timeout: Duration,
}

const MIN_HEALTH_CHECK_MS: u64 = 5_000;
const MIN_KEEP_ALIVE_MS: u64 = 10_000;

fn invalid(details: impl Into<String>) -> BridgeError {
    BridgeError::InvalidConfig { details: details.into() }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse a `host:port` broker string. A bare host defaults to port 1883.
fn parse_broker(broker: &str) -> Result<(String, u16)> {
    let trimmed = broker
        .strip_prefix("mqtt://")
        .or_else(|| broker.strip_prefix("tcp://"))
        .unwrap_or(broker);
    match trimmed.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| invalid(format!("mqttBroker port is not a number: {broker}")))?;
            if host.is_empty() {
                return Err(invalid("mqttBroker host is empty"));
            }
            Ok((host.to_string(), port))
        }
        None => {
            if trimmed.is_empty() {
                return Err(invalid("mqttBroker is empty"));
            }
            Ok((trimmed.to_string(), 1883))
        }
    }
}

/// Parse a `<network>/<application>` pair from `getAllNetApp`.
fn parse_net_app(value: &str) -> Result<(String, String)> {
    match value.split_once('/') {
        Some((net, app)) if !net.is_empty() && !app.is_empty() => {
            Ok((net.to_string(), app.to_string()))
        }
        _ => Err(invalid(format!(
            "getAllNetApp must look like <network>/<application>, got {value:?}"
        ))),
    }
}

/// Validate raw options into an immutable [`Settings`] record.
///
/// This is the only place defaults are applied and interval floors are
/// enforced; the result never changes for the lifetime of the bridge.
pub fn normalize(raw: RawSettings) -> Result<Settings> {
    let cgate_host = non_empty(raw.cgate_host).ok_or_else(|| invalid("cgateHost is required"))?;
    let cgate_project =
        non_empty(raw.cgate_project).ok_or_else(|| invalid("cgateProject is required"))?;
    let broker = non_empty(raw.mqtt_broker).ok_or_else(|| invalid("mqttBroker is required"))?;
    let (mqtt_host, mqtt_port) = parse_broker(&broker)?;

    let cgate_command_port = raw.cgate_command_port.unwrap_or(20023);
    let cgate_event_port = raw.cgate_event_port.unwrap_or(20025);
    if cgate_command_port == cgate_event_port {
        return Err(invalid(format!(
            "cgateCommandPort and cgateEventPort must differ (both {cgate_command_port})"
        )));
    }

    let message_interval_ms = raw.message_interval_ms.unwrap_or(100);
    if message_interval_ms == 0 {
        return Err(invalid("messageIntervalMs must be greater than zero"));
    }

    let pool_size = raw.pool_size.unwrap_or(3);
    if pool_size == 0 {
        return Err(invalid("poolSize must be at least 1"));
    }

    let health_check_interval_ms = raw
        .health_check_interval_ms
        .unwrap_or(30_000)
        .max(MIN_HEALTH_CHECK_MS);
    let keep_alive_interval_ms = raw
        .keep_alive_interval_ms
        .unwrap_or(60_000)
        .max(MIN_KEEP_ALIVE_MS);

    let get_all_net_app = match non_empty(raw.get_all_net_app) {
        Some(value) => Some(parse_net_app(&value)?),
        None => None,
    };

    let get_all_period = match raw.get_all_period_seconds {
        Some(0) => return Err(invalid("getAllPeriodSeconds must be greater than zero")),
        Some(secs) => Some(Duration::from_secs(u64::from(secs))),
        None => None,
    };

    let ha_discovery_networks = raw
        .ha_discovery_networks
        .unwrap_or_default()
        .into_iter()
        .filter(|n| !n.trim().is_empty())
        .collect();

    Ok(Settings {
        cgate_host,
        cgate_command_port,
        cgate_event_port,
        cgate_project,
        cgate_user: non_empty(raw.cgate_user),
        cgate_password: non_empty(raw.cgate_password),
        mqtt_host,
        mqtt_port,
        mqtt_user: non_empty(raw.mqtt_user),
        mqtt_password: non_empty(raw.mqtt_password),
        mqtt_client_id: non_empty(raw.mqtt_client_id).unwrap_or_else(|| "cgateweb".to_string()),
        message_interval: Duration::from_millis(u64::from(message_interval_ms)),
        get_all_net_app,
        get_all_on_start: raw.get_all_on_start.unwrap_or(false),
        get_all_period,
        retain_reads: raw.retain_reads.unwrap_or(false),
        ha_discovery_enabled: raw.ha_discovery_enabled.unwrap_or(false),
        ha_discovery_networks,
        ha_discovery_prefix: non_empty(raw.ha_discovery_prefix)
            .unwrap_or_else(|| "homeassistant".to_string()),
        ha_cover_app_id: non_empty(raw.ha_cover_app_id),
        ha_switch_app_id: non_empty(raw.ha_switch_app_id),
        ha_relay_app_id: non_empty(raw.ha_relay_app_id),
        ha_pir_app_id: non_empty(raw.ha_pir_app_id),
        pool_size,
        health_check_interval: Duration::from_millis(health_check_interval_ms),
        keep_alive_interval: Duration::from_millis(keep_alive_interval_ms),
        reconnect_initial_delay: Duration::from_millis(raw.reconnect_initial_delay_ms.unwrap_or(1_000)),
        reconnect_max_delay: Duration::from_millis(raw.reconnect_max_delay_ms.unwrap_or(60_000)),
        max_reconnect_attempts: raw.max_reconnect_attempts.unwrap_or(10),
        max_retries: raw.max_retries.unwrap_or(3),
        connection_timeout: Duration::from_millis(raw.connection_timeout_ms.unwrap_or(5_000)),
    })
}

impl Settings {
    /// Networks to query for discovery: the configured list, or the
    /// `getAllNetApp` network as a fallback.
    pub fn discovery_networks(&self) -> Vec<String> {
        if !self.ha_discovery_networks.is_empty() {
            return self.ha_discovery_networks.clone();
        }
        match &self.get_all_net_app {
            Some((network, _)) => vec![network.clone()],
            None => Vec::new(),
        }
    }
}
