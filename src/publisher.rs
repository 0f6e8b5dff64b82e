// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation

use std::sync::Arc;

use crate::mqtt::MqttPublication;
use crate::protocol::{CbusEvent, level_to_percent};
use crate::queue::ThrottledQueue;
use crate::settings::Settings;

/// Converts parsed C-Bus events into `cbus/read/...` state and level
/// publications, paced through the MQTT queue.
pub struct EventPublisher {
    settings: Arc<Settings>,
    mqtt_queue: ThrottledQueue<MqttPublication>,
}

impl EventPublisher {
    pub fn new(settings: Arc<Settings>, mqtt_queue: ThrottledQueue<MqttPublication>) -> Self {
        Self { settings, mqtt_queue }
    }

    pub async fn publish_event(&self, event: &CbusEvent) {
        for publication in publications_for(&self.settings, event) {
            self.mqtt_queue.push(publication).await;
        }
    }
}

/// State/level publications for one event.
///
/// PIR groups publish state only, derived from the action; everything else
/// publishes state plus a 0-100 level.
pub fn publications_for(settings: &Settings, event: &CbusEvent) -> Vec<MqttPublication> {
    let base = format!("cbus/read/{}", event.address);
    let retain = settings.retain_reads;

    let level_pct = match event.level {
        Some(level) => level_to_percent(level),
        None if event.action == "on" => 100,
        None => 0,
    };

    let is_pir = settings
        .ha_pir_app_id
        .as_deref()
        .is_some_and(|pir| pir == event.address.application);

    let state = if is_pir {
        if event.action == "on" { "ON" } else { "OFF" }
    } else if event.level.is_some() {
        if level_pct > 0 { "ON" } else { "OFF" }
    } else if event.action == "on" {
        "ON"
    } else {
        "OFF"
    };

    let mut publications =
        vec![MqttPublication::new(format!("{base}/state"), state).retained(retain)];

    if !is_pir {
        publications.push(
            MqttPublication::new(format!("{base}/level"), level_pct.to_string()).retained(retain),
        );
    }

    publications
}
