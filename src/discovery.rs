// MIT License - Copyright (c) 2017 Doug Rathbone
// Rust translation of ha-discovery.js

use std::collections::HashSet;
use std::sync::Arc;

use roxmltree::{Document, Node};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::mqtt::MqttPublication;
use crate::queue::ThrottledQueue;
use crate::settings::Settings;

/// The lighting application id is fixed by C-Bus itself.
const LIGHTING_APP_ID: &str = "56";

/// Home Assistant component a C-Bus application maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Light,
    Cover,
    Switch,
    Relay,
    Pir,
}

impl Component {
    fn topic_segment(self) -> &'static str {
        match self {
            Component::Light => "light",
            Component::Cover => "cover",
            Component::Switch | Component::Relay => "switch",
            Component::Pir => "binary_sensor",
        }
    }

    fn model(self) -> &'static str {
        match self {
            Component::Light => "Lighting Group",
            Component::Cover => "Enable Control Group (Cover)",
            Component::Switch => "Enable Control Group (Switch)",
            Component::Relay => "Enable Control Group (Relay)",
            Component::Pir => "PIR Motion Sensor",
        }
    }

    fn device_class(self) -> Option<&'static str> {
        match self {
            Component::Light | Component::Switch => None,
            Component::Cover => Some("shutter"),
            Component::Relay => Some("outlet"),
            Component::Pir => Some("motion"),
        }
    }

    fn type_label(self) -> &'static str {
        match self {
            Component::Light => "Light",
            Component::Cover => "Cover",
            Component::Switch => "Switch",
            Component::Relay => "Relay",
            Component::Pir => "PIR",
        }
    }
}

#[derive(Debug, Serialize)]
struct DeviceInfo {
    identifiers: Vec<String>,
    name: String,
    manufacturer: &'static str,
    model: &'static str,
    via_device: &'static str,
}

#[derive(Debug, Serialize)]
struct OriginInfo {
    name: &'static str,
    sw_version: &'static str,
    support_url: &'static str,
}

/// One retained discovery document, shaped for Home Assistant MQTT
/// discovery. Brightness keys only appear on lights.
#[derive(Debug, Serialize)]
struct DiscoveryConfig {
    name: String,
    unique_id: String,
    state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    brightness_state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    brightness_command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    brightness_scale: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    on_command_type: Option<&'static str>,
    payload_on: &'static str,
    payload_off: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<&'static str>,
    qos: u8,
    retain: bool,
    device: DeviceInfo,
    origin: OriginInfo,
}

/// Requests, parses and publishes the C-Gate project tree.
pub struct DiscoveryPublisher {
    settings: Arc<Settings>,
    mqtt_queue: ThrottledQueue<MqttPublication>,
}

impl DiscoveryPublisher {
    pub fn new(settings: Arc<Settings>, mqtt_queue: ThrottledQueue<MqttPublication>) -> Self {
        Self { settings, mqtt_queue }
    }

    /// Networks to announce, per configuration.
    pub fn networks(&self) -> Vec<String> {
        self.settings.discovery_networks()
    }

    /// Publish discovery configs and the raw tree JSON for one completed
    /// tree transfer. Parse failures abandon this network's discovery.
    pub async fn publish_tree(&self, network: &str, xml: &str) {
        match build_tree_publications(&self.settings, network, xml) {
            Ok(publications) => {
                info!(
                    "discovery: publishing {} document(s) for network {network}",
                    publications.len()
                );
                for publication in publications {
                    self.mqtt_queue.push(publication).await;
                }
            }
            Err(e) => error!("discovery: network {network}: {e}"),
        }
    }
}

/// Map an application id onto a component. The fixed lighting id wins, then
/// cover > switch > relay > PIR for user-configured ids.
fn component_for(settings: &Settings, app_id: &str) -> Option<Component> {
    if app_id == LIGHTING_APP_ID {
        return Some(Component::Light);
    }
    let matches_setting = |setting: &Option<String>| setting.as_deref() == Some(app_id);
    if matches_setting(&settings.ha_cover_app_id) {
        Some(Component::Cover)
    } else if matches_setting(&settings.ha_switch_app_id) {
        Some(Component::Switch)
    } else if matches_setting(&settings.ha_relay_app_id) {
        Some(Component::Relay)
    } else if matches_setting(&settings.ha_pir_app_id) {
        Some(Component::Pir)
    } else {
        None
    }
}

/// Parse one tree XML document into all of its MQTT publications: one
/// retained discovery config per known group plus the tree JSON itself.
pub fn build_tree_publications(
    settings: &Settings,
    network: &str,
    xml: &str,
) -> Result<Vec<MqttPublication>> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    if root.tag_name().name() != "Network" {
        return Err(protocol(format!("unexpected root element {:?}", root.tag_name().name())));
    }
    let inner = child(root, "Interface")
        .and_then(|interface| child(interface, "Network"))
        .ok_or_else(|| protocol("missing Interface/Network path".to_string()))?;

    let number = child_text(inner, "NetworkNumber");
    if number.as_deref() != Some(network) {
        return Err(protocol(format!(
            "tree is for network {:?}, expected {network}",
            number.unwrap_or_default()
        )));
    }

    let mut publications = Vec::new();
    let mut seen = HashSet::new();

    for unit in children(inner, "Unit") {
        for application in children(unit, "Application") {
            let Some(app_id) = child_text(application, "ApplicationAddress") else {
                continue;
            };
            let Some(component) = component_for(settings, &app_id) else {
                debug!("discovery: skipping application {app_id} (no mapping)");
                continue;
            };
            for group in children(application, "Group") {
                let Some(group_id) = child_text(group, "GroupAddress") else {
                    continue;
                };
                if group_id.is_empty() {
                    continue;
                }
                let unique_id = format!("cgateweb_{network}_{app_id}_{group_id}");
                if !seen.insert(unique_id.clone()) {
                    continue;
                }
                let label = child_text(group, "Label")
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| {
                        format!(
                            "CBus {} {network}/{app_id}/{group_id}",
                            component.type_label()
                        )
                    });
                publications.push(config_publication(
                    settings, component, network, &app_id, &group_id, &unique_id, &label,
                ));
            }
        }
    }

    if publications.is_empty() {
        warn!("discovery: network {network} produced no discovery documents");
    }

    // The full parsed tree, for consumers that want the raw structure.
    publications.push(
        MqttPublication::new(format!("cbus/read/{network}///tree"), xml_to_json(root).to_string())
            .retained(true),
    );

    Ok(publications)
}

fn config_publication(
    settings: &Settings,
    component: Component,
    network: &str,
    app_id: &str,
    group_id: &str,
    unique_id: &str,
    label: &str,
) -> MqttPublication {
    let base = format!("cbus/read/{network}/{app_id}/{group_id}");
    let write_base = format!("cbus/write/{network}/{app_id}/{group_id}");

    let command_topic = match component {
        Component::Light | Component::Cover => Some(format!("{write_base}/ramp")),
        Component::Switch | Component::Relay => Some(format!("{write_base}/switch")),
        Component::Pir => None,
    };

    let is_light = component == Component::Light;
    let config = DiscoveryConfig {
        name: label.to_string(),
        unique_id: unique_id.to_string(),
        state_topic: format!("{base}/state"),
        command_topic,
        brightness_state_topic: is_light.then(|| format!("{base}/level")),
        brightness_command_topic: is_light.then(|| format!("{write_base}/ramp")),
        brightness_scale: is_light.then_some(100),
        on_command_type: is_light.then_some("brightness"),
        payload_on: "ON",
        payload_off: "OFF",
        device_class: component.device_class(),
        qos: 0,
        retain: true,
        device: DeviceInfo {
            identifiers: vec![unique_id.to_string()],
            name: label.to_string(),
            manufacturer: "Clipsal C-Bus via cgateweb",
            model: component.model(),
            via_device: "cgateweb_bridge",
        },
        origin: OriginInfo {
            name: "cgateweb",
            sw_version: env!("CARGO_PKG_VERSION"),
            support_url: "https://github.com/dougrathbone/cgateweb",
        },
    };

    let topic = format!(
        "{}/{}/{unique_id}/config",
        settings.ha_discovery_prefix,
        component.topic_segment()
    );
    let payload = serde_json::to_string(&config).expect("discovery config serializes");
    MqttPublication::new(topic, payload).retained(true)
}

fn protocol(details: String) -> BridgeError {
    BridgeError::Protocol { details }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| c.is_element() && c.tag_name().name() == name)
}

fn children<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |c| c.is_element() && c.tag_name().name() == name)
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name).map(|c| c.text().unwrap_or_default().trim().to_string())
}

/// Mirror an XML element into JSON: child elements become keys, repeated
/// sibling names become arrays, text-only elements become strings.
fn xml_to_json(node: Node<'_, '_>) -> Value {
    let mut map = serde_json::Map::new();
    for element in node.children().filter(|c| c.is_element()) {
        let name = element.tag_name().name().to_string();
        let value = xml_to_json(element);
        match map.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(name, value);
            }
        }
    }
    if map.is_empty() {
        return Value::String(node.text().unwrap_or_default().trim().to_string());
    }
    Value::Object(map)
}
