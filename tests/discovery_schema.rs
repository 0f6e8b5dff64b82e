// Schema validation tests for the Home Assistant discovery wire format
//
// These run the real tree-XML parser over a synthetic C-Gate tree and
// validate every published discovery document against the JSON Schema
// files in schemas/mqtt/.

use cgateweb::discovery::build_tree_publications;
use cgateweb::mqtt::MqttPublication;
use cgateweb::settings::{RawSettings, Settings, normalize};

const SAMPLE_TREE: &str = r#"
<Network>
  <Interface>
    <Network>
      <NetworkNumber>254</NetworkNumber>
      <Unit>
        <Application>
          <ApplicationAddress>56</ApplicationAddress>
          <Group>
            <GroupAddress>7</GroupAddress>
            <Label>Kitchen</Label>
          </Group>
          <Group>
            <GroupAddress>9</GroupAddress>
            <Label>Hall</Label>
          </Group>
        </Application>
        <Application>
          <ApplicationAddress>203</ApplicationAddress>
          <Group>
            <GroupAddress>1</GroupAddress>
            <Label>Bedroom Blind</Label>
          </Group>
        </Application>
        <Application>
          <ApplicationAddress>228</ApplicationAddress>
          <Group>
            <GroupAddress>2</GroupAddress>
            <Label>Hallway Motion</Label>
          </Group>
        </Application>
      </Unit>
    </Network>
  </Interface>
</Network>
"#;

fn settings() -> Settings {
    normalize(RawSettings {
        cgate_host: Some("127.0.0.1".into()),
        cgate_project: Some("HOME".into()),
        mqtt_broker: Some("localhost:1883".into()),
        ha_discovery_enabled: Some(true),
        ha_cover_app_id: Some("203".into()),
        ha_pir_app_id: Some("228".into()),
        ..Default::default()
    })
    .unwrap()
}

fn publications() -> Vec<MqttPublication> {
    build_tree_publications(&settings(), "254", SAMPLE_TREE).unwrap()
}

fn load_schema(name: &str) -> serde_json::Value {
    let path = format!("{}/schemas/mqtt/{name}", env!("CARGO_MANIFEST_DIR"));
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read schema {path}: {e}"));
    serde_json::from_str(&text)
        .unwrap_or_else(|e| panic!("Failed to parse schema {path}: {e}"))
}

fn build_validator(schema_name: &str) -> jsonschema::Validator {
    let schema = load_schema(schema_name);
    jsonschema::options()
        .with_retriever(LocalRetriever)
        .build(&schema)
        .unwrap_or_else(|e| panic!("Failed to compile schema {schema_name}: {e}"))
}

fn validate(schema_name: &str, instance: &serde_json::Value) {
    let validator = build_validator(schema_name);
    let errors: Vec<_> = validator.iter_errors(instance).collect();
    if !errors.is_empty() {
        let msgs: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
        panic!(
            "Schema validation failed for {schema_name}:\n{}\nInstance: {}",
            msgs.join("\n"),
            serde_json::to_string_pretty(instance).unwrap()
        );
    }
}

fn validate_fails(schema_name: &str, instance: &serde_json::Value) {
    let validator = build_validator(schema_name);
    assert!(
        !validator.is_valid(instance),
        "Expected schema validation to fail for {schema_name}, but it passed.\nInstance: {}",
        serde_json::to_string_pretty(instance).unwrap()
    );
}

// Retriever that loads $ref schemas from the local filesystem
struct LocalRetriever;

impl jsonschema::Retrieve for LocalRetriever {
    fn retrieve(
        &self,
        uri: &jsonschema::Uri<String>,
    ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
        let uri_str = uri.as_str();
        let schema_dir = format!("{}/schemas/mqtt/", env!("CARGO_MANIFEST_DIR"));

        let filename = if let Some(rest) = uri_str.strip_prefix("json-schema:///") {
            rest
        } else if let Some(path) = uri_str.strip_prefix("file://") {
            let text = std::fs::read_to_string(path)?;
            return Ok(serde_json::from_str(&text)?);
        } else {
            uri_str
        };

        let path = format!("{schema_dir}{filename}");
        if std::path::Path::new(&path).exists() {
            let text = std::fs::read_to_string(&path)?;
            return Ok(serde_json::from_str(&text)?);
        }
        Err(format!("Cannot retrieve schema: {uri_str}").into())
    }
}

fn payload_for(topic: &str) -> serde_json::Value {
    let publication = publications()
        .into_iter()
        .find(|p| p.topic == topic)
        .unwrap_or_else(|| panic!("no publication on {topic}"));
    assert!(publication.retain, "{topic} must be retained");
    serde_json::from_str(&publication.payload).unwrap()
}

// =========================================================================
// Real parser output against the schemas
// =========================================================================

#[test]
fn light_config_matches_schema() {
    validate(
        "discovery_light.schema.json",
        &payload_for("homeassistant/light/cgateweb_254_56_7/config"),
    );
}

#[test]
fn second_light_config_matches_schema() {
    validate(
        "discovery_light.schema.json",
        &payload_for("homeassistant/light/cgateweb_254_56_9/config"),
    );
}

#[test]
fn cover_config_matches_schema() {
    validate(
        "discovery_cover.schema.json",
        &payload_for("homeassistant/cover/cgateweb_254_203_1/config"),
    );
}

#[test]
fn binary_sensor_config_matches_schema() {
    validate(
        "discovery_binary_sensor.schema.json",
        &payload_for("homeassistant/binary_sensor/cgateweb_254_228_2/config"),
    );
}

#[test]
fn light_names_come_from_labels() {
    let config = payload_for("homeassistant/light/cgateweb_254_56_7/config");
    assert_eq!(config["name"], "Kitchen");
    let config = payload_for("homeassistant/light/cgateweb_254_56_9/config");
    assert_eq!(config["name"], "Hall");
}

#[test]
fn tree_json_is_published() {
    let tree = payload_for("cbus/read/254///tree");
    assert_eq!(tree["Interface"]["Network"]["NetworkNumber"], "254");
}

// =========================================================================
// Negative cases: the schemas actually bite
// =========================================================================

#[test]
fn light_config_without_brightness_rejected() {
    let mut config = payload_for("homeassistant/light/cgateweb_254_56_7/config");
    config.as_object_mut().unwrap().remove("brightness_scale");
    validate_fails("discovery_light.schema.json", &config);
}

#[test]
fn cover_config_with_brightness_rejected() {
    let mut config = payload_for("homeassistant/cover/cgateweb_254_203_1/config");
    config
        .as_object_mut()
        .unwrap()
        .insert("brightness_scale".into(), serde_json::json!(100));
    validate_fails("discovery_cover.schema.json", &config);
}

#[test]
fn binary_sensor_with_command_topic_rejected() {
    let mut config = payload_for("homeassistant/binary_sensor/cgateweb_254_228_2/config");
    config
        .as_object_mut()
        .unwrap()
        .insert("command_topic".into(), serde_json::json!("cbus/write/254/228/2/switch"));
    validate_fails("discovery_binary_sensor.schema.json", &config);
}

#[test]
fn wrong_unique_id_shape_rejected() {
    let mut config = payload_for("homeassistant/light/cgateweb_254_56_7/config");
    config
        .as_object_mut()
        .unwrap()
        .insert("unique_id".into(), serde_json::json!("kitchen-light"));
    validate_fails("discovery_light.schema.json", &config);
}

#[test]
fn retain_false_rejected() {
    let mut config = payload_for("homeassistant/light/cgateweb_254_56_7/config");
    config.as_object_mut().unwrap().insert("retain".into(), serde_json::json!(false));
    validate_fails("discovery_light.schema.json", &config);
}
