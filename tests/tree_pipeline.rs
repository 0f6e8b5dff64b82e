// End-to-end tree transfer: synthetic 343/347/344 command-channel lines
// through the response processor, then into the discovery publisher.

use cgateweb::discovery::build_tree_publications;
use cgateweb::response::{ResponseAction, ResponseProcessor};
use cgateweb::settings::{RawSettings, normalize};

const TREE_LINES: &[&str] = &[
    "343-Begin XML snippet",
    "347-<Network>",
    "347-  <Interface>",
    "347-    <Network>",
    "347-      <NetworkNumber>254</NetworkNumber>",
    "347-      <Unit>",
    "347-        <Application>",
    "347-          <ApplicationAddress>56</ApplicationAddress>",
    "347-          <Group>",
    "347-            <GroupAddress>9</GroupAddress>",
    "347-            <Label>Hall</Label>",
    "347-          </Group>",
    "347-        </Application>",
    "347-      </Unit>",
    "347-    </Network>",
    "347-  </Interface>",
    "347-</Network>",
    "344-End XML snippet",
];

#[test]
fn synthetic_tree_transfer_produces_discovery() {
    let settings = normalize(RawSettings {
        cgate_host: Some("127.0.0.1".into()),
        cgate_project: Some("HOME".into()),
        mqtt_broker: Some("localhost:1883".into()),
        ha_discovery_enabled: Some(true),
        ..Default::default()
    })
    .unwrap();

    let mut processor = ResponseProcessor::new();
    processor.tree_requested("254".to_string());

    let mut completed = None;
    for line in TREE_LINES {
        match processor.process_line(line) {
            ResponseAction::None => {}
            ResponseAction::Tree { network, xml } => completed = Some((network, xml)),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    let (network, xml) = completed.expect("344 completes the transfer");
    assert_eq!(network, "254");

    let publications = build_tree_publications(&settings, &network, &xml).unwrap();
    let topics: Vec<&str> = publications.iter().map(|p| p.topic.as_str()).collect();
    assert!(topics.contains(&"homeassistant/light/cgateweb_254_56_9/config"));
    assert!(topics.contains(&"cbus/read/254///tree"));
    assert!(publications.iter().all(|p| p.retain));

    let hall = publications
        .iter()
        .find(|p| p.topic == "homeassistant/light/cgateweb_254_56_9/config")
        .unwrap();
    let config: serde_json::Value = serde_json::from_str(&hall.payload).unwrap();
    assert_eq!(config["unique_id"], "cgateweb_254_56_9");
    assert_eq!(config["name"], "Hall");

    // Status interleaved after the transfer still parses normally.
    let action = processor.process_line("300-//HOME/254/56/9: level=255");
    assert!(matches!(action, ResponseAction::Event(_)));
}
