//! End-to-end decoder -> reducer -> hub flow over canned upstream frames,
//! the same path the connection manager drives for every inbound frame.

use base64::{engine::general_purpose, Engine as _};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use lib_timing::sync::{decode, reduce};
use lib_timing::BroadcastHub;
use serde_json::{json, Value};
use std::io::Write;

/// JSON -> raw deflate -> base64, the upstream encoding of `.z` topics.
fn compress(value: &Value) -> String {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(value.to_string().as_bytes()).unwrap();
    general_purpose::STANDARD.encode(encoder.finish().unwrap())
}

/// One turn of the consume loop: decode, fold, publish.
fn ingest(state: &mut Value, hub: &BroadcastHub, frame: &str) {
    if let Some(batch) = decode::decode(frame).unwrap() {
        reduce::apply(state, batch);
        hub.publish(state);
    }
}

#[tokio::test]
async fn recap_then_incrementals_produce_merged_snapshots() {
    let hub = BroadcastHub::new();
    let mut subscriber = hub.add_client("viewer");
    let mut state = json!({});

    let car_data = json!({"Entries": {"1": {"Channels": {"0": 280, "2": 11250}}}});
    let recap = json!({
        "R": {
            "SessionInfo": {"Meeting": {"Name": "Grand Prix"}, "Type": "Race"},
            "TrackStatus": {"Status": "1", "Message": "AllClear"},
            "CarData.z": compress(&car_data),
        },
        "I": "1",
    });
    ingest(&mut state, &hub, &recap.to_string());

    let snapshot: Value =
        serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();
    assert_eq!(snapshot["SessionInfo"]["Meeting"]["Name"], "Grand Prix");
    assert_eq!(snapshot["CarData"], car_data);
    assert!(snapshot.get("CarData.z").is_none());

    // An incremental touching one key leaves its siblings alone.
    let update = json!({"M": [
        {"H": "Streaming", "M": "feed", "A": ["TrackStatus", {"Status": "4"}, "ts"]},
    ]});
    ingest(&mut state, &hub, &update.to_string());

    let snapshot: Value =
        serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();
    assert_eq!(snapshot["TrackStatus"]["Status"], "4");
    assert_eq!(snapshot["TrackStatus"]["Message"], "AllClear");
    assert_eq!(snapshot["SessionInfo"]["Type"], "Race");
}

#[tokio::test]
async fn compressed_incremental_updates_merge_under_the_stripped_topic() {
    let hub = BroadcastHub::new();
    let mut subscriber = hub.add_client("viewer");
    let mut state = json!({});

    let first = json!({"Position": [{"Timestamp": "t0", "Entries": {"44": {"X": 100}}}]});
    let second = json!({"Position": [{"Timestamp": "t1", "Entries": {"44": {"X": 250}}}]});

    for doc in [&first, &second] {
        let frame = json!({"M": [
            {"H": "Streaming", "M": "feed", "A": ["Position.z", compress(doc), "ts"]},
        ]});
        ingest(&mut state, &hub, &frame.to_string());
    }

    let _ = subscriber.recv().await.unwrap();
    let snapshot: Value =
        serde_json::from_str(&subscriber.recv().await.unwrap()).unwrap();

    // Arrays replace wholesale: the newer position list wins.
    assert_eq!(snapshot["Position"], second["Position"]);
}

#[tokio::test]
async fn late_subscriber_sees_current_state_without_new_updates() {
    let hub = BroadcastHub::new();
    let mut state = json!({});

    let frame = json!({"M": [
        {"H": "Streaming", "M": "feed", "A": ["LapCount", {"CurrentLap": 12, "TotalLaps": 57}, "ts"]},
    ]});
    ingest(&mut state, &hub, &frame.to_string());

    let mut late = hub.add_client("late-joiner");
    let snapshot: Value = serde_json::from_str(&late.recv().await.unwrap()).unwrap();
    assert_eq!(snapshot["LapCount"]["CurrentLap"], 12);
}

#[tokio::test]
async fn keepalives_and_control_frames_publish_nothing() {
    let hub = BroadcastHub::new();
    let mut subscriber = hub.add_client("viewer");
    let mut state = json!({});

    ingest(&mut state, &hub, "{}");
    ingest(&mut state, &hub, r#"{"C":"d-8A,0|1","S":1,"M":[]}"#);

    assert!(subscriber.try_recv().is_err());
    assert_eq!(state, json!({}));
}
