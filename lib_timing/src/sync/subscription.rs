use serde_json::json;

/// Every topic the engine subscribes to on connect.
///
/// `CarData.z` and `Position.z` arrive base64 + deflate compressed and
/// are re-keyed by the decoder as `CarData` / `Position`.
pub const FEED_TOPICS: [&str; 15] = [
    "Heartbeat",
    "CarData.z",
    "Position.z",
    "ExtrapolatedClock",
    "TimingStats",
    "TimingAppData",
    "WeatherData",
    "TrackStatus",
    "DriverList",
    "RaceControlMessages",
    "SessionInfo",
    "SessionData",
    "LapCount",
    "TimingData",
    "TeamRadio",
];

/// Hub specification sent as `connectionData` during negotiation and on
/// the connect URL.
pub const HUB_SPEC: &str = r#"[{"name":"Streaming"}]"#;

/// Builds the one-shot subscribe frame sent right after the socket opens.
pub fn subscribe_frame() -> String {
    json!({
        "H": "Streaming",
        "M": "Subscribe",
        "A": [FEED_TOPICS],
        "I": 1,
    })
    .to_string()
}
