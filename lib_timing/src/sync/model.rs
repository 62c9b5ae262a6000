use serde::Deserialize;
use serde_json::Value;

/// Kind marker carried by data-bearing messages inside an incremental
/// frame. Anything else (`H`, protocol acks, ...) is control traffic.
pub const FEED_MESSAGE_KIND: &str = "feed";

/// Envelope of every inbound text frame on the streaming socket.
///
/// Incremental frames carry `M`, the recap that answers our subscribe
/// request carries `R` plus the initial marker `I`. Keep-alives are
/// empty objects and deserialize with all fields `None`.
#[derive(Debug, Deserialize)]
pub struct SocketFrame {
    #[serde(rename = "M", default)]
    pub messages: Option<Vec<Value>>,
    #[serde(rename = "R", default)]
    pub recap: Option<Value>,
    #[serde(rename = "I", default)]
    pub initial: Option<Value>,
}

/// One decoded incremental update: a topic and its new (partial) value.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicUpdate {
    pub topic: String,
    pub value: Value,
}

/// Output of the decoder: either an ordered run of incremental updates
/// or one full recap document of topics.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateBatch {
    Incremental(Vec<TopicUpdate>),
    Recap(Value),
}
