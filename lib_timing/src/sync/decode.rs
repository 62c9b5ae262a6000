use crate::sync::errors::DecodeError;
use crate::sync::model::{SocketFrame, TopicUpdate, UpdateBatch, FEED_MESSAGE_KIND};
use base64::{engine::general_purpose, Engine as _};
use flate2::read::DeflateDecoder;
use serde_json::Value;
use std::io::Read;

/// Topics whose payloads arrive base64-encoded and raw-deflate
/// compressed. Expanded inline and re-keyed without the suffix.
const COMPRESSED_TOPICS: [&str; 2] = ["CarData.z", "Position.z"];

/// Suffix marking a compressed topic.
const COMPRESSED_SUFFIX: &str = ".z";

/// Turns one raw text frame into feed updates.
///
/// Returns `Ok(None)` for frames carrying no feed data: keep-alives,
/// protocol-control frames, recaps without the initial marker. A bad
/// compressed payload drops only that topic; the rest of the frame
/// survives.
pub fn decode(frame: &str) -> Result<Option<UpdateBatch>, DecodeError> {
    let frame: SocketFrame = serde_json::from_str(frame)?;

    if let Some(messages) = frame.messages {
        return Ok(decode_incremental(messages));
    }

    // A recap document only counts when flagged as the initial reply to
    // our subscribe request.
    if let (Some(recap), Some(initial)) = (frame.recap, frame.initial) {
        if initial.as_str() == Some("1") {
            return Ok(Some(UpdateBatch::Recap(decode_recap(recap))));
        }
    }

    Ok(None)
}

fn decode_incremental(messages: Vec<Value>) -> Option<UpdateBatch> {
    let mut updates = Vec::new();

    for message in messages {
        if message.get("M").and_then(Value::as_str) != Some(FEED_MESSAGE_KIND) {
            continue;
        }
        let args = match message.get("A").and_then(Value::as_array) {
            Some(args) => args,
            None => continue,
        };
        let topic = match args.first().and_then(Value::as_str) {
            Some(topic) => topic,
            None => continue,
        };
        let value = match args.get(1) {
            Some(value) => value,
            None => continue,
        };

        if COMPRESSED_TOPICS.contains(&topic) {
            let payload = match value.as_str() {
                Some(payload) => payload,
                None => {
                    log::warn!("compressed topic '{}' carries a non-string payload; dropped", topic);
                    continue;
                }
            };
            match expand_compressed(topic, payload) {
                Ok(expanded) => updates.push(TopicUpdate {
                    topic: strip_suffix(topic),
                    value: expanded,
                }),
                Err(err) => log::warn!("dropping update: {}", err),
            }
        } else {
            updates.push(TopicUpdate {
                topic: topic.to_string(),
                value: value.clone(),
            });
        }
    }

    if updates.is_empty() {
        None
    } else {
        Some(UpdateBatch::Incremental(updates))
    }
}

fn decode_recap(recap: Value) -> Value {
    let mut doc = match recap {
        Value::Object(doc) => doc,
        other => return other,
    };

    for topic in COMPRESSED_TOPICS {
        let compressed = match doc.remove(topic) {
            Some(compressed) => compressed,
            None => continue,
        };
        let payload = match compressed.as_str() {
            Some(payload) => payload.to_string(),
            None => {
                log::warn!("recap topic '{}' carries a non-string payload; dropped", topic);
                continue;
            }
        };
        match expand_compressed(topic, &payload) {
            Ok(expanded) => {
                doc.insert(strip_suffix(topic), expanded);
            }
            Err(err) => log::warn!("dropping recap topic: {}", err),
        }
    }

    Value::Object(doc)
}

/// Expands one compressed payload: base64 decode, raw inflate, JSON parse.
fn expand_compressed(topic: &str, payload: &str) -> Result<Value, DecodeError> {
    let raw = general_purpose::STANDARD
        .decode(payload)
        .map_err(|source| DecodeError::Base64 {
            topic: topic.to_string(),
            source,
        })?;

    let mut inflated = String::new();
    DeflateDecoder::new(raw.as_slice())
        .read_to_string(&mut inflated)
        .map_err(|source| DecodeError::Inflate {
            topic: topic.to_string(),
            source,
        })?;

    serde_json::from_str(&inflated).map_err(|source| DecodeError::Payload {
        topic: topic.to_string(),
        source,
    })
}

fn strip_suffix(topic: &str) -> String {
    topic
        .strip_suffix(COMPRESSED_SUFFIX)
        .unwrap_or(topic)
        .to_string()
}
