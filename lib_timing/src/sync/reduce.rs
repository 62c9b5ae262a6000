use crate::sync::model::UpdateBatch;
use serde_json::Value;

/// Folds one decoded batch into the live state.
///
/// Incremental batches merge each `(topic, value)` pair into
/// `state[topic]` in arrival order; a recap merges its whole document
/// into the state, so topics it does not mention and sibling keys it
/// does not carry are left alone.
pub fn apply(state: &mut Value, batch: UpdateBatch) {
    match batch {
        UpdateBatch::Incremental(updates) => {
            for update in updates {
                merge_topic(state, update.topic, update.value);
            }
        }
        UpdateBatch::Recap(document) => deep_merge(state, document),
    }
}

fn merge_topic(state: &mut Value, topic: String, value: Value) {
    let topics = match state.as_object_mut() {
        Some(topics) => topics,
        None => return,
    };

    if value.is_null() {
        topics.remove(&topic);
        return;
    }

    match topics.get_mut(&topic) {
        Some(existing) => deep_merge(existing, value),
        None => {
            topics.insert(topic, value);
        }
    }
}

/// The merge policy for all feed data.
///
/// Objects merge key-by-key recursively; arrays and scalars are replaced
/// wholesale; an incoming `null` removes the key it addresses. Keys the
/// incoming value does not mention are untouched, which makes the fold
/// associative in application order.
pub fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                if value.is_null() {
                    target.remove(&key);
                } else if let Some(slot) = target.get_mut(&key) {
                    deep_merge(slot, value);
                } else {
                    target.insert(key, value);
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::model::TopicUpdate;
    use serde_json::json;

    fn incremental(topic: &str, value: Value) -> UpdateBatch {
        UpdateBatch::Incremental(vec![TopicUpdate {
            topic: topic.to_string(),
            value,
        }])
    }

    #[test]
    fn objects_merge_key_by_key() {
        let mut state = json!({"A": {"x": 1, "y": 2}});
        apply(&mut state, incremental("A", json!({"x": 9})));

        assert_eq!(state, json!({"A": {"x": 9, "y": 2}}));
    }

    #[test]
    fn recap_merges_instead_of_replacing_topics() {
        let mut state = json!({"A": {"x": 1, "y": 2}});
        apply(&mut state, UpdateBatch::Recap(json!({"A": {"x": 9}})));

        // Sibling keys under A survive a recap, same as an incremental.
        assert_eq!(state, json!({"A": {"x": 9, "y": 2}}));
    }

    #[test]
    fn arrays_and_scalars_replace_wholesale() {
        let mut state = json!({"A": {"laps": [1, 2, 3], "leader": "44"}});
        apply(
            &mut state,
            incremental("A", json!({"laps": [4], "leader": "1"})),
        );

        assert_eq!(state, json!({"A": {"laps": [4], "leader": "1"}}));
    }

    #[test]
    fn null_clears_the_addressed_key_only() {
        let mut state = json!({"A": {"x": 1, "y": {"deep": true}}});
        apply(&mut state, incremental("A", json!({"y": null})));

        assert_eq!(state, json!({"A": {"x": 1}}));
    }

    #[test]
    fn null_topic_value_clears_the_topic() {
        let mut state = json!({"A": {"x": 1}, "B": {"y": 2}});
        apply(&mut state, incremental("B", json!(null)));

        assert_eq!(state, json!({"A": {"x": 1}}));
    }

    #[test]
    fn merge_is_idempotent_for_pure_object_updates() {
        let update = json!({"Lines": {"44": {"Position": "3", "InPit": false}}});
        let mut once = json!({"TimingData": {"Lines": {"44": {"Position": "5"}}}});
        let mut twice = once.clone();

        apply(&mut once, incremental("TimingData", update.clone()));
        apply(&mut twice, incremental("TimingData", update.clone()));
        apply(&mut twice, incremental("TimingData", update));

        assert_eq!(once, twice);
    }

    #[test]
    fn folding_message_by_message_matches_a_single_batch() {
        let u1 = TopicUpdate {
            topic: "T".to_string(),
            value: json!({"a": {"b": 1}, "c": 2}),
        };
        let u2 = TopicUpdate {
            topic: "T".to_string(),
            value: json!({"a": {"d": 3}, "c": 4}),
        };

        let mut folded = json!({"T": {"seed": true}});
        apply(&mut folded, incremental("T", u1.value.clone()));
        apply(&mut folded, incremental("T", u2.value.clone()));

        let mut batched = json!({"T": {"seed": true}});
        apply(&mut batched, UpdateBatch::Incremental(vec![u1, u2]));

        assert_eq!(folded, batched);
        assert_eq!(folded, json!({"T": {"seed": true, "a": {"b": 1, "d": 3}, "c": 4}}));
    }

    #[test]
    fn new_topics_are_inserted() {
        let mut state = json!({});
        apply(&mut state, incremental("WeatherData", json!({"AirTemp": "20.1"})));

        assert_eq!(state, json!({"WeatherData": {"AirTemp": "20.1"}}));
    }

    #[test]
    fn incoming_object_replaces_a_scalar() {
        let mut state = json!({"A": "plain"});
        apply(&mut state, incremental("A", json!({"now": "structured"})));

        assert_eq!(state, json!({"A": {"now": "structured"}}));
    }
}
