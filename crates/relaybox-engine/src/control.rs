/*!
 * MQTT topic layout and control message decoding.
 *
 * Control topics have the shape `<category>/<client_id>/<key>/<direction>`.
 * The bridge listens on the `request` direction and answers on `response`.
 */
use std::fmt;

use serde::Deserialize;

use relaybox_devices::SensorValue;

use crate::error::{Error, Result};

/// Topic root for sensor readings
pub const SENSORS: &str = "sensors";

/// Direction segment of inbound requests
pub const REQUEST: &str = "request";

/// Direction segment of outbound responses
pub const RESPONSE: &str = "response";

/// Kind of control request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Change a configuration value
    Configurations,
    /// Drive an actuator
    Actuators,
}

impl Category {
    /// Topic segment for the category
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Configurations => "configurations",
            Category::Actuators => "actuators",
        }
    }

    /// Parse a topic segment
    pub fn parse(segment: &str) -> Option<Self> {
        match segment {
            "configurations" => Some(Category::Configurations),
            "actuators" => Some(Category::Actuators),
            _ => None,
        }
    }

    /// Request filter subscribed for `client_id`
    pub fn subscription(&self, client_id: &str) -> String {
        format!("{}/{}/+/{}", self.as_str(), client_id, REQUEST)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every request filter the bridge subscribes to
pub fn subscriptions(client_id: &str) -> Vec<String> {
    [Category::Configurations, Category::Actuators]
        .iter()
        .map(|category| category.subscription(client_id))
        .collect()
}

/// Topic a reading is published on
pub fn sensor_topic(reading: &SensorValue) -> String {
    format!("{}/{}/{}", SENSORS, reading.module, reading.sensor)
}

/// A parsed control request topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTopic {
    /// Request category
    pub category: Category,
    /// Client id named in the topic
    pub client_id: String,
    /// Target key
    pub key: String,
}

impl ControlTopic {
    /// Parse a request topic; a single leading `/` is tolerated
    pub fn parse(topic: &str) -> Result<Self> {
        let trimmed = topic.strip_prefix('/').unwrap_or(topic);
        let segments: Vec<&str> = trimmed.split('/').collect();

        let [category, client_id, key, direction] = segments.as_slice() else {
            return Err(Error::malformed(format!(
                "expected 4 topic segments in '{}', got {}",
                topic,
                segments.len()
            )));
        };

        if *direction != REQUEST {
            return Err(Error::malformed(format!(
                "expected '{}' direction in '{}'",
                REQUEST, topic
            )));
        }
        if client_id.is_empty() || key.is_empty() {
            return Err(Error::malformed(format!("empty segment in '{}'", topic)));
        }

        let category =
            Category::parse(category).ok_or_else(|| Error::UnknownCategory(category.to_string()))?;

        Ok(Self {
            category,
            client_id: client_id.to_string(),
            key: key.to_string(),
        })
    }

    /// Topic the response to this request goes to
    pub fn response_topic(&self) -> String {
        format!("{}/{}/{}/{}", self.category, self.client_id, self.key, RESPONSE)
    }
}

/// Payload of a configuration request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControlRequest {
    /// Requested value, coerced according to `value_type`
    pub value: serde_json::Value,
    /// One of `integer`, `float` or `string`
    pub value_type: String,
}

impl ControlRequest {
    /// Decode a request payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::malformed(format!("bad request payload: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaybox_core::types::Value;
    use serde_json::json;

    #[test]
    fn test_parse_request_topic() {
        let topic = ControlTopic::parse("configurations/RB_3/READING_INTERVAL/request").unwrap();
        assert_eq!(topic.category, Category::Configurations);
        assert_eq!(topic.client_id, "RB_3");
        assert_eq!(topic.key, "READING_INTERVAL");
        assert_eq!(
            topic.response_topic(),
            "configurations/RB_3/READING_INTERVAL/response"
        );
    }

    #[test]
    fn test_parse_leading_slash() {
        let topic = ControlTopic::parse("/actuators/RB_3/relay_1/request").unwrap();
        assert_eq!(topic.category, Category::Actuators);
        assert_eq!(topic.key, "relay_1");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for topic in [
            "configurations/RB_3/ENABLE",
            "configurations/RB_3/ENABLE/request/extra",
            "configurations/RB_3/ENABLE/response",
            "configurations//ENABLE/request",
            "//configurations/RB_3/ENABLE/request",
            "",
        ] {
            assert!(
                matches!(ControlTopic::parse(topic), Err(Error::MalformedMessage(_))),
                "{} should be malformed",
                topic
            );
        }
    }

    #[test]
    fn test_parse_unknown_category() {
        assert!(matches!(
            ControlTopic::parse("sensors/RB_3/adc_vb/request"),
            Err(Error::UnknownCategory(c)) if c == "sensors"
        ));
    }

    #[test]
    fn test_subscriptions() {
        assert_eq!(
            subscriptions("RB_9"),
            vec![
                "configurations/RB_9/+/request".to_string(),
                "actuators/RB_9/+/request".to_string(),
            ]
        );
    }

    #[test]
    fn test_sensor_topic() {
        let reading = SensorValue::new("RB_9", "adc_vch_2", Value::Float(12.5));
        assert_eq!(sensor_topic(&reading), "sensors/RB_9/adc_vch_2");
    }

    #[test]
    fn test_decode_request() {
        let request = ControlRequest::decode(br#"{"value": "5", "value_type": "integer"}"#).unwrap();
        assert_eq!(request.value, json!("5"));
        assert_eq!(request.value_type, "integer");

        assert!(matches!(
            ControlRequest::decode(br#"{"value": 5}"#),
            Err(Error::MalformedMessage(_))
        ));
        assert!(ControlRequest::decode(b"not json").is_err());
    }
}
