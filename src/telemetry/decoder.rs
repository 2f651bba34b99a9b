// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Telemetry payload decoding.

use chrono::DateTime;
use serde_json::{Map, Value};

use super::{AttributeValue, Attributes};
use crate::device::Device;
use crate::error::ParseError;

/// Turns a raw telemetry payload into named attributes.
///
/// Decoders are model specific; the device is passed so implementations can
/// pick the right field layout. A failed decode is reported as an error and
/// must not have side effects.
pub trait TelemetryDecoder: Send + Sync {
    /// Decodes one message published on `topic`.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the payload is malformed or not recognized.
    fn decode(
        &self,
        device: &Device,
        topic: &str,
        payload: &[u8],
    ) -> Result<Attributes, ParseError>;
}

/// Decoder for JSON attribute objects.
///
/// Accepts either a flat object of attributes or an envelope whose `payload`
/// field is a string holding such an object:
///
/// ```text
/// {"main_battery_soc": 62, "ac_output_power_switch": 0}
/// {"head": {...}, "payload": "{\"main_battery_soc\": 62}"}
/// ```
///
/// Top-level scalars become attributes; nested objects and arrays are
/// skipped. Integer values whose key contains `timestamp` are read as Unix
/// seconds.
///
/// # Examples
///
/// ```
/// use solix_relay::device::Device;
/// use solix_relay::telemetry::{AttributeValue, JsonTelemetryDecoder, TelemetryDecoder};
///
/// let device = Device::new("SN1", "A1790");
/// let attrs = JsonTelemetryDecoder
///     .decode(&device, "dt/anker_power/A1790/SN1/param_info", br#"{"main_battery_soc":62}"#)
///     .unwrap();
/// assert_eq!(attrs["main_battery_soc"], AttributeValue::Integer(62));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTelemetryDecoder;

impl TelemetryDecoder for JsonTelemetryDecoder {
    fn decode(
        &self,
        device: &Device,
        topic: &str,
        payload: &[u8],
    ) -> Result<Attributes, ParseError> {
        let text = std::str::from_utf8(payload).map_err(|_| ParseError::InvalidUtf8)?;
        let value: Value = serde_json::from_str(text)?;

        let Value::Object(object) = value else {
            return Err(ParseError::UnexpectedFormat(format!(
                "expected JSON object on {topic}"
            )));
        };

        let object = unwrap_envelope(object)?;
        let attributes = flatten(&object);

        if attributes.is_empty() {
            return Err(ParseError::UnexpectedFormat(format!(
                "no attributes for model {} on {topic}",
                device.model()
            )));
        }

        Ok(attributes)
    }
}

/// Replaces a `{"head":..,"payload":"<json>"}` envelope by its inner object.
fn unwrap_envelope(object: Map<String, Value>) -> Result<Map<String, Value>, ParseError> {
    let Some(Value::String(inner)) = object.get("payload") else {
        return Ok(object);
    };

    match serde_json::from_str::<Value>(inner)? {
        Value::Object(inner) => Ok(inner),
        _ => Err(ParseError::UnexpectedFormat(
            "envelope payload is not a JSON object".to_string(),
        )),
    }
}

fn flatten(object: &Map<String, Value>) -> Attributes {
    object
        .iter()
        .filter_map(|(key, value)| convert(key, value).map(|v| (key.clone(), v)))
        .collect()
}

fn convert(key: &str, value: &Value) -> Option<AttributeValue> {
    match value {
        Value::Bool(b) => Some(AttributeValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if key.contains("timestamp")
                    && let Some(ts) = DateTime::from_timestamp(i, 0)
                {
                    return Some(AttributeValue::Timestamp(ts));
                }
                Some(AttributeValue::Integer(i))
            } else {
                n.as_f64().map(AttributeValue::Float)
            }
        }
        Value::String(s) => Some(AttributeValue::Text(s.clone())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(payload: &str) -> Result<Attributes, ParseError> {
        JsonTelemetryDecoder.decode(&Device::new("SN1", "A1790"), "dt/x", payload.as_bytes())
    }

    #[test]
    fn decodes_flat_object() {
        let attrs = decode(
            r#"{"main_battery_soc":62,"ac_output_power_switch":0,"temp":21.5,"name":"pps","ok":true}"#,
        )
        .unwrap();

        assert_eq!(attrs["main_battery_soc"], AttributeValue::Integer(62));
        assert_eq!(attrs["ac_output_power_switch"], AttributeValue::Integer(0));
        assert_eq!(attrs["temp"], AttributeValue::Float(21.5));
        assert_eq!(attrs["name"], AttributeValue::Text("pps".to_string()));
        assert_eq!(attrs["ok"], AttributeValue::Bool(true));
    }

    #[test]
    fn unwraps_envelope() {
        let attrs = decode(
            r#"{"head":{"cmd":17},"payload":"{\"main_battery_soc\":58,\"ac_output_power_switch\":1}"}"#,
        )
        .unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["main_battery_soc"], AttributeValue::Integer(58));
    }

    #[test]
    fn timestamps_are_recognized() {
        let attrs = decode(r#"{"utc_timestamp":1700000000,"soc":5}"#).unwrap();
        assert!(matches!(attrs["utc_timestamp"], AttributeValue::Timestamp(_)));
        assert_eq!(attrs["soc"], AttributeValue::Integer(5));
    }

    #[test]
    fn nested_values_are_skipped() {
        let attrs = decode(r#"{"soc":5,"cells":[1,2],"meta":{"a":1},"none":null}"#).unwrap();
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn malformed_payloads_fail() {
        assert!(matches!(decode("not json"), Err(ParseError::Json(_))));
        assert!(matches!(decode("[1,2]"), Err(ParseError::UnexpectedFormat(_))));
        assert!(matches!(decode("{}"), Err(ParseError::UnexpectedFormat(_))));
        assert!(matches!(
            JsonTelemetryDecoder.decode(&Device::new("a", "b"), "t", &[0xff, 0xfe]),
            Err(ParseError::InvalidUtf8)
        ));
    }
}
