use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::{Error, Result};
use crate::model::{IngestRequest, NewReading};

/// Checks the ingest envelope. A violation here rejects the whole request
/// before any write is attempted.
pub fn validate_envelope(req: &IngestRequest) -> Result<()> {
    if req.device_id.is_empty() {
        return Err(Error::Validation(
            "device_id must be a non-empty string".to_string(),
        ));
    }

    if req.sensors.is_empty() {
        return Err(Error::Validation(
            "At least one sensor reading required".to_string(),
        ));
    }

    Ok(())
}

/// Converts one raw sensor entry into a storable reading.
///
/// Entries are converted independently; the caller counts a failure and
/// moves on to the next entry.
pub fn convert_entry(entry: &Value, timestamp: DateTime<Utc>) -> Result<NewReading> {
    let obj = entry
        .as_object()
        .ok_or_else(|| Error::Validation("Sensor entry must be an object".to_string()))?;

    let sensor_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation("Sensor entry missing string field: type".to_string()))?;

    let unit = obj
        .get("unit")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation("Sensor entry missing string field: unit".to_string()))?;

    let value = obj
        .get("value")
        .and_then(coerce_value)
        .ok_or_else(|| Error::Validation("Sensor entry value must be a number".to_string()))?;

    Ok(NewReading {
        sensor_type: sensor_type.to_string(),
        value,
        unit: unit.to_string(),
        timestamp,
    })
}

// Numbers pass through; numeric strings are parsed; anything else fails.
fn coerce_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_valid_envelope() {
        let req = IngestRequest {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            sensors: vec![json!({"type": "temperature", "value": 23.5, "unit": "C"})],
        };

        assert!(validate_envelope(&req).is_ok());
    }

    #[test]
    fn test_empty_device_id_rejected() {
        let req = IngestRequest {
            device_id: String::new(),
            sensors: vec![json!({"type": "temperature", "value": 23.5, "unit": "C"})],
        };

        assert!(validate_envelope(&req).is_err());
    }

    #[test]
    fn test_empty_sensors_rejected() {
        let req = IngestRequest {
            device_id: "AA:BB:CC:DD:EE:FF".to_string(),
            sensors: vec![],
        };

        assert!(validate_envelope(&req).is_err());
    }

    #[test]
    fn test_convert_numeric_value() {
        let entry = json!({"type": "temperature", "value": 23.5, "unit": "C"});
        let reading = convert_entry(&entry, now()).unwrap();

        assert_eq!(reading.sensor_type, "temperature");
        assert_eq!(reading.value, 23.5);
        assert_eq!(reading.unit, "C");
    }

    #[test]
    fn test_convert_numeric_string_value() {
        let entry = json!({"type": "humidity", "value": "61.2", "unit": "%"});
        let reading = convert_entry(&entry, now()).unwrap();

        assert_eq!(reading.value, 61.2);
    }

    #[test]
    fn test_convert_rejects_non_numeric_string() {
        let entry = json!({"type": "humidity", "value": "bad", "unit": "%"});
        assert!(convert_entry(&entry, now()).is_err());
    }

    #[test]
    fn test_convert_rejects_bool_value() {
        let entry = json!({"type": "door", "value": true, "unit": ""});
        assert!(convert_entry(&entry, now()).is_err());
    }

    #[test]
    fn test_convert_rejects_missing_unit() {
        let entry = json!({"type": "temperature", "value": 23.5});
        assert!(convert_entry(&entry, now()).is_err());
    }

    #[test]
    fn test_convert_rejects_missing_type() {
        let entry = json!({"value": 23.5, "unit": "C"});
        assert!(convert_entry(&entry, now()).is_err());
    }

    #[test]
    fn test_convert_rejects_non_object_entry() {
        let entry = json!(23.5);
        assert!(convert_entry(&entry, now()).is_err());
    }
}
