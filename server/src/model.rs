use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered device row. A row exists iff at least one ingest request for
/// this id has been accepted.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

impl Device {
    /// Display name, falling back to `Device-<last 8 chars of id>`.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let chars: Vec<char> = self.id.chars().collect();
                let start = chars.len().saturating_sub(8);
                let tail: String = chars[start..].iter().collect();
                format!("Device-{tail}")
            }
        }
    }
}

/// Stored sensor reading. Append-only; rows disappear only through the
/// device cascade delete.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SensorReading {
    pub id: i64,
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// A validated reading waiting to be written.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

/// Ingest envelope. Sensor entries stay untyped here so one malformed
/// entry is counted and skipped instead of rejecting the whole batch.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub device_id: String,
    pub sensors: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub message: String,
    pub readings_saved: usize,
    pub failed_readings: usize,
    pub device_id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub timestamp_local: String,
}

/// One dashboard row, rendered in UTC and in the deployment-local zone.
#[derive(Debug, Serialize)]
pub struct DashboardReading {
    pub id: i64,
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp_utc: DateTime<Utc>,
    pub timestamp_local: String,
    pub timestamp_date: String,
}

/// Effective dashboard parameters, echoed back after clamping/defaulting.
#[derive(Debug, Serialize)]
pub struct DashboardEcho {
    pub limit: i64,
    pub device_id: Option<String>,
    pub sensor_type: Option<String>,
    pub hours: i64,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub data: Vec<DashboardReading>,
    pub count: usize,
    pub parameters: DashboardEcho,
    pub timestamp_utc: DateTime<Utc>,
    pub timestamp_local: String,
}

#[derive(Debug, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_seen_local: String,
    pub is_active: bool,
    pub is_online: bool,
    pub status: String,
    pub latest_readings_count: usize,
}

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceSummary>,
    pub count: usize,
    pub online_devices: usize,
    pub offline_devices: usize,
}

/// Latest stored value for one sensor type of a device.
#[derive(Debug, Serialize)]
pub struct SensorStatus {
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub timestamp_local: String,
    pub timestamp_formatted: String,
    pub is_online: bool,
}

#[derive(Debug, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub name: String,
    pub location: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub last_seen_local: String,
    pub sensors: BTreeMap<String, SensorStatus>,
}

#[derive(Debug, Serialize)]
pub struct LatestActivity {
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub timestamp_local: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_devices: i64,
    pub online_devices: i64,
    pub offline_devices: i64,
    pub total_readings: i64,
    pub today_readings: i64,
    pub latest_activity: Option<LatestActivity>,
    pub uptime_percentage: f64,
    pub system_health: String,
    pub timestamp: DateTime<Utc>,
    pub timestamp_local: String,
}

#[derive(Debug, Serialize)]
pub struct LatestReading {
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
    pub timestamp_local: String,
    pub is_online: bool,
}

#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub sensors: Vec<LatestReading>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn device(id: &str, name: Option<&str>) -> Device {
        let seen = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        Device {
            id: id.to_string(),
            name: name.map(String::from),
            location: None,
            first_seen: seen,
            last_seen: seen,
            is_active: true,
        }
    }

    #[test]
    fn test_display_name_prefers_stored_name() {
        let d = device("AA:BB:CC:DD:EE:FF", Some("Greenhouse"));
        assert_eq!(d.display_name(), "Greenhouse");
    }

    #[test]
    fn test_display_name_derives_from_id_tail() {
        let d = device("AA:BB:CC:DD:EE:FF", None);
        assert_eq!(d.display_name(), "Device-DD:EE:FF");
    }

    #[test]
    fn test_display_name_short_id() {
        let d = device("ESP1", None);
        assert_eq!(d.display_name(), "Device-ESP1");
    }
}
