use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct SensorEntry {
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorBatch {
    pub device_id: String,
    pub sensors: Vec<SensorEntry>,
}

/// Accounting echoed back by the ingestion endpoint.
#[derive(Debug, Deserialize)]
pub struct IngestAck {
    pub readings_saved: usize,
    pub failed_readings: usize,
}
