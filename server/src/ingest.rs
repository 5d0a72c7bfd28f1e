//! Ingestion write path: envelope validation, per-entry conversion and a
//! single transactional write per request.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::db;
use crate::errors::Result;
use crate::metrics::{READINGS_FAILED_TOTAL, READINGS_SAVED_TOTAL};
use crate::model::{IngestRequest, NewReading};
use crate::validate;

/// Accounting for one accepted ingest request.
#[derive(Debug)]
pub struct IngestOutcome {
    pub device_id: String,
    pub readings_saved: usize,
    pub failed_readings: usize,
}

/// Runs one ingest request end to end. `now` is the request's single
/// clock reading and stamps every reading in the batch.
///
/// A batch where every entry failed conversion still upserts the device
/// and reports `readings_saved = 0`.
pub async fn ingest(
    pool: &PgPool,
    request: &IngestRequest,
    now: DateTime<Utc>,
) -> Result<IngestOutcome> {
    validate::validate_envelope(request)?;

    let (readings, failed_readings) = convert_entries(&request.sensors, now);

    let device = db::ingest_batch(pool, &request.device_id, &readings).await?;

    READINGS_SAVED_TOTAL.inc_by(readings.len() as f64);
    READINGS_FAILED_TOTAL.inc_by(failed_readings as f64);

    debug!(
        "Ingested {} readings ({} failed) for {}",
        readings.len(),
        failed_readings,
        device.id
    );

    Ok(IngestOutcome {
        device_id: device.id,
        readings_saved: readings.len(),
        failed_readings,
    })
}

/// Entries are converted independently; a bad entry is counted and the
/// rest of the batch goes through.
fn convert_entries(sensors: &[Value], now: DateTime<Utc>) -> (Vec<NewReading>, usize) {
    let mut readings = Vec::with_capacity(sensors.len());
    let mut failed = 0;

    for entry in sensors {
        match validate::convert_entry(entry, now) {
            Ok(reading) => readings.push(reading),
            Err(e) => {
                warn!("Skipping sensor entry: {}", e);
                failed += 1;
            }
        }
    }

    (readings, failed)
}
