//! Read-side query and aggregation engine: windowed listing, per-type
//! latest aggregation, device overview, statistics and CSV rendering.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;

use crate::db::{self, Order, ReadingFilter};
use crate::errors::{Error, Result};
use crate::localtime;
use crate::model::{
    DashboardEcho, DashboardReading, DashboardResponse, DeviceStatus, DeviceSummary,
    DevicesResponse, LatestActivity, LatestReading, LatestResponse, SensorReading, SensorStatus,
    StatsResponse,
};

pub const DASHBOARD_DEFAULT_LIMIT: i64 = 100;
pub const DASHBOARD_MAX_LIMIT: i64 = 1000;
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

/// Window bound keeping `now - hours` inside the representable datetime
/// range; `chrono::Duration::hours` panics near i64 extremes.
pub const MAX_WINDOW_HOURS: i64 = 24 * 365 * 100;

pub const LATEST_DEFAULT_LIMIT: i64 = 20;
pub const LATEST_MAX_LIMIT: i64 = 100;

/// Scan cap for the per-type "latest value" aggregation. A device with
/// more than this many distinct sensor types omits the older-seen ones;
/// the cap is part of the endpoint's observable contract.
pub const STATUS_SCAN_CAP: i64 = 10;

/// How many recent readings back a device's `latest_readings_count`.
pub const DEVICE_RECENT_READINGS_CAP: i64 = 5;

/// Devices unseen for longer than this drop off the listing.
pub const DEVICE_ACTIVE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Default, Deserialize)]
pub struct DashboardParams {
    pub limit: Option<i64>,
    pub device_id: Option<String>,
    pub sensor_type: Option<String>,
    pub hours: Option<i64>,
}

impl DashboardParams {
    fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DASHBOARD_DEFAULT_LIMIT)
            .clamp(0, DASHBOARD_MAX_LIMIT)
    }

    fn effective_hours(&self) -> i64 {
        self.hours
            .unwrap_or(DEFAULT_WINDOW_HOURS)
            .clamp(0, MAX_WINDOW_HOURS)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestParams {
    pub device_id: Option<String>,
    pub limit: Option<i64>,
}

/// Windowed dashboard listing, newest first, limit clamped.
pub async fn dashboard_data(
    pool: &PgPool,
    params: &DashboardParams,
    now: DateTime<Utc>,
) -> Result<DashboardResponse> {
    let limit = params.effective_limit();
    let hours = params.effective_hours();

    let filter = ReadingFilter {
        device_id: params.device_id.clone(),
        sensor_type: params.sensor_type.clone(),
        since: Some(now - Duration::hours(hours)),
    };

    let readings = db::query_readings(pool, &filter, Order::Newest, Some(limit)).await?;

    let data: Vec<DashboardReading> = readings
        .into_iter()
        .map(|r| DashboardReading {
            id: r.id,
            device_id: r.device_id,
            sensor_type: r.sensor_type,
            value: r.value,
            unit: r.unit,
            timestamp_utc: r.timestamp,
            timestamp_local: localtime::format_local(r.timestamp),
            timestamp_date: localtime::format_local_date(r.timestamp),
        })
        .collect();

    let count = data.len();
    Ok(DashboardResponse {
        data,
        count,
        parameters: DashboardEcho {
            limit,
            device_id: params.device_id.clone(),
            sensor_type: params.sensor_type.clone(),
            hours,
        },
        timestamp_utc: now,
        timestamp_local: localtime::format_local(now),
    })
}

/// A rendered CSV document plus its download filename.
#[derive(Debug)]
pub struct CsvExport {
    pub filename: String,
    pub body: String,
}

const CSV_HEADER: &str = "ID,Device ID,Sensor Type,Value,Unit,UTC Time,Local Time,Local-format Date";

/// CSV export over the same filters as the dashboard, oldest first and
/// without a row limit.
pub async fn export_csv(
    pool: &PgPool,
    params: &DashboardParams,
    now: DateTime<Utc>,
) -> Result<CsvExport> {
    let filter = ReadingFilter {
        device_id: params.device_id.clone(),
        sensor_type: params.sensor_type.clone(),
        since: Some(now - Duration::hours(params.effective_hours())),
    };

    let readings = db::query_readings(pool, &filter, Order::Oldest, None).await?;

    Ok(CsvExport {
        filename: format!(
            "sensor_data_{}.csv",
            localtime::to_local(now).format("%Y%m%d_%H%M%S")
        ),
        body: build_csv(&readings),
    })
}

fn build_csv(readings: &[SensorReading]) -> String {
    let mut out = String::with_capacity(64 * (readings.len() + 1));
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");

    for r in readings {
        let row = [
            r.id.to_string(),
            r.device_id.clone(),
            r.sensor_type.clone(),
            r.value.to_string(),
            r.unit.clone(),
            r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            localtime::format_local(r.timestamp),
            localtime::format_local_date(r.timestamp),
        ];
        let encoded: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        out.push_str(&encoded.join(","));
        out.push_str("\r\n");
    }

    out
}

/// RFC 4180: quote a field carrying a separator, quote or line break.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Status view for one device: latest value per sensor type, derived from
/// a scan capped at the `STATUS_SCAN_CAP` most recent rows.
pub async fn device_status(
    pool: &PgPool,
    device_id: &str,
    now: DateTime<Utc>,
) -> Result<DeviceStatus> {
    let device = db::get_device(pool, device_id)
        .await?
        .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;

    let recent = db::latest_for_device(pool, device_id, STATUS_SCAN_CAP).await?;
    let sensors = latest_per_type(recent, now);

    Ok(DeviceStatus {
        device_id: device.id.clone(),
        name: device.display_name(),
        location: device.location.clone(),
        is_online: localtime::is_online(now, device.last_seen),
        last_seen: device.last_seen,
        last_seen_local: localtime::format_local(device.last_seen),
        sensors,
    })
}

/// Rows arrive newest first, so the first occurrence per type wins.
fn latest_per_type(
    readings: Vec<SensorReading>,
    now: DateTime<Utc>,
) -> BTreeMap<String, SensorStatus> {
    let mut sensors = BTreeMap::new();

    for r in readings {
        sensors.entry(r.sensor_type).or_insert_with(|| SensorStatus {
            value: r.value,
            unit: r.unit,
            timestamp: r.timestamp,
            timestamp_local: localtime::format_local(r.timestamp),
            timestamp_formatted: localtime::format_local_plain(r.timestamp),
            is_online: localtime::is_online(now, r.timestamp),
        });
    }

    sensors
}

/// Devices seen in the active window, each with liveness classification
/// and a recent-reading count.
pub async fn devices_overview(pool: &PgPool, now: DateTime<Utc>) -> Result<DevicesResponse> {
    let since = now - Duration::hours(DEVICE_ACTIVE_WINDOW_HOURS);
    let devices = db::devices_seen_since(pool, since).await?;

    let mut summaries = Vec::with_capacity(devices.len());
    for device in devices {
        let recent = db::latest_for_device(pool, &device.id, DEVICE_RECENT_READINGS_CAP).await?;
        let is_online = localtime::is_online(now, device.last_seen);

        summaries.push(DeviceSummary {
            id: device.id.clone(),
            name: device.display_name(),
            location: device.location.clone(),
            first_seen: device.first_seen,
            last_seen: device.last_seen,
            last_seen_local: localtime::format_local(device.last_seen),
            is_active: device.is_active,
            is_online,
            status: if is_online { "Online" } else { "Offline" }.to_string(),
            latest_readings_count: recent.len(),
        });
    }

    let online_devices = summaries.iter().filter(|d| d.is_online).count();
    let offline_devices = summaries.len() - online_devices;
    let count = summaries.len();

    Ok(DevicesResponse {
        devices: summaries,
        count,
        online_devices,
        offline_devices,
    })
}

/// System-wide statistics.
pub async fn stats(pool: &PgPool, now: DateTime<Utc>) -> Result<StatsResponse> {
    let total_devices = db::count_devices(pool).await?;
    let online_since = now - Duration::minutes(localtime::ONLINE_THRESHOLD_MINUTES);
    let online_devices = db::count_devices_seen_since(pool, online_since).await?;
    let total_readings = db::count_readings(pool).await?;
    let today_readings = db::count_readings_since(pool, localtime::today_start_utc(now)).await?;

    let latest_activity = db::latest_reading(pool).await?.map(|r| LatestActivity {
        device_id: r.device_id,
        sensor_type: r.sensor_type,
        value: r.value,
        unit: r.unit,
        timestamp: r.timestamp,
        timestamp_local: localtime::format_local(r.timestamp),
    });

    Ok(StatsResponse {
        total_devices,
        online_devices,
        offline_devices: total_devices - online_devices,
        total_readings,
        today_readings,
        latest_activity,
        uptime_percentage: uptime_percentage(online_devices, total_devices),
        system_health: if online_devices > 0 { "healthy" } else { "warning" }.to_string(),
        timestamp: now,
        timestamp_local: localtime::format_local(now),
    })
}

/// Display heuristic, not a measured SLA. The exact arithmetic is part
/// of the stats contract.
fn uptime_percentage(online: i64, total: i64) -> f64 {
    let ratio = online as f64 / total.max(1) as f64;
    let uptime = (99.8 + ratio * 0.2).min(100.0);
    (uptime * 10.0).round() / 10.0
}

/// Most recent readings across the fleet, optionally per device.
pub async fn latest_readings(
    pool: &PgPool,
    params: &LatestParams,
    now: DateTime<Utc>,
) -> Result<LatestResponse> {
    let limit = params
        .limit
        .unwrap_or(LATEST_DEFAULT_LIMIT)
        .clamp(0, LATEST_MAX_LIMIT);

    let filter = ReadingFilter {
        device_id: params.device_id.clone(),
        ..Default::default()
    };

    let readings = db::query_readings(pool, &filter, Order::Newest, Some(limit)).await?;

    let sensors: Vec<LatestReading> = readings
        .into_iter()
        .map(|r| LatestReading {
            device_id: r.device_id,
            sensor_type: r.sensor_type,
            value: r.value,
            unit: r.unit,
            timestamp: r.timestamp,
            timestamp_local: localtime::format_local(r.timestamp),
            is_online: localtime::is_online(now, r.timestamp),
        })
        .collect();

    let count = sensors.len();
    Ok(LatestResponse {
        sensors,
        count,
        timestamp: now,
    })
}
