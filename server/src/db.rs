use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use tracing::{debug, info};

use crate::errors::Result;
use crate::model::{Device, NewReading, SensorReading};

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Sort direction for reading queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Newest,
    Oldest,
}

impl Order {
    fn as_sql(self) -> &'static str {
        match self {
            Order::Newest => "DESC",
            Order::Oldest => "ASC",
        }
    }
}

/// Filters for reading queries; `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct ReadingFilter {
    pub device_id: Option<String>,
    pub sensor_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// Applies one ingest request: device upsert plus the reading batch in a
/// single transaction, so a failed write rolls back the device row too.
pub async fn ingest_batch(
    pool: &PgPool,
    device_id: &str,
    readings: &[NewReading],
) -> Result<Device> {
    let mut tx = pool.begin().await?;
    let device = upsert_device(&mut tx, device_id).await?;
    insert_readings(&mut tx, device_id, readings).await?;
    tx.commit().await?;

    debug!("Committed {} readings for {}", readings.len(), device_id);
    Ok(device)
}

/// Fetch-or-create by primary key; creation seeds `first_seen`/`last_seen`,
/// every later call bumps `last_seen` and re-arms `is_active`.
async fn upsert_device(conn: &mut PgConnection, device_id: &str) -> Result<Device> {
    let device: Device = sqlx::query_as(
        r#"
        INSERT INTO devices (id) VALUES ($1)
        ON CONFLICT (id) DO UPDATE SET last_seen = now(), is_active = TRUE
        RETURNING id, name, location, first_seen, last_seen, is_active
        "#,
    )
    .bind(device_id)
    .fetch_one(conn)
    .await?;

    // a freshly inserted row has first_seen == last_seen from the same statement
    if device.first_seen == device.last_seen {
        info!("New device registered: {}", device.id);
    }

    Ok(device)
}

async fn insert_readings(
    conn: &mut PgConnection,
    device_id: &str,
    readings: &[NewReading],
) -> Result<()> {
    if readings.is_empty() {
        return Ok(());
    }

    let device_ids: Vec<&str> = readings.iter().map(|_| device_id).collect();
    let sensor_types: Vec<&str> = readings.iter().map(|r| r.sensor_type.as_str()).collect();
    let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
    let units: Vec<&str> = readings.iter().map(|r| r.unit.as_str()).collect();
    let timestamps: Vec<DateTime<Utc>> = readings.iter().map(|r| r.timestamp).collect();

    let query = r#"
        INSERT INTO sensor_readings (device_id, sensor_type, value, unit, ts)
        SELECT * FROM UNNEST($1::text[], $2::text[], $3::float8[], $4::text[], $5::timestamptz[])
        "#;

    sqlx::query(query)
        .bind(&device_ids)
        .bind(&sensor_types)
        .bind(&values)
        .bind(&units)
        .bind(&timestamps)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn query_readings(
    pool: &PgPool,
    filter: &ReadingFilter,
    order: Order,
    limit: Option<i64>,
) -> Result<Vec<SensorReading>> {
    let mut conditions = Vec::new();
    let mut bind_index = 0;

    if filter.device_id.is_some() {
        bind_index += 1;
        conditions.push(format!("device_id = ${bind_index}"));
    }
    if filter.sensor_type.is_some() {
        bind_index += 1;
        conditions.push(format!("sensor_type = ${bind_index}"));
    }
    if filter.since.is_some() {
        bind_index += 1;
        conditions.push(format!("ts >= ${bind_index}"));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let limit_clause = match limit {
        Some(n) => format!("LIMIT {n}"),
        None => String::new(),
    };

    let query = format!(
        "SELECT id, device_id, sensor_type, value, unit, ts AS timestamp
         FROM sensor_readings
         {where_clause}
         ORDER BY ts {}
         {limit_clause}",
        order.as_sql()
    );

    let mut query_builder = sqlx::query_as::<_, SensorReading>(&query);

    if let Some(device_id) = &filter.device_id {
        query_builder = query_builder.bind(device_id);
    }
    if let Some(sensor_type) = &filter.sensor_type {
        query_builder = query_builder.bind(sensor_type);
    }
    if let Some(since) = &filter.since {
        query_builder = query_builder.bind(since);
    }

    Ok(query_builder.fetch_all(pool).await?)
}

/// Most recent readings for one device, newest first. The caller applies
/// per-type deduplication on top of this.
pub async fn latest_for_device(
    pool: &PgPool,
    device_id: &str,
    cap: i64,
) -> Result<Vec<SensorReading>> {
    let readings = sqlx::query_as::<_, SensorReading>(
        r#"
        SELECT id, device_id, sensor_type, value, unit, ts AS timestamp
        FROM sensor_readings
        WHERE device_id = $1
        ORDER BY ts DESC
        LIMIT $2
        "#,
    )
    .bind(device_id)
    .bind(cap)
    .fetch_all(pool)
    .await?;

    Ok(readings)
}

pub async fn get_device(pool: &PgPool, device_id: &str) -> Result<Option<Device>> {
    let device = sqlx::query_as::<_, Device>(
        "SELECT id, name, location, first_seen, last_seen, is_active FROM devices WHERE id = $1",
    )
    .bind(device_id)
    .fetch_optional(pool)
    .await?;

    Ok(device)
}

pub async fn devices_seen_since(pool: &PgPool, since: DateTime<Utc>) -> Result<Vec<Device>> {
    let devices = sqlx::query_as::<_, Device>(
        r#"
        SELECT id, name, location, first_seen, last_seen, is_active
        FROM devices
        WHERE last_seen >= $1
        ORDER BY last_seen DESC
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(devices)
}

pub async fn count_devices(pool: &PgPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM devices")
        .fetch_one(pool)
        .await?;

    Ok(count)
}

pub async fn count_devices_seen_since(pool: &PgPool, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM devices WHERE last_seen >= $1")
        .bind(since)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

pub async fn count_readings(pool: &PgPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM sensor_readings")
        .fetch_one(pool)
        .await?;

    Ok(count)
}

pub async fn count_readings_since(pool: &PgPool, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM sensor_readings WHERE ts >= $1")
        .bind(since)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

pub async fn latest_reading(pool: &PgPool) -> Result<Option<SensorReading>> {
    let reading = sqlx::query_as::<_, SensorReading>(
        r#"
        SELECT id, device_id, sensor_type, value, unit, ts AS timestamp
        FROM sensor_readings
        ORDER BY ts DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(reading)
}

/// Cheap reachability check for the health endpoint.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
