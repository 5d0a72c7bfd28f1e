mod payload;

use payload::{IngestAck, SensorBatch, SensorEntry};
use rand::Rng;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let server_url =
        env::var("SERVER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let num_devices: usize = env::var("DEVICES")
        .unwrap_or_else(|_| "3".to_string())
        .parse()
        .unwrap_or(3);
    let interval_secs: u64 = env::var("INTERVAL_SECS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()
        .unwrap_or(10);

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting sensor simulator");
    info!(
        "Server: {}, Devices: {}, Interval: {}s",
        server_url, num_devices, interval_secs
    );

    let mut rng = rand::thread_rng();
    let device_ids: Vec<String> = (0..num_devices).map(|_| random_mac(&mut rng)).collect();
    for id in &device_ids {
        info!("Simulating device {}", id);
    }

    let client = reqwest::Client::new();
    let endpoint = format!("{}/api/sensors", server_url);
    let mut sent = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        ticker.tick().await;

        for device_id in &device_ids {
            let batch = generate_batch(&mut rng, device_id.clone());

            match client.post(&endpoint).json(&batch).send().await {
                Ok(resp) if resp.status().is_success() => {
                    sent += 1;
                    match resp.json::<IngestAck>().await {
                        Ok(ack) => info!(
                            "{}: saved {} readings, {} failed",
                            batch.device_id, ack.readings_saved, ack.failed_readings
                        ),
                        Err(e) => warn!("Unreadable response for {}: {}", batch.device_id, e),
                    }
                }
                Ok(resp) => {
                    warn!(
                        "Server rejected batch for {}: {}",
                        batch.device_id,
                        resp.status()
                    );
                }
                Err(e) => {
                    warn!("Failed to reach server: {}", e);
                }
            }
        }

        // Log progress periodically
        if sent > 0 && sent % 100 == 0 {
            info!("Delivered {} batches", sent);
        }
    }
}

fn random_mac(rng: &mut impl Rng) -> String {
    let octets: Vec<String> = (0..6)
        .map(|_| format!("{:02X}", rng.gen_range(0..=255)))
        .collect();
    octets.join(":")
}

fn generate_batch(rng: &mut impl Rng, device_id: String) -> SensorBatch {
    let temperature = if rng.gen_bool(0.05) {
        rng.gen_range(-50.0..100.0) // 5% outliers
    } else {
        rng.gen_range(15.0..35.0) // Normal range
    };

    let humidity = if rng.gen_bool(0.05) {
        rng.gen_range(0.0..100.0) // 5% outliers
    } else {
        rng.gen_range(30.0..80.0) // Normal range
    };

    let pressure = rng.gen_range(980.0..1040.0);

    let battery = if rng.gen_bool(0.02) {
        rng.gen_range(0.0..20.0) // 2% low battery
    } else {
        rng.gen_range(20.0..100.0) // Normal range
    };

    SensorBatch {
        device_id,
        sensors: vec![
            entry("temperature", temperature, "C"),
            entry("humidity", humidity, "%"),
            entry("pressure", pressure, "hPa"),
            entry("battery", battery, "%"),
        ],
    }
}

fn entry(sensor_type: &str, value: f64, unit: &str) -> SensorEntry {
    SensorEntry {
        sensor_type: sensor_type.to_string(),
        value: (value * 10.0).round() / 10.0,
        unit: unit.to_string(),
    }
}
