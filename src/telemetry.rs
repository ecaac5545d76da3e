use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::TimestampProvider;
use crate::config::{Config, TelemetryConfig, UploadConfig};
use crate::controller::{CaptureHook, CaptureReport};
use crate::error::{BarkwatchError, Result};

const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// One environment sample from the enclosure.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    pub co2: f32,
}

impl Reading {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.temperature.is_finite() && self.humidity.is_finite() && self.co2.is_finite()
    }
}

pub trait EnvironmentSensor: Send {
    fn sample(&mut self) -> Option<Reading>;
}

/// Reads the latest sample from a JSON file maintained by the sensor
/// service, e.g. `{"temperature": 23.4, "humidity": 55.0, "co2": 812}`.
pub struct FileSensor {
    path: PathBuf,
}

impl FileSensor {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl EnvironmentSensor for FileSensor {
    fn sample(&mut self) -> Option<Reading> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| tracing::warn!("failed to read {}: {e}", self.path.display()))
            .ok()?;
        serde_json::from_str(&raw)
            .map_err(|e| tracing::warn!("bad reading in {}: {e}", self.path.display()))
            .ok()
    }
}

/// Wire form expected by the collector's data endpoint.
#[derive(Debug, Serialize)]
struct TelemetryBody<'a> {
    t: String,
    h: String,
    c: String,
    d: &'a str,
    i: &'a str,
}

impl<'a> TelemetryBody<'a> {
    fn new(reading: &Reading, timestamp: &'a str, device_id: &'a str) -> Self {
        Self {
            t: format!("{:.1}", reading.temperature),
            h: format!("{:.1}", reading.humidity),
            c: format!("{:.0}", reading.co2),
            d: timestamp,
            i: device_id,
        }
    }
}

pub trait TelemetryUploader: Send {
    fn send(&self, reading: &Reading, timestamp: &str) -> Result<()>;
}

/// POSTs readings as JSON to the collector.
pub struct HttpTelemetry {
    agent: ureq::Agent,
    url: String,
    device_id: String,
}

impl HttpTelemetry {
    #[must_use]
    pub fn new(upload: &UploadConfig, telemetry: &TelemetryConfig, device_id: &str) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(TELEMETRY_TIMEOUT))
            .build()
            .into();
        Self {
            agent,
            url: format!("http://{}:{}{}", upload.host, upload.port, telemetry.path),
            device_id: device_id.to_string(),
        }
    }
}

impl TelemetryUploader for HttpTelemetry {
    fn send(&self, reading: &Reading, timestamp: &str) -> Result<()> {
        let body = serde_json::to_string(&TelemetryBody::new(reading, timestamp, &self.device_id))
            .map_err(|e| BarkwatchError::Telemetry(format!("failed to encode reading: {e}")))?;

        tracing::debug!("telemetry: {body}");

        let response = self
            .agent
            .post(&self.url)
            .header("Content-Type", "application/json")
            .send(body.as_str())
            .map_err(|e| BarkwatchError::Telemetry(format!("POST {} failed: {e}", self.url)))?;

        tracing::info!("telemetry accepted: HTTP {}", response.status());
        Ok(())
    }
}

/// After each delivered capture, send the current environment reading.
pub struct TelemetryHook {
    sensor: Box<dyn EnvironmentSensor>,
    uploader: Box<dyn TelemetryUploader>,
    clock: Box<dyn TimestampProvider>,
}

impl TelemetryHook {
    #[must_use]
    pub fn new(
        sensor: Box<dyn EnvironmentSensor>,
        uploader: Box<dyn TelemetryUploader>,
        clock: Box<dyn TimestampProvider>,
    ) -> Self {
        Self {
            sensor,
            uploader,
            clock,
        }
    }

    /// Telemetry hook from config, or `None` when disabled.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if !config.telemetry.enabled {
            return Ok(None);
        }
        let path = config.telemetry.reading_file.as_deref().ok_or_else(|| {
            BarkwatchError::Config("telemetry.reading_file is required when enabled".to_string())
        })?;

        Ok(Some(Self::new(
            Box::new(FileSensor::new(Config::expand_path(path))),
            Box::new(HttpTelemetry::new(
                &config.upload,
                &config.telemetry,
                &config.device.id,
            )),
            Box::new(crate::clock::LocalClock::new(&config.clock)),
        )))
    }
}

impl CaptureHook for TelemetryHook {
    fn on_capture_complete(&mut self, report: &CaptureReport) {
        tracing::debug!("capture {} delivered, sending telemetry", report.filename);

        let Some(reading) = self.sensor.sample().filter(Reading::is_valid) else {
            tracing::warn!("no valid environment reading, skipping telemetry");
            return;
        };

        if let Err(e) = self.uploader.send(&reading, &self.clock.now()) {
            tracing::warn!("telemetry upload failed: {e}");
        }
    }
}
