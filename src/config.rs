use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BarkwatchError, Result};

fn default_device_id() -> String {
    "TEST_MACHINE".to_string()
}

const fn default_threshold_db() -> f32 {
    90.0
}

const fn default_reference_rms() -> f32 {
    0.050_118_7
}

const fn default_required_hits() -> u32 {
    3
}

const fn default_poll_interval_ms() -> u64 {
    200
}

const fn default_poll_timeout_ms() -> u64 {
    100
}

const fn default_window_samples() -> usize {
    1024
}

const fn default_duration_secs() -> u32 {
    10
}

const fn default_sample_rate() -> u32 {
    16000
}

const fn default_channels() -> u16 {
    1
}

const fn default_bit_depth() -> u16 {
    16
}

const fn default_block_samples() -> usize {
    1024
}

const fn default_block_timeout_ms() -> u64 {
    1000
}

const fn default_max_block_timeouts() -> u32 {
    5
}

const fn default_mp3_bitrate_kbps() -> u32 {
    32
}

fn default_upload_host() -> String {
    "192.168.219.106".to_string()
}

const fn default_upload_port() -> u16 {
    8080
}

fn default_upload_path() -> String {
    "/FarmData/fileUpload.do".to_string()
}

const fn default_connect_timeout_ms() -> u64 {
    5000
}

const fn default_io_timeout_ms() -> u64 {
    10000
}

const fn default_response_timeout_ms() -> u64 {
    5000
}

fn default_telemetry_path() -> String {
    "/FarmData/api/datainput.do".to_string()
}

fn default_sentinel() -> String {
    crate::clock::SENTINEL_TIMESTAMP.to_string()
}

const fn default_min_valid_year() -> i32 {
    2024
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub presence: PresenceConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub clock: ClockConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
        }
    }
}

/// Calibration constants for the loudness trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f32,

    #[serde(default = "default_reference_rms")]
    pub reference_rms: f32,

    #[serde(default = "default_required_hits")]
    pub required_consecutive_hits: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default = "default_window_samples")]
    pub window_samples: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_db: default_threshold_db(),
            reference_rms: default_reference_rms(),
            required_consecutive_hits: default_required_hits(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            window_samples: default_window_samples(),
        }
    }
}

impl DetectionConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    #[default]
    Mp3,
}

/// What to do when the encoded payload outgrows the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Abandon the capture; nothing is uploaded.
    #[default]
    Abort,
    /// Stop capturing at the first rejected write and upload what fits.
    Truncate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    #[default]
    Threaded,
    Cooperative,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    #[serde(default = "default_bit_depth")]
    pub bit_depth: u16,

    #[serde(default = "default_block_samples")]
    pub block_samples: usize,

    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    #[serde(default = "default_max_block_timeouts")]
    pub max_block_timeouts: u32,

    #[serde(default)]
    pub format: AudioFormat,

    #[serde(default = "default_mp3_bitrate_kbps")]
    pub mp3_bitrate_kbps: u32,

    #[serde(default)]
    pub overflow: OverflowPolicy,

    #[serde(default)]
    pub scheduling: Scheduling,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bit_depth: default_bit_depth(),
            block_samples: default_block_samples(),
            block_timeout_ms: default_block_timeout_ms(),
            max_block_timeouts: default_max_block_timeouts(),
            format: AudioFormat::default(),
            mp3_bitrate_kbps: default_mp3_bitrate_kbps(),
            overflow: OverflowPolicy::default(),
            scheduling: Scheduling::default(),
        }
    }
}

impl CaptureConfig {
    /// Number of samples (across all channels) a capture must collect.
    #[must_use]
    pub const fn target_samples(&self) -> usize {
        self.duration_secs as usize * self.sample_rate as usize * self.channels as usize
    }

    #[must_use]
    pub const fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Microphone,
    WavFile,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AudioConfig {
    #[serde(default)]
    pub source: SourceKind,

    pub device: Option<String>,

    pub wav_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    #[default]
    Always,
    Never,
    Gpio,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    #[serde(default)]
    pub kind: PresenceKind,

    pub gpio_path: Option<String>,

    #[serde(default = "default_true")]
    pub active_high: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            kind: PresenceKind::default(),
            gpio_path: None,
            active_high: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_host")]
    pub host: String,

    #[serde(default = "default_upload_port")]
    pub port: u16,

    #[serde(default = "default_upload_path")]
    pub path: String,

    pub boundary: Option<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: default_upload_host(),
            port: default_upload_port(),
            path: default_upload_path(),
            boundary: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_telemetry_path")]
    pub path: String,

    pub reading_file: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_telemetry_path(),
            reading_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "default_sentinel")]
    pub sentinel: String,

    #[serde(default = "default_min_valid_year")]
    pub min_valid_year: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
            min_valid_year: default_min_valid_year(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BarkwatchError::Config(format!(
                "config file not found: {}; create it or use --config to specify a path",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            BarkwatchError::Config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml_ng::from_str(&contents).map_err(|e| {
            BarkwatchError::Config(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        let c = &self.capture;

        if d.required_consecutive_hits == 0 {
            return Err(BarkwatchError::Config(
                "detection.required_consecutive_hits must be at least 1".to_string(),
            ));
        }
        if d.reference_rms <= 0.0 || !d.reference_rms.is_finite() {
            return Err(BarkwatchError::Config(
                "detection.reference_rms must be a positive number".to_string(),
            ));
        }
        if d.window_samples == 0 || c.block_samples == 0 {
            return Err(BarkwatchError::Config(
                "detection.window_samples and capture.block_samples must be non-zero".to_string(),
            ));
        }
        if c.duration_secs == 0 || c.sample_rate == 0 || c.channels == 0 {
            return Err(BarkwatchError::Config(
                "capture.duration_secs, sample_rate and channels must be non-zero".to_string(),
            ));
        }
        if d.poll_interval_ms == 0 || d.poll_timeout_ms == 0 || c.block_timeout_ms == 0 {
            return Err(BarkwatchError::Config(
                "detection.poll_interval_ms, poll_timeout_ms and capture.block_timeout_ms \
                 must be non-zero"
                    .to_string(),
            ));
        }
        let u = &self.upload;
        if u.connect_timeout_ms == 0 || u.io_timeout_ms == 0 || u.response_timeout_ms == 0 {
            return Err(BarkwatchError::Config("upload timeouts must be non-zero".to_string()));
        }
        if c.bit_depth != 16 {
            return Err(BarkwatchError::Config(format!(
                "capture.bit_depth {} is not supported (only 16-bit PCM)",
                c.bit_depth
            )));
        }
        if self.audio.source == SourceKind::WavFile && self.audio.wav_path.is_none() {
            return Err(BarkwatchError::Config(
                "audio.source is wav_file but audio.wav_path is not set".to_string(),
            ));
        }
        if self.presence.kind == PresenceKind::Gpio && self.presence.gpio_path.is_none() {
            return Err(BarkwatchError::Config(
                "presence.kind is gpio but presence.gpio_path is not set".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        config_dir.join("barkwatch/config.yaml")
    }

    /// Expand `~` in a path string to the user's home directory.
    #[must_use]
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }
}
