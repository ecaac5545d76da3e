use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{Config, PresenceConfig, PresenceKind};
use crate::error::{BarkwatchError, Result};

/// Motion/occupancy input gating the loudness trigger.
pub trait PresenceSensor: Send {
    fn is_active(&self) -> bool;
}

/// A presence flag that can be flipped from elsewhere (tests, a remote
/// toggle, or a fixed `always`/`never` setting).
#[derive(Debug, Clone)]
pub struct StaticPresence(Arc<AtomicBool>);

impl StaticPresence {
    #[must_use]
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicBool::new(active)))
    }

    pub fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }
}

impl PresenceSensor for StaticPresence {
    fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// PIR sensor wired to a GPIO line exposed through sysfs
/// (`/sys/class/gpio/gpioN/value`).
pub struct GpioPresence {
    value_path: PathBuf,
    active_high: bool,
}

impl GpioPresence {
    #[must_use]
    pub const fn new(value_path: PathBuf, active_high: bool) -> Self {
        Self {
            value_path,
            active_high,
        }
    }
}

impl PresenceSensor for GpioPresence {
    fn is_active(&self) -> bool {
        match std::fs::read_to_string(&self.value_path) {
            Ok(raw) => {
                let high = raw.trim() == "1";
                high == self.active_high
            }
            Err(e) => {
                tracing::warn!(
                    "failed to read presence line {}: {e}",
                    self.value_path.display()
                );
                false
            }
        }
    }
}

/// Build the presence sensor named in the config.
pub fn create_sensor(config: &PresenceConfig) -> Result<Box<dyn PresenceSensor>> {
    match config.kind {
        PresenceKind::Always => Ok(Box::new(StaticPresence::new(true))),
        PresenceKind::Never => Ok(Box::new(StaticPresence::new(false))),
        PresenceKind::Gpio => {
            let path = config.gpio_path.as_deref().ok_or_else(|| {
                BarkwatchError::Config("presence.gpio_path is required for gpio".to_string())
            })?;
            Ok(Box::new(GpioPresence::new(
                Config::expand_path(path),
                config.active_high,
            )))
        }
    }
}
