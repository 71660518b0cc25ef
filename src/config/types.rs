use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{CONNECT_TIMEOUT, DEFAULT_SPEED, MAX_SPEED, MIN_SPEED, SCAN_DURATION};
use crate::device::controller::ControllerSettings;

/// Every key is optional, missing keys take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub scan_duration_ms: u64,
    pub connect_timeout_ms: u64,
    pub initial_speed: u8,
}

impl Config {
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            scan_duration: Duration::from_millis(self.scan_duration_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn initial_speed(&self) -> u8 {
        self.initial_speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_duration_ms: SCAN_DURATION,
            connect_timeout_ms: CONNECT_TIMEOUT,
            initial_speed: DEFAULT_SPEED,
        }
    }
}
