use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::util::types::DeviceId;

/// Value of the `overheat` field on hot readings
pub const OVERHEAT: &str = "ERRORVERHEAT";

const MIN_TEMPERATURE: f64 = 20.0;
const MIN_HUMIDITY: f64 = 60.0;
const MIN_PRESSURE: f64 = 500.0;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    #[serde(rename = "0")]
    Off,
    #[serde(rename = "1")]
    On,
}

/// A simulated sensor sample
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub fan_mode: FanMode,
    pub overheat: Option<&'static str>,
}

impl Reading {
    /// Build a reading, deriving the fan mode and overheat flag from the
    /// temperature. Both thresholds are strict.
    pub fn new(temperature: f64, humidity: f64, pressure: f64) -> Self {
        Self {
            temperature,
            humidity,
            pressure,
            fan_mode: if temperature > 25.0 {
                FanMode::On
            } else {
                FanMode::Off
            },
            overheat: (temperature > 30.0).then_some(OVERHEAT),
        }
    }

    /// Generate a reading from a random source yielding values in `[0, 1)`
    pub fn generate(mut random: impl FnMut() -> f64) -> Self {
        let temperature = MIN_TEMPERATURE + random() * 15.0;
        let humidity = MIN_HUMIDITY + random() * 20.0;
        let pressure = MIN_PRESSURE + random() * 100.0;
        Self::new(temperature, humidity, pressure)
    }
}

/// Telemetry message as sent to the remote. Field names are part of the
/// remote contract.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    #[serde(rename = "timecreated")]
    pub time_created: DateTime<Utc>,

    #[serde(rename = "messageid")]
    pub message_id: u64,

    #[serde(rename = "simulatordeviceid")]
    pub device_id: DeviceId,

    #[serde(rename = "temp")]
    pub temperature: f64,

    pub humidity: f64,

    pub pressure: f64,

    #[serde(rename = "fanmode")]
    pub fan_mode: FanMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub overheat: Option<&'static str>,
}

impl TelemetryMessage {
    pub fn new(
        device_id: DeviceId,
        message_id: u64,
        time_created: DateTime<Utc>,
        reading: Reading,
    ) -> Self {
        let Reading {
            temperature,
            humidity,
            pressure,
            fan_mode,
            overheat,
        } = reading;
        Self {
            time_created,
            message_id,
            device_id,
            temperature,
            humidity,
            pressure,
            fan_mode,
            overheat,
        }
    }
}
