//! Twin data model: desired patches, reported properties and the device
//! settings they carry

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Desired settings the device knows how to acknowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Setting {
    Interval,
    FanSpeed,
    SetVoltage,
    SetCurrent,
    ActivateIr,
}

impl Setting {
    /// All settings, in processing order
    pub const ALL: [Setting; 5] = [
        Setting::Interval,
        Setting::FanSpeed,
        Setting::SetVoltage,
        Setting::SetCurrent,
        Setting::ActivateIr,
    ];

    /// Property name on the twin
    pub fn as_str(&self) -> &'static str {
        match self {
            Setting::Interval => "Interval",
            Setting::FanSpeed => "fanSpeed",
            Setting::SetVoltage => "setVoltage",
            Setting::SetCurrent => "setCurrent",
            Setting::ActivateIr => "activateIR",
        }
    }
}

impl Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown setting '{0}'")]
pub struct UnknownSetting(String);

impl FromStr for Setting {
    type Err = UnknownSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Setting::ALL
            .into_iter()
            .find(|setting| setting.as_str() == s)
            .ok_or_else(|| UnknownSetting(s.to_owned()))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("invalid value for setting '{setting}': {value}")]
pub struct InvalidSetting {
    pub setting: Setting,
    pub value: Value,
}

/// Telemetry period in milliseconds, never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Interval(NonZeroU64);

impl Interval {
    pub fn from_millis(millis: u64) -> Option<Self> {
        NonZeroU64::new(millis).map(Self)
    }

    pub fn as_millis(&self) -> u64 {
        self.0.get()
    }

    /// Read the interval from a desired setting value.
    ///
    /// Accepts a positive JSON integer or a string holding one.
    pub fn from_setting(value: &Value) -> Result<Self, InvalidSetting> {
        let millis = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        millis
            .and_then(Interval::from_millis)
            .ok_or_else(|| InvalidSetting {
                setting: Setting::Interval,
                value: value.clone(),
            })
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self(NonZeroU64::new(3000).expect("default interval is not zero"))
    }
}

impl From<Interval> for Duration {
    fn from(interval: Interval) -> Self {
        Duration::from_millis(interval.as_millis())
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("interval must be a positive number of milliseconds, got '{0}'")]
pub struct InvalidInterval(String);

impl FromStr for Interval {
    type Err = InvalidInterval;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .ok()
            .and_then(Interval::from_millis)
            .ok_or_else(|| InvalidInterval(s.to_owned()))
    }
}

/// A change to the desired properties as sent by the remote.
///
/// Twin metadata (`$`-prefixed keys other than the version) is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredPatch {
    pub version: u64,
    pub settings: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct RawDesiredPatch {
    #[serde(rename = "$version")]
    version: u64,
    #[serde(flatten)]
    settings: BTreeMap<String, Value>,
}

impl TryFrom<Value> for DesiredPatch {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let RawDesiredPatch { version, settings } = serde_json::from_value(value)?;
        Ok(DesiredPatch {
            version,
            settings: settings
                .into_iter()
                .filter(|(key, _)| !key.starts_with('$'))
                .collect(),
        })
    }
}

impl DesiredPatch {
    /// Raw desired entry for `setting`, if the patch carries it
    pub fn get(&self, setting: Setting) -> Option<&Value> {
        self.settings.get(setting.as_str())
    }

    /// Value of `setting` in the patch.
    ///
    /// Settings may be sent as `{"value": ...}` objects or as plain
    /// scalars; this returns the inner value in both cases.
    pub fn value(&self, setting: Setting) -> Option<&Value> {
        self.get(setting).map(|entry| match entry {
            Value::Object(obj) => obj.get("value").unwrap_or(entry),
            _ => entry,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Completed,
}

/// Acknowledgment of a desired setting written to the reported properties
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    pub value: Value,
    pub status: AckStatus,
    pub desired_version: u64,
    pub message: String,
}

impl Acknowledgment {
    pub fn completed(value: Value, desired_version: u64) -> Self {
        Self {
            value,
            status: AckStatus::Completed,
            desired_version,
            message: "Processed".to_owned(),
        }
    }
}

/// A reported property, either a setting acknowledgment or a bare value
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ReportedProperty {
    Ack(Acknowledgment),
    Scalar(Value),
}

impl From<Acknowledgment> for ReportedProperty {
    fn from(ack: Acknowledgment) -> Self {
        ReportedProperty::Ack(ack)
    }
}

/// The device half of the twin
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Reported(BTreeMap<String, ReportedProperty>);

impl Reported {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ReportedProperty> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, property: impl Into<ReportedProperty>) {
        self.0.insert(key.into(), property.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ReportedProperty)> {
        self.0.iter()
    }
}

impl From<Reported> for Value {
    fn from(reported: Reported) -> Self {
        serde_json::to_value(reported)
            // a map of json values always serializes
            .expect("reported properties serialization failed")
    }
}
