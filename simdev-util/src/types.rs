use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

/// Identifier the simulator stamps on every telemetry message.
///
/// This is independent from the device id used to connect, so that several
/// simulators may share an identity on the remote.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl Deref for DeviceId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self("iotsimulatordeviceE20181".to_owned())
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionStringParseError {
    #[error("connection string is empty")]
    Empty,

    #[error("malformed connection string segment '{0}', expected '<key>=<value>'")]
    Segment(String),

    #[error("connection string is missing '{0}'")]
    Missing(&'static str),
}

/// Device connection string, e.g.
/// `HostName=hub.example.net;DeviceId=dev0;SharedAccessKey=c2VjcmV0`.
///
/// The shared access key is carried as-is for the transport and never
/// printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host_name: String,
    pub device_id: String,
    shared_access_key: Option<String>,
    raw: String,
}

impl ConnectionString {
    pub fn shared_access_key(&self) -> Option<&str> {
        self.shared_access_key.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConnectionStringParseError::Empty);
        }

        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        for segment in s.split(';').filter(|seg| !seg.trim().is_empty()) {
            // keys can't contain '=' but base64 values may end with it
            let (key, value) = segment
                .split_once('=')
                .filter(|(key, _)| !key.trim().is_empty())
                .ok_or_else(|| ConnectionStringParseError::Segment(segment.to_owned()))?;
            let value = value.trim().to_owned();
            match key.trim() {
                "HostName" => host_name = Some(value),
                "DeviceId" => device_id = Some(value),
                "SharedAccessKey" => shared_access_key = Some(value),
                // other keys (GatewayHostName, ModuleId, ...) are the
                // transport's business
                _ => {}
            }
        }

        Ok(ConnectionString {
            host_name: host_name
                .filter(|v| !v.is_empty())
                .ok_or(ConnectionStringParseError::Missing("HostName"))?,
            device_id: device_id
                .filter(|v| !v.is_empty())
                .ok_or(ConnectionStringParseError::Missing("DeviceId"))?,
            shared_access_key,
            raw: s.to_owned(),
        })
    }
}

impl Display for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostName={};DeviceId={}", self.host_name, self.device_id)?;
        if self.shared_access_key.is_some() {
            write!(f, ";SharedAccessKey=<redacted>")?;
        }
        Ok(())
    }
}
