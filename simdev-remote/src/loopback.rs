use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, trace, warn};

use crate::util::types::ConnectionString;

use super::transport::{
    EventSender, InboundEvent, Message, MethodCall, MethodInvocation, MethodResponse, Transport,
    TransportError, Twin,
};

const VERSION_KEY: &str = "$version";

#[derive(Debug, Error)]
pub enum HubError {
    #[error("desired patch must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Default)]
struct HubState {
    connected: bool,
    version: u64,
    desired: Map<String, Value>,
    reported: Map<String, Value>,
    events: Option<EventSender>,
    methods: HashSet<String>,
}

impl HubState {
    fn desired_document(&self) -> Value {
        let mut desired = self.desired.clone();
        desired.insert(VERSION_KEY.to_owned(), self.version.into());
        Value::Object(desired)
    }
}

/// In-process stand-in for the cloud side of the twin.
///
/// The hub keeps the twin document, versions desired property patches,
/// routes direct method calls to the connected device and fans telemetry
/// out to subscribers.
#[derive(Clone, Debug)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    telemetry: broadcast::Sender<Message>,
    method_timeout: Duration,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (telemetry, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(HubState {
                version: 1,
                ..Default::default()
            })),
            telemetry,
            method_timeout: Duration::from_secs(30),
        }
    }

    /// Use `desired` as the initial desired properties document
    pub fn with_desired(self, desired: Map<String, Value>) -> Self {
        let state = Arc::new(Mutex::new(HubState {
            version: 1,
            desired: desired
                .into_iter()
                .filter(|(key, _)| !key.starts_with('$'))
                .collect(),
            ..Default::default()
        }));
        Self { state, ..self }
    }

    /// Set how long to wait for the device to answer a method call
    pub fn with_method_timeout(self, method_timeout: Duration) -> Self {
        Self {
            method_timeout,
            ..self
        }
    }

    /// Create the device side of the channel
    pub fn connect(&self, connection: ConnectionString) -> Loopback {
        Loopback {
            hub: self.clone(),
            connection,
        }
    }

    /// Current twin document
    pub async fn twin(&self) -> Twin {
        let state = self.state.lock().await;
        Twin {
            desired: state.desired_document(),
            reported: Value::Object(state.reported.clone()),
        }
    }

    /// Get notified of every telemetry message the device sends
    pub fn subscribe_telemetry(&self) -> broadcast::Receiver<Message> {
        self.telemetry.subscribe()
    }

    /// Merge `patch` into the desired properties and notify the device.
    ///
    /// A `null` value removes the property. Returns the new desired version.
    #[instrument(name = "hub", skip_all, err)]
    pub async fn patch_desired(&self, patch: Value) -> Result<u64, HubError> {
        let Value::Object(patch) = patch else {
            return Err(HubError::NotAnObject);
        };
        let patch: Map<String, Value> = patch
            .into_iter()
            .filter(|(key, _)| !key.starts_with('$'))
            .collect();

        let mut state = self.state.lock().await;
        state.version += 1;
        for (key, value) in patch.iter() {
            if value.is_null() {
                state.desired.remove(key);
            } else {
                state.desired.insert(key.clone(), value.clone());
            }
        }
        let version = state.version;
        debug!(version, "desired properties updated");

        let mut event = patch;
        event.insert(VERSION_KEY.to_owned(), version.into());
        if state.connected
            && let Some(events) = &state.events
            && events
                .send(InboundEvent::DesiredChanged(Value::Object(event)))
                .is_err()
        {
            warn!("device is not listening for desired property changes");
        }

        Ok(version)
    }

    /// Invoke a direct method on the device and wait for the response.
    ///
    /// Follows the usual hub semantics: 404 if the device is not connected,
    /// 501 if the device did not subscribe to `name` and 504 if it does not
    /// answer in time.
    #[instrument(name = "hub", skip_all, fields(method = %invocation.name))]
    pub async fn invoke_method(&self, invocation: MethodInvocation) -> MethodResponse {
        let (call, response_rx) = MethodCall::new(invocation);
        {
            let state = self.state.lock().await;
            let events = match &state.events {
                Some(events) if state.connected => events,
                _ => return MethodResponse::new(404, r#"{"message":"device is not online"}"#),
            };
            if !state.methods.contains(&call.invocation.name) {
                return MethodResponse::new(501, r#"{"message":"method not implemented"}"#);
            }
            if events.send(InboundEvent::Method(call)).is_err() {
                return MethodResponse::new(404, r#"{"message":"device is not online"}"#);
            }
        }

        match tokio::time::timeout(self.method_timeout, response_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => MethodResponse::new(500, r#"{"message":"device dropped the call"}"#),
            Err(_) => MethodResponse::new(504, r#"{"message":"timed out waiting for device"}"#),
        }
    }
}

/// Device side of the in-process hub
#[derive(Clone, Debug)]
pub struct Loopback {
    hub: Hub,
    connection: ConnectionString,
}

impl Loopback {
    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}

impl Transport for Loopback {
    #[instrument(name = "loopback", skip_all, err)]
    async fn open(&self) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        if state.connected {
            return Err(TransportError::Connection(format!(
                "device {} is already connected",
                self.connection.device_id
            )));
        }
        state.connected = true;
        info!("connected to {}", self.connection);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        state.connected = false;
        state.events = None;
        state.methods.clear();
        trace!("disconnected");
        Ok(())
    }

    async fn get_twin(&self) -> Result<Twin, TransportError> {
        let state = self.hub.state.lock().await;
        if !state.connected {
            return Err(TransportError::Closed);
        }
        Ok(Twin {
            desired: state.desired_document(),
            reported: Value::Object(state.reported.clone()),
        })
    }

    async fn update_reported(&self, reported: Value) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        if !state.connected {
            return Err(TransportError::Closed);
        }
        let Value::Object(reported) = reported else {
            return Err(TransportError::Send(
                "reported properties must be a JSON object".to_owned(),
            ));
        };
        for (key, value) in reported {
            if value.is_null() {
                state.reported.remove(&key);
            } else {
                state.reported.insert(key, value);
            }
        }
        Ok(())
    }

    async fn send_event(&self, message: Message) -> Result<(), TransportError> {
        if !self.hub.state.lock().await.connected {
            return Err(TransportError::Closed);
        }
        // nobody listening is not an error for the device
        let _ = self.hub.telemetry.send(message);
        Ok(())
    }

    async fn set_event_sender(&self, events: EventSender) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        if !state.connected {
            return Err(TransportError::Closed);
        }
        state.events = Some(events);
        Ok(())
    }

    async fn register_methods(&self, names: Vec<String>) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        if !state.connected {
            return Err(TransportError::Closed);
        }
        state.methods.extend(names);
        Ok(())
    }
}
