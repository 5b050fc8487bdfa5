use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("transport is not open")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("request timed out")]
    Timeout,

    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// The twin document as stored by the remote
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Twin {
    #[serde(default)]
    pub desired: Value,

    #[serde(default)]
    pub reported: Value,
}

/// An encoded device-to-cloud message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub content_type: String,
    pub content_encoding: String,
}

impl Message {
    /// Encode `value` as a compact JSON message
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            body: serde_json::to_vec(value)?,
            content_type: "application/json".to_owned(),
            content_encoding: "utf-8".to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInvocation {
    pub name: String,
    pub payload: Vec<u8>,
}

impl MethodInvocation {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub status: i32,
    pub body: Vec<u8>,
}

impl MethodResponse {
    pub fn new(status: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// A direct method call waiting for a response
#[derive(Debug)]
pub struct MethodCall {
    pub invocation: MethodInvocation,
    reply: oneshot::Sender<MethodResponse>,
}

impl MethodCall {
    pub fn new(invocation: MethodInvocation) -> (Self, oneshot::Receiver<MethodResponse>) {
        let (reply, rx) = oneshot::channel();
        (Self { invocation, reply }, rx)
    }

    /// Send the response back to the caller.
    ///
    /// Returns false if the caller is no longer waiting.
    pub fn respond(self, response: MethodResponse) -> bool {
        self.reply.send(response).is_ok()
    }
}

/// Events pushed by the remote to the device
#[derive(Debug)]
pub enum InboundEvent {
    /// A desired properties patch, including its `$version`
    DesiredChanged(Value),

    /// A direct method invocation
    Method(MethodCall),
}

pub type EventSender = mpsc::UnboundedSender<InboundEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<InboundEvent>;

/// Create the queue inbound events are delivered through
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Client side of the device to cloud channel.
///
/// Connection establishment, security and the wire encoding are the
/// implementor's business.
pub trait Transport: Send + Sync + 'static {
    /// Establish the channel
    fn open(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Tear down the channel, dropping the event sender
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Read the full twin document
    fn get_twin(&self) -> impl Future<Output = Result<Twin, TransportError>> + Send;

    /// Update the reported half of the twin
    fn update_reported(
        &self,
        reported: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send a telemetry message
    fn send_event(&self, message: Message)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Set the queue desired property changes and method calls are delivered to
    fn set_event_sender(
        &self,
        events: EventSender,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Subscribe to direct method calls for the given names
    fn register_methods(
        &self,
        names: Vec<String>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
