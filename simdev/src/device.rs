use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, instrument, trace, warn};

use crate::remote::{
    EventReceiver, InboundEvent, MethodTable, Transport, TransportError, event_channel,
};
use crate::state::models::Interval;
use crate::state::{TwinStore, apply_desired_patch, report_identity, roll_die};
use crate::telemetry::{TelemetryConfig, TelemetryLoop, TelemetrySummary};

/// How long to wait for in-flight remote events after closing the transport
const EVENTS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to connect to the hub: {0}")]
    Connection(#[source] TransportError),

    #[error("failed to read the twin: {0}")]
    Twin(#[source] TransportError),

    #[error("failed to subscribe to remote events: {0}")]
    Subscribe(#[source] TransportError),

    #[error("telemetry loop terminated unexpectedly: {0}")]
    Telemetry(#[from] JoinError),
}

#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    /// Telemetry interval until the twin sets one
    pub interval: Interval,
    pub telemetry: TelemetryConfig,
}

/// Run the simulated device until `stop` resolves.
///
/// Startup is sequential: connect, load the twin, subscribe to desired
/// property changes and direct methods, report the device identity and
/// finally start sending telemetry. Only failing to connect, read the twin
/// or subscribe is fatal, everything else is logged and the device keeps
/// running.
#[instrument(name = "device", skip_all, err)]
pub async fn start_device<T, S>(
    transport: Arc<T>,
    config: DeviceConfig,
    stop: S,
) -> Result<TelemetrySummary, DeviceError>
where
    T: Transport,
    S: Future<Output = ()>,
{
    transport.open().await.map_err(DeviceError::Connection)?;
    info!("connected");

    let store = TwinStore::new(config.interval);

    // the full desired document is handled as the first patch
    let twin = transport.get_twin().await.map_err(DeviceError::Twin)?;
    trace!("initial twin: {}", twin.desired);
    let _ = apply_desired_patch(&store, transport.as_ref(), twin.desired).await;

    let (events_tx, events_rx) = event_channel();
    transport
        .set_event_sender(events_tx)
        .await
        .map_err(DeviceError::Subscribe)?;

    let methods = MethodTable::device();
    transport
        .register_methods(methods.names())
        .await
        .map_err(DeviceError::Subscribe)?;
    debug!(methods = ?methods.names(), "registered direct methods");

    let _ = report_identity(&store, transport.as_ref(), roll_die()).await;

    let telemetry = TelemetryLoop::new(config.telemetry, store.clone(), transport.clone()).start();

    // events received so far are queued in the channel
    let mut events = tokio::spawn(handle_events(store, transport.clone(), methods, events_rx));
    info!("running");

    stop.await;
    info!("stopping");

    let summary = telemetry.cancel().await;

    if let Err(e) = transport.close().await {
        warn!("failed to close connection: {e}");
    }

    // the transport drops the event sender on close
    match tokio::time::timeout(EVENTS_DRAIN_TIMEOUT, &mut events).await {
        Ok(Err(e)) => warn!("remote event handler failed: {e}"),
        Ok(Ok(())) => {}
        Err(_) => {
            warn!("remote event handler did not terminate, aborting");
            events.abort();
        }
    }

    let summary = summary?;
    info!(sent = summary.sent, failed = summary.failed, "stopped");
    Ok(summary)
}

/// Process desired property changes and method calls as they come in
#[instrument(name = "events", skip_all)]
async fn handle_events<T: Transport>(
    store: TwinStore,
    transport: Arc<T>,
    methods: MethodTable,
    mut events: EventReceiver,
) {
    while let Some(event) = events.recv().await {
        match event {
            InboundEvent::DesiredChanged(patch) => {
                // errors are logged by the reconciler
                let _ = apply_desired_patch(&store, transport.as_ref(), patch).await;
            }
            InboundEvent::Method(call) => {
                let response = methods.dispatch(&call.invocation);
                if !call.respond(response) {
                    warn!("method caller went away before the response");
                }
            }
        }
    }
    debug!("event channel closed");
}
