use std::error::Error;
use std::future::{self, Future};
use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod cli;
mod device;

use simdev_api as api;
use simdev_remote as remote;
use simdev_state as state;
use simdev_telemetry as telemetry;
use simdev_util as util;

use crate::cli::Cli;
use crate::device::DeviceConfig;
use crate::remote::Hub;
use crate::telemetry::TelemetryConfig;

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("debug".parse().unwrap())
                    .add_directive("hyper=error".parse().unwrap())
                    .add_directive("tower_http=info".parse().unwrap()),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();

    let cli = cli::parse();

    start_simulator(cli).await
}

#[instrument(name = "simdev", skip_all, err)]
async fn start_simulator(cli: Cli) -> Result<(), Box<dyn Error>> {
    trace!(
        hub = %cli.connection_string.host_name,
        device_id = %cli.device_id,
        interval = %cli.interval,
        api = ?cli.local_api_address,
        "using config:"
    );

    let hub = match cli.desired {
        Some(desired) => Hub::new().with_desired(desired),
        None => Hub::new(),
    };
    let transport = Arc::new(hub.connect(cli.connection_string));

    // Bind before connecting the device so a taken port fails early
    let api = if let Some(address) = cli.local_api_address {
        let listener = TcpListener::bind(address).await?;
        debug!("bound to local address {address}");
        Some(tokio::spawn(api::start(listener, hub.clone())))
    } else {
        None
    };

    let config = DeviceConfig {
        interval: cli.interval,
        telemetry: TelemetryConfig {
            device_id: cli.device_id,
            seed: cli.seed,
        },
    };

    // The device always goes through its shutdown sequence, also when
    // the local API is the one terminating
    let mut api_error = None;
    let stop = async {
        api_error = wait_for_stop(shutdown_signal(), api).await;
    };
    let summary = device::start_device(transport, config, stop).await?;
    info!(
        generated = summary.generated,
        sent = summary.sent,
        failed = summary.failed,
        "simulator stopped"
    );

    match api_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Wait for `shutdown` or for the local API task to terminate, whichever
/// comes first. Returns the API error in the latter case.
async fn wait_for_stop<F>(
    shutdown: F,
    api: Option<JoinHandle<io::Result<()>>>,
) -> Option<io::Error>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => None,
        res = maybe_start(api, |handle| handle) => match res {
            Ok(Ok(())) => {
                warn!("local API terminated");
                None
            }
            Ok(Err(e)) => Some(e),
            Err(e) => Some(io::Error::other(e)),
        },
    }
}

/// Given an optional value `pred`, invoke closure `f` if it is `Some(P)`
/// and return the result, otherwise return a pending future in its place.
async fn maybe_start<P, F, Fut, T>(pred: Option<P>, f: F) -> T
where
    Fut: Future<Output = T>,
    F: FnOnce(P) -> Fut,
{
    match pred {
        Some(p) => f(p).await,
        None => future::pending().await,
    }
}

/// Resolve on the first interrupt or terminate signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for interrupt signal: {e}");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for terminate signal: {e}");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received interrupt signal"),
        _ = terminate => info!("received terminate signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MethodInvocation;
    use crate::state::models::Interval;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn failing_api() -> JoinHandle<io::Result<()>> {
        tokio::spawn(async { Err(io::Error::other("connection reset")) })
    }

    #[tokio::test]
    async fn it_stops_on_shutdown_without_api() {
        assert!(wait_for_stop(async {}, None).await.is_none());
    }

    #[tokio::test]
    async fn it_stops_when_the_api_fails() {
        let err = wait_for_stop(future::pending(), Some(failing_api())).await;
        assert_eq!(err.map(|e| e.to_string()), Some("connection reset".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn it_shuts_the_device_down_when_the_api_fails() {
        let hub = Hub::new();
        let connection = "HostName=localhost;DeviceId=dev0".parse().unwrap();
        let transport = Arc::new(hub.connect(connection));
        let config = DeviceConfig {
            interval: Interval::from_millis(1000).unwrap(),
            ..Default::default()
        };
        let api = failing_api();

        let mut api_error = None;
        let stop = async {
            // let the device run a few cycles first
            tokio::time::sleep(Duration::from_millis(2500)).await;
            api_error = wait_for_stop(future::pending(), Some(api)).await;
        };
        let summary = device::start_device(transport, config, stop).await.unwrap();

        assert!(api_error.is_some());
        assert_eq!(summary.generated, 3);

        // the connection was closed on the way out
        let response = hub.invoke_method(MethodInvocation::new("Off", "{}")).await;
        assert_eq!(response.status, 404);
    }
}
