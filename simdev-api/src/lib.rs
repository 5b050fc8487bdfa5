//! Local API to act as the remote operator of the simulated device.
//!
//! The API drives the in-process hub: it lets a user inspect the twin,
//! change desired properties and invoke direct methods on the device.

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{Request, Response, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde_json::{Value, json};
use std::io;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Span, debug_span, field::Empty, info, instrument};

use simdev_remote::{Hub, HubError, MethodInvocation, Twin};

fn router(hub: Hub) -> Router {
    let api_span = Span::current();
    Router::new()
        .route("/v1/ping", get(|| async { "OK" }))
        .route("/v1/twin", get(get_twin))
        .route("/v1/twin/desired", patch(patch_desired))
        .route("/v1/methods/{name}", post(invoke_method))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    debug_span!(parent: &api_span, "http",
                        route = %format!("{} {}", request.method(), request.uri().path()),
                        status = Empty,
                        latency_ms = Empty,
                    )
                })
                .on_response(|response: &Response<Body>, latency: Duration, span: &Span| {
                    span.record("status", response.status().as_u16());
                    span.record("latency_ms", latency.as_millis() as u64);
                }),
        )
        .with_state(hub)
}

/// Start the API
///
/// Receives a listener already bound to the right address and the hub
/// requests are forwarded to. Only returns on I/O failure.
#[instrument(name = "api", skip_all, err)]
pub async fn start(listener: TcpListener, hub: Hub) -> io::Result<()> {
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router(hub)).await
}

/// Handle `GET /v1/twin`
async fn get_twin(State(hub): State<Hub>) -> Json<Twin> {
    Json(hub.twin().await)
}

/// Handle `PATCH /v1/twin/desired`
///
/// Merges the body into the desired properties and returns the new version
async fn patch_desired(State(hub): State<Hub>, Json(patch): Json<Value>) -> impl IntoResponse {
    match hub.patch_desired(patch).await {
        Ok(version) => (StatusCode::ACCEPTED, Json(json!({ "$version": version }))),
        Err(e @ HubError::NotAnObject) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": e.to_string() })),
        ),
    }
}

/// Handle `POST /v1/methods/{name}`
///
/// The request body is passed to the device as the method payload, the
/// device response is returned as-is.
async fn invoke_method(
    State(hub): State<Hub>,
    Path(name): Path<String>,
    payload: Bytes,
) -> impl IntoResponse {
    let response = hub
        .invoke_method(MethodInvocation::new(name, payload.to_vec()))
        .await;
    let status = u16::try_from(response.status)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    (status, response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simdev_remote::{InboundEvent, MethodTable, Transport, event_channel};
    use simdev_util::types::ConnectionString;

    async fn serve(hub: Hub) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(start(listener, hub));
        format!("http://{addr}")
    }

    fn connection() -> ConnectionString {
        "HostName=localhost;DeviceId=dev0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let url = serve(Hub::new()).await;

        let body = reqwest::get(format!("{url}/v1/ping"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_patch_desired_properties() {
        let hub = Hub::new();
        let url = serve(hub.clone()).await;
        let client = reqwest::Client::new();

        let res = client
            .patch(format!("{url}/v1/twin/desired"))
            .json(&json!({"Interval": "5000"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::ACCEPTED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body, json!({"$version": 2}));

        let twin: Value = reqwest::get(format!("{url}/v1/twin"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            twin,
            json!({
                "desired": {"Interval": "5000", "$version": 2},
                "reported": {}
            })
        );

        let res = client
            .patch(format!("{url}/v1/twin/desired"))
            .json(&json!(["not", "an", "object"]))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invoke_method() {
        let hub = Hub::new();
        let device = hub.connect(connection());
        device.open().await.unwrap();
        let (tx, mut rx) = event_channel();
        device.set_event_sender(tx).await.unwrap();
        let methods = MethodTable::device();
        device.register_methods(methods.names()).await.unwrap();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let InboundEvent::Method(call) = event {
                    let response = methods.dispatch(&call.invocation);
                    call.respond(response);
                }
            }
        });

        let url = serve(hub).await;
        let client = reqwest::Client::new();

        let res = client
            .post(format!("{url}/v1/methods/Off"))
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);
        assert_eq!(res.text().await.unwrap(), "'DM call sucess'");

        let res = client
            .post(format!("{url}/v1/methods/Reboot"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::NOT_IMPLEMENTED);
    }
}
