//! HTTP listener and route table (§6). Builds the `axum::Router`, wires
//! config hot-reload via `ArcSwap`, and drives graceful shutdown from
//! the signal-handling task in `signals.rs`.

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::handlers::{chat_completions, gemini, health, messages, AppState};
use crate::signals::{self, ShutdownSignal};
use crate::streamer::Streamer;

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let metrics_handle = crate::metrics::init_metrics();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let body_limit_bytes = (config.server.max_body_size_mb * 1024 * 1024) as usize;
    let connect_timeout = config.upstreams.connect_timeout_seconds;

    let config = Arc::new(ArcSwap::from_pointee(config));
    let streamer = Arc::new(Streamer::new(connect_timeout)?);
    let state = AppState {
        config: config.clone(),
        streamer,
    };

    let (shutdown_tx, _signal_handle) = signals::setup_signal_handlers(config.clone());
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = create_router(state, body_limit_bytes, metrics_handle);

    info!(%addr, "starting anti-truncation proxy");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        match shutdown_rx.recv().await {
            Ok(ShutdownSignal::Graceful) => info!("graceful shutdown triggered"),
            Err(_) => info!("shutdown channel closed, shutting down"),
        }
    })
    .await?;

    Ok(())
}

fn create_router(state: AppState, body_limit_bytes: usize, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/v1/chat/completions", post(chat_completions::handle))
        .route("/v1/messages", post(messages::handle))
        .route("/v1/models/:model_action", post(gemini::v1))
        .route("/v1beta/models/:model_action", post(gemini::v1beta))
        .with_state(state);

    let metrics_route = Router::new().route(
        "/metrics",
        get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );

    Router::new()
        .route("/", get(health::handle))
        .route("/health", get(health::handle))
        .merge(metrics_route)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_router_serves_health() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let config = Arc::new(ArcSwap::from_pointee(Config::default()));
        let streamer = Arc::new(Streamer::new(5).unwrap());
        let state = AppState { config, streamer };
        let metrics_handle = crate::metrics::init_metrics();
        let app = create_router(state, 1024 * 1024, metrics_handle);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
