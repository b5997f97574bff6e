//! Score Sync server binary.
//!
//! Runs two listeners: the WebSocket fabric on its own port and the
//! control-plane HTTP API next to it. Both stop on ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use score_sync::adapters::auth::JwksTokenVerifier;
use score_sync::adapters::http::control::{control_router, service_info_router};
use score_sync::adapters::http::middleware::{auth_middleware, AuthState};
use score_sync::adapters::http::ControlAppState;
use score_sync::adapters::websocket::{handler, Hub, WebSocketState};
use score_sync::config::AppConfig;
use score_sync::ports::{RoomBroadcaster, TokenVerifier};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config);
    info!(
        environment = ?config.server.environment,
        websocket_port = config.websocket.port,
        control_port = config.server.port,
        "starting score-sync"
    );

    let hub = Hub::new(config.websocket.clone());
    let flush_task = hub.start_batch_flush();

    let verifier: Arc<dyn TokenVerifier> =
        Arc::new(JwksTokenVerifier::new(config.auth.clone()));

    let ws_state = WebSocketState::new(
        Arc::clone(&hub),
        Arc::clone(&verifier),
        Arc::new(config.websocket.clone()),
    );

    let control_state =
        ControlAppState::new(Arc::clone(&hub) as Arc<dyn RoomBroadcaster>);
    let auth_state: AuthState = Arc::clone(&verifier);
    let control_app = service_info_router()
        .merge(
            control_router()
                .layer(axum::middleware::from_fn_with_state(
                    auth_state,
                    auth_middleware,
                ))
                .with_state(control_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(cors_layer(&config));

    let control_addr = config.server.socket_addr();
    let control = async move {
        let listener = tokio::net::TcpListener::bind(control_addr).await?;
        info!(addr = %control_addr, "control plane listening");
        axum::serve(listener, control_app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    let fabric = handler::serve(ws_state, shutdown_signal());

    tokio::try_join!(fabric, control)?;
    flush_task.abort();
    info!("score-sync stopped");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(config.server.log_level.clone());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.is_production() {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
    }
}
