//! HTTP/WebSocket surface: carrier webhook (C10), media transport (C9),
//! and a read-only admin observer WebSocket fanning out the event bus
//! (C11). HTTPS via rustls when a cert/key pair is given, plain HTTP
//! otherwise.

pub mod admin_ws;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::Core;
use crate::telephony::{media_ws, webhook, SessionRegistry};

/// Shared state available to every handler, regardless of which
/// state-specific sub-router it was merged in from.
#[derive(Clone)]
pub struct ServerState {
    pub core: Arc<Core>,
    pub sessions: Arc<SessionRegistry>,
}

pub async fn start(host: &str, port: u16, cert: Option<String>, key: Option<String>) -> Result<()> {
    let config = crate::config::Config::load()?;
    let core = Arc::new(Core::new(
        config,
        Arc::new(crate::capability::MockAsr::new("")),
        Arc::new(crate::capability::MockLlm::new("")),
        Arc::new(crate::capability::MockTts),
        Arc::new(crate::repository::InMemoryRepository::default()),
    ));
    let sessions = Arc::new(SessionRegistry::new());

    let state = ServerState {
        core: core.clone(),
        sessions: sessions.clone(),
    };

    let webhook_state = Arc::new(webhook::WebhookState {
        core: core.clone(),
        sessions: sessions.clone(),
    });
    let media_state = Arc::new(media_ws::MediaWsState {
        core: core.clone(),
        sessions: sessions.clone(),
    });

    let webhook_router = Router::new()
        .route("/webhook/telnyx", post(webhook::handle_webhook))
        .with_state(webhook_state);

    let media_router = Router::new()
        .route("/media/{call_control_id}", get(media_ws::handle_media_ws))
        .with_state(media_state);

    let admin_router = Router::new()
        .route("/admin/events", get(admin_ws::handle_admin_ws))
        .with_state(state);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .merge(webhook_router)
        .merge(media_router)
        .merge(admin_router)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;

    if let (Some(cert_path), Some(key_path)) = (cert, key) {
        let cert_data = tokio::fs::read(&cert_path).await.context("failed to read certificate file")?;
        let key_data = tokio::fs::read(&key_path).await.context("failed to read key file")?;

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem(cert_data, key_data).await?;
        info!(%addr, "listening (https)");
        axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
        return Ok(());
    }

    info!(%addr, "listening (http)");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}
