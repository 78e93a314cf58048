use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    agora_auth::{SecurityLog, SessionIssuer, startup::validate_configured_secrets},
    agora_config::AgoraConfig,
    axum::{
        Router,
        extract::State,
        http::{
            HeaderValue, Method,
            header::{AUTHORIZATION, CONTENT_TYPE},
        },
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    tower_http::{
        cors::{AllowOrigin, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, info, warn},
};

use crate::{
    auth::{logout_all_handler, logout_handler, refresh_handler},
    gate::ChannelSecurityGate,
    reload::spawn_reload_listener,
    state::GatewayState,
    ws::ws_upgrade_handler,
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let gate = Arc::clone(&state.gate);
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(|o| gate.is_origin_allowed(o))
        }))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/logout-all", post(logout_all_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Validate secrets, open the token store and build the shared state.
///
/// Fails in production when a signing secret is missing or critically weak.
pub async fn prepare_gateway(config: AgoraConfig) -> anyhow::Result<Arc<GatewayState>> {
    let events = Arc::new(SecurityLog::new());
    validate_configured_secrets(
        &config.auth,
        &config.secrets,
        config.server.environment,
        &events,
    )?;

    let issuer = SessionIssuer::from_config(&config.auth, Arc::clone(&events)).await?;
    let gate = Arc::new(ChannelSecurityGate::new(&config.channel, Arc::clone(&events)));
    Ok(GatewayState::new(config, gate, issuer, events))
}

/// Start the gateway HTTP + WebSocket server.
pub async fn start_gateway(config: AgoraConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = prepare_gateway(config).await?;
    let app = build_gateway_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = {
        let config = state.config.read().await;
        [
            format!("agora gateway v{}", state.version),
            format!("listening on {addr}"),
            format!("environment: {:?}", config.server.environment).to_lowercase(),
            format!(
                "{} allowed origin(s), reject suspicious: {}",
                config.channel.allowed_origins.len(),
                config.channel.reject_suspicious
            ),
            format!("renewal store: {}", config.auth.database_url),
        ]
    };
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    spawn_sweeper(Arc::clone(&state));
    spawn_token_cleanup(Arc::clone(&state));
    spawn_reload_listener(Arc::clone(&state));

    // Run the server with ConnectInfo for remote IP extraction.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Periodically drop stale rate-limit windows. The interval is re-read each
/// round so reloads take effect.
pub fn spawn_sweeper(state: Arc<GatewayState>) {
    tokio::spawn(async move {
        loop {
            let secs = state.config.read().await.channel.sweep_interval_secs.max(1);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let removed = state.gate.sweep();
            if removed > 0 {
                debug!(removed, "swept rate-limit windows");
            }
        }
    });
}

/// Periodically delete expired renewal tokens.
pub fn spawn_token_cleanup(state: Arc<GatewayState>) {
    tokio::spawn(async move {
        loop {
            let secs = state.config.read().await.auth.cleanup_interval_secs.max(1);
            tokio::time::sleep(Duration::from_secs(secs)).await;
            if let Err(e) = state.issuer.renewal().cleanup_expired().await {
                warn!(error = %e, "renewal token cleanup failed");
            }
        }
    });
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let count = state.client_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "connections": count,
    }))
}
