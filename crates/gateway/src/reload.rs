//! Configuration reload (SIGHUP).
//!
//! The channel policy is swapped in place. Signing secrets are re-validated
//! and a reload whose secrets fail in production is refused as a whole; new
//! secret values only take effect on restart.

use std::sync::Arc;

use {
    agora_auth::startup::validate_configured_secrets,
    agora_config::AgoraConfig,
    secrecy::{ExposeSecret, SecretString},
    tracing::{info, warn},
};

use crate::state::GatewayState;

/// Re-read configuration from disk and apply it.
pub async fn reload_config(state: &GatewayState) -> anyhow::Result<()> {
    let config = agora_config::try_discover_and_load()?;
    apply_reload(state, config).await
}

pub async fn apply_reload(state: &GatewayState, config: AgoraConfig) -> anyhow::Result<()> {
    validate_configured_secrets(
        &config.auth,
        &config.secrets,
        config.server.environment,
        &state.events,
    )
    .map_err(|e| anyhow::anyhow!("reload refused: {e}"))?;

    state.gate.apply_config(&config.channel);

    let mut current = state.config.write().await;
    if !same_secret(&current.auth.session_secret, &config.auth.session_secret)
        || !same_secret(&current.auth.renewal_secret, &config.auth.renewal_secret)
    {
        warn!("signing secrets changed; restart the gateway to start using them");
    }
    *current = config;
    info!("configuration reloaded");
    Ok(())
}

fn same_secret(a: &Option<SecretString>, b: &Option<SecretString>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
        (None, None) => true,
        _ => false,
    }
}

/// Reload on every SIGHUP until the process exits.
#[cfg(unix)]
pub fn spawn_reload_listener(state: Arc<GatewayState>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGHUP, config reload disabled");
                return;
            },
        };
        while hangups.recv().await.is_some() {
            info!("SIGHUP received, reloading configuration");
            if let Err(e) = reload_config(&state).await {
                warn!(error = %e, "configuration reload failed, keeping current config");
            }
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_reload_listener(_state: Arc<GatewayState>) {}
