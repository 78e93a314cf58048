use std::{sync::Arc, time::Duration};

use {
    agora_auth::{HmacSigner, RenewalTokenStore, SecurityLog, renewal},
    agora_config::AgoraConfig,
    anyhow::Result,
    clap::Subcommand,
};

#[derive(Subcommand)]
pub enum TokensAction {
    /// Delete renewal tokens past their expiry.
    Cleanup,
    /// Revoke every live renewal token of a user (logout everywhere).
    RevokeAll {
        /// User id whose tokens are revoked.
        #[arg(long)]
        user: String,
    },
}

pub async fn handle_tokens(action: TokensAction, config: &AgoraConfig) -> Result<()> {
    let store = open_store(config).await?;
    match action {
        TokensAction::Cleanup => {
            let deleted = store.cleanup_expired().await?;
            println!("Deleted {deleted} expired renewal token(s)");
        },
        TokensAction::RevokeAll { user } => {
            let revoked = store.revoke_all(&user).await?;
            println!("Revoked {revoked} renewal token(s) for {user}");
        },
    }
    Ok(())
}

async fn open_store(config: &AgoraConfig) -> Result<RenewalTokenStore> {
    let secret = config
        .auth
        .renewal_secret
        .clone()
        .ok_or_else(|| anyhow::anyhow!("auth.renewal_secret is not configured"))?;
    let pool = renewal::connect(&config.auth.database_url).await?;
    RenewalTokenStore::init(&pool).await?;
    Ok(RenewalTokenStore::new(
        pool,
        Arc::new(HmacSigner::new(secret)),
        Duration::from_secs(config.auth.renewal_ttl_secs),
        Arc::new(SecurityLog::new()),
    ))
}
