use std::{sync::Arc, time::Duration};

use {
    agora_config::AuthConfig,
    secrecy::SecretString,
    serde::Serialize,
    thiserror::Error,
    tracing::info,
};

use crate::{
    error::TokenError,
    events::{SecurityEventKind, SecurityLog, Severity},
    renewal::{self, RenewalTokenStore},
    signer::{HmacSigner, SignError, TokenClaims, TokenKind, TokenSigner},
};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("{0} is not configured")]
    MissingSecret(&'static str),
    #[error("failed to open token database: {0}")]
    Database(#[from] sqlx::Error),
}

/// Session/renewal pair handed to a client after login or refresh.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub session_token: String,
    pub renewal_token: String,
    /// Session token lifetime in seconds.
    #[serde(rename = "expires_in")]
    pub session_expires_in: u64,
}

/// Mints stateless session tokens and server-tracked renewal tokens.
///
/// Session and renewal tokens are signed with different keys, so a renewal
/// token can never pass as a session token and vice versa.
#[derive(Clone)]
pub struct SessionIssuer {
    signer: Arc<dyn TokenSigner>,
    session_ttl: Duration,
    renewal: RenewalTokenStore,
    events: Arc<SecurityLog>,
}

impl SessionIssuer {
    pub fn new(
        signer: Arc<dyn TokenSigner>,
        session_ttl: Duration,
        renewal: RenewalTokenStore,
        events: Arc<SecurityLog>,
    ) -> Self {
        Self {
            signer,
            session_ttl,
            renewal,
            events,
        }
    }

    /// Build the issuer and its backing store from `[auth]`, creating the
    /// token table if needed.
    pub async fn from_config(
        auth: &AuthConfig,
        events: Arc<SecurityLog>,
    ) -> Result<Self, SetupError> {
        let session_secret = required(&auth.session_secret, "auth.session_secret")?;
        let renewal_secret = required(&auth.renewal_secret, "auth.renewal_secret")?;

        let pool = renewal::connect(&auth.database_url).await?;
        RenewalTokenStore::init(&pool).await?;
        info!(database = %auth.database_url, "renewal token store ready");

        let renewal = RenewalTokenStore::new(
            pool,
            Arc::new(HmacSigner::new(renewal_secret)),
            Duration::from_secs(auth.renewal_ttl_secs),
            Arc::clone(&events),
        );
        Ok(Self::new(
            Arc::new(HmacSigner::new(session_secret)),
            Duration::from_secs(auth.session_ttl_secs),
            renewal,
            events,
        ))
    }

    pub fn renewal(&self) -> &RenewalTokenStore {
        &self.renewal
    }

    pub fn events(&self) -> &Arc<SecurityLog> {
        &self.events
    }

    /// Issue a fresh pair for an identity already verified upstream.
    pub async fn login(&self, user_id: &str) -> Result<TokenPair, TokenError> {
        let renewal_token = self.renewal.issue(user_id).await?;
        self.pair(user_id, renewal_token)
    }

    /// Rotate `renewal_token` and mint a new session token.
    pub async fn refresh(
        &self,
        renewal_token: &str,
        user_id: &str,
    ) -> Result<TokenPair, TokenError> {
        let renewal_token = self.renewal.rotate(renewal_token, user_id).await?;
        self.pair(user_id, renewal_token)
    }

    /// Check a session token's signature, expiry and kind.
    pub fn verify_session(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let (kind, severity, details) = match self.signer.verify(token) {
            Ok(claims) if claims.kind == TokenKind::Session => return Ok(claims),
            Ok(_) => (
                SecurityEventKind::InvalidInput,
                Severity::High,
                "non-session token presented as session",
            ),
            Err(SignError::Expired) => (
                SecurityEventKind::Expired,
                Severity::Low,
                "session token expired",
            ),
            Err(SignError::BadSignature) => (
                SecurityEventKind::InvalidInput,
                Severity::High,
                "session token signature mismatch",
            ),
            Err(SignError::Malformed) => (
                SecurityEventKind::InvalidInput,
                Severity::Low,
                "malformed session token",
            ),
            Err(e) => return Err(TokenError::Signing(e)),
        };
        self.events.emit(kind, severity, "session", details);
        Err(TokenError::AuthenticationFailed)
    }

    /// Revoke one renewal token. Returns whether anything changed.
    pub async fn logout(&self, renewal_token: &str, user_id: &str) -> Result<bool, TokenError> {
        self.renewal.revoke(renewal_token, user_id).await
    }

    pub async fn logout_everywhere(&self, user_id: &str) -> Result<u64, TokenError> {
        self.renewal.revoke_all(user_id).await
    }

    fn pair(&self, user_id: &str, renewal_token: String) -> Result<TokenPair, TokenError> {
        let claims = TokenClaims::new(user_id, TokenKind::Session, self.session_ttl.as_secs());
        let session_token = self.signer.sign(&claims).map_err(TokenError::Signing)?;
        Ok(TokenPair {
            session_token,
            renewal_token,
            session_expires_in: self.session_ttl.as_secs(),
        })
    }
}

fn required(secret: &Option<SecretString>, name: &'static str) -> Result<SecretString, SetupError> {
    secret.clone().ok_or(SetupError::MissingSecret(name))
}
