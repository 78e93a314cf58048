//! Server-tracked renewal tokens.
//!
//! State machine per record: Active → {Rotated-out, Revoked, Expired} →
//! Deleted. `revoked` only ever goes from 0 to 1; no statement in this module
//! clears it.
//!
//! Token values are never stored: rows are keyed by the base64url SHA-256
//! digest of the token. Every check that grants access (`verify`'s touch,
//! `rotate`'s revoke) is a conditional `UPDATE` on `revoked = 0 AND
//! expires_at > now`, so a token revoked by one caller is unusable by every
//! other caller from the moment that update commits.

use std::{str::FromStr, sync::Arc, time::Duration};

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    sha2::{Digest, Sha256},
    sqlx::{
        SqliteConnection, SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::{debug, info, warn},
};

use crate::{
    error::TokenError,
    events::{SecurityEventKind, SecurityLog, Severity},
    signer::{SignError, TokenClaims, TokenKind, TokenSigner, unix_now},
};

pub use sqlx::Error as StorageError;

/// Upper bound on accepted token length; anything longer is rejected before
/// hashing or lookup.
const MAX_TOKEN_LEN: usize = 4096;
const MAX_USER_ID_LEN: usize = 256;
/// Security event source for denials raised before a record is resolved.
const EVENT_SOURCE: &str = "renewal_store";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (creating if needed) the SQLite database backing the store.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);
    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
}

/// A persisted renewal token. The token value itself is not kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub last_used_at: Option<i64>,
    pub revoked: bool,
    /// Id of the record that replaced this one on rotation.
    pub replaced_by: Option<String>,
}

#[derive(sqlx::FromRow)]
struct RenewalTokenRow {
    id: String,
    user_id: String,
    token_hash: String,
    issued_at: i64,
    expires_at: i64,
    last_used_at: Option<i64>,
    revoked: i32,
    replaced_by: Option<String>,
}

impl From<RenewalTokenRow> for RenewalTokenRecord {
    fn from(r: RenewalTokenRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            token_hash: r.token_hash,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            last_used_at: r.last_used_at,
            revoked: r.revoked != 0,
            replaced_by: r.replaced_by,
        }
    }
}

/// Why a token was refused. Only ever reaches the security log; callers see
/// [`TokenError::AuthenticationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Denial {
    InvalidInput,
    BadSignature,
    NotFound,
    Expired,
    Revoked,
    UserMismatch,
    LostRotation,
}

impl Denial {
    fn kind(self) -> SecurityEventKind {
        match self {
            Self::InvalidInput | Self::BadSignature | Self::UserMismatch => {
                SecurityEventKind::InvalidInput
            },
            Self::NotFound => SecurityEventKind::NotFound,
            Self::Expired => SecurityEventKind::Expired,
            Self::Revoked | Self::LostRotation => SecurityEventKind::Revoked,
        }
    }

    fn severity(self) -> Severity {
        match self {
            Self::InvalidInput | Self::Expired => Severity::Low,
            Self::NotFound | Self::LostRotation => Severity::Medium,
            // Replay of a revoked token or a forged/mis-bound one points at a
            // stolen credential.
            Self::Revoked | Self::BadSignature | Self::UserMismatch => Severity::High,
        }
    }

    fn details(self) -> &'static str {
        match self {
            Self::InvalidInput => "malformed renewal token or user id",
            Self::BadSignature => "renewal token signature mismatch",
            Self::NotFound => "renewal token not found",
            Self::Expired => "renewal token expired",
            Self::Revoked => "revoked renewal token presented",
            Self::UserMismatch => "renewal token bound to a different user",
            Self::LostRotation => "renewal token already revoked (concurrent rotation)",
        }
    }
}

/// Persisted lifecycle of renewal tokens bound to users.
#[derive(Clone)]
pub struct RenewalTokenStore {
    pool: SqlitePool,
    signer: Arc<dyn TokenSigner>,
    ttl: Duration,
    events: Arc<SecurityLog>,
}

impl RenewalTokenStore {
    pub fn new(
        pool: SqlitePool,
        signer: Arc<dyn TokenSigner>,
        ttl: Duration,
        events: Arc<SecurityLog>,
    ) -> Self {
        Self {
            pool,
            signer,
            ttl,
            events,
        }
    }

    /// Create the `renewal_tokens` table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS renewal_tokens (
                id           TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL,
                token_hash   TEXT NOT NULL UNIQUE,
                issued_at    INTEGER NOT NULL,
                expires_at   INTEGER NOT NULL,
                last_used_at INTEGER,
                revoked      INTEGER NOT NULL DEFAULT 0,
                replaced_by  TEXT
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_renewal_tokens_user ON renewal_tokens(user_id)",
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_renewal_tokens_expires ON renewal_tokens(expires_at)",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint and persist a new renewal token for `user_id`.
    pub async fn issue(&self, user_id: &str) -> Result<String, TokenError> {
        if !valid_user_id(user_id) {
            return Err(self.deny(Denial::InvalidInput, EVENT_SOURCE));
        }
        let (token, claims) = self.mint(user_id)?;
        sqlx::query(
            r#"INSERT INTO renewal_tokens (id, user_id, token_hash, issued_at, expires_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(token_digest(&token))
        .bind(claims.iat as i64)
        .bind(claims.exp as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| self.storage_fault("issue", e))?;
        debug!(user_id, "renewal token issued");
        Ok(token)
    }

    /// Check `token` against its persisted record and return the bound user.
    ///
    /// When `expected_user` is given the record must be bound to it. On
    /// success `last_used_at` is updated.
    pub async fn verify(
        &self,
        token: &str,
        expected_user: Option<&str>,
    ) -> Result<String, TokenError> {
        let record = self.check(token, expected_user).await?;

        let now = unix_now() as i64;
        let touched = sqlx::query(
            r#"UPDATE renewal_tokens SET last_used_at = ?
               WHERE id = ? AND revoked = 0 AND expires_at > ?"#,
        )
        .bind(now)
        .bind(&record.id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| self.storage_fault("verify", e))?;
        if touched.rows_affected() != 1 {
            // Revoked (or expired) between the lookup and the touch.
            return Err(self.deny(Denial::Revoked, &record.user_id));
        }
        Ok(record.user_id)
    }

    /// Exchange `old_token` for a fresh token bound to `user_id`.
    ///
    /// The revoke of the old record and the insert of its replacement commit
    /// together or not at all. Of several concurrent rotations of one token,
    /// only the caller whose conditional revoke changes the row gets a
    /// replacement.
    pub async fn rotate(&self, old_token: &str, user_id: &str) -> Result<String, TokenError> {
        let record = self.check(old_token, Some(user_id)).await?;

        let (new_token, claims) = self.mint(user_id)?;
        let old_hash = token_digest(old_token);
        let new_hash = token_digest(&new_token);
        let new_id = uuid::Uuid::new_v4().to_string();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| self.storage_fault("rotate", e))?;
        // A cancelled rotation must never hand a connection with an open
        // transaction back to the pool; closing it rolls the transaction back.
        conn.close_on_drop();

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| self.storage_fault("rotate", e))?;

        let outcome = swap_in_transaction(
            &mut conn,
            &old_hash,
            user_id,
            &new_id,
            &new_hash,
            &claims,
        )
        .await;

        match outcome {
            Ok(true) => {
                if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
                    let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                    return Err(self.storage_fault("rotate", e));
                }
                debug!(user_id, "renewal token rotated");
                Ok(new_token)
            },
            Ok(false) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(self.deny(Denial::LostRotation, &record.user_id))
            },
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(self.storage_fault("rotate", e))
            },
        }
    }

    /// Revoke a single token. Idempotent; returns whether a record changed
    /// state.
    pub async fn revoke(&self, token: &str, user_id: &str) -> Result<bool, TokenError> {
        if !valid_token_input(token) || !valid_user_id(user_id) {
            return Err(self.deny(Denial::InvalidInput, EVENT_SOURCE));
        }
        let result = sqlx::query(
            "UPDATE renewal_tokens SET revoked = 1 WHERE token_hash = ? AND user_id = ? AND revoked = 0",
        )
        .bind(token_digest(token))
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| self.storage_fault("revoke", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every live token of `user_id` (logout everywhere).
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64, TokenError> {
        if !valid_user_id(user_id) {
            return Err(self.deny(Denial::InvalidInput, EVENT_SOURCE));
        }
        let result =
            sqlx::query("UPDATE renewal_tokens SET revoked = 1 WHERE user_id = ? AND revoked = 0")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(|e| self.storage_fault("revoke_all", e))?;
        let count = result.rows_affected();
        self.events.emit(
            SecurityEventKind::BulkRevocation,
            Severity::Medium,
            user_id,
            format!("revoked {count} renewal tokens"),
        );
        Ok(count)
    }

    /// Delete every record past its expiry, revoked or not.
    pub async fn cleanup_expired(&self) -> Result<u64, TokenError> {
        let result = sqlx::query("DELETE FROM renewal_tokens WHERE expires_at <= ?")
            .bind(unix_now() as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| self.storage_fault("cleanup_expired", e))?;
        let count = result.rows_affected();
        if count > 0 {
            info!(count, "deleted expired renewal tokens");
        }
        Ok(count)
    }

    /// Look up the record for `token`, if any.
    pub async fn record(&self, token: &str) -> Result<Option<RenewalTokenRecord>, TokenError> {
        if !valid_token_input(token) {
            return Ok(None);
        }
        self.fetch(&token_digest(token)).await
    }

    /// Number of live (unrevoked, unexpired) tokens of `user_id`.
    pub async fn active_count(&self, user_id: &str) -> Result<u64, TokenError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM renewal_tokens WHERE user_id = ? AND revoked = 0 AND expires_at > ?",
        )
        .bind(user_id)
        .bind(unix_now() as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.storage_fault("active_count", e))?;
        Ok(count.max(0) as u64)
    }

    async fn fetch(&self, token_hash: &str) -> Result<Option<RenewalTokenRecord>, TokenError> {
        sqlx::query_as::<_, RenewalTokenRow>("SELECT * FROM renewal_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Into::into))
            .map_err(|e| self.storage_fault("lookup", e))
    }

    /// Input, signature, and persisted-record checks shared by `verify` and
    /// `rotate`. Does not write. Denials are attributed to the record's bound
    /// user once it is known, never to the caller-supplied user.
    async fn check(
        &self,
        token: &str,
        expected_user: Option<&str>,
    ) -> Result<RenewalTokenRecord, TokenError> {
        if !valid_token_input(token) || expected_user.is_some_and(|u| !valid_user_id(u)) {
            return Err(self.deny(Denial::InvalidInput, EVENT_SOURCE));
        }
        let claims = match self.signer.verify(token) {
            Ok(c) if c.kind == TokenKind::Renewal => c,
            Ok(_) | Err(SignError::Malformed) => {
                return Err(self.deny(Denial::InvalidInput, EVENT_SOURCE));
            },
            Err(SignError::Expired) => return Err(self.deny(Denial::Expired, EVENT_SOURCE)),
            Err(SignError::BadSignature) => return Err(self.deny(Denial::BadSignature, EVENT_SOURCE)),
            Err(e) => return Err(TokenError::Signing(e)),
        };

        let Some(record) = self.fetch(&token_digest(token)).await? else {
            return Err(self.deny(Denial::NotFound, EVENT_SOURCE));
        };
        if record.revoked {
            return Err(self.deny(Denial::Revoked, &record.user_id));
        }
        if record.expires_at <= unix_now() as i64 {
            return Err(self.deny(Denial::Expired, &record.user_id));
        }
        if claims.sub != record.user_id || expected_user.is_some_and(|u| u != record.user_id) {
            return Err(self.deny(Denial::UserMismatch, &record.user_id));
        }
        Ok(record)
    }

    fn mint(&self, user_id: &str) -> Result<(String, TokenClaims), TokenError> {
        let claims = TokenClaims::new(user_id, TokenKind::Renewal, self.ttl.as_secs());
        let token = self.signer.sign(&claims).map_err(TokenError::Signing)?;
        Ok((token, claims))
    }

    fn deny(&self, denial: Denial, source: &str) -> TokenError {
        self.events
            .emit(denial.kind(), denial.severity(), source, denial.details());
        TokenError::AuthenticationFailed
    }

    fn storage_fault(&self, op: &str, e: sqlx::Error) -> TokenError {
        warn!(op, error = %e, "renewal token storage failure");
        self.events.emit(
            SecurityEventKind::StorageUnavailable,
            Severity::High,
            EVENT_SOURCE,
            format!("{op}: {e}"),
        );
        TokenError::StorageUnavailable(e)
    }
}

/// Conditional revoke of the old record followed by the replacement insert.
/// Returns `Ok(false)` when the old record was no longer live.
async fn swap_in_transaction(
    conn: &mut SqliteConnection,
    old_hash: &str,
    user_id: &str,
    new_id: &str,
    new_hash: &str,
    claims: &TokenClaims,
) -> Result<bool, sqlx::Error> {
    let revoked = sqlx::query(
        r#"UPDATE renewal_tokens SET revoked = 1, replaced_by = ?
           WHERE token_hash = ? AND user_id = ? AND revoked = 0 AND expires_at > ?"#,
    )
    .bind(new_id)
    .bind(old_hash)
    .bind(user_id)
    .bind(unix_now() as i64)
    .execute(&mut *conn)
    .await?;
    if revoked.rows_affected() != 1 {
        return Ok(false);
    }

    sqlx::query(
        r#"INSERT INTO renewal_tokens (id, user_id, token_hash, issued_at, expires_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(new_id)
    .bind(user_id)
    .bind(new_hash)
    .bind(claims.iat as i64)
    .bind(claims.exp as i64)
    .execute(&mut *conn)
    .await?;
    Ok(true)
}

/// Digest stored in place of the token value.
pub fn token_digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

fn valid_token_input(token: &str) -> bool {
    !token.is_empty() && token.len() <= MAX_TOKEN_LEN && token.is_ascii()
}

fn valid_user_id(user_id: &str) -> bool {
    !user_id.trim().is_empty() && user_id.len() <= MAX_USER_ID_LEN
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::signer::HmacSigner,
        secrecy::SecretString,
        tempfile::TempDir,
    };

    async fn store_with_ttl(ttl: Duration) -> (TempDir, RenewalTokenStore, Arc<SecurityLog>) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tokens.db").display());
        let pool = connect(&url).await.unwrap();
        RenewalTokenStore::init(&pool).await.unwrap();
        let events = Arc::new(SecurityLog::new());
        let signer = Arc::new(HmacSigner::new(SecretString::new(
            "renewal-test-key-7f3a9c1e5b".into(),
        )));
        let store = RenewalTokenStore::new(pool, signer, ttl, Arc::clone(&events));
        (dir, store, events)
    }

    async fn store() -> (TempDir, RenewalTokenStore, Arc<SecurityLog>) {
        store_with_ttl(Duration::from_secs(3600)).await
    }

    async fn force_expiry(store: &RenewalTokenStore, token: &str) {
        sqlx::query("UPDATE renewal_tokens SET expires_at = ? WHERE token_hash = ?")
            .bind(unix_now() as i64 - 10)
            .bind(token_digest(token))
            .execute(&store.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn issue_then_verify_returns_user() {
        let (_dir, store, _) = store().await;
        let token = store.issue("alice").await.unwrap();
        assert_eq!(store.verify(&token, None).await.unwrap(), "alice");
        assert_eq!(store.verify(&token, Some("alice")).await.unwrap(), "alice");

        let record = store.record(&token).await.unwrap().unwrap();
        assert!(record.last_used_at.is_some());
        assert!(!record.revoked);
        assert_ne!(record.token_hash, token);
    }

    #[tokio::test]
    async fn verify_rejects_wrong_user() {
        let (_dir, store, events) = store().await;
        let token = store.issue("alice").await.unwrap();
        assert!(matches!(
            store.verify(&token, Some("mallory")).await,
            Err(TokenError::AuthenticationFailed)
        ));
        assert_eq!(events.count(SecurityEventKind::InvalidInput), 1);
    }

    #[tokio::test]
    async fn event_source_is_never_caller_supplied() {
        let (_dir, store, events) = store().await;
        let token = store.issue("alice").await.unwrap();
        let forged = "admin\nseverity=critical";

        assert!(store.verify(&token, Some(forged)).await.is_err());
        assert!(store.verify(&token, Some("mallory")).await.is_err());
        assert!(store.verify("a.b.c", Some("mallory")).await.is_err());
        assert!(store.rotate(&token, "mallory").await.is_err());
        assert!(store.revoke(&"x".repeat(MAX_TOKEN_LEN + 1), forged).await.is_err());

        let recorded = events.recent();
        assert_eq!(recorded.len(), 5);
        for event in &recorded {
            assert!(
                event.source == EVENT_SOURCE || event.source == "alice",
                "unexpected source {:?}",
                event.source
            );
        }
    }

    #[tokio::test]
    async fn revoked_token_never_verifies_again() {
        let (_dir, store, events) = store().await;
        let token = store.issue("alice").await.unwrap();
        assert!(store.revoke(&token, "alice").await.unwrap());
        // Idempotent.
        assert!(!store.revoke(&token, "alice").await.unwrap());

        for _ in 0..3 {
            assert!(matches!(
                store.verify(&token, Some("alice")).await,
                Err(TokenError::AuthenticationFailed)
            ));
        }
        assert_eq!(events.count(SecurityEventKind::Revoked), 3);
    }

    #[tokio::test]
    async fn unknown_and_malformed_tokens_fail_uniformly() {
        let (_dir, store, events) = store().await;
        let other = {
            let (_d, other_store, _) = store_with_ttl(Duration::from_secs(60)).await;
            other_store.issue("alice").await.unwrap()
        };

        for token in ["", "garbage", "a.b.c", other.as_str()] {
            assert!(matches!(
                store.verify(token, None).await,
                Err(TokenError::AuthenticationFailed)
            ));
        }
        // Signed with the same key but never persisted here.
        assert_eq!(events.count(SecurityEventKind::NotFound), 1);
    }

    #[tokio::test]
    async fn deleted_token_with_valid_signature_is_rejected() {
        let (_dir, store, _) = store().await;
        let token = store.issue("alice").await.unwrap();
        sqlx::query("DELETE FROM renewal_tokens")
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(store.signer.verify(&token).is_ok());
        assert!(store.verify(&token, Some("alice")).await.is_err());
    }

    #[tokio::test]
    async fn expiry_enforced_without_cleanup() {
        let (_dir, store, events) = store().await;
        let token = store.issue("alice").await.unwrap();
        force_expiry(&store, &token).await;
        assert!(store.verify(&token, Some("alice")).await.is_err());
        assert!(store.rotate(&token, "alice").await.is_err());
        assert_eq!(events.count(SecurityEventKind::Expired), 2);
    }

    #[tokio::test]
    async fn rotate_revokes_old_and_links_successor() {
        let (_dir, store, _) = store().await;
        let old = store.issue("alice").await.unwrap();
        let new = store.rotate(&old, "alice").await.unwrap();
        assert_ne!(old, new);

        assert!(store.verify(&old, Some("alice")).await.is_err());
        assert_eq!(store.verify(&new, Some("alice")).await.unwrap(), "alice");

        let old_record = store.record(&old).await.unwrap().unwrap();
        let new_record = store.record(&new).await.unwrap().unwrap();
        assert!(old_record.revoked);
        assert_eq!(old_record.replaced_by.as_deref(), Some(new_record.id.as_str()));
        assert_eq!(store.active_count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rotate_requires_matching_user() {
        let (_dir, store, _) = store().await;
        let old = store.issue("alice").await.unwrap();
        assert!(store.rotate(&old, "mallory").await.is_err());
        // The failed attempt left the token usable by its owner.
        assert_eq!(store.verify(&old, Some("alice")).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn concurrent_rotations_yield_exactly_one_success() {
        let (_dir, store, events) = store().await;
        let old = store.issue("alice").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let old = old.clone();
            handles.push(tokio::spawn(
                async move { store.rotate(&old, "alice").await },
            ));
        }
        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(e, TokenError::AuthenticationFailed), "{e}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.active_count("alice").await.unwrap(), 1);
        assert_eq!(events.count(SecurityEventKind::Revoked), 3);
    }

    #[tokio::test]
    async fn revoke_all_only_touches_one_user() {
        let (_dir, store, events) = store().await;
        let a1 = store.issue("alice").await.unwrap();
        let _a2 = store.issue("alice").await.unwrap();
        let b1 = store.issue("bob").await.unwrap();

        assert_eq!(store.revoke_all("alice").await.unwrap(), 2);
        assert_eq!(store.revoke_all("alice").await.unwrap(), 0);
        assert!(store.verify(&a1, None).await.is_err());
        assert_eq!(store.verify(&b1, None).await.unwrap(), "bob");
        assert_eq!(events.count(SecurityEventKind::BulkRevocation), 2);
    }

    #[tokio::test]
    async fn cleanup_only_deletes_expired_records() {
        let (_dir, store, _) = store().await;
        let live = store.issue("alice").await.unwrap();
        let revoked_live = store.issue("alice").await.unwrap();
        store.revoke(&revoked_live, "alice").await.unwrap();
        let expired = store.issue("bob").await.unwrap();
        let expired_revoked = store.issue("bob").await.unwrap();
        store.revoke(&expired_revoked, "bob").await.unwrap();
        force_expiry(&store, &expired).await;
        force_expiry(&store, &expired_revoked).await;

        assert_eq!(store.cleanup_expired().await.unwrap(), 2);
        assert!(store.record(&live).await.unwrap().is_some());
        assert!(store.record(&revoked_live).await.unwrap().is_some());
        assert!(store.record(&expired).await.unwrap().is_none());
        assert!(store.record(&expired_revoked).await.unwrap().is_none());
        assert_eq!(store.verify(&live, Some("alice")).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn invalid_input_is_uniform_failure() {
        let (_dir, store, _) = store().await;
        assert!(matches!(
            store.issue("  ").await,
            Err(TokenError::AuthenticationFailed)
        ));
        assert!(matches!(
            store.revoke("", "alice").await,
            Err(TokenError::AuthenticationFailed)
        ));
        let long = "a".repeat(MAX_TOKEN_LEN + 1);
        assert!(matches!(
            store.verify(&long, None).await,
            Err(TokenError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn storage_failure_is_distinct() {
        let (_dir, store, _) = store().await;
        let token = store.issue("alice").await.unwrap();
        store.pool.close().await;
        let err = store.verify(&token, None).await.unwrap_err();
        assert!(matches!(err, TokenError::StorageUnavailable(_)));
        assert!(err.is_retryable());
    }
}
