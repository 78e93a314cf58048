use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    agora_auth::{SecurityLog, SessionIssuer},
    agora_config::AgoraConfig,
    tokio::sync::{Notify, RwLock, mpsc},
    tracing::warn,
};

use crate::gate::ChannelSecurityGate;

/// Frames buffered per client before it is treated as a slow reader.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

// ── Connected client ─────────────────────────────────────────────────────────

/// An authenticated channel connection.
#[derive(Debug)]
pub struct ConnectedClient {
    pub conn_id: String,
    pub user_id: String,
    pub remote_addr: SocketAddr,
    /// Bounded channel feeding this client's write loop.
    pub sender: mpsc::Sender<String>,
    /// Signalled when the client is evicted for falling behind.
    pub evicted: Arc<Notify>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Queue a serialized JSON frame for this client without waiting.
    pub fn send(&self, frame: &str) -> Result<(), mpsc::error::TrySendError<String>> {
        self.sender.try_send(frame.to_string())
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Authenticated channel clients, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    /// Monotonically increasing sequence counter for broadcast frames.
    pub seq: AtomicU64,
    /// Server version string.
    pub version: String,
    pub gate: Arc<ChannelSecurityGate>,
    pub issuer: SessionIssuer,
    pub events: Arc<SecurityLog>,
    /// Configuration currently in effect; replaced on reload.
    pub config: RwLock<AgoraConfig>,
}

impl GatewayState {
    pub fn new(
        config: AgoraConfig,
        gate: Arc<ChannelSecurityGate>,
        issuer: SessionIssuer,
        events: Arc<SecurityLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            version: env!("CARGO_PKG_VERSION").to_string(),
            gate,
            issuer,
            events,
            config: RwLock::new(config),
        })
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a new client connection.
    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    /// Remove a client by conn_id. Returns the removed client if found.
    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Send `frame` to every authenticated client. Returns how many accepted
    /// it. Clients whose queue is full are evicted.
    pub async fn broadcast(&self, frame: &str) -> usize {
        let mut delivered = 0;
        let mut slow = Vec::new();
        for client in self.clients.read().await.values() {
            match client.send(frame) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => slow.push(client.conn_id.clone()),
                Err(mpsc::error::TrySendError::Closed(_)) => {},
            }
        }
        if !slow.is_empty() {
            let mut clients = self.clients.write().await;
            for conn_id in slow {
                if let Some(client) = clients.remove(&conn_id) {
                    warn!(conn_id = %conn_id, user_id = %client.user_id, "evicting slow channel client");
                    client.evicted.notify_one();
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use {super::*, agora_config::ChannelConfig};

    async fn state() -> (tempfile::TempDir, Arc<GatewayState>) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgoraConfig::default();
        config.auth.session_secret = Some(secrecy::SecretString::new("state-session-key".into()));
        config.auth.renewal_secret = Some(secrecy::SecretString::new("state-renewal-key".into()));
        config.auth.database_url = format!("sqlite://{}", dir.path().join("state.db").display());
        let events = Arc::new(SecurityLog::new());
        let issuer = SessionIssuer::from_config(&config.auth, Arc::clone(&events))
            .await
            .unwrap();
        let gate = Arc::new(ChannelSecurityGate::new(
            &ChannelConfig::default(),
            Arc::clone(&events),
        ));
        (dir, GatewayState::new(config, gate, issuer, events))
    }

    fn client(conn_id: &str, capacity: usize) -> (ConnectedClient, mpsc::Receiver<String>) {
        let (sender, rx) = mpsc::channel(capacity);
        let client = ConnectedClient {
            conn_id: conn_id.into(),
            user_id: format!("user-{conn_id}"),
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            sender,
            evicted: Arc::new(Notify::new()),
            connected_at: Instant::now(),
        };
        (client, rx)
    }

    #[tokio::test]
    async fn slow_reader_is_evicted() {
        let (_dir, state) = state().await;
        let (fast, mut fast_rx) = client("fast", 8);
        let (slow, _slow_rx) = client("slow", 1);
        let evicted = Arc::clone(&slow.evicted);
        state.register_client(fast).await;
        state.register_client(slow).await;

        assert_eq!(state.broadcast("one").await, 2);
        // The slow client's single slot is still occupied.
        assert_eq!(state.broadcast("two").await, 1);
        assert_eq!(state.client_count().await, 1);
        tokio::time::timeout(std::time::Duration::from_secs(1), evicted.notified())
            .await
            .unwrap();

        assert_eq!(fast_rx.recv().await.as_deref(), Some("one"));
        assert_eq!(fast_rx.recv().await.as_deref(), Some("two"));
    }
}
