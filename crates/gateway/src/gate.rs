//! Channel security gate: connection-time and per-message defenses for the
//! real-time channel.
//!
//! One gate is built per process and shared by `Arc`; all rate-limit state is
//! private to it. Every rejection is recorded in the [`SecurityLog`] and, for
//! origin, hijack, content and rate violations, counts as a strike against
//! the offending source.

use std::{
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use {
    agora_auth::{SecurityEventKind, SecurityLog, Severity},
    agora_config::ChannelConfig,
    thiserror::Error,
    tracing::{debug, info},
};

use crate::{
    content::{ContentFilter, sanitize},
    origin::{ConnectionHeaders, HijackSignal, OriginPolicy, hijack_signals},
    rate_limit::{RateDecision, WindowLimiter, WindowPolicy},
};

/// Longest token accepted by [`ChannelSecurityGate::precheck_token`].
pub const MAX_TOKEN_LEN: usize = 4096;

/// Why the gate dropped a connection attempt or message. Display strings are
/// safe to send to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("too many requests")]
    RateLimited { retry_after: Duration },
    #[error("origin not allowed")]
    OriginRejected,
    #[error("connection rejected")]
    HijackSuspected,
    #[error("invalid message")]
    InvalidInput,
    #[error("message rejected")]
    MaliciousContent,
}

impl GateRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::OriginRejected => "origin_rejected",
            Self::HijackSuspected => "hijack_suspected",
            Self::InvalidInput => "invalid_input",
            Self::MaliciousContent => "malicious_content",
        }
    }
}

/// Compiled form of `[channel]`.
#[derive(Debug, Clone)]
struct GatePolicy {
    origins: OriginPolicy,
    content: ContentFilter,
    connections: WindowPolicy,
    messages: WindowPolicy,
    max_message_length: usize,
    reject_suspicious: bool,
}

impl GatePolicy {
    fn from_config(config: &ChannelConfig) -> Self {
        let strike_threshold = config.strike_threshold;
        Self {
            origins: OriginPolicy::new(config.allowed_origins.as_slice()),
            content: ContentFilter::new(&config.signatures),
            connections: WindowPolicy {
                limit: config.max_connections,
                window: Duration::from_secs(config.connection_window_secs.max(1)),
                strike_threshold,
            },
            messages: WindowPolicy {
                limit: config.max_messages,
                window: Duration::from_secs(config.message_window_secs.max(1)),
                strike_threshold,
            },
            max_message_length: config.max_message_length,
            reject_suspicious: config.reject_suspicious,
        }
    }
}

pub struct ChannelSecurityGate {
    policy: RwLock<Arc<GatePolicy>>,
    connections: WindowLimiter,
    messages: WindowLimiter,
    events: Arc<SecurityLog>,
}

impl ChannelSecurityGate {
    pub fn new(config: &ChannelConfig, events: Arc<SecurityLog>) -> Self {
        let policy = GatePolicy::from_config(config);
        if policy.origins.is_empty() {
            info!("no allowed origins configured, every channel connection will be rejected");
        }
        Self {
            policy: RwLock::new(Arc::new(policy)),
            connections: WindowLimiter::new(),
            messages: WindowLimiter::new(),
            events,
        }
    }

    /// Swap in a new policy. Counters and strikes are kept.
    pub fn apply_config(&self, config: &ChannelConfig) {
        let policy = Arc::new(GatePolicy::from_config(config));
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
        info!("channel gate policy updated");
    }

    fn policy(&self) -> Arc<GatePolicy> {
        Arc::clone(&self.policy.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn events(&self) -> &Arc<SecurityLog> {
        &self.events
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.policy().origins.is_allowed(origin)
    }

    pub fn check_connection(
        &self,
        source: &str,
        headers: &ConnectionHeaders,
    ) -> Result<Vec<HijackSignal>, GateRejection> {
        self.check_connection_at(source, headers, Instant::now())
    }

    /// Connection-time checks, in order: per-source ceiling (every attempt
    /// counts), hijack heuristic, origin allow-list.
    ///
    /// On success returns the hijack signals that were raised but tolerated
    /// by policy.
    pub fn check_connection_at(
        &self,
        source: &str,
        headers: &ConnectionHeaders,
        now: Instant,
    ) -> Result<Vec<HijackSignal>, GateRejection> {
        let policy = self.policy();

        if let RateDecision::Limited { retry_after } =
            self.connections.check_at(source, policy.connections, now)
        {
            self.connections.strike_at(source, now);
            self.events.emit(
                SecurityEventKind::RateLimited,
                Severity::Medium,
                source,
                "connection ceiling exceeded",
            );
            return Err(GateRejection::RateLimited { retry_after });
        }

        let signals = hijack_signals(headers);
        if !signals.is_empty() {
            let names: Vec<&str> = signals.iter().map(|s| s.as_str()).collect();
            self.connections.strike_at(source, now);
            self.events.emit(
                SecurityEventKind::HijackSuspected,
                Severity::High,
                source,
                format!("suspicious connection: {}", names.join(", ")),
            );
            if policy.reject_suspicious {
                return Err(GateRejection::HijackSuspected);
            }
        }

        let origin = headers.origin.as_deref().unwrap_or_default();
        if !policy.origins.is_allowed(origin) {
            self.connections.strike_at(source, now);
            self.events.emit(
                SecurityEventKind::OriginRejected,
                Severity::High,
                source,
                if origin.is_empty() {
                    "missing origin".to_string()
                } else {
                    format!("origin not allowed: {}", truncate(origin, 256))
                },
            );
            return Err(GateRejection::OriginRejected);
        }

        debug!(source, "channel connection accepted");
        Ok(signals)
    }

    pub fn check_message(
        &self,
        identity: &str,
        payload: &serde_json::Value,
    ) -> Result<String, GateRejection> {
        self.check_message_at(identity, payload, Instant::now())
    }

    /// Ceiling plus payload checks for one chat frame. Returns the sanitized
    /// text to broadcast.
    pub fn check_message_at(
        &self,
        identity: &str,
        payload: &serde_json::Value,
        now: Instant,
    ) -> Result<String, GateRejection> {
        self.check_frame_at(identity, now)?;
        self.check_payload_at(identity, payload, now)
    }

    pub fn check_frame(&self, identity: &str) -> Result<(), GateRejection> {
        self.check_frame_at(identity, Instant::now())
    }

    /// Count one inbound frame against the per-identity message ceiling.
    /// Every data frame is counted, whether or not it parses.
    pub fn check_frame_at(&self, identity: &str, now: Instant) -> Result<(), GateRejection> {
        let policy = self.policy();
        if let RateDecision::Limited { retry_after } =
            self.messages.check_at(identity, policy.messages, now)
        {
            self.messages.strike_at(identity, now);
            self.events.emit(
                SecurityEventKind::RateLimited,
                Severity::Medium,
                identity,
                "message ceiling exceeded",
            );
            return Err(GateRejection::RateLimited { retry_after });
        }
        Ok(())
    }

    pub fn check_payload(
        &self,
        identity: &str,
        payload: &serde_json::Value,
    ) -> Result<String, GateRejection> {
        self.check_payload_at(identity, payload, Instant::now())
    }

    /// Payload checks for a frame already counted by
    /// [`check_frame_at`](Self::check_frame_at).
    pub fn check_payload_at(
        &self,
        identity: &str,
        payload: &serde_json::Value,
        now: Instant,
    ) -> Result<String, GateRejection> {
        let policy = self.policy();

        let Some(text) = payload.as_str() else {
            return Err(self.invalid(identity, "non-string payload"));
        };
        if text.trim().is_empty() {
            return Err(self.invalid(identity, "empty payload"));
        }
        if text.chars().count() > policy.max_message_length {
            return Err(self.invalid(identity, "payload over length limit"));
        }

        if let Some(threat) = policy.content.inspect(text) {
            self.messages.strike_at(identity, now);
            self.events.emit(
                SecurityEventKind::MaliciousContent,
                Severity::High,
                identity,
                format!("payload matched {}", threat.as_str()),
            );
            return Err(GateRejection::MaliciousContent);
        }

        Ok(sanitize(text))
    }

    /// Reject a counted frame that is not a usable chat payload (binary,
    /// unparseable, or an unexpected frame type).
    pub fn reject_frame(&self, identity: &str, details: &'static str) -> GateRejection {
        self.invalid(identity, details)
    }

    fn invalid(&self, identity: &str, details: &'static str) -> GateRejection {
        self.events
            .emit(SecurityEventKind::InvalidInput, Severity::Low, identity, details);
        GateRejection::InvalidInput
    }

    /// Cheap structural check before full session verification: three
    /// non-empty base64url segments and a bounded length.
    pub fn precheck_token(&self, token: &str) -> bool {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return false;
        }
        let segments: Vec<&str> = token.split('.').collect();
        segments.len() == 3
            && segments.iter().all(|s| {
                !s.is_empty()
                    && s
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            })
    }

    pub fn strikes(&self, key: &str) -> u32 {
        self.connections.strikes(key).max(self.messages.strikes(key))
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Drop counters whose window has elapsed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let policy = self.policy();
        self.connections.sweep_at(policy.connections.window, now)
            + self.messages.sweep_at(policy.messages.window, now)
    }

    pub fn tracked_keys(&self) -> usize {
        self.connections.len() + self.messages.len()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    const APP: &str = "https://app.example";

    fn config() -> ChannelConfig {
        ChannelConfig {
            allowed_origins: vec![APP.into()],
            max_connections: 3,
            connection_window_secs: 60,
            max_messages: 5,
            message_window_secs: 60,
            max_message_length: 64,
            ..ChannelConfig::default()
        }
    }

    fn gate_with(config: &ChannelConfig) -> ChannelSecurityGate {
        ChannelSecurityGate::new(config, Arc::new(SecurityLog::new()))
    }

    fn browser(origin: Option<&str>) -> ConnectionHeaders {
        ConnectionHeaders {
            origin: origin.map(str::to_string),
            host: Some("app.example".into()),
            user_agent: Some("Mozilla/5.0 (Macintosh) Safari/605.1.15".into()),
            accept_language: Some("en-US".into()),
            sec_fetch: true,
        }
    }

    #[test]
    fn connection_ceiling_rolls_over_with_window() {
        let gate = gate_with(&config());
        let start = Instant::now();
        let headers = browser(Some(APP));
        for i in 0..3 {
            gate.check_connection_at("10.0.0.5", &headers, start + Duration::from_secs(i))
                .unwrap();
        }
        assert!(matches!(
            gate.check_connection_at("10.0.0.5", &headers, start + Duration::from_secs(3)),
            Err(GateRejection::RateLimited { .. })
        ));
        assert!(
            gate.check_connection_at("10.0.0.5", &headers, start + Duration::from_secs(61))
                .is_ok()
        );
        assert_eq!(gate.events().count(SecurityEventKind::RateLimited), 1);
    }

    #[test]
    fn missing_origin_is_flagged_as_hijack() {
        let gate = gate_with(&config());
        assert_eq!(
            gate.check_connection("10.0.0.9", &browser(None)),
            Err(GateRejection::HijackSuspected)
        );
        assert_eq!(gate.events().count(SecurityEventKind::HijackSuspected), 1);
    }

    #[test]
    fn foreign_origin_is_rejected() {
        let gate = gate_with(&ChannelConfig {
            reject_suspicious: false,
            ..config()
        });
        let mut headers = browser(Some("https://evil.example"));
        headers.host = Some("evil.example".into());
        assert_eq!(
            gate.check_connection("10.0.0.9", &headers),
            Err(GateRejection::OriginRejected)
        );
        assert_eq!(gate.events().count(SecurityEventKind::OriginRejected), 1);
    }

    #[test]
    fn tolerated_signals_are_returned() {
        let gate = gate_with(&ChannelConfig {
            reject_suspicious: false,
            ..config()
        });
        let mut headers = browser(Some(APP));
        headers.host = Some("internal-proxy:8080".into());
        assert_eq!(gate.check_connection("10.0.0.7", &headers), Ok(vec![
            HijackSignal::HostMismatch
        ]));
        assert_eq!(gate.strikes("10.0.0.7"), 1);
    }

    #[test]
    fn strikes_tighten_connection_ceiling() {
        let gate = gate_with(&ChannelConfig {
            max_connections: 4,
            strike_threshold: 1,
            ..config()
        });
        let now = Instant::now();
        let bad = browser(Some("https://evil.example"));
        let _ = gate.check_connection_at("10.0.0.8", &bad, now);
        // One strike halves 4 to 2; the failed attempt already used a slot.
        assert!(gate.check_connection_at("10.0.0.8", &browser(Some(APP)), now).is_ok());
        assert!(gate.check_connection_at("10.0.0.8", &browser(Some(APP)), now).is_err());
    }

    #[test]
    fn message_checks() {
        let gate = gate_with(&config());
        assert_eq!(
            gate.check_message("alice", &json!("hello neighbours")).unwrap(),
            "hello neighbours"
        );
        assert_eq!(
            gate.check_message("alice", &json!({"nested": true})),
            Err(GateRejection::InvalidInput)
        );
        assert_eq!(
            gate.check_message("alice", &json!("x".repeat(65))),
            Err(GateRejection::InvalidInput)
        );
        assert_eq!(
            gate.check_message("alice", &json!("<script>alert(1)</script>")),
            Err(GateRejection::MaliciousContent)
        );
        assert_eq!(gate.events().count(SecurityEventKind::MaliciousContent), 1);
        assert_eq!(gate.events().count(SecurityEventKind::InvalidInput), 2);
    }

    #[test]
    fn message_ceiling_drops_excess() {
        let gate = gate_with(&config());
        let now = Instant::now();
        for _ in 0..5 {
            gate.check_message_at("bob", &json!("hi"), now).unwrap();
        }
        assert!(matches!(
            gate.check_message_at("bob", &json!("hi"), now),
            Err(GateRejection::RateLimited { .. })
        ));
        // Other identities are unaffected.
        assert!(gate.check_message_at("carol", &json!("hi"), now).is_ok());
    }

    #[test]
    fn junk_frames_count_against_ceiling() {
        let gate = gate_with(&config());
        let now = Instant::now();
        for _ in 0..5 {
            gate.check_frame_at("mallory", now).unwrap();
            assert_eq!(
                gate.reject_frame("mallory", "binary frame"),
                GateRejection::InvalidInput
            );
        }
        assert!(matches!(
            gate.check_message_at("mallory", &json!("hi"), now),
            Err(GateRejection::RateLimited { .. })
        ));
        assert_eq!(gate.events().count(SecurityEventKind::InvalidInput), 5);
        assert_eq!(gate.events().count(SecurityEventKind::RateLimited), 1);
    }

    #[test]
    fn token_precheck() {
        let gate = gate_with(&config());
        assert!(gate.precheck_token("eyJh.eyJz.c2ln"));
        assert!(gate.precheck_token("a-b_c.d.e"));
        assert!(!gate.precheck_token(""));
        assert!(!gate.precheck_token("a.b"));
        assert!(!gate.precheck_token("a..c"));
        assert!(!gate.precheck_token("a.b.c.d"));
        assert!(!gate.precheck_token("a.b+/.c"));
        assert!(!gate.precheck_token(&format!("a.b.{}", "c".repeat(MAX_TOKEN_LEN))));
    }

    #[test]
    fn sweep_and_reload() {
        let gate = gate_with(&config());
        let start = Instant::now();
        gate.check_connection_at("10.0.0.1", &browser(Some(APP)), start)
            .unwrap();
        gate.check_message_at("dana", &json!("hi"), start).unwrap();
        assert_eq!(gate.tracked_keys(), 2);
        assert_eq!(gate.sweep_at(start + Duration::from_secs(120)), 2);
        assert_eq!(gate.tracked_keys(), 0);

        gate.apply_config(&ChannelConfig {
            allowed_origins: vec!["*.civic.test".into()],
            ..config()
        });
        assert!(!gate.is_origin_allowed(APP));
        assert!(gate.is_origin_allowed("https://vote.civic.test"));
    }
}
