//! Security event log.
//!
//! Every rejection in the token lifecycle and the channel gate lands here.
//! Events are emitted through `tracing` under the `agora::security` target;
//! critical and high events carry `alert = true` so log pipelines can page
//! operators, medium and low events are only logged. A bounded buffer of
//! recent events is kept for inspection.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use {
    serde::Serialize,
    tracing::{error, info, warn},
};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Critical and high events alert operators immediately.
    pub fn is_alerting(self) -> bool {
        self >= Self::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    InvalidInput,
    NotFound,
    Expired,
    Revoked,
    RateLimited,
    OriginRejected,
    HijackSuspected,
    MaliciousContent,
    StorageUnavailable,
    WeakSecret,
    BulkRevocation,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub details: String,
    /// Address, identity, or subsystem the event is attributed to.
    pub source: String,
}

impl SecurityEvent {
    pub fn new(
        kind: SecurityEventKind,
        severity: Severity,
        source: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: now_ms(),
            kind,
            severity,
            details: details.into(),
            source: source.into(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Process-wide sink for security events.
pub struct SecurityLog {
    recent: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    alerts: AtomicU64,
}

impl Default for SecurityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
            alerts: AtomicU64::new(0),
        }
    }

    /// Emit an event and keep it in the recent buffer.
    pub fn record(&self, event: SecurityEvent) {
        if event.severity.is_alerting() {
            self.alerts.fetch_add(1, Ordering::Relaxed);
            error!(
                target: "agora::security",
                alert = true,
                kind = ?event.kind,
                severity = ?event.severity,
                source = %event.source,
                details = %event.details,
                "security event"
            );
        } else if event.severity == Severity::Medium {
            warn!(
                target: "agora::security",
                kind = ?event.kind,
                source = %event.source,
                details = %event.details,
                "security event"
            );
        } else {
            info!(
                target: "agora::security",
                kind = ?event.kind,
                source = %event.source,
                details = %event.details,
                "security event"
            );
        }

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() >= self.capacity {
            recent.pop_front();
        }
        recent.push_back(event);
    }

    /// Shorthand for [`SecurityLog::record`].
    pub fn emit(
        &self,
        kind: SecurityEventKind,
        severity: Severity,
        source: impl Into<String>,
        details: impl Into<String>,
    ) {
        self.record(SecurityEvent::new(kind, severity, source, details));
    }

    /// Snapshot of the buffered events, oldest first.
    pub fn recent(&self) -> Vec<SecurityEvent> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: SecurityEventKind) -> usize {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Number of alerting (critical/high) events since startup.
    pub fn alerts_raised(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }
}
