//! Config schema types (server, auth, secret policy, real-time channel).

use {
    secrecy::SecretString,
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgoraConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub secrets: SecretPolicyConfig,
    pub channel: ChannelConfig,
}

/// Deployment environment. Production tightens secret checks and turns
/// critical findings into startup failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Parse `AGORA_ENV`-style values. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Self::Production),
            "development" | "dev" | "test" => Some(Self::Development),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8787,
            environment: Environment::Development,
        }
    }
}

/// Token signing and renewal-token persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret used to sign short-lived session tokens.
    #[serde(serialize_with = "serialize_redacted")]
    pub session_secret: Option<SecretString>,
    /// Secret used to sign renewal tokens. Must differ from `session_secret`.
    #[serde(serialize_with = "serialize_redacted")]
    pub renewal_secret: Option<SecretString>,
    pub session_ttl_secs: u64,
    pub renewal_ttl_secs: u64,
    pub database_url: String,
    /// Interval of the expired renewal-token cleanup task.
    pub cleanup_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: None,
            renewal_secret: None,
            session_ttl_secs: 15 * 60,
            renewal_ttl_secs: 7 * 24 * 60 * 60,
            database_url: "sqlite://agora.db".into(),
            cleanup_interval_secs: 60 * 60,
        }
    }
}

/// Severity attached to a weak-secret catalogue entry or pattern rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternSeverity {
    High,
    Critical,
}

/// A known placeholder or default secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakSecretEntry {
    pub value: String,
    pub severity: PatternSeverity,
}

/// A named regex rule applied to the whole candidate secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub name: String,
    pub regex: String,
    pub severity: PatternSeverity,
}

/// Thresholds and catalogues for the signing-secret strength validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretPolicyConfig {
    pub min_length: usize,
    /// Must be strictly greater than `min_length`.
    pub production_min_length: usize,
    pub min_character_classes: usize,
    /// Runs of one character longer than this are flagged.
    pub max_repeat_run: usize,
    pub min_entropy_bits: f64,
    pub exact: Vec<WeakSecretEntry>,
    pub fragments: Vec<String>,
    pub patterns: Vec<PatternRule>,
}

impl Default for SecretPolicyConfig {
    fn default() -> Self {
        Self {
            min_length: 32,
            production_min_length: 64,
            min_character_classes: 3,
            max_repeat_run: 3,
            min_entropy_bits: 128.0,
            exact: default_weak_secrets(),
            fragments: default_fragments(),
            patterns: default_pattern_rules(),
        }
    }
}

fn default_weak_secrets() -> Vec<WeakSecretEntry> {
    let critical = [
        "your-secret-key",
        "your_secret_key",
        "your-jwt-secret",
        "your-refresh-secret",
        "your-super-secret-jwt-key",
        "secret",
        "secret-key",
        "jwt-secret",
        "refresh-secret",
        "changeme",
        "change-me",
        "changethis",
        "default",
        "password",
        "12345678",
        "mysecret",
        "my-secret-key",
        "supersecret",
    ];
    let high = [
        "development-secret",
        "dev-secret",
        "test-secret",
        "testing",
        "example-secret",
        "placeholder",
        "insecure",
        "qwertyuiop",
        "letmein",
    ];
    critical
        .iter()
        .map(|v| WeakSecretEntry {
            value: (*v).into(),
            severity: PatternSeverity::Critical,
        })
        .chain(high.iter().map(|v| WeakSecretEntry {
            value: (*v).into(),
            severity: PatternSeverity::High,
        }))
        .collect()
}

fn default_fragments() -> Vec<String> {
    [
        "localhost",
        "example",
        "test",
        "demo",
        "password",
        "admin",
        "secret",
        "changeme",
        "qwerty",
    ]
    .iter()
    .map(|s| (*s).into())
    .collect()
}

fn default_pattern_rules() -> Vec<PatternRule> {
    vec![
        PatternRule {
            name: "all_digits".into(),
            regex: "^[0-9]+$".into(),
            severity: PatternSeverity::Critical,
        },
        PatternRule {
            name: "all_letters".into(),
            regex: "^[A-Za-z]+$".into(),
            severity: PatternSeverity::High,
        },
    ]
}

/// Real-time channel gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Exact origins (`https://app.example`) or suffix wildcards
    /// (`*.example.org`, `https://*.example.org`).
    pub allowed_origins: Vec<String>,
    pub max_connections: u32,
    pub connection_window_secs: u64,
    pub max_messages: u32,
    pub message_window_secs: u64,
    pub max_message_length: usize,
    /// Reject connections flagged by the hijack heuristic instead of only
    /// logging them.
    pub reject_suspicious: bool,
    /// Every this many violations from one source halves its ceiling.
    pub strike_threshold: u32,
    pub sweep_interval_secs: u64,
    pub signatures: ContentSignatures,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_connections: 10,
            connection_window_secs: 60,
            max_messages: 30,
            message_window_secs: 60,
            max_message_length: 4096,
            reject_suspicious: true,
            strike_threshold: 3,
            sweep_interval_secs: 30,
            signatures: ContentSignatures::default(),
        }
    }
}

/// Regex sources used to flag malicious channel payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentSignatures {
    pub script: Vec<String>,
    pub event_handler: Vec<String>,
    pub sql: Vec<String>,
}

impl Default for ContentSignatures {
    fn default() -> Self {
        Self {
            script: vec![
                r"(?i)<\s*/?\s*script\b".into(),
                r"(?i)javascript\s*:".into(),
                r"(?i)vbscript\s*:".into(),
                r"(?i)<\s*(iframe|object|embed)\b".into(),
                r"(?i)data\s*:\s*text/html".into(),
            ],
            event_handler: vec![r"(?i)<[^>]*\bon[a-z]+\s*=".into()],
            sql: vec![
                r"(?i)\bunion\s+(all\s+)?select\b".into(),
                r"(?i)\b(drop|truncate|alter)\s+table\b".into(),
                r"(?i)\binsert\s+into\b".into(),
                r"(?i)\bdelete\s+from\b".into(),
                r"(?i)'\s*(or|and)\s+'?\d*'?\s*=\s*'?\d*".into(),
                r"'\s*--".into(),
                r";\s*--".into(),
                r"/\*.*\*/".into(),
            ],
        }
    }
}

fn serialize_redacted<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some("[REDACTED]"),
        None => serializer.serialize_none(),
    }
}
