//! Inbound payload screening and sanitizing.

use std::sync::LazyLock;

use {agora_config::ContentSignatures, regex::Regex, tracing::warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentThreat {
    Script,
    EventHandler,
    Sql,
}

impl ContentThreat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script_injection",
            Self::EventHandler => "event_handler_injection",
            Self::Sql => "sql_metacharacters",
        }
    }
}

static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());
static SCHEME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(javascript|vbscript)\s*:").ok());
/// Inline handler inside an unclosed tag (`<img src=x onerror=`).
static HANDLER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)<[^>]*\bon[a-z]+\s*=").ok());

/// Signature sets compiled from `[channel.signatures]`.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    script: Vec<Regex>,
    event_handler: Vec<Regex>,
    sql: Vec<Regex>,
}

impl ContentFilter {
    /// Signatures that fail to compile are skipped with a warning.
    pub fn new(signatures: &ContentSignatures) -> Self {
        Self {
            script: compile("script", &signatures.script),
            event_handler: compile("event_handler", &signatures.event_handler),
            sql: compile("sql", &signatures.sql),
        }
    }

    /// First signature class `payload` matches, if any.
    pub fn inspect(&self, payload: &str) -> Option<ContentThreat> {
        [
            (ContentThreat::Script, &self.script),
            (ContentThreat::EventHandler, &self.event_handler),
            (ContentThreat::Sql, &self.sql),
        ]
        .into_iter()
        .find(|(_, set)| set.iter().any(|re| re.is_match(payload)))
        .map(|(threat, _)| threat)
    }
}

fn compile(set: &str, sources: &[String]) -> Vec<Regex> {
    sources
        .iter()
        .filter_map(|src| match Regex::new(src) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(set, signature = %src, error = %e, "skipping invalid content signature");
                None
            },
        })
        .collect()
}

/// Strip markup, script schemes and inline handlers. The result never
/// contains `<` or `>`.
pub fn sanitize(payload: &str) -> String {
    let mut out = payload.to_string();
    for re in [&*TAG, &*SCHEME, &*HANDLER].into_iter().flatten() {
        // Repeat until stable so removals cannot splice a new match together.
        loop {
            let next = re.replace_all(&out, "").into_owned();
            if next == out {
                break;
            }
            out = next;
        }
    }
    out.retain(|c| c != '<' && c != '>');
    out
}
