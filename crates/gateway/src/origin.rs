//! Origin allow-list and the cross-site hijack heuristic.

use {tracing::warn, url::Url};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowedOrigin {
    /// `scheme://host[:port]`, compared on all three parts.
    Exact {
        scheme: String,
        host: String,
        port: Option<u16>,
    },
    /// `*.example.org` (any scheme) or `https://*.example.org`. Matches
    /// strict subdomains only.
    Wildcard {
        scheme: Option<String>,
        suffix: String,
    },
}

impl AllowedOrigin {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim().trim_end_matches('/');
        let (scheme, rest) = match entry.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, entry),
        };
        if let Some(suffix) = rest.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains(['/', '*']) {
                return None;
            }
            return Some(Self::Wildcard {
                scheme,
                suffix: suffix.to_ascii_lowercase(),
            });
        }
        scheme.as_ref()?;
        let url = Url::parse(entry).ok()?;
        Some(Self::Exact {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_ascii_lowercase(),
            port: url.port_or_known_default(),
        })
    }

    fn matches(&self, origin: &Url) -> bool {
        let Some(host) = origin.host_str() else {
            return false;
        };
        match self {
            Self::Exact { scheme, host: h, port } => {
                origin.scheme() == scheme
                    && host.eq_ignore_ascii_case(h)
                    && origin.port_or_known_default() == *port
            },
            Self::Wildcard { scheme, suffix } => {
                scheme.as_deref().is_none_or(|s| s == origin.scheme())
                    && host.len() > suffix.len() + 1
                    && host
                        .to_ascii_lowercase()
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            },
        }
    }
}

/// Compiled allow-list of origins permitted to open the channel.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<AllowedOrigin>,
}

impl OriginPolicy {
    /// Unparseable entries are skipped with a warning.
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let allowed = entries
            .iter()
            .filter_map(|entry| {
                let entry = entry.as_ref();
                let parsed = AllowedOrigin::parse(entry);
                if parsed.is_none() {
                    warn!(entry, "ignoring invalid allowed origin");
                }
                parsed
            })
            .collect();
        Self { allowed }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Whether a declared `Origin` header value is on the allow-list.
    /// `null` and unparseable origins never match.
    pub fn is_allowed(&self, origin: &str) -> bool {
        let Ok(url) = Url::parse(origin.trim()) else {
            return false;
        };
        self.allowed.iter().any(|entry| entry.matches(&url))
    }
}

/// Browser-relevant headers of a connection attempt.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHeaders {
    pub origin: Option<String>,
    pub host: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    /// Any `Sec-Fetch-*` header was present.
    pub sec_fetch: bool,
}

impl ConnectionHeaders {
    pub fn from_header_map(headers: &axum::http::HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            origin: text("origin"),
            host: text("host"),
            user_agent: text("user-agent"),
            accept_language: text("accept-language"),
            sec_fetch: headers
                .keys()
                .any(|k| k.as_str().starts_with("sec-fetch-")),
        }
    }
}

/// Why a connection looks like a cross-site hijack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HijackSignal {
    MissingOrigin,
    /// The origin's host differs from the `Host` header.
    HostMismatch,
    /// Automation tool user agent (or none) without browser headers.
    AutomationClient,
}

impl HijackSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingOrigin => "missing_origin",
            Self::HostMismatch => "host_mismatch",
            Self::AutomationClient => "automation_client",
        }
    }
}

/// User-agent fragments of scripted HTTP clients and headless browsers.
const AUTOMATION_AGENTS: &[&str] = &[
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpx",
    "go-http-client",
    "okhttp",
    "java/",
    "libwww-perl",
    "node-fetch",
    "axios",
    "postmanruntime",
    "insomnia",
    "headlesschrome",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
    "scrapy",
    "websocat",
    "wscat",
];

fn is_automation_agent(user_agent: Option<&str>) -> bool {
    let Some(ua) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
        return true;
    };
    let ua = ua.to_ascii_lowercase();
    AUTOMATION_AGENTS.iter().any(|agent| ua.contains(agent))
}

/// Every hijack signal raised by `headers`; empty when the connection looks
/// like a browser on a matching host.
pub fn hijack_signals(headers: &ConnectionHeaders) -> Vec<HijackSignal> {
    let mut signals = Vec::new();

    match headers.origin.as_deref().map(str::trim) {
        None | Some("") => signals.push(HijackSignal::MissingOrigin),
        Some(origin) => {
            let origin_host = Url::parse(origin).ok().and_then(|u| {
                u.host_str()
                    .map(|h| h.trim_matches(['[', ']']).to_ascii_lowercase())
            });
            let host = headers.host.as_deref().map(host_without_port);
            if let (Some(origin_host), Some(host)) = (origin_host.as_deref(), host.as_deref())
                && origin_host != host
            {
                signals.push(HijackSignal::HostMismatch);
            }
        },
    }

    let browser_headers = headers.accept_language.is_some() || headers.sec_fetch;
    if is_automation_agent(headers.user_agent.as_deref()) && !browser_headers {
        signals.push(HijackSignal::AutomationClient);
    }
    signals
}

/// `example.org:8080` → `example.org`, `[::1]:80` → `::1`.
fn host_without_port(host: &str) -> String {
    let host = host.trim();
    let bare = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or(host, |(h, _)| h)
    };
    bare.to_ascii_lowercase()
}
