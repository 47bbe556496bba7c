use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Outcome of the most recent visit to a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseState {
    #[default]
    Unvisited,
    Ok,
    NotFound,
    Error,
    Banned,
}

impl ResponseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseState::Unvisited => "unvisited",
            ResponseState::Ok => "ok",
            ResponseState::NotFound => "not_found",
            ResponseState::Error => "error",
            ResponseState::Banned => "banned",
        }
    }

    /// Terminal states are not revisited when the domain is submitted again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseState::Ok | ResponseState::NotFound | ResponseState::Banned
        )
    }

    /// Maps an HTTP status code to a visit outcome.
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => ResponseState::Ok,
            404 => ResponseState::NotFound,
            _ => ResponseState::Error,
        }
    }
}

impl fmt::Display for ResponseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResponseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unvisited" | "" => Ok(ResponseState::Unvisited),
            "ok" => Ok(ResponseState::Ok),
            "not_found" => Ok(ResponseState::NotFound),
            "error" => Ok(ResponseState::Error),
            "banned" => Ok(ResponseState::Banned),
            _ => Err(format!("Unknown response state: {}", s)),
        }
    }
}

/// A crawl target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    pub host: String,
    pub response_state: ResponseState,
    /// Length of the current streak of visits that ended in `Error`.
    pub error_count: u32,
    /// ISO 639-1 code of the dominant page language, or empty.
    pub content_language: String,
    pub tag_languages: Vec<String>,
    pub sitemap_languages: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Domain {
    pub fn new(id: i64, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            response_state: ResponseState::Unvisited,
            error_count: 0,
            content_language: String::new(),
            tag_languages: Vec::new(),
            sitemap_languages: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// URL fetched for this domain.
    ///
    /// Hosts that already carry an http(s) scheme are used as-is.
    pub fn target_url(&self) -> String {
        let lower = self.host.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.host.clone()
        } else {
            format!("http://{}/", self.host)
        }
    }

    /// True once the domain needs no further visit for a batch recorded at `since`.
    pub fn is_settled_since(&self, since: DateTime<Utc>) -> bool {
        self.response_state.is_terminal()
            || (self.response_state != ResponseState::Unvisited && self.updated_at >= since)
    }
}

/// Egress protocol of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Https,
    Socks4,
    Socks5,
    NoProxy,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Https => "https",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::NoProxy => "noproxy",
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProxyScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "https" | "http" => Ok(ProxyScheme::Https),
            "socks4" => Ok(ProxyScheme::Socks4),
            "socks5" => Ok(ProxyScheme::Socks5),
            "noproxy" => Ok(ProxyScheme::NoProxy),
            _ => Err(format!("Unknown proxy scheme: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

/// An egress route loaded from the proxy registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i64,
    /// `host:port`
    pub endpoint: String,
    pub scheme: ProxyScheme,
    pub credentials: Option<ProxyCredentials>,
}

impl Proxy {
    /// Proxy URL in the form understood by HTTP clients, credentials included.
    pub fn url(&self) -> String {
        match &self.credentials {
            Some(c) => format!(
                "{}://{}:{}@{}",
                self.scheme, c.username, c.password, self.endpoint
            ),
            None => format!("{}://{}", self.scheme, self.endpoint),
        }
    }
}

/// DTO for inserting a new proxy into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProxy {
    pub endpoint: String,
    pub scheme: ProxyScheme,
    pub credentials: Option<ProxyCredentials>,
}

/// Priority class a pending visit was claimed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    User,
    ErrorRetry,
    ListScan,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::User => "user",
            Tier::ErrorRetry => "error_retry",
            Tier::ListScan => "list_scan",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A domain removed from the queue and handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTask {
    pub domain: Domain,
    pub tier: Tier,
    /// Codes of every live batch that contains this domain.
    pub batch_codes: Vec<String>,
}

/// Response returned by a [`Fetcher`](crate::traits::Fetcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
    /// Values of the `Content-Language` response header.
    pub content_languages: Vec<String>,
}

/// Result of looking up a persisted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchLookup {
    Ready(Vec<Domain>),
    NotReady,
    NotFound,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic batch code for a submission.
///
/// Hashes the callback followed by the hosts in submission order, so the same
/// submission always maps to the same code.
pub fn batch_code<S: AsRef<str>>(callback: Option<&str>, hosts: &[S]) -> String {
    let mut content = String::from(callback.unwrap_or_default());
    for host in hosts {
        content.push_str(host.as_ref());
    }
    compute_hash(&content)
}
