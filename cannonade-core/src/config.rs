use crate::{
    EngineError, DEFAULT_CONNECTIONS, DEFAULT_CONNECT_RETRIES, DEFAULT_DURATION,
    DEFAULT_REQUEST_TIMEOUT,
};
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::num::NonZeroU32;
use std::time::Duration;
use url::Url;

/// Configuration for a single load-generation run.
///
/// Built by the caller (typically a CLI or config-file layer, which is not
/// part of this crate) and immutable once the run starts. There is no
/// process-wide default target; every run carries its own config, so
/// repeated or concurrent runs within one process are fine.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub url: Url,
    pub connections: usize,
    pub duration: Duration,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Open-loop request rate (requests/sec). When unset, each connection
    /// runs closed-loop: the next request is issued only after the previous
    /// response completes or times out.
    pub rate: Option<NonZeroU32>,
    /// Maximum outstanding requests per connection. Values above 1 require
    /// `http2`, where requests multiplex over one socket; http/1.1 drives
    /// one request per connection at a time.
    pub pipelining: usize,
    pub timeout: Duration,
    /// How long the drain phase waits for in-flight requests after the
    /// duration elapses. Defaults to 2x `timeout`.
    pub drain_grace: Option<Duration>,
    pub http2: bool,
    pub connect_retries: usize,
}

impl RunConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connections: DEFAULT_CONNECTIONS,
            duration: DEFAULT_DURATION,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            rate: None,
            pipelining: 1,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            drain_grace: None,
            http2: false,
            connect_retries: DEFAULT_CONNECT_RETRIES,
        }
    }

    pub fn parse(url: &str) -> Result<Self, EngineError> {
        let url = Url::parse(url).map_err(|e| EngineError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(url))
    }

    pub fn connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn rate(mut self, rate: NonZeroU32) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn pipelining(mut self, pipelining: usize) -> Self {
        self.pipelining = pipelining;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = Some(grace);
        self
    }

    pub fn http2(mut self, http2: bool) -> Self {
        self.http2 = http2;
        self
    }

    pub fn connect_retries(mut self, retries: usize) -> Self {
        self.connect_retries = retries;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        match self.url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(EngineError::InvalidUrl {
                    url: self.url.to_string(),
                    reason: format!("unsupported scheme `{other}`"),
                })
            }
        }
        if self.url.host_str().is_none() {
            return Err(EngineError::InvalidUrl {
                url: self.url.to_string(),
                reason: "missing host".to_string(),
            });
        }
        if self.connections == 0 {
            return Err(EngineError::InvalidConfig {
                field: "connections",
            });
        }
        if self.duration.is_zero() {
            return Err(EngineError::InvalidConfig { field: "duration" });
        }
        if self.timeout.is_zero() {
            return Err(EngineError::InvalidConfig { field: "timeout" });
        }
        if self.pipelining == 0 {
            return Err(EngineError::InvalidConfig { field: "pipelining" });
        }
        if self.pipelining > 1 && !self.http2 {
            return Err(EngineError::PipeliningRequiresHttp2);
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or(if self.uses_tls() { 443 } else { 80 })
    }

    pub fn uses_tls(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Host header / :authority value for outgoing requests.
    pub fn authority(&self) -> String {
        match (self.url.port(), self.url.host_str()) {
            (Some(port), Some(host)) => format!("{host}:{port}"),
            (None, Some(host)) => host.to_string(),
            _ => String::new(),
        }
    }

    /// Path and query in origin-form, as sent on the request line.
    pub fn origin_form(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{q}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    pub fn resolved_drain_grace(&self) -> Duration {
        self.drain_grace.unwrap_or(self.timeout * 2)
    }
}
