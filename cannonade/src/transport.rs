//! Per-connection HTTP transport.
//!
//! Each pool slot owns one of these: a single TCP (or TLS) socket driven
//! through a connection-level hyper handshake, http1 or http2 depending on
//! the run config. The hyper connection driver runs on its own task; dropping
//! the transport closes the socket.
use bytes::Bytes;
use cannonade_core::RunConfig;
use http::{header, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
#[allow(unused)]
use tracing::{debug, error, trace, warn};

/// Rough size of a response status line; exact wire counts are not
/// observable through hyper, so received bytes are head-estimate + headers +
/// body.
const STATUS_LINE_ESTIMATE: u64 = 17;

pub(crate) enum Transport {
    Http1(hyper::client::conn::http1::SendRequest<Full<Bytes>>),
    Http2(hyper::client::conn::http2::SendRequest<Full<Bytes>>),
}

#[derive(Debug, Error)]
pub(crate) enum SendError {
    #[error("connection failed: {0}")]
    Connection(#[source] hyper::Error),

    #[error("malformed response: {0}")]
    Protocol(#[source] hyper::Error),
}

impl From<hyper::Error> for SendError {
    fn from(err: hyper::Error) -> Self {
        if err.is_parse() || err.is_parse_status() {
            SendError::Protocol(err)
        } else {
            SendError::Connection(err)
        }
    }
}

impl Transport {
    /// An additional request handle multiplexed over the same connection.
    /// Only http2 can multiplex; http1 drives one request at a time.
    pub fn multiplex(&self) -> Option<Transport> {
        match self {
            Transport::Http2(sender) => Some(Transport::Http2(sender.clone())),
            Transport::Http1(_) => None,
        }
    }

    /// Opens one socket to the target and completes the HTTP handshake.
    pub async fn connect(config: &RunConfig) -> io::Result<Self> {
        let stream = TcpStream::connect((config.host(), config.port())).await?;
        stream.set_nodelay(true)?;

        if config.uses_tls() {
            let connector = tls_connector();
            let name = ServerName::try_from(config.host().to_string())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let stream = connector.connect(name, stream).await?;
            Self::handshake(config, stream).await
        } else {
            Self::handshake(config, stream).await
        }
    }

    async fn handshake<S>(config: &RunConfig, stream: S) -> io::Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        if config.http2 {
            let (sender, conn) = hyper::client::conn::http2::handshake(TokioExecutor::new(), io)
                .await
                .map_err(io::Error::other)?;
            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    trace!("connection task ended: {err}");
                }
            });
            Ok(Transport::Http2(sender))
        } else {
            let (sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(io::Error::other)?;
            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    trace!("connection task ended: {err}");
                }
            });
            Ok(Transport::Http1(sender))
        }
    }

    /// Sends one request and reads the full response. Returns the status
    /// code and the estimated received byte count.
    pub async fn send(&mut self, req: Request<Full<Bytes>>) -> Result<(u16, u64), SendError> {
        let response = match self {
            Transport::Http1(sender) => {
                sender.ready().await?;
                sender.send_request(req).await?
            }
            Transport::Http2(sender) => {
                sender.ready().await?;
                sender.send_request(req).await?
            }
        };

        let status = response.status().as_u16();
        let mut received = STATUS_LINE_ESTIMATE;
        for (name, value) in response.headers() {
            received += name.as_str().len() as u64 + value.len() as u64 + 4;
        }

        let body = response.into_body().collect().await?;
        received += body.to_bytes().len() as u64;

        Ok((status, received))
    }
}

/// Immutable description of the request every worker sends. `http::Request`
/// is not `Clone`, so workers rebuild from this per issue; the body `Bytes`
/// clone is refcounted.
pub(crate) struct RequestTemplate {
    method: http::Method,
    uri: Uri,
    headers: http::HeaderMap,
    body: Bytes,
    /// Serialized size of the request head + body, for sent-byte accounting.
    size: u64,
}

impl RequestTemplate {
    pub fn new(config: &RunConfig) -> io::Result<Self> {
        // http2 wants scheme and authority on the URI; http1 takes the
        // origin-form path with an explicit Host header.
        let uri_str = if config.http2 {
            config.url.as_str().to_string()
        } else {
            config.origin_form()
        };
        let uri: Uri = uri_str
            .parse()
            .map_err(|e: http::uri::InvalidUri| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut headers = config.headers.clone();
        if !config.http2 {
            let host = config
                .authority()
                .parse()
                .map_err(|e: header::InvalidHeaderValue| {
                    io::Error::new(io::ErrorKind::InvalidInput, e)
                })?;
            headers.entry(header::HOST).or_insert(host);
        }

        let body = config.body.clone().unwrap_or_default();
        if !body.is_empty() {
            headers
                .entry(header::CONTENT_LENGTH)
                .or_insert(header::HeaderValue::from(body.len()));
        }

        let mut size = config.method.as_str().len() as u64
            + config.origin_form().len() as u64
            + " HTTP/1.1\r\n\r\n".len() as u64;
        for (name, value) in &headers {
            size += name.as_str().len() as u64 + value.len() as u64 + 4;
        }
        size += body.len() as u64;

        Ok(Self {
            method: config.method.clone(),
            uri,
            headers,
            body,
            size,
        })
    }

    pub fn build(&self) -> Request<Full<Bytes>> {
        let mut req = Request::new(Full::new(self.body.clone()));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        req.headers_mut().extend(self.headers.clone());
        req
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(tls_config))
}
