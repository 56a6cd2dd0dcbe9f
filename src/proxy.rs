use std::io;

use bytes::BytesMut;
use http::StatusCode;
use n0_error::{AnyError, Result, StdResultExt, anyerr, stack_error};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error_span, warn};

use crate::{
    Cache, LINE_MAX_LENGTH, MAX_OBJECT_SIZE,
    parse::{ErrorResponse, Origin, RequestLine},
    util::Prebuffered,
};

/// Fixed headers sent to every origin in place of whatever the client sent.
const USER_AGENT_HEADER: &str =
    "User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:10.0.3) Gecko/20120305 Firefox/10.0.3\r\n";
const CONNECTION_HEADER: &str = "Connection: close\r\n";
const PROXY_CONNECTION_HEADER: &str = "Proxy-Connection: close\r\n";

/// Client header lines with these prefixes are superseded by the fixed set.
const SUPPRESSED_HEADERS: &[&str] = &["Host:", "User-Agent:", "Connection:", "Proxy-Connection:"];

/// Accepts client connections and serves GET requests through a shared cache.
///
/// Each connection runs one transaction: on a cache hit the stored response
/// bytes are replayed; on a miss the request is forwarded to the origin with
/// rewritten headers, the response is streamed back to the client, and small
/// responses are admitted to the cache for later requests.
#[derive(Debug, Clone, Default)]
pub struct Proxy {
    cache: Cache,
}

impl Proxy {
    /// Creates a proxy with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to the shared response cache.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Accepts client connections and serves each in a new task.
    ///
    /// Runs indefinitely until the listener errors or the task is cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let cancel_token = CancellationToken::new();
        let _cancel_guard = cancel_token.clone().drop_guard();
        let mut id = 0;
        loop {
            let (stream, client_addr) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(
                cancel_token
                    .child_token()
                    .run_until_cancelled_owned(async move {
                        debug!(%client_addr, "accepted connection");
                        this.handle_connection(stream).await.ok();
                    })
                    .instrument(error_span!("conn", id)),
            );
            id += 1;
        }
    }

    /// Serves a single client connection.
    ///
    /// Pipeline failures that map to an HTTP status are reported to the
    /// client as an HTML error page before the socket closes.
    pub async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        if let Err(err) = self.process(&mut stream).await {
            warn!("error while serving request: {err:#}");
            if let Some(response) = err.to_response() {
                debug!(status = %response.status, "send error response");
                if let Err(err) = response.write(&mut stream).await {
                    debug!("failed to send error response: {err:#}");
                }
            }
            Err(err.into())
        } else {
            debug!("transaction finished");
            Ok(())
        }
    }

    async fn process(&self, conn: &mut TcpStream) -> Result<(), ProxyError> {
        let (client_recv, mut client_send) = conn.split();
        let mut client_recv = Prebuffered::new(client_recv, LINE_MAX_LENGTH);

        let line = client_recv.read_line().await?;
        if line.is_empty() {
            // Client connected and went away without sending anything.
            return Ok(());
        }
        if !line.ends_with(b"\n") && line.len() == LINE_MAX_LENGTH {
            return Err(ProxyError::bad_request(anyerr!(
                "Request line exceeds the line budget"
            )));
        }
        let line = std::str::from_utf8(&line)
            .std_context("Request line is not valid UTF-8")
            .map_err(ProxyError::bad_request)?;
        let request = RequestLine::parse(line).map_err(ProxyError::bad_request)?;
        debug!(method = %request.method, uri = %request.uri, "read request line");

        if !request.is_get() {
            return Err(ProxyError::not_implemented(&request.method));
        }

        if let Some(object) = self.cache.lookup(&request.uri).await {
            debug!(uri = %request.uri, len = object.len(), "cache hit");
            client_send.write_all(&object).await?;
            return Ok(());
        }

        let origin = Origin::from_uri(&request.uri);
        debug!(%origin, "cache miss, connecting to origin");
        let origin_stream = TcpStream::connect(origin.to_addr())
            .await
            .map_err(|err| ProxyError::bad_gateway(&origin, err))?;
        let (origin_recv, mut origin_send) = origin_stream.into_split();

        origin_send
            .write_all(origin.request_prelude().as_bytes())
            .await?;
        forward_headers(&mut client_recv, &mut origin_send).await?;

        // Tee the response to the client and to the staging buffer. The
        // buffer stops growing once the object cannot be admitted anymore,
        // but the byte count and the relay keep going until origin EOF.
        let mut origin_recv = Prebuffered::new(origin_recv, LINE_MAX_LENGTH);
        let mut staging = BytesMut::new();
        let mut total_size = 0;
        let mut client_ok = true;
        loop {
            let chunk = origin_recv.read_line().await?;
            if chunk.is_empty() {
                break;
            }
            if total_size + chunk.len() <= MAX_OBJECT_SIZE {
                staging.extend_from_slice(&chunk);
            }
            total_size += chunk.len();
            if client_ok && let Err(err) = client_send.write_all(&chunk).await {
                debug!("client write failed, abandoning client writes: {err:#}");
                client_ok = false;
            }
        }
        debug!(total_size, "origin closed the response stream");

        if client_ok && total_size <= MAX_OBJECT_SIZE {
            self.cache.admit(&request.uri, staging.freeze()).await;
        }
        Ok(())
    }
}

/// Sends the fixed origin-side headers, then relays the client's remaining
/// header lines verbatim, dropping the ones the fixed set supersedes.
async fn forward_headers(
    client: &mut Prebuffered<impl AsyncRead + Unpin>,
    origin: &mut (impl AsyncWrite + Unpin),
) -> Result<(), ProxyError> {
    origin.write_all(USER_AGENT_HEADER.as_bytes()).await?;
    origin.write_all(CONNECTION_HEADER.as_bytes()).await?;
    origin.write_all(PROXY_CONNECTION_HEADER.as_bytes()).await?;
    loop {
        let line = client.read_line().await?;
        if line.is_empty() || line.as_ref() == b"\r\n" {
            break;
        }
        if !line.ends_with(b"\n") && line.len() == LINE_MAX_LENGTH {
            return Err(ProxyError::bad_request(anyerr!(
                "Header line exceeds the line budget"
            )));
        }
        if SUPPRESSED_HEADERS
            .iter()
            .any(|prefix| line.starts_with(prefix.as_bytes()))
        {
            continue;
        }
        origin.write_all(&line).await?;
    }
    origin.write_all(b"\r\n").await?;
    Ok(())
}

/// Error type for request pipeline failures.
#[stack_error(add_meta, derive)]
pub struct ProxyError {
    response_status: Option<StatusCode>,
    cause: Option<String>,
    #[error(source)]
    source: AnyError,
}

impl From<io::Error> for ProxyError {
    fn from(value: io::Error) -> Self {
        Self::io(value)
    }
}

impl ProxyError {
    /// Returns the HTTP status code to surface to the client, if any.
    pub fn response_status(&self) -> Option<StatusCode> {
        self.response_status
    }

    fn to_response(&self) -> Option<ErrorResponse> {
        let status = self.response_status?;
        let detail = match status {
            StatusCode::NOT_IMPLEMENTED => "This proxy only supports GET requests",
            StatusCode::BAD_GATEWAY => "The origin server could not be reached",
            _ => "The request could not be understood by the proxy",
        };
        Some(ErrorResponse::new(
            status,
            detail,
            self.cause.as_deref().unwrap_or_default(),
        ))
    }

    fn bad_request(source: impl Into<AnyError>) -> Self {
        Self::new(Some(StatusCode::BAD_REQUEST), None, source.into())
    }

    fn not_implemented(method: &str) -> Self {
        Self::new(
            Some(StatusCode::NOT_IMPLEMENTED),
            Some(method.to_string()),
            anyerr!("{method} method is not supported"),
        )
    }

    fn bad_gateway(origin: &Origin, source: io::Error) -> Self {
        Self::new(
            Some(StatusCode::BAD_GATEWAY),
            Some(origin.to_string()),
            anyerr!(source),
        )
    }

    fn io(source: impl Into<AnyError>) -> Self {
        Self::new(None, None, source.into())
    }
}
