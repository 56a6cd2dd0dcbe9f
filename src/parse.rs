use http::StatusCode;
use n0_error::{Result, anyerr};
use tokio::io::{self, AsyncWrite, AsyncWriteExt};

/// Parsed first line of a client request.
#[derive(Debug, Clone)]
pub struct RequestLine {
    /// HTTP method token, case preserved.
    pub method: String,
    /// Request target exactly as written.
    pub uri: String,
    /// HTTP version token.
    pub version: String,
}

impl RequestLine {
    /// Splits a request line into method, URI, and version tokens.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(method), Some(uri), Some(version)) => Ok(Self {
                method: method.to_string(),
                uri: uri.to_string(),
                version: version.to_string(),
            }),
            _ => Err(anyerr!("Request line has fewer than three tokens")),
        }
    }

    /// Returns whether the method is GET, ignoring case.
    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// Origin host, port, and path parsed from an absolute-form request URI.
#[derive(Debug, Clone, derive_more::Display)]
#[display("{host}:{port}")]
pub struct Origin {
    /// Hostname or IP literal without scheme.
    pub host: String,
    /// Port as written in the URI, `"80"` when absent.
    pub port: String,
    /// Path component including the leading slash, `"/"` when absent.
    pub path: String,
}

impl Origin {
    /// Parses an absolute-form request URI.
    ///
    /// A missing scheme is tolerated and no validation or decoding is
    /// applied; whatever follows `:` up to the path is taken as the port.
    pub fn from_uri(uri: &str) -> Self {
        let rest = match uri.find("//") {
            Some(idx) => &uri[idx + 2..],
            None => uri,
        };
        let (host, rest) = match rest.find(['/', ':']) {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (port, path) = if let Some(after_colon) = rest.strip_prefix(':') {
            match after_colon.find('/') {
                Some(idx) => (&after_colon[..idx], &after_colon[idx..]),
                None => (after_colon, "/"),
            }
        } else if rest.is_empty() {
            ("80", "/")
        } else {
            ("80", rest)
        };
        Self {
            host: host.to_string(),
            port: port.to_string(),
            path: path.to_string(),
        }
    }

    /// Socket address string for connecting to the origin.
    pub(crate) fn to_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Formats the request line and Host header sent to the origin.
    pub(crate) fn request_prelude(&self) -> String {
        let path = &self.path;
        let host = &self.host;
        format!("GET {path} HTTP/1.0\r\nHost: {host}\r\n")
    }
}

/// Minimal HTML error page returned to the client when a request fails.
#[derive(Debug)]
pub struct ErrorResponse {
    /// Status code for the response line.
    pub status: StatusCode,
    /// One-sentence explanation shown in the page body.
    pub detail: String,
    /// The offending item: the method, URI, or origin address.
    pub cause: String,
}

impl ErrorResponse {
    pub(crate) fn new(status: StatusCode, detail: impl ToString, cause: impl ToString) -> Self {
        Self {
            status,
            detail: detail.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Returns the canonical reason phrase for the status.
    pub fn reason(&self) -> &str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Formats a status line suitable for an HTTP/1.0 response.
    pub fn status_line(&self) -> String {
        format!("HTTP/1.0 {} {}\r\n", self.status.as_u16(), self.reason())
    }

    fn page(&self) -> String {
        format!(
            "<html><title>Proxy Error</title><body bgcolor=\"ffffff\">\r\n\
             {}: {}\r\n\
             <p>{}: {}\r\n\
             <hr><em>Web Proxy Server</em>\r\n",
            self.status.as_u16(),
            self.reason(),
            self.detail,
            self.cause,
        )
    }

    pub(crate) async fn write(
        &self,
        writer: &mut (impl AsyncWrite + Send + Unpin),
    ) -> io::Result<()> {
        writer.write_all(self.status_line().as_bytes()).await?;
        writer.write_all(b"Content-type: text/html\r\n\r\n").await?;
        writer.write_all(self.page().as_bytes()).await?;
        Ok(())
    }
}
