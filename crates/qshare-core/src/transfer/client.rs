//! HTTP client for the peer API

use super::wire::{
    LIST_PATH, PING_PATH, UPLOAD_CONTENT_TYPE, UPLOAD_FIELD, UPLOAD_PATH, download_path,
    parse_listing, parse_ping, parse_upload_ack,
};
use crate::error::{Error, Result};
use crate::types::{FileListing, PeerStatus, UploadAck};
use qshare_discovery::Endpoint;
use reqwest::multipart::{Form, Part};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default limit for a whole request, body included
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Transfer client configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Total time allowed per request, including reading the body
    pub response_timeout: Duration,
    /// `User-Agent` header sent to the peer
    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            user_agent: concat!("qshare/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Performs list, upload and download requests against an endpoint
///
/// Cloning is cheap and shares the underlying connection pool, which is safe
/// for concurrent use. Every call is one-shot; nothing is retried.
#[derive(Debug, Clone)]
pub struct TransferClient {
    http: reqwest::Client,
    config: TransferConfig,
}

impl TransferClient {
    /// Build a client with its own connection pool
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the HTTP stack cannot be initialised.
    pub fn new(config: TransferConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.response_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Send a request and reject non-2xx responses
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!("{} answered {}", response.url(), status);
            return Err(Error::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }

    /// Fetch the peer's file listing (`GET /api/list`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpStatus`] for non-2xx answers, [`Error::Parse`] for
    /// malformed bodies and [`Error::Timeout`] / [`Error::Transport`] for
    /// network failures.
    pub async fn list_files(&self, endpoint: &Endpoint) -> Result<FileListing> {
        let url = endpoint.url(LIST_PATH);
        tracing::debug!("GET {}", url);

        let response = self.send(self.http.get(&url)).await?;
        let body = response.bytes().await?;
        let listing = parse_listing(&body)?;

        tracing::debug!("{} lists {} files", endpoint, listing.len());
        Ok(listing)
    }

    /// Stream `GET /download/{name}` into `sink`
    ///
    /// Returns the number of bytes written. On error the sink may hold a
    /// partial body; cleaning it up is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpStatus`] for non-2xx answers, [`Error::EmptyBody`]
    /// when the response carries no body, [`Error::SinkWriteFailed`] when the
    /// sink rejects data, and network errors as for [`Self::list_files`].
    pub async fn download_file<W>(&self, endpoint: &Endpoint, name: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let url = endpoint.url(&download_path(name));
        tracing::debug!("GET {}", url);

        let mut response = self.send(self.http.get(&url)).await?;
        if matches!(
            response.status(),
            StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT
        ) {
            return Err(Error::EmptyBody);
        }

        // Content-Length: 0 is an empty file; no length and no bytes is no body
        let declared = response.headers().contains_key(CONTENT_LENGTH);
        let mut written: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk)
                .await
                .map_err(|e| Error::SinkWriteFailed(e.to_string()))?;
            written += chunk.len() as u64;
        }

        if written == 0 && !declared {
            return Err(Error::EmptyBody);
        }

        sink.flush()
            .await
            .map_err(|e| Error::SinkWriteFailed(e.to_string()))?;

        tracing::info!("Downloaded {} ({} bytes) from {}", name, written, endpoint);
        Ok(written)
    }

    /// Upload `bytes` as `name` (`POST /upload`, multipart field `file`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpStatus`] for non-2xx answers and network errors as
    /// for [`Self::list_files`].
    pub async fn upload_file(&self, endpoint: &Endpoint, name: &str, bytes: Vec<u8>) -> Result<UploadAck> {
        let url = endpoint.url(UPLOAD_PATH);
        let size = bytes.len();
        tracing::debug!("POST {} ({}, {} bytes)", url, name, size);

        let part = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str(UPLOAD_CONTENT_TYPE)
            .map_err(|e| Error::Transport(e.to_string()))?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self.send(self.http.post(&url).multipart(form)).await?;
        // The 2xx status already confirms the upload; the body is optional
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("Ignoring unreadable upload response from {}: {}", endpoint, e);
                Default::default()
            }
        };
        let ack = parse_upload_ack(name, &body);

        tracing::info!(
            "Uploaded {} ({} bytes) to {} as {}",
            name,
            size,
            endpoint,
            ack.stored_name()
        );
        Ok(ack)
    }

    /// Check that the peer is alive (`GET /api/ping`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpStatus`], [`Error::Parse`] or network errors.
    pub async fn ping(&self, endpoint: &Endpoint) -> Result<PeerStatus> {
        let url = endpoint.url(PING_PATH);
        tracing::debug!("GET {}", url);

        let response = self.send(self.http.get(&url)).await?;
        let body = response.bytes().await?;
        parse_ping(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = TransferConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.response_timeout, Duration::from_secs(60));
        assert!(config.user_agent.starts_with("qshare/"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = TransferClient::new(TransferConfig::default()).unwrap();
        let err = client
            .list_files(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "unexpected {err:?}");
    }

    /// Sink that accepts `capacity` bytes and then fails
    struct FullDisk {
        written: usize,
        capacity: usize,
    }

    impl AsyncWrite for FullDisk {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            if self.written >= self.capacity {
                return std::task::Poll::Ready(Err(std::io::Error::other("disk full")));
            }
            let n = buf.len().min(self.capacity - self.written);
            self.written += n;
            std::task::Poll::Ready(Ok(n))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    /// Serve one canned HTTP response on an ephemeral port
    async fn serve_once(response: Vec<u8>) -> Endpoint {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            let head_end = loop {
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            };
            let head = String::from_utf8_lossy(&request[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while request.len() < head_end + body_len {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let _ = stream.write_all(&response).await;
            let _ = stream.shutdown().await;
        });
        Endpoint::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_sink_failure_mid_stream() {
        let body = vec![7u8; 64 * 1024];
        let mut response =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len())
                .into_bytes();
        response.extend_from_slice(&body);
        let endpoint = serve_once(response).await;

        let client = TransferClient::new(TransferConfig::default()).unwrap();
        let mut sink = FullDisk {
            written: 0,
            capacity: 1024,
        };
        let err = client
            .download_file(&endpoint, "big.bin", &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SinkWriteFailed(_)), "unexpected {err:?}");
        assert_eq!(sink.written, 1024);
    }

    #[tokio::test]
    async fn test_truncated_upload_response_still_acks() {
        // Promises 100 bytes of body, delivers 10, then closes
        let endpoint = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\n{\"ok\":true"
                .to_vec(),
        )
        .await;

        let client = TransferClient::new(TransferConfig::default()).unwrap();
        let ack = client
            .upload_file(&endpoint, "notes.txt", b"hello".to_vec())
            .await
            .unwrap();

        assert_eq!(ack.saved_as, None);
        assert_eq!(ack.stored_name(), "notes.txt");
    }
}
