//! Pull-through fetch from an upstream distribution peer.

use crate::traits::TokenProvider;
use depot_core::FileHash;
use futures::StreamExt;
use reqwest::header::USER_AGENT;
use reqwest::{StatusCode, Url, Version};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Route under which distribution nodes serve files to their peers.
pub const DISTRIBUTION_ROUTE: &str = "/dist/files";

/// User-Agent presented on peer pulls, fixed by the wire protocol.
const PEER_USER_AGENT: &str = "MareSynchronosServer/1.0.0.0";

/// Write buffer for copying the response body.
const COPY_BUFFER_SIZE: usize = 4 * 1024;

/// Peer fetch error. Fetches are never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid peer address: {0}")]
    Address(String),

    #[error("peer transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("peer returned {0}")]
    Status(StatusCode),

    #[error("failed writing fetched body: {0}")]
    Io(#[from] std::io::Error),
}

/// Streams file bodies from the upstream distribution peer.
///
/// One long-lived HTTP client is shared across all fetches. The fetcher does
/// not cache and does not parse bodies; it authenticates, streams, and
/// reports success or failure.
pub struct PeerFetcher {
    http: reqwest::Client,
    base: Url,
    token: Arc<dyn TokenProvider>,
    force_http2: bool,
}

impl PeerFetcher {
    pub fn new(
        address: &str,
        token: Arc<dyn TokenProvider>,
        force_http2: bool,
    ) -> Result<Self, FetchError> {
        let base = Url::parse(address).map_err(|e| FetchError::Address(e.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token,
            force_http2,
        })
    }

    fn file_url(&self, hash: &FileHash) -> Result<Url, FetchError> {
        self.base
            .join(&format!("{DISTRIBUTION_ROUTE}/{hash}"))
            .map_err(|e| FetchError::Address(e.to_string()))
    }

    /// Stream the body for `hash` into `writer`, flushing before return.
    ///
    /// The bearer token is re-read from the provider on every call. Any
    /// transport error or non-2xx response fails the fetch; there is no
    /// retry. Returns the number of body bytes written.
    pub async fn fetch<W>(&self, hash: &FileHash, writer: &mut W) -> Result<u64, FetchError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let url = self.file_url(hash)?;
        let mut request = self
            .http
            .get(url)
            .header(USER_AGENT, PEER_USER_AGENT)
            .bearer_auth(self.token.bearer_token());
        if self.force_http2 {
            request = request.version(Version::HTTP_2);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let mut out = BufWriter::with_capacity(COPY_BUFFER_SIZE, writer);
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;

        tracing::debug!(hash = %hash, bytes = written, "fetched file from peer");
        Ok(written)
    }
}
