//! Session coordinator
//!
//! Owns the current endpoint and file listing. All reads and writes go
//! through this type; state is guarded by a single `RwLock` so readers never
//! see a half-applied update.
//!
//! Every operation captures the endpoint when it starts and builds its
//! request against that value. When a listing comes back the coordinator
//! checks that the same endpoint is still current before applying it, and
//! that no later-issued refresh has already been applied.

use crate::error::{Error, Result};
use crate::io::{create_download_sink, read_upload_source, upload_name};
use crate::transfer::TransferClient;
use crate::types::{FileListing, PeerStatus, UploadAck};
use qshare_discovery::Endpoint;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWrite;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct SessionState {
    endpoint: Option<Endpoint>,
    listing: FileListing,
    /// Sequence number of the refresh that produced `listing`
    applied_refresh: u64,
    /// Last refresh sequence number issued before the endpoint was replaced
    switched_at: u64,
}

/// Result of a session upload
#[derive(Debug)]
pub struct UploadOutcome {
    /// Peer acknowledgement
    pub ack: UploadAck,
    /// Result of the listing refresh that follows a successful upload
    pub refresh: Result<FileListing>,
}

/// Single integration point for the presentation layer
#[derive(Debug)]
pub struct SessionCoordinator {
    client: TransferClient,
    state: RwLock<SessionState>,
    refresh_seq: AtomicU64,
}

impl SessionCoordinator {
    /// Create a disconnected session
    #[must_use]
    pub fn new(client: TransferClient) -> Self {
        Self {
            client,
            state: RwLock::new(SessionState::default()),
            refresh_seq: AtomicU64::new(0),
        }
    }

    /// Transfer client used by this session
    #[must_use]
    pub fn client(&self) -> &TransferClient {
        &self.client
    }

    /// Endpoint currently in use, if any
    pub async fn current_endpoint(&self) -> Option<Endpoint> {
        self.state.read().await.endpoint.clone()
    }

    /// Last successfully fetched listing
    pub async fn current_listing(&self) -> FileListing {
        self.state.read().await.listing.clone()
    }

    /// Whether an endpoint is current
    pub async fn is_connected(&self) -> bool {
        self.state.read().await.endpoint.is_some()
    }

    /// Make `endpoint` current without fetching a listing
    ///
    /// Switching to a different endpoint clears the listing, and refreshes
    /// issued before the switch can no longer be applied.
    pub async fn adopt_endpoint(&self, endpoint: Endpoint) {
        let mut state = self.state.write().await;
        if state.endpoint.as_ref() != Some(&endpoint) {
            tracing::info!("Session connected to {}", endpoint);
            state.endpoint = Some(endpoint);
            state.listing = FileListing::default();
            state.switched_at = self.refresh_seq.load(Ordering::Acquire);
        }
    }

    /// Adopt a freshly resolved endpoint and fetch its listing
    ///
    /// # Errors
    ///
    /// Returns the listing error; the endpoint stays adopted.
    pub async fn on_endpoint_resolved(&self, endpoint: Endpoint) -> Result<FileListing> {
        self.adopt_endpoint(endpoint).await;
        self.refresh_listing().await
    }

    /// Drop the current endpoint and listing
    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        if let Some(endpoint) = state.endpoint.take() {
            tracing::info!("Session disconnected from {}", endpoint);
        }
        state.listing = FileListing::default();
    }

    async fn capture_endpoint(&self) -> Result<Endpoint> {
        self.current_endpoint().await.ok_or(Error::NotConnected)
    }

    /// Fetch the listing and make it current
    ///
    /// If a refresh issued later has already been applied, the fetched
    /// listing is dropped and the newer current listing is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without an endpoint,
    /// [`Error::EndpointChanged`] if the endpoint was replaced while the
    /// request ran (even if it was switched back since), or the transfer
    /// error. The current listing is untouched
    /// on error.
    pub async fn refresh_listing(&self) -> Result<FileListing> {
        let endpoint = self.capture_endpoint().await?;
        self.refresh_from(&endpoint).await
    }

    async fn refresh_from(&self, endpoint: &Endpoint) -> Result<FileListing> {
        let seq = self.refresh_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let listing = self.client.list_files(endpoint).await?;

        let mut state = self.state.write().await;
        if state.endpoint.as_ref() != Some(endpoint) || seq <= state.switched_at {
            tracing::debug!("Discarding listing from {}: endpoint changed", endpoint);
            return Err(Error::EndpointChanged);
        }

        if seq < state.applied_refresh {
            tracing::debug!(
                "Discarding listing #{}: #{} already applied",
                seq,
                state.applied_refresh
            );
            return Ok(state.listing.clone());
        }

        state.applied_refresh = seq;
        state.listing = listing.clone();
        Ok(listing)
    }

    /// Upload bytes, then refresh the listing
    ///
    /// A blank `name` is replaced by `upload.bin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without an endpoint, or the upload
    /// error. A failed refresh after a successful upload is reported in
    /// [`UploadOutcome::refresh`].
    pub async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<UploadOutcome> {
        let endpoint = self.capture_endpoint().await?;
        let name = upload_name(Some(name));

        let ack = self.client.upload_file(&endpoint, &name, bytes).await?;
        let refresh = self.refresh_from(&endpoint).await;
        if let Err(e) = &refresh {
            tracing::warn!("Upload of {} succeeded but refresh failed: {}", name, e);
        }

        Ok(UploadOutcome { ack, refresh })
    }

    /// Read a local file and upload it
    ///
    /// Uses `name` when given, else the file's own name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without an endpoint,
    /// [`Error::SourceUnavailable`] if the file cannot be read, or the upload
    /// error.
    pub async fn upload_path(&self, path: &Path, name: Option<&str>) -> Result<UploadOutcome> {
        // Fail fast before reading a potentially large file
        self.capture_endpoint().await?;

        let (suggested, bytes) = read_upload_source(path).await?;
        let name = name.map_or(suggested, |n| upload_name(Some(n)));
        self.upload(&name, bytes).await
    }

    /// Download `name` into `sink`
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without an endpoint, or the transfer
    /// error.
    pub async fn download<W>(&self, name: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let endpoint = self.capture_endpoint().await?;
        self.client.download_file(&endpoint, name, sink).await
    }

    /// Download `name` into a file in `dir`
    ///
    /// Returns the path written. The file is only replaced once the whole
    /// body has arrived; on failure an existing file of that name is left
    /// as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without an endpoint,
    /// [`Error::SinkWriteFailed`] if the file cannot be written, or the
    /// transfer error.
    pub async fn download_to_dir(&self, name: &str, dir: &Path) -> Result<PathBuf> {
        let endpoint = self.capture_endpoint().await?;
        let mut sink = create_download_sink(dir, name).await?;

        match self.client.download_file(&endpoint, name, sink.file_mut()).await {
            Ok(_) => sink.commit().await,
            Err(e) => {
                sink.discard().await;
                Err(e)
            }
        }
    }

    /// Ping the current peer
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without an endpoint, or the transfer
    /// error.
    pub async fn ping(&self) -> Result<PeerStatus> {
        let endpoint = self.capture_endpoint().await?;
        self.client.ping(&endpoint).await
    }
}
