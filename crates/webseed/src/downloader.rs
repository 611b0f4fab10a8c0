//! Download of a single piece from the fastest available webseed.
use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rand::Rng;
use reqwest::{header::RANGE, Client, StatusCode};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::{
    completion::CompletionSender,
    config::Config,
    error::Error,
    peer::{Peer, PeerRegistry, Priority},
    piece::{PendingPiece, PieceStatus},
    torrent::Torrent,
};

/// Everything a downloader needs, shared by all of them.
#[derive(Debug)]
pub struct DownloadCtx {
    pub torrent: Arc<Torrent>,
    pub registry: PeerRegistry,
    pub client: Client,
    pub config: Config,
    pub completions: CompletionSender,
}

impl DownloadCtx {
    /// The registry is filled with the webseeds of `torrent`.
    pub fn new(
        torrent: Arc<Torrent>,
        config: Config,
        completions: CompletionSender,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .build()?;

        let registry =
            PeerRegistry::new(torrent.url_list.iter().flatten().cloned());

        Ok(Self { torrent, registry, client, config, completions })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    Claiming,
    Connecting,
    Downloading,
    Verified,
    Broken,
}

/// Downloads one piece, one time.
///
/// The outcome is always published on the completion channel, a failed
/// attempt is a broken [`PieceStatus::Pending`], never an error. Trying
/// again is up to whoever reads the channel.
pub struct ChunkDownloader {
    ctx: Arc<DownloadCtx>,
    piece: PendingPiece,
    state: DownloadState,
}

impl ChunkDownloader {
    pub fn new(ctx: Arc<DownloadCtx>, piece: PendingPiece) -> Self {
        Self { ctx, piece, state: DownloadState::Pending }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Run the attempt and publish its outcome.
    ///
    /// # Errors
    ///
    /// Only if the completion channel is closed.
    #[tracing::instrument(name = "downloader", skip_all,
        fields(piece = self.piece.index, attempt = self.piece.attempts)
    )]
    pub async fn run(mut self) -> Result<(), Error> {
        let backoff = self.ctx.config.backoff(self.piece.attempts);
        if !backoff.is_zero() {
            sleep(backoff).await;
        }

        let status = self.attempt().await;
        self.ctx.completions.put(status)?;

        Ok(())
    }

    /// Claim a peer, download the piece from it and give the peer back.
    pub async fn attempt(&mut self) -> PieceStatus {
        self.state = DownloadState::Claiming;
        let (priority, peer) = self.claim().await;
        debug!("claimed {peer} with {priority}");

        let status = match self.fetch(&peer).await {
            Ok((measured, data)) => {
                match self.piece.clone().finish(data) {
                    status @ PieceStatus::Verified(_) => {
                        self.ctx
                            .registry
                            .report_outcome(priority, measured, peer)
                            .await;
                        status
                    }
                    status => {
                        let index = self.piece.index;
                        warn!("{peer}: {}", Error::HashMismatch { index });
                        self.ctx.registry.release(priority, peer).await;
                        status
                    }
                }
            }
            Err(e) => {
                warn!("{peer}: {e}");
                self.ctx.registry.release(priority, peer).await;
                self.piece.clone().broken()
            }
        };

        self.state = if status.is_verified() {
            DownloadState::Verified
        } else {
            DownloadState::Broken
        };

        status
    }

    /// Wait until a peer is available.
    async fn claim(&self) -> (Priority, Peer) {
        let begin = Instant::now();
        let mut warned = false;

        loop {
            if let Some(claimed) = self.ctx.registry.claim_fastest().await {
                return claimed;
            }

            if !warned && begin.elapsed() > self.ctx.config.claim_stall_warn() {
                warn!("no webseed available for {:?}", begin.elapsed());
                warned = true;
            }

            let ms = rand::thread_rng().gen_range(1..=10);
            sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Request the range of the piece and read the whole body.
    async fn fetch(&mut self, peer: &Peer) -> Result<(Priority, Bytes), Error> {
        let torrent = &self.ctx.torrent;
        let config = &self.ctx.config;

        let url = peer.target(&torrent.info.file_name())?;
        let (start, end) = torrent.piece_range(self.piece.index);
        let expected = end - start + 1;

        self.state = DownloadState::Connecting;
        debug!("GET {url} bytes={start}-{end}");

        let begin = Instant::now();
        let request = self
            .ctx
            .client
            .get(url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .send();

        let response = timeout(config.connect_timeout(), request)
            .await
            .map_err(|_| Error::ConnectTimeout)??;
        let connectivity = begin.elapsed();

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(Error::BadStatus(response.status().as_u16()));
        }

        self.state = DownloadState::Downloading;

        let begin = Instant::now();
        let data = timeout(config.read_timeout(), response.bytes())
            .await
            .map_err(|_| Error::ReadTimeout)??;
        let chunk_speed = begin.elapsed();

        let got = data.len() as u64;
        if got != expected {
            return Err(Error::Truncated { expected, got });
        }

        debug!("downloaded in {chunk_speed:?}, connected in {connectivity:?}");

        Ok((Priority::new(connectivity, chunk_speed), data))
    }
}
