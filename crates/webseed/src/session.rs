//! The download of one torrent, from loading its metainfo to writing its
//! file.
//!
//! A [`Session`] owns everything the download needs. Downloaders only share
//! the [`DownloadCtx`], and report back through the completion channel.
//! The session decides what is downloaded next and when the file is
//! complete.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bitvec::{bitvec, order::Msb0, vec::BitVec};
use hashbrown::HashMap;
use tokio::{select, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    completion::{completion_channel, CompletionReceiver},
    config::Config,
    downloader::{ChunkDownloader, DownloadCtx},
    error::Error,
    piece::{PendingPiece, PieceStatus},
    pool::{max_workers, WorkerPool},
    torrent::{LocalPieces, Torrent},
};

/// How often the pool is polled for room.
pub const SCHEDULE_TICK: Duration = Duration::from_millis(100);

/// How often progress is logged.
const PROGRESS_TICK: Duration = Duration::from_secs(1);

/// How a [`Session::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every piece is verified and the file is at this path.
    Completed(PathBuf),
    /// The cancel token was triggered before the file was complete.
    Cancelled,
}

pub struct Session {
    ctx: Arc<DownloadCtx>,
    pool: WorkerPool,
    completions: CompletionReceiver,
    /// Piece downloaded by each slot of the pool.
    in_flight: HashMap<usize, PendingPiece>,
    verified: BitVec<u8, Msb0>,
}

impl Session {
    /// Load the metainfo at `path` and prepare its download.
    ///
    /// # Errors
    ///
    /// If the file does not exist or is not a valid single-file torrent.
    pub async fn load(
        path: impl AsRef<Path>,
        config: Config,
    ) -> Result<Self, Error> {
        let torrent = Torrent::load(path.as_ref()).await?;
        Self::new(torrent, config)
    }

    /// Prepare the download of `torrent`, the download location and final
    /// piece policy are taken from `config`.
    pub fn new(mut torrent: Torrent, config: Config) -> Result<Self, Error> {
        torrent.set_download_location(&config.download_dir);
        torrent.final_piece = config.final_piece;

        let limit = max_workers();
        let capacity = config.max_workers.map_or(limit, |cap| cap.min(limit));
        let pieces = torrent.info.pieces_len();

        let (tx, rx) = completion_channel();
        let ctx = DownloadCtx::new(Arc::new(torrent), config, tx)?;

        debug!("pool capacity is {capacity}");

        Ok(Self {
            ctx: Arc::new(ctx),
            pool: WorkerPool::new(capacity),
            completions: rx,
            in_flight: HashMap::new(),
            verified: bitvec![u8, Msb0; 0; pieces],
        })
    }

    pub fn torrent(&self) -> &Arc<Torrent> {
        &self.ctx.torrent
    }

    pub fn ctx(&self) -> &Arc<DownloadCtx> {
        &self.ctx
    }

    /// Triggering the token makes [`Session::run`] shut down and return
    /// [`Outcome::Cancelled`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.pool.cancel_token()
    }

    /// Pieces verified so far.
    pub fn verified(&self) -> &BitVec<u8, Msb0> {
        &self.verified
    }

    /// Check the local copy of the file, see [`Torrent::verify_local_data`].
    pub fn verify_local_data(&self) -> Result<LocalPieces<'_>, Error> {
        self.ctx.torrent.verify_local_data()
    }

    /// Queue a download of `piece`, it starts when the pool has room.
    pub fn submit_for_download(&mut self, piece: PendingPiece) -> usize {
        let index = piece.index;
        let downloader = ChunkDownloader::new(self.ctx.clone(), piece.clone());

        let slot = self.pool.enqueue(async move {
            if let Err(e) = downloader.run().await {
                debug!("piece {index} was dropped: {e}");
            }
        });

        self.in_flight.insert(slot, piece);
        slot
    }

    /// Start queued downloads while the pool has room.
    ///
    /// The piece of a crashed worker is completed as a broken attempt, so it
    /// is retried within the same attempt budget as any other.
    ///
    /// Returns how many downloads are running.
    pub fn schedule(&mut self) -> usize {
        let mut status = self.pool.poll();

        for slot in std::mem::take(&mut status.crashed) {
            if let Some(piece) = self.in_flight.remove(&slot) {
                warn!("worker of piece {} crashed", piece.index);
                if let Err(e) = self.ctx.completions.put(piece.broken()) {
                    debug!("crashed piece was dropped: {e}");
                }
            }
        }

        loop {
            match status.next_queued {
                Some(slot) if self.pool.has_room(&status) => {
                    self.pool.admit_next(slot);
                    status = self.pool.poll();
                }
                _ => return status.running,
            }
        }
    }

    /// Wait for the next finished download.
    ///
    /// Returns `None` once the session was shut down and every finished
    /// download was taken.
    pub async fn poll_completed(&mut self) -> Option<PieceStatus> {
        let status = self.completions.get().await?;
        let index = status.index();

        self.in_flight.retain(|_, p| p.index != index);

        if status.is_verified() && index < self.verified.len() {
            self.verified.set(index, true);
        }

        Some(status)
    }

    /// Write the file, see [`Torrent::assemble`].
    pub async fn assemble(
        &self,
        pieces: Vec<PieceStatus>,
    ) -> Result<PathBuf, Error> {
        self.ctx.torrent.assemble(pieces).await
    }

    /// Stop every download and close the completion channel.
    pub async fn shutdown(&mut self) {
        self.pool.shutdown();
        self.completions.close();
        self.in_flight.clear();
    }

    /// Download every piece that is not valid locally and write the file.
    ///
    /// Broken pieces are downloaded again until they verify or run out of
    /// attempts.
    ///
    /// # Errors
    ///
    /// - [`Error::NoWebseeds`] if pieces are missing and the torrent has no
    ///   webseed.
    /// - [`Error::PieceFailed`] if a piece ran out of attempts, the session
    ///   is shut down first.
    /// - Any IO error while reading the local copy or writing the file.
    #[tracing::instrument(name = "session", skip_all,
        fields(torrent = %self.ctx.torrent.id)
    )]
    pub async fn run(&mut self) -> Result<Outcome, Error> {
        let cancel = self.cancel_token();

        let torrent = self.ctx.torrent.clone();
        let mut pieces = tokio::task::spawn_blocking(move || {
            torrent.verify_local_data()?.collect::<Result<Vec<_>, _>>()
        })
        .await??;

        for piece in pieces.iter().filter(|p| p.is_verified()) {
            self.verified.set(piece.index(), true);
        }

        let total = pieces.len();
        info!("{}/{total} pieces valid locally", self.verified.count_ones());

        // an empty file has nothing to verify
        if total == 0 {
            self.shutdown().await;
            let path = self.ctx.torrent.assemble(pieces).await?;
            return Ok(Outcome::Completed(path));
        }

        if self.verified.all() {
            self.shutdown().await;
            return Ok(Outcome::Completed(self.ctx.torrent.destination()));
        }

        if self.ctx.registry.available().await == 0 {
            return Err(Error::NoWebseeds);
        }

        for piece in &pieces {
            if piece.is_verified() {
                continue;
            }
            if let Some(fresh) = self.ctx.torrent.pending_piece(piece.index()) {
                self.submit_for_download(fresh);
            }
        }

        let mut schedule_interval = interval(SCHEDULE_TICK);
        let mut progress_interval = interval(PROGRESS_TICK);
        let mut reported = self.verified.count_ones();

        while !self.verified.all() {
            select! {
                _ = cancel.cancelled() => {
                    info!("download cancelled");
                    self.shutdown().await;
                    return Ok(Outcome::Cancelled);
                }
                _ = schedule_interval.tick() => {
                    self.schedule();
                }
                _ = progress_interval.tick() => {
                    let done = self.verified.count_ones();
                    if done != reported {
                        info!("{done}/{total} pieces verified");
                        reported = done;
                    }
                }
                status = self.poll_completed() => {
                    let Some(status) = status else {
                        return Err(Error::CompletionClosed);
                    };
                    if let Err(e) = self.settle(status, &mut pieces) {
                        self.shutdown().await;
                        return Err(e);
                    }
                    self.schedule();
                }
            }
        }

        self.shutdown().await;
        info!("{total}/{total} pieces verified");

        let path = self.ctx.torrent.assemble(pieces).await?;

        Ok(Outcome::Completed(path))
    }

    /// Put a finished download in place of its piece, and queue it again if
    /// it is broken.
    fn settle(
        &mut self,
        status: PieceStatus,
        pieces: &mut [PieceStatus],
    ) -> Result<(), Error> {
        let index = status.index();

        let status = match status {
            PieceStatus::Pending(p) if p.broken => {
                let attempts = p.attempts + 1;
                match self.ctx.config.attempt_budget() {
                    Some(budget) if attempts >= budget => p.fail(),
                    _ => {
                        debug!("piece {index} broken, attempt {attempts}");
                        self.submit_for_download(p.retry());
                        PieceStatus::Pending(p)
                    }
                }
            }
            status => status,
        };

        if let PieceStatus::Failed(f) = &status {
            return Err(Error::PieceFailed { index, attempts: f.attempts });
        }

        if let Some(slot) = pieces.get_mut(index) {
            *slot = status;
        }

        Ok(())
    }
}
