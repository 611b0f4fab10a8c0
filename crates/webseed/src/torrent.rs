//! A torrent loaded from a metainfo file, with the operations that touch the
//! local copy of its file: verification and assembly.
use std::{
    fmt::Display,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use directories::UserDirs;
use tokio::{
    fs::{create_dir_all, rename, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, info};

use crate::{
    bencode::{self, Value},
    config::FinalPiece,
    error::Error,
    metainfo::{MetaInfo, TorrentInfo},
    piece::{PendingPiece, PieceStatus},
    to_human_readable,
};

/// Identifies a loaded torrent, generated at load time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TorrentId([u8; 16]);

impl TorrentId {
    pub fn new() -> Self {
        Self(rand::random())
    }
}

impl Display for TorrentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for TorrentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string())
    }
}

/// A single-file torrent downloaded from webseeds.
///
/// It is created once, when the metainfo is loaded, and shared read-only by
/// every downloader after that. Only `download_location` and `final_piece`
/// may change, and only before the download starts.
#[derive(Debug, Clone)]
pub struct Torrent {
    pub id: TorrentId,
    pub info: TorrentInfo,
    pub download_location: PathBuf,
    pub url_list: Option<Vec<String>>,
    pub creation_date: Option<i64>,
    pub created_by: Option<String>,
    pub comment: Option<String>,
    pub final_piece: FinalPiece,
}

/// Build a [`Torrent`] from the root of a decoded metainfo file.
pub fn parse_metadata(root: &Value) -> Result<Torrent, Error> {
    let meta = MetaInfo::from_value(root)?;
    Ok(Torrent::new(meta))
}

impl Torrent {
    pub fn new(meta: MetaInfo) -> Self {
        Self {
            id: TorrentId::new(),
            info: meta.info,
            download_location: PathBuf::from("."),
            url_list: meta.url_list,
            creation_date: meta.creation_date,
            created_by: meta.created_by,
            comment: meta.comment,
            final_piece: FinalPiece::default(),
        }
    }

    /// Read and decode the metainfo file at `path`.
    #[tracing::instrument(name = "torrent::load")]
    pub async fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }

        let buf = tokio::fs::read(path).await?;
        let root = bencode::decode(&buf)?;
        let torrent = parse_metadata(&root)?;

        info!(
            "loaded {} ({}) with {} pieces of {}",
            torrent.info.file_name(),
            to_human_readable(torrent.info.length as f64),
            torrent.info.pieces_len(),
            to_human_readable(torrent.info.piece_length as f64),
        );

        Ok(torrent)
    }

    /// Set the directory where the file is written, a leading `~` is
    /// expanded to the user's home.
    pub fn set_download_location(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();

        let home = UserDirs::new().map(|d| d.home_dir().to_path_buf());

        self.download_location = match (path.strip_prefix("~"), home) {
            (Ok(rest), Some(home)) => home.join(rest),
            _ => path.to_path_buf(),
        };
    }

    /// Where the file of this torrent lives.
    pub fn destination(&self) -> PathBuf {
        self.download_location.join(self.info.file_name())
    }

    /// A pending piece for `index`, if the index exists.
    pub fn pending_piece(&self, index: usize) -> Option<PendingPiece> {
        let hash = self.info.piece_hash(index)?;
        Some(PendingPiece::new(self.id, index, hash))
    }

    /// Inclusive byte range of piece `index` for an HTTP range request.
    pub fn piece_range(&self, index: usize) -> (u64, u64) {
        let start = self.info.piece_offset(index);
        let len = self.info.piece_len(index, self.final_piece);
        (start, start + len.saturating_sub(1))
    }

    /// Check which pieces of the local file are already valid.
    ///
    /// The returned iterator reads the file lazily, one piece at a time, and
    /// can only be consumed once. If the file does not exist, every piece is
    /// pending.
    pub fn verify_local_data(&self) -> Result<LocalPieces<'_>, Error> {
        let path = self.destination();

        let file = match File::open(&path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{path:?} does not exist, nothing to verify");
                None
            }
            Err(e) => return Err(e.into()),
        };

        Ok(LocalPieces { torrent: self, file, next: 0 })
    }

    /// Write all pieces, in order, to [`Self::destination`].
    ///
    /// Every piece must be verified, otherwise nothing is written. The file
    /// is written next to the destination and renamed into place at the
    /// end.
    #[tracing::instrument(skip_all, name = "torrent::assemble")]
    pub async fn assemble(
        &self,
        mut pieces: Vec<PieceStatus>,
    ) -> Result<PathBuf, Error> {
        let expected = self.info.pieces_len();

        if pieces.len() != expected {
            return Err(Error::PieceCountMismatch {
                expected,
                got: pieces.len(),
            });
        }

        pieces.sort_by_key(PieceStatus::index);

        let mut verified = Vec::with_capacity(pieces.len());

        for (i, piece) in pieces.into_iter().enumerate() {
            match piece {
                PieceStatus::Verified(p)
                    if p.index() == i && p.torrent() == self.id =>
                {
                    verified.push(p.into_data());
                }
                _ => return Err(Error::AssemblyInvariantViolation { index: i }),
            }
        }

        create_dir_all(&self.download_location).await?;

        let destination = self.destination();
        let mut part = destination.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part)
            .await?;

        let mut writer = BufWriter::new(file);

        for data in &verified {
            writer.write_all(data).await?;
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        rename(&part, &destination).await?;

        info!("assembled {destination:?}");

        Ok(destination)
    }
}

/// Lazy verification of the local file, see [`Torrent::verify_local_data`].
pub struct LocalPieces<'a> {
    torrent: &'a Torrent,
    file: Option<BufReader<File>>,
    next: usize,
}

impl Iterator for LocalPieces<'_> {
    type Item = Result<PieceStatus, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next;
        if index >= self.torrent.info.pieces_len() {
            return None;
        }
        let pending = self.torrent.pending_piece(index)?;
        self.next += 1;

        let Some(file) = &mut self.file else {
            return Some(Ok(PieceStatus::Pending(pending)));
        };

        let len = self.torrent.info.piece_len(index, self.torrent.final_piece);
        let mut buf = Vec::with_capacity(len as usize);

        if let Err(e) = file.by_ref().take(len).read_to_end(&mut buf) {
            // stop at the first IO error
            self.next = self.torrent.info.pieces_len();
            return Some(Err(e.into()));
        }

        // a short read can only mean the file is incomplete
        if buf.len() as u64 != len {
            return Some(Ok(PieceStatus::Pending(pending)));
        }

        // a local mismatch is not a failed download attempt
        let status = match pending.finish(Bytes::from(buf)) {
            PieceStatus::Pending(mut p) => {
                p.broken = false;
                p.data = None;
                PieceStatus::Pending(p)
            }
            status => status,
        };

        Some(Ok(status))
    }
}
