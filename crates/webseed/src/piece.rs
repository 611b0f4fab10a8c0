//! The state of a single piece, as seen by the driver.
//!
//! A piece is either [`PieceStatus::Verified`], with data that hashes to the
//! expected hash, [`PieceStatus::Pending`] while it still has to be
//! downloaded, or [`PieceStatus::Failed`] when its attempt budget ran out.
//! The only way to build a verified piece is to hash its data, so a pending
//! piece can never be mistaken for a verified one.
use bytes::Bytes;

use crate::{metainfo::HASH_LEN, torrent::TorrentId};

pub type Hash = [u8; HASH_LEN];

pub fn sha1(data: &[u8]) -> Hash {
    sha1_smol::Sha1::from(data).digest().bytes()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PieceStatus {
    Verified(VerifiedPiece),
    Pending(PendingPiece),
    Failed(FailedPiece),
}

#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedPiece {
    torrent: TorrentId,
    index: usize,
    hash: Hash,
    data: Bytes,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PendingPiece {
    pub torrent: TorrentId,
    pub index: usize,
    pub expected_hash: Hash,
    pub data: Option<Bytes>,
    pub actual_hash: Option<Hash>,
    /// The last attempt on this instance failed.
    pub broken: bool,
    /// Attempts made before this instance was created.
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPiece {
    pub torrent: TorrentId,
    pub index: usize,
    pub expected_hash: Hash,
    pub attempts: u32,
}

impl PieceStatus {
    pub fn index(&self) -> usize {
        match self {
            PieceStatus::Verified(p) => p.index,
            PieceStatus::Pending(p) => p.index,
            PieceStatus::Failed(p) => p.index,
        }
    }

    pub fn torrent(&self) -> TorrentId {
        match self {
            PieceStatus::Verified(p) => p.torrent,
            PieceStatus::Pending(p) => p.torrent,
            PieceStatus::Failed(p) => p.torrent,
        }
    }

    pub fn expected_hash(&self) -> Hash {
        match self {
            PieceStatus::Verified(p) => p.hash,
            PieceStatus::Pending(p) => p.expected_hash,
            PieceStatus::Failed(p) => p.expected_hash,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, PieceStatus::Verified(_))
    }

    pub fn is_broken(&self) -> bool {
        matches!(self, PieceStatus::Pending(p) if p.broken)
    }
}

impl VerifiedPiece {
    pub fn torrent(&self) -> TorrentId {
        self.torrent
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The hash of the data, which is also the expected hash.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl PendingPiece {
    /// A piece that was never attempted.
    pub fn new(torrent: TorrentId, index: usize, expected_hash: Hash) -> Self {
        Self {
            torrent,
            index,
            expected_hash,
            data: None,
            actual_hash: None,
            broken: false,
            attempts: 0,
        }
    }

    /// Only meaningful after data was hashed.
    pub fn is_complete(&self) -> bool {
        self.actual_hash == Some(self.expected_hash)
    }

    /// Hash `data` and turn this piece into a verified one if it matches,
    /// otherwise the piece is marked as broken and keeps the data for
    /// inspection.
    pub fn finish(mut self, data: Bytes) -> PieceStatus {
        let hash = sha1(&data);

        if hash == self.expected_hash {
            return PieceStatus::Verified(VerifiedPiece {
                torrent: self.torrent,
                index: self.index,
                hash,
                data,
            });
        }

        self.actual_hash = Some(hash);
        self.data = Some(data);
        self.broken = true;
        PieceStatus::Pending(self)
    }

    /// Mark the current attempt as failed without data.
    pub fn broken(mut self) -> PieceStatus {
        self.broken = true;
        PieceStatus::Pending(self)
    }

    /// A fresh instance for the next attempt, nothing from the previous
    /// attempt is carried over except the attempt counter.
    pub fn retry(&self) -> PendingPiece {
        PendingPiece {
            attempts: self.attempts + 1,
            ..PendingPiece::new(self.torrent, self.index, self.expected_hash)
        }
    }

    /// Give up on this piece.
    pub fn fail(self) -> PieceStatus {
        PieceStatus::Failed(FailedPiece {
            torrent: self.torrent,
            index: self.index,
            expected_hash: self.expected_hash,
            attempts: self.attempts + 1,
        })
    }
}

// the data is omitted, pieces can be large.
impl std::fmt::Debug for VerifiedPiece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedPiece")
            .field("torrent", &self.torrent)
            .field("index", &self.index)
            .field("hash", &hex::encode(self.hash))
            .field("len", &self.data.len())
            .finish()
    }
}

impl std::fmt::Debug for PendingPiece {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPiece")
            .field("torrent", &self.torrent)
            .field("index", &self.index)
            .field("expected_hash", &hex::encode(self.expected_hash))
            .field("actual_hash", &self.actual_hash.map(hex::encode))
            .field("len", &self.data.as_ref().map(Bytes::len))
            .field("broken", &self.broken)
            .field("attempts", &self.attempts)
            .finish()
    }
}
