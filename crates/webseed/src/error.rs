use std::{io, path::PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::{bencode::ParseError, piece::PieceStatus};

impl From<bendy::encoding::Error> for Error {
    fn from(_value: bendy::encoding::Error) -> Self {
        Self::BencodeEncode
    }
}

impl From<mpsc::error::SendError<PieceStatus>> for Error {
    fn from(_value: mpsc::error::SendError<PieceStatus>) -> Self {
        Self::CompletionClosed
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to decode the metainfo: {0}")]
    Bencode(#[from] ParseError),

    #[error("Failed to encode the bencode buffer")]
    BencodeEncode,

    #[error("The metainfo has a missing or invalid `{0}` field")]
    InvalidMetadata(&'static str),

    #[error("Could not find the torrent file `{0}`")]
    MissingFile(PathBuf),

    #[error("IO error")]
    IO(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("The webseed answered with status {0}, expected 206")]
    BadStatus(u16),

    #[error("The webseed took too long to answer")]
    ConnectTimeout,

    #[error("The piece took too long to arrive")]
    ReadTimeout,

    #[error("Expected {expected} bytes from the webseed but got {got}")]
    Truncated { expected: u64, got: u64 },

    #[error("The webseed `{0}` does not use http or https")]
    UnsupportedScheme(String),

    #[error("The webseed `{0}` is not a valid URL")]
    UrlInvalid(String),

    #[error("The piece {index} downloaded does not have a valid hash")]
    HashMismatch { index: usize },

    #[error(
        "Tried to assemble the file but piece {index} is not verified, \
         nothing was written"
    )]
    AssemblyInvariantViolation { index: usize },

    #[error("Expected {expected} pieces to assemble but got {got}")]
    PieceCountMismatch { expected: usize, got: usize },

    #[error("Giving up on piece {index} after {attempts} attempts")]
    PieceFailed { index: usize, attempts: u32 },

    #[error("The metainfo has no webseed to download from")]
    NoWebseeds,

    #[error("A blocking task could not complete")]
    Join(#[from] tokio::task::JoinError),

    #[error("The worker on slot {slot} crashed")]
    WorkerCrash { slot: usize },

    #[error("The completion channel is closed")]
    CompletionClosed,

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error(
        "Could not open the folder `{0}`. Please make sure the program has \
         permission to open it and that the folder exist"
    )]
    FolderOpenError(String),

    #[error(
        "Error while trying to read the configuration file, please make sure \
         it has the correct format"
    )]
    ConfigDeserializeError(#[from] toml::de::Error),

    #[error("Could not write the default configuration")]
    ConfigSerializeError(#[from] toml::ser::Error),
}
