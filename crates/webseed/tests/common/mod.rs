//! Module to share types for integration tests.
//!
//! Every test runs a real [`Session`] against [`MockWebseed`]s listening on
//! the loopback, with a metainfo file written to a temporary directory.
#![allow(dead_code)]

mod mock;
pub use mock::*;

use std::{collections::BTreeMap, path::PathBuf};

use bendy::encoding::ToBencode;
use rand::{distributions::Alphanumeric, Rng};
use webseed::{
    bencode::Value, config::Config, error::Error, piece::sha1, session::Session,
};

/// Name of the file inside every test torrent.
pub const FILE_NAME: &str = "file.bin";

/// A random directory under the system temp dir, not created yet.
pub fn temp_dir() -> PathBuf {
    let name: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    std::env::temp_dir().join(name)
}

/// `AAAA...` followed by `BBBB...`, two pieces of 20 bytes.
pub fn two_pieces() -> Vec<u8> {
    let mut data = vec![b'A'; 20];
    data.extend([b'B'; 20]);
    data
}

/// Encode the metainfo of a single-file torrent for `data`.
pub fn metainfo(
    data: &[u8],
    piece_length: usize,
    urls: &[String],
) -> Result<Vec<u8>, Error> {
    let pieces: Vec<u8> = data.chunks(piece_length).flat_map(sha1).collect();

    let mut info = BTreeMap::new();
    info.insert(b"length".to_vec(), Value::Int(data.len() as i64));
    info.insert(b"name".to_vec(), Value::from(FILE_NAME));
    info.insert(b"piece length".to_vec(), Value::Int(piece_length as i64));
    info.insert(b"pieces".to_vec(), Value::Bytes(pieces));

    let urls = urls.iter().map(|u| Value::from(u.as_str())).collect();

    let mut root = BTreeMap::new();
    root.insert(b"created by".to_vec(), Value::from("webseed tests"));
    root.insert(b"info".to_vec(), Value::Dict(info));
    root.insert(b"url-list".to_vec(), Value::List(urls));

    Ok(Value::Dict(root).to_bencode()?)
}

/// Configuration with short timeouts and backoffs, downloading to a fresh
/// temp dir.
pub fn test_config() -> Config {
    Config {
        download_dir: temp_dir().to_string_lossy().into(),
        max_workers: Some(8),
        backoff_base_ms: 5,
        backoff_max_ms: 50,
        connect_timeout_ms: 1_000,
        read_timeout_ms: 1_000,
        ..Default::default()
    }
}

/// Write the metainfo of `data` and load a session for it.
///
/// Returns the session and the directory holding the metainfo, which is
/// also the download dir of `config`.
pub async fn setup_session(
    data: &[u8],
    piece_length: usize,
    urls: &[String],
    config: Config,
) -> Result<(Session, PathBuf), Error> {
    let dir = PathBuf::from(&config.download_dir);
    tokio::fs::create_dir_all(&dir).await?;

    let path = dir.join("test.torrent");
    tokio::fs::write(&path, metainfo(data, piece_length, urls)?).await?;

    let session = Session::load(&path, config).await?;

    Ok((session, dir))
}

/// Remove the directory of [`setup_session`].
pub fn cleanup(dir: PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}
