//! A library to download single-file torrents from their webseeds.
//!
//! Webseeds (BEP 19) are plain HTTP or HTTPS servers hosting the file of a
//! torrent. Instead of exchanging pieces with other peers, every piece is
//! requested from a webseed with a range request and verified against its
//! SHA-1 hash from the metainfo.
//!
//! Webseeds are ranked by how fast they answered, so the fastest ones are
//! used more often. Failed pieces are downloaded again with an exponential
//! backoff, until they verify or run out of attempts.
//!
//! # Example
//!
//! ```no_run
//! use webseed::{config::Config, session::{Outcome, Session}};
//!
//! # async fn example() -> Result<(), webseed::error::Error> {
//! let config = Config::load().await?;
//! let mut session = Session::load("debian.iso.torrent", config).await?;
//!
//! // stop the download on ctrl-c
//! let cancel = session.cancel_token();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     cancel.cancel();
//! });
//!
//! if let Outcome::Completed(path) = session.run().await? {
//!     println!("downloaded {path:?}");
//! }
//! # Ok(())
//! # }
//! ```
pub mod bencode;
pub mod completion;
pub mod config;
pub mod downloader;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod pool;
pub mod session;
pub mod torrent;

/// transform bytes into a human readable format.
pub fn to_human_readable(mut n: f64) -> String {
    let units = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
    let delimiter = 1024_f64;
    if n < delimiter {
        return format!("{} {}", n, "B");
    }
    let mut u: i32 = 0;
    let r = 10_f64;
    while (n * r).round() / r >= delimiter && u < (units.len() as i32) - 1 {
        n /= delimiter;
        u += 1;
    }
    format!("{:.2} {}", n, units[u as usize])
}
