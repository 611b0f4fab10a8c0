use std::{fmt::Display, time::Duration};

use reqwest::Url;

use crate::error::Error;

/// A webseed endpoint.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Peer {
    pub url: String,
}

impl Peer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The URL to request pieces from.
    ///
    /// A webseed whose path ends with `/` points to a directory, the name of
    /// the file is appended to it.
    ///
    /// # Errors
    ///
    /// If the URL is invalid or does not use `http` or `https`.
    pub fn target(&self, file_name: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&self.url)
            .map_err(|_| Error::UrlInvalid(self.url.clone()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::UnsupportedScheme(self.url.clone()));
        }

        if url.path().ends_with('/') {
            let name = urlencoding::encode(file_name);
            let path = format!("{}{name}", url.path());
            url.set_path(&path);
        }

        Ok(url)
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Measured latencies of a peer, lower is better.
///
/// Used to rank peers, not to identify them. The ordering compares
/// `chunk_speed` first, so iterating over sorted priorities visits the
/// fastest downloads first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Priority {
    chunk_speed: Duration,
    connectivity: Duration,
}

impl Priority {
    pub fn new(connectivity: Duration, chunk_speed: Duration) -> Self {
        Self { chunk_speed, connectivity }
    }

    /// How long it took to connect and receive the response headers.
    pub fn connectivity(&self) -> Duration {
        self.connectivity
    }

    /// How long it took to read a piece.
    pub fn chunk_speed(&self) -> Duration {
        self.chunk_speed
    }
}

/// Peers that were never measured start at one second for both latencies.
impl Default for Priority {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(1))
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "connectivity={:?} chunk_speed={:?}",
            self.connectivity, self.chunk_speed
        )
    }
}
