use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use tokio::{
    fs::{create_dir_all, OpenOptions},
    io::AsyncReadExt,
};

use crate::error::Error;

/// How the last piece is handled when the file length is not a multiple of
/// the piece length.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FinalPiece {
    /// The last piece only spans the bytes left in the file.
    #[default]
    Trimmed,
    /// Every piece spans `piece length` bytes, a shorter body is a failed
    /// attempt. A file that is not aligned can never complete.
    Strict,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub download_dir: String,
    /// Upper bound of concurrent downloads, the file descriptor limit of the
    /// process is always respected.
    pub max_workers: Option<usize>,
    /// Attempts per piece before giving up, `0` retries forever.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub claim_stall_warn_ms: u64,
    pub final_piece: FinalPiece,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let download_dir = UserDirs::new()
            .and_then(|d| d.download_dir().map(|p| p.to_string_lossy().into()))
            .unwrap_or_else(|| ".".to_owned());

        Self {
            download_dir,
            max_workers: None,
            max_attempts: 10,
            backoff_base_ms: 50,
            backoff_max_ms: 5_000,
            connect_timeout_ms: 2_000,
            read_timeout_ms: 2_000,
            claim_stall_warn_ms: 5_000,
            final_piece: FinalPiece::default(),
            user_agent: concat!("webseed/", env!("CARGO_PKG_VERSION"))
                .to_owned(),
        }
    }
}

impl Config {
    /// The attempt budget of a piece, `None` if unbounded.
    pub fn attempt_budget(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn claim_stall_warn(&self) -> Duration {
        Duration::from_millis(self.claim_stall_warn_ms)
    }

    /// How long to wait before the attempt number `attempt`, the first
    /// attempt does not wait.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let ms = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(ms.min(self.backoff_max_ms))
    }

    /// Returns the path of the configuration file.
    ///
    /// If it doesn't exist, or if it is not a valid configuration, the
    /// default configuration is written to it.
    ///
    /// # Errors
    ///
    /// This fn can fail if the program does not have access to the user's
    /// config folder.
    pub async fn config_file() -> Result<PathBuf, Error> {
        // errors if the user does not have a home folder
        let dotfile =
            ProjectDirs::from("", "", "webseed").ok_or(Error::HomeInvalid)?;
        let mut config_path = dotfile.config_dir().to_path_buf();

        if !config_path.exists() {
            create_dir_all(&config_path).await.map_err(|_| {
                Error::FolderOpenError(config_path.to_string_lossy().into())
            })?;
        }

        config_path.push("config.toml");

        let mut config_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config_path)
            .await?;

        let mut dst = String::new();
        config_file.read_to_string(&mut dst).await?;

        // empty or invalid files are replaced by the defaults
        if toml::from_str::<Config>(&dst).is_err() {
            let config_str = toml::to_string(&Config::default())?;
            tokio::fs::write(&config_path, config_str).await?;
        }

        Ok(config_path)
    }

    /// Load the configuration file and transform it into Self.
    /// If the file does not exist, it tries to create the file
    /// with the default configurations.
    pub async fn load() -> Result<Self, Error> {
        let path = Self::config_file().await?;
        let config_str = tokio::fs::read_to_string(path).await?;
        Self::parse(&config_str)
    }

    /// Parse a configuration, missing keys take their default value.
    pub fn parse(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str::<Config>(s)?)
    }
}
