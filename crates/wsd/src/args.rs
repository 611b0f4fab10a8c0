use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[clap(name = "wsd", about = "Download a torrent from its webseeds")]
#[command(author, version, long_about = None)]
pub(crate) struct Args {
    /// Path of the `.torrent` file to download.
    pub torrent: PathBuf,

    /// The directory in which the file will be downloaded
    #[clap(short, long)]
    pub download_dir: Option<String>,

    /// Maximum number of pieces downloaded at the same time.
    #[clap(short, long)]
    pub max_workers: Option<usize>,

    /// Attempts per piece before giving up, 0 retries forever.
    #[clap(short = 'a', long)]
    pub max_attempts: Option<u32>,

    /// Request and verify the final piece with the full piece length.
    #[clap(long)]
    pub strict_final_piece: bool,

    /// Log every attempt.
    #[clap(short, long)]
    pub verbose: bool,
}
