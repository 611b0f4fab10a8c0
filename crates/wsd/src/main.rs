use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use webseed::{
    config::{Config, FinalPiece},
    error::Error,
    session::{Outcome, Session},
};
mod args;
use args::Args;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .without_time()
        .with_target(false)
        .with_file(false)
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    // a broken config file should not prevent a download
    let mut config = Config::load().await.unwrap_or_else(|e| {
        warn!("{e}");
        Config::default()
    });

    if let Some(download_dir) = args.download_dir {
        config.download_dir = download_dir;
    }
    if args.max_workers.is_some() {
        config.max_workers = args.max_workers;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if args.strict_final_piece {
        config.final_piece = FinalPiece::Strict;
    }

    let mut session = Session::load(&args.torrent, config).await?;

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            cancel.cancel();
        }
    });

    match session.run().await? {
        Outcome::Completed(path) => info!("downloaded {path:?}"),
        Outcome::Cancelled => info!("download cancelled"),
    }

    Ok(())
}
