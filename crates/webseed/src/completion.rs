//! Handoff of finished pieces from the downloaders to the session.
//!
//! Any number of downloaders put pieces on the channel, and any number of
//! clones of the receiver can take them out. `put` never blocks.
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::{error::Error, piece::PieceStatus};

pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        rx: Mutex::new(rx),
        ready: Notify::new(),
        closed: CancellationToken::new(),
    });
    let sender = CompletionSender { tx, shared: shared.clone() };
    (sender, CompletionReceiver(shared))
}

/// The receiving half is only locked to take a piece that is already there,
/// never while waiting for one.
#[derive(Debug)]
struct Shared {
    rx: Mutex<mpsc::UnboundedReceiver<PieceStatus>>,
    ready: Notify,
    closed: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<PieceStatus>,
    shared: Arc<Shared>,
}

impl CompletionSender {
    /// Publish a finished piece.
    ///
    /// # Errors
    ///
    /// If the channel was closed.
    pub fn put(&self, piece: PieceStatus) -> Result<(), Error> {
        self.tx.send(piece)?;
        self.shared.ready.notify_waiters();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CompletionReceiver(Arc<Shared>);

impl CompletionReceiver {
    /// Wait for the next piece.
    ///
    /// Returns `None` once the channel is closed and every piece that was
    /// already published has been taken.
    pub async fn get(&self) -> Option<PieceStatus> {
        loop {
            // registered before looking, a put in between still wakes us
            let ready = self.0.ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            match self.take() {
                Ok(piece) => return Some(piece),
                Err(mpsc::error::TryRecvError::Disconnected) => return None,
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            if self.0.closed.is_cancelled() {
                return None;
            }

            tokio::select! {
                _ = ready => {}
                _ = self.0.closed.cancelled() => {}
            }
        }
    }

    /// Take a piece if one is ready, without waiting.
    pub fn try_get(&self) -> Option<PieceStatus> {
        self.take().ok()
    }

    /// Stop accepting pieces, the ones already published can still be
    /// taken. Every waiting [`get`](Self::get) wakes up.
    pub fn close(&self) {
        if let Ok(mut rx) = self.0.rx.lock() {
            rx.close();
        }
        self.0.closed.cancel();
    }

    fn take(&self) -> Result<PieceStatus, mpsc::error::TryRecvError> {
        self.0
            .rx
            .lock()
            .map_err(|_| mpsc::error::TryRecvError::Disconnected)?
            .try_recv()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{piece::PendingPiece, torrent::TorrentId};

    fn piece(index: usize) -> PieceStatus {
        PieceStatus::Pending(PendingPiece::new(
            TorrentId::default(),
            index,
            [0; 20],
        ))
    }

    #[tokio::test]
    async fn many_producers_many_consumers() {
        let (tx, rx) = completion_channel();

        let producers: Vec<_> = (0..8)
            .map(|i| {
                let tx = tx.clone();
                tokio::spawn(async move { tx.put(piece(i)) })
            })
            .collect();

        for p in producers {
            p.await.unwrap().unwrap();
        }

        let other = rx.clone();
        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(rx.get().await.unwrap().index());
            got.push(other.get().await.unwrap().index());
        }
        got.sort();

        assert_eq!(got, (0..8).collect::<Vec<_>>());
        assert!(rx.try_get().is_none());
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let (tx, rx) = completion_channel();
        tx.put(piece(1)).unwrap();

        rx.close();

        assert!(matches!(tx.put(piece(2)), Err(Error::CompletionClosed)));
        assert_eq!(rx.get().await.map(|p| p.index()), Some(1));
        assert!(rx.get().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_a_waiting_clone() {
        let (tx, rx) = completion_channel();
        let waiter = rx.clone();
        let waiting = tokio::spawn(async move { waiter.get().await });

        // let the clone park in `get`
        tokio::time::sleep(Duration::from_millis(50)).await;

        rx.close();

        let got = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
        assert!(tx.put(piece(3)).is_err());
    }

    #[tokio::test]
    async fn try_get_while_a_clone_waits() {
        let (tx, rx) = completion_channel();
        let waiter = rx.clone();
        let waiting = tokio::spawn(async move { waiter.get().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.put(piece(1)).unwrap();
        tx.put(piece(2)).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        let second = rx.try_get();

        let mut got: Vec<_> =
            first.into_iter().chain(second).map(|p| p.index()).collect();
        got.sort();
        assert_eq!(got, vec![1, 2]);
    }
}
