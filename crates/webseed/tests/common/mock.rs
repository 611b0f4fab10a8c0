//! Mock of an HTTP webseed.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    spawn,
    time::sleep,
};
use webseed::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer range requests with `206 Partial Content`.
    Serve,
    /// Ignore the range and answer `200 OK` with the whole file.
    IgnoreRange,
    /// Send the headers of a `206` but never the body.
    Stall,
    /// Answer the first `n` requests with corrupted bytes, then serve.
    CorruptFirst(usize),
}

/// A webseed hosting a single file on the loopback.
///
/// Every connection serves one request and is closed.
pub struct MockWebseed {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockWebseed {
    pub async fn spawn(
        data: Vec<u8>,
        behavior: Behavior,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let hits = Arc::new(AtomicUsize::new(0));
        let data = Arc::new(data);

        let counter = hits.clone();
        spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let data = data.clone();
                let counter = counter.clone();
                spawn(async move {
                    let _ = handle(socket, &data, behavior, &counter).await;
                });
            }
        });

        Ok(Self { addr, hits })
    }

    /// URL of the directory holding the file.
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// How many requests were answered.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn handle(
    socket: TcpStream,
    data: &[u8],
    behavior: Behavior,
    hits: &AtomicUsize,
) -> Result<(), Error> {
    let mut reader = BufReader::new(socket);
    let mut range = None;
    let mut line = String::new();

    // request line and headers, the body of a GET is empty
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = parse_range(value.trim());
            }
        }
    }

    let n = hits.fetch_add(1, Ordering::SeqCst);
    let mut socket = reader.into_inner();

    let Some((start, end)) = range else {
        return respond(&mut socket, "200 OK", data, None).await;
    };

    if behavior == Behavior::IgnoreRange {
        return respond(&mut socket, "200 OK", data, None).await;
    }

    let len = data.len();
    if start >= len || end < start {
        let range = Some(format!("bytes */{len}"));
        let status = "416 Range Not Satisfiable";
        return respond(&mut socket, status, &[], range).await;
    }

    let end = end.min(len - 1);
    let body = &data[start..=end];
    let content_range = Some(format!("bytes {start}-{end}/{len}"));

    match behavior {
        Behavior::Stall => {
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await?;
            socket.flush().await?;
            sleep(Duration::from_secs(30)).await;
            Ok(())
        }
        Behavior::CorruptFirst(k) if n < k => {
            let corrupt: Vec<u8> = body.iter().map(|b| b ^ 0xff).collect();
            respond(&mut socket, "206 Partial Content", &corrupt, content_range)
                .await
        }
        _ => {
            respond(&mut socket, "206 Partial Content", body, content_range)
                .await
        }
    }
}

async fn respond(
    socket: &mut TcpStream,
    status: &str,
    body: &[u8],
    content_range: Option<String>,
) -> Result<(), Error> {
    let mut head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    if let Some(range) = content_range {
        head.push_str(&format!("Content-Range: {range}\r\n"));
    }
    head.push_str("\r\n");

    socket.write_all(head.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.shutdown().await?;
    Ok(())
}

/// Parse `bytes=<start>-<end>`.
fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}
