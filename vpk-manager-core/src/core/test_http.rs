//! Loopback HTTP/1.1 server for exercising the download worker.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Body {
        body: Vec<u8>,
        content_type: String,
        disposition: Option<String>,
    },
    Status(u16),
    /// Announces `declared` bytes, sends `sent`, then keeps the socket open.
    Stall { declared: u64, sent: Vec<u8> },
}

impl Reply {
    pub(crate) fn bytes(body: &[u8]) -> Self {
        Reply::Body {
            body: body.to_vec(),
            content_type: "application/octet-stream".into(),
            disposition: None,
        }
    }

    pub(crate) fn typed(body: &[u8], content_type: &str) -> Self {
        Reply::Body {
            body: body.to_vec(),
            content_type: content_type.into(),
            disposition: None,
        }
    }

    pub(crate) fn attachment(body: &[u8], disposition: &str) -> Self {
        Reply::Body {
            body: body.to_vec(),
            content_type: "application/octet-stream".into(),
            disposition: Some(disposition.into()),
        }
    }
}

pub(crate) struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    /// The n-th request gets `replies[n]`; requests past the end repeat the
    /// last reply.
    pub(crate) async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let replies = Arc::new(replies);

        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = replies
                    .get(n)
                    .or_else(|| replies.last())
                    .cloned()
                    .unwrap_or(Reply::Status(500));
                tokio::spawn(serve(stream, reply));
            }
        });

        Self { addr, hits }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub(crate) fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let body_len = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    // Drain the request body so closing the socket does not reset it.
    while buf.len() < head_end + body_len {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(head)
}

async fn serve(mut stream: TcpStream, reply: Reply) {
    if read_request(&mut stream).await.is_none() {
        return;
    }

    match reply {
        Reply::Body {
            body,
            content_type,
            disposition,
        } => {
            let mut head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: {}\r\nConnection: close\r\n",
                body.len(),
                content_type
            );
            if let Some(d) = disposition {
                head.push_str(&format!("Content-Disposition: {}\r\n", d));
            }
            head.push_str("\r\n");
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        }
        Reply::Status(code) => {
            let head = format!(
                "HTTP/1.1 {} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                code
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        Reply::Stall { declared, sent } => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                declared
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&sent).await;
            let _ = stream.flush().await;
            std::future::pending::<()>().await;
        }
    }
}
