//! Minimal HTTP stub for upstream APIs
//!
//! Serves canned JSON per path prefix on an ephemeral localhost port and
//! counts requests. A hanging stub accepts connections and never answers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
struct Route {
    prefix: String,
    status: u16,
    body: String,
}

pub struct StubServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl StubServer {
    /// Answer every path with the same JSON body
    pub async fn json(status: u16, body: serde_json::Value) -> Self {
        Self::routes(vec![("/", status, body)]).await
    }

    /// Answer by longest matching path prefix; unmatched paths get 404
    pub async fn routes(routes: Vec<(&str, u16, serde_json::Value)>) -> Self {
        let mut routes: Vec<Route> = routes
            .into_iter()
            .map(|(prefix, status, body)| Route {
                prefix: prefix.to_string(),
                status,
                body: body.to_string(),
            })
            .collect();
        routes.sort_by_key(|r| std::cmp::Reverse(r.prefix.len()));
        Self::spawn(Some(Arc::new(routes))).await
    }

    /// Accept connections but never respond
    pub async fn hanging() -> Self {
        Self::spawn(None).await
    }

    async fn spawn(routes: Option<Arc<Vec<Route>>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let routes = routes.clone();
                tokio::spawn(async move {
                    match routes {
                        Some(routes) => serve(stream, &routes).await,
                        None => hold(stream).await,
                    }
                });
            }
        });

        Self { addr, hits, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Connections accepted so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, routes: &[Route]) {
    let Some(path) = read_request(&mut stream).await else {
        return;
    };

    let (status, body) = routes
        .iter()
        .find(|r| path.starts_with(&r.prefix))
        .map(|r| (r.status, r.body.clone()))
        .unwrap_or((404, r#"{"error":"not found"}"#.to_string()));

    let response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn hold(mut stream: TcpStream) {
    let _ = read_request(&mut stream).await;
    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
}

/// Read one request (headers and body) and return its path.
async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    head.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
}
