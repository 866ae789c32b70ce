//! Test support: a scripted HTTP/1.1 server and polling helpers.
//!
//! wiremock answers with whole bodies, so mid-body stalls and disconnects are
//! served from a raw `TcpListener` instead. Each accepted connection consumes
//! the next `Reply` of the script.

#![allow(dead_code)]

use grabit_core::{DownloadController, Settings};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Deterministic, non-repeating-looking body of `len` bytes
pub fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Settings tuned for tests: every chunk emits progress, stalls fail fast
pub fn test_settings() -> Settings {
    Settings {
        progress_interval_ms: 0,
        read_timeout_secs: 10,
        connect_timeout_secs: 5,
        ..Settings::default()
    }
}

/// Poll until the download has written `bytes` bytes
pub async fn wait_for_bytes(download: &DownloadController, bytes: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while download.snapshot().bytes_transferred < bytes {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {} bytes, have {}",
            bytes,
            download.snapshot().bytes_transferred
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Request line and headers as seen by the server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// One scripted response
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    send_length: bool,
    stall_after: Option<usize>,
    close_after: Option<usize>,
    silent: bool,
}

impl Reply {
    pub fn ok(body: &[u8]) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.to_vec(),
            send_length: true,
            stall_after: None,
            close_after: None,
            silent: false,
        }
    }

    /// `206` carrying `body[offset..]` with a matching Content-Range
    pub fn partial(body: &[u8], offset: usize) -> Self {
        let content_range = format!("bytes {}-{}/{}", offset, body.len() - 1, body.len());
        Self {
            status: 206,
            headers: vec![("Content-Range".to_string(), content_range)],
            body: body[offset..].to_vec(),
            send_length: true,
            stall_after: None,
            close_after: None,
            silent: false,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            send_length: true,
            stall_after: None,
            close_after: None,
            silent: false,
        }
    }

    /// Read the request, then never answer until the client leaves
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::status(200)
        }
    }

    /// Append bytes the announced range does not cover
    pub fn with_trailing(mut self, extra: &[u8]) -> Self {
        self.body.extend_from_slice(extra);
        self
    }

    /// Omit Content-Length and end the body by closing the connection
    pub fn without_length(mut self) -> Self {
        self.send_length = false;
        self
    }

    /// Send `n` body bytes, then hold the connection open until the client leaves
    pub fn stall_after(mut self, n: usize) -> Self {
        self.stall_after = Some(n);
        self
    }

    /// Send `n` body bytes, then drop the connection
    pub fn close_after(mut self, n: usize) -> Self {
        self.close_after = Some(n);
        self
    }
}

pub struct ScriptedServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    hangups: Arc<AtomicUsize>,
    _task: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(replies)));

        let hangups = Arc::new(AtomicUsize::new(0));

        let recorded = requests.clone();
        let seen_hangups = hangups.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let script = script.clone();
                let seen_hangups = seen_hangups.clone();
                tokio::spawn(async move {
                    serve_connection(socket, recorded, script, seen_hangups).await;
                });
            }
        });

        Self {
            addr,
            requests,
            hangups,
            _task: task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Stalled or silent connections the client closed
    pub fn hangups(&self) -> usize {
        self.hangups.load(Ordering::SeqCst)
    }

    /// Poll until the client closed `count` held connections
    pub async fn wait_for_hangups(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.hangups() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {} hangups, saw {}",
                count,
                self.hangups()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    hangups: Arc<AtomicUsize>,
) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    recorded.lock().unwrap().push(request);

    let Some(reply) = script.lock().unwrap().pop_front() else {
        return;
    };

    if reply.silent {
        hold_until_hangup(&mut socket, &hangups).await;
        return;
    }

    let mut head = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
    if reply.send_length {
        head.push_str(&format!("Content-Length: {}\r\n", reply.body.len()));
    }
    for (name, value) in &reply.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("Connection: close\r\n\r\n");

    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    let cut = reply
        .stall_after
        .or(reply.close_after)
        .unwrap_or(reply.body.len())
        .min(reply.body.len());
    if socket.write_all(&reply.body[..cut]).await.is_err() {
        return;
    }
    let _ = socket.flush().await;

    if reply.stall_after.is_some() {
        hold_until_hangup(&mut socket, &hangups).await;
        return;
    }

    if reply.close_after.is_none() {
        let _ = socket.write_all(&reply.body[cut..]).await;
        let _ = socket.flush().await;
    }
    let _ = socket.shutdown().await;
}

async fn hold_until_hangup(socket: &mut TcpStream, hangups: &AtomicUsize) {
    let mut buf = [0u8; 64];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    hangups.fetch_add(1, Ordering::SeqCst);
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Some(RecordedRequest {
        method,
        path,
        headers,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        _ => "Status",
    }
}
