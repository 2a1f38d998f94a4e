#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, ResponseTemplate};
use zenai_core::{ChatRole, Config, MessageHandle, PresentationSink, StatusKind};

pub const DEPLOYMENT: &str = "chat";
pub const API_KEY: &str = "test-key";

pub fn config_for(uri: &str) -> Config {
    Config {
        api_endpoint: format!("{}/", uri),
        api_key: API_KEY.to_string(),
        deployment: DEPLOYMENT.to_string(),
        ..Config::default()
    }
}

pub fn delta_frame(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
    )
}

pub fn sse_body(deltas: &[&str]) -> String {
    let mut body: String = deltas.iter().map(|d| delta_frame(d)).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

pub fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

pub fn chat_completions() -> MockBuilder {
    Mock::given(method("POST"))
        .and(path(format!("/openai/deployments/{}/chat/completions", DEPLOYMENT)))
        .and(query_param("api-version", "2025-04-01-preview"))
        .and(header("api-key", API_KEY))
}

pub async fn request_messages(server: &MockServer, index: usize) -> Vec<serde_json::Value> {
    let requests = match server.received_requests().await {
        Some(reqs) => reqs,
        None => panic!("request recording disabled"),
    };
    let body: serde_json::Value = match requests[index].body_json() {
        Ok(v) => v,
        Err(e) => panic!("invalid json body: {e}"),
    };
    body["messages"].as_array().cloned().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub handle: MessageHandle,
    pub role: ChatRole,
    pub text: String,
    pub pending: bool,
}

/// Keeps what a front end would currently display.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub entries: Vec<Entry>,
    pub status: Option<(String, StatusKind)>,
    pub busy: bool,
    pub busy_changes: usize,
    next: u64,
}

impl RecordingSink {
    pub fn assistant_texts(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.role == ChatRole::Assistant)
            .map(|e| e.text.as_str())
            .collect()
    }

    fn push(&mut self, role: ChatRole, text: &str, pending: bool) -> MessageHandle {
        let handle = MessageHandle(self.next);
        self.next += 1;
        self.entries.push(Entry {
            handle,
            role,
            text: text.to_string(),
            pending,
        });
        handle
    }

    fn entry(&mut self, handle: MessageHandle) -> &mut Entry {
        match self.entries.iter_mut().find(|e| e.handle == handle) {
            Some(entry) => entry,
            None => panic!("unknown handle {:?}", handle),
        }
    }
}

impl PresentationSink for RecordingSink {
    fn append_message(&mut self, role: ChatRole, text: &str) -> MessageHandle {
        self.push(role, text, false)
    }

    fn append_pending(&mut self, role: ChatRole, text: &str) -> MessageHandle {
        self.push(role, text, true)
    }

    fn update_message(&mut self, handle: MessageHandle, text: &str) {
        self.entry(handle).text = text.to_string();
    }

    fn finish_message(&mut self, handle: MessageHandle) {
        self.entry(handle).pending = false;
    }

    fn remove_message(&mut self, handle: MessageHandle) {
        self.entries.retain(|e| e.handle != handle);
    }

    fn set_status(&mut self, text: &str, kind: StatusKind) {
        self.status = Some((text.to_string(), kind));
    }

    fn clear_status(&mut self) {
        self.status = None;
    }

    fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
        self.busy_changes += 1;
    }
}

/// Serves one streaming response that is cut off after `body` without
/// terminating the chunked encoding, so the client sees a transport error.
pub async fn spawn_truncated_server(body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(chunk(&body).as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    });

    format!("http://{}", addr)
}

/// Serves one streaming response in two parts: `head_body` right away, then
/// `tail_body` and the end of the body once `release` fires. Returns the
/// server uri and a counter of accepted connections.
pub async fn spawn_gated_server(
    head_body: String,
    tail_body: String,
    release: oneshot::Receiver<()>,
) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        counter.fetch_add(1, Ordering::SeqCst);
        read_request(&mut socket).await;

        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(chunk(&head_body).as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        let _ = release.await;
        socket.write_all(chunk(&tail_body).as_bytes()).await.unwrap();
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        socket.flush().await.unwrap();

        // Count any further connection attempts
        while let Ok((_socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    (format!("http://{}", addr), hits)
}

fn chunk(body: &str) -> String {
    format!("{:x}\r\n{}\r\n", body.len(), body)
}

async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        received.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&received).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if received.len() >= header_end + 4 + content_length {
                return;
            }
        }
    }
}
