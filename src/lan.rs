// src/lan.rs

//! LAN Exchange Endpoint (C9): a small HTTP/1.1 server hand-parsed over a
//! raw TCP stream, deliberately without a web framework (§4.8).
//!
//! The endpoint is generic over [`LanBackend`] so it can be driven by the
//! real engine or, in tests, a stub — mirroring the "store capability"
//! abstraction called for in the design notes (§9).

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

const MAX_HEADER_BYTES: usize = 256 * 1024;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub imported: i64,
    pub skipped: i64,
    pub conflicts: i64,
}

/// What the LAN endpoint needs from the engine: identity for `ping`, and
/// the export/import operations for the other two verbs.
#[async_trait]
pub trait LanBackend: Send + Sync {
    fn instance_id(&self) -> String;
    fn instance_kind(&self) -> String;
    async fn export_package_bytes(&self, mode: ExportMode, remote_instance_id: &str) -> Result<Vec<u8>>;
    async fn import_package_bytes(&self, bytes: &[u8]) -> Result<ImportSummary>;
}

pub struct LanServer {
    backend: Arc<dyn LanBackend>,
    shared_key: Option<String>,
}

impl LanServer {
    pub fn new(backend: Arc<dyn LanBackend>, shared_key: Option<String>) -> Self {
        Self { backend, shared_key }
    }

    /// Bind and serve until `shutdown` resolves. Each connection is handled
    /// on its own task; a per-connection failure is logged and does not
    /// affect other connections (§4.8 Limits).
    pub async fn serve(self, port: u16, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| Error::Transport(format!("failed to bind LAN port {port}: {e}")))?;
        info!(port, "LAN exchange endpoint listening");

        let backend = self.backend;
        let shared_key = Arc::new(self.shared_key);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("LAN endpoint shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "failed to accept LAN connection");
                            continue;
                        }
                    };
                    let backend = Arc::clone(&backend);
                    let shared_key = Arc::clone(&shared_key);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, backend, shared_key).await {
                            warn!(%peer, error = %e, "LAN connection failed");
                        }
                    });
                }
            }
        }
    }
}

struct ParsedRequest {
    method: String,
    path: String,
    query: std::collections::HashMap<String, String>,
    headers: std::collections::HashMap<String, String>,
    content_length: usize,
}

async fn handle_connection(mut stream: TcpStream, backend: Arc<dyn LanBackend>, shared_key: Arc<Option<String>>) -> Result<()> {
    stream.set_nodelay(true).ok();

    let request = tokio::time::timeout(SOCKET_TIMEOUT, read_request_head(&mut stream))
        .await
        .map_err(|_| Error::Transport("timed out reading request headers".into()))??;

    let body = if request.content_length > 0 {
        tokio::time::timeout(SOCKET_TIMEOUT, read_exact_body(&mut stream, request.content_length))
            .await
            .map_err(|_| Error::Transport("timed out reading request body".into()))??
    } else {
        Vec::new()
    };

    if let Some(key) = shared_key.as_ref() {
        let provided = request.headers.get("x-lan-key");
        if provided != Some(key) {
            write_json(&mut stream, 401, &serde_json::json!({ "error": "unauthorized" })).await?;
            return Ok(());
        }
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/lan/ping") => {
            write_json(
                &mut stream,
                200,
                &serde_json::json!({
                    "ok": true,
                    "instanceId": backend.instance_id(),
                    "instanceKind": backend.instance_kind(),
                }),
            )
            .await
        }
        ("GET", "/lan/export") => handle_export(&mut stream, backend.as_ref(), &request.query).await,
        ("POST", "/lan/import") => handle_import(&mut stream, backend.as_ref(), &body).await,
        _ => write_json(&mut stream, 404, &serde_json::json!({ "error": "not found" })).await,
    }
}

async fn handle_export(
    stream: &mut TcpStream,
    backend: &dyn LanBackend,
    query: &std::collections::HashMap<String, String>,
) -> Result<()> {
    let Some(remote_instance_id) = query.get("remoteInstanceId") else {
        return write_json(stream, 400, &serde_json::json!({ "error": "missing remoteInstanceId" })).await;
    };

    let mode = match query.get("mode").map(|s| s.as_str()) {
        Some("incremental") => ExportMode::Incremental,
        _ => ExportMode::Full,
    };

    match backend.export_package_bytes(mode, remote_instance_id).await {
        Ok(bytes) => write_zip(stream, &bytes).await,
        Err(e) => write_json(stream, 500, &serde_json::json!({ "error": e.to_string() })).await,
    }
}

async fn handle_import(stream: &mut TcpStream, backend: &dyn LanBackend, body: &[u8]) -> Result<()> {
    if body.is_empty() {
        return write_json(stream, 400, &serde_json::json!({ "error": "empty body" })).await;
    }

    match backend.import_package_bytes(body).await {
        Ok(summary) => {
            write_json(
                stream,
                200,
                &serde_json::json!({
                    "imported": summary.imported,
                    "skipped": summary.skipped,
                    "conflicts": summary.conflicts,
                }),
            )
            .await
        }
        Err(e) => write_json(stream, 500, &serde_json::json!({ "error": e.to_string() })).await,
    }
}

async fn read_request_head(stream: &mut TcpStream) -> Result<ParsedRequest> {
    let mut buf = Vec::with_capacity(4096);
    let mut byte = [0u8; 1];

    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| Error::Transport(format!("socket read failed: {e}")))?;
        if n == 0 {
            return Err(Error::Transport("connection closed before headers completed".into()));
        }
        buf.push(byte[0]);

        if buf.len() > MAX_HEADER_BYTES {
            return Err(Error::Transport("request headers exceeded 256 KiB cap".into()));
        }
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    parse_request_head(&buf)
}

fn parse_request_head(buf: &[u8]) -> Result<ParsedRequest> {
    let text = String::from_utf8_lossy(buf);
    let mut lines = text.split("\r\n");

    let request_line = lines.next().ok_or_else(|| Error::Transport("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| Error::Transport("malformed request line".into()))?.to_string();
    let target = parts.next().ok_or_else(|| Error::Transport("malformed request line".into()))?;

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), parse_query(q)),
        None => (target.to_string(), std::collections::HashMap::new()),
    };

    let mut headers = std::collections::HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length = headers.get("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);

    Ok(ParsedRequest { method, path, query, headers, content_length })
}

fn parse_query(query: &str) -> std::collections::HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn read_exact_body(stream: &mut TcpStream, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| Error::Transport(format!("failed to read request body: {e}")))?;
    Ok(buf)
}

async fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload).await
}

async fn write_zip(stream: &mut TcpStream, bytes: &[u8]) -> Result<()> {
    write_response(stream, 200, "application/zip", bytes).await
}

async fn write_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) -> Result<()> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Internal Server Error",
    };

    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    stream
        .write_all(head.as_bytes())
        .await
        .map_err(|e| Error::Transport(format!("failed to write response head: {e}")))?;
    stream
        .write_all(body)
        .await
        .map_err(|e| Error::Transport(format!("failed to write response body: {e}")))?;
    stream.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_head_extracts_method_path_query() {
        let raw = b"GET /lan/export?mode=full&remoteInstanceId=abc HTTP/1.1\r\nHost: localhost\r\nX-Lan-Key: secret\r\n\r\n";
        let parsed = parse_request_head(raw).unwrap();
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/lan/export");
        assert_eq!(parsed.query.get("mode").map(String::as_str), Some("full"));
        assert_eq!(parsed.query.get("remoteInstanceId").map(String::as_str), Some("abc"));
        assert_eq!(parsed.headers.get("x-lan-key").map(String::as_str), Some("secret"));
    }

    #[test]
    fn test_parse_request_head_reads_content_length() {
        let raw = b"POST /lan/import HTTP/1.1\r\nContent-Length: 42\r\n\r\n";
        let parsed = parse_request_head(raw).unwrap();
        assert_eq!(parsed.content_length, 42);
    }

    struct StubBackend;

    #[async_trait]
    impl LanBackend for StubBackend {
        fn instance_id(&self) -> String {
            "instance-1".to_string()
        }
        fn instance_kind(&self) -> String {
            "Personal".to_string()
        }
        async fn export_package_bytes(&self, _mode: ExportMode, _remote_instance_id: &str) -> Result<Vec<u8>> {
            Ok(b"PK\x03\x04".to_vec())
        }
        async fn import_package_bytes(&self, _bytes: &[u8]) -> Result<ImportSummary> {
            Ok(ImportSummary { imported: 1, skipped: 0, conflicts: 0 })
        }
    }

    #[tokio::test]
    async fn test_ping_ok_and_auth_rejects_bad_key() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let backend: Arc<dyn LanBackend> = Arc::new(StubBackend);
        let server = LanServer::new(backend, Some("correct-key".to_string()));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(server.serve(port, rx));

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET /lan/ping HTTP/1.1\r\nX-Lan-Key: wrong-key\r\n\r\n")
            .await
            .unwrap();
        let mut resp = Vec::new();
        stream.read_to_end(&mut resp).await.unwrap();
        let text = String::from_utf8_lossy(&resp);
        assert!(text.starts_with("HTTP/1.1 401"));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET /lan/ping HTTP/1.1\r\nX-Lan-Key: correct-key\r\n\r\n")
            .await
            .unwrap();
        let mut resp = Vec::new();
        stream.read_to_end(&mut resp).await.unwrap();
        let text = String::from_utf8_lossy(&resp);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("instance-1"));

        tx.send(()).ok();
        let _ = handle.await;
    }
}
