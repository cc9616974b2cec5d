//! In-process stand-in for a gateway process

use super::transport::{StdioTransport, Transport};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{FramedRead, LinesCodec};

/// How the fake gateway answers a request
pub(crate) enum Reply {
    Result(Value),
    Error(i64, String),
    /// Close the connection instead of answering
    Hangup,
}

/// Spawn a fake gateway answering requests with `handler`.
///
/// Returns the client side transport and the methods received so far.
pub(crate) fn fake_gateway<F>(handler: F) -> (Arc<dyn Transport>, Arc<Mutex<Vec<String>>>)
where
    F: Fn(&str, &Value) -> Reply + Send + 'static,
{
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&seen);
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server);
        let mut lines = FramedRead::new(read, LinesCodec::new());
        while let Some(Ok(line)) = lines.next().await {
            let message: Value = serde_json::from_str(&line).unwrap();
            let method = message["method"].as_str().unwrap_or_default().to_string();
            recorded.lock().unwrap().push(method.clone());

            let Some(id) = message.get("id").cloned() else {
                continue;
            };
            let reply = match handler(&method, &message["params"]) {
                Reply::Result(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                Reply::Error(code, text) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": code, "message": text}
                }),
                Reply::Hangup => return,
            };
            if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                return;
            }
        }
    });

    let transport = StdioTransport::from_io(client_read, client_write, Duration::from_secs(5));
    (Arc::new(transport), seen)
}
