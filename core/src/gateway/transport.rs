//! Line-delimited JSON-RPC transport over a child process's stdio

use super::protocol::{JsonRpcMessage, JsonRpcRequest, RpcReply};
use crate::config::GatewayConfig;
use crate::error::ConnectionError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

type Writer = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, LinesCodec>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<RpcReply>>>>;

/// A request/response channel to the tool gateway
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its response
    async fn request(&self, method: &str, params: Option<Value>)
        -> Result<RpcReply, ConnectionError>;

    /// Send a notification; nothing comes back
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ConnectionError>;

    /// Whether the gateway has gone away
    fn is_closed(&self) -> bool;

    /// Stop the gateway, if this transport owns it
    async fn shutdown(&self) {}
}

/// Transport speaking to a gateway process over stdin/stdout.
///
/// Requests may be in flight concurrently. Writes are serialized and a
/// background reader routes each response to its caller by request id.
pub struct StdioTransport {
    writer: Mutex<Writer>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Launch the gateway process described by `config`
    pub fn spawn(config: &GatewayConfig) -> Result<Self, ConnectionError> {
        let program = resolve_command(&config.command)?;
        let spawn_error = |message: String| ConnectionError::Spawn {
            command: config.command.clone(),
            message,
        };

        let mut command = Command::new(&program);
        command
            .args(config.args.iter().map(|arg| shellexpand::tilde(arg).into_owned()))
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| spawn_error(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout was not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        tracing::info!(
            "Started tool gateway {} (pid {:?})",
            program.display(),
            child.id()
        );

        let mut transport = Self::from_io(stdout, stdin, config.request_timeout());
        *transport.child.get_mut() = Some(child);
        Ok(transport)
    }

    /// Build a transport over an existing byte stream pair
    pub fn from_io<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader_task = tokio::spawn(read_loop(
            FramedRead::new(reader, LinesCodec::new()),
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);

        Self {
            writer: Mutex::new(FramedWrite::new(writer, LinesCodec::new())),
            pending,
            next_id: AtomicU64::new(0),
            closed,
            request_timeout,
            reader_task,
            child: Mutex::new(None),
        }
    }

    async fn send(&self, message: &JsonRpcRequest<'_>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let line = serde_json::to_string(message).map_err(|e| ConnectionError::Protocol {
            message: e.to_string(),
        })?;
        tracing::trace!("-> {}", line);
        let mut writer = self.writer.lock().await;
        writer.send(line).await.map_err(|e| ConnectionError::Transport {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<RpcReply, ConnectionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        // Releases the slot however this future ends, including being dropped.
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };

        // The reader may have drained the map just before our insert.
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }

        self.send(&JsonRpcRequest::request(id, method, params)).await?;

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => {
                tracing::warn!("Gateway request {} ({}) timed out", id, method);
                Err(ConnectionError::Timeout {
                    method: method.to_string(),
                    seconds: self.request_timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ConnectionError> {
        self.send(&JsonRpcRequest::notification(method, params)).await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            match child.kill().await {
                Ok(()) => tracing::info!("Tool gateway stopped"),
                Err(e) => tracing::warn!("Failed to stop tool gateway: {}", e),
            }
        }
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A request's entry in the pending map, removed when the request ends
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&self.id);
            return;
        }
        // The reader holds the map; finish the removal once it lets go.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pending = Arc::clone(self.pending);
            let id = self.id;
            handle.spawn(async move {
                pending.lock().await.remove(&id);
            });
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop<R>(mut lines: FramedRead<R, LinesCodec>, pending: Pending, closed: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Gateway stream error: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tracing::trace!("<- {}", line);

        let message: JsonRpcMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Ignoring unparseable gateway output ({}): {}", e, line);
                continue;
            }
        };
        let Some(id) = message.response_id() else {
            tracing::debug!("Ignoring server-initiated message {:?}", message.method);
            continue;
        };

        match pending.lock().await.remove(&id) {
            Some(sender) => {
                let _ = sender.send(message.into_reply());
            }
            None => tracing::debug!("Dropping response to abandoned request {}", id),
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every waiting request with `Closed`.
    let abandoned = pending.lock().await.drain().count();
    if abandoned > 0 {
        tracing::warn!("Tool gateway closed with {} requests in flight", abandoned);
    } else {
        tracing::debug!("Tool gateway closed its output");
    }
}

async fn forward_stderr<R>(stderr: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(stderr, LinesCodec::new());
    while let Some(Ok(line)) = lines.next().await {
        tracing::debug!(target: "gateway", "{}", line);
    }
}

fn resolve_command(command: &str) -> Result<PathBuf, ConnectionError> {
    let expanded = shellexpand::full(command)
        .map_err(|e| ConnectionError::Spawn {
            command: command.to_string(),
            message: e.to_string(),
        })?
        .into_owned();

    let path = PathBuf::from(&expanded);
    if path.components().count() > 1 {
        return Ok(path);
    }
    which::which(&expanded).map_err(|e| ConnectionError::Spawn {
        command: command.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn connect(timeout_secs: u64) -> (StdioTransport, DuplexStream) {
        let (client, server) = tokio::io::duplex(8192);
        let (read, write) = tokio::io::split(client);
        (
            StdioTransport::from_io(read, write, Duration::from_secs(timeout_secs)),
            server,
        )
    }

    async fn read_request(lines: &mut FramedRead<tokio::io::ReadHalf<DuplexStream>, LinesCodec>) -> Value {
        let line = lines.next().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_responses_routed_by_id() {
        let (transport, server) = connect(5);
        let (read, mut write) = tokio::io::split(server);

        let gateway = tokio::spawn(async move {
            let mut lines = FramedRead::new(read, LinesCodec::new());
            let first = read_request(&mut lines).await;
            let second = read_request(&mut lines).await;
            // Answer out of order, with a stray response in between.
            let replies = [
                json!({"jsonrpc": "2.0", "id": second["id"], "result": {"echo": second["method"]}}),
                json!({"jsonrpc": "2.0", "id": 999, "result": {"echo": "stray"}}),
                json!({"jsonrpc": "2.0", "id": first["id"], "result": {"echo": first["method"]}}),
            ];
            for reply in replies {
                write.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
            }
            (lines, write)
        });

        let (a, b) = tokio::join!(
            transport.request("tools/list", None),
            transport.request("resources/list", None)
        );
        assert_eq!(a.unwrap().unwrap()["echo"], json!("tools/list"));
        assert_eq!(b.unwrap().unwrap()["echo"], json!("resources/list"));
        drop(gateway.await.unwrap());
    }

    #[tokio::test]
    async fn test_eof_fails_pending_requests() {
        let (transport, server) = connect(5);
        let (read, write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = FramedRead::new(read, LinesCodec::new());
            let _ = read_request(&mut lines).await;
            drop(lines);
            drop(write);
        });

        let result = transport.request("tools/list", None).await;
        assert!(matches!(result, Err(ConnectionError::Closed)));
        assert!(transport.is_closed());
        assert!(matches!(
            transport.request("tools/list", None).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let (transport, _server) = connect(3);
        let result = transport.request("tools/call", None).await;
        assert_eq!(
            result.unwrap_err(),
            ConnectionError::Timeout {
                method: "tools/call".to_string(),
                seconds: 3
            }
        );
        assert!(transport.pending.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_releases_its_slot() {
        let (transport, server) = connect(60);
        let (read, _write) = tokio::io::split(server);

        // The caller gives up long before the transport's own timeout.
        let abandoned = timeout(
            Duration::from_secs(5),
            transport.request("tools/call", Some(json!({"name": "search_bible"}))),
        )
        .await;
        assert!(abandoned.is_err());

        let mut lines = FramedRead::new(read, LinesCodec::new());
        let sent = read_request(&mut lines).await;
        assert_eq!(sent["method"], json!("tools/call"));
        assert!(transport.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_rpc_error_is_not_a_connection_error() {
        let (transport, server) = connect(5);
        let (read, mut write) = tokio::io::split(server);

        tokio::spawn(async move {
            let mut lines = FramedRead::new(read, LinesCodec::new());
            let request = read_request(&mut lines).await;
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32601, "message": "Method not found"}
            });
            write.write_all(format!("{}\n", reply).as_bytes()).await.unwrap();
            lines
        });

        let reply = transport.request("bogus", None).await.unwrap();
        assert_eq!(reply.unwrap_err().code, -32601);
    }

    #[test]
    fn test_missing_command_fails_to_resolve() {
        let result = resolve_command("definitely-not-a-real-gateway-binary");
        assert!(matches!(result, Err(ConnectionError::Spawn { .. })));
    }
}
