//! Tool client: session handshake, cached tool listing, and tool invocation

use super::protocol::{
    self, CallToolResult, InitializeResult, ReadResourceResult, ResourceDescriptor,
    ResourcesListResult, RpcReply, ServerInfo, ToolDescriptor, ToolsListResult,
};
use super::transport::{StdioTransport, Transport};
use super::{ToolInvoker, ToolOutcome};
use crate::config::GatewayConfig;
use crate::error::{ConnectionError, Error, Result, ToolError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

const CLIENT_NAME: &str = "bible-chat";

/// Client for the tool gateway.
///
/// The handshake runs once, on first use. The tool list is fetched once and
/// kept for the life of the connection; it is dropped as soon as the
/// connection is found closed.
pub struct ToolClient {
    transport: Arc<dyn Transport>,
    server: OnceCell<ServerInfo>,
    tools: RwLock<Option<Arc<Vec<ToolDescriptor>>>>,
}

impl ToolClient {
    /// Create a client over an existing transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            server: OnceCell::new(),
            tools: RwLock::new(None),
        }
    }

    /// Launch the gateway process and complete the handshake
    pub async fn connect(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let client = Self::new(Arc::new(StdioTransport::spawn(config)?));
        client.server_info().await?;
        Ok(client)
    }

    /// Identity of the connected gateway, performing the handshake if needed
    pub async fn server_info(&self) -> std::result::Result<&ServerInfo, ConnectionError> {
        self.server
            .get_or_try_init(|| async {
                let reply = self
                    .transport
                    .request(
                        protocol::METHOD_INITIALIZE,
                        Some(protocol::initialize_params(CLIENT_NAME, crate::VERSION)),
                    )
                    .await?;
                let result: InitializeResult =
                    decode(reply).map_err(|message| ConnectionError::Handshake { message })?;
                self.transport
                    .notify(protocol::METHOD_INITIALIZED, None)
                    .await?;

                tracing::info!(
                    "Connected to tool gateway {} {} (protocol {})",
                    result.server_info.name,
                    result.server_info.version,
                    result.protocol_version
                );
                Ok::<_, ConnectionError>(result.server_info)
            })
            .await
    }

    /// Describe the tools the gateway exposes
    pub async fn list_tools(&self) -> std::result::Result<Arc<Vec<ToolDescriptor>>, ConnectionError> {
        if self.transport.is_closed() {
            self.tools.write().await.take();
            return Err(ConnectionError::Closed);
        }
        if let Some(tools) = self.tools.read().await.clone() {
            return Ok(tools);
        }

        let mut cache = self.tools.write().await;
        if let Some(tools) = cache.clone() {
            return Ok(tools);
        }
        let tools = Arc::new(self.fetch_tools().await?);
        tracing::debug!("Gateway exposes {} tools", tools.len());
        *cache = Some(Arc::clone(&tools));
        Ok(tools)
    }

    async fn fetch_tools(&self) -> std::result::Result<Vec<ToolDescriptor>, ConnectionError> {
        self.server_info().await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let reply = self
                .transport
                .request(protocol::METHOD_TOOLS_LIST, params)
                .await?;
            let page: ToolsListResult =
                decode(reply).map_err(|message| ConnectionError::Protocol { message })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
    }

    /// Call a tool.
    ///
    /// The outer error is a broken connection. The inner error is a failure
    /// of this one call that the conversation can recover from.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> std::result::Result<ToolOutcome, ConnectionError> {
        self.server_info().await?;

        let reply = match self
            .transport
            .request(
                protocol::METHOD_TOOLS_CALL,
                Some(protocol::call_params(name, arguments)),
            )
            .await
        {
            Ok(reply) => reply,
            Err(ConnectionError::Timeout { seconds, .. }) => {
                return Ok(Err(ToolError::Timeout {
                    name: name.to_string(),
                    seconds,
                }))
            }
            Err(e) => return Err(e),
        };

        let failed = |message: String| ToolError::Failed {
            name: name.to_string(),
            message,
        };
        let result: CallToolResult = match decode(reply) {
            Ok(result) => result,
            Err(message) => return Ok(Err(failed(message))),
        };

        let text = protocol::join_text(result.content);
        if result.is_error {
            tracing::debug!("Tool {} reported an error: {}", name, text);
            Ok(Err(failed(text)))
        } else {
            Ok(Ok(text))
        }
    }

    /// List readable resources
    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        self.server_info().await?;
        let reply = self
            .transport
            .request(protocol::METHOD_RESOURCES_LIST, None)
            .await?;
        let result: ResourcesListResult = decode(reply).map_err(Error::Generic)?;
        Ok(result.resources)
    }

    /// Read a resource by URI, joining its text contents
    pub async fn read_resource(&self, uri: &str) -> Result<String> {
        self.server_info().await?;
        let reply = self
            .transport
            .request(protocol::METHOD_RESOURCES_READ, Some(json!({ "uri": uri })))
            .await?;
        let result: ReadResourceResult =
            decode(reply).map_err(|message| Error::Generic(format!("{}: {}", uri, message)))?;
        Ok(protocol::join_text(result.contents))
    }

    /// Stop the gateway process
    pub async fn shutdown(&self) {
        self.tools.write().await.take();
        self.transport.shutdown().await;
    }
}

fn decode<T: DeserializeOwned>(reply: RpcReply) -> std::result::Result<T, String> {
    let value = reply.map_err(|e| e.to_string())?;
    serde_json::from_value(value).map_err(|e| format!("unexpected result shape: {}", e))
}

#[async_trait]
impl ToolInvoker for ToolClient {
    async fn list_tools(&self) -> std::result::Result<Arc<Vec<ToolDescriptor>>, ConnectionError> {
        ToolClient::list_tools(self).await
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> std::result::Result<ToolOutcome, ConnectionError> {
        ToolClient::invoke(self, name, arguments).await
    }
}
