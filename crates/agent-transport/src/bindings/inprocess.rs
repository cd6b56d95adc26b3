// SPDX-License-Identifier: MIT OR Apache-2.0
//! B3: direct in-process dispatch, for a capability implementation hosted in
//! the same process as the caller. No wire format, no network round trip.

use crate::{ChunkStream, Transport, TransportRequest, TransportResponse};
use agent_error::{AgentError, ErrorCode};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// An in-process capability implementation.
///
/// Handlers run on whatever executor calls them; long-running handlers
/// should spawn their own task rather than block the caller.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    /// Handle a single request/response invocation.
    async fn invoke(&self, request: &TransportRequest) -> Result<serde_json::Value, AgentError>;

    /// Handle a streaming invocation.
    ///
    /// The default implementation runs [`invoke`](LocalHandler::invoke) and
    /// yields its result as a single-item stream.
    async fn stream(&self, request: &TransportRequest) -> Result<ChunkStream, AgentError> {
        let value = self.invoke(request).await?;
        Ok(tokio_stream::once(Ok(value)).boxed())
    }
}

/// The B3 binding: routes by `endpoint` to a registered [`LocalHandler`].
///
/// `endpoint` is an opaque local identifier here, not a URL — typically the
/// same string used as the `local://` or `unix://` path segment.
pub struct InProcessBinding {
    tag: &'static str,
    handlers: RwLock<BTreeMap<String, Arc<dyn LocalHandler>>>,
}

impl InProcessBinding {
    /// Build an empty binding for `tag` (`"local"` or `"unix"`).
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register `handler` under `endpoint`, replacing any prior registration.
    pub fn register(&self, endpoint: impl Into<String>, handler: Arc<dyn LocalHandler>) {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(endpoint.into(), handler);
    }

    /// Remove the handler registered under `endpoint`, if any.
    pub fn deregister(&self, endpoint: &str) {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .remove(endpoint);
    }

    fn lookup(&self, endpoint: &str) -> Result<Arc<dyn LocalHandler>, AgentError> {
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .get(endpoint)
            .cloned()
            .ok_or_else(|| {
                AgentError::new(
                    ErrorCode::CapabilityNotFound,
                    format!("no local handler registered for endpoint '{endpoint}'"),
                )
            })
    }
}

#[async_trait]
impl Transport for InProcessBinding {
    fn protocol_tag(&self) -> &str {
        self.tag
    }

    async fn invoke(&self, request: TransportRequest) -> Result<TransportResponse, AgentError> {
        let handler = self.lookup(&request.endpoint)?;
        let value = handler.invoke(&request).await?;
        Ok(TransportResponse {
            status: 200,
            headers: Default::default(),
            body: value,
        })
    }

    async fn stream(&self, request: TransportRequest) -> Result<ChunkStream, AgentError> {
        let handler = self.lookup(&request.endpoint)?;
        handler.stream(&request).await
    }

    async fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Echo;

    #[async_trait]
    impl LocalHandler for Echo {
        async fn invoke(&self, request: &TransportRequest) -> Result<serde_json::Value, AgentError> {
            Ok(request.params.clone().unwrap_or(serde_json::Value::Null))
        }
    }

    #[tokio::test]
    async fn invoke_dispatches_to_registered_handler() {
        let binding = InProcessBinding::new("local");
        binding.register("agent-a", Arc::new(Echo));

        let request = TransportRequest::new("agent-a", "echo")
            .with_params(serde_json::json!({"hello": "world"}));
        let response = binding.invoke(request).await.unwrap();
        assert_eq!(response.body, serde_json::json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn invoke_errors_for_unregistered_endpoint() {
        let binding = InProcessBinding::new("local");
        let request = TransportRequest::new("missing", "echo");
        let err = binding.invoke(request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CapabilityNotFound);
    }

    #[tokio::test]
    async fn default_stream_impl_yields_a_single_chunk() {
        let binding = InProcessBinding::new("local");
        binding.register("agent-a", Arc::new(Echo));

        let request = TransportRequest::new("agent-a", "echo").with_params(serde_json::json!(7));
        let mut stream = binding.stream(request).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), serde_json::json!(7));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn deregister_removes_the_handler() {
        let binding = InProcessBinding::new("local");
        binding.register("agent-a", Arc::new(Echo));
        binding.deregister("agent-a");
        let request = TransportRequest::new("agent-a", "echo");
        assert!(binding.invoke(request).await.is_err());
    }
}
