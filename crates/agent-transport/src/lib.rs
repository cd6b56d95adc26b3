// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pluggable transport bindings for the `agent://` protocol (§4.4).
//!
//! Every binding implements the same [`Transport`] contract —
//! `invoke`/`stream`/`close`/`protocol_tag` — so the capability dispatcher
//! (C5) and callers never need to know whether a call crosses the network
//! (B1 request/response, B2 full-duplex streaming) or stays in-process (B3).
//! [`TransportRegistry`] is the process-wide lookup from transport tag to
//! binding instance.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod retry;

use agent_error::AgentError;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// HTTP-ish method hint on a [`TransportRequest`].
///
/// Only `Get` is treated as idempotent and therefore retry-eligible — see
/// §4.3/§4.4's retry rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Retried on transient failure by bindings that support retry.
    Get,
    /// Never retried.
    #[default]
    Post,
}

/// A capability invocation, addressed at a resolved endpoint.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Fully qualified wire address, as produced by the resolver.
    pub endpoint: String,
    /// Capability name being invoked.
    pub capability: String,
    /// Opaque, capability-defined input.
    #[allow(missing_docs)]
    pub params: Option<serde_json::Value>,
    /// Transport-level headers (HTTP headers, or their analogue on other
    /// transports).
    pub headers: BTreeMap<String, String>,
    /// Overall deadline for this call.
    pub timeout: Option<Duration>,
    /// Whether this call should use [`Transport::stream`] rather than
    /// [`Transport::invoke`]. Bindings that only support request/response
    /// reject `stream = true`.
    pub stream: bool,
    /// Opaque authentication/authorization context (bearer token, mTLS
    /// identity, …), interpreted by the binding.
    pub auth_context: Option<serde_json::Value>,
    /// Idempotency hint; see [`Method`].
    pub method: Method,
}

impl TransportRequest {
    /// Start a request with only the required fields set.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            capability: capability.into(),
            params: None,
            headers: BTreeMap::new(),
            timeout: None,
            stream: false,
            auth_context: None,
            method: Method::default(),
        }
    }

    /// Fluent setter for `params`.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Fluent setter for `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fluent setter for `method`.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

/// The non-streaming result of [`Transport::invoke`].
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP-equivalent status, mirrored even on non-HTTP transports.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Opaque response body.
    pub body: serde_json::Value,
}

/// A finite, restartable-once sequence of streamed body chunks.
///
/// "Restartable once" means a binding may re-issue the underlying network
/// request a single time if the stream is consumed again after erroring out
/// before completion; it is not infinitely replayable.
pub type ChunkStream = BoxStream<'static, Result<serde_json::Value, AgentError>>;

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// The uniform contract every transport binding implements.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The transport tag this binding answers to (`"https"`, `"wss"`, …).
    fn protocol_tag(&self) -> &str;

    /// Perform a single request/response capability invocation.
    async fn invoke(&self, request: TransportRequest) -> Result<TransportResponse, AgentError>;

    /// Perform a streaming capability invocation.
    ///
    /// The default implementation rejects streaming; bindings that support
    /// it (B2) override this.
    async fn stream(&self, request: TransportRequest) -> Result<ChunkStream, AgentError> {
        let _ = request;
        Err(AgentError::new(
            agent_error::ErrorCode::InvalidInput,
            format!("transport '{}' does not support streaming", self.protocol_tag()),
        ))
    }

    /// Release any resources held by this binding (pooled connections, open
    /// sockets, …). Idempotent.
    async fn close(&self) -> Result<(), AgentError>;
}

// ---------------------------------------------------------------------------
// TransportRegistry
// ---------------------------------------------------------------------------

/// Process-wide lookup from transport tag to binding instance.
///
/// This is one of the two process-scoped singletons the protocol allows
/// (the other is the resolver's cache); it is reset-able via [`clear`] for
/// tests.
///
/// [`clear`]: TransportRegistry::clear
#[derive(Default)]
pub struct TransportRegistry {
    bindings: RwLock<BTreeMap<String, Arc<dyn Transport>>>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding under its own [`Transport::protocol_tag`].
    ///
    /// Replaces any binding previously registered under the same tag.
    pub fn register(&self, binding: Arc<dyn Transport>) {
        let tag = binding.protocol_tag().to_string();
        self.bindings
            .write()
            .expect("registry lock poisoned")
            .insert(tag, binding);
    }

    /// Look up the binding for `tag`.
    pub fn get(&self, tag: &str) -> Option<Arc<dyn Transport>> {
        self.bindings
            .read()
            .expect("registry lock poisoned")
            .get(tag)
            .cloned()
    }

    /// List every registered transport tag, in sorted order.
    pub fn list(&self) -> Vec<String> {
        self.bindings
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Remove every registered binding.
    pub fn clear(&self) {
        self.bindings.write().expect("registry lock poisoned").clear();
    }
}
