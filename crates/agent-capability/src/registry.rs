// SPDX-License-Identifier: MIT OR Apache-2.0
//! The capability registry: registration, listing, descriptor derivation,
//! and request dispatch.

use crate::session::SessionStore;
use agent_descriptor::{
    AgentDescriptor, Authentication, Capability, InteractionModel, Orchestration, Provider,
    Status,
};
use agent_error::{AgentError, ErrorCode};
use agent_transport::{ChunkStream, TransportRequest, TransportResponse};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by registry operations themselves, distinct from handler
/// failures (which surface as [`AgentError`] through [`CapabilityRegistry::dispatch`]).
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// `register` called twice with the same name.
    #[error("capability '{0}' is already registered")]
    DuplicateName(String),
    /// `dispatch` referenced a name with no registered record.
    #[error("capability '{0}' not found")]
    NotFound(String),
    /// Input failed the capability's declared `input_schema`.
    #[error("input for '{capability}' failed schema validation: {detail}")]
    InvalidInput {
        /// Capability name.
        capability: String,
        /// Human-readable validation failure.
        detail: String,
    },
    /// Capability requires auth and the request carried none.
    #[error("capability '{0}' requires authentication")]
    AuthenticationRequired(String),
}

impl From<CapabilityError> for AgentError {
    fn from(err: CapabilityError) -> Self {
        match &err {
            CapabilityError::DuplicateName(name) => AgentError::new(
                ErrorCode::ValidationError,
                err.to_string(),
            )
            .with_context("capability", name.clone()),
            CapabilityError::NotFound(name) => AgentError::new(
                ErrorCode::CapabilityNotFound,
                err.to_string(),
            )
            .with_context("capability", name.clone()),
            CapabilityError::InvalidInput { capability, .. } => AgentError::new(
                ErrorCode::InvalidInput,
                err.to_string(),
            )
            .with_context("capability", capability.clone()),
            CapabilityError::AuthenticationRequired(name) => AgentError::new(
                ErrorCode::AuthenticationFailed,
                err.to_string(),
            )
            .with_context("capability", name.clone()),
        }
    }
}

/// Context a dispatch carries to a handler: the caller's auth material plus,
/// for `memory_enabled` capabilities, the session id and prior turn's saved
/// context.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    /// `X-Session-ID`/`session_id`, when the capability is memory-enabled.
    pub session_id: Option<String>,
    /// Opaque context saved by this session's previous call, if any.
    pub session_context: Option<serde_json::Value>,
    /// Opaque authentication/authorization context from the request.
    pub auth_context: Option<serde_json::Value>,
}

/// What a handler invocation produced.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    /// The capability's output.
    pub value: serde_json::Value,
    /// Updated session context to carry forward, if this capability is
    /// memory-enabled and the handler wants to change it.
    pub session_context: Option<serde_json::Value>,
}

impl HandlerOutcome {
    /// An outcome with no session context update.
    #[must_use]
    pub fn value(value: serde_json::Value) -> Self {
        Self { value, session_context: None }
    }
}

/// A capability's executable behavior.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Handle one request/response invocation.
    async fn invoke(
        &self,
        params: Option<serde_json::Value>,
        ctx: &DispatchContext,
    ) -> Result<HandlerOutcome, AgentError>;

    /// Handle a streaming invocation.
    ///
    /// The default implementation runs [`invoke`](Self::invoke) and yields
    /// its value as a single-item stream; session-context updates from a
    /// streaming call are not carried forward under this default.
    async fn stream(
        &self,
        params: Option<serde_json::Value>,
        ctx: &DispatchContext,
    ) -> Result<ChunkStream, AgentError> {
        let outcome = self.invoke(params, ctx).await?;
        Ok(tokio_stream::once(Ok(outcome.value)).boxed())
    }
}

/// A registered capability: its design-time metadata plus a handler.
#[derive(Clone)]
pub struct CapabilityRecord {
    /// Capability name — unique within the registry.
    pub name: String,
    /// Optional capability version.
    pub version: Option<String>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Prose description.
    pub description: Option<String>,
    /// Opaque JSON Schema validated against `params` before dispatch.
    pub input_schema: Option<serde_json::Value>,
    /// Opaque JSON Schema describing the handler's output, advertised only.
    pub output_schema: Option<serde_json::Value>,
    /// Whether callers may invoke this capability via `stream()`.
    pub streaming: bool,
    /// Whether this capability keeps per-session state (§4.5 sessions).
    pub memory_enabled: bool,
    /// Whether identical input always produces identical output.
    pub is_deterministic: bool,
    /// Whether dispatch must reject requests with no `auth_context`.
    pub requires_auth: bool,
    /// The capability's behavior.
    pub handler: Arc<dyn CapabilityHandler>,
}

/// The result of a successful [`CapabilityRegistry::dispatch`].
pub enum DispatchOutcome {
    /// A non-streaming capability's single response.
    Single(TransportResponse),
    /// A streaming capability's chunk sequence.
    Streaming(ChunkStream),
}

/// Agent-level metadata combined with the registered capability list to
/// produce an [`AgentDescriptor`] (`derive_descriptor`).
#[derive(Debug, Clone, Default)]
pub struct AgentMeta {
    /// Agent name.
    pub name: String,
    /// Agent version.
    pub version: String,
    /// Prose description.
    pub description: Option<String>,
    /// Agent home URL.
    pub url: Option<String>,
    /// Provider/organization metadata.
    pub provider: Option<Provider>,
    /// Documentation URL.
    pub documentation_url: Option<String>,
    /// Interaction model.
    pub interaction_model: Option<InteractionModel>,
    /// Orchestration style.
    pub orchestration: Option<Orchestration>,
    /// Authentication configuration.
    pub authentication: Option<Authentication>,
    /// Lifecycle status.
    pub status: Option<Status>,
}

fn capability_from_record(record: &CapabilityRecord) -> Capability {
    let mut capability = Capability::new(record.name.clone());
    capability.version = record.version.clone();
    capability.description = record.description.clone();
    capability.input_schema = record.input_schema.clone();
    capability.output_schema = record.output_schema.clone();
    capability.is_deterministic = Some(record.is_deterministic);
    capability.memory_enabled = Some(record.memory_enabled);
    capability.streaming = Some(record.streaming);
    capability.tags = record.tags.clone();
    capability
}

fn session_id_of(request: &TransportRequest) -> Option<String> {
    if let Some(id) = request.headers.get("X-Session-ID") {
        return Some(id.clone());
    }
    match &request.params {
        Some(serde_json::Value::Object(map)) => {
            map.get("session_id").and_then(|v| v.as_str()).map(str::to_string)
        }
        _ => None,
    }
}

fn validate_against_schema(
    capability: &str,
    schema: &serde_json::Value,
    params: &Option<serde_json::Value>,
) -> Result<(), CapabilityError> {
    let instance = params.clone().unwrap_or(serde_json::Value::Null);
    let validator = jsonschema::validator_for(schema).map_err(|e| CapabilityError::InvalidInput {
        capability: capability.to_string(),
        detail: format!("schema itself does not compile: {e}"),
    })?;
    if validator.is_valid(&instance) {
        Ok(())
    } else {
        Err(CapabilityError::InvalidInput {
            capability: capability.to_string(),
            detail: "input does not satisfy input_schema".to_string(),
        })
    }
}

/// Holds every capability an agent advertises, and dispatches requests to
/// them. Registration order is preserved for [`list`](Self::list), matching
/// the order capabilities should appear in a derived descriptor.
pub struct CapabilityRegistry {
    order: Mutex<Vec<String>>,
    records: RwLock<BTreeMap<String, CapabilityRecord>>,
    sessions: SessionStore,
}

impl CapabilityRegistry {
    /// Build an empty registry whose session store holds at most
    /// `session_capacity` concurrent sessions.
    pub fn new(session_capacity: usize) -> Self {
        Self {
            order: Mutex::new(Vec::new()),
            records: RwLock::new(BTreeMap::new()),
            sessions: SessionStore::new(session_capacity),
        }
    }

    /// Register `record`. Errors if a capability with the same name is
    /// already registered.
    pub fn register(&self, record: CapabilityRecord) -> Result<(), CapabilityError> {
        let mut records = self.records.write().expect("registry lock poisoned");
        if records.contains_key(&record.name) {
            return Err(CapabilityError::DuplicateName(record.name));
        }
        self.order.lock().expect("registry order lock poisoned").push(record.name.clone());
        records.insert(record.name.clone(), record);
        Ok(())
    }

    /// List every registered capability, in registration order.
    pub fn list(&self) -> Vec<CapabilityRecord> {
        let order = self.order.lock().expect("registry order lock poisoned");
        let records = self.records.read().expect("registry lock poisoned");
        order.iter().filter_map(|name| records.get(name).cloned()).collect()
    }

    /// Synthesize an [`AgentDescriptor`] from `meta` and the registered
    /// capability list.
    pub fn derive_descriptor(&self, meta: AgentMeta) -> AgentDescriptor {
        let capabilities = self.list().iter().map(capability_from_record).collect();
        let mut descriptor = AgentDescriptor::new(meta.name, meta.version, capabilities);
        descriptor.description = meta.description;
        descriptor.url = meta.url;
        descriptor.provider = meta.provider;
        descriptor.documentation_url = meta.documentation_url;
        descriptor.interaction_model = meta.interaction_model;
        descriptor.orchestration = meta.orchestration;
        descriptor.authentication = meta.authentication;
        descriptor.status = meta.status;
        descriptor
    }

    fn lookup(&self, name: &str) -> Result<CapabilityRecord, CapabilityError> {
        self.records
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))
    }

    /// Dispatch `request` to its named capability.
    ///
    /// Steps: look up the capability (404-equivalent if absent), validate
    /// `params` against `input_schema` if present, enforce `requires_auth`,
    /// invoke the handler (serialized per-session when `memory_enabled`),
    /// and return a single response or a chunk stream depending on
    /// `request.stream`.
    pub async fn dispatch(&self, request: TransportRequest) -> Result<DispatchOutcome, AgentError> {
        debug!(target: "agent.capability.dispatch", capability = %request.capability, "dispatching request");
        let record = self.lookup(&request.capability).map_err(|e| {
            warn!(target: "agent.capability.dispatch", capability = %request.capability, "capability not found");
            e
        })?;

        if let Some(schema) = &record.input_schema {
            validate_against_schema(&record.name, schema, &request.params).map_err(|e| {
                warn!(target: "agent.capability.dispatch", capability = %record.name, "input failed schema validation");
                e
            })?;
        }

        if record.requires_auth && request.auth_context.is_none() {
            warn!(target: "agent.capability.dispatch", capability = %record.name, "request missing required auth context");
            return Err(CapabilityError::AuthenticationRequired(record.name.clone()).into());
        }

        let session_id = session_id_of(&request);
        let params = request.params.clone();
        let auth_context = request.auth_context.clone();

        if !record.memory_enabled {
            let ctx = DispatchContext { auth_context, ..Default::default() };
            return self.invoke_handler(&record, params, ctx, request).await;
        }

        let Some(session_id) = session_id else {
            let ctx = DispatchContext { auth_context, ..Default::default() };
            return self.invoke_handler(&record, params, ctx, request).await;
        };

        debug!(target: "agent.capability.dispatch", capability = %record.name, session_id = %session_id, "acquiring session lock");
        let slot = self.sessions.slot(&session_id);
        let mut guard = slot.lock().await;
        let ctx = DispatchContext {
            session_id: Some(session_id),
            session_context: guard.context.clone(),
            auth_context,
        };

        if request.stream {
            // Streaming calls don't update session context under the
            // default handler implementation; release the lock once the
            // stream has been handed to the caller rather than holding it
            // for the stream's entire lifetime.
            let outcome = self.invoke_streaming(&record, params, ctx).await?;
            return Ok(outcome);
        }

        let outcome = record.handler.invoke(params, &ctx).await?;
        guard.context = outcome.session_context.clone();
        guard.touch();
        drop(guard);

        Ok(DispatchOutcome::Single(TransportResponse {
            status: 200,
            headers: Default::default(),
            body: outcome.value,
        }))
    }

    async fn invoke_handler(
        &self,
        record: &CapabilityRecord,
        params: Option<serde_json::Value>,
        ctx: DispatchContext,
        request: TransportRequest,
    ) -> Result<DispatchOutcome, AgentError> {
        if request.stream {
            return self.invoke_streaming(record, params, ctx).await;
        }
        let outcome = record.handler.invoke(params, &ctx).await?;
        Ok(DispatchOutcome::Single(TransportResponse {
            status: 200,
            headers: Default::default(),
            body: outcome.value,
        }))
    }

    async fn invoke_streaming(
        &self,
        record: &CapabilityRecord,
        params: Option<serde_json::Value>,
        ctx: DispatchContext,
    ) -> Result<DispatchOutcome, AgentError> {
        if !record.streaming {
            return Err(AgentError::new(
                ErrorCode::InvalidInput,
                format!("capability '{}' does not support streaming", record.name),
            ));
        }
        let chunks = record.handler.stream(params, &ctx).await?;
        Ok(DispatchOutcome::Streaming(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CapabilityHandler for Echo {
        async fn invoke(
            &self,
            params: Option<serde_json::Value>,
            _ctx: &DispatchContext,
        ) -> Result<HandlerOutcome, AgentError> {
            Ok(HandlerOutcome::value(params.unwrap_or(serde_json::Value::Null)))
        }
    }

    struct Counter;

    #[async_trait]
    impl CapabilityHandler for Counter {
        async fn invoke(
            &self,
            _params: Option<serde_json::Value>,
            ctx: &DispatchContext,
        ) -> Result<HandlerOutcome, AgentError> {
            let prior = ctx
                .session_context
                .as_ref()
                .and_then(|v| v.get("turns"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let next = prior + 1;
            Ok(HandlerOutcome {
                value: serde_json::json!({"turns": next}),
                session_context: Some(serde_json::json!({"turns": next})),
            })
        }
    }

    fn echo_record() -> CapabilityRecord {
        CapabilityRecord {
            name: "echo".into(),
            version: None,
            tags: vec![],
            description: Some("echoes input".into()),
            input_schema: None,
            output_schema: None,
            streaming: false,
            memory_enabled: false,
            is_deterministic: true,
            requires_auth: false,
            handler: Arc::new(Echo),
        }
    }

    fn counter_record() -> CapabilityRecord {
        CapabilityRecord {
            name: "counter".into(),
            version: None,
            tags: vec![],
            description: None,
            input_schema: None,
            output_schema: None,
            streaming: false,
            memory_enabled: true,
            is_deterministic: false,
            requires_auth: false,
            handler: Arc::new(Counter),
        }
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let registry = CapabilityRegistry::new(10);
        registry.register(echo_record()).unwrap();
        let err = registry.register(echo_record()).unwrap_err();
        assert!(matches!(err, CapabilityError::DuplicateName(_)));
    }

    #[test]
    fn list_preserves_registration_order() {
        let registry = CapabilityRegistry::new(10);
        registry.register(echo_record()).unwrap();
        registry.register(counter_record()).unwrap();
        let names: Vec<_> = registry.list().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["echo".to_string(), "counter".to_string()]);
    }

    #[tokio::test]
    async fn dispatch_returns_not_found_for_unknown_capability() {
        let registry = CapabilityRegistry::new(10);
        let request = TransportRequest::new("local://agent", "missing");
        let err = registry.dispatch(request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CapabilityNotFound);
    }

    #[tokio::test]
    async fn dispatch_invokes_a_stateless_handler() {
        let registry = CapabilityRegistry::new(10);
        registry.register(echo_record()).unwrap();
        let request = TransportRequest::new("local://agent", "echo")
            .with_params(serde_json::json!({"hi": "there"}));
        match registry.dispatch(request).await.unwrap() {
            DispatchOutcome::Single(response) => {
                assert_eq!(response.body, serde_json::json!({"hi": "there"}));
            }
            DispatchOutcome::Streaming(_) => panic!("expected single response"),
        }
    }

    #[tokio::test]
    async fn dispatch_requires_auth_when_declared() {
        let registry = CapabilityRegistry::new(10);
        let mut record = echo_record();
        record.requires_auth = true;
        registry.register(record).unwrap();
        let request = TransportRequest::new("local://agent", "echo");
        let err = registry.dispatch(request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthenticationFailed);
    }

    #[tokio::test]
    async fn dispatch_carries_session_context_across_calls() {
        let registry = CapabilityRegistry::new(10);
        registry.register(counter_record()).unwrap();

        let mut headers = BTreeMap::new();
        headers.insert("X-Session-ID".to_string(), "s1".to_string());

        let first = TransportRequest {
            headers: headers.clone(),
            ..TransportRequest::new("local://agent", "counter")
        };
        let DispatchOutcome::Single(r1) = registry.dispatch(first).await.unwrap() else {
            panic!("expected single response");
        };
        assert_eq!(r1.body, serde_json::json!({"turns": 1}));

        let second = TransportRequest { headers, ..TransportRequest::new("local://agent", "counter") };
        let DispatchOutcome::Single(r2) = registry.dispatch(second).await.unwrap() else {
            panic!("expected single response");
        };
        assert_eq!(r2.body, serde_json::json!({"turns": 2}));
    }

    #[tokio::test]
    async fn dispatch_validates_input_schema() {
        let registry = CapabilityRegistry::new(10);
        let mut record = echo_record();
        record.input_schema = Some(serde_json::json!({
            "type": "object",
            "required": ["hi"],
        }));
        registry.register(record).unwrap();

        let bad = TransportRequest::new("local://agent", "echo").with_params(serde_json::json!({}));
        let err = registry.dispatch(bad).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);

        let good = TransportRequest::new("local://agent", "echo")
            .with_params(serde_json::json!({"hi": "there"}));
        assert!(registry.dispatch(good).await.is_ok());
    }

    #[test]
    fn derive_descriptor_concatenates_meta_and_capabilities() {
        let registry = CapabilityRegistry::new(10);
        registry.register(echo_record()).unwrap();
        let meta = AgentMeta {
            name: "acme".into(),
            version: "1.0.0".into(),
            ..Default::default()
        };
        let descriptor = registry.derive_descriptor(meta);
        assert_eq!(descriptor.name, "acme");
        assert_eq!(descriptor.capabilities.len(), 1);
        assert_eq!(descriptor.capabilities[0].name, "echo");
    }
}
