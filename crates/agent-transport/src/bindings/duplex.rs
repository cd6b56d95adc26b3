// SPDX-License-Identifier: MIT OR Apache-2.0
//! B2: full-duplex streaming transport over a persistent WebSocket.
//!
//! Frames are tagged JSON, one object per message, carrying whichever of
//! `capability`/`params`/`value`/`problem` applies to that frame's `type`.
//! This is the same shape as the sidecar JSONL envelope — a single tagged
//! enum serialized one-message-per-line — adapted to travel over a
//! WebSocket's own message framing instead of newline-delimited stdio.

use crate::{ChunkStream, Transport, TransportRequest, TransportResponse};
use agent_error::{AgentError, ErrorCode};
use async_trait::async_trait;
use futures::stream::Stream;
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// One message in the duplex wire protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Caller starts a capability invocation.
    Invoke {
        /// Correlates this call's frames.
        id: String,
        /// Capability being invoked.
        capability: String,
        /// Opaque invocation input.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },
    /// One chunk of a streamed result. Zero or more per `id`, always
    /// followed by a terminal `result` or `error` frame.
    Chunk {
        /// Correlates to the `Invoke` that produced this chunk.
        id: String,
        /// Opaque chunk payload.
        value: serde_json::Value,
    },
    /// Terminates an `id`'s stream successfully.
    Result {
        /// Correlates to the `Invoke` that produced this result.
        id: String,
        /// Opaque final payload. Empty/null for a call whose output was
        /// fully delivered as `chunk` frames.
        value: serde_json::Value,
    },
    /// Terminates an `id`'s stream with an error.
    Error {
        /// Correlates to the `Invoke` that produced this error.
        id: String,
        /// Problem detail payload.
        problem: serde_json::Value,
    },
    /// Caller asks the remote to stop producing further frames for `id`.
    Cancel {
        /// Correlates to the `Invoke` being cancelled.
        id: String,
    },
}

/// Lifecycle of one duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet dialed.
    Init,
    /// TCP/TLS/WebSocket handshake in flight.
    Connecting,
    /// Handshake complete, idle.
    Open,
    /// A frame is being written.
    Sending,
    /// A frame is being read.
    Receiving,
    /// Shutdown handshake in flight.
    Closing,
    /// Socket fully torn down.
    Closed,
}

impl ConnectionState {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Init, Connecting)
                | (Connecting, Open)
                | (Connecting, Closed)
                | (Open, Sending)
                | (Open, Receiving)
                | (Open, Closing)
                | (Sending, Open)
                | (Sending, Closing)
                | (Receiving, Open)
                | (Receiving, Closing)
                | (Closing, Closed)
        )
    }
}

/// Move a connection's tracked state to `next`, logging (but not rejecting)
/// an illegal transition — the call that asked for it still happens, this
/// just surfaces a state machine bug instead of silently hiding it.
fn transition(state: &StdMutex<ConnectionState>, id: &str, next: ConnectionState) {
    let mut current = state.lock().expect("connection state lock poisoned");
    if !current.can_transition_to(next) {
        warn!(
            target: "agent.transport.duplex",
            id = %id,
            from = ?*current,
            to = ?next,
            "illegal connection state transition"
        );
    }
    *current = next;
}

/// Sends `{type: "cancel", id}` when the chunk stream it's attached to is
/// dropped before the invocation reached a terminal (`result`/`error`)
/// frame — §4.4/§5's "dropping a stream consumer cancels the invocation"
/// rule. A best-effort send: the connection may already be gone, in which
/// case there's nothing left to cancel.
struct CancelOnDrop<Wr> {
    write: Arc<AsyncMutex<Wr>>,
    state: Arc<StdMutex<ConnectionState>>,
    id: String,
    done: Arc<AtomicBool>,
}

impl<Wr> Drop for CancelOnDrop<Wr>
where
    Wr: Sink<WsMessage> + Unpin + Send + 'static,
    Wr::Error: std::fmt::Display,
{
    fn drop(&mut self) {
        transition(&self.state, &self.id, ConnectionState::Closing);
        transition(&self.state, &self.id, ConnectionState::Closed);
        if self.done.load(Ordering::SeqCst) {
            return;
        }
        let write = self.write.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            let Ok(encoded) = serde_json::to_string(&Frame::Cancel { id: id.clone() }) else {
                return;
            };
            let mut guard = write.lock().await;
            match guard.send(WsMessage::Text(encoded)).await {
                Ok(()) => debug!(target: "agent.transport.duplex", id = %id, "cancel frame sent"),
                Err(e) => {
                    warn!(target: "agent.transport.duplex", id = %id, error = %e, "sending cancel frame failed")
                }
            }
        });
    }
}

/// A [`ChunkStream`] paired with a [`CancelOnDrop`] guard that outlives it —
/// dropping this (whether exhausted normally or abandoned early) runs the
/// guard's cancellation logic exactly once.
struct DuplexChunks<Wr> {
    inner: Pin<Box<dyn Stream<Item = Result<serde_json::Value, AgentError>> + Send>>,
    _guard: CancelOnDrop<Wr>,
}

impl<Wr> Stream for DuplexChunks<Wr>
where
    Wr: Unpin,
{
    type Item = Result<serde_json::Value, AgentError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// A small deterministic correlation id — collision-avoidance only, not a
/// cryptographic hash.
fn invoke_id(request: &TransportRequest) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    request.endpoint.hash(&mut hasher);
    request.capability.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
        .hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// The B2 binding: one WebSocket dial per call, a single `invoke` frame
/// written, and either one aggregated [`TransportResponse`] ([`invoke`]) or a
/// live [`ChunkStream`] of `chunk` frames ([`stream`]).
///
/// [`invoke`]: Transport::invoke
/// [`stream`]: Transport::stream
pub struct DuplexBinding {
    tag: &'static str,
}

impl DuplexBinding {
    /// Build a binding for `tag` (`"wss"` or `"ws"`).
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

#[async_trait]
impl Transport for DuplexBinding {
    fn protocol_tag(&self) -> &str {
        self.tag
    }

    async fn invoke(&self, request: TransportRequest) -> Result<TransportResponse, AgentError> {
        // Per §4.4's B1-over-duplex rule: wait for the first frame whose
        // `id` matches and whose `type` is `result` or `error`; `chunk`
        // frames are not expected on a non-streaming call.
        let mut chunks = self.stream(request).await?;
        let mut last = serde_json::Value::Null;
        while let Some(chunk) = chunks.next().await {
            last = chunk?;
        }
        Ok(TransportResponse {
            status: 200,
            headers: Default::default(),
            body: last,
        })
    }

    async fn stream(&self, request: TransportRequest) -> Result<ChunkStream, AgentError> {
        let id = invoke_id(&request);
        let url = request.endpoint.clone();
        let state = Arc::new(StdMutex::new(ConnectionState::Init));

        transition(&state, &id, ConnectionState::Connecting);
        debug!(target: "agent.transport.duplex", id = %id, url = %url, "dialing");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(&url).await.map_err(|e| {
            transition(&state, &id, ConnectionState::Closed);
            warn!(target: "agent.transport.duplex", id = %id, url = %url, error = %e, "dial failed");
            AgentError::new(ErrorCode::NetworkError, format!("dialing '{url}' failed"))
                .with_source(e)
        })?;
        transition(&state, &id, ConnectionState::Open);

        let (write, read) = ws_stream.split();
        let write = Arc::new(AsyncMutex::new(write));

        transition(&state, &id, ConnectionState::Sending);
        let invoke_frame = Frame::Invoke {
            id: id.clone(),
            capability: request.capability.clone(),
            params: request.params.clone(),
        };
        let encoded = serde_json::to_string(&invoke_frame).map_err(|e| {
            AgentError::new(ErrorCode::InternalError, "encoding invoke frame").with_source(e)
        })?;
        write.lock().await.send(WsMessage::Text(encoded)).await.map_err(|e| {
            warn!(target: "agent.transport.duplex", id = %id, error = %e, "sending invoke frame failed");
            AgentError::new(ErrorCode::NetworkError, "sending invoke frame").with_source(e)
        })?;
        transition(&state, &id, ConnectionState::Open);
        debug!(target: "agent.transport.duplex", id = %id, capability = %request.capability, "invoke frame sent");
        transition(&state, &id, ConnectionState::Receiving);

        let done = Arc::new(AtomicBool::new(false));
        let expected_id = id.clone();
        let done_for_reader = done.clone();
        let chunks = read.filter_map(move |msg| {
            let expected_id = expected_id.clone();
            let done_for_reader = done_for_reader.clone();
            async move {
                let text = match msg {
                    Ok(WsMessage::Text(t)) => t,
                    Ok(WsMessage::Close(_)) => return None,
                    Ok(_) => return None,
                    Err(e) => {
                        return Some(Err(AgentError::new(
                            ErrorCode::NetworkError,
                            "reading duplex frame",
                        )
                        .with_source(e)))
                    }
                };
                let frame: Frame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        return Some(Err(AgentError::new(
                            ErrorCode::ValidationError,
                            "malformed duplex frame",
                        )
                        .with_source(e)))
                    }
                };
                match frame {
                    Frame::Chunk { id, value } if id == expected_id => Some(Ok(value)),
                    Frame::Result { id, value } if id == expected_id => {
                        done_for_reader.store(true, Ordering::SeqCst);
                        Some(Ok(value))
                    }
                    Frame::Error { id, problem } if id == expected_id => {
                        done_for_reader.store(true, Ordering::SeqCst);
                        warn!(
                            target: "agent.transport.duplex",
                            id = %id,
                            problem = %problem,
                            "remote reported an error frame"
                        );
                        Some(Err(AgentError::new(
                            ErrorCode::UpstreamError,
                            "remote reported a problem",
                        )
                        .with_context("problem", problem)))
                    }
                    _ => None,
                }
            }
        });

        let guard = CancelOnDrop { write, state, id, done };
        Ok(DuplexChunks { inner: chunks.boxed(), _guard: guard }.boxed())
    }

    async fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }
}
