// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server-side capability registry and dispatcher, layered on top of the
//! transport bindings in `agent-transport`.
//!
//! A capability is registered once at startup with its design-time metadata
//! and a handler; [`CapabilityRegistry::dispatch`] turns an incoming
//! [`agent_transport::TransportRequest`] into a call against that handler,
//! handling input validation, auth enforcement, and per-session state.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod registry;
mod session;

pub use registry::{
    AgentMeta, CapabilityError, CapabilityHandler, CapabilityRecord, CapabilityRegistry,
    DispatchContext, DispatchOutcome, HandlerOutcome,
};
pub use session::{SessionState, SessionStore};
