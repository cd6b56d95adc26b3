// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concrete [`Transport`](crate::Transport) bindings.
//!
//! - [`http`] — B1, pooled request/response over HTTP(S).
//! - [`duplex`] — B2, full-duplex streaming over a persistent WebSocket.
//! - [`inprocess`] — B3, direct in-process dispatch with no wire format.

pub mod duplex;
pub mod http;
pub mod inprocess;
