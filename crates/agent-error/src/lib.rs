// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy and `ProblemDetail` envelope for the `agent://`
//! protocol core.
//!
//! Every failure produced by the URI engine, descriptor model, resolver,
//! transport bindings, or capability framework carries an [`ErrorCode`] drawn
//! from a single closed taxonomy (§7 of the protocol spec: 4xxx caller
//! faults, 5xxx system faults). [`AgentError`] is the in-process
//! representation; [`ProblemDetail`] is its wire form, modeled on RFC 7807
//! and embeddable in an `application/problem+json` body or a transport's
//! native error frame.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family an [`ErrorCode`] belongs to: caller fault or system fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 4xxx — the caller supplied bad input or lacks permission.
    CallerFault,
    /// 5xxx — the system failed to complete an otherwise valid request.
    SystemFault,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CallerFault => "caller_fault",
            Self::SystemFault => "system_fault",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code drawn from the protocol's taxonomy.
///
/// Each variant serializes to a `SCREAMING_SNAKE_CASE` string and carries a
/// fixed numeric code, HTTP-equivalent status, and category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// 4001 — grammar violation in a URI string.
    ParseError,
    /// 4002 — descriptor fails a validation rule.
    ValidationError,
    /// 4003 — no binding registered for a transport tag.
    UnknownTransport,
    /// 4004 — dispatcher lookup miss.
    CapabilityNotFound,
    /// 4005 — auth provider rejected the request.
    AuthenticationFailed,
    /// 4006 — capability forbids the caller.
    PermissionDenied,
    /// 4007 — input schema mismatch.
    InvalidInput,
    /// 4029 — server or client-side rate gate.
    RateLimited,
    /// 5001 — transport-level failure.
    NetworkError,
    /// 5002 — deadline exceeded.
    TimeoutError,
    /// 5003 — server returned a failure payload.
    UpstreamError,
    /// 5004 — all resolution strategies failed.
    ResolutionError,
    /// 5005 — uncategorized implementation fault.
    InternalError,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ParseError
            | Self::ValidationError
            | Self::UnknownTransport
            | Self::CapabilityNotFound
            | Self::AuthenticationFailed
            | Self::PermissionDenied
            | Self::InvalidInput
            | Self::RateLimited => ErrorCategory::CallerFault,

            Self::NetworkError
            | Self::TimeoutError
            | Self::UpstreamError
            | Self::ResolutionError
            | Self::InternalError => ErrorCategory::SystemFault,
        }
    }

    /// Stable numeric code (e.g. `4001`), per §7 of the protocol spec.
    pub fn numeric_code(&self) -> u16 {
        match self {
            Self::ParseError => 4001,
            Self::ValidationError => 4002,
            Self::UnknownTransport => 4003,
            Self::CapabilityNotFound => 4004,
            Self::AuthenticationFailed => 4005,
            Self::PermissionDenied => 4006,
            Self::InvalidInput => 4007,
            Self::RateLimited => 4029,
            Self::NetworkError => 5001,
            Self::TimeoutError => 5002,
            Self::UpstreamError => 5003,
            Self::ResolutionError => 5004,
            Self::InternalError => 5005,
        }
    }

    /// HTTP-equivalent status this code mirrors, even on non-HTTP transports.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ParseError => 400,
            Self::ValidationError => 422,
            Self::UnknownTransport => 400,
            Self::CapabilityNotFound => 404,
            Self::AuthenticationFailed => 401,
            Self::PermissionDenied => 403,
            Self::InvalidInput => 400,
            Self::RateLimited => 429,
            Self::NetworkError => 502,
            Self::TimeoutError => 504,
            Self::UpstreamError => 502,
            Self::ResolutionError => 502,
            Self::InternalError => 500,
        }
    }

    /// Stable `&'static str` representation (e.g. `"PARSE_ERROR"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::UnknownTransport => "UNKNOWN_TRANSPORT",
            Self::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::ResolutionError => "RESOLUTION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// A human-readable title suitable for [`ProblemDetail::title`].
    pub fn title(&self) -> &'static str {
        match self {
            Self::ParseError => "Malformed agent URI",
            Self::ValidationError => "Descriptor failed validation",
            Self::UnknownTransport => "Unknown transport tag",
            Self::CapabilityNotFound => "Capability not found",
            Self::AuthenticationFailed => "Authentication failed",
            Self::PermissionDenied => "Permission denied",
            Self::InvalidInput => "Invalid input",
            Self::RateLimited => "Rate limited",
            Self::NetworkError => "Network error",
            Self::TimeoutError => "Operation timed out",
            Self::UpstreamError => "Upstream error",
            Self::ResolutionError => "Resolution failed",
            Self::InternalError => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.numeric_code())
    }
}

// ---------------------------------------------------------------------------
// AgentError
// ---------------------------------------------------------------------------

/// Unified error type for the `agent://` protocol core.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use agent_error::{AgentError, ErrorCode};
///
/// let err = AgentError::new(ErrorCode::TimeoutError, "resolver fetch timed out")
///     .with_context("host", "acme.ai")
///     .with_context("timeout_ms", 5000);
/// ```
pub struct AgentError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl AgentError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialization
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Build the wire-level [`ProblemDetail`] for this error.
    ///
    /// `instance` is the URI of the resource that failed (an agent URI, a
    /// descriptor URL), when one is known.
    pub fn to_problem_detail(&self, instance: Option<&str>) -> ProblemDetail {
        ProblemDetail {
            r#type: format!(
                "urn:agent-protocol:error:{}",
                self.code.as_str().to_ascii_lowercase()
            ),
            title: self.code.title().to_string(),
            status: self.code.http_status(),
            detail: self.message.clone(),
            instance: instance.map(str::to_string),
            extensions: self.context.clone(),
        }
    }
}

impl fmt::Debug for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("AgentError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// ProblemDetail
// ---------------------------------------------------------------------------

/// RFC 7807-inspired error envelope, used as the body of
/// `application/problem+json` responses and wrapped inside non-HTTP
/// transports' native error frames (e.g. a B2 frame of `type: "error"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ProblemDetail {
    /// Stable URI identifying the error category.
    #[serde(rename = "type")]
    pub r#type: String,
    /// Short, human-readable summary.
    pub title: String,
    /// HTTP-equivalent status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    pub detail: String,
    /// URI of the failing resource, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Arbitrary extension members, flattened onto the JSON object.
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl ProblemDetail {
    /// Parse a `ProblemDetail` from a JSON body, returning `None` on any
    /// structural mismatch rather than failing the caller's own error path.
    pub fn parse(bytes: &[u8]) -> Option<ProblemDetail> {
        serde_json::from_slice(bytes).ok()
    }

    /// Synthesize a `ProblemDetail` for a binding that returned a non-2xx
    /// status with no parseable `application/problem+json` body.
    pub fn synthesize(code: ErrorCode, detail: impl Into<String>) -> ProblemDetail {
        AgentError::new(code, detail.into()).to_problem_detail(None)
    }
}

impl From<&AgentError> for ProblemDetail {
    fn from(err: &AgentError) -> Self {
        err.to_problem_detail(None)
    }
}

impl From<ProblemDetail> for AgentError {
    /// Lift a wire-level `ProblemDetail` back into an [`AgentError`], for a
    /// caller that received one from a remote binding. `type`/`title`/
    /// `status`/`detail` are preserved unchanged under the `"problem"`
    /// context key; `code` is [`ErrorCode::UpstreamError`] since the
    /// originating code's own taxonomy isn't recoverable from the wire form.
    fn from(problem: ProblemDetail) -> Self {
        AgentError::new(ErrorCode::UpstreamError, problem.detail.clone())
            .with_context("problem", problem)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
