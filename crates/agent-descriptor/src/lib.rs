// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed data model, validator, and cross-format mapper for the
//! self-describing `agent.json` descriptor document (§4.2 of the protocol).
//!
//! [`parse`] deserializes and validates a descriptor in one step;
//! [`serialize`] writes it back out either in its native shape or wrapped in
//! a minimal JSON-LD envelope; [`to_external`]/[`from_external`] map to and
//! from other descriptor formats (currently just `"agent-card"`, a lossy
//! mapping — see [`agent_card`]).
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent_card;
mod types;
mod validate;

pub use agent_card::{
    from_agent_card, is_format_compatible, to_agent_card, AgentCard, CardAuthentication,
    CardProvider, CardSkill,
};
pub use types::{
    AgentDescriptor, AuthScheme, Authentication, Capability, ContentTypes, Example,
    ExpectedOutputVariability, InteractionModel, Orchestration, Provider, ResponseLatency, Skill,
    Status, Version,
};
pub use validate::{validate, ValidationError, ValidationResult};

use agent_error::{AgentError, ErrorCode};

/// Everything that can go wrong loading, parsing, or re-emitting a
/// descriptor.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// The bytes were not valid JSON, or not shaped like a descriptor at all.
    #[error("malformed descriptor: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The descriptor parsed but failed one or more validation rules.
    #[error("descriptor failed validation: {} error(s)", .0.errors.len())]
    Invalid(ValidationResult),
    /// `format_hint` or a format name passed to [`to_external`]/[`from_external`]
    /// names a format this crate does not know how to produce or consume.
    #[error("unsupported descriptor format '{0}'")]
    UnsupportedFormat(String),
    /// Reading the descriptor from its source location failed.
    #[error("failed to read descriptor from '{path}': {source}")]
    Io {
        /// The path or URI that could not be read.
        path: String,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl From<DescriptorError> for AgentError {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::Malformed(e) => {
                AgentError::new(ErrorCode::ValidationError, "malformed descriptor JSON")
                    .with_source(e)
            }
            DescriptorError::Invalid(result) => {
                AgentError::new(ErrorCode::ValidationError, "descriptor failed validation")
                    .with_context("errors", &result.errors)
            }
            DescriptorError::UnsupportedFormat(fmt) => AgentError::new(
                ErrorCode::InvalidInput,
                format!("unsupported descriptor format '{fmt}'"),
            ),
            DescriptorError::Io { path, source } => {
                AgentError::new(ErrorCode::ResolutionError, format!("failed to read '{path}'"))
                    .with_source(source)
            }
        }
    }
}

/// How a descriptor should be rendered by [`serialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    /// The descriptor's own native JSON shape.
    Canonical,
    /// Wrapped in a minimal JSON-LD envelope using `jsonld_context` (or a
    /// default context when the descriptor doesn't carry one).
    JsonLd,
}

/// Deserialize and validate a descriptor document in one step.
///
/// Returns [`DescriptorError::Malformed`] if `bytes` isn't valid descriptor
/// JSON, or [`DescriptorError::Invalid`] if it parses but fails V1–V9.
pub fn parse(bytes: &[u8]) -> Result<AgentDescriptor, DescriptorError> {
    let descriptor: AgentDescriptor = serde_json::from_slice(bytes)?;
    let result = validate(&descriptor);
    if !result.valid {
        return Err(DescriptorError::Invalid(result));
    }
    Ok(descriptor)
}

/// Serialize a descriptor, either canonically or wrapped in JSON-LD.
pub fn serialize(
    descriptor: &AgentDescriptor,
    format: FormatHint,
) -> Result<Vec<u8>, DescriptorError> {
    match format {
        FormatHint::Canonical => Ok(serde_json::to_vec_pretty(descriptor)?),
        FormatHint::JsonLd => {
            let mut value = serde_json::to_value(descriptor)?;
            if let serde_json::Value::Object(ref mut map) = value {
                let context = descriptor
                    .jsonld_context
                    .clone()
                    .unwrap_or_else(|| serde_json::json!("https://agent-protocol.dev/ns/v1"));
                map.insert("@context".to_string(), context);
                map.insert("@type".to_string(), serde_json::json!("Agent"));
            }
            Ok(serde_json::to_vec_pretty(&value)?)
        }
    }
}

/// Load and parse a descriptor from a local path or `file://` URI.
///
/// Loading over `https://` is the resolver's job (it needs caching and
/// conditional-request support); this function only ever touches the local
/// filesystem.
pub fn load_from_source(source: &str) -> Result<AgentDescriptor, DescriptorError> {
    let path = source.strip_prefix("file://").unwrap_or(source);
    let bytes = std::fs::read(path).map_err(|source| DescriptorError::Io {
        path: path.to_string(),
        source,
    })?;
    parse(&bytes)
}

/// Map a descriptor onto an external format, by name.
///
/// Only `"agent-card"` is currently supported.
pub fn to_external(
    descriptor: &AgentDescriptor,
    format: &str,
) -> Result<serde_json::Value, DescriptorError> {
    match format {
        "agent-card" => Ok(serde_json::to_value(to_agent_card(descriptor))?),
        other => Err(DescriptorError::UnsupportedFormat(other.to_string())),
    }
}

/// Reconstruct a descriptor from an external format's JSON representation.
///
/// Only `"agent-card"` is currently supported; the result is not validated
/// automatically since agent-card data is known to be incomplete relative
/// to the native shape — callers that need a fully valid descriptor should
/// run [`validate`] on the result themselves.
pub fn from_external(
    value: &serde_json::Value,
    format: &str,
) -> Result<AgentDescriptor, DescriptorError> {
    match format {
        "agent-card" => {
            let card: AgentCard = serde_json::from_value(value.clone())?;
            Ok(from_agent_card(&card))
        }
        other => Err(DescriptorError::UnsupportedFormat(other.to_string())),
    }
}
