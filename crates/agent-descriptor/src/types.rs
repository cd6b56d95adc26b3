// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed data model for the `agent.json` descriptor document.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Closed enums (§9: dynamic typing in the source becomes typed sum variants)
// ---------------------------------------------------------------------------

/// `interaction_model` — closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionModel {
    /// Agent-to-agent.
    Agent2Agent,
    /// FIPA agent communication language.
    FipaAcl,
    /// Knowledge query and manipulation language.
    Kqml,
    /// Contract-net protocol.
    ContractNet,
    /// No fixed protocol; behavior emerges from capability composition.
    Emergent,
}

/// `orchestration` — closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Orchestration {
    /// A single agent delegates to another.
    Delegation,
    /// Multiple agents compose into one logical capability.
    Composition,
    /// Agents coordinate through a shared protocol without a controller.
    Choreography,
    /// The agent operates independently of any orchestration.
    Standalone,
}

/// `authentication.schemes[*]` — closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AuthScheme {
    /// No authentication.
    None,
    /// RFC 6750 bearer token.
    Bearer,
    /// Static API key.
    ApiKey,
    /// OAuth2.
    OAuth2,
    /// JSON Web Token.
    JWT,
    /// Mutual TLS.
    #[serde(rename = "mTLS")]
    MTls,
}

/// `status` — closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Generally available.
    Active,
    /// Still supported but scheduled for removal.
    Deprecated,
    /// Not yet stable.
    Experimental,
    /// Early-access, may change without notice.
    Beta,
}

/// `capabilities[*].expected_output_variability` — closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutputVariability {
    /// Output is byte-identical for identical input.
    None,
    /// Minor formatting differences only.
    Low,
    /// Noticeable but bounded variation.
    Medium,
    /// Output may differ substantially between calls.
    High,
}

/// `capabilities[*].response_latency` — closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLatency {
    /// Sub-second typical response.
    Low,
    /// Seconds-scale typical response.
    Medium,
    /// Longer, possibly human-in-the-loop-scale response.
    High,
}

// ---------------------------------------------------------------------------
// Version — accepts string or number on input, stored canonicalized
// ---------------------------------------------------------------------------

/// A version string, accepted as either a JSON string or a JSON number on
/// input and always stored (and serialized) as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct Version(pub String);

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Num(serde_json::Number),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Str(s) => Version(s),
            Raw::Num(n) => Version(n.to_string()),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version(s.to_string())
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Version(s)
    }
}

// ---------------------------------------------------------------------------
// Nested records
// ---------------------------------------------------------------------------

/// `provider` nested record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Provider {
    /// Organization name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Provider homepage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `capabilities[*].content_types`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentTypes {
    /// Accepted input media types, in preference order.
    #[serde(default)]
    pub input: Vec<String>,
    /// Produced output media types, in preference order.
    #[serde(default)]
    pub output: Vec<String>,
}

/// One worked example for a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Example {
    /// Example input payload.
    pub input: serde_json::Value,
    /// Example output payload.
    pub output: serde_json::Value,
    /// Optional prose description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `skills[*]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Skill {
    /// Unique (within the descriptor) skill identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `authentication`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Authentication {
    /// Accepted authentication schemes.
    #[serde(default)]
    pub schemes: Vec<AuthScheme>,
    /// Opaque scheme-specific configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A named function or behavior advertised by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Capability {
    /// Capability name — unique within the descriptor together with
    /// `version`.
    pub name: String,
    /// Optional capability version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Prose description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque JSON Schema for input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// Opaque JSON Schema for output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Whether identical input always produces identical output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deterministic: Option<bool>,
    /// How much output varies across calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output_variability: Option<ExpectedOutputVariability>,
    /// Accepted/produced media types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_types: Option<ContentTypes>,
    /// Whether the capability needs caller-supplied context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_context: Option<bool>,
    /// Whether the capability remembers state across calls (§4.5 sessions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_enabled: Option<bool>,
    /// Typical response latency bucket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_latency: Option<ResponseLatency>,
    /// Whether the capability supports `stream()`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the capability is deprecated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
    /// Why the capability is deprecated, if it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_reason: Option<String>,
    /// Worked examples.
    #[serde(default)]
    pub examples: Vec<Example>,
}

impl Capability {
    /// Start building a capability with only the required field set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            description: None,
            input_schema: None,
            output_schema: None,
            is_deterministic: None,
            expected_output_variability: None,
            content_types: None,
            requires_context: None,
            memory_enabled: None,
            response_latency: None,
            streaming: None,
            tags: Vec::new(),
            deprecated: None,
            deprecated_reason: None,
            examples: Vec::new(),
        }
    }

    /// Fluent setter for `description`.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Fluent setter for `streaming`.
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = Some(streaming);
        self
    }

    /// Fluent setter for `tags`.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// AgentDescriptor
// ---------------------------------------------------------------------------

/// The self-describing `agent.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentDescriptor {
    /// Agent name — required, non-empty (V1).
    pub name: String,
    /// Version, accepted as string or number, stored as string (V2).
    pub version: Version,
    /// Capabilities — required, non-empty, unique by `(name, version)` (V3, V4).
    pub capabilities: Vec<Capability>,
    /// Prose description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Agent home URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Provider/organization metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    /// Documentation URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    /// Interaction model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_model: Option<InteractionModel>,
    /// Orchestration style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<Orchestration>,
    /// Media types accepted as message envelopes.
    #[serde(default)]
    pub envelope_schemas: Vec<String>,
    /// version → endpoint-path mapping (V7).
    #[serde(default)]
    pub supported_versions: BTreeMap<String, String>,
    /// Authentication configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,
    /// Advertised skills, `id` unique (V9).
    #[serde(default)]
    pub skills: Vec<Skill>,
    /// transport-tag → absolute URL mapping (V6).
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    /// Lifecycle status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Terms of service URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    /// Privacy policy URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<String>,
    /// Contact information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Opaque JSON-LD `@context`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonld_context: Option<serde_json::Value>,
}

impl AgentDescriptor {
    /// Start building a descriptor with only the required fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<Version>,
        capabilities: Vec<Capability>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            capabilities,
            description: None,
            url: None,
            provider: None,
            documentation_url: None,
            interaction_model: None,
            orchestration: None,
            envelope_schemas: Vec::new(),
            supported_versions: BTreeMap::new(),
            authentication: None,
            skills: Vec::new(),
            endpoints: BTreeMap::new(),
            status: None,
            terms_of_service: None,
            privacy: None,
            contact: None,
            jsonld_context: None,
        }
    }
}
