// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lossy mapping to and from the "agent-card" external format (§4.2).
//!
//! `descriptor.name → card.name`; `description`/`url` copy straight across;
//! `provider.organization → provider.organization`; each capability becomes
//! one skill (`capability.description → skill.description`,
//! `capability.tags` concatenated into `skill.tags`);
//! `authentication.schemes` maps by identity. The reverse mapping
//! synthesizes capabilities from skills with default metadata — it cannot
//! recover `input_schema`, `output_schema`, `streaming`, or any of the other
//! capability-only fields, so a round trip through agent-card is lossy.

use crate::types::{
    Authentication, Capability, AgentDescriptor, Provider, Skill, Version,
};
use serde::{Deserialize, Serialize};

/// The external "agent-card" shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    /// Agent name.
    pub name: String,
    /// Prose description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Agent URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Provider metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<CardProvider>,
    /// One entry per descriptor capability.
    #[serde(default)]
    pub skills: Vec<CardSkill>,
    /// Authentication schemes, by identity with the descriptor's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<CardAuthentication>,
}

/// `provider` as represented on an agent card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardProvider {
    /// Organization name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

/// `authentication` as represented on an agent card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardAuthentication {
    /// Scheme names, identity-mapped from the descriptor's closed set.
    #[serde(default)]
    pub schemes: Vec<String>,
}

/// One skill on an agent card — the capability-to-skill projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardSkill {
    /// Mirrors `capability.name`.
    pub name: String,
    /// Mirrors `capability.description`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Mirrors `capability.tags`.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Project an [`AgentDescriptor`] onto the external agent-card shape.
///
/// This mapping is lossy in one direction only (descriptor → card drops
/// nothing the card can represent); the reverse direction
/// ([`from_agent_card`]) is where information is actually lost.
pub fn to_agent_card(descriptor: &AgentDescriptor) -> AgentCard {
    AgentCard {
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        url: descriptor.url.clone(),
        provider: descriptor.provider.as_ref().map(|p| CardProvider {
            organization: p.organization.clone(),
        }),
        skills: descriptor
            .capabilities
            .iter()
            .map(|cap| CardSkill {
                name: cap.name.clone(),
                description: cap.description.clone(),
                tags: cap.tags.clone(),
            })
            .collect(),
        authentication: descriptor.authentication.as_ref().map(|auth| {
            CardAuthentication {
                schemes: auth
                    .schemes
                    .iter()
                    .map(|s| format!("{s:?}"))
                    .collect(),
            }
        }),
    }
}

/// Reconstruct an [`AgentDescriptor`] from an agent card.
///
/// Capabilities are synthesized from skills with default metadata
/// (`version = None`, no schemas, `streaming = None`, …) — this direction is
/// lossy and MUST NOT be treated as recovering the original descriptor.
pub fn from_agent_card(card: &AgentCard) -> AgentDescriptor {
    let capabilities = card
        .skills
        .iter()
        .map(|skill| {
            let mut cap = Capability::new(skill.name.clone());
            cap.description = skill.description.clone();
            cap.tags = skill.tags.clone();
            cap
        })
        .collect::<Vec<_>>();

    let mut descriptor = AgentDescriptor::new(
        card.name.clone(),
        Version("0.0.0".to_string()),
        capabilities,
    );
    descriptor.description = card.description.clone();
    descriptor.url = card.url.clone();
    descriptor.provider = card.provider.as_ref().map(|p| Provider {
        organization: p.organization.clone(),
        url: None,
    });
    descriptor.authentication = card.authentication.as_ref().map(|auth| Authentication {
        schemes: Vec::new(), // scheme name strings are not recoverable into the closed enum without a table; left empty.
        details: Some(serde_json::json!({ "raw_schemes": auth.schemes })),
    });
    descriptor
}

/// Whether `descriptor` can be represented in `format` without silently
/// dropping any field the format has no slot for.
///
/// Currently only `"agent-card"` is recognized; anything else is never
/// compatible.
pub fn is_format_compatible(descriptor: &AgentDescriptor, format: &str) -> bool {
    if format != "agent-card" {
        return false;
    }
    // A capability carrying an input/output schema, streaming flag, or
    // examples cannot be expressed on an agent-card skill.
    descriptor.capabilities.iter().all(|cap| {
        cap.input_schema.is_none()
            && cap.output_schema.is_none()
            && cap.streaming.is_none()
            && cap.examples.is_empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthScheme, Skill};

    fn sample_descriptor() -> AgentDescriptor {
        let mut cap = Capability::new("gen-iti").with_description("generate an itinerary");
        cap.tags = vec!["travel".into(), "planning".into()];
        let mut descriptor = AgentDescriptor::new("acme-planner", "1.0", vec![cap]);
        descriptor.description = Some("Plans trips".into());
        descriptor.url = Some("https://acme.ai".into());
        descriptor.provider = Some(Provider {
            organization: Some("Acme".into()),
            url: None,
        });
        descriptor.authentication = Some(Authentication {
            schemes: vec![AuthScheme::Bearer],
            details: None,
        });
        descriptor
    }

    #[test]
    fn to_agent_card_maps_name_description_url() {
        let card = to_agent_card(&sample_descriptor());
        assert_eq!(card.name, "acme-planner");
        assert_eq!(card.description.as_deref(), Some("Plans trips"));
        assert_eq!(card.url.as_deref(), Some("https://acme.ai"));
    }

    #[test]
    fn to_agent_card_maps_provider_organization() {
        let card = to_agent_card(&sample_descriptor());
        assert_eq!(
            card.provider.unwrap().organization.as_deref(),
            Some("Acme")
        );
    }

    #[test]
    fn to_agent_card_maps_one_capability_to_one_skill() {
        let card = to_agent_card(&sample_descriptor());
        assert_eq!(card.skills.len(), 1);
        assert_eq!(card.skills[0].name, "gen-iti");
        assert_eq!(
            card.skills[0].description.as_deref(),
            Some("generate an itinerary")
        );
        assert_eq!(card.skills[0].tags, vec!["travel", "planning"]);
    }

    #[test]
    fn from_agent_card_synthesizes_capabilities_from_skills() {
        let card = AgentCard {
            name: "acme-planner".into(),
            skills: vec![CardSkill {
                name: "gen-iti".into(),
                description: Some("generate an itinerary".into()),
                tags: vec!["travel".into()],
            }],
            ..Default::default()
        };
        let descriptor = from_agent_card(&card);
        assert_eq!(descriptor.name, "acme-planner");
        assert_eq!(descriptor.capabilities.len(), 1);
        assert_eq!(descriptor.capabilities[0].name, "gen-iti");
        assert!(descriptor.capabilities[0].input_schema.is_none());
    }

    #[test]
    fn round_trip_through_agent_card_is_lossy() {
        let original = sample_descriptor();
        let card = to_agent_card(&original);
        let reconstructed = from_agent_card(&card);
        // Name and skill projection survive...
        assert_eq!(reconstructed.name, original.name);
        // ...but capability-only fields and the real version do not.
        assert_ne!(reconstructed.version, original.version);
        assert!(reconstructed.capabilities[0].input_schema.is_none());
    }

    #[test]
    fn is_format_compatible_true_for_plain_capabilities() {
        assert!(is_format_compatible(&sample_descriptor(), "agent-card"));
    }

    #[test]
    fn is_format_compatible_false_when_capability_has_a_schema() {
        let mut d = sample_descriptor();
        d.capabilities[0].input_schema = Some(serde_json::json!({"type": "object"}));
        assert!(!is_format_compatible(&d, "agent-card"));
    }

    #[test]
    fn is_format_compatible_false_for_unknown_format() {
        assert!(!is_format_compatible(&sample_descriptor(), "openapi"));
    }

    #[test]
    fn skill_with_duplicate_name_is_tolerated_card_side() {
        // agent-card has no uniqueness constraint of its own; V9 only binds
        // the descriptor's native `skills` array, not the card projection.
        let mut card = AgentCard {
            name: "x".into(),
            ..Default::default()
        };
        card.skills.push(Skill {
            id: "ignored".into(),
            name: "a".into(),
            description: None,
        }
        .into());
        assert_eq!(card.skills.len(), 1);
    }
}

impl From<Skill> for CardSkill {
    fn from(skill: Skill) -> Self {
        CardSkill {
            name: skill.name,
            description: skill.description,
            tags: Vec::new(),
        }
    }
}
