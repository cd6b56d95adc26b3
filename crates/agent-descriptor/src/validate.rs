// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validation rules V1–V9 from §4.2 of the protocol spec.

use crate::types::AgentDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single validation failure: a JSON-pointer path, a stable code, and a
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// JSON-pointer path to the offending field.
    pub path: String,
    /// Stable, machine-readable rule code (`"V1"` .. `"V9"`).
    pub code: &'static str,
    /// Human-readable explanation.
    pub message: String,
}

/// The outcome of validating a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the descriptor passed every rule.
    pub valid: bool,
    /// Every rule violation found, in rule order.
    pub errors: Vec<ValidationError>,
}

fn looks_semver_ish(s: &str) -> bool {
    let mut parts = s.split('.');
    let Some(major) = parts.next() else {
        return false;
    };
    !major.is_empty()
        && major.chars().all(|c| c.is_ascii_digit())
        && parts.all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit() || c == '-'))
}

fn endpoint_scheme_for_tag(tag: &str) -> Option<&'static str> {
    match tag {
        "https" => Some("https"),
        "wss" => Some("wss"),
        "ws" => Some("ws"),
        "http" => Some("http"),
        "local" => Some("local"),
        "unix" => Some("unix"),
        "matrix" => Some("matrix"),
        "grpc" => Some("grpc"),
        _ => None,
    }
}

/// Validate a descriptor against V1–V9, collecting every violation rather
/// than stopping at the first.
pub fn validate(descriptor: &AgentDescriptor) -> ValidationResult {
    let mut errors = Vec::new();

    // V1 — name present and non-empty.
    if descriptor.name.trim().is_empty() {
        errors.push(ValidationError {
            path: "/name".into(),
            code: "V1",
            message: "name must be present and non-empty".into(),
        });
    }

    // V2 — version present (canonicalization already happened at parse time;
    // here we only check it isn't blank).
    if descriptor.version.0.trim().is_empty() {
        errors.push(ValidationError {
            path: "/version".into(),
            code: "V2",
            message: "version must be present and non-empty".into(),
        });
    }

    // V3 — capabilities present and non-empty.
    if descriptor.capabilities.is_empty() {
        errors.push(ValidationError {
            path: "/capabilities".into(),
            code: "V3",
            message: "capabilities must be non-empty".into(),
        });
    }

    // V4 — each capability has a non-empty name; names unique within the
    // descriptor (by name + version).
    let mut seen_caps = HashSet::new();
    for (i, cap) in descriptor.capabilities.iter().enumerate() {
        if cap.name.trim().is_empty() {
            errors.push(ValidationError {
                path: format!("/capabilities/{i}/name"),
                code: "V4",
                message: "capability name must be non-empty".into(),
            });
            continue;
        }
        let key = (cap.name.clone(), cap.version.clone());
        if !seen_caps.insert(key) {
            errors.push(ValidationError {
                path: format!("/capabilities/{i}/name"),
                code: "V4",
                message: format!(
                    "duplicate capability name '{}' (version {:?})",
                    cap.name, cap.version
                ),
            });
        }
    }

    // V5 — enum fields are enforced by the type system at deserialize time;
    // nothing further to check here for an already-typed descriptor.

    // V6 — endpoints values are absolute URIs with a scheme matching the key.
    for (tag, url) in &descriptor.endpoints {
        match endpoint_scheme_for_tag(tag) {
            Some(scheme) => {
                let prefix = format!("{scheme}:");
                if !url.starts_with(&prefix) {
                    errors.push(ValidationError {
                        path: format!("/endpoints/{tag}"),
                        code: "V6",
                        message: format!("endpoint for '{tag}' must use the '{scheme}' scheme"),
                    });
                }
            }
            None => errors.push(ValidationError {
                path: format!("/endpoints/{tag}"),
                code: "V6",
                message: format!("unrecognized transport tag '{tag}'"),
            }),
        }
    }

    // V7 — supported_versions keys match a semver-like shape.
    for key in descriptor.supported_versions.keys() {
        if !looks_semver_ish(key) {
            errors.push(ValidationError {
                path: format!("/supported_versions/{key}"),
                code: "V7",
                message: format!("'{key}' is not a semver-like version"),
            });
        }
    }

    // V8 — authentication.schemes are enforced by the type system.
    let _ = &descriptor.authentication;

    // V9 — skills[*].id unique.
    let mut seen_skills = HashSet::new();
    for (i, skill) in descriptor.skills.iter().enumerate() {
        if !seen_skills.insert(skill.id.clone()) {
            errors.push(ValidationError {
                path: format!("/skills/{i}/id"),
                code: "V9",
                message: format!("duplicate skill id '{}'", skill.id),
            });
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capability, Skill};

    fn minimal() -> AgentDescriptor {
        AgentDescriptor::new("acme-planner", "1.0", vec![Capability::new("gen-iti")])
    }

    #[test]
    fn minimal_descriptor_passes_all_rules() {
        let result = validate(&minimal());
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn v1_rejects_empty_name() {
        let mut d = minimal();
        d.name = "  ".into();
        let result = validate(&d);
        assert!(result.errors.iter().any(|e| e.code == "V1"));
    }

    #[test]
    fn v3_rejects_empty_capabilities() {
        let mut d = minimal();
        d.capabilities.clear();
        let result = validate(&d);
        assert!(result.errors.iter().any(|e| e.code == "V3"));
    }

    #[test]
    fn v4_rejects_duplicate_capability_names() {
        let mut d = minimal();
        d.capabilities.push(Capability::new("gen-iti"));
        let result = validate(&d);
        assert!(result.errors.iter().any(|e| e.code == "V4"));
    }

    #[test]
    fn v4_allows_same_name_different_version() {
        let mut d = minimal();
        let mut v2 = Capability::new("gen-iti");
        v2.version = Some("2.0".into());
        d.capabilities.push(v2);
        let result = validate(&d);
        assert!(!result.errors.iter().any(|e| e.code == "V4"));
    }

    #[test]
    fn v6_rejects_scheme_mismatch() {
        let mut d = minimal();
        d.endpoints.insert("https".into(), "http://acme.ai/x".into());
        let result = validate(&d);
        assert!(result.errors.iter().any(|e| e.code == "V6"));
    }

    #[test]
    fn v6_accepts_matching_scheme() {
        let mut d = minimal();
        d.endpoints
            .insert("wss".into(), "wss://acme.ai/chat".into());
        let result = validate(&d);
        assert!(!result.errors.iter().any(|e| e.code == "V6"));
    }

    #[test]
    fn v7_rejects_non_semver_key() {
        let mut d = minimal();
        d.supported_versions
            .insert("latest".into(), "/v-latest/agent.json".into());
        let result = validate(&d);
        assert!(result.errors.iter().any(|e| e.code == "V7"));
    }

    #[test]
    fn v7_accepts_semver_key() {
        let mut d = minimal();
        d.supported_versions
            .insert("1.2.3".into(), "/v1/agent.json".into());
        let result = validate(&d);
        assert!(!result.errors.iter().any(|e| e.code == "V7"));
    }

    #[test]
    fn v9_rejects_duplicate_skill_ids() {
        let mut d = minimal();
        d.skills.push(Skill {
            id: "s1".into(),
            name: "Skill One".into(),
            description: None,
        });
        d.skills.push(Skill {
            id: "s1".into(),
            name: "Skill One Again".into(),
            description: None,
        });
        let result = validate(&d);
        assert!(result.errors.iter().any(|e| e.code == "V9"));
    }

    #[test]
    fn validation_collects_every_violation_not_just_the_first() {
        let mut d = minimal();
        d.name = "".into();
        d.capabilities.clear();
        let result = validate(&d);
        assert!(result.errors.iter().any(|e| e.code == "V1"));
        assert!(result.errors.iter().any(|e| e.code == "V3"));
    }
}
