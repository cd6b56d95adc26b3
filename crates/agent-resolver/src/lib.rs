// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cache-aware resolution of `agent://` URIs to an endpoint and, when
//! available, a descriptor (§4.3 of the protocol).
//!
//! [`Resolver::resolve`] walks the fixed resolution order — explicit
//! transport, subdomain well-known, multi-agent registry, single-agent
//! well-known, path-based, direct fallback — halting on the first strategy
//! that succeeds. Descriptor fetches go through a [`cache::CacheProvider`],
//! which honors `ETag`/`Last-Modified`/`max-age` and de-duplicates concurrent
//! revalidation probes for the same URL.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod fetch;

pub use cache::{now_epoch, CacheEntry, CacheProvider, InMemoryCache};
pub use fetch::{Conditional, DescriptorFetcher, FetchOutcome, HttpDescriptorFetcher};

use agent_config::AgentConfig;
use agent_descriptor::{AgentDescriptor, ValidationError};
use agent_error::{AgentError, ErrorCode};
use agent_uri::AgentUri;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Which resolution strategy produced a [`ResolutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMethod {
    /// The URI carried an explicit transport tag.
    Explicit,
    /// `<host>/.well-known/agent.json`, reached via the subdomain heuristic.
    SubdomainWellKnown,
    /// `<host>/.well-known/agents.json`, looked up by path segment.
    MultiAgentRegistry,
    /// `<host>/.well-known/agent.json`, reached unconditionally.
    SingleAgentWellKnown,
    /// `<host>/<first-segment>/agent.json`.
    PathBased,
    /// No descriptor found; only a synthesized endpoint is returned.
    DirectFallback,
}

/// Cache provenance for a [`ResolutionResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// `ETag` of the descriptor that was used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// `Last-Modified` of the descriptor that was used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Unix epoch seconds after which the entry must be revalidated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Whether the descriptor was served without a network call.
    pub from_cache: bool,
}

/// The outcome of resolving an [`AgentUri`].
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    /// The descriptor, when one was found.
    pub descriptor: Option<AgentDescriptor>,
    /// Fully qualified wire address to invoke against.
    pub endpoint: String,
    /// Transport tag the endpoint should be dispatched through.
    pub transport_tag: String,
    /// Which strategy produced this result.
    pub resolution_method: ResolutionMethod,
    /// Cache provenance of the descriptor fetch, if any occurred.
    pub cache_metadata: CacheMetadata,
}

/// Options controlling a single [`Resolver::resolve`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// When the URI has an explicit transport tag, also attempt descriptor
    /// discovery (steps 2–6) instead of stopping at step 1.
    pub force_descriptor_fetch: bool,
    /// Treat `host` as an agent host even if it doesn't have the
    /// three-label shape the subdomain heuristic otherwise requires.
    pub treat_as_agent_host: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures produced during resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// No strategy produced a descriptor and the URI had no explicit
    /// transport tag.
    #[error("no agent descriptor found for '{host}'")]
    NotFound {
        /// The host that was probed.
        host: String,
    },
    /// A fetch exceeded its deadline.
    #[error("resolution of '{host}' timed out")]
    Timeout {
        /// The host that was probed.
        host: String,
    },
    /// A transport-level failure occurred talking to a well-known endpoint.
    #[error("network error resolving '{host}': {message}")]
    Network {
        /// The host that was probed.
        host: String,
        /// Underlying failure description.
        message: String,
    },
    /// A descriptor was fetched but failed validation.
    #[error("descriptor at '{url}' failed validation ({} error(s))", .errors.len())]
    Validation {
        /// The URL the descriptor was fetched from.
        url: String,
        /// The validation failures.
        errors: Vec<ValidationError>,
    },
    /// The URI used a transport tag with no fixed scheme mapping and no
    /// descriptor override.
    #[error("unknown transport tag '{tag}'")]
    UnknownTransport {
        /// The offending tag.
        tag: String,
    },
    /// Catch-all for malformed well-known responses (e.g. `agents.json`
    /// that isn't a JSON object).
    #[error("resolution failed: {reason}")]
    Malformed {
        /// Human-readable explanation.
        reason: String,
    },
}

impl From<ResolverError> for AgentError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::NotFound { host } => {
                AgentError::new(ErrorCode::ResolutionError, "no agent descriptor found")
                    .with_context("host", host)
            }
            ResolverError::Timeout { host } => {
                AgentError::new(ErrorCode::TimeoutError, "resolution timed out")
                    .with_context("host", host)
            }
            ResolverError::Network { host, message } => {
                AgentError::new(ErrorCode::NetworkError, message).with_context("host", host)
            }
            ResolverError::Validation { url, errors } => {
                AgentError::new(ErrorCode::ValidationError, "descriptor failed validation")
                    .with_context("url", url)
                    .with_context("errors", &errors)
            }
            ResolverError::UnknownTransport { tag } => AgentError::new(
                ErrorCode::UnknownTransport,
                format!("unknown transport tag '{tag}'"),
            ),
            ResolverError::Malformed { reason } => {
                AgentError::new(ErrorCode::ResolutionError, reason)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint synthesis
// ---------------------------------------------------------------------------

/// Render `userinfo@host:port` from an [`AgentUri`] (it has no combined
/// accessor of its own — only the individual components).
fn authority_string(uri: &AgentUri) -> String {
    let mut s = String::new();
    if let Some(userinfo) = uri.userinfo() {
        s.push_str(userinfo);
        s.push('@');
    }
    s.push_str(uri.host());
    if let Some(port) = uri.port() {
        s.push(':');
        s.push_str(&port.to_string());
    }
    s
}

/// Render `/seg1/seg2` from an [`AgentUri`]'s path segments.
fn path_string(uri: &AgentUri) -> String {
    if uri.path_segments().is_empty() {
        String::new()
    } else {
        format!("/{}", uri.path_segments().join("/"))
    }
}

/// Fixed transport-tag → scheme table (§4.3, endpoint synthesis rule).
fn scheme_for_tag(tag: &str) -> Option<&'static str> {
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

fn synthesize_direct_endpoint(uri: &AgentUri, tag: &str) -> Result<String, ResolverError> {
    if scheme_for_tag(tag).is_none() {
        return Err(ResolverError::UnknownTransport {
            tag: tag.to_string(),
        });
    }
    Ok(format!("{tag}://{}{}", authority_string(uri), path_string(uri)))
}

/// Pick an endpoint from a resolved descriptor: prefer an override for
/// `preferred_tag` in `descriptor.endpoints`, else the lexicographically
/// first entry (a `BTreeMap`, so this is deterministic), else fall back to
/// a plain `https://<host><path>`.
fn endpoint_from_descriptor(
    descriptor: &AgentDescriptor,
    uri: &AgentUri,
    preferred_tag: Option<&str>,
) -> (String, String) {
    if let Some(tag) = preferred_tag {
        if let Some(url) = descriptor.endpoints.get(tag) {
            return (url.clone(), tag.to_string());
        }
    }
    if let Some((tag, url)) = descriptor.endpoints.iter().next() {
        return (url.clone(), tag.clone());
    }
    (
        format!("https://{}{}", authority_string(uri), path_string(uri)),
        "https".to_string(),
    )
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves `agent://` URIs to endpoints and descriptors, caching descriptor
/// fetches across calls.
pub struct Resolver {
    cache: Arc<dyn CacheProvider>,
    fetcher: Arc<dyn DescriptorFetcher>,
    default_ttl_s: u64,
    inflight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Resolver {
    /// Build a resolver from explicit cache and fetcher implementations.
    pub fn new(
        cache: Arc<dyn CacheProvider>,
        fetcher: Arc<dyn DescriptorFetcher>,
        default_ttl_s: u64,
    ) -> Self {
        Self {
            cache,
            fetcher,
            default_ttl_s,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Build a resolver with the stock in-memory cache and HTTPS fetcher,
    /// sized from `config`.
    pub fn with_config(config: &AgentConfig) -> Self {
        Self::new(
            Arc::new(InMemoryCache::new(config.cache_max_entries)),
            Arc::new(HttpDescriptorFetcher::new()),
            config.cache_ttl_default_s,
        )
    }

    /// Drop every cached descriptor.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop the cached descriptor for a single URL.
    pub fn clear_cache_for(&self, url: &str) {
        self.cache.remove(url);
    }

    async fn dedup_lock(&self, url: &str) -> Arc<AsyncMutex<()>> {
        let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
        inflight
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Fetch `url`, honoring the cache: serve fresh entries without a
    /// network call, revalidate stale ones, and de-duplicate concurrent
    /// revalidations of the same URL.
    async fn get_or_fetch(
        &self,
        url: &str,
    ) -> Result<Option<(Vec<u8>, CacheMetadata)>, ResolverError> {
        let lock = self.dedup_lock(url).await;
        let _guard = lock.lock().await;

        let now = now_epoch();
        if let Some(cached) = self.cache.get(url) {
            if cached.is_fresh(now) {
                debug!(target: "agent.resolver.cache", url = %url, "serving fresh cache entry");
                return Ok(Some((
                    cached.body_bytes,
                    CacheMetadata {
                        etag: cached.etag,
                        last_modified: cached.last_modified,
                        expires_at: Some(cached.expires_at_epoch),
                        from_cache: true,
                    },
                )));
            }

            debug!(target: "agent.resolver.cache", url = %url, "revalidating stale cache entry");
            let conditional = Conditional {
                if_none_match: cached.etag.clone(),
                if_modified_since: cached.last_modified.clone(),
            };
            let outcome = self.fetch(url, Some(conditional)).await?;
            return match outcome {
                FetchOutcome::NotModified { max_age_s } => {
                    let expires_at_epoch = now + max_age_s.unwrap_or(self.default_ttl_s);
                    let refreshed = CacheEntry {
                        expires_at_epoch,
                        stored_at_epoch: now,
                        ..cached
                    };
                    self.cache.put(url, refreshed.clone());
                    Ok(Some((
                        refreshed.body_bytes,
                        CacheMetadata {
                            etag: refreshed.etag,
                            last_modified: refreshed.last_modified,
                            expires_at: Some(expires_at_epoch),
                            from_cache: false,
                        },
                    )))
                }
                FetchOutcome::Fresh {
                    body,
                    etag,
                    last_modified,
                    max_age_s,
                } => {
                    let expires_at_epoch = now + max_age_s.unwrap_or(self.default_ttl_s);
                    self.cache.put(
                        url,
                        CacheEntry {
                            body_bytes: body.clone(),
                            etag: etag.clone(),
                            last_modified: last_modified.clone(),
                            stored_at_epoch: now,
                            expires_at_epoch,
                        },
                    );
                    Ok(Some((
                        body,
                        CacheMetadata {
                            etag,
                            last_modified,
                            expires_at: Some(expires_at_epoch),
                            from_cache: false,
                        },
                    )))
                }
                FetchOutcome::NotFound => {
                    self.cache.remove(url);
                    Ok(None)
                }
            };
        }

        match self.fetch(url, None).await? {
            FetchOutcome::Fresh {
                body,
                etag,
                last_modified,
                max_age_s,
            } => {
                let expires_at_epoch = now + max_age_s.unwrap_or(self.default_ttl_s);
                self.cache.put(
                    url,
                    CacheEntry {
                        body_bytes: body.clone(),
                        etag: etag.clone(),
                        last_modified: last_modified.clone(),
                        stored_at_epoch: now,
                        expires_at_epoch,
                    },
                );
                Ok(Some((
                    body,
                    CacheMetadata {
                        etag,
                        last_modified,
                        expires_at: Some(expires_at_epoch),
                        from_cache: false,
                    },
                )))
            }
            FetchOutcome::NotModified { .. } | FetchOutcome::NotFound => Ok(None),
        }
    }

    async fn fetch(
        &self,
        url: &str,
        conditional: Option<Conditional>,
    ) -> Result<FetchOutcome, ResolverError> {
        debug!(target: "agent.resolver.fetch", url = %url, "fetching descriptor");
        self.fetcher.fetch(url, conditional).await.map_err(|e| {
            warn!(target: "agent.resolver.fetch", url = %url, error = %e, "descriptor fetch failed");
            ResolverError::Network {
                host: url.to_string(),
                message: e.message.clone(),
            }
        })
    }

    fn parse_descriptor(url: &str, body: &[u8]) -> Result<AgentDescriptor, ResolverError> {
        agent_descriptor::parse(body).map_err(|e| match e {
            agent_descriptor::DescriptorError::Invalid(result) => ResolverError::Validation {
                url: url.to_string(),
                errors: result.errors,
            },
            other => ResolverError::Malformed {
                reason: other.to_string(),
            },
        })
    }

    /// Resolve `uri` to an endpoint and, when available, a descriptor.
    ///
    /// Implements the seven-step resolution order, halting on the first
    /// strategy that succeeds.
    pub async fn resolve(
        &self,
        uri: &AgentUri,
        options: ResolveOptions,
    ) -> Result<ResolutionResult, ResolverError> {
        let host = uri.host().to_string();
        debug!(target: "agent.resolver", host = %host, "resolving agent uri");

        // Step 1 — explicit transport tag.
        if let Some(tag) = uri.transport() {
            if !options.force_descriptor_fetch {
                let endpoint = synthesize_direct_endpoint(uri, tag)?;
                return Ok(ResolutionResult {
                    descriptor: None,
                    endpoint,
                    transport_tag: tag.to_string(),
                    resolution_method: ResolutionMethod::Explicit,
                    cache_metadata: CacheMetadata::default(),
                });
            }
            // An unknown tag is only a hard failure once descriptor discovery
            // has had a chance to supply an `endpoints[tag]` override.
            if let Some(result) = self.discover(uri, options, Some(tag)).await? {
                return Ok(result);
            }
            let endpoint = synthesize_direct_endpoint(uri, tag)?;
            return Ok(ResolutionResult {
                descriptor: None,
                endpoint,
                transport_tag: tag.to_string(),
                resolution_method: ResolutionMethod::DirectFallback,
                cache_metadata: CacheMetadata::default(),
            });
        }

        // Steps 2–5.
        if let Some(result) = self.discover(uri, options, None).await? {
            return Ok(result);
        }

        // Step 7 — nothing found and no explicit transport.
        warn!(target: "agent.resolver", host = %host, "no resolution strategy produced a descriptor");
        Err(ResolverError::NotFound { host })
    }

    /// Steps 2–5 of the resolution order: subdomain well-known, multi-agent
    /// registry, single-agent well-known, path-based. Returns `Ok(None)`
    /// when none of them produce a descriptor.
    async fn discover(
        &self,
        uri: &AgentUri,
        options: ResolveOptions,
        preferred_tag: Option<&str>,
    ) -> Result<Option<ResolutionResult>, ResolverError> {
        let host = uri.host();
        let well_known_url = format!("https://{host}/.well-known/agent.json");
        let mut well_known_attempted = false;

        // Step 2 — subdomain well-known.
        let looks_like_subdomain =
            options.treat_as_agent_host || host.split('.').filter(|l| !l.is_empty()).count() >= 3;
        if looks_like_subdomain {
            well_known_attempted = true;
            if let Some((body, cache_metadata)) = self.get_or_fetch(&well_known_url).await? {
                let descriptor = Self::parse_descriptor(&well_known_url, &body)?;
                let (endpoint, transport_tag) =
                    endpoint_from_descriptor(&descriptor, uri, preferred_tag);
                debug!(target: "agent.resolver", host = %host, method = "subdomain-well-known", "resolved");
                return Ok(Some(ResolutionResult {
                    descriptor: Some(descriptor),
                    endpoint,
                    transport_tag,
                    resolution_method: ResolutionMethod::SubdomainWellKnown,
                    cache_metadata,
                }));
            }
        }

        // Step 3 — multi-agent registry.
        let registry_url = format!("https://{host}/.well-known/agents.json");
        if let Some((body, cache_metadata)) = self.get_or_fetch(&registry_url).await? {
            let registry: serde_json::Value =
                serde_json::from_slice(&body).map_err(|e| ResolverError::Malformed {
                    reason: format!("agents.json at '{registry_url}' is not valid JSON: {e}"),
                })?;
            let key = uri.path_segments().first().copied().unwrap_or("");
            if let Some(descriptor_url) = registry
                .get(key)
                .or_else(|| registry.get(""))
                .and_then(|v| v.as_str())
            {
                if let Some((body, _)) = self.get_or_fetch(descriptor_url).await? {
                    let descriptor = Self::parse_descriptor(descriptor_url, &body)?;
                    let (endpoint, transport_tag) =
                        endpoint_from_descriptor(&descriptor, uri, preferred_tag);
                    return Ok(Some(ResolutionResult {
                        descriptor: Some(descriptor),
                        endpoint,
                        transport_tag,
                        resolution_method: ResolutionMethod::MultiAgentRegistry,
                        cache_metadata,
                    }));
                }
            }
        }

        // Step 4 — single-agent well-known (skip if step 2 already tried
        // this exact URL).
        if !well_known_attempted {
            if let Some((body, cache_metadata)) = self.get_or_fetch(&well_known_url).await? {
                let descriptor = Self::parse_descriptor(&well_known_url, &body)?;
                let (endpoint, transport_tag) =
                    endpoint_from_descriptor(&descriptor, uri, preferred_tag);
                return Ok(Some(ResolutionResult {
                    descriptor: Some(descriptor),
                    endpoint,
                    transport_tag,
                    resolution_method: ResolutionMethod::SingleAgentWellKnown,
                    cache_metadata,
                }));
            }
        }

        // Step 5 — path-based.
        if let Some(first_segment) = uri.path_segments().first() {
            let path_based_url = format!("https://{host}/{first_segment}/agent.json");
            if let Some((body, cache_metadata)) = self.get_or_fetch(&path_based_url).await? {
                let descriptor = Self::parse_descriptor(&path_based_url, &body)?;
                let (endpoint, transport_tag) =
                    endpoint_from_descriptor(&descriptor, uri, preferred_tag);
                return Ok(Some(ResolutionResult {
                    descriptor: Some(descriptor),
                    endpoint,
                    transport_tag,
                    resolution_method: ResolutionMethod::PathBased,
                    cache_metadata,
                }));
            }
        }

        Ok(None)
    }
}
