// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fetching a candidate descriptor URL, with conditional-request support.

use agent_error::{AgentError, ErrorCode};
use async_trait::async_trait;

/// A conditional-request probe to attach to a fetch.
#[derive(Debug, Clone, Default)]
pub struct Conditional {
    /// Value for `If-None-Match`.
    pub if_none_match: Option<String>,
    /// Value for `If-Modified-Since`.
    pub if_modified_since: Option<String>,
}

/// The outcome of one fetch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// `200 OK` with a body.
    Fresh {
        /// Response body bytes.
        body: Vec<u8>,
        /// `ETag` response header, if present.
        etag: Option<String>,
        /// `Last-Modified` response header, if present.
        last_modified: Option<String>,
        /// `max-age` parsed out of `Cache-Control`, if present.
        max_age_s: Option<u64>,
    },
    /// `304 Not Modified` — the caller's cached bytes are still valid.
    NotModified {
        /// `max-age` parsed out of `Cache-Control`, if the revalidation
        /// response refreshed it.
        max_age_s: Option<u64>,
    },
    /// `404 Not Found` (or any other "this candidate doesn't exist" status).
    NotFound,
}

/// Fetches a candidate descriptor URL over some transport (normally HTTPS).
///
/// Abstracted behind a trait so the resolution state machine can be tested
/// without a real network, and so hosts embedding this crate can substitute
/// their own HTTP stack.
#[async_trait]
pub trait DescriptorFetcher: Send + Sync {
    /// Fetch `url`, attaching `conditional` headers when present.
    async fn fetch(
        &self,
        url: &str,
        conditional: Option<Conditional>,
    ) -> Result<FetchOutcome, AgentError>;
}

/// Parse `max-age=N` out of a `Cache-Control` header value.
fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|v| v.parse().ok())
}

/// The default [`DescriptorFetcher`], backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpDescriptorFetcher {
    client: reqwest::Client,
}

impl HttpDescriptorFetcher {
    /// Build a fetcher around a fresh client with redirect-following
    /// disabled for descriptor fetches, per §6's
    /// `follow_redirects_descriptor` default.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("reqwest client with default TLS backend"),
        }
    }

    /// Build a fetcher around a caller-supplied client, e.g. one configured
    /// to follow redirects when `follow_redirects_descriptor` is enabled.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpDescriptorFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DescriptorFetcher for HttpDescriptorFetcher {
    async fn fetch(
        &self,
        url: &str,
        conditional: Option<Conditional>,
    ) -> Result<FetchOutcome, AgentError> {
        let mut request = self.client.get(url);
        if let Some(cond) = conditional {
            if let Some(etag) = cond.if_none_match {
                request = request.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(ims) = cond.if_modified_since {
                request = request.header(reqwest::header::IF_MODIFIED_SINCE, ims);
            }
        }

        let response = request.send().await.map_err(|e| {
            AgentError::new(ErrorCode::NetworkError, format!("fetching '{url}' failed"))
                .with_source(e)
        })?;

        let max_age_s = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age);

        match response.status() {
            reqwest::StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified { max_age_s }),
            reqwest::StatusCode::NOT_FOUND => Ok(FetchOutcome::NotFound),
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(reqwest::header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let last_modified = response
                    .headers()
                    .get(reqwest::header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = response.bytes().await.map_err(|e| {
                    AgentError::new(ErrorCode::NetworkError, format!("reading body of '{url}'"))
                        .with_source(e)
                })?;
                Ok(FetchOutcome::Fresh {
                    body: body.to_vec(),
                    etag,
                    last_modified,
                    max_age_s,
                })
            }
            status => Err(AgentError::new(
                ErrorCode::UpstreamError,
                format!("unexpected status {status} fetching '{url}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_max_age_finds_directive_among_others() {
        assert_eq!(parse_max_age("no-cache, max-age=300"), Some(300));
        assert_eq!(parse_max_age("max-age=0"), Some(0));
        assert_eq!(parse_max_age("no-store"), None);
        assert_eq!(parse_max_age(""), None);
    }
}
