// SPDX-License-Identifier: MIT OR Apache-2.0
//! B1: pooled request/response transport over HTTP(S).

use crate::retry::{self, RetryConfig};
use crate::{ChunkStream, Method, Transport, TransportRequest, TransportResponse};
use agent_error::{AgentError, ErrorCode, ProblemDetail};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Above this many encoded bytes, `params` is no longer "minimal" and the
/// request goes over POST instead of a query string (§4.4 B1's GET/POST
/// selection rule).
const MAX_GET_QUERY_BYTES: usize = 2048;

/// Per-origin connection limits.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent in-flight requests to a single origin, per §6's
    /// `pool_per_origin_max`.
    pub per_origin_max: usize,
    /// Idle connections are released after this long without use. Tracked
    /// for parity with the sidecar pool's idle-reaping behavior; HTTP
    /// connection reuse itself is delegated to the underlying client.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            per_origin_max: 10,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time occupancy for one origin's slot pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Total slots configured for this origin.
    pub total: usize,
    /// Slots currently held by an in-flight request.
    pub busy: usize,
    /// Slots currently free.
    pub idle: usize,
}

/// Bounds concurrent requests per origin with a semaphore per origin,
/// mirroring the shape of a sidecar pool's idle/busy accounting but gating
/// async concurrency rather than managing live processes.
#[derive(Debug)]
pub struct ConnectionPool {
    config: PoolConfig,
    origins: Mutex<BTreeMap<String, Arc<Semaphore>>>,
}

impl ConnectionPool {
    /// Build an empty pool; origin slots are created lazily on first use.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            origins: Mutex::new(BTreeMap::new()),
        }
    }

    fn semaphore_for(&self, origin: &str) -> Arc<Semaphore> {
        let mut origins = self.origins.lock().expect("pool lock poisoned");
        origins
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_origin_max)))
            .clone()
    }

    /// Acquire a slot for `origin`, waiting if the origin is at capacity.
    pub async fn acquire(&self, origin: &str) -> OwnedSemaphorePermit {
        let semaphore = self.semaphore_for(origin);
        semaphore
            .acquire_owned()
            .await
            .expect("semaphore never closed")
    }

    /// Current occupancy for `origin`. An origin with no recorded traffic
    /// reports a fully-idle pool.
    pub fn stats(&self, origin: &str) -> PoolStats {
        let origins = self.origins.lock().expect("pool lock poisoned");
        match origins.get(origin) {
            Some(semaphore) => {
                let idle = semaphore.available_permits();
                PoolStats {
                    total: self.config.per_origin_max,
                    idle,
                    busy: self.config.per_origin_max.saturating_sub(idle),
                }
            }
            None => PoolStats {
                total: self.config.per_origin_max,
                idle: self.config.per_origin_max,
                busy: 0,
            },
        }
    }
}

fn origin_of(endpoint: &str) -> Result<String, AgentError> {
    let url = reqwest::Url::parse(endpoint).map_err(|e| {
        AgentError::new(ErrorCode::InvalidInput, format!("malformed endpoint '{endpoint}'"))
            .with_source(e)
    })?;
    Ok(url.origin().ascii_serialization())
}

/// The request URL: the agent path (`request.endpoint`) with `capability`
/// appended as a final, properly percent-encoded path segment (§6: "path is
/// the agent path followed by capability").
fn invocation_url(request: &TransportRequest) -> Result<reqwest::Url, AgentError> {
    let mut url = reqwest::Url::parse(&request.endpoint).map_err(|e| {
        AgentError::new(
            ErrorCode::InvalidInput,
            format!("malformed endpoint '{}'", request.endpoint),
        )
        .with_source(e)
    })?;
    url.path_segments_mut()
        .map_err(|()| {
            AgentError::new(
                ErrorCode::InvalidInput,
                format!("endpoint '{}' cannot carry a path", request.endpoint),
            )
        })?
        .push(&request.capability);
    Ok(url)
}

fn scalar_to_query_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}

/// Whether `params` is absent, or a flat object of scalars short enough to
/// carry in a URI query string — §4.4 B1's "minimal and safe for URI query
/// encoding" GET/POST selection criterion.
fn params_fit_in_query(params: &Option<serde_json::Value>) -> bool {
    match params {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::Object(map)) => {
            let mut encoded_len = 0usize;
            for (key, value) in map {
                let Some(value) = scalar_to_query_value(value) else {
                    return false;
                };
                encoded_len += key.len() + value.len() + 2;
            }
            encoded_len <= MAX_GET_QUERY_BYTES
        }
        Some(_) => false,
    }
}

fn query_pairs(params: &serde_json::Value) -> Vec<(String, String)> {
    match params {
        serde_json::Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| scalar_to_query_value(value).map(|v| (key.clone(), v)))
            .collect(),
        _ => Vec::new(),
    }
}

/// Resolve the wire method for `request`: an explicit [`Method::Get`] is
/// always honored; otherwise GET is chosen when `params` fits in a query
/// string, POST otherwise (§4.4 B1).
fn select_method(request: &TransportRequest) -> Method {
    if request.method == Method::Get || params_fit_in_query(&request.params) {
        Method::Get
    } else {
        Method::Post
    }
}

fn build_headers(
    request: &TransportRequest,
    default_accept: &'static str,
) -> Result<HeaderMap, AgentError> {
    let mut map = HeaderMap::new();
    map.insert(ACCEPT, HeaderValue::from_static(default_accept));
    for (name, value) in &request.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            AgentError::new(ErrorCode::InvalidInput, format!("invalid header name '{name}'"))
                .with_source(e)
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            AgentError::new(
                ErrorCode::InvalidInput,
                format!("invalid header value for '{name}'"),
            )
            .with_source(e)
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Turn a non-2xx response body into an [`AgentError`], parsing
/// `application/problem+json` when the body actually is one (§4.4 B1, P9).
fn problem_from_body(status: reqwest::StatusCode, bytes: &[u8]) -> AgentError {
    let problem = ProblemDetail::parse(bytes)
        .unwrap_or_else(|| ProblemDetail::synthesize(ErrorCode::UpstreamError, format!("upstream returned {status}")));
    AgentError::from(problem)
}

type LineStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, AgentError>> + Send>>;

/// Split a byte stream into lines (stripping `\r\n`/`\n`), flushing any
/// trailing partial line once the source ends.
fn line_stream<B, S>(bytes_stream: S) -> LineStream
where
    B: AsRef<[u8]> + Send + 'static,
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
{
    struct State<S> {
        inner: Pin<Box<S>>,
        buf: Vec<u8>,
        eof: bool,
    }

    Box::pin(stream::unfold(
        State { inner: Box::pin(bytes_stream), buf: Vec::new(), eof: false },
        |mut st| async move {
            loop {
                if let Some(pos) = st.buf.iter().position(|&b| b == b'\n') {
                    let mut line: Vec<u8> = st.buf.drain(..=pos).collect();
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Some((Ok(line), st));
                }
                if st.eof {
                    if st.buf.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut st.buf);
                    return Some((Ok(line), st));
                }
                match st.inner.next().await {
                    Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        st.eof = true;
                        st.buf.clear();
                        return Some((
                            Err(AgentError::new(
                                ErrorCode::NetworkError,
                                format!("stream read failed: {e}"),
                            )
                            .with_source(e)),
                            st,
                        ));
                    }
                    None => st.eof = true,
                }
            }
        },
    ))
}

fn parse_json_chunk(bytes: &[u8]) -> Result<serde_json::Value, AgentError> {
    serde_json::from_slice(bytes)
        .map_err(|e| AgentError::new(ErrorCode::ParseError, format!("invalid stream chunk: {e}")))
}

/// Decode `application/x-ndjson`: one JSON value per non-empty line.
fn decode_ndjson<B, S>(bytes_stream: S) -> ChunkStream
where
    B: AsRef<[u8]> + Send + 'static,
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
{
    line_stream(bytes_stream)
        .filter_map(|line| async move {
            match line {
                Ok(line) if line.is_empty() => None,
                Ok(line) => Some(parse_json_chunk(&line)),
                Err(e) => Some(Err(e)),
            }
        })
        .boxed()
}

/// Decode `text/event-stream`: `data:` lines accumulate until a blank line
/// ends the event, then the joined payload is parsed as one JSON chunk.
/// Other SSE fields (`event:`, `id:`, `retry:`, comments) are ignored.
fn decode_sse<B, S>(bytes_stream: S) -> ChunkStream
where
    B: AsRef<[u8]> + Send + 'static,
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
{
    let lines = line_stream(bytes_stream);
    stream::unfold((lines, Vec::<String>::new()), |(mut lines, mut data)| async move {
        loop {
            match lines.next().await {
                Some(Ok(line)) => {
                    if line.is_empty() {
                        if data.is_empty() {
                            continue;
                        }
                        let payload = data.join("\n");
                        data.clear();
                        return Some((parse_json_chunk(payload.as_bytes()), (lines, data)));
                    }
                    let text = String::from_utf8_lossy(&line);
                    if let Some(rest) = text.strip_prefix("data:") {
                        data.push(rest.trim_start().to_string());
                    }
                }
                Some(Err(e)) => return Some((Err(e), (lines, data))),
                None => {
                    if data.is_empty() {
                        return None;
                    }
                    let payload = data.join("\n");
                    data.clear();
                    return Some((parse_json_chunk(payload.as_bytes()), (lines, data)));
                }
            }
        }
    })
    .boxed()
}

/// The B1 binding: request/response calls over a pooled HTTP(S) client, with
/// retry applied only to [`Method::Get`] requests.
pub struct HttpBinding {
    tag: &'static str,
    client: reqwest::Client,
    pool: ConnectionPool,
    retry_config: RetryConfig,
}

impl HttpBinding {
    /// Build a binding for `tag` (`"https"` or `"http"`) with a fresh client.
    pub fn new(tag: &'static str, pool_config: PoolConfig, retry_config: RetryConfig) -> Self {
        Self::with_client(tag, reqwest::Client::new(), pool_config, retry_config)
    }

    /// Build a binding around a caller-supplied client, e.g. one configured
    /// to follow redirects per §6's `follow_redirects_invoke`.
    pub fn with_client(
        tag: &'static str,
        client: reqwest::Client,
        pool_config: PoolConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            tag,
            client,
            pool: ConnectionPool::new(pool_config),
            retry_config,
        }
    }

    /// Occupancy for the origin extracted from `endpoint`, if it parses.
    pub fn stats_for(&self, endpoint: &str) -> Option<PoolStats> {
        origin_of(endpoint).ok().map(|origin| self.pool.stats(&origin))
    }

    fn request_builder(
        &self,
        request: &TransportRequest,
        method: Method,
        default_accept: &'static str,
    ) -> Result<reqwest::RequestBuilder, AgentError> {
        let mut url = invocation_url(request)?;
        if method == Method::Get {
            if let Some(params) = &request.params {
                let pairs = query_pairs(params);
                if !pairs.is_empty() {
                    url.query_pairs_mut()
                        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                }
            }
        }

        let mut builder = match method {
            Method::Get => self.client.get(url),
            Method::Post => {
                let builder = self.client.post(url);
                match &request.params {
                    Some(params) => builder.json(params),
                    None => builder,
                }
            }
        };

        builder = builder.headers(build_headers(request, default_accept)?);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(serde_json::Value::String(token)) = &request.auth_context {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send_once(
        &self,
        request: &TransportRequest,
        method: Method,
    ) -> Result<TransportResponse, AgentError> {
        let builder = self.request_builder(request, method, "application/json")?;

        debug!(
            target: "agent.transport.http",
            capability = %request.capability,
            endpoint = %request.endpoint,
            method = ?method,
            "sending request"
        );

        let response = builder.send().await.map_err(|e| {
            warn!(
                target: "agent.transport.http",
                capability = %request.capability,
                endpoint = %request.endpoint,
                error = %e,
                "request send failed"
            );
            AgentError::new(
                ErrorCode::NetworkError,
                format!("invoking '{}' at '{}' failed", request.capability, request.endpoint),
            )
            .with_source(e)
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            warn!(
                target: "agent.transport.http",
                capability = %request.capability,
                endpoint = %request.endpoint,
                status = status.as_u16(),
                "upstream returned a non-success status"
            );
            return Err(problem_from_body(status, &bytes));
        }

        let body = response.json::<serde_json::Value>().await.unwrap_or(serde_json::Value::Null);

        Ok(TransportResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpBinding {
    fn protocol_tag(&self) -> &str {
        self.tag
    }

    async fn invoke(&self, request: TransportRequest) -> Result<TransportResponse, AgentError> {
        let origin = origin_of(&request.endpoint)?;
        debug!(target: "agent.transport.http", origin = %origin, "acquiring pool permit");
        let _permit = self.pool.acquire(&origin).await;

        let method = select_method(&request);
        if method == Method::Get {
            retry::retry_async(
                &self.retry_config,
                || self.send_once(&request, method),
                retry::is_retryable,
            )
            .await
        } else {
            self.send_once(&request, method).await
        }
    }

    async fn stream(&self, request: TransportRequest) -> Result<ChunkStream, AgentError> {
        let origin = origin_of(&request.endpoint)?;
        debug!(target: "agent.transport.http", origin = %origin, "acquiring pool permit for stream");
        let _permit = self.pool.acquire(&origin).await;

        let method = select_method(&request);
        let builder = self.request_builder(
            &request,
            method,
            "text/event-stream, application/x-ndjson, application/json",
        )?;

        debug!(
            target: "agent.transport.http",
            capability = %request.capability,
            endpoint = %request.endpoint,
            method = ?method,
            "opening stream"
        );

        let response = builder.send().await.map_err(|e| {
            warn!(
                target: "agent.transport.http",
                capability = %request.capability,
                endpoint = %request.endpoint,
                error = %e,
                "stream request send failed"
            );
            AgentError::new(
                ErrorCode::NetworkError,
                format!("streaming '{}' at '{}' failed", request.capability, request.endpoint),
            )
            .with_source(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            warn!(
                target: "agent.transport.http",
                capability = %request.capability,
                endpoint = %request.endpoint,
                status = status.as_u16(),
                "upstream returned a non-success status for stream"
            );
            return Err(problem_from_body(status, &bytes));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            Ok(decode_sse(response.bytes_stream()))
        } else if content_type.starts_with("application/x-ndjson") {
            Ok(decode_ndjson(response.bytes_stream()))
        } else {
            let body = response.json::<serde_json::Value>().await.unwrap_or(serde_json::Value::Null);
            Ok(stream::once(async move { Ok(body) }).boxed())
        }
    }

    async fn close(&self) -> Result<(), AgentError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_of_drops_path_and_query() {
        assert_eq!(
            origin_of("https://acme.ai/a/b?x=1").unwrap(),
            "https://acme.ai"
        );
    }

    #[test]
    fn origin_of_rejects_malformed_endpoint() {
        assert!(origin_of("not a url").is_err());
    }

    #[tokio::test]
    async fn pool_reports_idle_before_any_acquire() {
        let pool = ConnectionPool::new(PoolConfig {
            per_origin_max: 3,
            idle_timeout: Duration::from_secs(1),
        });
        let stats = pool.stats("https://acme.ai");
        assert_eq!(stats, PoolStats { total: 3, busy: 0, idle: 3 });
    }

    #[tokio::test]
    async fn pool_tracks_busy_while_permit_held() {
        let pool = ConnectionPool::new(PoolConfig {
            per_origin_max: 2,
            idle_timeout: Duration::from_secs(1),
        });
        let permit = pool.acquire("https://acme.ai").await;
        let stats = pool.stats("https://acme.ai");
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.idle, 1);
        drop(permit);
        let stats = pool.stats("https://acme.ai");
        assert_eq!(stats.busy, 0);
    }

    #[test]
    fn http_binding_reports_its_configured_tag() {
        let binding = HttpBinding::new("https", PoolConfig::default(), RetryConfig::default());
        assert_eq!(binding.protocol_tag(), "https");
    }

    #[test]
    fn invocation_url_appends_capability_as_path_segment() {
        let req = TransportRequest::new("https://acme.ai/plan", "gen iti");
        let url = invocation_url(&req).unwrap();
        assert_eq!(url.as_str(), "https://acme.ai/plan/gen%20iti");
    }

    #[test]
    fn select_method_prefers_get_for_small_scalar_params() {
        let req = TransportRequest::new("https://acme.ai/plan", "gen-iti")
            .with_params(serde_json::json!({"city": "Paris"}));
        assert_eq!(select_method(&req), Method::Get);
    }

    #[test]
    fn select_method_falls_back_to_post_for_nested_params() {
        let req = TransportRequest::new("https://acme.ai/plan", "gen-iti")
            .with_params(serde_json::json!({"city": {"name": "Paris"}}));
        assert_eq!(select_method(&req), Method::Post);
    }

    #[test]
    fn select_method_honors_explicit_get_even_with_unsafe_params() {
        let req = TransportRequest::new("https://acme.ai/plan", "gen-iti")
            .with_params(serde_json::json!({"nested": {"x": 1}}))
            .with_method(Method::Get);
        assert_eq!(select_method(&req), Method::Get);
    }

    #[test]
    fn query_pairs_flattens_scalar_object() {
        let params = serde_json::json!({"city": "Paris", "days": 3});
        let mut pairs = query_pairs(&params);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![("city".to_string(), "Paris".to_string()), ("days".to_string(), "3".to_string())]
        );
    }

    #[test]
    fn problem_from_body_parses_problem_json() {
        let body = serde_json::json!({
            "type": "https://errors.acme.ai/rate-limited",
            "title": "Rate limited",
            "status": 429,
            "detail": "too many requests",
        });
        let err = problem_from_body(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            &serde_json::to_vec(&body).unwrap(),
        );
        assert_eq!(err.code, ErrorCode::UpstreamError);
        assert_eq!(err.message, "too many requests");
    }

    #[test]
    fn problem_from_body_synthesizes_when_body_is_not_problem_json() {
        let err = problem_from_body(reqwest::StatusCode::BAD_GATEWAY, b"not json");
        assert_eq!(err.code, ErrorCode::UpstreamError);
    }

    fn chunk(bytes: &[u8]) -> reqwest::Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    #[tokio::test]
    async fn decode_ndjson_splits_on_newlines() {
        let source = stream::iter(vec![chunk(b"{\"a\":1}\n{\"b\":2}\n")]);
        let mut chunks = decode_ndjson(source);
        assert_eq!(chunks.next().await.unwrap().unwrap(), serde_json::json!({"a": 1}));
        assert_eq!(chunks.next().await.unwrap().unwrap(), serde_json::json!({"b": 2}));
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn decode_ndjson_flushes_a_trailing_line_without_newline() {
        let source = stream::iter(vec![chunk(b"{\"a\":1}")]);
        let mut chunks = decode_ndjson(source);
        assert_eq!(chunks.next().await.unwrap().unwrap(), serde_json::json!({"a": 1}));
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn decode_sse_parses_one_event_per_blank_line() {
        let source = stream::iter(vec![chunk(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n")]);
        let mut chunks = decode_sse(source);
        assert_eq!(chunks.next().await.unwrap().unwrap(), serde_json::json!({"a": 1}));
        assert_eq!(chunks.next().await.unwrap().unwrap(), serde_json::json!({"b": 2}));
        assert!(chunks.next().await.is_none());
    }

    #[tokio::test]
    async fn decode_sse_joins_multiline_data_fields() {
        let source = stream::iter(vec![chunk(b"data: [1,\ndata: 2]\n\n")]);
        let mut chunks = decode_sse(source);
        assert_eq!(chunks.next().await.unwrap().unwrap(), serde_json::json!([1, 2]));
    }
}
