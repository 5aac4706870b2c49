//! Pooled upstream HTTP client.
//!
//! # Responsibilities
//! - Build the upstream URI from the route's base and the matched path
//! - Forward requests with streamed bodies, enforcing the body cap
//! - Apply connect / read / overall deadlines with 502/504 mapping
//! - Retry idempotent requests on pre-response failures, with backoff
//!
//! # Design Decisions
//! - One pooled client for the whole process; per-host pool limits
//! - Response bodies stream through a relay task that enforces the
//!   read deadline between frames and aborts when the client goes away
//! - A failure mid-response terminates the connection; no second status

use std::collections::HashMap;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Response, Uri};
use http_body_util::{BodyExt, Limited};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::{TimeoutConfig, UpstreamConfig};
use crate::error::GatewayError;
use crate::resilience::{backoff_delay, is_idempotent, FailurePhase};
use crate::routing::pattern::Segment;
use crate::routing::Route;

type BoxError = Box<dyn StdError + Send + Sync>;
type Connector = HttpsConnector<HttpConnector>;

/// Pooled client forwarding requests to upstream services.
pub struct UpstreamClient {
    client: Client<Connector, Limited<Body>>,
    config: UpstreamConfig,
    body_max: usize,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig, body_max: usize) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(Duration::from_millis(config.timeouts.connect_ms)));
        http.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.pool.per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool.idle_seconds))
            .build(connector);

        Self {
            client,
            config,
            body_max,
        }
    }

    /// Effective timeouts for a route.
    pub fn timeouts_for(&self, route: &Route) -> TimeoutConfig {
        route.timeouts.unwrap_or(self.config.timeouts)
    }

    /// Forward a request upstream and stream the response back.
    pub async fn forward(
        &self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Body,
        route: &Route,
    ) -> Result<Response<Body>, GatewayError> {
        let timeouts = self.timeouts_for(route);
        let retry = route.retry.as_ref().unwrap_or(&self.config.retry);
        let read_timeout = Duration::from_millis(timeouts.read_ms);
        let deadline = Instant::now() + Duration::from_millis(timeouts.overall_ms);

        // Streamed bodies cannot be replayed; only body-less requests
        // are eligible for retry.
        let body_is_empty = http_body::Body::size_hint(&body).exact() == Some(0);
        let mut body = Some(body);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let request_body = match body.take() {
                Some(b) => Limited::new(b, self.body_max),
                None => Limited::new(Body::empty(), self.body_max),
            };

            let mut builder = Request::builder().method(method.clone()).uri(uri.clone());
            if let Some(h) = builder.headers_mut() {
                *h = headers.clone();
            }
            let request = builder
                .body(request_body)
                .map_err(|e| GatewayError::Internal(format!("upstream request build: {}", e)))?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GatewayError::GatewayTimeout);
            }
            let first_byte_window = read_timeout.min(remaining);

            let (err, phase) =
                match tokio::time::timeout(first_byte_window, self.client.request(request)).await
                {
                    Ok(Ok(response)) => {
                        let (parts, incoming) = response.into_parts();
                        let mut response = Response::from_parts(
                            parts,
                            relay_body(incoming, read_timeout, deadline),
                        );
                        strip_response_hop_headers(response.headers_mut());
                        return Ok(response);
                    }
                    Ok(Err(e)) => {
                        if is_body_limit(&e) {
                            return Err(GatewayError::PayloadTooLarge);
                        }
                        if e.is_connect() {
                            (GatewayError::BadGateway, FailurePhase::Connect)
                        } else {
                            (GatewayError::BadGateway, FailurePhase::BeforeResponse)
                        }
                    }
                    Err(_) => (GatewayError::GatewayTimeout, FailurePhase::BeforeResponse),
                };

            let can_retry = retry.enabled
                && attempt < retry.max_attempts
                && is_idempotent(&method)
                && phase.retryable()
                && body_is_empty;

            if !can_retry {
                return Err(err);
            }

            let delay = backoff_delay(attempt, retry.base_delay_ms, retry.max_delay_ms);
            if Instant::now() + delay >= deadline {
                return Err(err);
            }
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                uri = %uri,
                "Retrying upstream request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Relay the upstream body to the client, enforcing the read deadline
/// between frames. Dropping the returned body stops the relay and
/// releases the upstream connection.
fn relay_body(
    mut incoming: hyper::body::Incoming,
    read_timeout: Duration,
    deadline: Instant,
) -> Body {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, BoxError>>(4);

    tokio::spawn(async move {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let _ = tx.send(Err("upstream deadline exceeded".into())).await;
                break;
            }
            match tokio::time::timeout(read_timeout.min(remaining), incoming.frame()).await {
                Ok(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        if tx.send(Ok(data)).await.is_err() {
                            // Client went away; abort the upstream read.
                            break;
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    let _ = tx.send(Err(e.into())).await;
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    let _ = tx.send(Err("upstream read timed out".into())).await;
                    break;
                }
            }
        }
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    Body::from_stream(stream)
}

/// Hop-by-hop headers are scrubbed from upstream responses as well.
fn strip_response_hop_headers(headers: &mut HeaderMap) {
    for name in [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "transfer-encoding",
        "upgrade",
        "trailer",
        "te",
    ] {
        headers.remove(name);
    }
}

fn is_body_limit(err: &hyper_util::client::legacy::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(e) = source {
        if e.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Build the upstream URI for a matched route.
///
/// When the upstream base path contains `{name}` placeholders they are
/// substituted from the captured parameters and used as the full path.
/// Otherwise the request path after the pattern's literal prefix is
/// appended to the base path. The query string passes through unchanged.
pub fn build_upstream_uri(
    route: &Route,
    params: &HashMap<String, String>,
    normalized_path: &str,
    query: Option<&str>,
) -> Result<Uri, GatewayError> {
    let base = &route.upstream;
    // The url crate percent-encodes braces in paths; undo that so
    // `{name}` placeholders written in config stay recognizable.
    let base_path = base.path().replace("%7B", "{").replace("%7D", "}");
    let base_path = base_path.as_str();

    let path = if base_path.contains('{') {
        let mut substituted = base_path.to_string();
        for (name, value) in params {
            substituted = substituted.replace(&format!("{{{}}}", name), value);
        }
        if substituted.contains('{') {
            return Err(GatewayError::Internal(format!(
                "route '{}': unresolved placeholder in upstream path '{}'",
                route.id, base_path
            )));
        }
        substituted
    } else {
        let literal_prefix = route
            .pattern
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count();
        let suffix: Vec<&str> = normalized_path
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(literal_prefix)
            .collect();

        let trimmed = base_path.trim_end_matches('/');
        if suffix.is_empty() {
            if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            }
        } else {
            format!("{}/{}", trimmed, suffix.join("/"))
        }
    };

    let path_and_query = match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path,
    };

    Uri::builder()
        .scheme(base.scheme())
        .authority(upstream_authority(route))
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GatewayError::Internal(format!("upstream URI build: {}", e)))
}

/// Authority (host[:port]) of the route's upstream, used for the Host
/// header rewrite.
pub fn upstream_authority(route: &Route) -> String {
    let host = route.upstream.host_str().unwrap_or_default();
    match route.upstream.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::routing::Router;
    use std::sync::Arc;

    fn route(path: &str, upstream: &str) -> Arc<Route> {
        let config = RouteConfig {
            id: "r".into(),
            path: path.into(),
            methods: vec!["GET".into()],
            upstream: upstream.into(),
            auth_required: false,
            permissions: Vec::new(),
            rate_limit: None,
            timeouts: None,
            retry: None,
            pass_session: false,
            refresh_allowed: true,
            priority: 0,
        };
        Router::from_config(&[config]).unwrap().routes()[0].clone()
    }

    #[test]
    fn test_uri_appends_suffix_after_literal_prefix() {
        let route = route("/v1/users/{id}", "http://users.internal:8000/api");
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());

        let uri = build_upstream_uri(&route, &params, "/v1/users/42", None).unwrap();
        assert_eq!(uri.to_string(), "http://users.internal:8000/api/42");
    }

    #[test]
    fn test_uri_literal_route_strips_prefix() {
        let route = route("/v1/ping", "http://echo.internal:9000");
        let uri = build_upstream_uri(&route, &HashMap::new(), "/v1/ping", None).unwrap();
        assert_eq!(uri.to_string(), "http://echo.internal:9000/");
    }

    #[test]
    fn test_uri_preserves_query() {
        let route = route("/v1/search", "http://search.internal:9000");
        let uri =
            build_upstream_uri(&route, &HashMap::new(), "/v1/search", Some("q=rust&page=2"))
                .unwrap();
        assert_eq!(
            uri.to_string(),
            "http://search.internal:9000/?q=rust&page=2"
        );
    }

    #[test]
    fn test_uri_wildcard_tail_forwarded() {
        let route = route("/static/{rest*}", "http://assets.internal:9000/files");
        let mut params = HashMap::new();
        params.insert("rest".to_string(), "css/site.css".to_string());

        let uri =
            build_upstream_uri(&route, &params, "/static/css/site.css", None).unwrap();
        assert_eq!(
            uri.to_string(),
            "http://assets.internal:9000/files/css/site.css"
        );
    }

    #[test]
    fn test_uri_placeholder_substitution() {
        let route = route("/v1/users/{id}/avatar", "http://media.internal/users/{id}/avatar.png");
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());

        let uri =
            build_upstream_uri(&route, &params, "/v1/users/42/avatar", None).unwrap();
        assert_eq!(
            uri.to_string(),
            "http://media.internal/users/42/avatar.png"
        );
    }

    #[test]
    fn test_authority_includes_explicit_port() {
        assert_eq!(
            upstream_authority(&route("/v1/ping", "http://echo.internal:9000")),
            "echo.internal:9000"
        );
        assert_eq!(
            upstream_authority(&route("/v1/ping", "http://echo.internal")),
            "echo.internal"
        );
    }
}
