//! Upstream forwarding stage; terminates every chain.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};

use crate::error::GatewayError;
use crate::observability::metrics;
use crate::pipeline::{respond_error, Next, RequestContext, Stage};
use crate::proxy::{
    append_security_headers, build_upstream_uri, prepare_upstream_headers, upstream_authority,
    validate_headers, UpstreamClient,
};

pub struct ProxyStage {
    client: Arc<UpstreamClient>,
    session_cookie: String,
    security_headers: bool,
    content_security_policy: Option<String>,
}

impl ProxyStage {
    pub fn new(
        client: Arc<UpstreamClient>,
        session_cookie: String,
        security_headers: bool,
        content_security_policy: Option<String>,
    ) -> Self {
        Self {
            client,
            session_cookie,
            security_headers,
            content_security_policy,
        }
    }
}

#[async_trait]
impl Stage for ProxyStage {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        _next: Next<'_>,
    ) -> Response<Body> {
        let Some(route) = ctx.route.clone() else {
            return respond_error(
                ctx,
                GatewayError::Internal("proxy stage ran without a matched route".to_string()),
            );
        };

        if let Err(err) = validate_headers(request.headers()) {
            return respond_error(ctx, err);
        }

        let normalized = ctx
            .normalized_path
            .clone()
            .unwrap_or_else(|| ctx.raw_path.clone());
        let uri = match build_upstream_uri(
            &route,
            &ctx.path_params,
            &normalized,
            request.uri().query(),
        ) {
            Ok(uri) => uri,
            Err(err) => return respond_error(ctx, err),
        };

        let headers = prepare_upstream_headers(
            request.headers(),
            &upstream_authority(&route),
            &ctx.client_ip,
            ctx.scheme,
            &ctx.correlation_id,
            &self.session_cookie,
            route.pass_session,
        );

        let method = ctx.method.clone();
        let body = request.into_body();

        let upstream_started = Instant::now();
        metrics::upstream_in_use_delta(1.0);
        let result = self
            .client
            .forward(method, uri, headers, body, &route)
            .await;
        metrics::upstream_in_use_delta(-1.0);
        ctx.upstream_duration = Some(upstream_started.elapsed());

        match result {
            Ok(mut response) => {
                if self.security_headers {
                    append_security_headers(
                        response.headers_mut(),
                        self.content_security_policy.as_deref(),
                    );
                }
                response
            }
            Err(err) => {
                metrics::record_upstream_error(err.code(), &route.id);
                respond_error(ctx, err)
            }
        }
    }
}
