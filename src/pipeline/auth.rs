//! Authentication and authorization stages.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, Request, Response};

use crate::auth::{Authorizer, TokenExtractor, TokenRefresher, TokenValidator};
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::pipeline::{respond_error, Next, RequestContext, Stage};

/// Extracts and validates the session token, attaches the principal,
/// and drives sliding refresh on the response path.
pub struct AuthStage {
    extractor: TokenExtractor,
    validator: Arc<TokenValidator>,
    refresher: Arc<TokenRefresher>,
}

impl AuthStage {
    pub fn new(
        extractor: TokenExtractor,
        validator: Arc<TokenValidator>,
        refresher: Arc<TokenRefresher>,
    ) -> Self {
        Self {
            extractor,
            validator,
            refresher,
        }
    }
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        let Some(route) = ctx.route.clone() else {
            // Resolve short-circuits on miss; an unset route here means
            // the pipeline was assembled out of order.
            return respond_error(
                ctx,
                GatewayError::Internal("auth stage ran without a matched route".to_string()),
            );
        };

        let token = self.extractor.extract(request.headers());

        let raw_token = match token {
            Some(raw) => raw,
            None if route.auth_required => {
                metrics::record_auth_failure("missing_token");
                return respond_error(ctx, GatewayError::MissingToken);
            }
            None => return next.run(request, ctx).await,
        };

        match self.validator.validate(&raw_token, &ctx.client_ip).await {
            Ok(validated) => {
                ctx.principal = Some(validated.principal);
                ctx.token_kind = Some(validated.kind);
            }
            Err(err) if route.auth_required => {
                metrics::record_auth_failure(err.code());
                return respond_error(ctx, err);
            }
            Err(err) => {
                // Public route: proceed anonymously on a bad token.
                tracing::debug!(
                    correlation_id = %ctx.correlation_id,
                    kind = err.code(),
                    "Ignoring invalid token on public route"
                );
                return next.run(request, ctx).await;
            }
        }

        // Refresh before forwarding so the old opaque id is revoked
        // before the new token ever leaves the gateway.
        let mut refreshed = None;
        if let (Some(principal), Some(kind)) = (ctx.principal.as_ref(), ctx.token_kind) {
            if self
                .refresher
                .should_refresh(principal, route.refresh_allowed)
            {
                match self.refresher.refresh(principal, kind).await {
                    Ok(outcome) => refreshed = outcome,
                    Err(err) => return respond_error(ctx, err),
                }
            }
        }

        let mut response = next.run(request, ctx).await;

        if let Some(refresh) = refreshed {
            if let Ok(value) = HeaderValue::from_str(&refresh.set_cookie) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
        response
    }
}

/// Enforces the route's permission policy against the principal.
pub struct AuthorizeStage {
    authorizer: Authorizer,
}

impl AuthorizeStage {
    pub fn new(authorizer: Authorizer) -> Self {
        Self { authorizer }
    }
}

#[async_trait]
impl Stage for AuthorizeStage {
    fn name(&self) -> &'static str {
        "authorize"
    }

    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        if let Some(route) = ctx.route.clone() {
            if let Err(err) = self.authorizer.authorize(ctx.principal.as_ref(), &route) {
                metrics::record_auth_failure("forbidden");
                return respond_error(ctx, err);
            }
        }
        next.run(request, ctx).await
    }
}
