//! Route resolution.
//!
//! Normalizes the path, consults the route table, and attaches the
//! matched route and parameters to the context. Misses short-circuit
//! with 404, 405 (with Allow) or 400 for rejected parameters.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};

use crate::pipeline::{respond_error, Next, RequestContext, Stage};
use crate::routing::{normalize_path, Router};

pub struct ResolveStage {
    router: Arc<Router>,
}

impl ResolveStage {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Stage for ResolveStage {
    fn name(&self) -> &'static str {
        "route-resolve"
    }

    async fn handle(
        &self,
        request: Request<Body>,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Response<Body> {
        ctx.normalized_path = Some(normalize_path(&ctx.raw_path));

        match self.router.match_route(&ctx.method, &ctx.raw_path) {
            Ok(matched) => {
                tracing::debug!(
                    correlation_id = %ctx.correlation_id,
                    route_id = %matched.route.id,
                    params = ?matched.params,
                    "Route matched"
                );
                ctx.route = Some(matched.route);
                ctx.path_params = matched.params;
                next.run(request, ctx).await
            }
            Err(err) => respond_error(ctx, err),
        }
    }
}
