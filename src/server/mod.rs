//! Entry server.
//!
//! # Responsibilities
//! - Wire subsystems together from configuration
//! - Accept connections (plain or TLS) and dispatch through the pipeline
//! - Enforce the in-flight admission cap with 503 + Retry-After
//! - Run the admin listener, metrics exporter and health prober
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → axum fallback handler (admission control, context creation)
//!     → pipeline (correlation → recovery → logging → resolve
//!                 → auth → authorize → rate-limit → proxy)
//!     → response streamed to the client
//! ```

pub mod admin;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::response::Response;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower::Service;

use crate::auth::{Authorizer, TokenExtractor, TokenRefresher, TokenValidator};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::health::{HealthProber, HealthState};
use crate::lifecycle::Shutdown;
use crate::net::tls::{build_acceptor, TlsError};
use crate::observability::metrics;
use crate::pipeline::auth::{AuthStage, AuthorizeStage};
use crate::pipeline::correlation::{self, CorrelationStage};
use crate::pipeline::logging::LoggingStage;
use crate::pipeline::proxy::ProxyStage;
use crate::pipeline::ratelimit::RateLimitStage;
use crate::pipeline::recovery::RecoveryStage;
use crate::pipeline::resolve::ResolveStage;
use crate::pipeline::{Pipeline, RequestContext};
use crate::proxy::UpstreamClient;
use crate::ratelimit::{InMemoryRateLimitStore, RateLimitStore, RateLimiter, RedisRateLimitStore};
use crate::routing::Router;
use crate::session::{InMemorySessionStore, RedisSessionStore, SessionStore};

/// Startup error; the exit code encodes the failure class.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bind failed: {0}")]
    Bind(std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("store unreachable: {0}")]
    StoreUnreachable(String),
}

impl ServerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Bind(_) | Self::Tls(_) => 2,
            Self::StoreUnreachable(_) => 3,
        }
    }
}

/// Shared state injected into the fallback handler.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
    scheme: &'static str,
}

/// The assembled gateway, ready to serve.
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    state: AppState,
    health: Arc<HealthState>,
    session_store: Arc<dyn SessionStore>,
    ratelimit_store: Arc<dyn RateLimitStore>,
}

impl GatewayServer {
    /// Build the gateway, connecting to configured external stores.
    pub async fn build(config: GatewayConfig) -> Result<Self, ServerError> {
        let session_store: Arc<dyn SessionStore> = match &config.session.store_url {
            Some(url) => Arc::new(
                RedisSessionStore::connect(url)
                    .await
                    .map_err(|e| ServerError::StoreUnreachable(e.to_string()))?,
            ),
            None => Arc::new(InMemorySessionStore::new()),
        };
        let ratelimit_store: Arc<dyn RateLimitStore> = match &config.rate_limit.store_url {
            Some(url) => Arc::new(
                RedisRateLimitStore::connect(url)
                    .await
                    .map_err(|e| ServerError::StoreUnreachable(e.to_string()))?,
            ),
            None => Arc::new(InMemoryRateLimitStore::new()),
        };

        Self::build_with_stores(config, session_store, ratelimit_store).await
    }

    /// Build with explicit store implementations. The store choice is
    /// separate from store semantics; tests inject in-process stores.
    pub async fn build_with_stores(
        config: GatewayConfig,
        session_store: Arc<dyn SessionStore>,
        ratelimit_store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, ServerError> {
        let config = Arc::new(config);

        if config.require_store_on_start {
            session_store
                .ping()
                .await
                .map_err(|e| ServerError::StoreUnreachable(format!("session store: {}", e)))?;
            ratelimit_store
                .ping()
                .await
                .map_err(|e| ServerError::StoreUnreachable(format!("rate limit store: {}", e)))?;
        }

        let router =
            Router::from_config(&config.routes).map_err(|e| ServerError::Config(e.to_string()))?;

        let validator = Arc::new(TokenValidator::new(
            session_store.clone(),
            config.session.clone(),
        ));
        let refresher = Arc::new(TokenRefresher::new(
            session_store.clone(),
            config.session.clone(),
            config.server.tls_enabled(),
        ));
        let authorizer = Authorizer::new(config.session.super_roles.clone());
        let limiter = Arc::new(RateLimiter::new(
            ratelimit_store.clone(),
            config.rate_limit.clone(),
        ));
        let upstream_client = Arc::new(UpstreamClient::new(
            config.upstream.clone(),
            config.server.request_body_max,
        ));

        let pipeline = Arc::new(Pipeline::new(vec![
            Arc::new(CorrelationStage),
            Arc::new(RecoveryStage),
            Arc::new(LoggingStage::new(config.log.redact_headers.clone())),
            Arc::new(ResolveStage::new(Arc::new(router))),
            Arc::new(AuthStage::new(
                TokenExtractor::new(config.session.cookie_name.clone()),
                validator,
                refresher,
            )),
            Arc::new(AuthorizeStage::new(authorizer)),
            Arc::new(RateLimitStage::new(limiter)),
            Arc::new(ProxyStage::new(
                upstream_client,
                config.session.cookie_name.clone(),
                config.server.security_headers,
                config.server.content_security_policy.clone(),
            )),
        ]));

        let health = Arc::new(HealthState::new(Duration::from_secs(
            config.health.freshness_window_secs,
        )));

        let state = AppState {
            pipeline,
            in_flight: Arc::new(Semaphore::new(config.server.max_in_flight)),
            max_in_flight: config.server.max_in_flight,
            scheme: if config.server.tls_enabled() {
                "https"
            } else {
                "http"
            },
        };

        Ok(Self {
            config,
            state,
            health,
            session_store,
            ratelimit_store,
        })
    }

    /// The session store backing this gateway.
    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        self.session_store.clone()
    }

    /// Serve until shutdown triggers.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.server.listen_addr())
            .await
            .map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;

        admin::spawn(
            self.config.health.clone(),
            self.health.clone(),
            shutdown.subscribe(),
        )
        .await
        .map_err(ServerError::Bind)?;

        if self.config.metrics.enabled {
            let addr: SocketAddr = self
                .config
                .metrics
                .bind_address
                .parse()
                .map_err(|e| ServerError::Config(format!("metrics.bind_address: {}", e)))?;
            metrics::init_metrics(addr)
                .map_err(|e| ServerError::Bind(std::io::Error::other(e)))?;
        }

        let prober = HealthProber::new(
            self.session_store.clone(),
            self.ratelimit_store.clone(),
            self.health.clone(),
            &self.config.health,
        );
        prober.probe_once().await;
        tokio::spawn(prober.run(shutdown.subscribe()));

        let app = axum::Router::new()
            .fallback(gateway_handler)
            .with_state(self.state.clone())
            .layer(tower_http::trace::TraceLayer::new_for_http());

        self.health.mark_listener_up();
        tracing::info!(
            address = %local_addr,
            routes = self.config.routes.len(),
            max_in_flight = self.config.server.max_in_flight,
            tls = self.config.server.tls_enabled(),
            "Gateway listening"
        );

        if self.config.server.tls_enabled() {
            let tls = self
                .config
                .server
                .tls
                .as_ref()
                .expect("tls_enabled implies tls config");
            let acceptor = build_acceptor(tls)?;
            serve_tls(listener, acceptor, app, shutdown.subscribe()).await
        } else {
            let mut rx = shutdown.subscribe();
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            })
            .await
            .map_err(ServerError::Bind)?;
            Ok(())
        }
    }
}

/// Fallback handler: admission control, context creation, dispatch.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let Ok(_permit) = state.in_flight.clone().try_acquire_owned() else {
        let correlation_id = correlation::resolve(request.headers());
        tracing::warn!(
            correlation_id = %correlation_id,
            client_ip = %addr.ip(),
            "Admission cap reached"
        );
        return GatewayError::ServiceUnavailable {
            retry_after_secs: 1,
        }
        .into_response(&correlation_id);
    };
    metrics::set_in_flight(state.max_in_flight - state.in_flight.available_permits());

    let mut ctx = RequestContext::new(
        request.method().clone(),
        request.uri().path().to_string(),
        addr.ip().to_string(),
        state.scheme,
    );
    let response = state.pipeline.dispatch(request, &mut ctx).await;
    metrics::set_in_flight(state.max_in_flight - state.in_flight.available_permits());
    response
}

/// TLS accept loop: handshake with a deadline, then serve the
/// connection through hyper's auto (h1/h2) builder.
async fn serve_tls(
    listener: TcpListener,
    acceptor: tokio_rustls::TlsAcceptor,
    app: axum::Router,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

    let mut make = app.into_make_service_with_connect_info::<SocketAddr>();

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                let service = match make.call(peer).await {
                    Ok(service) => service,
                    Err(_) => continue,
                };
                let acceptor = acceptor.clone();

                tokio::spawn(async move {
                    match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                        Ok(Ok(tls_stream)) => {
                            let result = hyper_util::server::conn::auto::Builder::new(
                                TokioExecutor::new(),
                            )
                            .serve_connection_with_upgrades(
                                TokioIo::new(tls_stream),
                                TowerToHyperService::new(service),
                            )
                            .await;
                            if let Err(e) = result {
                                tracing::debug!(peer = %peer, error = %e, "Connection ended with error");
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(peer = %peer, error = %e, "TLS handshake failed");
                        }
                        Err(_) => {
                            tracing::debug!(peer = %peer, "TLS handshake timed out");
                        }
                    }
                });
            }
        }
    }
    Ok(())
}
