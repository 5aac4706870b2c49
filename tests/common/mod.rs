//! Shared utilities for integration testing.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use gatehouse::config::{GatewayConfig, RouteConfig};
use gatehouse::ratelimit::{InMemoryRateLimitStore, RateLimitStore};
use gatehouse::session::{now_secs, InMemorySessionStore, SessionRecord, SessionStore};
use gatehouse::{GatewayServer, Shutdown};

/// Start a simple mock backend that returns a fixed response body.
pub async fn start_mock_backend(addr: SocketAddr, response: &'static str) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a programmable mock backend with async support.
#[allow(dead_code)]
pub async fn start_programmable_backend<F, Fut>(addr: SocketAddr, f: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 8192];
                        let _ = socket.read(&mut buf).await;
                        let (status, body) = f().await;
                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a backend that echoes the received request head in the body,
/// for asserting what the gateway actually forwarded.
#[allow(dead_code)]
pub async fn start_echo_head_backend(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut head = Vec::new();
                        let mut buf = [0u8; 1024];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) => break,
                                Ok(n) => {
                                    head.extend_from_slice(&buf[..n]);
                                    if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                        break;
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                        let body = String::from_utf8_lossy(&head).into_owned();
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Start a backend that reads the entire request body (per
/// Content-Length) before answering, so body-cap failures surface as
/// errors instead of racing an early response.
#[allow(dead_code)]
pub async fn start_slurp_backend(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut data = Vec::new();
                        let mut buf = [0u8; 4096];
                        let mut header_end = None;
                        let mut content_length = 0usize;

                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) => return,
                                Ok(n) => data.extend_from_slice(&buf[..n]),
                                Err(_) => return,
                            }
                            if header_end.is_none() {
                                if let Some(pos) =
                                    data.windows(4).position(|w| w == b"\r\n\r\n")
                                {
                                    header_end = Some(pos + 4);
                                    let head = String::from_utf8_lossy(&data[..pos]);
                                    for line in head.lines() {
                                        let lower = line.to_ascii_lowercase();
                                        if let Some(value) =
                                            lower.strip_prefix("content-length:")
                                        {
                                            content_length =
                                                value.trim().parse().unwrap_or(0);
                                        }
                                    }
                                }
                            }
                            if let Some(end) = header_end {
                                if data.len() >= end + content_length {
                                    break;
                                }
                            }
                        }

                        let response =
                            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// A minimal public route config.
#[allow(dead_code)]
pub fn public_route(id: &str, path: &str, methods: &[&str], upstream: &str) -> RouteConfig {
    RouteConfig {
        id: id.into(),
        path: path.into(),
        methods: methods.iter().map(|m| m.to_string()).collect(),
        upstream: upstream.into(),
        auth_required: false,
        permissions: Vec::new(),
        rate_limit: None,
        timeouts: None,
        retry: None,
        pass_session: false,
        refresh_allowed: true,
        priority: 0,
    }
}

/// A minimal protected route config.
#[allow(dead_code)]
pub fn protected_route(id: &str, path: &str, methods: &[&str], upstream: &str) -> RouteConfig {
    RouteConfig {
        auth_required: true,
        ..public_route(id, path, methods, upstream)
    }
}

/// Base test configuration: quiet logging, no metrics exporter, admin
/// listener on an ephemeral port.
#[allow(dead_code)]
pub fn base_config(proxy_addr: SocketAddr, routes: Vec<RouteConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.bind_address = proxy_addr.ip().to_string();
    config.server.port = proxy_addr.port();
    config.routes = routes;
    config.metrics.enabled = false;
    config.health.bind_address = "127.0.0.1:0".to_string();
    config.rate_limit.enabled = true;
    config
}

/// Running gateway handles shared by tests.
#[allow(dead_code)]
pub struct TestGateway {
    pub shutdown: Arc<Shutdown>,
    pub sessions: Arc<InMemorySessionStore>,
    pub ratelimits: Arc<InMemoryRateLimitStore>,
}

/// Build and spawn a gateway over in-process stores.
#[allow(dead_code)]
pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    let sessions = Arc::new(InMemorySessionStore::new());
    let ratelimits = Arc::new(InMemoryRateLimitStore::new());

    let server = GatewayServer::build_with_stores(
        config,
        sessions.clone() as Arc<dyn SessionStore>,
        ratelimits.clone() as Arc<dyn RateLimitStore>,
    )
    .await
    .expect("gateway build failed");

    let shutdown = Arc::new(Shutdown::new());
    let run_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = server.run(&run_shutdown).await {
            eprintln!("gateway exited with error: {}", e);
        }
    });

    // Give the listener a moment to come up.
    tokio::time::sleep(Duration::from_millis(300)).await;

    TestGateway {
        shutdown,
        sessions,
        ratelimits,
    }
}

/// Seed a session record that expires `ttl_secs` from now.
#[allow(dead_code)]
pub async fn seed_session(
    store: &InMemorySessionStore,
    session_id: &str,
    user_id: &str,
    ttl_secs: u64,
    roles: &[&str],
    permissions: &[&str],
) -> SessionRecord {
    let now = now_secs();
    let record = SessionRecord {
        session_id: session_id.into(),
        user_id: user_id.into(),
        created_at: now,
        last_access_at: now,
        expires_at: now + ttl_secs,
        revoked: false,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        bound_ip: None,
        rotated_at: None,
        metadata: HashMap::new(),
    };
    store
        .put(&record, Duration::from_secs(ttl_secs))
        .await
        .unwrap();
    record
}
