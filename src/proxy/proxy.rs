// src/proxy/proxy.rs
use crate::config::Config;
use crate::health::HealthChecker;
use crate::load_balancer::{create_load_balancer, LoadBalancer};
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};
use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Uri};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Forwards one inbound request to one selected backend.
///
/// Bodies pass through `hyper::Body` in both directions, so memory use is
/// bounded by stream buffers rather than payload size. Dropping the returned
/// response (caller gone) cancels the in-flight backend request.
pub struct Proxy {
    config: Config,
    pool: Arc<BackendPool>,
    balancer: Arc<dyn LoadBalancer>,
    client: hyper::Client<HttpsConnector<HttpConnector>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        config: Config,
        pool: Arc<BackendPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let balancer = create_load_balancer(config.load_balancer.algorithm);
        let client = hyper::Client::builder().build::<_, Body>(HttpsConnector::new());

        info!("Using load balancing algorithm: {}", balancer.name());

        Self {
            config,
            pool,
            balancer,
            client,
            metrics,
        }
    }

    /// Spawn the background health-check loop; the handle can signal shutdown.
    pub fn start_health_checker(&self) -> Arc<HealthChecker> {
        let checker = Arc::new(HealthChecker::new(
            self.config.health_check.clone(),
            self.pool.clone(),
            self.metrics.clone(),
        ));
        tokio::spawn(checker.clone().start());
        checker
    }

    /// Select a backend and forward. One selection, one attempt: a failed
    /// forward answers the caller instead of trying the next backend.
    pub async fn handle(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let request_id = Uuid::new_v4();
        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let backend = match self.balancer.select_backend(self.pool.snapshot()).await {
            Some(backend) => backend,
            None => {
                warn!(%request_id, %method, %path, "No healthy backends available");
                return ProxyError::NoHealthyBackends.into();
            }
        };

        debug!(
            %request_id,
            backend = %backend.id,
            avg_rt_ms = backend.avg_latency_ms(),
            %method,
            %path,
            "Selected backend"
        );

        match self.forward(&backend, req, client_addr).await {
            Ok(response) => {
                backend.record_request(true);
                response
            }
            Err(e) => {
                backend.record_request(false);
                warn!(%request_id, backend = %backend.id, error = %e, "Forward failed");
                e.into()
            }
        }
    }

    async fn forward(
        &self,
        backend: &Arc<Backend>,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        let method = req.method().clone();
        let uri = backend_uri(&backend.url, req.uri())?;

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        if let Some(addr) = client_addr {
            // Overwrite rather than append: the direct caller is what the
            // backend gets to see.
            let value = HeaderValue::from_str(&addr.ip().to_string())
                .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
            parts
                .headers
                .insert(HeaderName::from_static("x-forwarded-for"), value);
        }
        let outbound = Request::from_parts(parts, body);

        // Latency is dispatch → response headers; body transfer is excluded.
        let start = Instant::now();
        let response = timeout(
            self.config.proxy.request_timeout(),
            self.client.request(outbound),
        )
        .await
        .map_err(|_| ProxyError::Timeout)?
        .map_err(|e| {
            if e.is_connect() {
                ProxyError::Connect(e.to_string())
            } else {
                ProxyError::Upstream(e.to_string())
            }
        })?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.pool.record_latency(&backend.id, elapsed_ms);

        if let Some(metrics) = &self.metrics {
            metrics.record_request(
                method.as_str(),
                response.status().as_u16(),
                &backend.id,
                start.elapsed(),
            );
        }

        debug!(
            backend = %backend.id,
            status = %response.status(),
            elapsed_ms,
            "Response headers received"
        );

        Ok(response)
    }
}

/// Swap scheme and authority for the backend's; keep path and query verbatim.
fn backend_uri(base: &Url, inbound: &Uri) -> Result<Uri, ProxyError> {
    let host = base
        .host_str()
        .ok_or_else(|| ProxyError::InvalidTarget(format!("Backend URL has no host: {}", base)))?;
    let authority = match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path_and_query = inbound
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(base.scheme())
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Failed to connect to backend: {0}")]
    Connect(String),

    #[error("Backend error: {0}")]
    Upstream(String),

    #[error("Backend request timeout")]
    Timeout,

    #[error("Invalid request target: {0}")]
    InvalidTarget(String),
}

// Error-to-response mapping for callers; bodies are plain text.
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let (status, message) = match err {
            ProxyError::NoHealthyBackends => (503, "No healthy backend servers available"),
            ProxyError::Connect(_) | ProxyError::Upstream(_) => (502, "Bad gateway"),
            ProxyError::Timeout => (504, "Gateway timeout"),
            ProxyError::InvalidTarget(_) => (500, "Internal server error"),
        };

        Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from(message))
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, Config, ProxyConfig};

    fn config_for(urls: &[&str], request_timeout_ms: u64) -> Config {
        let yaml = "backends: []";
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.backends = urls
            .iter()
            .map(|u| BackendConfig {
                url: Url::parse(u).unwrap(),
            })
            .collect();
        config.proxy = ProxyConfig { request_timeout_ms };
        config
    }

    fn proxy_for(config: &Config) -> (Proxy, Arc<BackendPool>) {
        let pool = Arc::new(BackendPool::new(&config.backends));
        (Proxy::new(config.clone(), pool.clone(), None), pool)
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_forward_preserves_status_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/created")
            .with_status(201)
            .with_header("x-foo", "bar")
            .with_body("made")
            .create_async()
            .await;

        let config = config_for(&[&server.url()], 5_000);
        let (proxy, pool) = proxy_for(&config);

        let response = proxy.handle(get("/created"), None).await;
        assert_eq!(response.status(), 201);
        assert_eq!(response.headers().get("x-foo").unwrap(), "bar");
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"made");

        // One latency sample recorded at header receipt.
        let backend = &pool.snapshot()[0];
        assert_eq!(backend.latency_samples().len(), 1);
        assert_eq!(backend.get_metrics().total_requests, 1);
        assert_eq!(backend.get_metrics().failed_requests, 0);
    }

    #[tokio::test]
    async fn test_query_string_passes_through() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search?q=abc&page=2")
            .with_status(200)
            .create_async()
            .await;

        let config = config_for(&[&server.url()], 5_000);
        let (proxy, _pool) = proxy_for(&config);

        let response = proxy.handle(get("/search?q=abc&page=2"), None).await;
        assert_eq!(response.status(), 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_forwarded_for_header_is_set() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_header("x-forwarded-for", "203.0.113.9")
            .with_status(200)
            .create_async()
            .await;

        let config = config_for(&[&server.url()], 5_000);
        let (proxy, _pool) = proxy_for(&config);

        let caller: SocketAddr = "203.0.113.9:51423".parse().unwrap();
        let response = proxy.handle(get("/"), Some(caller)).await;
        assert_eq!(response.status(), 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_healthy_backend_yields_503_without_dialing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let config = config_for(&[&server.url()], 5_000);
        let (proxy, pool) = proxy_for(&config);
        pool.set_healthy(&pool.snapshot()[0].id.clone(), false);

        let response = proxy.handle(get("/"), None).await;
        assert_eq!(response.status(), 503);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"No healthy backend servers available");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_refused_yields_502() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = format!("http://127.0.0.1:{}", port);
        let config = config_for(&[&url], 5_000);
        let (proxy, pool) = proxy_for(&config);

        let response = proxy.handle(get("/"), None).await;
        assert_eq!(response.status(), 502);

        // Connection failures never produce latency samples.
        let backend = &pool.snapshot()[0];
        assert!(backend.latency_samples().is_empty());
        assert_eq!(backend.get_metrics().failed_requests, 1);

        // The failed forward does not touch health state; only the health
        // checker does that.
        assert!(backend.is_healthy());
    }

    #[tokio::test]
    async fn test_unresponsive_backend_yields_504() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            }
        });

        let url = format!("http://127.0.0.1:{}", port);
        let config = config_for(&[&url], 200);
        let (proxy, _pool) = proxy_for(&config);

        let response = proxy.handle(get("/"), None).await;
        assert_eq!(response.status(), 504);
    }

    #[test]
    fn test_backend_uri_rewrites_authority_only() {
        let base = Url::parse("http://10.0.0.5:8081").unwrap();
        let inbound: Uri = "/api/items?limit=5".parse().unwrap();
        let uri = backend_uri(&base, &inbound).unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.5:8081/api/items?limit=5");
    }

    #[test]
    fn test_backend_uri_default_port_omitted() {
        let base = Url::parse("http://backend.internal").unwrap();
        let inbound: Uri = "/".parse().unwrap();
        let uri = backend_uri(&base, &inbound).unwrap();
        assert_eq!(uri.to_string(), "http://backend.internal/");
    }
}
