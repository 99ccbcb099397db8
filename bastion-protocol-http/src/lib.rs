mod catchall;
pub mod common;
mod error;
mod fragment;
mod proxy;

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bastion_common::ListenEndpoint;
use bastion_core::{ProtocolServer, Services};
use poem::listener::TcpListener;
use poem::{Endpoint, EndpointExt, Route, Server};
use tracing::*;

use crate::catchall::catchall_endpoint;
use crate::common::AUTH_PATH;
use crate::fragment::fragment_endpoint;
pub use crate::proxy::ForwardingProxy;

#[derive(Clone)]
pub struct HTTPProtocolServer {
    services: Services,
}

impl HTTPProtocolServer {
    pub async fn new(services: &Services) -> Result<Self> {
        Ok(HTTPProtocolServer {
            services: services.clone(),
        })
    }
}

pub async fn make_app(services: &Services) -> Result<impl Endpoint> {
    let upstream_timeout = services.config.lock().await.store.http.upstream_timeout;
    let proxy = Arc::new(ForwardingProxy::new(upstream_timeout)?);

    Ok(Route::new()
        .at(AUTH_PATH, fragment_endpoint)
        .nest_no_strip("/", catchall_endpoint)
        .data(services.clone())
        .data(proxy))
}

#[async_trait]
impl ProtocolServer for HTTPProtocolServer {
    async fn run(self, address: ListenEndpoint) -> Result<()> {
        let app = make_app(&self.services).await?;

        info!(?address, "Listening");
        Server::new(TcpListener::bind(address.0))
            .run(app)
            .await
            .context("Failed to start HTTP server")
    }
}

impl Debug for HTTPProtocolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTPProtocolServer")
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bastion_common::{
        AppConfig, BastionConfig, BastionConfigStore, ClusterConfig, Secret, SessionTokenConfig,
        UserConfig,
    };
    use http::StatusCode;
    use poem::listener::{Acceptor, Listener};
    use poem::test::TestClient;
    use poem::web::Data;
    use poem::{handler, Request};
    use serde_json::json;

    use super::*;

    #[handler]
    fn echo(req: &Request, hits: Data<&Arc<AtomicUsize>>) -> String {
        hits.fetch_add(1, Ordering::SeqCst);
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_owned()
        };
        format!(
            "{} {}\ncookie: {}\nx-forwarded-host: {}\nx-forwarded-proto: {}",
            req.method(),
            req.uri(),
            header("cookie"),
            header("x-forwarded-host"),
            header("x-forwarded-proto"),
        )
    }

    async fn start_backend() -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let acceptor = TcpListener::bind("127.0.0.1:0")
            .into_acceptor()
            .await
            .unwrap();
        let addr = *acceptor.local_addr()[0].as_socket_addr().unwrap();
        tokio::spawn(
            Server::new_with_acceptor(acceptor)
                .run(Route::new().nest_no_strip("/", echo).data(hits.clone())),
        );
        (addr, hits)
    }

    fn config(backend: SocketAddr) -> BastionConfig {
        let store = BastionConfigStore {
            clusters: vec![ClusterConfig {
                name: "east".into(),
                apps: vec![
                    AppConfig {
                        name: "grafana".into(),
                        public_host: "grafana.east.example.com".into(),
                        internal_addr: backend.to_string(),
                    },
                    AppConfig {
                        name: "kibana".into(),
                        public_host: "kibana.east.example.com".into(),
                        internal_addr: backend.to_string(),
                    },
                ],
            }],
            users: vec![UserConfig {
                username: "alice".into(),
                tokens: vec![SessionTokenConfig {
                    token: Secret::new("tok-alice".into()),
                    app_host: "grafana.east.example.com".into(),
                }],
                allowed_apps: vec!["grafana".into()],
            }],
            ..Default::default()
        };
        BastionConfig {
            store,
            ..Default::default()
        }
    }

    async fn setup() -> (Services, Arc<AtomicUsize>) {
        let (backend, hits) = start_backend().await;
        (Services::new(config(backend)).await.unwrap(), hits)
    }

    #[tokio::test]
    async fn test_forwards_authenticated_request() {
        let (services, hits) = setup().await;
        let cli = TestClient::new(make_app(&services).await.unwrap());

        let resp = cli
            .get("/api/health?verbose=1")
            .header("host", "grafana.east.example.com")
            .header("cookie", "theme=dark; bastion-app-session=tok-alice")
            .send()
            .await;
        resp.assert_status_is_ok();
        let text = resp.0.into_body().into_string().await.unwrap();

        assert!(text.starts_with("GET /api/health?verbose=1"), "{text}");
        assert!(text.contains("cookie: theme=dark\n"), "{text}");
        assert!(
            text.contains("x-forwarded-host: grafana.east.example.com"),
            "{text}"
        );
        assert!(text.contains("x-forwarded-proto: http"), "{text}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_revoked_access_blocks_forward_without_backend_io() {
        let (services, hits) = setup().await;
        let cli = TestClient::new(make_app(&services).await.unwrap());

        cli.get("/")
            .header("host", "grafana.east.example.com")
            .header("cookie", "bastion-app-session=tok-alice")
            .send()
            .await
            .assert_status_is_ok();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        services.config.lock().await.store.users[0]
            .allowed_apps
            .clear();

        let resp = cli
            .get("/")
            .header("host", "grafana.east.example.com")
            .header("cookie", "bastion-app-session=tok-alice")
            .send()
            .await;
        resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        resp.assert_text("internal service error").await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_host_outside_session_app_is_refused_without_backend_io() {
        let (services, hits) = setup().await;
        let cli = TestClient::new(make_app(&services).await.unwrap());

        let resp = cli
            .get("/")
            .header("host", "kibana.east.example.com")
            .header("cookie", "bastion-app-session=tok-alice")
            .send()
            .await;
        resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        resp.assert_text("internal service error").await;

        cli.get("/")
            .header("cookie", "bastion-app-session=tok-alice")
            .send()
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        cli.get("/")
            .header("host", "grafana.east.example.com:443")
            .header("cookie", "bastion-app-session=tok-alice")
            .send()
            .await
            .assert_status_is_ok();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_or_unknown_cookie() {
        let (services, hits) = setup().await;
        let cli = TestClient::new(make_app(&services).await.unwrap());

        cli.get("/")
            .send()
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        cli.get("/")
            .header("cookie", "bastion-app-session=tok-mallory")
            .send()
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fragment_bootstrap_page() {
        let (services, _) = setup().await;
        let cli = TestClient::new(make_app(&services).await.unwrap());

        let resp = cli.get(AUTH_PATH).send().await;
        resp.assert_status_is_ok();
        resp.assert_header_is_not_exist(http::header::SET_COOKIE);
        let text = resp.0.into_body().into_string().await.unwrap();
        assert!(text.contains("cookie_value"));
    }

    #[tokio::test]
    async fn test_fragment_post_sets_cookie() {
        let (services, _) = setup().await;
        let cli = TestClient::new(make_app(&services).await.unwrap());

        let resp = cli
            .post(AUTH_PATH)
            .body_json(&json!({ "cookie_value": "tok-alice" }))
            .send()
            .await;
        resp.assert_status_is_ok();
        let cookie = resp
            .0
            .headers()
            .get(http::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_owned();
        assert!(cookie.starts_with("bastion-app-session=tok-alice"), "{cookie}");
        assert!(cookie.contains("HttpOnly"), "{cookie}");
        assert!(cookie.contains("SameSite=Lax"), "{cookie}");
        assert!(cookie.contains("Path=/"), "{cookie}");
        assert_eq!(services.session_cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_fragment_post_rejects_invalid_token() {
        let (services, _) = setup().await;
        let cli = TestClient::new(make_app(&services).await.unwrap());

        let resp = cli
            .post(AUTH_PATH)
            .body_json(&json!({ "cookie_value": "tok-mallory" }))
            .send()
            .await;
        resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        resp.assert_header_is_not_exist(http::header::SET_COOKIE);

        let resp = cli.post(AUTH_PATH).body("{not json").send().await;
        resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        resp.assert_header_is_not_exist(http::header::SET_COOKIE);
    }

    #[tokio::test]
    async fn test_fragment_rejects_other_methods() {
        let (services, _) = setup().await;
        let cli = TestClient::new(make_app(&services).await.unwrap());

        cli.put(AUTH_PATH)
            .send()
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_session_by_default() {
        let (services, _) = setup().await;
        services.config.lock().await.store.clusters[0].apps[0].internal_addr =
            "127.0.0.1:1".into();
        let cli = TestClient::new(make_app(&services).await.unwrap());

        cli.get("/")
            .header("host", "grafana.east.example.com")
            .header("cookie", "bastion-app-session=tok-alice")
            .send()
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(services.session_cache.len().await, 1);

        services
            .config
            .lock()
            .await
            .store
            .http
            .invalidate_session_on_backend_error = true;
        cli.get("/")
            .header("host", "grafana.east.example.com")
            .header("cookie", "bastion-app-session=tok-alice")
            .send()
            .await
            .assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(services.session_cache.len().await, 0);
    }
}
