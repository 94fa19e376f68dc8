//! Router assembly and server bootstrap for the host gateway.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{any, get, post},
};
use tower_http::cors::CorsLayer;

use super::{api, proxy};
use crate::config::HostConfig;
use crate::executor::CommandExecutor;
use crate::idle::{IdleGovernor, exit_host};
use crate::supervisor::ProcessSupervisor;
use crate::workdir::WorkdirRegistry;

/// Connect timeout for upstream preview servers.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Overall timeout for one proxied upstream exchange.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Listener configuration for the serve command.
pub struct ServerConfig {
    pub port: u16,
    pub host: HostConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: HostConfig::default(),
        }
    }
}

/// Everything one host session owns: configuration, the working-directory
/// registry, the process supervisor, the idle governor, and the upstream
/// HTTP client. Explicitly passed by `Arc` rather than living in globals so
/// multiple isolated sessions stay possible.
pub struct HostSession {
    pub executor: CommandExecutor,
    pub idle: Arc<IdleGovernor>,
    pub http: reqwest::Client,
    pub started_at: std::time::Instant,
}

pub type SharedSession = Arc<HostSession>;

impl HostSession {
    pub fn new(config: HostConfig) -> Result<Self> {
        let workdirs = Arc::new(WorkdirRegistry::new(config.project_root.clone()));
        let supervisor = Arc::new(ProcessSupervisor::new(config.stop_grace));
        let idle = Arc::new(IdleGovernor::new(config.idle_window));
        // Redirects belong to the client, not the proxy; 3xx responses are
        // forwarded verbatim.
        let http = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .timeout(UPSTREAM_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            executor: CommandExecutor::new(config, workdirs, supervisor),
            idle,
            http,
            started_at: std::time::Instant::now(),
        })
    }
}

/// Build the full application router.
pub fn build_router(session: SharedSession) -> Router {
    Router::new()
        .route("/execute", post(api::execute))
        .route("/server/stop", post(api::server_stop))
        .route("/server/status", get(api::server_status))
        .route("/health", get(api::health))
        .route("/proxy/{port}", any(proxy::proxy_root))
        .route("/proxy/{port}/{*path}", any(proxy::proxy_path))
        .layer(CorsLayer::permissive())
        .with_state(session)
}

/// Start the gateway: bind, arm the idle governor, serve until ctrl-c or
/// idle expiry.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    config
        .host
        .ensure_project_root()
        .context("Failed to prepare project root")?;

    let session = Arc::new(HostSession::new(config.host)?);
    session.idle.clone().spawn_watch(exit_host);

    let app = build_router(session);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "outpost host listening");
    println!("Outpost host running at http://{local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_session() -> (TempDir, SharedSession) {
        let root = TempDir::new().unwrap();
        let mut config = HostConfig::default();
        config.project_root = root.path().to_path_buf();
        config.gateway_base = "http://gw.test".to_string();
        config.startup_window = Duration::from_millis(200);
        (root, Arc::new(HostSession::new(config).unwrap()))
    }

    fn test_router() -> (TempDir, SharedSession, Router) {
        let (root, session) = test_session();
        let router = build_router(session.clone());
        (root, session, router)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok_without_touching_idle() {
        let (_root, session, app) = test_router();
        session.idle.touch();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["uptime"].is_number());

        // Health is idle-inert: the clock kept running
        assert!(session.idle.idle_for() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn execute_runs_a_plain_command() {
        let (_root, session, app) = test_router();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"command": "echo gateway", "repositoryId": "demo"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["output"].as_str().unwrap().trim(), "gateway");
        assert_eq!(body["repository"], "demo");

        // Execute counts as activity
        assert!(session.idle.idle_for() < Duration::from_millis(30));
    }

    #[tokio::test]
    async fn execute_without_command_is_a_validation_failure() {
        let (_root, _session, app) = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["exitCode"], 1);
        assert!(body["error"].as_str().unwrap().contains("Invalid request"));
    }

    #[tokio::test]
    async fn execute_honors_working_dir_override() {
        let (root, _session, app) = test_router();
        let custom = root.path().join("elsewhere");
        std::fs::create_dir(&custom).unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "command": "pwd",
                            "repositoryId": "demo",
                            "workingDir": custom.display().to_string(),
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert!(
            body["output"]
                .as_str()
                .unwrap()
                .trim()
                .ends_with("elsewhere")
        );
    }

    #[tokio::test]
    async fn server_status_starts_empty() {
        let (_root, _session, app) = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/server/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["servers"].as_array().unwrap().len(), 0);
        assert!(body["exposedPorts"].is_array());
    }

    #[tokio::test]
    async fn server_stop_without_server_reports_nothing_running() {
        let (_root, _session, app) = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/server/stop")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"repositoryId": "demo"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(body["output"].as_str().unwrap().contains("demo"));
    }

    #[tokio::test]
    async fn server_stop_terminates_a_running_server() {
        let (root, session, app) = test_router();
        let dir = root.path().join("app");
        std::fs::create_dir(&dir).unwrap();
        session
            .executor
            .supervisor()
            .start(
                "demo",
                crate::supervisor::ProcessRole::DevServer,
                "sleep 30",
                &dir,
                3000,
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/server/stop")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"repositoryId": "demo"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert!(body["output"].as_str().unwrap().contains("dev-server"));
        assert!(
            session
                .executor
                .supervisor()
                .get("demo", crate::supervisor::ProcessRole::DevServer)
                .is_none()
        );
    }

    #[tokio::test]
    async fn proxy_to_dead_port_names_the_port() {
        let (_root, _session, app) = test_router();
        let response = app
            .oneshot(Request::builder().uri("/proxy/9").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("port 9"));
    }

    #[tokio::test]
    async fn proxy_inlines_stylesheet_into_html() {
        // Tiny upstream serving an HTML page and a stylesheet
        let upstream = Router::new()
            .route(
                "/",
                get(|| async {
                    axum::response::Html("<html><head></head><body>hi</body></html>")
                }),
            )
            .route(
                "/styles.css",
                get(|| async { ([("content-type", "text/css")], "body { margin: 0; }") }),
            );

        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Skipping proxy_inlines_stylesheet_into_html (sandbox): {e:?}");
                return;
            }
        };
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, upstream).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_root, _session, app) = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/proxy/{port}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "*"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8_lossy(&bytes);
        assert!(html.contains("<style>"));
        assert!(html.contains("body { margin: 0; }"));
        assert!(html.find("<style>").unwrap() < html.find("</head>").unwrap());
    }

    #[tokio::test]
    async fn proxy_preserves_upstream_headers_on_non_html() {
        let upstream = Router::new().route(
            "/data.json",
            get(|| async {
                (
                    [
                        ("content-type", "application/json"),
                        ("cache-control", "max-age=60"),
                        ("etag", "\"abc123\""),
                        ("x-preview-env", "demo"),
                    ],
                    "{\"k\":\"v\"}",
                )
            }),
        );

        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Skipping proxy_preserves_upstream_headers_on_non_html (sandbox): {e:?}");
                return;
            }
        };
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, upstream).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_root, _session, app) = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/proxy/{port}/data.json"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("cache-control").unwrap(), "max-age=60");
        assert_eq!(headers.get("etag").unwrap(), "\"abc123\"");
        assert_eq!(headers.get("x-preview-env").unwrap(), "demo");
        assert_eq!(headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn proxy_forwards_redirects_without_following() {
        let upstream = Router::new()
            .route(
                "/old",
                get(|| async { (StatusCode::FOUND, [("location", "/new")], "") }),
            )
            .route("/new", get(|| async { "landed" }));

        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Skipping proxy_forwards_redirects_without_following (sandbox): {e:?}");
                return;
            }
        };
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, upstream).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_root, _session, app) = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/proxy/{port}/old"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // The client decides whether to follow; the proxy reports the 302
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get("location").unwrap(), "/new");
    }

    #[tokio::test]
    async fn proxy_passes_non_html_through_unmodified() {
        let upstream = Router::new().route(
            "/data.json",
            get(|| async { axum::Json(serde_json::json!({"k": "v"})) }),
        );

        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Skipping proxy_passes_non_html_through_unmodified (sandbox): {e:?}");
                return;
            }
        };
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, upstream).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_root, _session, app) = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/proxy/{port}/data.json"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["k"], "v");
    }
}
