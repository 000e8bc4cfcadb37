//! HTTP boundary: static client, WebSocket upgrade, hub start-up.
//!
//! Routes:
//! ```text
//! GET /          → <web_root>/index.html
//! GET /web/*     → files under <web_root>
//! GET /ws        → WebSocket upgrade → Connection → Hub
//! ```

use std::env;
use std::future::Future;
use std::path::PathBuf;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};

use crate::connection::Connection;
use crate::hub::{Hub, HubHandle};
use crate::identity::ParticipantIdentity;
use crate::render::{MarkdownRenderer, Renderer};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Directory holding index.html and client assets
    pub web_root: PathBuf,
    /// Outbound frames buffered per connection before it is dropped
    pub outbound_capacity: usize,
    /// Hub event queue length; readers wait when it is full
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8888".to_string(),
            web_root: PathBuf::from("web"),
            outbound_capacity: 256,
            event_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Defaults, overridden by `MDSYNC_ADDR` and `MDSYNC_WEB_ROOT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env::var("MDSYNC_ADDR").unwrap_or(defaults.bind_addr),
            web_root: env::var_os("MDSYNC_WEB_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.web_root),
            outbound_capacity: defaults.outbound_capacity,
            event_capacity: defaults.event_capacity,
        }
    }
}

/// Server errors. Only binding is fatal; per-connection failures never
/// reach this level.
#[derive(Debug)]
pub enum ServerError {
    Bind { addr: String, source: std::io::Error },
    Serve(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "Failed to bind {addr}: {source}"),
            Self::Serve(e) => write!(f, "Server error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            Self::Serve(e) => Some(e),
        }
    }
}

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    outbound_capacity: usize,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    hub: HubHandle,
}

impl RelayServer {
    /// Start a hub with the Markdown renderer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_renderer(config, MarkdownRenderer::new())
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn with_renderer<R: Renderer>(config: ServerConfig, renderer: R) -> Self {
        let hub = Hub::new(renderer).spawn(config.event_capacity);
        Self { config, hub }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle to the running hub.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            outbound_capacity: self.config.outbound_capacity,
        };
        let web_root = &self.config.web_root;

        Router::new()
            .route_service("/", ServeFile::new(web_root.join("index.html")))
            .nest_service("/web", ServeDir::new(web_root))
            .route("/ws", get(ws_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve forever.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match listener.local_addr() {
            Ok(addr) => log::info!("Relay listening on http://{addr}"),
            Err(_) => log::info!("Relay listening on {}", self.config.bind_addr),
        }

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Serve)?;

        log::info!("Relay shut down");
        Ok(())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let identity = ParticipantIdentity::generate();
    log::debug!("Upgrading connection for {}", identity.id);

    ws.on_upgrade(move |socket| {
        Connection::serve(socket, identity, state.outbound_capacity, state.hub)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn server_with_web_root() -> (RelayServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>editor</html>").unwrap();
        std::fs::write(dir.path().join("main.js"), "console.log('hi')").unwrap();

        let config = ServerConfig {
            web_root: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        (RelayServer::new(config), dir)
    }

    async fn fetch(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8888");
        assert_eq!(config.web_root, PathBuf::from("web"));
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_server_config_from_env() {
        env::set_var("MDSYNC_ADDR", "127.0.0.1:9999");
        env::set_var("MDSYNC_WEB_ROOT", "/srv/mdsync");
        let config = ServerConfig::from_env();
        env::remove_var("MDSYNC_ADDR");
        env::remove_var("MDSYNC_WEB_ROOT");

        assert_eq!(config.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.web_root, PathBuf::from("/srv/mdsync"));
        assert_eq!(config.outbound_capacity, 256);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = RelayServer::with_defaults();
        assert_eq!(server.bind_addr(), "0.0.0.0:8888");
        let snapshot = server.hub().snapshot().await.unwrap();
        assert_eq!(snapshot.document, "");
        assert_eq!(snapshot.stats.active_connections, 0);
    }

    #[tokio::test]
    async fn test_index_served_at_root() {
        let (server, _dir) = server_with_web_root();
        let (status, body) = fetch(server.router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<html>editor</html>");
    }

    #[tokio::test]
    async fn test_assets_served_under_prefix() {
        let (server, _dir) = server_with_web_root();
        let (status, body) = fetch(server.router(), "/web/main.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log('hi')");
    }

    #[tokio::test]
    async fn test_unknown_paths_404() {
        let (server, _dir) = server_with_web_root();
        let (status, _) = fetch(server.router(), "/index.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = fetch(server.router(), "/web/missing.css").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let (server, _dir) = server_with_web_root();
        let (status, _) = fetch(server.router(), "/ws").await;
        assert!(status.is_client_error(), "got {status}");
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let config = ServerConfig {
            bind_addr: addr.clone(),
            ..ServerConfig::default()
        };
        let err = RelayServer::new(config).run().await.unwrap_err();
        match err {
            ServerError::Bind { addr: reported, .. } => assert_eq!(reported, addr),
            other => panic!("expected bind error, got {other}"),
        }
    }
}
