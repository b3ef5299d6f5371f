//! High-level Axum server wrapper.
//!
//! Hides router assembly and lifecycle behind a small API: add routes and
//! handlers, start, wait. Shutdown is graceful on Ctrl+C.

use axum::handler::Handler;
use axum::routing::{get, post};
use axum::{Json, Router};
use salonconfig::get_config;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tracing::info;

/// Serializable server identity, served on `/info`.
#[derive(Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub http_port: u16,
}

/// Main HTTP server.
pub struct Server {
    name: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(name: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self::new("SalonTV", config.get_http_port())
    }

    /// Add a JSON GET route backed by an async closure.
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = {
            let f = f.clone();
            move || {
                let f = f.clone();
                async move { Json(f().await) }
            }
        };

        let route = Router::new().route("/", get(handler));

        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            std::mem::take(&mut *r).nest(path, route)
        };
    }

    /// Add a standard Axum GET handler.
    pub async fn add_handler<H, T>(&mut self, path: &str, handler: H)
    where
        H: Handler<T, ()> + Clone + 'static,
        T: 'static,
    {
        let route = Router::new().route("/", get(handler.clone()));

        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            std::mem::take(&mut *r).nest(path, route)
        };
    }

    /// Add a GET handler carrying shared state.
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new()
            .route("/", get(handler.clone()))
            .with_state(state.clone());

        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            std::mem::take(&mut *r).nest(path, route)
        };
    }

    /// Add a POST handler carrying shared state.
    pub async fn add_post_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new()
            .route("/", post(handler.clone()))
            .with_state(state.clone());

        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            std::mem::take(&mut *r).nest(path, route)
        };
    }

    /// Add a sub-router, merged at "/" or nested elsewhere.
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let mut r = self.router.write().await;

        let combined = if path == "/" {
            r.clone().merge(sub_router)
        } else {
            let normalized = format!("/{}", path.trim_start_matches('/'));
            r.clone().nest(&normalized, sub_router)
        };

        *r = combined;
    }

    /// Start listening. Returns immediately; use [`Server::wait`] to block
    /// until Ctrl+C or server exit.
    pub async fn start(&mut self) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        info!("Server {} listening on port {}", self.name, self.http_port);

        let router = self.router.clone();
        let server_task = tokio::spawn(async move {
            let r = router.read().await.clone();
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            axum::serve(listener, r.into_make_service()).await.unwrap();
        });

        let shutdown_task = tokio::spawn(async move {
            signal::ctrl_c().await.expect("failed to listen for ctrl_c");
            info!("Ctrl+C received, shutting down");
        });

        self.join_handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = server_task => {},
                _ = shutdown_task => {},
            }
        }));
    }

    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            http_port: self.http_port,
        }
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            http_port,
        }
    }

    pub fn new_configured() -> Self {
        let config = get_config();
        Self {
            name: "SalonTV".to_string(),
            http_port: config.get_http_port(),
        }
    }

    pub fn build(self) -> Server {
        Server::new(self.name, self.http_port)
    }
}
