//! Static file server over the results directory so the dashboard can
//! fetch its artifacts.

use axum::Router;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

use crate::error::{Error, Result};

pub const DEFAULT_ADDR: &str = "127.0.0.1:8069";

pub struct DashboardServer {
    addr: SocketAddr,
    root: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl DashboardServer {
    /// Bind `addr` and start serving `root` in the background. Failing to
    /// bind is fatal for the caller.
    pub async fn start(root: &Path, addr: &str) -> Result<Self> {
        let unavailable = |reason: String| Error::ServeUnavailable {
            addr: addr.to_string(),
            reason,
        };

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let local = listener.local_addr().map_err(|e| unavailable(e.to_string()))?;

        let app = Router::new().fallback_service(ServeDir::new(root));
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!(error = %e, "dashboard server stopped");
            }
        });

        tracing::info!(addr = %local, root = %root.display(), "serving results");
        Ok(Self {
            addr: local,
            root: root.to_path_buf(),
            shutdown: Some(tx),
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL of a file under the served root.
    pub fn url(&self, file: &str) -> String {
        format!("http://{}/{}", self.addr, file.trim_start_matches('/'))
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for DashboardServer {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.handle.abort();
        }
    }
}
