use crate::app::{build_http_app, build_rpc_app};
use crate::config::ServerConfig;
use crate::snapshot::Snapshotter;
use crate::state::{AppState, Envelope};
use anyhow::Context;
use metrika_common::Backoff;
use metrika_storage::{DbStorage, MemStorage, MetricStore};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Restoring,
    Serving,
    Draining,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Restoring => "restoring",
            Phase::Serving => "serving",
            Phase::Draining => "draining",
            Phase::Closed => "closed",
        };
        f.write_str(s)
    }
}

fn transition(phase: &mut Phase, next: Phase) {
    tracing::info!(from = %phase, to = %next, "Server phase");
    *phase = next;
}

/// A server whose storage is ready and whose listeners are bound.
pub struct Server {
    state: AppState,
    store: Arc<dyn MetricStore>,
    snapshotter: Option<Snapshotter>,
    snapshot_cancel: CancellationToken,
    http: TcpListener,
    rpc: TcpListener,
    phase: Phase,
}

impl Server {
    /// Loads keys, opens storage, restores the snapshot, starts the
    /// snapshotter and binds both listeners, in that order.
    pub async fn build(config: ServerConfig, cancel: &CancellationToken) -> anyhow::Result<Self> {
        let mut phase = Phase::Init;
        tracing::info!(phase = %phase, "Starting metrika server");

        let envelope = Envelope::from_config(&config)?;
        let backoff = Backoff::default();

        let store: Arc<dyn MetricStore> = if config.uses_database() {
            let dsn = config.database_dsn.clone();
            let db = backoff
                .retry(Some(cancel), || DbStorage::connect(&dsn))
                .await
                .context("connect to database")?;
            Arc::new(db)
        } else {
            match config.snapshot_path() {
                Some(path) => Arc::new(MemStorage::with_snapshot_path(path)),
                None => Arc::new(MemStorage::new()),
            }
        };

        if config.restore && !config.uses_database() {
            if let Some(path) = config.snapshot_path() {
                transition(&mut phase, Phase::Restoring);
                if let Err(e) = backoff.retry(Some(cancel), || store.restore(path)).await {
                    transition(&mut phase, Phase::Closed);
                    return Err(anyhow::Error::new(e)
                        .context(format!("restore snapshot {}", path.display())));
                }
            }
        }

        let snapshot_cancel = cancel.child_token();
        let snapshotter = match (config.uses_database(), config.snapshot_path(), config.store_period()) {
            (false, Some(path), Some(period)) => Some(Snapshotter::spawn(
                store.clone(),
                path.to_path_buf(),
                period,
                backoff.clone(),
                snapshot_cancel.clone(),
            )),
            _ => None,
        };

        let state = AppState::new(&config, store.clone(), envelope);

        let bound = async {
            let http = TcpListener::bind(&config.address)
                .await
                .with_context(|| format!("bind HTTP listener on {}", config.address))?;
            let rpc = TcpListener::bind(&config.grpc_address)
                .await
                .with_context(|| format!("bind RPC listener on {}", config.grpc_address))?;
            anyhow::Ok((http, rpc))
        }
        .await;
        let (http, rpc) = match bound {
            Ok(listeners) => listeners,
            Err(e) => {
                snapshot_cancel.cancel();
                if let Some(s) = snapshotter {
                    s.join().await;
                }
                transition(&mut phase, Phase::Closed);
                return Err(e);
            }
        };

        Ok(Self {
            state,
            store,
            snapshotter,
            snapshot_cancel,
            http,
            rpc,
            phase,
        })
    }

    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http.local_addr()
    }

    pub fn rpc_addr(&self) -> std::io::Result<SocketAddr> {
        self.rpc.local_addr()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Serves both listeners until `cancel` fires, then drains in-flight
    /// requests, stops the snapshotter and closes the store.
    pub async fn serve(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let Server {
            state,
            store,
            snapshotter,
            snapshot_cancel,
            http,
            rpc,
            mut phase,
        } = self;

        transition(&mut phase, Phase::Serving);
        tracing::info!(
            http = ?http.local_addr().ok(),
            rpc = ?rpc.local_addr().ok(),
            backend = store.backend(),
            "Listening"
        );

        let http_server = axum::serve(http, build_http_app(state.clone()))
            .with_graceful_shutdown(cancel.clone().cancelled_owned());
        let rpc_server = axum::serve(rpc, build_rpc_app(state))
            .with_graceful_shutdown(cancel.clone().cancelled_owned());

        let served = tokio::try_join!(
            async { http_server.await.context("HTTP listener failed") },
            async { rpc_server.await.context("RPC listener failed") },
        );

        transition(&mut phase, Phase::Draining);
        snapshot_cancel.cancel();
        if let Some(s) = snapshotter {
            s.join().await;
        }
        let closed = store.close().await;
        transition(&mut phase, Phase::Closed);

        served?;
        closed.context("close storage")?;
        Ok(())
    }
}

/// Builds and serves until `cancel` fires.
pub async fn run(config: ServerConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    Server::build(config, &cancel).await?.serve(cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            address: "127.0.0.1:0".into(),
            grpc_address: "127.0.0.1:0".into(),
            file_storage_path: dir.join("metrics-db.json"),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn garbage_snapshot_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        std::fs::write(&config.file_storage_path, "{not json").unwrap();

        let cancel = CancellationToken::new();
        assert!(Server::build(config, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn shutdown_writes_final_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let path = config.file_storage_path.clone();

        let cancel = CancellationToken::new();
        let server = Server::build(config, &cancel).await.unwrap();
        assert_eq!(server.phase(), Phase::Restoring);
        server
            .store
            .update_metric(&metrika_common::Metric::gauge("g", 1.0))
            .await
            .unwrap();

        let task = tokio::spawn(server.serve(cancel.clone()));
        cancel.cancel();
        task.await.unwrap().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"g\""));
    }

    #[tokio::test]
    async fn bad_subnet_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            trusted_subnet: "not-a-cidr".into(),
            ..local_config(dir.path())
        };
        let cancel = CancellationToken::new();
        assert!(Server::build(config, &cancel).await.is_err());
    }
}
