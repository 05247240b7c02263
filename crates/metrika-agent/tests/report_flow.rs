use metrika_agent::config::{AgentConfig, TransportKind};
use metrika_agent::transport::{self, ReportError, Transport};
use metrika_agent::{MetricCache, Reporter};
use metrika_common::{Backoff, Metric};
use metrika_server::config::ServerConfig;
use metrika_server::server::Server;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SECRET: &str = "shared-secret";

struct Running {
    temp_dir: TempDir,
    http: SocketAddr,
    rpc: SocketAddr,
    public_key: Option<PathBuf>,
    cancel: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    /// In-process server on loopback ports, optionally with RSA keys written
    /// to the temp dir.
    async fn start(encrypted: bool, trusted_subnet: &str) -> Running {
        let temp_dir = tempfile::tempdir().unwrap();
        let (private_key, public_key) = if encrypted {
            let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
            let private_path = temp_dir.path().join("private.pem");
            let public_path = temp_dir.path().join("public.pem");
            std::fs::write(&private_path, key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes())
                .unwrap();
            std::fs::write(
                &public_path,
                key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap(),
            )
            .unwrap();
            (Some(private_path), Some(public_path))
        } else {
            (None, None)
        };

        let config = ServerConfig {
            address: "127.0.0.1:0".to_string(),
            grpc_address: "127.0.0.1:0".to_string(),
            file_storage_path: temp_dir.path().join("metrics-db.json"),
            key: SECRET.to_string(),
            crypto_key: private_key,
            trusted_subnet: trusted_subnet.to_string(),
            ..ServerConfig::default()
        };
        let cancel = CancellationToken::new();
        let server = Server::build(config, &cancel).await.unwrap();
        let http = server.http_addr().unwrap();
        let rpc = server.rpc_addr().unwrap();
        let task = tokio::spawn(server.serve(cancel.clone()));
        Running {
            temp_dir,
            http,
            rpc,
            public_key,
            cancel,
            task,
        }
    }

    fn agent_config(&self, kind: TransportKind) -> AgentConfig {
        let addr = match kind {
            TransportKind::Http => self.http,
            TransportKind::Grpc => self.rpc,
        };
        AgentConfig {
            address: addr.to_string(),
            key: SECRET.to_string(),
            crypto_key: self.public_key.clone(),
            transport: kind,
            ..AgentConfig::default()
        }
    }

    async fn value(&self, kind: &str, name: &str) -> (u16, String) {
        let resp = reqwest::Client::new()
            .get(format!("http://{}/value/{kind}/{name}", self.http))
            .header("x-real-ip", "127.0.0.1")
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap().unwrap();
        drop(self.temp_dir);
    }
}

fn batch() -> Vec<Metric> {
    vec![
        Metric::gauge("Alloc", 2048.0),
        Metric::counter("PollCount", 5),
    ]
}

#[tokio::test]
async fn http_batch_is_signed_encrypted_and_applied() {
    let server = Running::start(true, "").await;
    let transport = transport::build(&server.agent_config(TransportKind::Http)).unwrap();
    assert_eq!(transport.name(), "http");

    transport.send_batch(&batch()).await.unwrap();
    transport.send_batch(&batch()).await.unwrap();

    assert_eq!(server.value("gauge", "Alloc").await, (200, "2048".to_string()));
    assert_eq!(server.value("counter", "PollCount").await, (200, "10".to_string()));
    server.stop().await;
}

#[tokio::test]
async fn grpc_batch_is_signed_encrypted_and_applied() {
    let server = Running::start(true, "").await;
    let transport = transport::build(&server.agent_config(TransportKind::Grpc)).unwrap();
    assert_eq!(transport.name(), "grpc");

    transport.send_batch(&batch()).await.unwrap();

    assert_eq!(server.value("counter", "PollCount").await, (200, "5".to_string()));
    drop(transport);
    server.stop().await;
}

#[tokio::test]
async fn wrong_key_is_rejected_not_retried() {
    let server = Running::start(false, "").await;
    let config = AgentConfig {
        key: "other-secret".to_string(),
        ..server.agent_config(TransportKind::Http)
    };
    let transport = transport::build(&config).unwrap();

    let err = transport.send_batch(&batch()).await.unwrap_err();
    assert!(matches!(err, ReportError::Rejected(_)), "{err}");
    assert_eq!(server.value("counter", "PollCount").await.0, 404);
    server.stop().await;
}

#[tokio::test]
async fn loopback_agent_passes_subnet_check() {
    let server = Running::start(false, "127.0.0.0/8").await;
    for kind in [TransportKind::Http, TransportKind::Grpc] {
        let transport = transport::build(&server.agent_config(kind)).unwrap();
        transport.send_batch(&batch()).await.unwrap();
    }
    assert_eq!(server.value("counter", "PollCount").await, (200, "10".to_string()));
    server.stop().await;
}

#[tokio::test]
async fn reporter_delivers_cache_to_server() {
    let server = Running::start(false, "").await;
    let transport = transport::build(&server.agent_config(TransportKind::Http)).unwrap();

    let cache = Arc::new(MetricCache::new(false));
    cache.apply_poll(&[Metric::gauge("RandomValue", 42.5)]);
    cache.apply_poll(&[]);

    let cancel = CancellationToken::new();
    let reporter = Reporter::new(cache, transport, Duration::from_millis(50), 2)
        .with_backoff(Backoff::none());
    let task = tokio::spawn(reporter.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(server.value("gauge", "RandomValue").await, (200, "42.5".to_string()));
    // Later reports carry zero, so the total is the two polls taken before.
    assert_eq!(server.value("counter", "PollCount").await, (200, "2".to_string()));
    server.stop().await;
}
