// node/src/runtime.rs
use crate::NodeConfig;
use bridge_backend::{Backend, BackendOptions, HttpClient, HttpClientConfig};
use rpc::subscription::SubscriptionAgent;
use rpc::{FilterRegistry, HealthChecker, RpcConfig as RpcCfg, RpcMethods, RpcServer, SubscriptionRegistry};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Node {
    config: NodeConfig,
    backend: Backend,
    subscriptions: Arc<SubscriptionRegistry>,
    rpc: Arc<RpcServer>,
    agent_shutdown: watch::Sender<bool>,
    local_addr: OnceLock<SocketAddr>,
    /// Chain detection retries forever; aborted on stop
    probe: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        tracing::info!("Initializing node components");
        config.validate()?;

        let client = HttpClient::new(HttpClientConfig {
            url: config.backend.url.clone(),
            timeout: config.backend.request_timeout(),
            log_requests: !config.backend.hide_backend_logs,
        })?;
        tracing::info!("✓ Backend client targets {}", client.uri());

        let backend = Backend::new(
            Arc::new(client),
            config.backend.network()?,
            BackendOptions {
                mature_block_height: config.backend.mature_block_height,
                generate_to_address: config.backend.generate_to_address.clone(),
                ignore_unknown_transactions: config.backend.ignore_unknown_transactions,
            },
        );

        let filters = Arc::new(FilterRegistry::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let methods = RpcMethods::new(&backend, filters, config.rpc.single_threaded)
            .with_body_logging(config.rpc.dev_mode);
        if config.rpc.single_threaded {
            tracing::warn!("Single-threaded mode: requests are processed one at a time");
        }
        if config.rpc.dev_mode {
            tracing::warn!("Developer mode enabled");
        }

        let rpc_config = RpcCfg {
            listen_addr: config.rpc.listen_addr,
            single_threaded: config.rpc.single_threaded,
            dev_mode: config.rpc.dev_mode,
            poll_interval: config.rpc.poll_interval(),
            request_timeout: config.rpc.request_timeout(),
        };
        let rpc = Arc::new(RpcServer::new(
            rpc_config,
            Arc::new(methods),
            Arc::new(HealthChecker::new(backend.clone())),
            subscriptions.clone(),
        ));

        let (agent_shutdown, _) = watch::channel(false);
        tracing::info!("Node components initialized");

        Ok(Self {
            config,
            backend,
            subscriptions,
            rpc,
            agent_shutdown,
            local_addr: OnceLock::new(),
            probe: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        tracing::info!("Starting eth-bridge");
        if let Some(probe) = self.backend.start() {
            tracing::info!("Network set to auto, detecting backend chain");
            *self.probe.lock().await = Some(probe);
        }

        let mut tasks = self.tasks.lock().await;

        let agent = SubscriptionAgent::new(
            self.backend.clone(),
            self.subscriptions.clone(),
            self.rpc.config().poll_interval,
        );
        tasks.push(tokio::spawn(agent.run(self.agent_shutdown.subscribe())));

        let (addr, serving) = self.rpc.clone().bind()?;
        let _ = self.local_addr.set(addr);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serving.await {
                tracing::error!("RPC server error: {}", e);
            }
        }));

        tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        tracing::info!("  eth-bridge is up");
        tracing::info!("  RPC:      {}", addr);
        tracing::info!("  Backend:  {}", self.config.backend.network);
        tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!("Shutting down node...");
        self.rpc.shutdown();
        self.agent_shutdown.send_replace(true);

        if let Some(probe) = self.probe.lock().await.take() {
            probe.abort();
        }
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for mut task in tasks {
            if timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!("Background task did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::info!("Node shutdown complete");
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}
