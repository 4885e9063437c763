use std::sync::Arc;

use anyhow::{Context, Result};
use bbs_utils::clock::{Clock, SystemClock};
use tokio::{
    signal,
    sync::{watch, Mutex},
    time::MissedTickBehavior,
};
use tracing::{debug, error, info};

use crate::{
    cells::CellRegistry,
    clients::http::{HttpAuctioneerClient, HttpCellClientFactory},
    config::{ServerConfig, StateStoreConfig},
    events::EventHub,
    processor::{
        ActualLrpRetirer,
        ControllerContext,
        DesiredLrpController,
        EvacuationController,
        LrpConvergenceController,
        LrpLifecycleController,
        TaskController,
        TaskConvergenceController,
    },
    state_store::StateStore,
};

/// The assembled server. Whoever runs it must already hold the
/// cluster-wide lock: convergence assumes it is the only pass in flight.
#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
    pub state_store: Arc<StateStore>,
    pub cell_registry: Arc<CellRegistry>,
    pub event_hub: Arc<EventHub>,
    pub lifecycle: Arc<LrpLifecycleController>,
    pub evacuation: Arc<EvacuationController>,
    pub desired_lrps: Arc<DesiredLrpController>,
    pub tasks: Arc<TaskController>,
    pub lrp_convergence: Arc<LrpConvergenceController>,
    pub task_convergence: Arc<TaskConvergenceController>,
    convergence_guard: Arc<Mutex<()>>,
}

impl Service {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let options = config.state_store_options();
        let state_store = Arc::new(match &config.state_store {
            StateStoreConfig::InMemory => StateStore::in_memory(clock, options),
            StateStoreConfig::Rocksdb { path } => StateStore::open_rocksdb(path.clone(), clock, options)
                .context("error initializing state store")?,
        });

        let cell_registry = Arc::new(CellRegistry::new(config.cell_presence_ttl()));
        let event_hub = Arc::new(EventHub::new(
            config.event_hub.max_subscribers,
            config.event_hub.queue_size,
        ));
        let auctioneer = Arc::new(
            HttpAuctioneerClient::new(&config.auctioneer_url).context("error initializing auctioneer client")?,
        );
        let cell_clients = Arc::new(HttpCellClientFactory::new().context("error initializing cell clients")?);

        let ctx = ControllerContext {
            store: state_store.clone(),
            cells: cell_registry.clone(),
            auctioneer,
            cell_clients,
            emitter: event_hub.clone(),
        };
        let retirer = Arc::new(ActualLrpRetirer::new(ctx.clone(), config.retire_max_attempts));

        Ok(Self {
            lifecycle: Arc::new(LrpLifecycleController::new(ctx.clone(), retirer.clone())),
            evacuation: Arc::new(EvacuationController::new(ctx.clone())),
            desired_lrps: Arc::new(DesiredLrpController::new(ctx.clone(), retirer.clone())),
            tasks: Arc::new(TaskController::new(ctx.clone())),
            lrp_convergence: Arc::new(LrpConvergenceController::new(
                ctx.clone(),
                retirer,
                config.convergence.stale_unclaimed(),
            )),
            task_convergence: Arc::new(TaskConvergenceController::new(ctx, config.convergence.task_policy())),
            convergence_guard: Arc::new(Mutex::new(())),
            config,
            shutdown_tx,
            shutdown_rx,
            state_store,
            cell_registry,
            event_hub,
        })
    }

    /// Runs one LRP pass followed by one task pass. A failed pass is
    /// logged and left for the next tick. Returns false without doing
    /// anything when another pass is still in flight.
    pub async fn converge(&self) -> bool {
        let Ok(_guard) = self.convergence_guard.try_lock() else {
            debug!("convergence pass already running, skipping");
            return false;
        };
        if let Err(err) = self.lrp_convergence.converge_lrps().await {
            error!("lrp convergence failed: {:?}", err);
        }
        if let Err(err) = self.task_convergence.converge_tasks().await {
            error!("task convergence failed: {:?}", err);
        }
        true
    }

    /// Triggers a pass in the background without waiting for it.
    pub fn converge_now(&self) {
        let service = self.clone();
        tokio::spawn(async move { service.converge().await });
    }

    async fn run_convergence_loop(self, mut shutdown_rx: watch::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.convergence.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.converge().await;
                }
                _ = shutdown_rx.changed() => {
                    info!("convergence loop received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Spawns the background loops and waits for shutdown.
    pub async fn start(&self) -> Result<()> {
        let registry = self.cell_registry.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move { registry.start_monitor(shutdown_rx).await });

        let service = self.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move { service.run_convergence_loop(shutdown_rx).await });

        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(shutdown_tx).await;
        });

        info!(
            interval_secs = self.config.convergence.interval_secs,
            "bbs server started"
        );
        let mut shutdown_rx = self.shutdown_rx.clone();
        let _ = shutdown_rx.changed().await;
        self.event_hub.close();
        info!("bbs server stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        if self.shutdown_tx.send(()).is_err() {
            error!("shutdown requested with no listeners");
        }
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    let _ = shutdown_tx.send(());
    info!("signal received, shutting down server gracefully");
}
