//! Process-wide lifecycle.
//!
//! The context is the composition root: it builds the store, catalog, log
//! pipeline, runners, and supervisor, owns the event bus and the shutdown
//! token, and sequences the startup phases (storage layout, catalog load,
//! store load, `start_all`). `ServerStart` and `ServerStop` are dispatched
//! here.

use crate::config::Config;
use crate::error::Result;
use crate::supervisor::Supervisor;
use chrono::{Local, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vertex_container::{Event, EventBus};
use vertex_runner::{DockerRunner, ProcessRunner};
use vertex_store::{ContainerStore, LogPipeline, ServiceCatalog};

/// Fallback rotation interval when the next midnight cannot be computed.
const ROTATION_FALLBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Owns every long-lived component and the process lifecycle.
pub struct Context {
    config: Config,
    bus: EventBus,
    store: Arc<ContainerStore>,
    catalog: Arc<ServiceCatalog>,
    logs: Arc<LogPipeline>,
    supervisor: Arc<Supervisor>,
    shutdown: CancellationToken,
}

impl Context {
    /// Builds the component graph for the given configuration.
    pub async fn new(config: Config) -> Self {
        let bus = EventBus::new();
        let shutdown = CancellationToken::new();

        let store = Arc::new(ContainerStore::new(&config.storage_path));
        let catalog = Arc::new(ServiceCatalog::new(config.storage_path.join("services")));
        let logs = Arc::new(LogPipeline::new(
            store.instances_dir().to_path_buf(),
            bus.clone(),
        ));

        let docker = Arc::new(
            DockerRunner::connect(store.instances_dir().to_path_buf(), shutdown.child_token())
                .await,
        );
        let process = Arc::new(ProcessRunner::new(
            store.instances_dir().to_path_buf(),
            shutdown.child_token(),
        ));

        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&store),
            Arc::clone(&logs),
            docker,
            process,
            bus.clone(),
        ));

        Self {
            config,
            bus,
            store,
            catalog,
            logs,
            supervisor,
            shutdown,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the event bus.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Returns the supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Returns the service catalog.
    #[must_use]
    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    /// Returns a token cancelled when the context shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the startup sequence: storage layout, catalog load, store load,
    /// background tasks, then `start_all` in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage layout cannot be created or the
    /// container store cannot be loaded.
    pub async fn start(&self) -> Result<()> {
        self.setup_storage()?;

        if let Err(err) = self.catalog.reload() {
            tracing::warn!(error = %err, "failed to load the service catalog");
        }
        self.store.load()?;

        self.bus.publish(Event::ServerStart);
        self.spawn_rotation_scheduler();
        self.spawn_dependency_watcher();

        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move {
            supervisor.start_all().await;
        });

        tracing::info!(url = %self.config.url(), "Vertex started");
        Ok(())
    }

    /// Dispatches `ServerStop`, stops every running container, closes the
    /// loggers, and cancels background tasks.
    pub async fn shutdown(&self) {
        tracing::info!("Vertex stopping");
        self.bus.publish(Event::ServerStop);
        self.supervisor.stop_all().await;
        self.logs.close_all();
        self.shutdown.cancel();
    }

    /// Dispatches `ServerHardReset` and reloads the catalog and the store
    /// from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reloaded.
    pub async fn hard_reset(&self) -> Result<()> {
        tracing::warn!("hard reset requested");
        self.bus.publish(Event::ServerHardReset);
        if let Err(err) = self.catalog.reload() {
            tracing::warn!(error = %err, "failed to reload the service catalog");
        }
        self.store.load()?;
        self.bus.publish(Event::ContainersChange);
        Ok(())
    }

    /// Creates the directories Vertex owns and warns about the ones the
    /// dependency bootstrap should have provisioned.
    fn setup_storage(&self) -> Result<()> {
        let storage = &self.config.storage_path;
        std::fs::create_dir_all(storage.join("instances")).map_err(vertex_store::StoreError::from)?;
        std::fs::create_dir_all(storage.join("settings")).map_err(vertex_store::StoreError::from)?;

        for dependency in ["client/dist", "services", "packages"] {
            if !storage.join(dependency).is_dir() {
                tracing::warn!(
                    path = %storage.join(dependency).display(),
                    "dependency directory missing, run the bootstrap to provision it"
                );
            }
        }
        Ok(())
    }

    fn spawn_rotation_scheduler(&self) {
        let logs = Arc::clone(&self.logs);
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let wait = until_next_midnight();
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(wait) => logs.rotate(),
                }
            }
        });
    }

    /// Reloads the service catalog whenever the dependency bootstrap
    /// announces an update.
    fn spawn_dependency_watcher(&self) {
        let mut rx = self.bus.subscribe();
        let catalog = Arc::clone(&self.catalog);
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(Event::DependenciesUpdated) => {
                            if let Err(err) = catalog.reload() {
                                tracing::error!(error = %err, "failed to reload the service catalog");
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }
}

/// Duration until the next local midnight, when log files roll over.
fn until_next_midnight() -> Duration {
    let now = Local::now();
    let Some(tomorrow) = now
        .date_naive()
        .succ_opt()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    else {
        return ROTATION_FALLBACK;
    };
    match Local.from_local_datetime(&tomorrow).earliest() {
        Some(midnight) => (midnight - now).to_std().unwrap_or(ROTATION_FALLBACK),
        None => ROTATION_FALLBACK,
    }
}

/// Blocks until an outbound TCP connection succeeds, bounded by a few
/// attempts. Used at boot to detect hosts without egress before the first
/// install is attempted.
pub async fn wait_for_network(target: &str) -> bool {
    for attempt in 1..=5 {
        match tokio::time::timeout(
            Duration::from_secs(2),
            tokio::net::TcpStream::connect(target),
        )
        .await
        {
            Ok(Ok(_)) => return true,
            _ => {
                tracing::debug!(target, attempt, "network probe failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    tracing::warn!(target, "no network connectivity, installs from remote sources will fail");
    false
}
