use std::sync::Arc;

use torque_bus::{InProcessBus, NotifyBus};
use torque_core::TorqueConfig;
use torque_infra::{
    DeliveryClient, Dispatcher, InMemoryTaskStore, Poller, PollerConfig, PollerHandle,
    PostgresTaskStore, RedisNotifyBus, TaskStore, WorkerConfig, WorkerPool, WorkerPoolHandle,
};

/// Everything the HTTP handlers need, wired once at startup.
pub struct AppServices {
    pub config: TorqueConfig,
    pub store: Arc<dyn TaskStore>,
    pub bus: Arc<dyn NotifyBus>,
    pub dispatcher: Dispatcher,
}

/// Handles for the background halves of the core.
pub struct BackgroundHandles {
    pub workers: WorkerPoolHandle,
    pub poller: PollerHandle,
}

impl BackgroundHandles {
    pub async fn shutdown(self) {
        self.workers.shutdown().await;
        self.poller.shutdown().await;
    }
}

/// Select and wire the store and bus from configuration.
///
/// `database_url` picks Postgres over the in-memory store; `redis_url` picks
/// the Redis pub/sub bus over the in-process one.
pub async fn build_services(config: TorqueConfig) -> Arc<AppServices> {
    let store: Arc<dyn TaskStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresTaskStore::connect(url)
                .await
                .expect("failed to connect to Postgres task store");
            tracing::info!("using Postgres task store");
            Arc::new(store)
        }
        None => {
            tracing::info!("using in-memory task store (tasks do not survive restarts)");
            Arc::new(InMemoryTaskStore::new())
        }
    };

    let bus: Arc<dyn NotifyBus> = match &config.redis_url {
        Some(url) => {
            let bus = RedisNotifyBus::new(url, config.notify_channel.clone())
                .expect("failed to create Redis notify bus");
            tracing::info!(channel = %config.notify_channel, "using Redis notify bus");
            Arc::new(bus)
        }
        None => Arc::new(InProcessBus::new()),
    };

    let dispatcher = Dispatcher::new(store.clone(), bus.clone());

    Arc::new(AppServices {
        config,
        store,
        bus,
        dispatcher,
    })
}

/// Spawn the worker pool and the poller for a wired service set.
pub fn spawn_background(services: &AppServices) -> BackgroundHandles {
    let client = DeliveryClient::new().expect("failed to build outbound HTTP client");

    let workers = WorkerPool::spawn(
        services.store.clone(),
        services.bus.clone(),
        client,
        WorkerConfig::from_config(&services.config),
    );
    let poller = Poller::spawn(
        services.store.clone(),
        services.bus.clone(),
        PollerConfig::from_config(&services.config),
    );

    BackgroundHandles { workers, poller }
}
