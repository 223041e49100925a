//! `torque-infra` — infrastructure for the dispatch core: the task store,
//! notify-bus adapters, the API-facing dispatcher, the worker pool, and the
//! poller.

pub mod dispatcher;
pub mod notify;
pub mod outbound;
pub mod poller;
pub mod store;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use notify::RedisNotifyBus;
pub use outbound::{Delivery, DeliveryClient};
pub use poller::{Poller, PollerConfig, PollerHandle};
pub use store::{
    ClaimOutcome, InMemoryTaskStore, PostgresTaskStore, TaskCounts, TaskStore, TaskStoreError,
};
pub use worker::{WorkerConfig, WorkerPool, WorkerPoolHandle};
