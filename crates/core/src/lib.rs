//! `torque-core` — web-hook task queue domain: tasks, retry policy,
//! configuration.
//!
//! This crate defines types and invariants, not IO. Stores, buses, workers,
//! and the poller live in `torque-infra`; the HTTP ingress in `torque-api`.

pub mod config;
pub mod error;
pub mod id;
pub mod retry;
pub mod task;

pub use config::{BackoffConfig, TorqueConfig};
pub use error::{CoreError, CoreResult};
pub use id::TaskId;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use task::{NewTask, Outcome, Task, TaskStatus, TASK_ID_HEADER};
