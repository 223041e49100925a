//! `torque-bus` — best-effort notify bus carrying task identifiers.
//!
//! The bus is a latency optimisation over polling: losing a message never
//! loses a task, and receiving one conveys no claim. Any durable decision is
//! re-derivable from the task store alone.

pub mod bus;
pub mod in_process;

pub use bus::{BusError, NotifyBus, Subscription};
pub use in_process::InProcessBus;
