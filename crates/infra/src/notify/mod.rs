//! Notify-bus adapters beyond the in-process default.

pub mod redis_pubsub;

pub use redis_pubsub::RedisNotifyBus;
