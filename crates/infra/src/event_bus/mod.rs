//! Infrastructure-backed work queues.
//!
//! The `WorkQueue` abstraction and its in-process implementation live in
//! `fbwatch-events`; this module provides the Redis Streams adapter.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsWorkQueue};
