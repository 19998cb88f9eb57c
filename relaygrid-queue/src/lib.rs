//! Redis Streams-backed queue engine (spec §4.1).
//!
//! [`QueueEngine`] is the contract; [`redis_engine::RedisQueueEngine`] is the
//! production transport and [`memory::InMemoryQueueEngine`] is a
//! same-process fake for tests. Both implement the trait identically so
//! [`relaygrid-worker`] never needs to know which one it was handed.

pub mod engine;
pub mod memory;
pub mod redis_engine;

pub use engine::{Delivery, EnqueueOutcome, QueueEngine, QueueMetrics};
pub use memory::InMemoryQueueEngine;
pub use redis_engine::RedisQueueEngine;
