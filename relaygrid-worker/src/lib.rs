//! Worker runtime (spec §4.2): dispatch loop, lease heartbeat, graceful
//! shutdown, and the handler registry (spec §4.5).

pub mod observer;
pub mod registry;
pub mod retry;
pub mod worker;

pub use observer::{NoopObserver, RunObserver};
pub use registry::{HandlerRegistry, TaskHandler};
pub use retry::{run_with_retry, InnerRetryConfig};
pub use worker::{reclaim_tick, Worker, WorkerBuilder, WorkerConfig};
