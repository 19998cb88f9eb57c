//! Same contract exercised against both [`InMemoryQueueEngine`] and a
//! containerized Redis, so the two [`QueueEngine`] implementations cannot
//! silently drift from each other (see `engine.rs`'s module doc).

use std::time::Duration;

use relaygrid_core::{QueueMessage, Task};
use relaygrid_queue::{EnqueueOutcome, InMemoryQueueEngine, QueueEngine, RedisQueueEngine};
use testcontainers::core::WaitFor;
use testcontainers::runners::AsyncRunner;
use testcontainers::GenericImage;

fn sample_message() -> QueueMessage {
    let task = Task::new("echo", serde_json::json!({"msg": "hi"}));
    QueueMessage::from_task(&task)
}

async fn enqueue_dequeue_ack_round_trip(engine: &dyn QueueEngine) {
    let outcome = engine.enqueue(sample_message(), None).await.unwrap();
    assert!(matches!(outcome, EnqueueOutcome::Enqueued(_)));
    let delivery = engine
        .dequeue("worker-1", Duration::from_millis(50), Duration::from_secs(30))
        .await
        .unwrap()
        .expect("message available");
    engine.ack(&delivery.message_id).await.unwrap();
    let metrics = engine.metrics().await.unwrap();
    assert_eq!(metrics.queue_depth, 0);
}

async fn advisory_lock_excludes_second_holder(engine: &dyn QueueEngine) {
    let outcome = engine.enqueue(sample_message(), None).await.unwrap();
    let delivery = engine
        .dequeue("worker-1", Duration::from_millis(50), Duration::from_secs(30))
        .await
        .unwrap()
        .expect("message available");

    let task_id = delivery.message.task_id;
    let won = engine
        .acquire_task_lock(task_id, "worker-1", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(won);
    let contended = engine
        .acquire_task_lock(task_id, "worker-2", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(!contended);

    engine.release_task_lock(task_id, "worker-1").await.unwrap();
    let after_release = engine
        .acquire_task_lock(task_id, "worker-2", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(after_release);

    engine.ack(&delivery.message_id).await.unwrap();
    let _ = outcome;
}

#[tokio::test]
async fn in_memory_satisfies_contract() {
    let engine = InMemoryQueueEngine::new();
    enqueue_dequeue_ack_round_trip(&engine).await;

    let engine = InMemoryQueueEngine::new();
    advisory_lock_excludes_second_holder(&engine).await;
}

#[tokio::test]
async fn redis_satisfies_contract() {
    let image = GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    let container = image.start().await.expect("start redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("mapped redis port");
    let url = format!("redis://127.0.0.1:{port}");

    let engine = RedisQueueEngine::connect(&url).await.expect("connect to redis");
    enqueue_dequeue_ack_round_trip(&engine).await;

    let engine = RedisQueueEngine::connect(&url).await.expect("connect to redis");
    advisory_lock_excludes_second_holder(&engine).await;
}
