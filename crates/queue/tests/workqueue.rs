use std::sync::Arc;
use std::time::Duration;

use diffwatch_queue::{ExponentialBackoff, WorkQueue};

fn fast_queue() -> Arc<WorkQueue<String>> {
    Arc::new(WorkQueue::with_limiter(
        "test",
        ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(20)),
    ))
}

async fn next(q: &WorkQueue<String>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), q.get()).await.expect("get timed out")
}

#[tokio::test]
async fn identical_pending_items_collapse() {
    let q = fast_queue();
    q.add("default/web-1".into());
    q.add("default/web-1".into());
    assert_eq!(q.len(), 1);
    q.add("default/web-2".into());
    assert_eq!(q.len(), 2);
}

#[tokio::test]
async fn fifo_order_is_preserved() {
    let q = fast_queue();
    for k in ["a", "b", "c"] { q.add(k.to_string()); }
    assert_eq!(next(&q).await.as_deref(), Some("a"));
    assert_eq!(next(&q).await.as_deref(), Some("b"));
    assert_eq!(next(&q).await.as_deref(), Some("c"));
}

#[tokio::test]
async fn readd_while_processing_waits_for_done() {
    let q = fast_queue();
    q.add("a".into());
    let item = next(&q).await.unwrap();
    q.add("a".into());
    q.add("a".into());
    assert!(q.is_empty(), "re-add must be parked while the item is processed");
    q.done(&item);
    assert_eq!(q.len(), 1);
    assert_eq!(next(&q).await.as_deref(), Some("a"));
}

#[tokio::test]
async fn get_blocks_until_add() {
    let q = fast_queue();
    let q2 = Arc::clone(&q);
    let waiter = tokio::spawn(async move { q2.get().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    q.add("late".into());
    let got = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert_eq!(got.as_deref(), Some("late"));
}

#[tokio::test]
async fn shutdown_releases_waiters_and_drains() {
    let q = fast_queue();
    let q2 = Arc::clone(&q);
    let waiter = tokio::spawn(async move { q2.get().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    q.shut_down();
    let got = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
    assert!(got.is_none());

    let q = fast_queue();
    q.add("pending".into());
    q.shut_down();
    q.add("rejected".into());
    assert_eq!(next(&q).await.as_deref(), Some("pending"));
    assert!(next(&q).await.is_none());
}

#[tokio::test]
async fn rate_limited_readd_counts_and_forget_resets() {
    let q = fast_queue();
    q.add("flaky".into());
    let item = next(&q).await.unwrap();
    assert_eq!(q.num_requeues(&item), 0);

    q.add_rate_limited(item.clone());
    q.done(&item);
    assert_eq!(q.num_requeues(&item), 1);
    let again = next(&q).await.unwrap();
    assert_eq!(again, item);

    q.add_rate_limited(again.clone());
    q.done(&again);
    assert_eq!(q.num_requeues(&again), 2);
    let third = next(&q).await.unwrap();
    q.forget(&third);
    q.done(&third);
    assert_eq!(q.num_requeues(&third), 0);
}

#[tokio::test]
async fn retries_landing_after_shutdown_are_dropped() {
    let q = fast_queue();
    q.add("in-flight".into());
    let item = next(&q).await.unwrap();

    // delay elapses after shutdown
    q.add_rate_limited(item.clone());
    q.done(&item);
    q.shut_down();
    q.add_rate_limited("late".into());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(q.is_empty());
    assert!(next(&q).await.is_none());
}
