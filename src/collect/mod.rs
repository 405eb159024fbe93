//! Result collection.

use crate::task::{TaskHandle, TaskOutcome, TaskResult};
use tracing::warn;

/// Waits on every handle in order and returns one result per handle.
///
/// A task that failed, or whose handle was dropped by a crashed or torn-down
/// executor, becomes a [`TaskOutcome::Failure`]. Collection always continues
/// to the next handle.
pub async fn collect(handles: Vec<TaskHandle>) -> Vec<TaskResult> {
    let mut results = Vec::with_capacity(handles.len());

    for (index, handle) in handles.into_iter().enumerate() {
        let id = handle.id().clone();
        let outcome = handle.wait().await.unwrap_or_else(TaskOutcome::failure);
        if let Some(error) = outcome.error() {
            warn!("Job {index} raised an exception: {error}");
        }
        results.push(TaskResult::new(id, outcome));
    }

    results
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::task::TaskId;

    #[tokio::test]
    async fn test_collect_keeps_order_and_isolates_failures() {
        let (first, first_done) = TaskHandle::pending(TaskId::job(0));
        let (second, second_done) = TaskHandle::pending(TaskId::job(1));
        let (third, third_done) = TaskHandle::pending(TaskId::job(2));

        // Resolve out of order; drop the middle one.
        third_done.send(TaskOutcome::Success("c".to_string())).unwrap();
        drop(second_done);
        first_done.send(TaskOutcome::Success("a".to_string())).unwrap();

        let results = collect(vec![first, second, third]).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].outcome(), &TaskOutcome::Success("a".to_string()));
        assert!(!results[1].is_success());
        assert!(!results[1].outcome().error().unwrap().is_empty());
        assert_eq!(results[2].id().as_str(), "job_2");
    }

    #[tokio::test]
    async fn test_collect_empty() {
        assert!(collect(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_collect_waits_for_late_results() {
        let (handle, done) = TaskHandle::pending(TaskId::job(0));
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = done.send(TaskOutcome::failure("late failure"));
        });

        let results = collect(vec![handle]).await;
        assert_eq!(results[0].outcome().error(), Some("late failure"));
    }
}
