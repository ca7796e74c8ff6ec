//! Detection of checks that expired in a queue before any worker claimed them.

use std::sync::Arc;
use std::time::Duration;

use super::{EXPIRED_RESULT, QueueBroker};
use crate::plugins::PluginRegistry;

/// Counts missed checks and raises one queue-timeout notification per pass.
pub struct QueueTimeoutDetector {
    broker: Arc<dyn QueueBroker>,
    plugins: Arc<PluginRegistry>,
    dead_letter_wait: Duration,
}

impl QueueTimeoutDetector {
    /// `dead_letter_wait` bounds each wait for a dead-letter message.
    pub fn new(broker: Arc<dyn QueueBroker>, plugins: Arc<PluginRegistry>, dead_letter_wait: Duration) -> Self {
        Self {
            broker,
            plugins,
            dead_letter_wait,
        }
    }

    /// One detection pass. Returns the number of missed checks found.
    ///
    /// Broker errors are logged, never returned, so checks consumed before
    /// an error are still counted and notified.
    pub async fn run_once(&self) -> usize {
        let missed = self.count_expired_revocations().await + self.drain_dead_letters().await;
        if missed > 0 {
            tracing::warn!(missed, "checks expired in queue before being claimed");
            self.plugins.notify_queue_timeout(missed).await;
        }
        missed
    }

    /// Revoked tasks whose stored result says they expired. Each result is
    /// forgotten once counted so the next pass does not count it again.
    async fn count_expired_revocations(&self) -> usize {
        let revoked = match self.broker.revoked_tasks().await {
            Ok(revoked) => revoked,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list revoked tasks");
                return 0;
            }
        };

        let mut expired = 0;
        for (worker, task_ids) in revoked {
            for task_id in task_ids {
                match self.broker.task_result(&task_id).await {
                    Ok(result) if result.as_deref() == Some(EXPIRED_RESULT) => {}
                    Ok(_) => continue,
                    Err(err) => {
                        tracing::warn!(task_id = %task_id, error = %err, "failed to read task result");
                        continue;
                    }
                }
                tracing::info!(task_id = %task_id, worker = %worker, "found missed check");
                expired += 1;
                if let Err(err) = self.broker.forget_result(&task_id).await {
                    tracing::warn!(task_id = %task_id, error = %err, "failed to forget task result");
                }
            }
        }
        expired
    }

    /// Consume and acknowledge every waiting dead-letter message.
    async fn drain_dead_letters(&self) -> usize {
        let mut drained = 0;
        loop {
            let message = match tokio::time::timeout(self.dead_letter_wait, self.broker.next_dead_letter()).await {
                Ok(Ok(message)) => message,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, drained, "failed to read dead-letter queue");
                    None
                }
                Err(_) => None,
            };
            let Some(message) = message else {
                if drained == 0 {
                    tracing::debug!("no messages to drain from dead-letter queue");
                }
                return drained;
            };
            tracing::info!(
                delivery_tag = message.delivery_tag,
                body = %String::from_utf8_lossy(&message.body),
                "found dead-lettered check"
            );
            drained += 1;
            if let Err(err) = self.broker.ack(message.delivery_tag).await {
                tracing::warn!(delivery_tag = message.delivery_tag, error = %err, "failed to acknowledge dead letter");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{NotificationPlugin, PluginRegistry};
    use crate::queue::{DeadLetter, MemoryBroker};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl NotificationPlugin for Arc<Counting> {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_check_queue_timeout(&self, check_count: usize) -> Result<()> {
            self.calls.lock().unwrap().push(check_count);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl NotificationPlugin for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_check_queue_timeout(&self, _check_count: usize) -> Result<()> {
            anyhow::bail!("webhook down")
        }
    }

    fn detector(broker: &MemoryBroker, counting: &Arc<Counting>) -> QueueTimeoutDetector {
        let plugins = PluginRegistry::new()
            .with_notifier(Failing)
            .with_notifier(Arc::clone(counting));
        QueueTimeoutDetector::new(Arc::new(broker.clone()), Arc::new(plugins), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_sums_both_signals_into_one_notification() {
        let broker = MemoryBroker::new();
        broker.revoke("worker-1", "t1", Some("expired")).unwrap();
        broker.revoke("worker-1", "t2", Some("terminated")).unwrap();
        broker.revoke("worker-2", "t3", Some("expired")).unwrap();
        broker.push_dead_letter("check-a").unwrap();
        broker.push_dead_letter("check-b").unwrap();
        broker.push_dead_letter("check-c").unwrap();
        let counting = Arc::new(Counting::default());

        let missed = detector(&broker, &counting).run_once().await;

        assert_eq!(missed, 5);
        assert_eq!(*counting.calls.lock().unwrap(), vec![5]);
        assert!(broker.unacked().unwrap().is_empty());
        assert_eq!(broker.pending_dead_letters().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_results_counted_once() {
        let broker = MemoryBroker::new();
        broker.revoke("worker-1", "t1", Some("expired")).unwrap();
        let counting = Arc::new(Counting::default());
        let detector = detector(&broker, &counting);

        assert_eq!(detector.run_once().await, 1);
        assert_eq!(detector.run_once().await, 0);
        assert_eq!(*counting.calls.lock().unwrap(), vec![1]);
    }

    /// Wraps a broker and fails chosen calls.
    struct Flaky {
        inner: MemoryBroker,
        task_result_calls: AtomicUsize,
        fail_task_result_on: usize,
        fail_dead_letters_after: usize,
        dead_letter_calls: AtomicUsize,
    }

    #[async_trait]
    impl QueueBroker for Flaky {
        async fn revoked_tasks(&self) -> Result<BTreeMap<String, Vec<String>>> {
            self.inner.revoked_tasks().await
        }

        async fn task_result(&self, task_id: &str) -> Result<Option<String>> {
            let call = self.task_result_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_task_result_on {
                anyhow::bail!("result backend unavailable");
            }
            self.inner.task_result(task_id).await
        }

        async fn forget_result(&self, task_id: &str) -> Result<()> {
            self.inner.forget_result(task_id).await
        }

        async fn next_dead_letter(&self) -> Result<Option<DeadLetter>> {
            let call = self.dead_letter_calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_dead_letters_after {
                anyhow::bail!("channel closed");
            }
            self.inner.next_dead_letter().await
        }

        async fn ack(&self, delivery_tag: u64) -> Result<()> {
            self.inner.ack(delivery_tag).await
        }
    }

    #[tokio::test]
    async fn test_broker_errors_keep_partial_count() {
        let broker = MemoryBroker::new();
        broker.revoke("worker-1", "t1", Some("expired")).unwrap();
        broker.revoke("worker-1", "t2", Some("expired")).unwrap();
        broker.revoke("worker-1", "t3", Some("expired")).unwrap();
        broker.push_dead_letter("check-a").unwrap();
        broker.push_dead_letter("check-b").unwrap();
        let flaky = Flaky {
            inner: broker.clone(),
            task_result_calls: AtomicUsize::new(0),
            fail_task_result_on: 2,
            fail_dead_letters_after: 1,
            dead_letter_calls: AtomicUsize::new(0),
        };
        let counting = Arc::new(Counting::default());
        let plugins = PluginRegistry::new().with_notifier(Arc::clone(&counting));
        let detector = QueueTimeoutDetector::new(Arc::new(flaky), Arc::new(plugins), Duration::from_millis(50));

        let missed = detector.run_once().await;

        assert_eq!(missed, 3);
        assert_eq!(*counting.calls.lock().unwrap(), vec![3]);
        assert!(broker.task_result("t1").await.unwrap().is_none());
        assert_eq!(broker.task_result("t2").await.unwrap().as_deref(), Some("expired"));
        assert!(broker.task_result("t3").await.unwrap().is_none());
        assert!(broker.unacked().unwrap().is_empty());
        assert_eq!(broker.pending_dead_letters().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_does_not_block_or_notify() {
        let broker = MemoryBroker::new();
        let counting = Arc::new(Counting::default());

        let missed = tokio::time::timeout(Duration::from_secs(2), detector(&broker, &counting).run_once())
            .await
            .expect("detector must not block on an empty dead-letter queue");

        assert_eq!(missed, 0);
        assert!(counting.calls.lock().unwrap().is_empty());
    }
}
