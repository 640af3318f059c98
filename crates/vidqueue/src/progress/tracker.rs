//! Latest-value progress store with broadcast fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::stage::{ProcessingStage, FAILED_PROGRESS};

/// Point-in-time state of a job's processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Job this update refers to. The job itself may already be gone.
    pub job_id: String,
    pub stage: ProcessingStage,
    /// Percentage in `0..=100`, or `-1` for the failed stage.
    pub progress: f64,
    /// Human-readable description of the current activity.
    pub message: String,
    /// Failure cause (set on the failed stage only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    /// Creates an update at the stage's fixed weight with its default message.
    pub fn new(job_id: &str, stage: ProcessingStage) -> Self {
        Self::at(job_id, stage, stage.weight(), stage.message())
    }

    /// Creates an update with an explicit percentage and message.
    pub fn at(job_id: &str, stage: ProcessingStage, progress: f64, message: &str) -> Self {
        if stage == ProcessingStage::Failed {
            return Self::failed(job_id, message);
        }

        Self {
            job_id: job_id.to_string(),
            stage,
            progress: progress.clamp(0.0, 100.0),
            message: message.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a failure update carrying the error text.
    pub fn failed(job_id: &str, error: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage: ProcessingStage::Failed,
            progress: FAILED_PROGRESS,
            message: ProcessingStage::Failed.message().to_string(),
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Event delivered to tracker subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Progress(ProgressUpdate),
    Cleared { job_id: String },
}

impl TrackerEvent {
    pub fn job_id(&self) -> &str {
        match self {
            TrackerEvent::Progress(update) => &update.job_id,
            TrackerEvent::Cleared { job_id } => job_id,
        }
    }
}

struct TrackerInner {
    snapshots: RwLock<HashMap<String, ProgressUpdate>>,
    sender: broadcast::Sender<TrackerEvent>,
    next_subscriber: AtomicU64,
}

/// Keyed store of the latest progress snapshot per job.
///
/// Updates overwrite the previous snapshot (no history, no ordering check)
/// and are published to every live subscription. Each subscription owns a
/// bounded buffer; a subscriber that falls behind loses the oldest events
/// instead of blocking producers. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl ProgressTracker {
    /// Creates a tracker whose subscriptions buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(TrackerInner {
                snapshots: RwLock::new(HashMap::new()),
                sender,
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ProgressUpdate>> {
        match self.inner.snapshots.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Progress tracker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ProgressUpdate>> {
        match self.inner.snapshots.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Progress tracker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Stores `update` as the latest snapshot for its job and publishes it.
    pub fn update(&self, update: ProgressUpdate) {
        let mut snapshots = self.write();
        snapshots.insert(update.job_id.clone(), update.clone());
        // Published under the lock so subscribers see the same order as the store.
        // No active receivers is fine.
        let _ = self.inner.sender.send(TrackerEvent::Progress(update));
    }

    pub fn get(&self, job_id: &str) -> Option<ProgressUpdate> {
        self.read().get(job_id).cloned()
    }

    /// Returns every stored snapshot.
    pub fn get_all(&self) -> Vec<ProgressUpdate> {
        self.read().values().cloned().collect()
    }

    /// Removes the snapshot for `job_id` and publishes a clear event.
    pub fn clear(&self, job_id: &str) -> Option<ProgressUpdate> {
        let mut snapshots = self.write();
        let removed = snapshots.remove(job_id);
        let _ = self.inner.sender.send(TrackerEvent::Cleared {
            job_id: job_id.to_string(),
        });
        removed
    }

    /// Registers a new subscriber for all future events.
    pub fn subscribe(&self) -> ProgressSubscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        log::debug!("Progress subscriber {} registered", id);
        ProgressSubscription {
            id,
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Deregisters a subscriber. Dropping the subscription has the same effect.
    pub fn unsubscribe(&self, subscription: ProgressSubscription) {
        log::debug!("Progress subscriber {} removed", subscription.id);
        drop(subscription);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Handle for one subscriber of a [`ProgressTracker`].
pub struct ProgressSubscription {
    id: u64,
    receiver: broadcast::Receiver<TrackerEvent>,
}

impl ProgressSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next event. Returns `None` once the tracker is gone.
    ///
    /// Events dropped because this subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<TrackerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!(
                        "Progress subscriber {} lagged, skipped {} events",
                        self.id,
                        missed
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<TrackerEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    log::warn!(
                        "Progress subscriber {} lagged, skipped {} events",
                        self.id,
                        missed
                    );
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Converts the subscription into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = TrackerEvent> {
        stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_update_overwrites_previous_snapshot() {
        let tracker = ProgressTracker::new(10);
        tracker.update(ProgressUpdate::new("job-1", ProcessingStage::Processing));
        tracker.update(ProgressUpdate::new("job-1", ProcessingStage::Completed));

        let latest = tracker.get("job-1").unwrap();
        assert_eq!(latest.stage, ProcessingStage::Completed);
        assert_eq!(latest.progress, 100.0);
        assert_eq!(tracker.get_all().len(), 1);
    }

    #[test]
    fn test_late_update_wins() {
        let tracker = ProgressTracker::new(10);
        tracker.update(ProgressUpdate::new("job-1", ProcessingStage::Finalizing));
        tracker.update(ProgressUpdate::new("job-1", ProcessingStage::Downloading));
        assert_eq!(
            tracker.get("job-1").unwrap().stage,
            ProcessingStage::Downloading
        );
    }

    #[test]
    fn test_get_unknown_job() {
        let tracker = ProgressTracker::default();
        assert!(tracker.get("missing").is_none());
    }

    #[test]
    fn test_subscribers_receive_updates() {
        let tracker = ProgressTracker::new(10);
        let mut first = tracker.subscribe();
        let mut second = tracker.subscribe();
        assert_eq!(tracker.subscriber_count(), 2);

        tracker.update(ProgressUpdate::new("job-1", ProcessingStage::Analyzing));

        for sub in [&mut first, &mut second] {
            match sub.try_recv() {
                Some(TrackerEvent::Progress(update)) => {
                    assert_eq!(update.job_id, "job-1");
                    assert_eq!(update.progress, 30.0);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_unsubscribe_only_affects_one_subscriber() {
        let tracker = ProgressTracker::new(10);
        let first = tracker.subscribe();
        let mut second = tracker.subscribe();
        assert_ne!(first.id(), second.id());

        tracker.unsubscribe(first);
        assert_eq!(tracker.subscriber_count(), 1);

        tracker.update(ProgressUpdate::new("job-1", ProcessingStage::Processing));
        assert!(second.try_recv().is_some());
    }

    #[test]
    fn test_clear_removes_snapshot_and_notifies() {
        let tracker = ProgressTracker::new(10);
        tracker.update(ProgressUpdate::new("job-1", ProcessingStage::Processing));
        let mut sub = tracker.subscribe();

        let removed = tracker.clear("job-1");
        assert!(removed.is_some());
        assert!(tracker.get("job-1").is_none());
        assert_eq!(
            sub.try_recv(),
            Some(TrackerEvent::Cleared {
                job_id: "job-1".to_string()
            })
        );
        assert!(tracker.clear("job-1").is_none());
    }

    #[test]
    fn test_lagging_subscriber_skips_oldest() {
        let tracker = ProgressTracker::new(2);
        let mut sub = tracker.subscribe();
        for stage in [
            ProcessingStage::Initializing,
            ProcessingStage::Downloading,
            ProcessingStage::Analyzing,
            ProcessingStage::Processing,
        ] {
            tracker.update(ProgressUpdate::new("job-1", stage));
        }

        let stages: Vec<ProcessingStage> = std::iter::from_fn(|| sub.try_recv())
            .filter_map(|e| match e {
                TrackerEvent::Progress(u) => Some(u.stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![ProcessingStage::Analyzing, ProcessingStage::Processing]
        );
    }

    #[test]
    fn test_failed_update_uses_sentinel() {
        let update = ProgressUpdate::failed("job-1", "boom");
        assert_eq!(update.progress, FAILED_PROGRESS);
        assert_eq!(update.error.as_deref(), Some("boom"));

        let via_at = ProgressUpdate::at("job-1", ProcessingStage::Failed, 40.0, "boom");
        assert_eq!(via_at.progress, FAILED_PROGRESS);
        assert_eq!(via_at.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_at_clamps_percentage() {
        let update = ProgressUpdate::at("job-1", ProcessingStage::Processing, 140.0, "x");
        assert_eq!(update.progress, 100.0);
        let update = ProgressUpdate::at("job-1", ProcessingStage::Processing, -5.0, "x");
        assert_eq!(update.progress, 0.0);
    }

    #[tokio::test]
    async fn test_subscription_stream() {
        let tracker = ProgressTracker::new(10);
        let stream = tracker.subscribe().into_stream();
        tracker.update(ProgressUpdate::new("job-1", ProcessingStage::Downloading));
        tracker.clear("job-1");

        let events: Vec<TrackerEvent> = stream.take(2).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].job_id(), "job-1");
        assert!(matches!(events[1], TrackerEvent::Cleared { .. }));
    }
}
