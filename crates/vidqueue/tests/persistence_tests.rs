//! Write-through persistence, restart recovery and the SQLite ledger.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{wait_for_status, Script, ScriptedProcessor, TestHarness};
use vidqueue::credits::TransactionKind;
use vidqueue::queue::INTERRUPTED_BY_RESTART;
use vidqueue::{
    CreditLedger, Database, JobQueue, JobStatus, ProcessingOptions, ProgressTracker,
    QueueSettings, SqliteLedger,
};

fn single_slot() -> QueueSettings {
    QueueSettings {
        max_concurrent: 1,
        ..QueueSettings::default()
    }
}

#[tokio::test]
async fn test_history_survives_restart() {
    let h = TestHarness::new(1);
    h.ledger.grant("owner", 100);
    let processor = Arc::new(ScriptedProcessor::new(h.input("out")));
    processor.script("bad.mp4", Script::Fail("corrupt moov atom".to_string()));

    let queue = h.open_persistent(single_slot(), Arc::clone(&processor));
    let good = queue
        .submit("owner", h.input("good.mp4"), ProcessingOptions::with_duration(60))
        .await
        .unwrap();
    let bad = queue
        .submit("owner", h.input("bad.mp4"), ProcessingOptions::with_duration(60))
        .await
        .unwrap();
    let completed = wait_for_status(&queue, &good, JobStatus::Completed).await;
    wait_for_status(&queue, &bad, JobStatus::Failed).await;
    drop(queue);

    let reopened = h.open_persistent(single_slot(), Arc::new(ScriptedProcessor::new(h.input("out"))));
    let jobs = reopened.list_by_owner("owner");
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, good);
    assert_eq!(jobs[0].status, JobStatus::Completed);
    assert_eq!(jobs[0].result, completed.result);
    assert_eq!(jobs[1].id, bad);
    assert_eq!(jobs[1].error.as_deref(), Some("corrupt moov atom"));

    assert_eq!(reopened.resume(), 0);
}

#[tokio::test]
async fn test_restart_fails_interrupted_and_resumes_pending() {
    let h = TestHarness::new(1);
    h.ledger.grant("owner", 100);

    let first_processor = Arc::new(ScriptedProcessor::new(h.input("out")));
    let _gate = first_processor.gate("a.mp4");
    let first = h.open_persistent(single_slot(), first_processor);
    let a = first
        .submit("owner", h.input("a.mp4"), ProcessingOptions::with_duration(60))
        .await
        .unwrap();
    let b = first
        .submit("owner", h.input("b.mp4"), ProcessingOptions::with_duration(60))
        .await
        .unwrap();
    wait_for_status(&first, &a, JobStatus::Processing).await;

    // A second process opens the same database while `a` is mid-render.
    let second_processor = Arc::new(ScriptedProcessor::new(h.input("out")));
    let second = h.open_persistent(single_slot(), Arc::clone(&second_processor));

    let interrupted = second.get(&a).unwrap();
    assert_eq!(interrupted.status, JobStatus::Failed);
    assert_eq!(interrupted.error.as_deref(), Some(INTERRUPTED_BY_RESTART));
    assert_eq!(second.get(&b).unwrap().status, JobStatus::Pending);
    assert!(second_processor.started().is_empty());

    assert_eq!(second.resume(), 1);
    wait_for_status(&second, &b, JobStatus::Completed).await;
    assert_eq!(second_processor.started(), vec!["b.mp4"]);
}

#[tokio::test]
async fn test_restored_backlog_waits_for_resume() {
    let h = TestHarness::new(1);
    h.ledger.grant("owner", 100);

    let first_processor = Arc::new(ScriptedProcessor::new(h.input("out")));
    let _gate = first_processor.gate("a.mp4");
    let first = h.open_persistent(single_slot(), first_processor);
    let a = first
        .submit("owner", h.input("a.mp4"), ProcessingOptions::with_duration(60))
        .await
        .unwrap();
    let b = first
        .submit("owner", h.input("b.mp4"), ProcessingOptions::with_duration(60))
        .await
        .unwrap();
    wait_for_status(&first, &a, JobStatus::Processing).await;

    let second_processor = Arc::new(ScriptedProcessor::new(h.input("out")));
    let second = h.open_persistent(single_slot(), Arc::clone(&second_processor));

    // A new submission must not pull the restored backlog forward.
    let c = second
        .submit("owner", h.input("c.mp4"), ProcessingOptions::with_duration(60))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(second.get(&b).unwrap().status, JobStatus::Pending);
    assert_eq!(second.get(&c).unwrap().status, JobStatus::Pending);
    assert!(second_processor.started().is_empty());

    assert_eq!(second.resume(), 2);
    wait_for_status(&second, &c, JobStatus::Completed).await;
    assert_eq!(second_processor.started(), vec!["b.mp4", "c.mp4"]);
}

#[tokio::test]
async fn test_fresh_database_dispatches_without_resume() {
    let h = TestHarness::new(1);
    h.ledger.grant("owner", 100);
    let queue = h.open_persistent(single_slot(), Arc::new(ScriptedProcessor::new(h.input("out"))));

    let id = queue
        .submit("owner", h.input("a.mp4"), ProcessingOptions::with_duration(60))
        .await
        .unwrap();
    wait_for_status(&queue, &id, JobStatus::Completed).await;
}

#[tokio::test]
async fn test_sqlite_ledger_backs_queue() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("vidqueue.db")).unwrap();
    let ledger = Arc::new(SqliteLedger::new(db.clone()));
    ledger.grant("owner", 10, "signup bonus").await.unwrap();

    let processor = Arc::new(ScriptedProcessor::new(dir.path().join("out")));
    let queue = JobQueue::with_database(
        QueueSettings::default(),
        Arc::clone(&ledger) as Arc<dyn CreditLedger>,
        processor,
        ProgressTracker::default(),
        db,
    )
    .unwrap();

    let id = queue
        .submit(
            "owner",
            dir.path().join("clip.mov"),
            ProcessingOptions::with_duration(180),
        )
        .await
        .unwrap();
    wait_for_status(&queue, &id, JobStatus::Completed).await;

    assert_eq!(ledger.balance("owner").await.unwrap(), 4);
    let history = ledger.history("owner", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransactionKind::Debit);
    assert_eq!(history[0].amount, -6);
    assert!(history[0].reason.contains(&id));
    assert_eq!(history[1].reason, "signup bonus");
}
