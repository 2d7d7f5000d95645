//! End-to-end scenarios: the real core driven through in-memory collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use fediverse_client::Visibility;
use scrabble_bot::Error;
use scrabble_bot::checkpoint::Checkpoint;
use scrabble_bot::event::{EventId, SourceKind};
use scrabble_bot::scoring::{Scorer, TableScorer};
use scrabble_bot::stream::StreamError;
use scrabble_bot::supervisor::{SupervisorConfig, SupervisorReport, SupervisorState};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Run the supervisor until `replies` replies were posted, then shut it down.
async fn run_until(h: &Harness, replies: usize) -> SupervisorReport {
    let cancel = CancellationToken::new();
    let supervisor = h.supervisor.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move { supervisor.run(token).await });

    wait_for_replies(&h.poster, replies).await;
    cancel.cancel();

    let report = task.await.unwrap().unwrap();
    assert_eq!(h.supervisor.state(), SupervisorState::Stopped);
    report
}

#[tokio::test]
async fn test_hello_is_scored_with_language_name() {
    let dir = tempfile::tempdir().unwrap();
    let connector =
        FakeConnector::new().with_session(vec![mention("1001", "alice", "Hello", Some("en"))]);
    let h = harness(connector, supervisor_config(), dir.path()).await;

    let report = run_until(&h, 1).await;

    let replies = h.poster.replies();
    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert_eq!(reply.in_reply_to, EventId::from("1001"));
    assert_eq!(reply.visibility, Visibility::Public);
    assert!(reply.text.starts_with("@alice "));
    assert!(reply.text.contains("HELLO"));
    assert!(reply.text.contains(" 8 "));
    assert!(reply.text.contains("English"));
    assert_eq!(report.replies_sent, 1);
}

#[tokio::test]
async fn test_two_words_get_one_word_reply() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new()
        .with_session(vec![mention("1001", "alice", "hello world", Some("en"))]);
    let h = harness(connector, supervisor_config(), dir.path()).await;

    run_until(&h, 1).await;

    let reply = &h.poster.replies()[0];
    assert!(reply.text.contains("exactly one word"));
    assert!(!reply.text.contains("HELLO"));
}

#[tokio::test]
async fn test_unsupported_script_lists_languages() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new()
        .with_session(vec![mention("1001", "alice", "こんにちは", Some("en"))]);
    let h = harness(connector, supervisor_config(), dir.path()).await;

    run_until(&h, 1).await;

    let reply = &h.poster.replies()[0];
    assert!(reply.text.contains("not supported"));
    let scorer = TableScorer::builtin("de").unwrap();
    for code in scorer.supported_languages() {
        let name = scorer.language_name(&code, "en");
        assert!(reply.text.contains(&name), "{name} missing from {}", reply.text);
    }
}

#[tokio::test]
async fn test_redelivered_event_is_answered_once() {
    let dir = tempfile::tempdir().unwrap();
    let event = mention("1001", "alice", "Hallo", Some("de"));
    let connector = FakeConnector::new().with_session(vec![
        event.clone(),
        event,
        mention("1002", "bob", "Baum", Some("de")),
    ]);
    let h = harness(connector, supervisor_config(), dir.path()).await;

    let report = run_until(&h, 2).await;

    let ids: Vec<EventId> = h.poster.replies().into_iter().map(|r| r.in_reply_to).collect();
    assert_eq!(ids, vec![EventId::from("1001"), EventId::from("1002")]);
    assert_eq!(report.duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_reconnect_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig {
        max_reconnect_attempts: 3,
        ..supervisor_config()
    };
    let h = harness(FakeConnector::new(), config, dir.path()).await;

    let result = h.supervisor.run(CancellationToken::new()).await;

    match result {
        Err(Error::ReconnectExhausted { attempts }) => assert_eq!(attempts, 3),
        other => panic!("expected ReconnectExhausted, got {other:?}"),
    }
    assert_eq!(h.supervisor.state(), SupervisorState::Stopped);

    let attempts = h.connector.open_attempts();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(30));
    }
    assert_eq!(h.poster.count(), 0);
}

#[tokio::test]
async fn test_permanent_connect_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let connector =
        FakeConnector::new().with_failed_connect(StreamError::permanent("401 unauthorized"));
    let h = harness(connector, supervisor_config(), dir.path()).await;

    let result = h.supervisor.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::StreamFatal(_))));
    assert_eq!(h.connector.open_attempts().len(), 1);
    assert_eq!(h.supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_reconnects_after_transient_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig {
        reconnect_delay: Duration::from_millis(20),
        ..supervisor_config()
    };
    let connector = FakeConnector::new()
        .with_failed_connect(StreamError::transient("connection reset"))
        .with_session(vec![mention("1001", "alice", "Hallo", Some("de"))]);
    let h = harness(connector, config, dir.path()).await;

    let report = run_until(&h, 1).await;

    assert_eq!(report.failed_connects, 1);
    assert_eq!(report.connections, 1);
    assert_eq!(h.connector.open_attempts().len(), 2);
}

#[tokio::test]
async fn test_restart_resumes_after_checkpoint() {
    let dir = tempfile::tempdir().unwrap();

    // State left behind by a previous run.
    let mut previous = Checkpoint::new();
    previous.set(SourceKind::Mentions, EventId::from("100"));
    scrabble_bot::checkpoint::CheckpointStore::new(dir.path().join("last_ids.json"))
        .save(&previous)
        .await
        .unwrap();

    let connector = FakeConnector::new()
        .with_history(
            SourceKind::Mentions,
            vec![
                mention("120", "carol", "Haus", Some("de")),
                mention("110", "bob", "Baum", Some("de")),
                mention("100", "alice", "Hallo", Some("de")),
                mention("90", "alice", "Katze", Some("de")),
            ],
        )
        .with_session(vec![
            mention("100", "alice", "Hallo", Some("de")),
            mention("130", "dave", "Hund", Some("de")),
        ]);
    let h = harness(connector, supervisor_config(), dir.path()).await;

    run_until(&h, 3).await;

    let ids: Vec<EventId> = h.poster.replies().into_iter().map(|r| r.in_reply_to).collect();
    assert_eq!(
        ids,
        vec![EventId::from("110"), EventId::from("120"), EventId::from("130")]
    );

    let stored = h.store.load().await.unwrap();
    assert_eq!(stored.get(SourceKind::Mentions), Some(&EventId::from("130")));
    assert_eq!(h.guard.checkpoint_for(SourceKind::Mentions), Some(EventId::from("130")));
}

#[tokio::test]
async fn test_first_run_baselines_without_replying_to_history() {
    let dir = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new()
        .with_history(
            SourceKind::Mentions,
            vec![
                mention("50", "alice", "Alt", Some("de")),
                mention("60", "bob", "Älter", Some("de")),
            ],
        )
        .with_session(vec![mention("70", "carol", "Neu", Some("de"))]);
    let h = harness(connector, supervisor_config(), dir.path()).await;

    run_until(&h, 1).await;

    let replies = h.poster.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].in_reply_to, EventId::from("70"));
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_when_stream_drops_and_reconnects_fail() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig {
        max_reconnect_attempts: 3,
        ..supervisor_config()
    };
    // One session that is closed remotely, then only refused connects.
    let connector = FakeConnector::new().with_dropping_session(Vec::new());
    let h = harness(connector, config, dir.path()).await;

    let result = h.supervisor.run(CancellationToken::new()).await;

    match result {
        Err(Error::ReconnectExhausted { attempts }) => assert_eq!(attempts, 3),
        other => panic!("expected ReconnectExhausted, got {other:?}"),
    }
    assert_eq!(h.supervisor.state(), SupervisorState::Stopped);

    let attempts = h.connector.open_attempts();
    assert_eq!(attempts.len(), 4);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(30));
    }
}

#[tokio::test]
async fn test_mentions_missed_while_disconnected_are_answered_after_empty_first_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig {
        reconnect_delay: Duration::from_millis(20),
        ..supervisor_config()
    };
    let connector = FakeConnector::new()
        .with_history(SourceKind::Mentions, Vec::new())
        .with_history(
            SourceKind::Mentions,
            vec![mention("200", "alice", "Hallo", Some("de"))],
        )
        .with_dropping_session(Vec::new())
        .with_session(Vec::new());
    let h = harness(connector, config, dir.path()).await;

    let report = run_until(&h, 1).await;

    assert_eq!(h.poster.replies()[0].in_reply_to, EventId::from("200"));
    assert_eq!(report.connections, 2);
    assert_eq!(
        h.guard.checkpoint_for(SourceKind::Mentions),
        Some(EventId::from("200"))
    );
}

#[tokio::test]
async fn test_first_monitored_post_after_empty_history_is_scored() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig {
        poll_interval: Duration::from_millis(50),
        ..supervisor_config()
    };
    let connector = FakeConnector::new()
        .with_history(SourceKind::MonitoredAccount, Vec::new())
        .with_history(SourceKind::MonitoredAccount, vec![monitored_post("300", "Wort")])
        .with_session(Vec::new());
    let h = harness_with(connector, config, dir.path(), HarnessOptions::monitoring()).await;

    run_until(&h, 1).await;

    let reply = &h.poster.replies()[0];
    assert_eq!(reply.in_reply_to, EventId::from("300"));
    assert!(reply.text.starts_with(&format!("@{MONITORED_ACCT} ")));
    assert!(reply.text.contains("WORT"));
}

#[tokio::test]
async fn test_polls_monitored_account_while_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig {
        poll_interval: Duration::from_millis(50),
        ..supervisor_config()
    };
    let connector = FakeConnector::new()
        .with_history(SourceKind::MonitoredAccount, vec![monitored_post("10", "Alt")])
        .with_history(
            SourceKind::MonitoredAccount,
            vec![monitored_post("20", "Neu"), monitored_post("10", "Alt")],
        )
        .with_session(Vec::new());
    let h = harness_with(connector, config, dir.path(), HarnessOptions::monitoring()).await;

    let report = run_until(&h, 1).await;

    let ids: Vec<EventId> = h.poster.replies().into_iter().map(|r| r.in_reply_to).collect();
    assert_eq!(ids, vec![EventId::from("20")]);
    assert_eq!(report.replies_sent, 1);

    let stored = h.store.load().await.unwrap();
    assert_eq!(
        stored.get(SourceKind::MonitoredAccount),
        Some(&EventId::from("20"))
    );
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_reply() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Semaphore::new(0));
    let connector =
        FakeConnector::new().with_session(vec![mention("1001", "alice", "Hallo", Some("de"))]);
    let options = HarnessOptions {
        poster: RecordingPoster::gated(gate.clone()),
        ..HarnessOptions::default()
    };
    let h = harness_with(connector, supervisor_config(), dir.path(), options).await;

    let cancel = CancellationToken::new();
    let supervisor = h.supervisor.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move { supervisor.run(token).await });

    let poster = h.poster.clone();
    wait_until("the reply to start", move || poster.started() == 1).await;
    cancel.cancel();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!task.is_finished());
    assert_eq!(h.poster.count(), 0);

    gate.add_permits(1);
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.replies_sent, 1);
    assert_eq!(h.poster.count(), 1);
    assert_eq!(h.supervisor.state(), SupervisorState::Stopped);
    let stored = h.store.load().await.unwrap();
    assert_eq!(stored.get(SourceKind::Mentions), Some(&EventId::from("1001")));
}
