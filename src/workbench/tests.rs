use super::*;
use crate::api::mock_client::{sse_frame, token_frame, tool_frame};
use crate::api::{MockChunk, MockTransport};
use crate::state::{TimelineEvent, VerdictStatus};
use crate::types::MatchStatus;
use std::time::Instant;

const VERDICT_JSON: &str = r#"{"full_name":"Jane Doe","status":"Positive","articles":[{"source":"Herald","date":"2024-01-01","snippet":"fraud probe","sentiment":"Negative","relevanceScore":0.9}]}"#;

fn settings() -> WorkbenchSettings {
    WorkbenchSettings {
        batch_delay: Duration::ZERO,
        idle_timeout: None,
    }
}

fn workbench(transport: MockTransport) -> Workbench<MockTransport> {
    Workbench::new(transport, SessionStore::new(), settings())
}

fn full_script() -> Vec<String> {
    vec![
        sse_frame("run_started", r#"{"ts":1700000000}"#),
        tool_frame("exa_search", "call-1"),
        token_frame("Reviewed three articles. "),
        token_frame("Summary follows.\n```json\n"),
        token_frame(VERDICT_JSON),
        token_frame("\n```"),
        sse_frame("run_finished", "{}"),
    ]
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = rx.try_recv() {
        out.push(update);
    }
    out
}

#[tokio::test]
async fn test_stream_end_to_end_builds_text_timeline_and_verdict() {
    let transport = MockTransport::new().with_chunks("C1", full_script());
    let bench = workbench(transport);

    let outcome = bench.open_stream("C1", false).await.unwrap();
    assert_eq!(outcome, OpenOutcome::Completed);

    let view = bench.projection("C1").unwrap();
    assert_eq!(view.visible_text, "Reviewed three articles. Summary follows.");
    assert!(!view.is_active);
    assert_eq!(view.last_error, None);
    assert_eq!(view.verdict_status, VerdictStatus::Parsed);
    let verdict = view.verdict.unwrap();
    assert_eq!(verdict.full_name.as_deref(), Some("Jane Doe"));
    assert_eq!(verdict.status, Some(MatchStatus::Positive));
    assert_eq!(view.articles.len(), 1);
    assert_eq!(view.articles[0].source, "Herald");

    let kinds: Vec<&str> = view
        .timeline
        .iter()
        .map(|event| match event {
            TimelineEvent::Run { .. } => "run",
            TimelineEvent::Tool { .. } => "tool",
            TimelineEvent::Text { .. } => "text",
        })
        .collect();
    assert_eq!(kinds, vec!["run", "tool", "text"]);
    match &view.timeline[0] {
        TimelineEvent::Run { finished_at, .. } => assert!(finished_at.is_some()),
        other => panic!("expected run marker, got {other:?}"),
    }
    match &view.timeline[1] {
        TimelineEvent::Tool { title, .. } => assert_eq!(title, "Searching Adverse Media"),
        other => panic!("expected tool entry, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cached_subject_is_not_reopened_without_force() {
    let transport = MockTransport::new().with_chunks("C1", full_script());
    let bench = workbench(transport);

    bench.open_stream("C1", false).await.unwrap();
    let before = bench.projection("C1").unwrap();

    let outcome = bench.open_stream("C1", false).await.unwrap();
    assert_eq!(outcome, OpenOutcome::Cached);
    assert_eq!(bench.transport().open_count("C1"), 1);
    assert_eq!(bench.projection("C1").unwrap(), before);
}

#[tokio::test]
async fn test_forced_rerun_resets_state_and_case_status() {
    let transport = MockTransport::new().with_chunks("C1", full_script());
    let bench = workbench(transport);

    bench.open_stream("C1", false).await.unwrap();
    bench.close_case("C1").unwrap();

    let outcome = bench.open_stream("C1", true).await.unwrap();
    assert_eq!(outcome, OpenOutcome::Completed);
    assert_eq!(bench.transport().open_count("C1"), 2);

    let view = bench.projection("C1").unwrap();
    assert_eq!(view.case_status, CaseStatus::Open);
    // Same script again: no duplicated text or timeline entries.
    assert_eq!(view.visible_text, "Reviewed three articles. Summary follows.");
    assert_eq!(view.timeline.len(), 3);
}

#[tokio::test]
async fn test_updates_are_published_in_order() {
    let transport = MockTransport::new().with_chunks(
        "C1",
        vec![token_frame("Hello "), token_frame("world"), sse_frame("run_finished", "{}")],
    );
    let mut bench = workbench(transport);
    let mut rx = bench.subscribe();

    bench.open_stream("C1", false).await.unwrap();
    let updates = drain(&mut rx);

    assert_eq!(
        updates.first(),
        Some(&SessionUpdate::StreamOpened {
            subject_id: "C1".to_string()
        })
    );
    let appended: Vec<&str> = updates
        .iter()
        .filter_map(|update| match update {
            SessionUpdate::TextAppended { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(appended, vec!["Hello ", "world"]);
    assert_eq!(
        updates.last(),
        Some(&SessionUpdate::StreamClosed {
            subject_id: "C1".to_string(),
            error: None
        })
    );
}

#[tokio::test]
async fn test_regression_publishes_full_replacement() {
    let transport = MockTransport::new().with_chunks(
        "C1",
        vec![token_frame("Hello world ``"), token_frame("`json\n{")],
    );
    let mut bench = workbench(transport);
    let mut rx = bench.subscribe();

    bench.open_stream("C1", false).await.unwrap();
    let replaced: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|update| match update {
            SessionUpdate::TextReplaced { text, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(replaced, vec!["Hello world ".to_string()]);

    let view = bench.projection("C1").unwrap();
    assert_eq!(view.visible_text, "Hello world ");
    assert!(matches!(view.verdict_status, VerdictStatus::Malformed { .. }));
}

#[tokio::test]
async fn test_transport_failure_keeps_partial_text_and_clears_active() {
    let transport = MockTransport::new().with_script(
        "C1",
        vec![
            MockChunk::Data(token_frame("Partial analysis")),
            MockChunk::Fail("connection reset".to_string()),
            MockChunk::Data(token_frame(" never seen")),
        ],
    );
    let bench = workbench(transport);

    let err = bench.open_stream("C1", false).await.unwrap_err();
    assert!(matches!(err, StreamError::Transport(ref msg) if msg.contains("connection reset")));

    let view = bench.projection("C1").unwrap();
    assert_eq!(view.visible_text, "Partial analysis");
    assert!(!view.is_active);
    assert!(view.last_error.unwrap().contains("connection reset"));
}

#[tokio::test]
async fn test_open_failure_is_reported_as_transport_error() {
    let bench = workbench(MockTransport::new());

    let err = bench.open_stream("missing", false).await.unwrap_err();
    assert!(matches!(err, StreamError::Transport(_)));
    let view = bench.projection("missing").unwrap();
    assert!(!view.is_active);
    assert!(view.visible_text.is_empty());
}

#[tokio::test]
async fn test_idle_timeout_abandons_stalled_stream() {
    let transport = MockTransport::new().with_script(
        "C1",
        vec![MockChunk::Data(token_frame("Started")), MockChunk::Stall],
    );
    let bench = Workbench::new(
        transport,
        SessionStore::new(),
        WorkbenchSettings {
            batch_delay: Duration::ZERO,
            idle_timeout: Some(Duration::from_millis(50)),
        },
    );

    let err = bench.open_stream("C1", false).await.unwrap_err();
    assert_eq!(err, StreamError::IdleTimeout(Duration::from_millis(50)));

    let view = bench.projection("C1").unwrap();
    assert_eq!(view.visible_text, "Started");
    assert!(!view.is_active);
}

#[tokio::test]
async fn test_cancellation_keeps_partial_state() {
    let transport = MockTransport::new().with_script(
        "C1",
        vec![MockChunk::Data(token_frame("Halfway")), MockChunk::Stall],
    );
    let bench = workbench(transport);
    let cancel = CancellationToken::new();

    let handle = bench.spawn_stream("C1", false, cancel.clone());
    tokio::time::timeout(Duration::from_secs(2), async {
        while bench.projection("C1").map(|view| view.visible_text).as_deref() != Some("Halfway") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first chunk should be applied");
    assert!(bench.store().is_active("C1"));

    cancel.cancel();
    let result = handle.await.unwrap();
    assert_eq!(result, Err(StreamError::Cancelled));
    let view = bench.projection("C1").unwrap();
    assert_eq!(view.visible_text, "Halfway");
    assert!(!view.is_active);
}

#[tokio::test]
async fn test_active_subject_is_not_reopened() {
    let transport = MockTransport::new().with_script("C1", vec![MockChunk::Stall]);
    let bench = workbench(transport);
    let cancel = CancellationToken::new();

    let handle = bench.spawn_stream("C1", false, cancel.clone());
    tokio::time::timeout(Duration::from_secs(2), async {
        while bench.transport().open_count("C1") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stream should open");

    let outcome = bench.open_stream("C1", true).await.unwrap();
    assert_eq!(outcome, OpenOutcome::AlreadyActive);
    assert_eq!(bench.transport().open_count("C1"), 1);

    cancel.cancel();
    assert_eq!(handle.await.unwrap(), Err(StreamError::Cancelled));
}

#[tokio::test]
async fn test_concurrent_subjects_do_not_interfere() {
    let transport = MockTransport::new()
        .with_script(
            "A",
            vec![MockChunk::Data(token_frame("Alpha so far")), MockChunk::Stall],
        )
        .with_chunks("B", vec![token_frame("Bravo "), token_frame("complete")]);
    let bench = workbench(transport);
    let cancel_a = CancellationToken::new();

    let handle_a = bench.spawn_stream("A", false, cancel_a.clone());
    let outcome_b = bench.open_stream("B", false).await.unwrap();
    assert_eq!(outcome_b, OpenOutcome::Completed);

    tokio::time::timeout(Duration::from_secs(2), async {
        while bench.projection("A").map(|view| view.visible_text).as_deref() != Some("Alpha so far") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("A should receive its first chunk");

    assert!(bench.store().is_active("A"));
    assert_eq!(bench.projection("B").unwrap().visible_text, "Bravo complete");

    cancel_a.cancel();
    handle_a.await.unwrap().unwrap_err();
    assert_eq!(bench.projection("A").unwrap().visible_text, "Alpha so far");
    assert_eq!(bench.projection("B").unwrap().visible_text, "Bravo complete");
}

#[tokio::test]
async fn test_batch_runs_sequentially_and_continues_after_failure() {
    let transport = MockTransport::new()
        .with_chunks("A", vec![token_frame("a")])
        .with_script("B", vec![MockChunk::Fail("boom".to_string())])
        .with_chunks("C", vec![token_frame("c")]);
    let delay = Duration::from_millis(20);
    let bench = Workbench::new(
        transport,
        SessionStore::new(),
        WorkbenchSettings {
            batch_delay: delay,
            idle_timeout: None,
        },
    );
    let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];

    let started = Instant::now();
    let results = bench.run_batch(&ids).await;
    assert!(started.elapsed() >= delay * 2);

    assert_eq!(bench.transport().opened(), ids);
    let subjects: Vec<&str> = results.iter().map(|r| r.subject_id.as_str()).collect();
    assert_eq!(subjects, vec!["A", "B", "C"]);
    assert_eq!(results[0].result, Ok(OpenOutcome::Completed));
    assert!(results[1].result.is_err());
    assert_eq!(results[2].result, Ok(OpenOutcome::Completed));
    assert_eq!(bench.viewed().as_deref(), Some("C"));
}

#[tokio::test]
async fn test_batch_forces_rerun_of_cached_subjects() {
    let transport = MockTransport::new().with_chunks("A", vec![token_frame("a")]);
    let bench = workbench(transport);

    bench.open_stream("A", false).await.unwrap();
    let results = bench.run_batch(&["A".to_string()]).await;
    assert_eq!(results[0].result, Ok(OpenOutcome::Completed));
    assert_eq!(bench.transport().open_count("A"), 2);
}

#[tokio::test]
async fn test_run_selected_uses_selection_order() {
    let transport = MockTransport::new()
        .with_chunks("A", vec![token_frame("a")])
        .with_chunks("B", vec![token_frame("b")]);
    let bench = workbench(transport);

    assert!(bench.toggle_selection("B"));
    assert!(bench.toggle_selection("A"));
    bench.run_selected().await;
    assert_eq!(bench.transport().opened(), vec!["B".to_string(), "A".to_string()]);
}

#[test]
fn test_selection_toggle_and_select_all() {
    let bench = workbench(MockTransport::new());
    let all = vec!["A".to_string(), "B".to_string(), "C".to_string()];

    assert!(bench.toggle_selection("B"));
    assert!(!bench.toggle_selection("B"));
    assert!(bench.selected_ids().is_empty());

    bench.toggle_selection("C");
    bench.select_all(&all);
    assert_eq!(bench.selected_ids(), vec!["C", "A", "B"]);

    bench.select_all(&all);
    assert!(bench.selected_ids().is_empty());

    bench.select("B");
    assert_eq!(bench.viewed().as_deref(), Some("B"));
}

#[tokio::test]
async fn test_case_actions_require_a_finished_session() {
    let transport = MockTransport::new()
        .with_chunks("C1", vec![token_frame("done")])
        .with_script("C2", vec![MockChunk::Stall]);
    let bench = workbench(transport);

    assert_eq!(
        bench.close_case("nobody"),
        Err(CaseError::UnknownSubject("nobody".to_string()))
    );

    bench.open_stream("C1", false).await.unwrap();
    bench.escalate("C1").unwrap();
    assert_eq!(bench.projection("C1").unwrap().case_status, CaseStatus::Escalated);
    bench.close_case("C1").unwrap();
    assert_eq!(bench.projection("C1").unwrap().case_status, CaseStatus::Closed);

    let cancel = CancellationToken::new();
    let handle = bench.spawn_stream("C2", false, cancel.clone());
    tokio::time::timeout(Duration::from_secs(2), async {
        while !bench.store().is_active("C2") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("C2 should become active");
    assert_eq!(
        bench.escalate("C2"),
        Err(CaseError::StreamActive("C2".to_string()))
    );
    cancel.cancel();
    handle.await.unwrap().unwrap_err();
    assert_eq!(bench.projection("C2").unwrap().case_status, CaseStatus::Open);
}

#[test]
fn test_settings_follow_config() {
    let config = Config {
        batch_delay: Duration::from_millis(250),
        stream_idle_timeout: Some(Duration::from_secs(5)),
        ..Config::default()
    };
    let settings = WorkbenchSettings::from(&config);
    assert_eq!(settings.batch_delay, Duration::from_millis(250));
    assert_eq!(settings.idle_timeout, Some(Duration::from_secs(5)));
}

#[tokio::test]
async fn test_batch_closes_each_stream_before_opening_the_next() {
    let transport = MockTransport::new()
        .with_chunks("A", vec![token_frame("a")])
        .with_chunks("B", vec![token_frame("b")]);
    let mut bench = workbench(transport);
    let mut rx = bench.subscribe();

    bench.run_batch(&["A".to_string(), "B".to_string()]).await;
    let lifecycle: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|update| match update {
            SessionUpdate::StreamOpened { subject_id } => Some(format!("open:{subject_id}")),
            SessionUpdate::StreamClosed { subject_id, .. } => Some(format!("close:{subject_id}")),
            _ => None,
        })
        .collect();
    assert_eq!(lifecycle, vec!["open:A", "close:A", "open:B", "close:B"]);
}

#[tokio::test]
async fn test_dropped_stream_future_releases_subject() {
    let transport = MockTransport::new().with_script(
        "C1",
        vec![MockChunk::Data(token_frame("Partial")), MockChunk::Stall],
    );
    let mut bench = workbench(transport);
    let mut rx = bench.subscribe();

    let timed_out = tokio::time::timeout(Duration::from_millis(50), bench.open_stream("C1", false)).await;
    assert!(timed_out.is_err());

    let view = bench.projection("C1").unwrap();
    assert!(!view.is_active);
    assert_eq!(view.visible_text, "Partial");
    assert_eq!(view.last_error.as_deref(), Some("stream abandoned"));
    assert!(drain(&mut rx).contains(&SessionUpdate::StreamClosed {
        subject_id: "C1".to_string(),
        error: Some("stream abandoned".to_string()),
    }));

    bench.close_case("C1").unwrap();
    assert_eq!(bench.open_stream("C1", false).await.unwrap(), OpenOutcome::Cached);
    let retry = tokio::time::timeout(Duration::from_millis(50), bench.open_stream("C1", true)).await;
    assert!(retry.is_err());
    assert_eq!(bench.transport().open_count("C1"), 2);
    assert!(!bench.store().is_active("C1"));
}

#[tokio::test]
async fn test_aborted_stream_task_releases_subject() {
    let transport = MockTransport::new().with_script("C1", vec![MockChunk::Stall]);
    let bench = workbench(transport);

    let handle = bench.spawn_stream("C1", false, CancellationToken::new());
    tokio::time::timeout(Duration::from_secs(2), async {
        while !bench.store().is_active("C1") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("C1 should become active");

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert!(!bench.store().is_active("C1"));
    assert_eq!(
        bench.projection("C1").unwrap().last_error.as_deref(),
        Some("stream abandoned")
    );
}

#[tokio::test]
async fn test_view_subject_streams_once_then_serves_cache() {
    let transport = MockTransport::new().with_chunks("C1", full_script());
    let bench = workbench(transport);

    assert_eq!(bench.view_subject("C1").await.unwrap(), OpenOutcome::Completed);
    bench.escalate("C1").unwrap();

    assert_eq!(bench.view_subject("C1").await.unwrap(), OpenOutcome::Cached);
    assert_eq!(bench.transport().open_count("C1"), 1);
    assert_eq!(bench.viewed().as_deref(), Some("C1"));
    let view = bench.projection("C1").unwrap();
    assert_eq!(view.case_status, CaseStatus::Escalated);
    assert_eq!(view.verdict_status, VerdictStatus::Parsed);
}

#[tokio::test]
async fn test_id_less_tools_in_one_chunk_are_both_listed() {
    let frame = sse_frame("tool_call_started", r#"{"tool":"exa_search"}"#);
    let transport = MockTransport::new().with_chunks("C1", vec![format!("{frame}{frame}")]);
    let bench = workbench(transport);

    bench.open_stream("C1", false).await.unwrap();
    let tools = bench
        .projection("C1")
        .unwrap()
        .timeline
        .iter()
        .filter(|event| matches!(event, TimelineEvent::Tool { .. }))
        .count();
    assert_eq!(tools, 2);
}
