use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use tollgate_agent::{
    AgentRuntime, DryRunSender, EventSource, GuardedComposer, JsonlEventSource,
    OutboundGuardrails, RuntimeError, RuntimeSettings, SourceError, TemplateComposer,
};
use tollgate_core::{
    shutdown_channel, AuditSink, Clock, DecisionPipeline, DecisionRecord, Event, EventId,
    FixedClock, JsonlAuditSink, Policy, PolicySettings, ReasonCode, RecordingSleeper,
    RetryExecutor, RetryPolicy, StateStore,
};

const FEED: &str = r#"{"id":"m-1","kind":"mention","author":"ada","text":"hello agent"}
{"id":"c-1","kind":"comment","author":"bob","text":"How is the budget split across the day?"}
{"id":"p-1","kind":"post","author":"cy","text":"nice sunset"}
{"id":"","kind":"post","author":"dee","text":"no id here"}
{"id":"m-1","kind":"mention","author":"ada","text":"hello again"}
"#;

struct Fixture {
    dir: TempDir,
    clock: FixedClock,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("events.jsonl"), FEED).expect("write feed");
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 1, 15, 0, 0).unwrap());
        Self { dir, clock }
    }

    fn path(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

    fn runtime(&self) -> AgentRuntime {
        self.runtime_with_source(Arc::new(JsonlEventSource::new(self.path("events.jsonl"))))
    }

    fn runtime_with_source(&self, source: Arc<dyn EventSource>) -> AgentRuntime {
        let log_dir = self.path("logs");
        let audit: Arc<dyn AuditSink> = Arc::new(JsonlAuditSink::new(&log_dir));
        let store = StateStore::new(self.path("agent_state.json")).with_audit(audit.clone());
        let executor = RetryExecutor::new(RetryPolicy::default(), audit.clone())
            .with_sleeper(Arc::new(RecordingSleeper::default()))
            .with_clock(Arc::new(self.clock.clone()));
        let pipeline = DecisionPipeline::new(
            Policy::from_settings(&PolicySettings::default()).expect("default policy"),
            store,
            executor,
            Arc::new(GuardedComposer::new(TemplateComposer, OutboundGuardrails::default())),
            Arc::new(DryRunSender::in_dir(&log_dir)),
            audit.clone(),
        );

        AgentRuntime::new(
            pipeline,
            source,
            audit,
            RuntimeSettings { batch_limit: 20, poll_interval: Duration::from_secs(3600) },
        )
        .with_clock(Arc::new(self.clock.clone()))
    }
}

/// Puts a directory where the state file belongs on the first fetch, after
/// the cycle has loaded state, so every save fails until it is removed.
struct BlockingSource {
    inner: JsonlEventSource,
    state_path: PathBuf,
    armed: AtomicBool,
    fetches: AtomicUsize,
}

#[async_trait]
impl EventSource for BlockingSource {
    async fn fetch(&self, limit: usize) -> Result<Vec<Event>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.armed.swap(false, Ordering::SeqCst) {
            fs::create_dir_all(&self.state_path).expect("block the state path");
        }
        self.inner.fetch(limit).await
    }

    async fn acknowledge(&self, event: &Event) -> Result<(), SourceError> {
        self.inner.acknowledge(event).await
    }
}

fn read_lines(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[tokio::test]
async fn one_shot_cycle_decides_every_event_and_persists() {
    let fixture = Fixture::new();
    let runtime = fixture.runtime();

    let stats = runtime.run_once().await.expect("cycle succeeds");
    assert_eq!(stats.fetched, 5);
    assert_eq!(stats.replied, 2);
    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.errors, 0);

    let decisions: Vec<DecisionRecord> = read_lines(&fixture.path("logs/decisions.jsonl"))
        .into_iter()
        .map(|value| serde_json::from_value(value).expect("decision record"))
        .collect();
    let reasons: Vec<_> = decisions.iter().map(|record| record.decision.reason).collect();
    assert_eq!(
        reasons,
        vec![
            None,
            None,
            Some(ReasonCode::RelevanceFiltered),
            Some(ReasonCode::InvalidEvent),
            Some(ReasonCode::DuplicateEvent),
        ]
    );

    let outbox = read_lines(&fixture.path("logs/replies_outbound.jsonl"));
    assert_eq!(outbox.len(), 2);
    assert_eq!(outbox[0]["event_id"], "m-1");

    let state = StateStore::new(fixture.path("agent_state.json"))
        .load(fixture.clock.now())
        .expect("state persisted");
    assert_eq!(state.calls_today, 2);
    assert!(state.last_run_timestamp.is_some());
}

#[tokio::test]
async fn acknowledged_events_are_not_replayed_next_cycle() {
    let fixture = Fixture::new();
    let runtime = fixture.runtime();

    runtime.run_once().await.expect("first cycle");
    let second = runtime.run_once().await.expect("second cycle");

    assert_eq!(second.fetched, 0);
    assert_eq!(read_lines(&fixture.path("logs/replies_outbound.jsonl")).len(), 2);
}

#[tokio::test]
async fn restart_does_not_answer_twice() {
    let fixture = Fixture::new();
    fixture.runtime().run_once().await.expect("first process");

    let restarted = fixture.runtime().run_once().await.expect("second process");

    assert_eq!(restarted.fetched, 5);
    assert_eq!(restarted.replied, 0);
    assert_eq!(read_lines(&fixture.path("logs/replies_outbound.jsonl")).len(), 2);
}

#[tokio::test]
async fn daemon_stops_on_shutdown() {
    let fixture = Fixture::new();
    let (trigger, signal) = shutdown_channel();
    let runtime = fixture.runtime().with_shutdown(signal);

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    };
    let (totals, ()) = tokio::join!(runtime.run_daemon(), stopper);

    let totals = totals.expect("daemon exits cleanly");
    assert!(totals.interrupted);
    assert_eq!(totals.errors, 0);
}

#[tokio::test]
async fn unsaved_reply_is_not_resent_while_the_state_file_is_blocked() {
    let fixture = Fixture::new();
    let state_path = fixture.path("agent_state.json");
    let source = Arc::new(BlockingSource {
        inner: JsonlEventSource::new(fixture.path("events.jsonl")),
        state_path: state_path.clone(),
        armed: AtomicBool::new(true),
        fetches: AtomicUsize::new(0),
    });
    let runtime = fixture.runtime_with_source(source.clone());

    let first = runtime.run_once().await;
    assert!(matches!(first, Err(RuntimeError::Pipeline(_))));
    let second = runtime.run_once().await;
    assert!(matches!(second, Err(RuntimeError::Store(_))));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1, "no fetch while state is unsaved");
    assert_eq!(read_lines(&fixture.path("logs/replies_outbound.jsonl")).len(), 1);

    fs::remove_dir(&state_path).expect("unblock the state path");
    let third = runtime.run_once().await.expect("cycle succeeds once the path is clear");
    assert_eq!(third.fetched, 4);
    assert_eq!(third.replied, 1);

    let outbox = read_lines(&fixture.path("logs/replies_outbound.jsonl"));
    let m1_sends = outbox.iter().filter(|line| line["event_id"] == "m-1").count();
    assert_eq!(m1_sends, 1);

    let state = StateStore::new(&state_path).load(fixture.clock.now()).expect("state saved");
    assert!(state.has_replied(&EventId::new("m-1")));
    assert!(state.has_replied(&EventId::new("c-1")));
    assert_eq!(state.calls_today, 2);

    let errors = read_lines(&fixture.path("logs/errors.jsonl"));
    assert!(errors.iter().any(|line| line["error_kind"] == "state_commit_failed"));
}
