//! End-to-end tests for ingest, the background job, and question answering,
//! run against real files in a temporary root with fake model backends.

mod common;

use common::{manual_text, FakeEmbedder, ScriptedChat, Workspace};
use manual_rag::ingest::DeviceStatus;
use manual_rag::jobs::{AlreadyRunning, IngestJobManager, JobState, StartOutcome};
use manual_rag::mapping::DeviceError;
use manual_rag::models::{Chunk, ChatMessage};
use manual_rag::pipeline::{QueryError, QueryPipeline, SYSTEM_PROMPT};
use manual_rag::progress::NoProgress;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

// ─── Ingest ─────────────────────────────────────────────────────────

#[tokio::test]
async fn ingest_builds_once_then_reports_cached() {
    let ws = Workspace::new(
        &[("pump", "manuals/pump.txt")],
        &[("manuals/pump.txt", manual_text(3000))],
    );
    let provider = Arc::new(FakeEmbedder::new("hist", 16));
    let ingestor = ws.ingestor(provider.clone());

    let report = ingestor.ingest_all(&NoProgress).await.unwrap();
    assert_eq!(report.get("pump"), Some(DeviceStatus::Built { chunks: 3 }));

    let index = ws.store().load("pump").unwrap().unwrap();
    let ids: Vec<&str> = index.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["pump-0", "pump-1", "pump-2"]);
    assert!(index.iter().all(|c| c.device_id == "pump"));
    assert!(index.iter().all(|c| c.embedding.len() == 16));

    let stamp = ws.store().stamp("pump").unwrap().unwrap();
    assert_eq!(stamp.embedder, "fake:hist");
    assert_eq!(stamp.dims, 16);
    assert_eq!(stamp.chunks, 3);

    let modified = std::fs::metadata(ws.index_file("pump"))
        .unwrap()
        .modified()
        .unwrap();
    let calls = provider.calls();

    let again = ingestor.ingest_all(&NoProgress).await.unwrap();
    assert_eq!(again.get("pump"), Some(DeviceStatus::Cached));
    assert_eq!(again.get("pump").unwrap().to_string(), "ok (cached)");
    assert_eq!(provider.calls(), calls);
    assert_eq!(
        std::fs::metadata(ws.index_file("pump"))
            .unwrap()
            .modified()
            .unwrap(),
        modified
    );
}

#[tokio::test]
async fn missing_manual_is_reported_and_others_continue() {
    let ws = Workspace::new(
        &[
            ("ghost", "manuals/ghost.pdf"),
            ("monitor", "manuals/monitor.txt"),
        ],
        &[("manuals/monitor.txt", manual_text(500))],
    );
    let ingestor = ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16)));

    let report = ingestor.ingest_all(&NoProgress).await.unwrap();
    let statuses: Vec<String> = report.iter().map(|(id, s)| format!("{}={}", id, s)).collect();
    assert_eq!(statuses, vec!["ghost=missing", "monitor=ok (1 chunks)"]);
    assert!(!ws.index_file("ghost").exists());
}

#[tokio::test]
async fn unreadable_mapping_aborts_ingest() {
    let ws = Workspace::new(&[], &[]);
    std::fs::write(ws.root().join("devices.config.json"), "not json").unwrap();
    let ingestor = ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16)));

    let err = ingestor.ingest_all(&NoProgress).await.unwrap_err();
    assert!(format!("{:#}", err).contains("device mapping"));
}

// ─── Background job ─────────────────────────────────────────────────

#[tokio::test]
async fn second_start_does_not_disturb_running_job() {
    let ws = Workspace::new(
        &[("pump", "manuals/pump.txt")],
        &[("manuals/pump.txt", manual_text(3000))],
    );
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(FakeEmbedder::gated("hist", 16, gate.clone()));
    let jobs = IngestJobManager::new(ws.ingestor(provider));

    assert_eq!(jobs.start(), StartOutcome::Started);
    wait_until(|| !jobs.status().progress.is_empty()).await;

    let before = jobs.status();
    assert_eq!(before.state, JobState::Running);
    assert!(before.running);
    assert_eq!(before.progress, vec!["Warming up embedder…".to_string()]);

    assert_eq!(jobs.start(), StartOutcome::AlreadyRunning);
    let err = jobs.run_now().await.unwrap_err();
    assert!(err.downcast_ref::<AlreadyRunning>().is_some());

    let during = jobs.status();
    assert_eq!(during.started_at, before.started_at);
    assert_eq!(during.progress, before.progress);

    gate.notify_one();
    wait_until(|| !jobs.status().running).await;

    let done = jobs.status();
    assert_eq!(done.state, JobState::Completed);
    assert!(done.finished_at.is_some());
    assert!(done.error.is_none());
    assert_eq!(
        done.report.unwrap().get("pump"),
        Some(DeviceStatus::Built { chunks: 3 })
    );
    assert!(done.progress.contains(&"Processing pump…".to_string()));
    assert_eq!(done.progress.last().map(String::as_str), Some("  → done"));
}

#[tokio::test]
async fn abandoned_run_now_still_completes() {
    let ws = Workspace::new(
        &[("pump", "manuals/pump.txt")],
        &[("manuals/pump.txt", manual_text(3000))],
    );
    let gate = Arc::new(Notify::new());
    let provider = Arc::new(FakeEmbedder::gated("hist", 16, gate.clone()));
    let jobs = IngestJobManager::new(ws.ingestor(provider));

    // The caller gives up while the run is blocked in warm-up.
    let abandoned = tokio::time::timeout(Duration::from_millis(100), jobs.run_now()).await;
    assert!(abandoned.is_err());
    assert!(jobs.status().running);

    gate.notify_one();
    wait_until(|| !jobs.status().running).await;

    let done = jobs.status();
    assert_eq!(done.state, JobState::Completed);
    assert!(done.finished_at.is_some());
    assert_eq!(
        done.report.unwrap().get("pump"),
        Some(DeviceStatus::Built { chunks: 3 })
    );

    assert_eq!(jobs.start(), StartOutcome::Started);
    gate.notify_one();
    wait_until(|| !jobs.status().running).await;
    assert_eq!(
        jobs.status().report.unwrap().get("pump"),
        Some(DeviceStatus::Cached)
    );
}

#[tokio::test]
async fn failed_job_records_error_and_can_restart() {
    let ws = Workspace::new(&[], &[]);
    std::fs::write(ws.root().join("devices.config.json"), "[1, 2]").unwrap();
    let jobs = IngestJobManager::new(ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16))));

    assert_eq!(jobs.start(), StartOutcome::Started);
    wait_until(|| !jobs.status().running).await;

    let failed = jobs.status();
    assert_eq!(failed.state, JobState::Failed);
    assert!(failed.report.is_none());
    assert!(failed.finished_at.is_some());
    assert!(failed.error.unwrap().contains("device mapping"));

    std::fs::write(ws.root().join("devices.config.json"), "{}").unwrap();
    let report = jobs.run_now().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(jobs.status().state, JobState::Completed);
}

// ─── Query pipeline ─────────────────────────────────────────────────

#[tokio::test]
async fn answer_builds_index_on_demand_and_returns_top_docs() {
    let ws = Workspace::new(
        &[("pump", "manuals/pump.txt")],
        &[("manuals/pump.txt", manual_text(9000))],
    );
    let chat = Arc::new(ScriptedChat::new("Prime the tubing first [Doc 1]."));
    let pipeline = QueryPipeline::new(
        ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16))),
        chat.clone(),
    );

    let history = vec![ChatMessage::user("Hello")];
    let answer = pipeline
        .answer("pump", "How do I prime the tubing?", &history)
        .await
        .unwrap();

    assert!(ws.index_file("pump").is_file());
    assert_eq!(answer.answer, "Prime the tubing first [Doc 1].");
    assert_eq!(answer.top_docs.len(), 6);
    assert!(answer
        .top_docs
        .windows(2)
        .all(|w| w[0].score >= w[1].score));
    assert!(answer.top_docs.iter().all(|d| d.id.starts_with("pump-")));

    let prompts = chat.prompts();
    assert_eq!(prompts.len(), 1);
    let messages = &prompts[0];
    assert_eq!(messages[0].content, SYSTEM_PROMPT);
    assert_eq!(messages[1], history[0]);
    let user = &messages[2].content;
    assert!(user.starts_with("Device: pump\nUser question: How do I prime the tubing?"));
    assert!(user.contains("# Doc 1 (score "));
    assert!(user.contains("# Doc 6 (score "));
    assert!(!user.contains("# Doc 7"));
}

#[tokio::test]
async fn unmapped_device_fails_without_writing() {
    let ws = Workspace::new(&[("pump", "manuals/pump.txt")], &[]);
    let pipeline = QueryPipeline::new(
        ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16))),
        Arc::new(ScriptedChat::new("unused")),
    );

    let err = pipeline.answer("ventilator", "Hi?", &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::NotMapped(id)) if id == "ventilator"
    ));

    let err = pipeline.answer("pump", "Hi?", &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::DocumentMissing { .. })
    ));

    assert!(ws.store().list().unwrap().is_empty());
}

#[tokio::test]
async fn traversal_device_id_is_rejected() {
    let ws = Workspace::new(&[], &[]);
    let pipeline = QueryPipeline::new(
        ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16))),
        Arc::new(ScriptedChat::new("unused")),
    );

    let err = pipeline.answer("../secrets", "Hi?", &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DeviceError>(),
        Some(DeviceError::InvalidId(_))
    ));
}

#[tokio::test]
async fn index_from_another_embedder_is_rejected() {
    let ws = Workspace::new(
        &[("pump", "manuals/pump.txt")],
        &[("manuals/pump.txt", manual_text(2000))],
    );
    ws.ingestor(Arc::new(FakeEmbedder::new("hist-a", 16)))
        .ingest_all(&NoProgress)
        .await
        .unwrap();

    let chat = Arc::new(ScriptedChat::new("unused"));
    let pipeline = QueryPipeline::new(
        ws.ingestor(Arc::new(FakeEmbedder::new("hist-b", 16))),
        chat.clone(),
    );
    let err = pipeline.answer("pump", "Alarm?", &[]).await.unwrap_err();
    match err.downcast_ref::<QueryError>() {
        Some(QueryError::IndexMismatch {
            index_embedder,
            query_embedder,
            ..
        }) => {
            assert_eq!(index_embedder, "fake:hist-a");
            assert_eq!(query_embedder, "fake:hist-b");
        }
        other => panic!("expected IndexMismatch, got {:?}", other),
    }
    assert!(chat.prompts().is_empty());
}

#[tokio::test]
async fn unstamped_index_with_wrong_dims_is_rejected() {
    let ws = Workspace::new(&[], &[]);
    let legacy = vec![Chunk {
        id: "old-0".into(),
        device_id: "old".into(),
        text: "Legacy text".into(),
        embedding: vec![0.5; 4],
    }];
    std::fs::create_dir_all(ws.config.index_dir()).unwrap();
    std::fs::write(ws.index_file("old"), serde_json::to_string(&legacy).unwrap()).unwrap();

    let pipeline = QueryPipeline::new(
        ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16))),
        Arc::new(ScriptedChat::new("unused")),
    );
    let err = pipeline.answer("old", "Anything?", &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueryError>(),
        Some(QueryError::IndexMismatch {
            index_dims: 4,
            query_dims: 16,
            ..
        })
    ));
}

#[tokio::test]
async fn empty_manual_yields_empty_index_error() {
    let ws = Workspace::new(
        &[("blank", "manuals/blank.txt")],
        &[("manuals/blank.txt", "   \n".to_string())],
    );
    let ingestor = ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16)));
    let report = ingestor.ingest_all(&NoProgress).await.unwrap();
    assert_eq!(report.get("blank"), Some(DeviceStatus::Built { chunks: 0 }));

    let pipeline = QueryPipeline::new(ingestor, Arc::new(ScriptedChat::new("unused")));
    let err = pipeline.answer("blank", "Anything?", &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "Index missing for blank");
}

#[tokio::test]
async fn slow_generation_times_out() {
    let ws = Workspace::new(
        &[("pump", "manuals/pump.txt")],
        &[("manuals/pump.txt", manual_text(1500))],
    );
    let pipeline = QueryPipeline::new(
        ws.ingestor(Arc::new(FakeEmbedder::new("hist", 16))),
        Arc::new(ScriptedChat::slow("too late", Duration::from_secs(30))),
    )
    .with_timeout(Duration::from_millis(100));

    let err = pipeline.answer("pump", "Alarm?", &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<QueryError>(),
        Some(QueryError::GenerationTimeout { .. })
    ));
}
