//! End-to-end rollup runs against a stub backend, with real files on disk.

mod common;

use common::{StubBackend, chunking, document, gateway};
use tome_rs::artifacts::{
    ArtifactKey, Checkpoint, DirectorySink, MemorySink, RollupMetadata, RunStatus,
};
use tome_rs::config::{AnswerConfig, PyramidConfig, RollupConfig};
use tome_rs::error::{Error, ReductionStep};
use tome_rs::pipeline::{Pipeline, Reduction, Source, Strategy};

#[tokio::test]
async fn ten_chunks_take_ten_stages() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectorySink::new(dir.path()).unwrap();

    let output = Pipeline::new(&gateway, chunking(), AnswerConfig::default())
        .run(
            Source::new("doc.txt", &document(100)),
            "who wins?",
            &Strategy::Rollup(RollupConfig::default()),
            &sink,
        )
        .await
        .unwrap();

    let Reduction::Rollup(rollup) = &output.reduction else {
        panic!("expected a rollup");
    };
    assert_eq!(rollup.stages.len(), 10);
    assert!(rollup.is_complete());
    assert_eq!(backend.calls(), 11);

    for stage in 1..=10 {
        let path = dir
            .path()
            .join(format!("summaries/summary_stage_{stage}_of_10.txt"));
        assert!(path.is_file(), "missing {}", path.display());
    }
    let summary = std::fs::read_to_string(dir.path().join("final_summary.txt")).unwrap();
    assert_eq!(summary, rollup.stages[9].text);

    let metadata: RollupMetadata = sink
        .load_json(&ArtifactKey::RollupMetadata)
        .unwrap()
        .unwrap();
    assert_eq!(metadata.status, RunStatus::Complete);
    assert_eq!(metadata.stage_count, 10);
    assert_eq!(metadata.total_chunks, 10);
}

#[tokio::test]
async fn stages_see_chunks_in_order() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());

    Pipeline::new(&gateway, chunking(), AnswerConfig::default())
        .run(
            Source::new("doc", &document(40)),
            "q",
            &Strategy::Rollup(RollupConfig::default()),
            &MemorySink::new(),
        )
        .await
        .unwrap();

    let prompts = backend.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 5);
    for (i, prompt) in prompts.iter().take(4).enumerate() {
        // Stage i+1 holds words 10*i .. 10*i+9 and nothing later.
        assert!(prompt.contains(&format!("w{:04}", i * 10)));
        assert!(prompt.contains(&format!("w{:04}", i * 10 + 9)));
        assert!(!prompt.contains(&format!("w{:04}", (i + 1) * 10)));
    }
}

#[tokio::test]
async fn failed_stage_keeps_earlier_stages_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectorySink::new(dir.path()).unwrap();
    let text = document(100);
    let strategy = Strategy::Rollup(RollupConfig::default());

    let failing = StubBackend::failing_on(Some("section 4 of 10"));
    let failing_gateway = gateway(failing.clone());
    let err = Pipeline::new(&failing_gateway, chunking(), AnswerConfig::default())
        .run(Source::new("doc.txt", &text), "q", &strategy, &sink)
        .await
        .unwrap_err();

    assert_eq!(err.failed_step(), Some(ReductionStep::Rollup { stage: 4 }));
    assert_eq!(failing.calls(), 4);
    let summaries = dir.path().join("summaries");
    assert!(summaries.join("summary_stage_3_of_10.txt").is_file());
    assert!(!summaries.join("summary_stage_4_of_10.txt").exists());
    assert!(!dir.path().join("final_summary.txt").exists());

    let metadata: RollupMetadata = sink
        .load_json(&ArtifactKey::RollupMetadata)
        .unwrap()
        .unwrap();
    assert_eq!(metadata.status, RunStatus::Failed);
    assert_eq!(metadata.stage_count, 3);
    assert!(metadata.error.unwrap().contains("rollup stage 4"));

    let checkpoint: Checkpoint = sink.load_json(&ArtifactKey::Checkpoint).unwrap().unwrap();
    let healthy = StubBackend::new();
    let healthy_gateway = gateway(healthy.clone());
    let output = Pipeline::new(&healthy_gateway, chunking(), AnswerConfig::default())
        .with_checkpoint(checkpoint)
        .run(Source::new("doc.txt", &text), "q", &strategy, &sink)
        .await
        .unwrap();

    // Stages 4..=10 and the answer.
    assert_eq!(healthy.calls(), 8);
    let Reduction::Rollup(rollup) = output.reduction else {
        panic!("expected a rollup");
    };
    assert_eq!(rollup.stages.len(), 10);
}

#[tokio::test]
async fn oversized_stage_fails_before_any_call() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());
    let strategy = Strategy::Rollup(
        RollupConfig::default()
            .with_context_window(30)
            .with_summary_token_limit(10)
            .with_answer_token_limit(10),
    );

    let err = Pipeline::new(&gateway, chunking(), AnswerConfig::new(10))
        .run(
            Source::new("doc", &document(100)),
            "q",
            &strategy,
            &MemorySink::new(),
        )
        .await
        .unwrap_err();

    match err {
        Error::ChunkExceedsContext {
            stage,
            chunk_index,
            context_window,
            required,
        } => {
            assert_eq!(stage, 1);
            assert_eq!(chunk_index, 0);
            assert_eq!(context_window, 30);
            assert!(required > 30);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn summary_and_answer_must_fit_context() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());
    let strategy = Strategy::Rollup(
        RollupConfig::default()
            .with_context_window(5_000)
            .with_summary_token_limit(3_000)
            .with_answer_token_limit(2_000),
    );

    let err = Pipeline::new(&gateway, chunking(), AnswerConfig::new(2_000))
        .run(
            Source::new("doc", &document(100)),
            "q",
            &strategy,
            &MemorySink::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn pyramid_checkpoint_cannot_resume_a_rollup() {
    let text = document(100);
    let pyramid_sink = MemorySink::new();
    Pipeline::new(&gateway(StubBackend::new()), chunking(), AnswerConfig::default())
        .run(
            Source::new("doc", &text),
            "q",
            &Strategy::Pyramid(PyramidConfig::default()),
            &pyramid_sink,
        )
        .await
        .unwrap();
    let checkpoint: Checkpoint =
        serde_json::from_str(&pyramid_sink.get(&ArtifactKey::Checkpoint).unwrap()).unwrap();

    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());
    let err = Pipeline::new(&gateway, chunking(), AnswerConfig::default())
        .with_checkpoint(checkpoint)
        .run(
            Source::new("doc", &text),
            "q",
            &Strategy::Rollup(RollupConfig::default()),
            &MemorySink::new(),
        )
        .await
        .unwrap_err();

    match err {
        Error::InvalidConfiguration(reason) => assert!(reason.contains("pyramid run")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn checkpoint_from_another_query_is_not_reused() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectorySink::new(dir.path()).unwrap();
    let text = document(100);
    let strategy = Strategy::Rollup(RollupConfig::default());

    let failing = StubBackend::failing_on(Some("section 4 of 10"));
    Pipeline::new(&gateway(failing), chunking(), AnswerConfig::default())
        .run(Source::new("doc.txt", &text), "who wins?", &strategy, &sink)
        .await
        .unwrap_err();
    let checkpoint: Checkpoint = sink.load_json(&ArtifactKey::Checkpoint).unwrap().unwrap();
    assert_eq!(checkpoint.run().query, "who wins?");

    let healthy = StubBackend::new();
    let err = Pipeline::new(&gateway(healthy.clone()), chunking(), AnswerConfig::default())
        .with_checkpoint(checkpoint)
        .run(Source::new("doc.txt", &text), "who loses?", &strategy, &sink)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert_eq!(healthy.calls(), 0);
}

#[tokio::test]
async fn every_call_carries_a_system_prompt() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());

    Pipeline::new(
        &gateway,
        chunking().with_tokens_per_selection(1_234),
        AnswerConfig::default(),
    )
    .run(
        Source::new("doc", &document(30)),
        "q",
        &Strategy::Rollup(RollupConfig::default()),
        &MemorySink::new(),
    )
    .await
    .unwrap();

    let systems = backend.systems.lock().unwrap();
    // Three stages, then the answer.
    assert_eq!(systems.len(), 4);
    for stage in &systems[..3] {
        assert!(stage.contains("about 1234 tokens"));
    }
    assert!(!systems[3].is_empty());
}
