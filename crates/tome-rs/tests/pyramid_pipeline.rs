//! End-to-end pyramid runs against a stub backend, with real files on disk.

mod common;

use common::{StubBackend, chunking, document, gateway};
use tome_rs::artifacts::{
    ArtifactKey, ArtifactSink, Checkpoint, DirectorySink, MemorySink, PyramidMetadata, RunStatus,
};
use tome_rs::config::{AnswerConfig, PyramidConfig};
use tome_rs::error::{Error, ReductionStep};
use tome_rs::pipeline::{Pipeline, Reduction, Source, Strategy};

fn pyramid(strategy: &Strategy) -> &PyramidConfig {
    match strategy {
        Strategy::Pyramid(config) => config,
        Strategy::Rollup(_) => unreachable!(),
    }
}

#[tokio::test]
async fn twenty_three_chunks_build_four_levels() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectorySink::new(dir.path()).unwrap();
    let text = document(230);
    let strategy = Strategy::Pyramid(PyramidConfig::uniform(5, 4));

    let output = Pipeline::new(&gateway, chunking(), AnswerConfig::default())
        .run(Source::new("doc.txt", &text), "what happens?", &strategy, &sink)
        .await
        .unwrap();

    let Reduction::Pyramid(built) = &output.reduction else {
        panic!("expected a pyramid");
    };
    assert_eq!(built.level_sizes(), [23, 6, 2, 1]);
    // 6 + 2 + 1 summaries, then one answer call.
    assert_eq!(backend.calls(), 10);
    assert_eq!(output.answer.query, "what happens?");

    let root = dir.path();
    assert!(root.join("level_1/window_000_chunks_1-5.txt").is_file());
    assert!(root.join("level_1/window_005_chunks_21-23.txt").is_file());
    assert!(root.join("level_2/window_001_chunks_17-23.txt").is_file());
    assert!(root.join("level_3/window_000_chunks_1-23.txt").is_file());
    let answer = std::fs::read_to_string(root.join("final_answer.txt")).unwrap();
    assert_eq!(answer, output.answer.text);
    let summary = std::fs::read_to_string(root.join("final_summary.txt")).unwrap();
    assert_eq!(summary, output.answer.supporting_text);

    let metadata: PyramidMetadata = sink
        .load_json(&ArtifactKey::PyramidMetadata)
        .unwrap()
        .unwrap();
    assert_eq!(metadata.status, RunStatus::Complete);
    assert_eq!(metadata.total_chunks, 23);
    assert_eq!(metadata.windows_per_level, [6, 2, 1]);
    assert_eq!(metadata.base_windows, pyramid(&strategy).base);
    assert!(metadata.error.is_none());
}

#[tokio::test]
async fn zero_chunk_size_fails_before_any_call() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());
    let sink = MemorySink::new();

    let err = Pipeline::new(
        &gateway,
        chunking().with_tokens_per_chunk(0),
        AnswerConfig::default(),
    )
    .run(
        Source::new("doc", &document(50)),
        "q",
        &Strategy::Pyramid(PyramidConfig::default()),
        &sink,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert_eq!(backend.calls(), 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn stride_wider_than_window_is_rejected() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());

    let err = Pipeline::new(&gateway, chunking(), AnswerConfig::default())
        .run(
            Source::new("doc", &document(50)),
            "q",
            &Strategy::Pyramid(PyramidConfig::uniform(4, 5)),
            &MemorySink::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn blank_document_is_empty() {
    let backend = StubBackend::new();
    let gateway = gateway(backend.clone());

    let err = Pipeline::new(&gateway, chunking(), AnswerConfig::default())
        .run(
            Source::new("doc", " \n\n  "),
            "q",
            &Strategy::Pyramid(PyramidConfig::default()),
            &MemorySink::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EmptyDocument));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn failed_level_keeps_lower_levels_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let sink = DirectorySink::new(dir.path()).unwrap();
    let text = document(230);
    let strategy = Strategy::Pyramid(PyramidConfig::uniform(5, 4));

    // Only the second window of level 2 covers chunks 17-23.
    let failing = StubBackend::failing_on(Some("chunks 17-23"));
    let failing_gateway = gateway(failing.clone());
    let err = Pipeline::new(&failing_gateway, chunking(), AnswerConfig::default())
        .run(Source::new("doc.txt", &text), "q", &strategy, &sink)
        .await
        .unwrap_err();

    assert_eq!(
        err.failed_step(),
        Some(ReductionStep::Pyramid {
            level: 2,
            window: 1
        })
    );
    assert!(dir.path().join("level_1/window_005_chunks_21-23.txt").is_file());
    assert!(!dir.path().join("level_2").exists());
    assert!(!dir.path().join("final_answer.txt").exists());

    let metadata: PyramidMetadata = sink
        .load_json(&ArtifactKey::PyramidMetadata)
        .unwrap()
        .unwrap();
    assert_eq!(metadata.status, RunStatus::Failed);
    assert_eq!(metadata.level_count, 1);
    assert!(metadata.error.unwrap().contains("pyramid level 2, window 1"));

    let checkpoint: Checkpoint = sink.load_json(&ArtifactKey::Checkpoint).unwrap().unwrap();
    let Checkpoint::Pyramid { ref levels, .. } = checkpoint else {
        panic!("expected a pyramid checkpoint");
    };
    assert_eq!(levels.len(), 1);

    // Level 1 is not redone: 2 + 1 summaries and the answer.
    let healthy = StubBackend::new();
    let healthy_gateway = gateway(healthy.clone());
    let output = Pipeline::new(&healthy_gateway, chunking(), AnswerConfig::default())
        .with_checkpoint(checkpoint)
        .run(Source::new("doc.txt", &text), "q", &strategy, &sink)
        .await
        .unwrap();
    assert_eq!(healthy.calls(), 4);
    let Reduction::Pyramid(built) = output.reduction else {
        panic!("expected a pyramid");
    };
    assert_eq!(built.level_sizes(), [23, 6, 2, 1]);
}

#[tokio::test]
async fn answer_failure_keeps_reduction_artifacts() {
    let sink = MemorySink::new();
    let backend = StubBackend::failing_on(Some("<FINAL_SUMMARY>"));
    let gateway = gateway(backend.clone());

    let err = Pipeline::new(&gateway, chunking(), AnswerConfig::default())
        .run(
            Source::new("doc", &document(230)),
            "q",
            &Strategy::Pyramid(PyramidConfig::uniform(5, 4)),
            &sink,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SynthesisFailed { .. }));
    assert!(sink.get(&ArtifactKey::FinalSummary).is_some());
    assert!(sink.get(&ArtifactKey::FinalAnswer).is_none());
}

#[tokio::test]
async fn identical_runs_produce_identical_artifacts() {
    let text = document(230);
    let strategy = Strategy::Pyramid(PyramidConfig::uniform(5, 4).with_concurrency(3));

    let mut runs = Vec::new();
    for _ in 0..2 {
        let backend = StubBackend::new();
        let gateway = gateway(backend);
        let sink = MemorySink::new();
        Pipeline::new(&gateway, chunking(), AnswerConfig::default())
            .run(Source::new("doc", &text), "q", &strategy, &sink)
            .await
            .unwrap();
        let texts: Vec<(ArtifactKey, String)> = sink
            .keys()
            .into_iter()
            .filter(|k| *k != ArtifactKey::PyramidMetadata)
            .map(|k| {
                let body = sink.get(&k).unwrap();
                (k, body)
            })
            .collect();
        runs.push(texts);
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn sink_is_usable_as_trait_object() {
    let sink: Box<dyn ArtifactSink> = Box::new(MemorySink::new());
    let backend = StubBackend::new();
    let gateway = gateway(backend);
    let output = Pipeline::new(&gateway, chunking(), AnswerConfig::default())
        .run(
            Source::new("doc", &document(30)),
            "q",
            &Strategy::Pyramid(PyramidConfig::default()),
            sink.as_ref(),
        )
        .await
        .unwrap();
    assert_eq!(output.reduction.chunks().len(), 3);
}
