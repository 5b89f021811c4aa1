mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use common::Harness;
use subflow::error::ErrorKind;
use subflow::state::{RunStatus, StageOutcomeKind};
use subflow::workflow::WorkflowEvent;

const STAGE_ORDER: [&str; 7] = [
    "audio_extraction",
    "speech_to_text",
    "translation",
    "term_processing",
    "subtitle_merge",
    "text_to_speech",
    "video_muxing",
];

fn outcome_of<'a>(history: &'a [subflow::state::StageRecord], stage: &str) -> &'a StageOutcomeKind {
    &history
        .iter()
        .rev()
        .find(|r| r.stage == stage)
        .unwrap_or_else(|| panic!("no record for {}", stage))
        .outcome
}

#[tokio::test]
async fn test_bilingual_run_without_dub() {
    let h = Harness::new();
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");

    let state = h
        .workflow
        .execute(&input, &output, Arc::new(h.config()), CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Succeeded);
    assert!(output.exists());
    assert_eq!(state.final_video_path.as_deref(), Some(output.as_path()));

    let stages: Vec<&str> = state.stage_history().iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(stages, STAGE_ORDER);
    assert_eq!(
        outcome_of(state.stage_history(), "term_processing"),
        &StageOutcomeKind::Skipped("disabled".to_string())
    );
    assert_eq!(
        outcome_of(state.stage_history(), "text_to_speech"),
        &StageOutcomeKind::Skipped("disabled".to_string())
    );
    assert!(state.processed_transcript.is_none());
    assert!(state.synthesized_audio_path.is_none());

    let tracks = state.subtitle_tracks.as_ref().unwrap();
    assert!(tracks.is_bilingual());
    let merged = tokio_test::assert_ok!(std::fs::read_to_string(&tracks.merged.path));
    assert!(merged.contains("Hello there\n你好"));
    assert!(merged.contains("This LLM is powerful\n这个LLM很强大"));

    assert_eq!(*h.media.muxed_dubs.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn test_term_dictionary_rewrites_target_lines() {
    let h = Harness::new();
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");
    let terms = h.path("terms.json");
    std::fs::write(&terms, r#"{"LLM": "大语言模型"}"#).unwrap();

    let mut config = h.config();
    config.features.enable_term_processing = true;
    config.features.term_dictionary_path = Some(terms);

    let state = h
        .workflow
        .execute(&input, &output, Arc::new(config), CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Succeeded);
    assert_eq!(outcome_of(state.stage_history(), "term_processing"), &StageOutcomeKind::Succeeded);

    let translated = state.translated_transcript.as_ref().unwrap();
    assert_eq!(translated.segments[1].text, "这个LLM很强大");
    let processed = state.processed_transcript.as_ref().unwrap();
    assert_eq!(processed.segments[1].text, "这个大语言模型很强大");

    let merged = std::fs::read_to_string(&state.subtitle_tracks.as_ref().unwrap().merged.path).unwrap();
    assert!(merged.contains("这个大语言模型很强大"));
    assert!(!merged.contains("这个LLM很强大"));
}

#[tokio::test]
async fn test_unreachable_voice_service_yields_partial_run() {
    let h = Harness::new();
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");

    let mut config = h.config();
    config.features.enable_tts = true;

    let result = h.workflow.run(&input, &output, Arc::new(config)).await;

    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.output_path.as_deref(), Some(output.as_path()));
    assert!(output.exists());

    let error = result.error.as_ref().unwrap();
    assert_eq!(error.stage, "text_to_speech");
    assert_eq!(error.kind, ErrorKind::Transient);
    assert_eq!(error.attempts, 3);
    assert!(error.retries_exhausted);

    // One clip per attempt before the first line fails
    assert_eq!(h.synthesizer.calls.load(Ordering::SeqCst), 3);
    let retried = result
        .history
        .iter()
        .filter(|r| r.stage == "text_to_speech" && r.outcome == StageOutcomeKind::Retried)
        .count();
    assert_eq!(retried, 2);

    assert_eq!(outcome_of(&result.history, "video_muxing"), &StageOutcomeKind::Succeeded);
    assert_eq!(*h.media.muxed_dubs.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn test_transient_failures_are_bounded() {
    let h = Harness::new();
    h.transcriber.transient_failures.store(u32::MAX, Ordering::SeqCst);
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");

    let result = h.workflow.run(&input, &output, Arc::new(h.config())).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 3);
    let error = result.error.unwrap();
    assert_eq!(error.stage, "speech_to_text");
    assert_eq!(error.kind, ErrorKind::Transient);
    assert!(error.retries_exhausted);
    assert!(result.output_path.is_none());
    assert!(!output.exists());

    // Nothing after the failed mandatory stage ran
    assert!(result.history.iter().all(|r| r.stage != "translation"));
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let h = Harness::new();
    h.transcriber.transient_failures.store(1, Ordering::SeqCst);
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");

    let result = h.workflow.run(&input, &output, Arc::new(h.config())).await;

    assert!(result.is_success());
    assert!(result.error.is_none());
    let records: Vec<_> = result.history.iter().filter(|r| r.stage == "speech_to_text").collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].outcome, StageOutcomeKind::Retried);
    assert_eq!(records[0].error.as_ref().unwrap().kind, ErrorKind::Transient);
    assert_eq!(records[1].outcome, StageOutcomeKind::Succeeded);
    assert_eq!(records[1].attempts, 2);
}

#[tokio::test]
async fn test_rerun_hits_cache_regardless_of_log_level() {
    let h = Harness::new();
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");

    let first = h.workflow.run(&input, &output, Arc::new(h.config())).await;
    assert!(first.is_success());

    let mut noisy = h.config();
    noisy.log_level = "debug".to_string();
    let second = h.workflow.run(&input, &output, Arc::new(noisy)).await;

    assert!(second.is_success());
    assert_eq!(second.output_path, first.output_path);
    for record in &second.history {
        match record.stage.as_str() {
            "term_processing" | "text_to_speech" => {
                assert_eq!(record.outcome, StageOutcomeKind::Skipped("disabled".to_string()))
            }
            _ => assert_eq!(record.outcome, StageOutcomeKind::CacheHit, "{}", record.stage),
        }
    }
    assert_eq!(h.media.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_changing_target_language_only_reruns_downstream() {
    let h = Harness::new();
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");

    assert!(h.workflow.run(&input, &output, Arc::new(h.config())).await.is_success());

    let mut japanese = h.config();
    japanese.languages.target = "ja".to_string();
    let state = h
        .workflow
        .execute(&input, &output, Arc::new(japanese), CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Succeeded);
    assert_eq!(outcome_of(state.stage_history(), "speech_to_text"), &StageOutcomeKind::CacheHit);
    assert_eq!(outcome_of(state.stage_history(), "translation"), &StageOutcomeKind::Succeeded);
    assert_eq!(outcome_of(state.stage_history(), "video_muxing"), &StageOutcomeKind::Succeeded);
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        state.translated_transcript.as_ref().unwrap().segments[0].text,
        "[ja] Hello there"
    );
    assert!(h.media.muxed_subtitles.lock().unwrap()[1].contains("[ja] Hello there"));

    // Back to Chinese: the earlier tracks are still intact and get muxed again
    let state = h
        .workflow
        .execute(&input, &output, Arc::new(h.config()), CancellationToken::new())
        .await;

    assert_eq!(state.status(), RunStatus::Succeeded);
    assert_eq!(outcome_of(state.stage_history(), "translation"), &StageOutcomeKind::CacheHit);
    assert_eq!(outcome_of(state.stage_history(), "subtitle_merge"), &StageOutcomeKind::CacheHit);
    assert_eq!(outcome_of(state.stage_history(), "video_muxing"), &StageOutcomeKind::Succeeded);

    let muxed = h.media.muxed_subtitles.lock().unwrap();
    assert_eq!(muxed.len(), 3);
    assert!(muxed[2].contains("你好"));
    assert!(!muxed[2].contains("[ja]"));
    assert_eq!(muxed[2], muxed[0]);
    assert!(std::fs::read_to_string(&output).unwrap().contains("你好"));
}

#[tokio::test]
async fn test_cancelled_run_fails_without_running_stages() {
    let h = Harness::new();
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = h
        .workflow
        .run_with_cancel(&input, &output, Arc::new(h.config()), cancel)
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert_eq!(error.stage, "audio_extraction");
    assert!(!error.retries_exhausted);
    assert_eq!(h.media.extract_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_checkpoint() {
    let h = Harness::new();
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");

    h.media.fail_mux.store(true, Ordering::SeqCst);
    let failed = h.workflow.run(&input, &output, Arc::new(h.config())).await;
    assert_eq!(failed.status, RunStatus::Failed);
    let error = failed.error.unwrap();
    assert_eq!(error.stage, "video_muxing");
    assert_eq!(error.kind, ErrorKind::Input);
    assert!(!error.retries_exhausted);

    h.media.fail_mux.store(false, Ordering::SeqCst);
    let resumed = h.workflow.run(&input, &output, Arc::new(h.config())).await;
    assert!(resumed.is_success());
    for stage in ["audio_extraction", "speech_to_text", "translation", "subtitle_merge"] {
        assert_eq!(outcome_of(&resumed.history, stage), &StageOutcomeKind::Resumed, "{}", stage);
    }
    assert_eq!(outcome_of(&resumed.history, "video_muxing"), &StageOutcomeKind::Succeeded);
    assert_eq!(h.transcriber.calls.load(Ordering::SeqCst), 1);

    // A finished run leaves no checkpoint behind
    let again = h.workflow.run(&input, &output, Arc::new(h.config())).await;
    assert_eq!(outcome_of(&again.history, "speech_to_text"), &StageOutcomeKind::CacheHit);
}

#[tokio::test]
async fn test_missing_input_fails_before_running() {
    let h = Harness::new();
    let input = h.path("nope.mp4");

    let result = h
        .workflow
        .run(&input, &h.path("nope_subtitled.mp4"), Arc::new(h.config()))
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.stage, "workflow");
    assert_eq!(error.kind, ErrorKind::Input);
    assert_eq!(result.history.len(), 1);
    assert_eq!(h.media.extract_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_output_must_differ_from_input() {
    let h = Harness::new();
    let input = h.video("talk.mp4");

    let result = h.workflow.run(&input, &input, Arc::new(h.config())).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Input);
}

#[tokio::test]
async fn test_events_follow_the_run() {
    let h = Harness::new();
    let input = h.video("talk.mp4");
    let output = h.path("talk_subtitled.mp4");
    let mut events = h.workflow.subscribe();

    let result = h.workflow.run(&input, &output, Arc::new(h.config())).await;
    assert!(result.is_success());

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(matches!(received.first(), Some(WorkflowEvent::RunStarted { run_id, .. }) if *run_id == result.run_id));
    assert!(matches!(
        received.last(),
        Some(WorkflowEvent::RunFinished { status: RunStatus::Succeeded, .. })
    ));
    let finished = received
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::StageFinished { .. }))
        .count();
    assert_eq!(finished, STAGE_ORDER.len());
}

#[tokio::test]
async fn test_describe_lists_stages_in_order() {
    let h = Harness::new();
    let mut config = h.config();
    config.features.enable_tts = true;

    let rows = h.workflow.describe(&config);
    let names: Vec<&str> = rows.iter().map(|r| r.name).collect();
    assert_eq!(names, STAGE_ORDER);
    assert!(!rows[3].enabled);
    assert!(rows[5].enabled);
    assert_eq!(rows[6].writes, "final_video_path");
}
