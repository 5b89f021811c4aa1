//! The execution engine.
//!
//! A [`Workflow`] walks an ordered list of [`StageNode`]s over one
//! [`PipelineState`]. Each node is gated by the config, checked for its
//! required inputs, looked up in the artifact cache, and otherwise executed
//! under the retry policy. A checkpoint of the state is kept in the cache
//! after every stage so an interrupted run can resume.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{ArtifactCache, CacheKey, StoredArtifact, file_fingerprint, fingerprint};
use crate::config::Config;
use crate::error::{ErrorKind, StageError};
use crate::retry::RetryPolicy;
use crate::stage::{Need, Stage, StageOutcome};
use crate::stages::{
    AudioExtractionStage, Collaborators, SpeechToTextStage, SubtitleMergeStage, TermProcessingStage,
    TextToSpeechStage, TranslationStage, VideoMuxingStage,
};
use crate::state::{Artifact, PipelineState, RunStatus, StageOutcomeKind, StageRecord, StateField};

const CHECKPOINT_STAGE: &str = "checkpoint";
const CHECKPOINT_VERSION: u32 = 1;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    /// Failure halts the run
    Mandatory,
    /// Failure leaves the stage's field unset and the run ends `Partial`
    Optional,
}

/// Decides from the config whether a stage runs at all.
pub type Gate = fn(&Config) -> bool;

#[derive(Clone)]
pub struct StageNode {
    pub stage: Arc<dyn Stage>,
    pub gate: Gate,
    /// Human readable gate condition for `describe`
    pub gate_label: &'static str,
    pub requirement: Requirement,
}

impl StageNode {
    pub fn mandatory(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            gate: |_| true,
            gate_label: "always",
            requirement: Requirement::Mandatory,
        }
    }

    pub fn optional(stage: Arc<dyn Stage>, gate: Gate, gate_label: &'static str) -> Self {
        Self {
            stage,
            gate,
            gate_label,
            requirement: Requirement::Optional,
        }
    }
}

/// The default graph in its fixed order.
pub fn default_nodes(collaborators: &Collaborators) -> Vec<StageNode> {
    vec![
        StageNode::mandatory(Arc::new(AudioExtractionStage::new(collaborators.media.clone()))),
        StageNode::mandatory(Arc::new(SpeechToTextStage::new(collaborators.transcriber.clone()))),
        StageNode::mandatory(Arc::new(TranslationStage::new(collaborators.translator.clone()))),
        StageNode::optional(
            Arc::new(TermProcessingStage),
            |config| config.term_processing_active(),
            "enable_term_processing and term_dictionary_path",
        ),
        StageNode::mandatory(Arc::new(SubtitleMergeStage)),
        StageNode::optional(
            Arc::new(TextToSpeechStage::new(
                collaborators.synthesizer.clone(),
                collaborators.media.clone(),
            )),
            |config| config.features.enable_tts,
            "enable_tts",
        ),
        StageNode::mandatory(Arc::new(VideoMuxingStage::new(collaborators.media.clone()))),
    ]
}

/// Progress notifications for front ends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted { run_id: Uuid, input: PathBuf },
    StageStarted { run_id: Uuid, stage: String },
    StageRetrying { run_id: Uuid, stage: String, attempt: u32 },
    StageFinished { run_id: Uuid, stage: String, outcome: StageOutcomeKind },
    RunFinished { run_id: Uuid, input: PathBuf, status: RunStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    pub stage: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    pub retries_exhausted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub input_path: PathBuf,
    pub status: RunStatus,
    pub output_path: Option<PathBuf>,
    pub error: Option<RunError>,
    pub history: Vec<StageRecord>,
}

impl RunResult {
    pub fn from_state(state: &PipelineState) -> Self {
        let error = state.last_failure().map(|record| {
            let (kind, message) = match &record.error {
                Some(err) => (err.kind, err.message.clone()),
                None => (ErrorKind::Logic, "unknown failure".to_string()),
            };
            RunError {
                stage: record.stage.clone(),
                kind,
                message,
                attempts: record.attempts,
                // A recoverable error only ends a stage once its attempts are used up
                retries_exhausted: kind.is_recoverable(),
            }
        });

        Self {
            run_id: state.run_id,
            input_path: state.input_path().to_path_buf(),
            status: state.status(),
            output_path: state.final_video_path.clone(),
            error,
            history: state.stage_history().to_vec(),
        }
    }

    /// A run that never produced a state, e.g. its task panicked.
    pub fn failed(input_path: impl Into<PathBuf>, stage: &str, error: StageError) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            input_path: input_path.into(),
            status: RunStatus::Failed,
            output_path: None,
            error: Some(RunError {
                stage: stage.to_string(),
                kind: error.kind,
                message: error.message.clone(),
                attempts: 1,
                retries_exhausted: false,
            }),
            history: vec![StageRecord::new(stage, StageOutcomeKind::Failed, 1).with_error(error)],
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// One row of the stage table.
#[derive(Debug, Clone, Serialize)]
pub struct StageDescription {
    pub position: usize,
    pub name: &'static str,
    pub requirement: Requirement,
    pub gate: &'static str,
    pub enabled: bool,
    pub reads: Vec<&'static str>,
    pub writes: &'static str,
}

pub struct Workflow {
    nodes: Vec<StageNode>,
    cache: Arc<ArtifactCache>,
    events: broadcast::Sender<WorkflowEvent>,
}

impl Workflow {
    pub fn new(nodes: Vec<StageNode>, cache: Arc<ArtifactCache>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { nodes, cache, events }
    }

    pub fn with_default_stages(collaborators: &Collaborators, cache: Arc<ArtifactCache>) -> Self {
        Self::new(default_nodes(collaborators), cache)
    }

    pub fn nodes(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WorkflowEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn describe(&self, config: &Config) -> Vec<StageDescription> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| StageDescription {
                position: index + 1,
                name: node.stage.name(),
                requirement: node.requirement,
                gate: node.gate_label,
                enabled: (node.gate)(config),
                reads: node.stage.reads().iter().map(|r| r.field.as_str()).collect(),
                writes: node.stage.writes().as_str(),
            })
            .collect()
    }

    pub async fn run(&self, input: &Path, output: &Path, config: Arc<Config>) -> RunResult {
        self.run_with_cancel(input, output, config, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        input: &Path,
        output: &Path,
        config: Arc<Config>,
        cancel: CancellationToken,
    ) -> RunResult {
        let state = self.execute(input, output, config, cancel).await;
        RunResult::from_state(&state)
    }

    /// Run the graph and hand back the final state.
    pub async fn execute(
        &self,
        input: &Path,
        output: &Path,
        config: Arc<Config>,
        cancel: CancellationToken,
    ) -> PipelineState {
        // Keeps a throwaway work dir alive for the duration of the run
        let mut _scratch = None;
        let work_dir = match self.cache.work_root() {
            Some(root) => root.join(&fingerprint(&file_fingerprint(input))[..16]),
            None => match tempfile::Builder::new().prefix("subflow-").tempdir() {
                Ok(dir) => {
                    let path = dir.path().to_path_buf();
                    _scratch = Some(dir);
                    path
                }
                Err(e) => {
                    let path = std::env::temp_dir().join(format!("subflow-{}", Uuid::new_v4()));
                    warn!("Failed to create temp work dir ({}), using {}", e, path.display());
                    path
                }
            },
        };

        let mut state = PipelineState::new(input, output, &work_dir, config.clone());

        if let Some(err) = self.preflight(input, output, &work_dir).await {
            error!("Refusing to process {}: {}", input.display(), err);
            state.record(StageRecord::new("workflow", StageOutcomeKind::Failed, 1).with_error(err));
            self.finish(&mut state, RunStatus::Failed);
            return state;
        }

        let checkpoint_key = checkpoint_key(input, output, &config);
        let resumed = self.load_checkpoint(&checkpoint_key).await;

        self.advance(&mut state, RunStatus::Running);
        self.emit(WorkflowEvent::RunStarted {
            run_id: state.run_id,
            input: input.to_path_buf(),
        });
        info!("Processing {} -> {}", input.display(), output.display());

        let policy = RetryPolicy::from_config(&config.retry);
        let mut unavailable: HashSet<StateField> = HashSet::new();
        let mut failed = false;
        let mut partial = false;

        for node in &self.nodes {
            let stage = node.stage.as_ref();
            let name = stage.name();

            if cancel.is_cancelled() {
                warn!("Run cancelled before {}", name);
                self.finish_stage(
                    &mut state,
                    StageRecord::new(name, StageOutcomeKind::Cancelled, 0)
                        .with_error(StageError::new(ErrorKind::Cancelled, "Run cancelled")),
                );
                failed = true;
                break;
            }

            self.emit(WorkflowEvent::StageStarted {
                run_id: state.run_id,
                stage: name.to_string(),
            });

            if !(node.gate)(&config) {
                info!("Skipping {}: disabled", name);
                unavailable.insert(stage.writes());
                self.finish_stage(
                    &mut state,
                    StageRecord::new(name, StageOutcomeKind::Skipped("disabled".to_string()), 0),
                );
                continue;
            }

            let missing = stage
                .reads()
                .iter()
                .filter(|read| read.need == Need::Required)
                .find(|read| unavailable.contains(&read.field) || !state.has(read.field))
                .map(|read| read.field);

            if let Some(field) = missing {
                match node.requirement {
                    Requirement::Optional => {
                        info!("Skipping {}: {} unavailable", name, field);
                        unavailable.insert(stage.writes());
                        self.finish_stage(
                            &mut state,
                            StageRecord::new(name, StageOutcomeKind::Skipped("upstream unavailable".to_string()), 0),
                        );
                        continue;
                    }
                    Requirement::Mandatory => {
                        let err = StageError::logic(format!("{} requires {}, which is unavailable", name, field));
                        error!("{}", err);
                        self.finish_stage(&mut state, StageRecord::new(name, StageOutcomeKind::Failed, 0).with_error(err));
                        failed = true;
                        break;
                    }
                }
            }

            match self.run_stage(stage, &mut state, &policy, &resumed).await {
                Ok(()) => {
                    self.save_checkpoint(&checkpoint_key, &state).await;
                }
                Err(record) => {
                    self.finish_stage(&mut state, record);
                    match node.requirement {
                        Requirement::Mandatory => {
                            failed = true;
                            break;
                        }
                        Requirement::Optional => {
                            warn!("Optional stage {} failed, continuing without {}", name, stage.writes());
                            unavailable.insert(stage.writes());
                            partial = true;
                            self.save_checkpoint(&checkpoint_key, &state).await;
                        }
                    }
                }
            }
        }

        let status = if failed {
            RunStatus::Failed
        } else if partial {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };

        if status == RunStatus::Succeeded {
            if let Err(e) = self.cache.remove(&checkpoint_key).await {
                warn!("Failed to remove checkpoint: {}", e);
            }
        } else {
            self.save_checkpoint(&checkpoint_key, &state).await;
        }

        self.finish(&mut state, status);
        state
    }

    /// Cache lookup, then execution under the retry policy. On failure the
    /// returned record describes it; the caller decides what it means.
    async fn run_stage(
        &self,
        stage: &dyn Stage,
        state: &mut PipelineState,
        policy: &RetryPolicy,
        resumed: &HashSet<StateField>,
    ) -> Result<(), StageRecord> {
        let name = stage.name();
        let key = CacheKey::for_stage(stage, state)
            .map_err(|err| StageRecord::new(name, StageOutcomeKind::Failed, 0).with_error(err))?;

        // Another pipeline computing the same entry finishes first; we then hit its result
        let _claim = self.cache.claim(&key).await;

        let cached = self
            .cache
            .get_as::<StoredArtifact>(&key)
            .await
            .filter(|stored| stored.artifact.field() == stage.writes() && stored.is_current())
            .map(|stored| stored.artifact);

        if let Some(artifact) = cached {
            let outcome = if resumed.contains(&stage.writes()) {
                StageOutcomeKind::Resumed
            } else {
                StageOutcomeKind::CacheHit
            };
            info!("{}: {:?}", name, outcome);
            return self.merge(state, name, artifact, outcome, 0);
        }

        let stage_dir = state.work_dir().join(name).join(&key.id()[..16]);
        if let Err(e) = tokio::fs::create_dir_all(&stage_dir).await {
            let err = StageError::from_io("Failed to create stage directory", &e);
            return Err(StageRecord::new(name, StageOutcomeKind::Failed, 0).with_error(err));
        }
        state.enter_stage_dir(stage_dir);

        let run_id = state.run_id;
        let mut retries = Vec::new();
        let report = {
            let state: &PipelineState = state;
            policy
                .run(name, &mut retries, move |attempt| {
                    if attempt > 1 {
                        self.emit(WorkflowEvent::StageRetrying {
                            run_id,
                            stage: name.to_string(),
                            attempt,
                        });
                    }
                    info!("Running {} (attempt {})", name, attempt);
                    let pending = stage.execute(state);
                    async move { StageOutcome::from(pending.await) }
                })
                .await
        };
        for record in retries {
            state.record(record);
        }

        match report.result {
            Ok(artifact) => {
                if artifact.field() != stage.writes() {
                    let err = StageError::logic(format!(
                        "{} produced {} but declares {}",
                        name,
                        artifact.field(),
                        stage.writes()
                    ));
                    return Err(StageRecord::new(name, StageOutcomeKind::Failed, report.attempts).with_error(err));
                }
                if let Err(e) = self.cache.put_as(&key, &StoredArtifact::new(artifact.clone())).await {
                    warn!("Failed to cache {} output: {}", name, e);
                }
                self.merge(state, name, artifact, StageOutcomeKind::Succeeded, report.attempts)
            }
            Err(err) => Err(StageRecord::new(name, StageOutcomeKind::Failed, report.attempts).with_error(err)),
        }
    }

    fn merge(
        &self,
        state: &mut PipelineState,
        name: &str,
        artifact: Artifact,
        outcome: StageOutcomeKind,
        attempts: u32,
    ) -> Result<(), StageRecord> {
        match state.apply(artifact, false) {
            Ok(replaced) => {
                let mut record = StageRecord::new(name, outcome, attempts);
                record.superseded = replaced;
                self.finish_stage(state, record);
                Ok(())
            }
            Err(err) => Err(StageRecord::new(name, StageOutcomeKind::Failed, attempts).with_error(err)),
        }
    }

    fn finish_stage(&self, state: &mut PipelineState, record: StageRecord) {
        self.emit(WorkflowEvent::StageFinished {
            run_id: state.run_id,
            stage: record.stage.clone(),
            outcome: record.outcome.clone(),
        });
        state.record(record);
    }

    fn advance(&self, state: &mut PipelineState, status: RunStatus) {
        if let Err(e) = state.transition(status) {
            error!("{}", e);
        }
    }

    fn finish(&self, state: &mut PipelineState, status: RunStatus) {
        self.advance(state, status);
        match status {
            RunStatus::Succeeded => info!("Finished {}: {}", state.input_path().display(), status),
            _ => warn!("Finished {}: {}", state.input_path().display(), status),
        }
        self.emit(WorkflowEvent::RunFinished {
            run_id: state.run_id,
            input: state.input_path().to_path_buf(),
            status: state.status(),
        });
    }

    async fn preflight(&self, input: &Path, output: &Path, work_dir: &Path) -> Option<StageError> {
        if !input.is_file() {
            return Some(StageError::input(format!("Input file not found: {}", input.display())));
        }
        if input == output {
            return Some(StageError::input("Output path must differ from the input path"));
        }
        if let Err(e) = tokio::fs::create_dir_all(work_dir).await {
            return Some(StageError::from_io("Failed to create work directory", &e));
        }
        None
    }

    /// Fields a previous interrupted run already produced.
    async fn load_checkpoint(&self, key: &CacheKey) -> HashSet<StateField> {
        let Some(saved) = self.cache.get_as::<PipelineState>(key).await else {
            return HashSet::new();
        };

        let fields: HashSet<StateField> = [
            StateField::AudioPath,
            StateField::Transcript,
            StateField::TranslatedTranscript,
            StateField::ProcessedTranscript,
            StateField::SubtitleTracks,
            StateField::SynthesizedAudioPath,
            StateField::FinalVideoPath,
        ]
        .into_iter()
        .filter(|field| saved.has(*field))
        .collect();

        if !fields.is_empty() {
            info!(
                "Found checkpoint from run {} with {} completed stages; revalidating",
                saved.run_id,
                fields.len()
            );
        }
        fields
    }

    async fn save_checkpoint(&self, key: &CacheKey, state: &PipelineState) {
        if let Err(e) = self.cache.put_as(key, state).await {
            warn!("Failed to save checkpoint: {}", e);
        } else {
            debug!("Checkpoint saved after {} records", state.stage_history().len());
        }
    }
}

/// Checkpoint identity: the input file, the destination, and every config
/// value that can change a stage's output.
fn checkpoint_key(input: &Path, output: &Path, config: &Config) -> CacheKey {
    let inputs = json!({
        "input": file_fingerprint(input),
        "output": output.to_string_lossy(),
    });

    let mut config_value = serde_json::to_value(config).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut config_value {
        for unrelated in ["log_level", "batch", "device"] {
            map.remove(unrelated);
        }
    }

    CacheKey::new(CHECKPOINT_STAGE, CHECKPOINT_VERSION, &inputs, &config_value)
}
