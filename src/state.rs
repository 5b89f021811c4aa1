//! Per-run pipeline state.
//!
//! One [`PipelineState`] exists per input video. Stages only read it; the
//! engine merges the [`Artifact`] a stage returns through [`PipelineState::apply`],
//! which enforces that outputs are added once and never silently replaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ErrorKind, Result, StageError, SubflowError};
use crate::subtitle::{SubtitleSet, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// An optional stage failed but a usable output was produced
    Partial,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Partial)
    }

    fn can_become(self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            // A run can be refused before it starts (bad input path, cancelled early)
            (RunStatus::Pending, RunStatus::Failed) => true,
            (RunStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Partial => "PARTIAL",
        };
        f.write_str(name)
    }
}

/// State fields a stage may read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    InputPath,
    OutputPath,
    AudioPath,
    Transcript,
    TranslatedTranscript,
    ProcessedTranscript,
    SubtitleTracks,
    SynthesizedAudioPath,
    FinalVideoPath,
}

impl StateField {
    pub fn as_str(self) -> &'static str {
        match self {
            StateField::InputPath => "input_path",
            StateField::OutputPath => "output_path",
            StateField::AudioPath => "audio_path",
            StateField::Transcript => "transcript",
            StateField::TranslatedTranscript => "translated_transcript",
            StateField::ProcessedTranscript => "processed_transcript",
            StateField::SubtitleTracks => "subtitle_tracks",
            StateField::SynthesizedAudioPath => "synthesized_audio_path",
            StateField::FinalVideoPath => "final_video_path",
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one stage, merged into the state by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum Artifact {
    AudioPath(PathBuf),
    Transcript(Transcript),
    TranslatedTranscript(Transcript),
    ProcessedTranscript(Transcript),
    SubtitleTracks(SubtitleSet),
    SynthesizedAudioPath(PathBuf),
    FinalVideoPath(PathBuf),
}

impl Artifact {
    pub fn field(&self) -> StateField {
        match self {
            Artifact::AudioPath(_) => StateField::AudioPath,
            Artifact::Transcript(_) => StateField::Transcript,
            Artifact::TranslatedTranscript(_) => StateField::TranslatedTranscript,
            Artifact::ProcessedTranscript(_) => StateField::ProcessedTranscript,
            Artifact::SubtitleTracks(_) => StateField::SubtitleTracks,
            Artifact::SynthesizedAudioPath(_) => StateField::SynthesizedAudioPath,
            Artifact::FinalVideoPath(_) => StateField::FinalVideoPath,
        }
    }

    /// Files on disk the artifact points at. A cached artifact whose files
    /// changed since it was stored cannot be reused.
    pub fn referenced_files(&self) -> Vec<&Path> {
        match self {
            Artifact::AudioPath(path)
            | Artifact::SynthesizedAudioPath(path)
            | Artifact::FinalVideoPath(path) => vec![path.as_path()],
            Artifact::SubtitleTracks(set) => set.files(),
            Artifact::Transcript(_)
            | Artifact::TranslatedTranscript(_)
            | Artifact::ProcessedTranscript(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageOutcomeKind {
    Succeeded,
    CacheHit,
    /// Restored from a checkpoint after revalidating its cache key
    Resumed,
    Skipped(String),
    /// A recoverable attempt failed and another attempt follows
    Retried,
    Failed,
    Cancelled,
}

/// One line of the append-only stage history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub outcome: StageOutcomeKind,
    pub attempts: u32,
    pub error: Option<StageError>,
    /// Set when this record's output replaced an earlier value of the same field
    #[serde(default)]
    pub superseded: bool,
    pub at: DateTime<Utc>,
}

impl StageRecord {
    pub fn new(stage: impl Into<String>, outcome: StageOutcomeKind, attempts: u32) -> Self {
        Self {
            stage: stage.into(),
            outcome,
            attempts,
            error: None,
            superseded: false,
            at: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: StageError) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: Uuid,
    input_path: PathBuf,
    output_path: PathBuf,
    work_dir: PathBuf,
    /// Output directory of the stage currently executing
    #[serde(skip)]
    stage_dir: Option<PathBuf>,
    pub config: Arc<Config>,

    pub audio_path: Option<PathBuf>,
    pub transcript: Option<Transcript>,
    pub translated_transcript: Option<Transcript>,
    pub processed_transcript: Option<Transcript>,
    pub subtitle_tracks: Option<SubtitleSet>,
    pub synthesized_audio_path: Option<PathBuf>,
    pub final_video_path: Option<PathBuf>,

    stage_history: Vec<StageRecord>,
    status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            work_dir: work_dir.into(),
            stage_dir: None,
            config,
            audio_path: None,
            transcript: None,
            translated_transcript: None,
            processed_transcript: None,
            subtitle_tracks: None,
            synthesized_audio_path: None,
            final_video_path: None,
            stage_history: Vec::new(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Where the executing stage writes its files. The engine points this at
    /// a directory named after the stage's cache key, so outputs of different
    /// inputs or configs never share a path. Falls back to the work dir.
    pub fn stage_dir(&self) -> &Path {
        self.stage_dir.as_deref().unwrap_or(&self.work_dir)
    }

    pub fn enter_stage_dir(&mut self, dir: impl Into<PathBuf>) {
        self.stage_dir = Some(dir.into());
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stage_history(&self) -> &[StageRecord] {
        &self.stage_history
    }

    pub fn record(&mut self, record: StageRecord) {
        self.stage_history.push(record);
    }

    /// Move the status forward. Terminal states are final.
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(SubflowError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn has(&self, field: StateField) -> bool {
        match field {
            StateField::InputPath | StateField::OutputPath => true,
            StateField::AudioPath => self.audio_path.is_some(),
            StateField::Transcript => self.transcript.is_some(),
            StateField::TranslatedTranscript => self.translated_transcript.is_some(),
            StateField::ProcessedTranscript => self.processed_transcript.is_some(),
            StateField::SubtitleTracks => self.subtitle_tracks.is_some(),
            StateField::SynthesizedAudioPath => self.synthesized_audio_path.is_some(),
            StateField::FinalVideoPath => self.final_video_path.is_some(),
        }
    }

    /// Current value of a field as an artifact, if set.
    pub fn artifact(&self, field: StateField) -> Option<Artifact> {
        match field {
            StateField::InputPath | StateField::OutputPath => None,
            StateField::AudioPath => self.audio_path.clone().map(Artifact::AudioPath),
            StateField::Transcript => self.transcript.clone().map(Artifact::Transcript),
            StateField::TranslatedTranscript => {
                self.translated_transcript.clone().map(Artifact::TranslatedTranscript)
            }
            StateField::ProcessedTranscript => {
                self.processed_transcript.clone().map(Artifact::ProcessedTranscript)
            }
            StateField::SubtitleTracks => self.subtitle_tracks.clone().map(Artifact::SubtitleTracks),
            StateField::SynthesizedAudioPath => {
                self.synthesized_audio_path.clone().map(Artifact::SynthesizedAudioPath)
            }
            StateField::FinalVideoPath => self.final_video_path.clone().map(Artifact::FinalVideoPath),
        }
    }

    /// Merge a stage output.
    ///
    /// Writing identical content again is a no-op. Different content for a
    /// field that is already set is rejected unless `supersede` is given,
    /// in which case the caller must record the replacement in history.
    pub fn apply(&mut self, artifact: Artifact, supersede: bool) -> std::result::Result<bool, StageError> {
        let field = artifact.field();
        if let Some(existing) = self.artifact(field) {
            if existing == artifact {
                return Ok(false);
            }
            if !supersede {
                return Err(StageError::new(
                    ErrorKind::Logic,
                    format!("Refusing to overwrite {} with different content", field),
                ));
            }
        }

        let replaced = self.has(field);
        match artifact {
            Artifact::AudioPath(path) => self.audio_path = Some(path),
            Artifact::Transcript(t) => self.transcript = Some(t),
            Artifact::TranslatedTranscript(t) => self.translated_transcript = Some(t),
            Artifact::ProcessedTranscript(t) => self.processed_transcript = Some(t),
            Artifact::SubtitleTracks(set) => self.subtitle_tracks = Some(set),
            Artifact::SynthesizedAudioPath(path) => self.synthesized_audio_path = Some(path),
            Artifact::FinalVideoPath(path) => self.final_video_path = Some(path),
        }
        Ok(replaced)
    }

    /// Target-language text to show: terminology-corrected when available.
    pub fn target_transcript(&self) -> Option<&Transcript> {
        self.processed_transcript
            .as_ref()
            .or(self.translated_transcript.as_ref())
    }

    pub fn last_failure(&self) -> Option<&StageRecord> {
        self.stage_history
            .iter()
            .rev()
            .find(|r| matches!(r.outcome, StageOutcomeKind::Failed | StageOutcomeKind::Cancelled))
    }
}
