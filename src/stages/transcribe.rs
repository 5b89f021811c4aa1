use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::StageError;
use crate::stage::{FieldRead, Stage, required};
use crate::state::{Artifact, PipelineState, StateField};
use crate::transcribe::Transcriber;

const READS: &[FieldRead] = &[required(StateField::AudioPath)];

pub struct SpeechToTextStage {
    transcriber: Arc<dyn Transcriber>,
}

impl SpeechToTextStage {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }
}

#[async_trait]
impl Stage for SpeechToTextStage {
    fn name(&self) -> &'static str {
        "speech_to_text"
    }

    fn reads(&self) -> &'static [FieldRead] {
        READS
    }

    fn writes(&self) -> StateField {
        StateField::Transcript
    }

    fn config_fingerprint(&self, config: &Config) -> Value {
        json!({
            "language": config.languages.source,
            "model": config.transcriber.model_path,
            "temperature": config.transcriber.temperature,
        })
    }

    async fn execute(&self, state: &PipelineState) -> Result<Artifact, StageError> {
        let audio_path = state
            .audio_path
            .as_deref()
            .ok_or_else(|| StageError::logic("speech_to_text ran without audio"))?;

        let transcript = self
            .transcriber
            .transcribe(audio_path, &state.config.languages.source)
            .await?;

        if transcript.is_empty() {
            return Err(StageError::input(format!(
                "No speech recognized in {}",
                state.input_path().display()
            )));
        }

        info!("Transcribed {} segments", transcript.segments.len());
        Ok(Artifact::Transcript(transcript))
    }
}
