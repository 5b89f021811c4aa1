use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::StageError;
use crate::media::MediaProcessor;
use crate::stage::{FieldRead, Stage, required};
use crate::state::{Artifact, PipelineState, StateField};

const READS: &[FieldRead] = &[required(StateField::InputPath)];

pub struct AudioExtractionStage {
    media: Arc<dyn MediaProcessor>,
}

impl AudioExtractionStage {
    pub fn new(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl Stage for AudioExtractionStage {
    fn name(&self) -> &'static str {
        "audio_extraction"
    }

    fn reads(&self) -> &'static [FieldRead] {
        READS
    }

    fn writes(&self) -> StateField {
        StateField::AudioPath
    }

    fn config_fingerprint(&self, config: &Config) -> Value {
        json!({
            "sample_rate": config.media.audio_sample_rate,
            "channels": config.media.audio_channels,
        })
    }

    async fn execute(&self, state: &PipelineState) -> Result<Artifact, StageError> {
        let input = state.input_path();
        if !input.is_file() {
            return Err(StageError::input(format!("Input video not found: {}", input.display())));
        }

        let audio_path = state.stage_dir().join("audio.wav");
        self.media.extract_audio(input, &audio_path).await?;

        info!("Extracted audio to {}", audio_path.display());
        Ok(Artifact::AudioPath(audio_path))
    }
}
