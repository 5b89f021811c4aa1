use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::StageError;
use crate::media::{DubClip, MediaProcessor};
use crate::stage::{FieldRead, Stage, optional, required};
use crate::state::{Artifact, PipelineState, StateField};
use crate::tts::SpeechSynthesizer;

const READS: &[FieldRead] = &[
    required(StateField::TranslatedTranscript),
    optional(StateField::ProcessedTranscript),
];

/// Voices the target-language lines and lays them out as one dub track
pub struct TextToSpeechStage {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    media: Arc<dyn MediaProcessor>,
}

impl TextToSpeechStage {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, media: Arc<dyn MediaProcessor>) -> Self {
        Self { synthesizer, media }
    }
}

#[async_trait]
impl Stage for TextToSpeechStage {
    fn name(&self) -> &'static str {
        "text_to_speech"
    }

    fn reads(&self) -> &'static [FieldRead] {
        READS
    }

    fn writes(&self) -> StateField {
        StateField::SynthesizedAudioPath
    }

    fn config_fingerprint(&self, config: &Config) -> Value {
        json!({
            "language": config.languages.target,
            "binary": config.tts.binary_path,
            "speaker": config.tts.speaker,
            "extra_args": config.tts.extra_args,
        })
    }

    async fn execute(&self, state: &PipelineState) -> Result<Artifact, StageError> {
        let transcript = state
            .target_transcript()
            .ok_or_else(|| StageError::logic("text_to_speech ran without a translation"))?;

        let clip_dir = state.stage_dir().join("tts");
        tokio::fs::create_dir_all(&clip_dir)
            .await
            .map_err(|e| StageError::from_io("Failed to create TTS directory", &e))?;

        let mut clips = Vec::new();
        for (index, segment) in transcript.segments.iter().enumerate() {
            if segment.text.trim().is_empty() {
                continue;
            }
            let clip_path = clip_dir.join(format!("{:04}.mp3", index + 1));
            self.synthesizer
                .synthesize(segment.text.trim(), &transcript.language, &clip_path)
                .await?;
            clips.push(DubClip {
                path: clip_path,
                start: segment.start,
            });
        }

        let dub_path = state.stage_dir().join("dub.wav");
        self.media.assemble_dub_track(&clips, &dub_path).await?;

        info!("Synthesized {} lines into {}", clips.len(), dub_path.display());
        Ok(Artifact::SynthesizedAudioPath(dub_path))
    }
}
