use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::StageError;
use crate::media::MediaProcessor;
use crate::stage::{FieldRead, Stage, optional, required};
use crate::state::{Artifact, PipelineState, StateField};

const READS: &[FieldRead] = &[
    required(StateField::InputPath),
    required(StateField::OutputPath),
    required(StateField::SubtitleTracks),
    optional(StateField::SynthesizedAudioPath),
];

pub struct VideoMuxingStage {
    media: Arc<dyn MediaProcessor>,
}

impl VideoMuxingStage {
    pub fn new(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl Stage for VideoMuxingStage {
    fn name(&self) -> &'static str {
        "video_muxing"
    }

    fn reads(&self) -> &'static [FieldRead] {
        READS
    }

    fn writes(&self) -> StateField {
        StateField::FinalVideoPath
    }

    fn config_fingerprint(&self, config: &Config) -> Value {
        json!({
            "title": config.media.subtitle_title,
            "options": config.media.mux_options,
        })
    }

    async fn execute(&self, state: &PipelineState) -> Result<Artifact, StageError> {
        let tracks = state
            .subtitle_tracks
            .as_ref()
            .ok_or_else(|| StageError::logic("video_muxing ran without subtitles"))?;
        let output = state.output_path();

        // Absent dub track means subtitles only
        let dub = state.synthesized_audio_path.as_deref();
        self.media
            .mux(state.input_path(), &tracks.merged.path, dub, output)
            .await?;

        info!(
            "Wrote {}{}",
            output.display(),
            if dub.is_some() { " with dubbed audio" } else { "" }
        );
        Ok(Artifact::FinalVideoPath(output.to_path_buf()))
    }
}
