use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::StageError;
use crate::stage::{FieldRead, Stage, optional, required};
use crate::state::{Artifact, PipelineState, StateField};
use crate::subtitle::{SubtitleSet, SubtitleTrack, TrackFile, generate_srt, merge_bilingual};

const READS: &[FieldRead] = &[
    required(StateField::Transcript),
    optional(StateField::TranslatedTranscript),
    optional(StateField::ProcessedTranscript),
];

pub struct SubtitleMergeStage;

async fn write_track(track: SubtitleTrack, path: &Path) -> Result<TrackFile, StageError> {
    generate_srt(&track, path).await?;
    Ok(TrackFile {
        track,
        path: path.to_path_buf(),
    })
}

#[async_trait]
impl Stage for SubtitleMergeStage {
    fn name(&self) -> &'static str {
        "subtitle_merge"
    }

    fn reads(&self) -> &'static [FieldRead] {
        READS
    }

    fn writes(&self) -> StateField {
        StateField::SubtitleTracks
    }

    fn config_fingerprint(&self, config: &Config) -> Value {
        json!({
            "source": config.languages.source,
            "target": config.languages.target,
        })
    }

    async fn execute(&self, state: &PipelineState) -> Result<Artifact, StageError> {
        let transcript = state
            .transcript
            .as_ref()
            .ok_or_else(|| StageError::logic("subtitle_merge ran without a transcript"))?;
        let out_dir = state.stage_dir();

        let source_track = SubtitleTrack::from_transcript(transcript)?;
        let source = write_track(
            source_track.clone(),
            &out_dir.join(format!("subtitles.{}.srt", source_track.language)),
        )
        .await?;

        let set = match state.target_transcript() {
            Some(target_transcript) => {
                let target_track = SubtitleTrack::from_transcript(target_transcript)?;
                let merged_track = merge_bilingual(&source_track, &target_track)?;
                let target = write_track(
                    target_track,
                    &out_dir.join(format!("subtitles.{}.srt", target_transcript.language)),
                )
                .await?;
                let merged = write_track(merged_track, &out_dir.join("subtitles.merged.srt")).await?;
                SubtitleSet {
                    source,
                    target: Some(target),
                    merged,
                }
            }
            None => {
                warn!("No translation available, producing single-language subtitles");
                let merged = write_track(source_track, &out_dir.join("subtitles.merged.srt")).await?;
                SubtitleSet {
                    source,
                    target: None,
                    merged,
                }
            }
        };

        info!(
            "Built {} subtitles with {} lines",
            if set.is_bilingual() { "bilingual" } else { "single-language" },
            set.merged.track.len()
        );
        Ok(Artifact::SubtitleTracks(set))
    }
}
