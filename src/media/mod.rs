// Media processing over an external ffmpeg binary:
// - Processor: the ffmpeg-backed implementation of the trait below
// - Commands: argument builders and failure classification

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::Path;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::{Result, StageError};

/// Audio extraction and muxing used by the media stages
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Extract a mono PCM track suitable for speech recognition
    async fn extract_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
    ) -> std::result::Result<(), StageError>;

    /// Soft-mux a subtitle file, optionally replacing the audio with a dub track
    async fn mux(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        dub_audio: Option<&Path>,
        output_path: &Path,
    ) -> std::result::Result<(), StageError>;

    /// Lay synthesized clips out on one track at their start times
    async fn assemble_dub_track(
        &self,
        clips: &[DubClip],
        output_path: &Path,
    ) -> std::result::Result<(), StageError>;

    async fn check_availability(&self) -> Result<()>;

    async fn version_info(&self) -> Result<String>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    pub fn create_processor(config: MediaConfig) -> Box<dyn MediaProcessor> {
        Box::new(processor::MediaProcessorImpl::new(config))
    }
}
