use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{Result, StageError, SubflowError};
use super::{DubClip, MediaCommand, MediaCommandBuilder, MediaProcessor};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    /// Create a new media processor implementation
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path);

        Self {
            config,
            command_builder,
        }
    }

    async fn ensure_parent(path: &Path) -> std::result::Result<(), StageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::from_io("Failed to create output directory", &e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaProcessor for MediaProcessorImpl {
    async fn extract_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
    ) -> std::result::Result<(), StageError> {
        info!("Extracting audio from {} to {}", video_path.display(), audio_path.display());

        if !video_path.exists() {
            return Err(StageError::input(format!("Video file not found: {}", video_path.display())));
        }
        Self::ensure_parent(audio_path).await?;

        let command = self.command_builder.extract_audio(
            video_path,
            audio_path,
            self.config.audio_sample_rate,
            self.config.audio_channels,
        );
        command.execute().await?;

        info!("Audio extraction completed");
        Ok(())
    }

    async fn mux(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        dub_audio: Option<&Path>,
        output_path: &Path,
    ) -> std::result::Result<(), StageError> {
        info!(
            "Muxing {} into {} -> {}",
            subtitle_path.display(),
            video_path.display(),
            output_path.display()
        );
        Self::ensure_parent(output_path).await?;

        let command = self.command_builder.mux_subtitles(
            video_path,
            subtitle_path,
            dub_audio,
            output_path,
            &self.config.subtitle_title,
            &self.config.mux_options,
        );
        command.execute().await?;

        info!("Muxing completed successfully");
        Ok(())
    }

    async fn assemble_dub_track(
        &self,
        clips: &[DubClip],
        output_path: &Path,
    ) -> std::result::Result<(), StageError> {
        if clips.is_empty() {
            return Err(StageError::input("No synthesized clips to assemble"));
        }
        info!("Assembling dub track from {} clips", clips.len());
        Self::ensure_parent(output_path).await?;

        self.command_builder
            .assemble_dub_track(clips, output_path)
            .execute()
            .await
    }

    async fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.config.binary_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| SubflowError::Config(format!("Media processor not found: {}", e)))?;

        if output.status.success() {
            info!("Media processor is available");
            Ok(())
        } else {
            Err(SubflowError::Config("Media processor version check failed".to_string()))
        }
    }

    async fn version_info(&self) -> Result<String> {
        debug!("Getting media processor version information");

        let command: MediaCommand = self.command_builder.version_check();
        let output = Command::new(&command.binary_path)
            .args(&command.args)
            .output()
            .await?;

        let version_info = String::from_utf8_lossy(&output.stdout);
        // The first line carries the version
        let first_line = version_info.lines().next().unwrap_or("Unknown version");
        Ok(first_line.to_string())
    }
}
