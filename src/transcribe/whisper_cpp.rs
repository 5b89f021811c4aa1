use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::TranscriberConfig;
use crate::device::Device;
use crate::error::{Result, StageError, SubflowError};
use super::{Transcriber, common::parse_whisper_cpp_json};

/// Runs the whisper.cpp command line binary and reads its JSON output
pub struct WhisperCppTranscriber {
    config: TranscriberConfig,
    device: Device,
}

impl WhisperCppTranscriber {
    pub fn new(config: TranscriberConfig, device: Device) -> Self {
        Self { config, device }
    }
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    async fn transcribe(&self, audio_path: &Path, language: &str) -> std::result::Result<crate::subtitle::Transcript, StageError> {
        info!("Transcribing {} ({}, {})", audio_path.display(), language, self.device);

        if !self.config.model_path.exists() {
            return Err(StageError::resource(format!(
                "Whisper model not found: {}",
                self.config.model_path.display()
            )));
        }

        let temp_dir = tempfile::tempdir()
            .map_err(|e| StageError::from_io("Failed to create temp dir", &e))?;
        let output_base = temp_dir.path().join("transcript");
        let output_path = temp_dir.path().join("transcript.json");

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-oj")
            .arg("-of").arg(&output_base)
            .arg("-m").arg(&self.config.model_path)
            .arg("-f").arg(audio_path)
            .arg("-l").arg(language);

        if self.config.temperature > 0.0 {
            cmd.arg("-tp").arg(format!("{:.2}", self.config.temperature));
        }
        if self.device == Device::Cpu {
            cmd.arg("-ng");
        }

        debug!("Executing whisper command: {:?}", cmd);

        let output = cmd.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StageError::resource(format!(
                "Whisper binary '{}' not found",
                self.config.binary_path
            )),
            _ => StageError::from_io("Failed to execute whisper", &e),
        })?;

        debug!("Whisper exit status: {}", output.status);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lower = stderr.to_lowercase();
            // Model loading races and GPU contention clear up on retry
            return Err(if lower.contains("failed to load model") || lower.contains("out of memory") {
                StageError::transient(format!("Whisper failed: {}", stderr.trim()))
            } else {
                StageError::input(format!("Whisper failed: {}", stderr.trim()))
            });
        }

        let json_content = tokio::fs::read_to_string(&output_path)
            .await
            .map_err(|e| StageError::from_io("Failed to read transcription", &e))?;

        parse_whisper_cpp_json(&json_content, language)
    }

    async fn check_availability(&self) -> Result<()> {
        let status = Command::new(&self.config.binary_path)
            .arg("--help")
            .output()
            .await
            .map_err(|e| SubflowError::Config(format!("Whisper binary not found: {}", e)))?;
        if !status.status.success() {
            return Err(SubflowError::Config("Whisper binary check failed".to_string()));
        }
        if !self.config.model_path.exists() {
            return Err(SubflowError::FileNotFound(self.config.model_path.display().to_string()));
        }
        Ok(())
    }
}
