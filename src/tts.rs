use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::config::TtsConfig;
use crate::error::{Result, StageError, SubflowError};

/// Renders one line of text to an audio file
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str, output_path: &Path) -> std::result::Result<(), StageError>;

    async fn check_availability(&self) -> Result<()>;
}

/// Invokes an edge-tts compatible binary:
/// `<binary> <extra_args..> --voice <speaker> --text <text> --write-media <out>`
pub struct CommandSynthesizer {
    config: TtsConfig,
}

impl CommandSynthesizer {
    pub fn new(config: TtsConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, text: &str, output_path: &Path) -> Vec<String> {
        let mut args = self.config.extra_args.clone();
        args.extend([
            "--voice".to_string(),
            self.config.speaker.clone(),
            "--text".to_string(),
            text.to_string(),
            "--write-media".to_string(),
            output_path.to_string_lossy().to_string(),
        ]);
        args
    }
}

/// Map a failed synthesis to an error kind from the tool's stderr.
///
/// Argument and voice problems are input errors; anything unrecognized is
/// retried.
pub fn classify_failure(stderr: &str) -> StageError {
    let message = format!("TTS failed: {}", stderr.trim());
    let lower = stderr.to_lowercase();
    if lower.contains("no space left") {
        StageError::resource(message)
    } else if lower.contains("invalid voice")
        || lower.contains("no audio was received")
        || lower.contains("usage:")
        || lower.contains("error: argument")
        || lower.contains("unrecognized arguments")
        || lower.contains("arguments are required")
    {
        StageError::input(message)
    } else {
        StageError::transient(message)
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str, language: &str, output_path: &Path) -> std::result::Result<(), StageError> {
        debug!("Synthesizing {} line to {}", language, output_path.display());

        let output = Command::new(&self.config.binary_path)
            .args(self.build_args(text, output_path))
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StageError::resource(format!(
                    "TTS binary '{}' not found",
                    self.config.binary_path
                )),
                _ => StageError::from_io("Failed to execute TTS", &e),
            })?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        if !output_path.exists() {
            return Err(StageError::transient(format!(
                "TTS produced no audio at {}",
                output_path.display()
            )));
        }
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        Command::new(&self.config.binary_path)
            .arg("--help")
            .output()
            .await
            .map_err(|e| SubflowError::Config(format!("TTS binary not found: {}", e)))?;
        Ok(())
    }
}
