// Speech recognition behind a trait:
// - Common: service output formats and their mapping to `Transcript`
// - WhisperCpp: whisper.cpp command line implementation
//
// A new service needs its own output structs, a `TranscriptionMapper`
// impl and a variant in `TranscriberImplementation`.

pub mod common;
pub mod whisper_cpp;

use async_trait::async_trait;
use std::path::Path;

pub use common::*;
use crate::config::TranscriberConfig;
use crate::device::Device;
use crate::error::{Result, StageError};
use crate::subtitle::Transcript;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file spoken in `language`
    async fn transcribe(&self, audio_path: &Path, language: &str) -> std::result::Result<Transcript, StageError>;

    async fn check_availability(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum TranscriberImplementation {
    WhisperCpp,
}

pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_transcriber(
        implementation: TranscriberImplementation,
        config: TranscriberConfig,
        device: Device,
    ) -> Box<dyn Transcriber> {
        match implementation {
            TranscriberImplementation::WhisperCpp => {
                Box::new(whisper_cpp::WhisperCppTranscriber::new(config, device))
            }
        }
    }

    pub fn create_default(config: TranscriberConfig, device: Device) -> Box<dyn Transcriber> {
        Self::create_transcriber(TranscriberImplementation::WhisperCpp, config, device)
    }
}
