// The default pipeline stages, in the order the workflow runs them:
// audio -> transcribe -> translate -> terms -> merge -> tts -> mux

pub mod audio;
pub mod merge;
pub mod mux;
pub mod terms;
pub mod transcribe;
pub mod translate;
pub mod tts;

use std::sync::Arc;

pub use audio::AudioExtractionStage;
pub use merge::SubtitleMergeStage;
pub use mux::VideoMuxingStage;
pub use terms::{TermDictionary, TermProcessingStage};
pub use transcribe::SpeechToTextStage;
pub use translate::TranslationStage;
pub use tts::TextToSpeechStage;

use crate::config::Config;
use crate::device::Device;
use crate::error::Result;
use crate::media::{MediaProcessor, MediaProcessorFactory};
use crate::transcribe::{Transcriber, TranscriberFactory};
use crate::translate::{Translator, TranslatorFactory};
use crate::tts::{CommandSynthesizer, SpeechSynthesizer};

/// External tools the stages delegate to
#[derive(Clone)]
pub struct Collaborators {
    pub media: Arc<dyn MediaProcessor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl Collaborators {
    /// ffmpeg, whisper.cpp, Ollama and a command-line TTS, configured from `config`.
    /// `device` must already be resolved.
    pub fn from_config(config: &Config, device: Device) -> Result<Self> {
        Ok(Self {
            media: Arc::from(MediaProcessorFactory::create_processor(config.media.clone())),
            transcriber: Arc::from(TranscriberFactory::create_default(config.transcriber.clone(), device)),
            translator: Arc::from(TranslatorFactory::create_translator(config.translator.clone())?),
            synthesizer: Arc::new(CommandSynthesizer::new(config.tts.clone())),
        })
    }
}
