// Machine translation behind a trait:
// - Common: Ollama request/response types, prompts and response cleanup
// - Ollama: the HTTP implementation

pub mod common;
pub mod ollama;

use async_trait::async_trait;

pub use common::*;
use crate::config::TranslatorConfig;
use crate::error::{Result, StageError};

/// Translates single subtitle lines
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// `context` carries the preceding source lines, empty for none
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
        context: &str,
    ) -> std::result::Result<String, StageError>;

    async fn check_availability(&self) -> Result<()>;
}

pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_translator(config: TranslatorConfig) -> Result<Box<dyn Translator>> {
        Ok(Box::new(ollama::OllamaTranslator::new(config)?))
    }
}
