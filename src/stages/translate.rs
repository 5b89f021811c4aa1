use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::StageError;
use crate::stage::{FieldRead, Stage, required};
use crate::state::{Artifact, PipelineState, StateField};
use crate::subtitle::{Segment, Transcript};
use crate::translate::Translator;

const READS: &[FieldRead] = &[required(StateField::Transcript)];

/// Preceding source lines handed to the model as context
const CONTEXT_LINES: usize = 2;

pub struct TranslationStage {
    translator: Arc<dyn Translator>,
}

impl TranslationStage {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self { translator }
    }

    /// Translate every segment, keeping the source timing.
    pub async fn translate_transcript(
        &self,
        transcript: &Transcript,
        source_language: &str,
        target_language: &str,
    ) -> Result<Transcript, StageError> {
        let total = transcript.segments.len();
        let mut segments = Vec::with_capacity(total);

        for (idx, segment) in transcript.segments.iter().enumerate() {
            let context = transcript.segments[idx.saturating_sub(CONTEXT_LINES)..idx]
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let translation = self
                .translator
                .translate(&segment.text, source_language, target_language, &context)
                .await?;

            debug!("[{}/{}] {} -> {}", idx + 1, total, segment.text, translation);

            let text = if translation.trim().is_empty() {
                warn!("Empty translation for segment {}, keeping source text", idx + 1);
                segment.text.clone()
            } else {
                translation
            };
            segments.push(Segment::new(segment.start, segment.end, text));
        }

        Ok(Transcript::new(target_language, segments))
    }
}

#[async_trait]
impl Stage for TranslationStage {
    fn name(&self) -> &'static str {
        "translation"
    }

    fn reads(&self) -> &'static [FieldRead] {
        READS
    }

    fn writes(&self) -> StateField {
        StateField::TranslatedTranscript
    }

    fn config_fingerprint(&self, config: &Config) -> Value {
        json!({
            "source": config.languages.source,
            "target": config.languages.target,
            "model": config.translator.model,
        })
    }

    async fn execute(&self, state: &PipelineState) -> Result<Artifact, StageError> {
        let transcript = state
            .transcript
            .as_ref()
            .ok_or_else(|| StageError::logic("translation ran without a transcript"))?;

        let languages = &state.config.languages;
        info!("Translating {} segments {} -> {}", transcript.segments.len(), languages.source, languages.target);

        let translated = self
            .translate_transcript(transcript, &languages.source, &languages.target)
            .await?;
        Ok(Artifact::TranslatedTranscript(translated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::translate::MockTranslator;
    use mockall::predicate::*;

    fn transcript() -> Transcript {
        Transcript::new(
            "en",
            vec![
                Segment::new(0.0, 1.0, "Hello"),
                Segment::new(1.0, 2.0, "World"),
                Segment::new(2.0, 3.0, "Again"),
            ],
        )
    }

    #[tokio::test]
    async fn test_translates_each_segment_with_context() {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .with(eq("Hello"), eq("en"), eq("zh"), eq(""))
            .times(1)
            .returning(|_, _, _, _| Ok("你好".to_string()));
        translator
            .expect_translate()
            .with(eq("World"), always(), always(), eq("Hello"))
            .times(1)
            .returning(|_, _, _, _| Ok("世界".to_string()));
        translator
            .expect_translate()
            .with(eq("Again"), always(), always(), eq("Hello\nWorld"))
            .times(1)
            .returning(|_, _, _, _| Ok("   ".to_string()));

        let stage = TranslationStage::new(Arc::new(translator));
        let translated = stage.translate_transcript(&transcript(), "en", "zh").await.unwrap();

        assert_eq!(translated.language, "zh");
        let texts: Vec<_> = translated.segments.iter().map(|s| s.text.as_str()).collect();
        // Blank model output falls back to the source line
        assert_eq!(texts, vec!["你好", "世界", "Again"]);
        assert_eq!(translated.segments[1].start, 1.0);
    }

    #[tokio::test]
    async fn test_service_failure_propagates_kind() {
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .returning(|_, _, _, _| Err(StageError::transient("connection refused")));

        let stage = TranslationStage::new(Arc::new(translator));
        let err = stage.translate_transcript(&transcript(), "en", "zh").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
    }
}
