//! Terminology correction of the translated transcript.
//!
//! A dictionary maps source-side terms to the wording the target track
//! should use. Matching is case-insensitive and prefers the longest term at
//! a position. Terms that begin or end with an ASCII word character only
//! match at a word boundary; other scripts (CJK in particular) have no
//! spaces between words, so no boundary is required there.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::cache::file_fingerprint;
use crate::config::Config;
use crate::error::StageError;
use crate::stage::{FieldRead, Stage, required};
use crate::state::{Artifact, PipelineState, StateField};
use crate::subtitle::{Segment, Transcript};

const READS: &[FieldRead] = &[required(StateField::TranslatedTranscript)];

#[derive(Debug, Clone)]
pub struct TermDictionary {
    /// Lowercased term -> replacement
    replacements: HashMap<String, String>,
    pattern: Option<Regex>,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl TermDictionary {
    pub fn new(entries: BTreeMap<String, String>) -> Result<Self, StageError> {
        let mut terms: Vec<&String> = entries.keys().filter(|t| !t.trim().is_empty()).collect();
        // Alternation is leftmost-first, so longer terms must come first
        terms.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));

        let pattern = if terms.is_empty() {
            None
        } else {
            let alternation = terms.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
            let regex = Regex::new(&format!("(?i)(?:{})", alternation))
                .map_err(|e| StageError::input(format!("Invalid term dictionary: {}", e)))?;
            Some(regex)
        };

        let replacements = entries
            .into_iter()
            .map(|(term, replacement)| (term.to_lowercase(), replacement))
            .collect();

        Ok(Self { replacements, pattern })
    }

    /// Load a JSON object or a two-column CSV file.
    pub async fn load(path: &Path) -> Result<Self, StageError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StageError::input(format!("Failed to read term dictionary {}: {}", path.display(), e)))?;

        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

        let dictionary = Self::parse(&content, is_csv)
            .map_err(|e| StageError::input(format!("Invalid term dictionary {}: {}", path.display(), e.message)))?;
        info!("Loaded {} terms from {}", dictionary.len(), path.display());
        Ok(dictionary)
    }

    /// Parse dictionary content already in memory.
    pub fn parse(content: &str, is_csv: bool) -> Result<Self, StageError> {
        let entries = if is_csv {
            Self::parse_csv(content)?
        } else {
            serde_json::from_str::<BTreeMap<String, String>>(content).map_err(|e| StageError::input(e.to_string()))?
        };
        Self::new(entries)
    }

    fn parse_csv(content: &str) -> Result<BTreeMap<String, String>, StageError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut entries = BTreeMap::new();
        for record in reader.records() {
            let record = record.map_err(|e| StageError::input(format!("Invalid term dictionary CSV: {}", e)))?;
            match (record.get(0), record.get(1)) {
                (Some(term), Some(replacement)) if !term.is_empty() && !term.starts_with('#') => {
                    entries.insert(term.to_string(), replacement.to_string());
                }
                _ => continue,
            }
        }
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.replacements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };

        let mut result = String::with_capacity(text.len());
        let mut last = 0;

        for found in pattern.find_iter(text) {
            let matched = found.as_str();
            let before = text[..found.start()].chars().next_back();
            let after = text[found.end()..].chars().next();

            let starts_word = matched.chars().next().is_some_and(is_word_char);
            let ends_word = matched.chars().next_back().is_some_and(is_word_char);
            if (starts_word && before.is_some_and(is_word_char)) || (ends_word && after.is_some_and(is_word_char)) {
                continue;
            }

            let Some(replacement) = self.replacements.get(&matched.to_lowercase()) else {
                continue;
            };
            result.push_str(&text[last..found.start()]);
            result.push_str(replacement);
            last = found.end();
        }

        result.push_str(&text[last..]);
        result
    }

    pub fn apply_transcript(&self, transcript: &Transcript) -> Transcript {
        let segments = transcript
            .segments
            .iter()
            .map(|segment| {
                let text = self.apply(&segment.text);
                if text != segment.text {
                    debug!("Term correction: {} -> {}", segment.text, text);
                }
                Segment::new(segment.start, segment.end, text)
            })
            .collect();
        Transcript::new(transcript.language.clone(), segments)
    }
}

pub struct TermProcessingStage;

#[async_trait]
impl Stage for TermProcessingStage {
    fn name(&self) -> &'static str {
        "term_processing"
    }

    fn reads(&self) -> &'static [FieldRead] {
        READS
    }

    fn writes(&self) -> StateField {
        StateField::ProcessedTranscript
    }

    fn config_fingerprint(&self, config: &Config) -> Value {
        // Editing the dictionary file must invalidate earlier results
        let dictionary = config
            .features
            .term_dictionary_path
            .as_deref()
            .map(file_fingerprint)
            .unwrap_or(Value::Null);
        json!({ "dictionary": dictionary })
    }

    async fn execute(&self, state: &PipelineState) -> Result<Artifact, StageError> {
        let translated = state
            .translated_transcript
            .as_ref()
            .ok_or_else(|| StageError::logic("term_processing ran without a translation"))?;
        let path = state
            .config
            .features
            .term_dictionary_path
            .as_deref()
            .ok_or_else(|| StageError::input("No term dictionary configured"))?;

        let dictionary = TermDictionary::load(path).await?;
        Ok(Artifact::ProcessedTranscript(dictionary.apply_transcript(translated)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary(pairs: &[(&str, &str)]) -> TermDictionary {
        TermDictionary::new(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()).unwrap()
    }

    #[test]
    fn test_replaces_inside_cjk_text() {
        let dict = dictionary(&[("LLM", "大语言模型")]);
        assert_eq!(dict.apply("这个LLM很强大"), "这个大语言模型很强大");
        assert_eq!(dict.apply("llm 和 LLM"), "大语言模型 和 大语言模型");
    }

    #[test]
    fn test_respects_ascii_word_boundaries() {
        let dict = dictionary(&[("AI", "人工智能")]);
        assert_eq!(dict.apply("AI and OpenAI"), "人工智能 and OpenAI");
        assert_eq!(dict.apply("MAIN"), "MAIN");
    }

    #[test]
    fn test_longest_term_wins() {
        let dict = dictionary(&[("model", "模型"), ("language model", "语言模型")]);
        assert_eq!(dict.apply("a language model"), "a 语言模型");
        assert_eq!(dict.apply("the model"), "the 模型");
    }

    #[test]
    fn test_empty_dictionary_is_identity() {
        let dict = dictionary(&[]);
        assert!(dict.is_empty());
        assert_eq!(dict.apply("unchanged"), "unchanged");
    }

    #[tokio::test]
    async fn test_load_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("terms.json");
        std::fs::write(&json_path, r#"{"LLM": "大语言模型", "GPU": "显卡"}"#).unwrap();
        assert_eq!(TermDictionary::load(&json_path).await.unwrap().len(), 2);

        let csv_path = dir.path().join("terms.csv");
        std::fs::write(&csv_path, "LLM, 大语言模型\n# comment,x\nGPU,显卡\n").unwrap();
        let dict = TermDictionary::load(&csv_path).await.unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.apply("GPU"), "显卡");
    }

    #[tokio::test]
    async fn test_missing_dictionary_is_input_error() {
        let err = TermDictionary::load(Path::new("/nonexistent/terms.json")).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Input);
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = TermDictionary::parse("[\"LLM\"]", false).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Input);
        assert_eq!(TermDictionary::parse(r#"{"LLM": "大语言模型"}"#, false).unwrap().len(), 1);
    }
}
