use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::subtitle::{Segment, Transcript};

/// whisper.cpp `-oj` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    pub result: WhisperCppResult,
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

/// Segment bounds in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: i64,
    pub to: i64,
}

/// Converts a service-specific transcription format into a [`Transcript`]
pub trait TranscriptionMapper<T> {
    fn to_transcript(service_result: T, requested_language: &str) -> Result<Transcript, StageError>;
}

pub struct WhisperCppMapper;

impl TranscriptionMapper<WhisperCppOutput> for WhisperCppMapper {
    fn to_transcript(output: WhisperCppOutput, requested_language: &str) -> Result<Transcript, StageError> {
        let segments: Vec<Segment> = output
            .transcription
            .into_iter()
            .filter(|seg| !seg.text.trim().is_empty())
            .map(|seg| {
                Segment::new(
                    seg.offsets.from as f64 / 1000.0,
                    seg.offsets.to as f64 / 1000.0,
                    seg.text.trim(),
                )
            })
            .collect();

        // whisper.cpp reports "auto" style codes when detection is off
        let language = if output.result.language.is_empty() || output.result.language == "auto" {
            requested_language.to_string()
        } else {
            output.result.language
        };

        Ok(Transcript::new(language, segments))
    }
}

/// Parse whisper.cpp JSON text
pub fn parse_whisper_cpp_json(content: &str, requested_language: &str) -> Result<Transcript, StageError> {
    let output: WhisperCppOutput = serde_json::from_str(content)
        .map_err(|e| StageError::logic(format!("Failed to parse transcription JSON: {}", e)))?;
    WhisperCppMapper::to_transcript(output, requested_language)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "result": {"language": "en"},
        "transcription": [
            {"timestamps": {"from": "00:00:00,000", "to": "00:00:02,500"},
             "offsets": {"from": 0, "to": 2500}, "text": " Hello there."},
            {"offsets": {"from": 2500, "to": 2600}, "text": "   "},
            {"offsets": {"from": 2600, "to": 4000}, "text": " General Kenobi."}
        ]
    }"#;

    #[test]
    fn test_parse_whisper_cpp_output() {
        let transcript = parse_whisper_cpp_json(SAMPLE, "en").unwrap();
        assert_eq!(transcript.language, "en");
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[0].text, "Hello there.");
        assert_eq!(transcript.segments[1].start, 2.6);
        assert_eq!(transcript.segments[1].end, 4.0);
    }

    #[test]
    fn test_malformed_json_is_logic_error() {
        let err = parse_whisper_cpp_json("{not json", "en").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Logic);
    }
}
