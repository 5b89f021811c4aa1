use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{Result, StageError, SubflowError};

/// A timed piece of text, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Recognized or translated text with timing, as produced by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub language: String,
    pub segments: Vec<Segment>,
}

impl Transcript {
    pub fn new(language: impl Into<String>, segments: Vec<Segment>) -> Self {
        Self {
            language: language.into(),
            segments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }

    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A subtitle track whose segments are ordered and do not overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub language: String,
    segments: Vec<Segment>,
}

impl SubtitleTrack {
    /// Build a track, clamping an overlapping end to the next start.
    ///
    /// Starts going backwards or an end before its own start is a logic error.
    pub fn new(language: impl Into<String>, segments: Vec<Segment>) -> std::result::Result<Self, StageError> {
        let language = language.into();
        let mut normalized: Vec<Segment> = Vec::with_capacity(segments.len());

        for (index, segment) in segments.into_iter().enumerate() {
            if !segment.start.is_finite() || !segment.end.is_finite() || segment.start < 0.0 {
                return Err(StageError::logic(format!(
                    "Segment {} of {} track has invalid timing {}..{}",
                    index + 1, language, segment.start, segment.end
                )));
            }
            if segment.end < segment.start {
                return Err(StageError::logic(format!(
                    "Segment {} of {} track ends before it starts ({} < {})",
                    index + 1, language, segment.end, segment.start
                )));
            }
            if let Some(previous) = normalized.last_mut() {
                if segment.start < previous.start {
                    return Err(StageError::logic(format!(
                        "Segment {} of {} track starts before its predecessor ({} < {})",
                        index + 1, language, segment.start, previous.start
                    )));
                }
                if previous.end > segment.start {
                    previous.end = segment.start;
                }
            }
            normalized.push(segment);
        }

        Ok(Self {
            language,
            segments: normalized,
        })
    }

    pub fn from_transcript(transcript: &Transcript) -> std::result::Result<Self, StageError> {
        Self::new(transcript.language.clone(), transcript.segments.clone())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Check ordering without normalizing.
    pub fn is_well_formed(&self) -> bool {
        self.segments.windows(2).all(|pair| {
            pair[0].start <= pair[1].start && pair[0].end <= pair[1].start
        }) && self.segments.iter().all(|s| s.start <= s.end)
    }
}

/// A rendered track and the SRT file it was written to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFile {
    pub track: SubtitleTrack,
    pub path: PathBuf,
}

/// Every subtitle track of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSet {
    pub source: TrackFile,
    pub target: Option<TrackFile>,
    /// Bilingual track, or the source track alone when no target exists
    pub merged: TrackFile,
}

impl SubtitleSet {
    pub fn is_bilingual(&self) -> bool {
        self.target.is_some()
    }

    pub fn files(&self) -> Vec<&Path> {
        let mut files = vec![self.source.path.as_path()];
        if let Some(target) = &self.target {
            files.push(target.path.as_path());
        }
        files.push(self.merged.path.as_path());
        files
    }
}

/// Pair source and target lines by position, keeping source timing.
pub fn merge_bilingual(source: &SubtitleTrack, target: &SubtitleTrack) -> std::result::Result<SubtitleTrack, StageError> {
    if source.len() != target.len() {
        warn!(
            "Subtitle line count mismatch: {} {} lines vs {} {} lines",
            source.language, source.len(), target.language, target.len()
        );
    }

    let segments = source
        .segments()
        .iter()
        .enumerate()
        .map(|(index, src)| {
            let text = match target.segments().get(index) {
                Some(tgt) if !tgt.text.trim().is_empty() => {
                    format!("{}\n{}", src.text.trim(), tgt.text.trim())
                }
                _ => src.text.trim().to_string(),
            };
            Segment::new(src.start, src.end, text)
        })
        .collect();

    SubtitleTrack::new(format!("{}+{}", source.language, target.language), segments)
}

/// Render a track as SRT text
pub fn render_srt(track: &SubtitleTrack) -> String {
    let mut srt_content = String::new();

    for (index, segment) in track.segments().iter().enumerate() {
        let start_time = format_srt_time(segment.start);
        let end_time = format_srt_time(segment.end);

        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            start_time,
            end_time,
            segment.text.trim()
        ));
    }

    srt_content
}

/// Generate SRT subtitle file from a track
pub async fn generate_srt<P: AsRef<Path>>(track: &SubtitleTrack, output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating SRT file: {}", output_path.display());

    fs::write(output_path, render_srt(track)).await?;

    info!("SRT file generated successfully");
    Ok(())
}

/// Parse SRT text into segments
pub fn parse_srt(content: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let normalized = content.replace("\r\n", "\n");

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().map(str::trim_end).skip_while(|l| l.trim().is_empty());
        let Some(first) = lines.next() else {
            continue;
        };

        // The index line is optional in the wild
        let timing = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(line) => line,
                None => continue,
            }
        };

        let (start, end) = timing
            .split_once("-->")
            .ok_or_else(|| SubflowError::Config(format!("Invalid SRT timing line: {}", timing)))?;
        let start = parse_srt_time(start.trim())?;
        let end = parse_srt_time(end.trim())?;
        let text = lines.collect::<Vec<_>>().join("\n");

        segments.push(Segment::new(start, end, text));
    }

    Ok(segments)
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

fn parse_srt_time(value: &str) -> Result<f64> {
    let invalid = || SubflowError::Config(format!("Invalid SRT timestamp: {}", value));
    let (clock, millis) = value.split_once([',', '.']).ok_or_else(invalid)?;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let hours: u64 = parts[0].parse().map_err(|_| invalid())?;
    let minutes: u64 = parts[1].parse().map_err(|_| invalid())?;
    let secs: u64 = parts[2].parse().map_err(|_| invalid())?;
    let millis: u64 = millis.parse().map_err(|_| invalid())?;

    Ok((hours * 3600 + minutes * 60 + secs) as f64 + millis as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(65.123), "00:01:05,123");
        assert_eq!(format_srt_time(3661.500), "01:01:01,500");
    }

    #[test]
    fn test_overlap_is_clamped() {
        let track = SubtitleTrack::new(
            "en",
            vec![Segment::new(0.0, 2.5, "one"), Segment::new(2.0, 4.0, "two")],
        )
        .unwrap();
        assert_eq!(track.segments()[0].end, 2.0);
        assert!(track.is_well_formed());
    }

    #[test]
    fn test_backwards_start_is_logic_error() {
        let err = SubtitleTrack::new(
            "en",
            vec![Segment::new(3.0, 4.0, "late"), Segment::new(1.0, 2.0, "early")],
        )
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Logic);
    }

    #[test]
    fn test_merge_keeps_source_timing() {
        let en = SubtitleTrack::new("en", vec![Segment::new(0.0, 1.0, "Hello"), Segment::new(1.0, 2.0, "World")]).unwrap();
        let zh = SubtitleTrack::new("zh", vec![Segment::new(0.1, 0.9, "你好")]).unwrap();

        let merged = merge_bilingual(&en, &zh).unwrap();
        assert_eq!(merged.language, "en+zh");
        assert_eq!(merged.segments()[0].text, "Hello\n你好");
        assert_eq!(merged.segments()[0].start, 0.0);
        assert_eq!(merged.segments()[1].text, "World");
    }

    #[test]
    fn test_srt_parse_render() {
        let track = SubtitleTrack::new(
            "en",
            vec![Segment::new(0.0, 1.5, "Hello"), Segment::new(2.0, 3.25, "Two\nlines")],
        )
        .unwrap();
        let parsed = parse_srt(&render_srt(&track)).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].text, "Two\nlines");
        assert_eq!(parsed[1].end, 3.25);
    }
}
