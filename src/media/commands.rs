use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::StageError;

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Set audio sample rate
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    /// Set audio channels
    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Map an input stream into the output
    pub fn map<S: Into<String>>(self, stream: S) -> Self {
        self.arg("-map").arg(stream)
    }

    /// Execute the command, classifying failures for the retry policy
    pub async fn execute(&self) -> Result<(), StageError> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StageError::resource(format!(
                    "Media processor '{}' not found: {}",
                    self.binary_path, e
                )),
                _ => StageError::from_io("Failed to execute media processor", &e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&self.description, &stderr));
        }

        Ok(())
    }
}

/// ffmpeg reports most problems as a non-zero exit; the message tells them apart.
pub fn classify_failure(description: &str, stderr: &str) -> StageError {
    let message = format!("{} failed: {}", description, stderr.trim());
    let lower = stderr.to_lowercase();
    if lower.contains("no space left") || lower.contains("cannot allocate memory") {
        StageError::resource(message)
    } else if lower.contains("resource temporarily unavailable") || lower.contains("device or resource busy") {
        StageError::transient(message)
    } else {
        StageError::input(message)
    }
}

/// A synthesized clip placed on the dub timeline
#[derive(Debug, Clone, PartialEq)]
pub struct DubClip {
    pub path: std::path::PathBuf,
    pub start: f64,
}

/// Builder for common media processing operations
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build audio extraction command
    pub fn extract_audio<P: AsRef<Path>>(
        &self,
        video_path: P,
        audio_path: P,
        sample_rate: u32,
        channels: u32,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Audio extraction")
            .input(video_path)
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(sample_rate)
            .audio_channels(channels)
            .overwrite()
            .output(audio_path)
    }

    /// Build a soft-subtitle mux: streams are copied, the subtitle becomes a
    /// `mov_text` track. With a dub track, it replaces the original audio.
    pub fn mux_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        dub_audio: Option<&Path>,
        output_path: &Path,
        title: &str,
        additional_options: &[String],
    ) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.binary_path, "Subtitle muxing")
            .overwrite()
            .input(video_path)
            .input(subtitle_path);

        cmd = match dub_audio {
            Some(audio) => cmd.input(audio).map("0:v").map("2:a").map("1:s"),
            None => cmd.map("0:v").map("0:a?").map("1:s"),
        };

        cmd = cmd
            .arg("-c:v").arg("copy")
            .arg("-c:a").arg(if dub_audio.is_some() { "aac" } else { "copy" })
            .arg("-c:s").arg("mov_text")
            .arg("-map_metadata").arg("-1")
            .arg("-metadata:s:s:0").arg(format!("title={}", title));

        // Add user-specified additional options
        for option in additional_options {
            cmd = cmd.arg(option);
        }

        cmd.output(output_path)
    }

    /// Build a dub track by delaying every clip to its start time and mixing.
    pub fn assemble_dub_track(&self, clips: &[DubClip], output_path: &Path) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.binary_path, "Dub track assembly").overwrite();
        for clip in clips {
            cmd = cmd.input(&clip.path);
        }

        let mut filter = String::new();
        for (index, clip) in clips.iter().enumerate() {
            let delay_ms = (clip.start * 1000.0).round() as u64;
            filter.push_str(&format!("[{}:a]adelay={}:all=1[d{}];", index, delay_ms, index));
        }
        for index in 0..clips.len() {
            filter.push_str(&format!("[d{}]", index));
        }
        filter.push_str(&format!("amix=inputs={}:normalize=0[out]", clips.len()));

        cmd.arg("-filter_complex")
            .arg(filter)
            .map("[out]")
            .output(output_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_extract_audio_args() {
        let cmd = MediaCommandBuilder::new("ffmpeg").extract_audio("in.mp4", "out.wav", 16000, 1);
        assert_eq!(
            cmd.args,
            vec!["-i", "in.mp4", "-vn", "-c:a", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y", "out.wav"]
        );
    }

    #[test]
    fn test_mux_without_dub_copies_audio() {
        let cmd = MediaCommandBuilder::new("ffmpeg").mux_subtitles(
            Path::new("in.mp4"),
            Path::new("subs.srt"),
            None,
            Path::new("out.mp4"),
            "Bilingual",
            &[],
        );
        assert!(cmd.args.windows(2).any(|w| w == ["-c:a", "copy"]));
        assert!(cmd.args.windows(2).any(|w| w == ["-c:s", "mov_text"]));
        assert_eq!(cmd.args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_mux_with_dub_maps_third_input() {
        let cmd = MediaCommandBuilder::new("ffmpeg").mux_subtitles(
            Path::new("in.mp4"),
            Path::new("subs.srt"),
            Some(Path::new("dub.wav")),
            Path::new("out.mp4"),
            "Bilingual",
            &[],
        );
        assert!(cmd.args.windows(2).any(|w| w == ["-map", "2:a"]));
    }

    #[test]
    fn test_dub_filter_graph() {
        let clips = vec![
            DubClip { path: PathBuf::from("a.wav"), start: 0.0 },
            DubClip { path: PathBuf::from("b.wav"), start: 1.5 },
        ];
        let cmd = MediaCommandBuilder::new("ffmpeg").assemble_dub_track(&clips, Path::new("dub.wav"));
        let filter = cmd.args.iter().skip_while(|a| *a != "-filter_complex").nth(1).unwrap();
        assert_eq!(
            filter,
            "[0:a]adelay=0:all=1[d0];[1:a]adelay=1500:all=1[d1];[d0][d1]amix=inputs=2:normalize=0[out]"
        );
    }

    #[test]
    fn test_failure_classification() {
        use crate::error::ErrorKind;
        assert_eq!(classify_failure("x", "No space left on device").kind, ErrorKind::Resource);
        assert_eq!(classify_failure("x", "Invalid data found when processing input").kind, ErrorKind::Input);
    }
}
