#![allow(dead_code)]

use assert_fs::TempDir;
use assert_fs::prelude::*;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use subflow::cache::ArtifactCache;
use subflow::config::Config;
use subflow::device::Device;
use subflow::error::{Result, StageError};
use subflow::media::{DubClip, MediaProcessor};
use subflow::stages::Collaborators;
use subflow::subtitle::{Segment, Transcript};
use subflow::transcribe::Transcriber;
use subflow::translate::Translator;
use subflow::tts::SpeechSynthesizer;
use subflow::workflow::Workflow;

/// Writes placeholder files instead of calling ffmpeg.
///
/// Inputs whose name contains `broken` fail extraction with an input error;
/// names containing `tight` fail with a resource error while
/// `resource_failures` is above zero.
#[derive(Default)]
pub struct FakeMedia {
    pub extract_calls: AtomicU32,
    pub resource_failures: AtomicU32,
    pub fail_mux: AtomicBool,
    pub muxed_dubs: Mutex<Vec<Option<PathBuf>>>,
    /// Subtitle file content of every mux, in call order
    pub muxed_subtitles: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaProcessor for FakeMedia {
    async fn extract_audio(&self, video_path: &Path, audio_path: &Path) -> std::result::Result<(), StageError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let name = video_path.to_string_lossy();
        if name.contains("broken") {
            return Err(StageError::input("Unsupported codec"));
        }
        if name.contains("tight")
            && self
                .resource_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
        {
            return Err(StageError::resource("No space left on device"));
        }
        write_placeholder(audio_path, b"RIFF")
    }

    async fn mux(
        &self,
        _video_path: &Path,
        subtitle_path: &Path,
        dub_audio: Option<&Path>,
        output_path: &Path,
    ) -> std::result::Result<(), StageError> {
        if self.fail_mux.load(Ordering::SeqCst) {
            return Err(StageError::input("Muxer rejected the container"));
        }
        assert!(subtitle_path.exists(), "subtitles must be written before muxing");
        self.muxed_dubs.lock().unwrap().push(dub_audio.map(Path::to_path_buf));
        let subtitles = std::fs::read_to_string(subtitle_path).map_err(|e| StageError::from_io("read", &e))?;
        self.muxed_subtitles.lock().unwrap().push(subtitles.clone());
        // The output carries the subtitles, so muxing other tracks changes the file
        write_placeholder(output_path, format!("muxed\n{}", subtitles).as_bytes())
    }

    async fn assemble_dub_track(&self, clips: &[DubClip], output_path: &Path) -> std::result::Result<(), StageError> {
        if clips.is_empty() {
            return Err(StageError::input("No clips"));
        }
        write_placeholder(output_path, b"RIFF")
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }

    async fn version_info(&self) -> Result<String> {
        Ok("fake".to_string())
    }
}

fn write_placeholder(path: &Path, content: &[u8]) -> std::result::Result<(), StageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StageError::from_io("mkdir", &e))?;
    }
    std::fs::write(path, content).map_err(|e| StageError::from_io("write", &e))
}

/// Returns two fixed lines; fails transiently while `transient_failures` is above zero.
#[derive(Default)]
pub struct FakeTranscriber {
    pub calls: AtomicU32,
    pub transient_failures: AtomicU32,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio_path: &Path, language: &str) -> std::result::Result<Transcript, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(audio_path.exists());
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(StageError::transient("Model still loading"));
        }
        Ok(Transcript::new(
            language,
            vec![
                Segment::new(0.0, 2.0, "Hello there"),
                Segment::new(2.0, 4.5, "This LLM is powerful"),
            ],
        ))
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTranslator {
    pub calls: AtomicU32,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
        _context: &str,
    ) -> std::result::Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let translated = match (text, target_language) {
            ("Hello there", "zh") => "你好".to_string(),
            ("This LLM is powerful", "zh") => "这个LLM很强大".to_string(),
            _ => format!("[{}] {}", target_language, text),
        };
        Ok(translated)
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

/// A voice service that is never reachable.
#[derive(Default)]
pub struct FakeSynthesizer {
    pub calls: AtomicU32,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, _text: &str, _language: &str, _output_path: &Path) -> std::result::Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StageError::transient("Voice service unavailable"))
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub media: Arc<FakeMedia>,
    pub transcriber: Arc<FakeTranscriber>,
    pub translator: Arc<FakeTranslator>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub workflow: Arc<Workflow>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let media = Arc::new(FakeMedia::default());
        let transcriber = Arc::new(FakeTranscriber::default());
        let translator = Arc::new(FakeTranslator::default());
        let synthesizer = Arc::new(FakeSynthesizer::default());

        let collaborators = Collaborators {
            media: media.clone(),
            transcriber: transcriber.clone(),
            translator: translator.clone(),
            synthesizer: synthesizer.clone(),
        };
        let cache = Arc::new(ArtifactCache::on_disk(dir.path().join("cache")).unwrap());
        let workflow = Arc::new(Workflow::with_default_stages(&collaborators, cache));

        Self {
            dir,
            media,
            transcriber,
            translator,
            synthesizer,
            workflow,
        }
    }

    /// Fast retries, CPU, nothing optional enabled.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.device = Device::Cpu;
        config.cache.directory = self.dir.path().join("cache");
        config.retry.delay_ms = 0;
        config.retry.max_retries = 2;
        config.features.enable_term_processing = false;
        config.features.enable_tts = false;
        config
    }

    /// Create a fake video file and return its path.
    pub fn video(&self, name: &str) -> PathBuf {
        let child = self.dir.child(name);
        child.write_binary(b"\x00\x00\x00\x18ftypmp42").unwrap();
        child.path().to_path_buf()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
