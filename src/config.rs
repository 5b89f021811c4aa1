use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::device::Device;
use crate::error::{Result, SubflowError};

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_subtitle_title() -> String {
    "Bilingual".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Processing device; resolved from `auto` before a run starts
    pub device: Device,
    /// Log level used when `--verbose` is not given
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub languages: LanguageConfig,
    pub features: FeatureConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub transcriber: TranscriberConfig,
    pub translator: TranslatorConfig,
    pub tts: TtsConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Spoken language of the source video
    pub source: String,
    /// Language subtitles are translated into
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Generate a dubbed audio track from the translated subtitles
    pub enable_tts: bool,
    /// Rewrite translated text using a terminology dictionary
    pub enable_term_processing: bool,
    /// Terminology dictionary (.json object or two-column .csv)
    pub term_dictionary_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry
    Fixed,
    /// Delay doubles on every retry, capped by `max_delay_ms`
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt for recoverable failures
    pub max_retries: u32,
    /// Base delay between attempts in milliseconds
    pub delay_ms: u64,
    pub backoff: BackoffKind,
    /// Upper bound for a single exponential delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Directory holding cached artifacts, checkpoints and work directories
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of pipelines running at once
    pub workers: usize,
    /// Re-run items that failed with a resource error once after the first pass
    pub defer_resource_failures: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to whisper.cpp binary (e.g., whisper-cli)
    pub binary_path: String,
    /// Path to the ggml model file
    pub model_path: PathBuf,
    /// Decoding temperature
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Text-to-speech binary, invoked once per subtitle line
    pub binary_path: String,
    /// Voice or speaker identifier passed to the binary
    pub speaker: String,
    /// Extra arguments inserted before the text and output arguments
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Sample rate of the extracted audio
    pub audio_sample_rate: u32,
    /// Channel count of the extracted audio
    pub audio_channels: u32,
    /// Title tag of the muxed subtitle stream
    #[serde(default = "default_subtitle_title")]
    pub subtitle_title: String,
    /// Additional options appended to the mux command
    pub mux_options: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: Device::Auto,
            log_level: default_log_level(),
            languages: LanguageConfig {
                source: "en".to_string(),
                target: "zh".to_string(),
            },
            features: FeatureConfig {
                enable_tts: false,
                enable_term_processing: true,
                term_dictionary_path: None,
            },
            retry: RetryConfig {
                max_retries: 3,
                delay_ms: 1000,
                backoff: BackoffKind::Fixed,
                max_delay_ms: default_max_delay_ms(),
            },
            cache: CacheConfig {
                enabled: true,
                directory: PathBuf::from(".subflow/cache"),
            },
            batch: BatchConfig {
                workers: 1,
                defer_resource_failures: true,
            },
            transcriber: TranscriberConfig {
                binary_path: "whisper-cli".to_string(),
                model_path: PathBuf::from(".subflow/models/ggml-base.bin"),
                temperature: 0.0,
            },
            translator: TranslatorConfig {
                endpoint: "http://localhost:11434".to_string(),
                model: "llama3.2:3b".to_string(),
                timeout_secs: 300,
            },
            tts: TtsConfig {
                binary_path: "edge-tts".to_string(),
                speaker: "zh-CN-XiaoxiaoNeural".to_string(),
                extra_args: Vec::new(),
            },
            media: MediaConfig {
                binary_path: "ffmpeg".to_string(),
                audio_sample_rate: 16000,
                audio_channels: 1,
                subtitle_title: default_subtitle_title(),
                mux_options: Vec::new(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubflowError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| SubflowError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubflowError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubflowError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.workers == 0 {
            return Err(SubflowError::Config("batch.workers must be at least 1".to_string()));
        }
        if self.languages.source.trim().is_empty() || self.languages.target.trim().is_empty() {
            return Err(SubflowError::Config("languages.source and languages.target are required".to_string()));
        }
        if self.retry.backoff == BackoffKind::Exponential && self.retry.max_delay_ms < self.retry.delay_ms {
            return Err(SubflowError::Config("retry.max_delay_ms must not be below retry.delay_ms".to_string()));
        }
        Ok(())
    }

    /// Whether the terminology stage has everything it needs to run
    pub fn term_processing_active(&self) -> bool {
        self.features.enable_term_processing && self.features.term_dictionary_path.is_some()
    }
}
