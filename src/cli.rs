use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::device::Device;
use crate::error::Result;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that override values from the configuration file
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct PipelineOverrides {
    /// Language spoken in the video
    #[arg(short, long)]
    pub source_lang: Option<String>,

    /// Language of the translated subtitles
    #[arg(short, long)]
    pub target_lang: Option<String>,

    /// Term dictionary (JSON or CSV); enables term processing
    #[arg(long)]
    pub terms: Option<PathBuf>,

    /// Disable term processing
    #[arg(long, conflicts_with = "terms")]
    pub no_terms: bool,

    /// Generate a dubbed audio track
    #[arg(long)]
    pub tts: bool,

    /// Processing device: auto, cpu, cuda, mps
    #[arg(long)]
    pub device: Option<String>,

    /// Maximum retries for recoverable stage failures
    #[arg(long)]
    pub retries: Option<u32>,

    /// Do not read or write the artifact cache
    #[arg(long)]
    pub no_cache: bool,
}

impl PipelineOverrides {
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(lang) = &self.source_lang {
            config.languages.source = lang.clone();
        }
        if let Some(lang) = &self.target_lang {
            config.languages.target = lang.clone();
        }
        if let Some(path) = &self.terms {
            config.features.term_dictionary_path = Some(path.clone());
            config.features.enable_term_processing = true;
        }
        if self.no_terms {
            config.features.enable_term_processing = false;
        }
        if self.tts {
            config.features.enable_tts = true;
        }
        if let Some(device) = &self.device {
            config.device = Device::parse(device)?;
        }
        if let Some(retries) = self.retries {
            config.retry.max_retries = retries;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        config.validate()
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add translated subtitles to a single video file
    Process {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output video file (default: <stem>_subtitled.<ext> next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        overrides: PipelineOverrides,
    },

    /// Process all video files in a directory
    Batch {
        /// Input directory containing video files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Output directory for processed files (default: the input directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Number of videos processed concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        #[command(flatten)]
        overrides: PipelineOverrides,
    },

    /// Manage the artifact cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the stages that would run for the current configuration
    Workflow {
        #[command(flatten)]
        overrides: PipelineOverrides,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// List cached artifacts
    List,

    /// Clear all cached artifacts and work files
    Clear,

    /// Show cache statistics and size
    Info,

    /// Clear cache entries older than specified days
    Clean {
        /// Age in days (default: 30)
        #[arg(short, long, default_value = "30")]
        days: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_overrides_apply() {
        let args = Args::try_parse_from([
            "subflow", "process", "-i", "talk.mp4", "--target-lang", "ja", "--tts", "--terms", "terms.csv",
            "--retries", "5", "--device", "cpu",
        ])
        .unwrap();

        let Commands::Process { input, output, overrides } = args.command else {
            panic!("expected process");
        };
        assert_eq!(input, PathBuf::from("talk.mp4"));
        assert!(output.is_none());

        let mut config = Config::default();
        overrides.apply(&mut config).unwrap();
        assert_eq!(config.languages.target, "ja");
        assert!(config.features.enable_tts);
        assert!(config.term_processing_active());
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.device, Device::Cpu);
    }

    #[test]
    fn test_invalid_device_is_rejected() {
        let overrides = PipelineOverrides {
            device: Some("tpu".to_string()),
            ..Default::default()
        };
        assert!(overrides.apply(&mut Config::default()).is_err());
    }

    #[test]
    fn test_batch_args() {
        let args = Args::try_parse_from(["subflow", "batch", "-i", "videos", "--recursive", "-w", "2"]).unwrap();
        let Commands::Batch { recursive, workers, .. } = args.command else {
            panic!("expected batch");
        };
        assert!(recursive);
        assert_eq!(workers, Some(2));
    }
}
