//! Bounded-concurrency processing of many inputs.
//!
//! Every input runs its own pipeline in a spawned task; a semaphore caps how
//! many run at once. A failing or panicking pipeline only affects its own
//! result. Results come back in input order.

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{ErrorKind, StageError};
use crate::state::RunStatus;
use crate::workflow::{RunResult, Workflow};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v"];

/// `<dir>/<stem>_subtitled.<ext>`, keeping the input's extension.
pub fn output_path_for(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let extension = input
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    output_dir.join(format!("{}_subtitled.{}", stem, extension))
}

/// Default output next to the input.
pub fn default_output_path(input: &Path) -> PathBuf {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    output_path_for(input, dir)
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Video files under `dir`, sorted by path. Outputs of earlier runs are left out.
pub fn discover_videos(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let walker = if recursive {
        WalkDir::new(dir)
    } else {
        WalkDir::new(dir).max_depth(1)
    };

    let mut videos: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_video_file(p))
        .filter(|p| {
            !p.file_stem()
                .is_some_and(|s| s.to_string_lossy().ends_with("_subtitled"))
        })
        .collect();
    videos.sort();
    videos
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[RunResult]) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.status {
                RunStatus::Succeeded => summary.succeeded += 1,
                RunStatus::Partial => summary.partial += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub results: Vec<RunResult>,
    pub summary: BatchSummary,
    pub elapsed: Duration,
}

pub struct BatchRunner {
    workflow: Arc<Workflow>,
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(workflow: Arc<Workflow>, config: Arc<Config>) -> Self {
        Self {
            workflow,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run_batch(&self, inputs: &[PathBuf], output_dir: &Path) -> BatchReport {
        let started = Instant::now();
        let jobs = assign_outputs(inputs, output_dir);
        info!(
            "Processing {} inputs with {} workers",
            jobs.len(),
            self.config.batch.workers.max(1)
        );

        let mut results = self.run_pass(&jobs).await;

        if self.config.batch.defer_resource_failures && !self.cancel.is_cancelled() {
            let deferred: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| {
                    r.status == RunStatus::Failed && r.error.as_ref().is_some_and(|e| e.kind == ErrorKind::Resource)
                })
                .map(|(index, _)| index)
                .collect();

            if !deferred.is_empty() {
                warn!("Retrying {} inputs that failed on resources", deferred.len());
                let retry_jobs: Vec<(PathBuf, PathBuf)> = deferred.iter().map(|&i| jobs[i].clone()).collect();
                let retried = self.run_pass(&retry_jobs).await;
                for (index, result) in deferred.into_iter().zip(retried) {
                    results[index] = result;
                }
            }
        }

        let summary = BatchSummary::from_results(&results);
        info!(
            "Batch finished: {} succeeded, {} partial, {} failed",
            summary.succeeded, summary.partial, summary.failed
        );

        BatchReport {
            results,
            summary,
            elapsed: started.elapsed(),
        }
    }

    async fn run_pass(&self, jobs: &[(PathBuf, PathBuf)]) -> Vec<RunResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.batch.workers.max(1)));
        let total = jobs.len();
        let mut handles = Vec::with_capacity(total);

        for (index, (input, output)) in jobs.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let workflow = self.workflow.clone();
            let config = self.config.clone();
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return RunResult::failed(&input, "workflow", StageError::logic("Worker pool closed"));
                    }
                };
                info!("Processing video {}/{}: {}", index + 1, total, input.display());
                workflow.run_with_cancel(&input, &output, config, cancel).await
            }));
        }

        let mut results = Vec::with_capacity(total);
        for (handle, (input, _)) in handles.into_iter().zip(jobs) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Pipeline for {} aborted: {}", input.display(), e);
                    RunResult::failed(input, "workflow", StageError::logic(format!("Pipeline task failed: {}", e)))
                }
            };
            results.push(result);
        }
        results
    }
}

/// Pair every input with an output path, suffixing names that would collide.
fn assign_outputs(inputs: &[PathBuf], output_dir: &Path) -> Vec<(PathBuf, PathBuf)> {
    let mut used = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let mut output = output_path_for(input, output_dir);
            let mut counter = 2;
            while !used.insert(output.clone()) {
                let stem = input.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
                let extension = input.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_else(|| "mp4".to_string());
                output = output_dir.join(format!("{}_{}_subtitled.{}", stem, counter, extension));
                counter += 1;
            }
            (input.clone(), output)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_naming() {
        assert_eq!(
            output_path_for(Path::new("/videos/talk.mkv"), Path::new("/out")),
            PathBuf::from("/out/talk_subtitled.mkv")
        );
        assert_eq!(
            default_output_path(Path::new("/videos/talk.mp4")),
            PathBuf::from("/videos/talk_subtitled.mp4")
        );
    }

    #[test]
    fn test_colliding_stems_get_distinct_outputs() {
        let inputs = vec![PathBuf::from("/a/x.mp4"), PathBuf::from("/b/x.mp4")];
        let jobs = assign_outputs(&inputs, Path::new("/out"));
        assert_eq!(jobs[0].1, PathBuf::from("/out/x_subtitled.mp4"));
        assert_eq!(jobs[1].1, PathBuf::from("/out/x_2_subtitled.mp4"));
    }

    #[test]
    fn test_discover_videos() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        for name in ["b.mp4", "a.MKV", "notes.txt", "a_subtitled.mp4", "nested/c.mov"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let flat = discover_videos(dir.path(), false);
        let names: Vec<_> = flat.iter().map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["a.MKV", "b.mp4"]);

        assert_eq!(discover_videos(dir.path(), true).len(), 3);
    }

    #[test]
    fn test_summary_counts() {
        let ok = RunResult {
            status: RunStatus::Succeeded,
            ..RunResult::failed("a.mp4", "workflow", StageError::logic("x"))
        };
        let partial = RunResult {
            status: RunStatus::Partial,
            ..ok.clone()
        };
        let failed = RunResult::failed("c.mp4", "workflow", StageError::input("bad"));
        let summary = BatchSummary::from_results(&[ok, partial, failed]);
        assert_eq!(
            summary,
            BatchSummary {
                total: 3,
                succeeded: 1,
                partial: 1,
                failed: 1
            }
        );
    }
}
