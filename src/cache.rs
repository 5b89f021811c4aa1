//! Content-addressed artifact cache.
//!
//! Keys are derived from the stage identity, the fingerprint of the state
//! fields the stage actually reads, and the fingerprint of the config subset
//! it depends on. Entries live in an in-process map and, when a directory is
//! configured, as one JSON file per key that persists across runs.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::error::{Result, StageError, SubflowError};
use crate::stage::Stage;
use crate::state::{Artifact, PipelineState, StateField};

const ARTIFACT_DIR: &str = "artifacts";
const WORK_DIR: &str = "work";

/// SHA-256 of the canonical JSON form of a value.
///
/// `serde_json` keeps object keys sorted, so equal values always hash equally.
pub fn fingerprint(value: &Value) -> String {
    let canonical = value.to_string();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Identity of a file for caching purposes: path, size and modification time.
pub fn file_fingerprint(path: &Path) -> Value {
    match std::fs::metadata(path) {
        Ok(metadata) => {
            let modified = metadata
                .modified()
                .ok()
                .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos().to_string());
            json!({
                "path": path.to_string_lossy(),
                "size": metadata.len(),
                "modified": modified,
            })
        }
        Err(_) => json!({
            "path": path.to_string_lossy(),
            "missing": true,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub stage: String,
    pub version: u32,
    pub inputs: String,
    pub config: String,
}

impl CacheKey {
    pub fn new(stage: impl Into<String>, version: u32, inputs: &Value, config: &Value) -> Self {
        Self {
            stage: stage.into(),
            version,
            inputs: fingerprint(inputs),
            config: fingerprint(config),
        }
    }

    /// Key for a stage invocation on the given state.
    pub fn for_stage(stage: &dyn Stage, state: &PipelineState) -> std::result::Result<Self, StageError> {
        let mut inputs = serde_json::Map::new();
        for read in stage.reads() {
            inputs.insert(read.field.as_str().to_string(), field_fingerprint(state, read.field)?);
        }
        Ok(Self::new(
            stage.name(),
            stage.version(),
            &Value::Object(inputs),
            &stage.config_fingerprint(&state.config),
        ))
    }

    /// File name stem of the entry.
    pub fn id(&self) -> String {
        let material = format!("{}\n{}\n{}\n{}", self.stage, self.version, self.inputs, self.config);
        format!("{:x}", Sha256::digest(material.as_bytes()))
    }
}

fn field_fingerprint(state: &PipelineState, field: StateField) -> std::result::Result<Value, StageError> {
    let value = match field {
        StateField::InputPath => file_fingerprint(state.input_path()),
        // The destination is identity only; its content is this run's product
        StateField::OutputPath => json!(state.output_path().to_string_lossy()),
        StateField::AudioPath => optional_file(state.audio_path.as_deref()),
        StateField::SynthesizedAudioPath => optional_file(state.synthesized_audio_path.as_deref()),
        StateField::FinalVideoPath => optional_file(state.final_video_path.as_deref()),
        StateField::Transcript => content_value(&state.transcript)?,
        StateField::TranslatedTranscript => content_value(&state.translated_transcript)?,
        StateField::ProcessedTranscript => content_value(&state.processed_transcript)?,
        StateField::SubtitleTracks => content_value(&state.subtitle_tracks)?,
    };
    Ok(value)
}

fn optional_file(path: Option<&Path>) -> Value {
    path.map(file_fingerprint).unwrap_or(Value::Null)
}

fn content_value<T: Serialize>(value: &T) -> std::result::Result<Value, StageError> {
    serde_json::to_value(value)
        .map_err(|e| StageError::logic(format!("Failed to fingerprint state field: {}", e)))
}

/// A stage output as kept in the cache, with the identity of every file it
/// references at the time it was stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub artifact: Artifact,
    files: Vec<Value>,
}

impl StoredArtifact {
    pub fn new(artifact: Artifact) -> Self {
        let files = artifact.referenced_files().into_iter().map(file_fingerprint).collect();
        Self { artifact, files }
    }

    /// The referenced files are still the ones that were stored. A file that
    /// was removed or rewritten since makes the entry unusable.
    pub fn is_current(&self) -> bool {
        let current: Vec<Value> = self
            .artifact
            .referenced_files()
            .into_iter()
            .map(file_fingerprint)
            .collect();
        current == self.files
    }
}

/// Async mutexes by cache id. An id's entry is dropped once nobody holds or
/// waits for it.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn acquire(&self, id: &str) -> KeyGuard<'_> {
        let lock = self.map().entry(id.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: self,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

/// Held while working on one cache id.
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        // Release before counting so the map holds the last reference
        self.guard.take();
        if map.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(&self.id);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// SHA-256 of `value`; a mismatch on load means the entry is unusable
    pub digest: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(key: CacheKey, value: Value) -> Self {
        Self {
            digest: fingerprint(&value),
            key,
            value,
            created_at: Utc::now(),
        }
    }

    fn is_valid_for(&self, key: &CacheKey) -> bool {
        self.key == *key && self.digest == fingerprint(&self.value)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntrySummary {
    pub stage: String,
    pub id: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct CacheInfo {
    pub total_entries: u64,
    pub total_size: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    pub stages: Vec<String>,
}

/// Artifact store shared by every pipeline of a batch.
///
/// Reads take a short synchronous read lock on the in-process map and never
/// wait on writers of other keys. Writes to the same key are serialized; the
/// on-disk file is replaced atomically by rename.
pub struct ArtifactCache {
    enabled: bool,
    root: Option<PathBuf>,
    memory: RwLock<HashMap<String, Arc<CacheEntry>>>,
    write_locks: KeyLocks,
    stage_locks: KeyLocks,
}

impl ArtifactCache {
    /// Cache that never hits and never stores.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            root: None,
            memory: RwLock::new(HashMap::new()),
            write_locks: KeyLocks::default(),
            stage_locks: KeyLocks::default(),
        }
    }

    /// Process-local cache, lost on exit.
    pub fn in_memory() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }

    pub fn on_disk<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(ARTIFACT_DIR))
            .map_err(|e| SubflowError::Cache(format!("Failed to create cache directory {}: {}", root.display(), e)))?;
        debug!("Artifact cache at {}", root.display());
        Ok(Self {
            enabled: true,
            root: Some(root),
            ..Self::disabled()
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        if config.enabled {
            Self::on_disk(&config.directory)
        } else {
            Ok(Self::disabled())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Directory for per-run work files, when the cache is persistent.
    pub fn work_root(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(WORK_DIR))
    }

    fn entry_path(&self, id: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(ARTIFACT_DIR).join(format!("{}.json", id)))
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        let id = key.id();

        let cached = self.memory.read().ok().and_then(|map| map.get(&id).cloned());
        if let Some(entry) = cached {
            if entry.is_valid_for(key) {
                debug!("Cache hit (memory): {} {}", key.stage, id);
                return Some(entry.value.clone());
            }
            warn!("Cache entry {} does not match its key, treating as miss", id);
            return None;
        }

        let path = self.entry_path(&id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => {
                debug!("Cache miss: {} {}", key.stage, id);
                return None;
            }
        };

        let entry = match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to parse cache entry {}: {}", path.display(), e);
                return None;
            }
        };

        if !entry.is_valid_for(key) {
            warn!("Cache entry {} does not match its key, treating as miss", id);
            return None;
        }

        debug!("Cache hit (disk): {} {}", key.stage, id);
        let value = entry.value.clone();
        if let Ok(mut map) = self.memory.write() {
            map.entry(id).or_insert_with(|| Arc::new(entry));
        }
        Some(value)
    }

    pub async fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Cached value for {} has an unexpected shape: {}", key.stage, e);
                None
            }
        }
    }

    pub async fn put(&self, key: &CacheKey, value: Value) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let id = key.id();
        let _guard = self.write_locks.acquire(&id).await;

        let entry = Arc::new(CacheEntry::new(key.clone(), value));

        if let Some(path) = self.entry_path(&id) {
            let content = serde_json::to_string_pretty(entry.as_ref())?;
            let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
            tokio::fs::write(&tmp, content)
                .await
                .map_err(|e| SubflowError::Cache(format!("Failed to write cache entry: {}", e)))?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(SubflowError::Cache(format!("Failed to store cache entry: {}", e)));
            }
        }

        if let Ok(mut map) = self.memory.write() {
            map.insert(id.clone(), entry);
        }
        debug!("Cached {} as {}", key.stage, id);
        Ok(())
    }

    pub async fn put_as<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        self.put(key, serde_json::to_value(value)?).await
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let id = key.id();
        let _guard = self.write_locks.acquire(&id).await;

        let in_memory = self
            .memory
            .write()
            .map(|mut map| map.remove(&id).is_some())
            .unwrap_or(false);

        let on_disk = match self.entry_path(&id) {
            Some(path) => tokio::fs::remove_file(path).await.is_ok(),
            None => false,
        };
        Ok(in_memory || on_disk)
    }

    /// Exclusive right to compute the entry for `key`. Pipelines that need
    /// the same entry queue here, and the later ones find it cached.
    pub async fn claim(&self, key: &CacheKey) -> KeyGuard<'_> {
        self.stage_locks.acquire(&key.id()).await
    }

    /// Every persisted entry, newest first.
    pub async fn list(&self) -> Result<Vec<CacheEntrySummary>> {
        let mut entries = Vec::new();
        let Some(root) = &self.root else {
            return Ok(entries);
        };

        if let Ok(mut dir_entries) = tokio::fs::read_dir(root.join(ARTIFACT_DIR)).await {
            while let Ok(Some(entry)) = dir_entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                if let Ok(content) = tokio::fs::read_to_string(&path).await {
                    if let Ok(cache_entry) = serde_json::from_str::<CacheEntry>(&content) {
                        entries.push(CacheEntrySummary {
                            id: cache_entry.key.id(),
                            stage: cache_entry.key.stage,
                            size,
                            created_at: cache_entry.created_at,
                        });
                    }
                }
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    pub async fn info(&self) -> Result<CacheInfo> {
        let entries = self.list().await?;
        let stages: BTreeSet<String> = entries.iter().map(|e| e.stage.clone()).collect();
        Ok(CacheInfo {
            total_entries: entries.len() as u64,
            total_size: entries.iter().map(|e| e.size).sum(),
            oldest_entry: entries.iter().map(|e| e.created_at).min(),
            newest_entry: entries.iter().map(|e| e.created_at).max(),
            stages: stages.into_iter().collect(),
        })
    }

    /// Remove every entry and all work directories.
    pub async fn clear(&self) -> Result<u64> {
        let count = self.remove_where(|_| true).await?;
        if let Some(work) = self.work_root() {
            if tokio::fs::try_exists(&work).await.unwrap_or(false) {
                tokio::fs::remove_dir_all(&work).await?;
            }
        }
        info!("Cleared {} cache entries", count);
        Ok(count)
    }

    /// Remove entries created more than `days` days ago.
    pub async fn clean_older_than(&self, days: u64) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);
        let count = self.remove_where(|entry| entry.created_at < cutoff).await?;
        info!("Removed {} cache entries older than {} days", count, days);
        Ok(count)
    }

    async fn remove_where<F>(&self, predicate: F) -> Result<u64>
    where
        F: Fn(&CacheEntrySummary) -> bool,
    {
        let mut removed = 0;
        for entry in self.list().await? {
            if !predicate(&entry) {
                continue;
            }
            if let Some(path) = self.entry_path(&entry.id) {
                if tokio::fs::remove_file(&path).await.is_ok() {
                    removed += 1;
                }
            }
            if let Ok(mut map) = self.memory.write() {
                map.remove(&entry.id);
            }
        }
        Ok(removed)
    }
}
