//! TTL cache of deployment results with one JSON file per key
//!
//! The in-memory map is authoritative; disk files let entries survive
//! across runs. Disk trouble is logged and absorbed, never returned to the
//! deployment path.

use crate::config::{CacheConfig, ConfigManager};
use crate::deploy::types::{ChartSpec, DeployOptions, DeployResult};
use crate::error::{ChartpilotError, ChartpilotResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Which results are worth replaying
///
/// A fast successful deploy is taken to mean nothing actually changed,
/// so replaying it later is safe. Slow or failed results are never cached.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub max_cacheable_duration: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_cacheable_duration: Duration::from_secs(5),
        }
    }
}

impl CachePolicy {
    pub fn admits(&self, result: &DeployResult) -> bool {
        result.is_success() && result.duration <= self.max_cacheable_duration
    }
}

/// A cached deployment outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub chart: String,
    pub version: String,
    /// Hash of the chart values
    pub values_hash: String,
    /// Hash of the image prefix and tag base
    pub image_hash: String,
    pub result: DeployResult,
    pub timestamp: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    /// Valid while `now - timestamp <= ttl`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        // A timestamp in the future reads as zero age.
        let age = (now - self.timestamp).to_std().unwrap_or_default();
        age > Duration::from_secs(self.ttl_secs)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
    pub cache_dir: PathBuf,
    pub ttl_secs: u64,
}

/// Deployment result cache
pub struct DeploymentCache {
    dir: PathBuf,
    ttl: Duration,
    policy: CachePolicy,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl DeploymentCache {
    pub fn new(dir: PathBuf, ttl: Duration, policy: CachePolicy) -> Self {
        Self {
            dir,
            ttl,
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let dir = config.dir.clone().unwrap_or_else(ConfigManager::cache_dir);
        let policy = CachePolicy {
            max_cacheable_duration: config.max_cacheable_duration(),
        };
        Self::new(dir, config.ttl(), policy)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory and load unexpired entries from it
    ///
    /// Expired files are deleted; unreadable or malformed files are skipped.
    /// Returns the number of entries loaded.
    pub async fn initialize(&self) -> ChartpilotResult<usize> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| {
                ChartpilotError::io(format!("creating cache dir {}", self.dir.display()), e)
            })?;

        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| ChartpilotError::io("reading cache directory", e))?;

        let now = Utc::now();
        let mut loaded = HashMap::new();
        let mut purged = 0;

        while let Some(file) = dir
            .next_entry()
            .await
            .map_err(|e| ChartpilotError::io("reading cache entry", e))?
        {
            let path = file.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                continue;
            };

            let entry = match read_entry(&path).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed cache entry");
                    continue;
                }
            };

            if entry.is_expired_at(now) {
                remove_file_quietly(&path).await;
                purged += 1;
                continue;
            }
            loaded.insert(key, entry);
        }

        let count = loaded.len();
        self.entries.write().await.extend(loaded);

        info!(dir = %self.dir.display(), loaded = count, purged, "deployment cache initialized");
        Ok(count)
    }

    /// Fingerprint of a chart under a set of options
    ///
    /// SHA-256 over chart name, version, environment, image prefix and tag base.
    pub fn generate_key(chart: &ChartSpec, options: &DeployOptions) -> String {
        let material = [
            chart.name.as_str(),
            chart.version.as_str(),
            options.environment.as_str(),
            options.image_prefix.as_str(),
            options.tag_base.as_str(),
        ]
        .join("|");
        hex::encode(Sha256::digest(material.as_bytes()))
    }

    /// Look up an unexpired entry; an expired one is evicted on the way
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.clone()),
                Some(_) => {}
            }
        }

        // Disk changes happen under the write lock so a concurrent `set`
        // never has its fresh file unlinked.
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                remove_file_quietly(&self.entry_path(key)).await;
                debug!(key, "evicted expired cache entry");
            }
            Some(entry) => return Some(entry.clone()),
            None => {}
        }
        None
    }

    /// Store `result` if the policy admits it; returns whether it was stored
    pub async fn set(
        &self,
        key: &str,
        chart: &ChartSpec,
        options: &DeployOptions,
        result: &DeployResult,
    ) -> bool {
        if !self.policy.admits(result) {
            debug!(
                key,
                chart = %chart.name,
                status = %result.status,
                duration_ms = result.duration.as_millis() as u64,
                "result not cacheable"
            );
            return false;
        }

        let entry = CacheEntry {
            chart: chart.name.clone(),
            version: chart.version.clone(),
            values_hash: values_hash(options),
            image_hash: image_hash(options),
            result: result.clone(),
            timestamp: Utc::now(),
            ttl_secs: self.ttl.as_secs(),
        };

        let mut entries = self.entries.write().await;
        if let Err(e) = self.persist(key, &entry).await {
            warn!(key, error = %e, "failed to persist cache entry");
        }
        entries.insert(key.to_owned(), entry);
        drop(entries);
        debug!(key, chart = %chart.name, "cached deployment result");
        true
    }

    /// Evict every expired entry from memory and disk
    pub async fn clear_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
            remove_file_quietly(&self.entry_path(key)).await;
        }
        drop(entries);
        if !expired.is_empty() {
            info!(count = expired.len(), "cleared expired cache entries");
        }
        expired.len()
    }

    /// Drop every entry and delete the cache directory
    pub async fn clear(&self) -> ChartpilotResult<()> {
        let mut entries = self.entries.write().await;
        entries.clear();

        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ChartpilotError::io(
                    format!("removing cache dir {}", self.dir.display()),
                    e,
                ))
            }
        }
        info!(dir = %self.dir.display(), "deployment cache cleared");
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let expired = entries.values().filter(|e| e.is_expired_at(now)).count();

        CacheStats {
            total_entries: entries.len(),
            valid_entries: entries.len() - expired,
            expired_entries: expired,
            cache_dir: self.dir.clone(),
            ttl_secs: self.ttl.as_secs(),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn persist(&self, key: &str, entry: &CacheEntry) -> ChartpilotResult<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| ChartpilotError::CacheIo {
            path: self.dir.clone(),
            reason: e.to_string(),
        })?;

        let path = self.entry_path(key);
        let content = serde_json::to_string_pretty(entry)?;
        fs::write(&path, content)
            .await
            .map_err(|e| ChartpilotError::CacheIo {
                path,
                reason: e.to_string(),
            })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

async fn read_entry(path: &Path) -> ChartpilotResult<CacheEntry> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| ChartpilotError::io(format!("reading cache file {}", path.display()), e))?;
    Ok(serde_json::from_str(&content)?)
}

async fn remove_file_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove cache file"),
    }
}

/// First 16 hex chars of a SHA-256
fn short_hash(material: &str) -> String {
    let digest = Sha256::digest(material.as_bytes());
    hex::encode(&digest[..8])
}

fn values_hash(options: &DeployOptions) -> String {
    let material: String = options
        .values
        .iter()
        .map(|(k, v)| format!("{}={}\n", k, v))
        .collect();
    short_hash(&material)
}

fn image_hash(options: &DeployOptions) -> String {
    short_hash(&format!("{}|{}", options.image_prefix, options.tag_base))
}
