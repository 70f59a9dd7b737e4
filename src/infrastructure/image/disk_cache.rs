//! Disk-based image store for persistence across sessions.
//!
//! Each entry is a pair of files named by its cache key: `<key>.img` holds
//! the encoded bytes and `<key>.meta` a JSON record with size, last access
//! and HTTP validators. Files are written to a `.tmp` sibling and renamed
//! into place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::domain::entities::{CacheEntry, CacheKey, HttpValidators};
use crate::domain::errors::CacheResult;

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

const DATA_EXT: &str = "img";
const META_EXT: &str = "meta";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    key: CacheKey,
    uri: String,
    size_bytes: u64,
    last_access: DateTime<Utc>,
    #[serde(default)]
    access_seq: u64,
    validators: Option<HttpValidators>,
}

#[derive(Default)]
struct DiskIndex {
    entries: HashMap<CacheKey, EntryMeta>,
    total_bytes: u64,
    next_seq: u64,
}

impl DiskIndex {
    fn bump(&mut self, meta: &mut EntryMeta) {
        meta.last_access = Utc::now();
        meta.access_seq = self.next_seq;
        self.next_seq += 1;
    }
}

/// Disk-based image store that persists raw encoded bytes.
///
/// All index mutations and file operations run under a single lock, so at
/// most one mutation is in flight at a time.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    index: Mutex<DiskIndex>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for DiskImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImageCache")
            .field("cache_dir", &self.cache_dir)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl DiskImageCache {
    /// Opens (or creates) a store in the specified directory, rebuilding the
    /// index from entry metadata and enforcing the budget.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created or read.
    pub async fn new(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir).await?;

        let index = Self::rebuild_index(&cache_dir).await?;
        debug!(
            dir = %cache_dir.display(),
            entries = index.entries.len(),
            total = index.total_bytes,
            "Opened disk image cache"
        );

        let cache = Self {
            cache_dir,
            max_size,
            index: Mutex::new(index),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };

        cache.evict().await;

        Ok(cache)
    }

    /// Opens a store in the default location (`<cache dir>/fastimage/images/`).
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created.
    pub async fn default_location() -> CacheResult<Self> {
        Self::new(default_cache_dir(), DEFAULT_MAX_CACHE_SIZE).await
    }

    async fn rebuild_index(cache_dir: &Path) -> CacheResult<DiskIndex> {
        let mut index = DiskIndex::default();
        let mut leftovers = Vec::new();

        let mut entries = fs::read_dir(cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if name.ends_with(TMP_SUFFIX) {
                leftovers.push(path);
                continue;
            }
            if path.extension().is_none_or(|ext| ext != META_EXT) {
                continue;
            }

            match Self::load_meta(&path).await {
                Some(meta) => {
                    index.total_bytes += meta.size_bytes;
                    index.next_seq = index.next_seq.max(meta.access_seq + 1);
                    index.entries.insert(meta.key.clone(), meta);
                }
                None => leftovers.push(path),
            }
        }

        // data files nobody indexes
        let mut entries = fs::read_dir(cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == DATA_EXT) {
                let indexed = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(CacheKey::parse)
                    .is_some_and(|key| index.entries.contains_key(&key));
                if !indexed {
                    leftovers.push(path);
                }
            }
        }

        for path in leftovers {
            trace!(path = %path.display(), "Removing orphaned cache file");
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove orphaned cache file");
            }
        }

        Ok(index)
    }

    /// Reads a `.meta` file and checks it against its data file.
    async fn load_meta(meta_path: &Path) -> Option<EntryMeta> {
        let raw = fs::read(meta_path).await.ok()?;
        let meta: EntryMeta = match serde_json::from_slice(&raw) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %meta_path.display(), error = %e, "Discarding unreadable cache metadata");
                return None;
            }
        };
        let data_path = meta_path.with_extension(DATA_EXT);
        let on_disk = fs::metadata(&data_path).await.ok()?.len();
        (on_disk == meta.size_bytes).then_some(meta)
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.{DATA_EXT}", key.as_str()))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.{META_EXT}", key.as_str()))
    }

    /// Gets an entry and refreshes its last access time.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry<Bytes>> {
        let mut index = self.index.lock().await;

        let Some(mut meta) = index.entries.get(key).cloned() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Disk cache miss");
            return None;
        };

        let bytes = match fs::read(self.data_path(key)).await {
            Ok(bytes) if bytes.len() as u64 == meta.size_bytes => Bytes::from(bytes),
            Ok(bytes) => {
                warn!(key = %key, expected = meta.size_bytes, actual = bytes.len(), "Disk entry size mismatch, dropping");
                self.remove_locked(&mut index, key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk entry unreadable, dropping");
                self.remove_locked(&mut index, key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        index.bump(&mut meta);
        if let Err(e) = self.write_meta(&meta).await {
            warn!(key = %key, error = %e, "Failed to persist access time");
        }
        index.entries.insert(key.clone(), meta.clone());

        self.hits.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, size = meta.size_bytes, "Disk cache hit");

        Some(CacheEntry {
            key: meta.key,
            payload: bytes,
            size_bytes: meta.size_bytes,
            last_access: meta.last_access,
            validators: meta.validators,
        })
    }

    /// Stores raw bytes under `key`, replacing any previous entry, then evicts
    /// least recently used entries until the budget holds.
    ///
    /// Entries larger than the whole budget are skipped.
    ///
    /// # Errors
    /// Returns error if the data or metadata file cannot be written.
    pub async fn put(
        &self,
        key: &CacheKey,
        uri: &str,
        bytes: &[u8],
        validators: Option<HttpValidators>,
    ) -> CacheResult<()> {
        let size = bytes.len() as u64;
        if size > self.max_size {
            debug!(key = %key, size, max_size = self.max_size, "Entry exceeds disk budget, not cached");
            return Ok(());
        }

        let mut index = self.index.lock().await;

        write_atomic(&self.data_path(key), bytes).await?;

        let mut meta = EntryMeta {
            key: key.clone(),
            uri: uri.to_string(),
            size_bytes: size,
            last_access: Utc::now(),
            access_seq: 0,
            validators,
        };
        index.bump(&mut meta);
        self.write_meta(&meta).await?;

        if let Some(previous) = index.entries.insert(key.clone(), meta) {
            index.total_bytes -= previous.size_bytes;
        }
        index.total_bytes += size;

        debug!(key = %key, size, total = index.total_bytes, "Stored image in disk cache");

        self.evict_locked(&mut index).await;
        Ok(())
    }

    /// Replaces the validators of an existing entry after a successful
    /// revalidation, refreshing its access time.
    ///
    /// # Errors
    /// Returns error if the metadata file cannot be written.
    pub async fn update_validators(
        &self,
        key: &CacheKey,
        validators: HttpValidators,
    ) -> CacheResult<bool> {
        let mut index = self.index.lock().await;
        let Some(mut meta) = index.entries.get(key).cloned() else {
            return Ok(false);
        };
        meta.validators = Some(validators);
        index.bump(&mut meta);
        self.write_meta(&meta).await?;
        index.entries.insert(key.clone(), meta);
        Ok(true)
    }

    /// Removes an entry.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let mut index = self.index.lock().await;
        self.remove_locked(&mut index, key).await
    }

    async fn remove_locked(&self, index: &mut DiskIndex, key: &CacheKey) -> bool {
        let Some(meta) = index.entries.remove(key) else {
            return false;
        };
        index.total_bytes -= meta.size_bytes;

        for path in [self.data_path(key), self.meta_path(key)] {
            if let Err(e) = fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(key = %key, path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
        debug!(key = %key, size = meta.size_bytes, "Evicted from disk cache");
        true
    }

    /// Evicts least recently used entries until the budget holds.
    /// Returns the number of entries removed.
    pub async fn evict(&self) -> usize {
        let mut index = self.index.lock().await;
        self.evict_locked(&mut index).await
    }

    async fn evict_locked(&self, index: &mut DiskIndex) -> usize {
        if index.total_bytes <= self.max_size {
            return 0;
        }

        debug!(
            current_size = index.total_bytes,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let mut by_age: Vec<(DateTime<Utc>, u64, CacheKey)> = index
            .entries
            .values()
            .map(|meta| (meta.last_access, meta.access_seq, meta.key.clone()))
            .collect();
        by_age.sort();

        let mut freed_count = 0usize;
        for (_, _, key) in by_age {
            if index.total_bytes <= self.max_size {
                break;
            }
            if self.remove_locked(index, &key).await {
                freed_count += 1;
            }
        }

        debug!(
            freed_count,
            total = index.total_bytes,
            "Disk cache cleanup complete"
        );
        freed_count
    }

    /// Clears the entire store.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn clear(&self) -> CacheResult<()> {
        let mut index = self.index.lock().await;

        let mut entries = fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let ours = path
                .extension()
                .is_some_and(|ext| ext == DATA_EXT || ext == META_EXT);
            if ours && fs::remove_file(&path).await.is_err() {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }

        index.entries.clear();
        index.total_bytes = 0;
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Checks if an entry exists without touching it.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().await.entries.contains_key(key)
    }

    /// Returns the current store size in bytes.
    pub async fn current_size(&self) -> u64 {
        self.index.lock().await.total_bytes
    }

    /// Returns the number of entries.
    pub async fn len(&self) -> usize {
        self.index.lock().await.entries.len()
    }

    /// Returns true if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the store directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns store statistics.
    pub async fn stats(&self) -> DiskStats {
        let index = self.index.lock().await;
        DiskStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: index.entries.len(),
            size_bytes: index.total_bytes,
            budget_bytes: self.max_size,
        }
    }

    async fn write_meta(&self, meta: &EntryMeta) -> CacheResult<()> {
        let raw = serde_json::to_vec(meta)?;
        write_atomic(&self.meta_path(&meta.key), &raw).await
    }
}

/// Statistics about the disk store.
#[derive(Debug, Clone)]
pub struct DiskStats {
    /// Number of lookups served.
    pub hits: u64,
    /// Number of lookups missed.
    pub misses: u64,
    /// Stored entries.
    pub entries: usize,
    /// Accounted bytes.
    pub size_bytes: u64,
    /// Configured budget.
    pub budget_bytes: u64,
}

impl std::fmt::Display for DiskStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Disk: {} files, {}/{} bytes ({} hits, {} misses)",
            self.entries, self.size_bytes, self.budget_bytes, self.hits, self.misses
        )
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "fastimage").map_or_else(
        || {
            std::env::temp_dir()
                .join("fastimage")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}
