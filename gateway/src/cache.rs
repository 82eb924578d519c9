//! Content-addressed audio cache on the local filesystem.
//!
//! One file per entry, `<sha256 hex>.mp3`, directly under the cache
//! directory. The directory listing is the index: there is no metadata file
//! to keep in sync.

use std::fmt;
use std::fs::{self, File, FileTimes};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use tts_core::SynthesisRequest;

use crate::config::ServerConfig;
use crate::error::CacheError;

const ENTRY_EXTENSION: &str = "mp3";
const KEY_SEPARATOR: char = '|';

/// Eviction stops once the store is at or below this share of the maximum.
const EVICTION_TARGET_PERCENT: u64 = 80;

/// Hex SHA-256 of `text|voice|rate|pitch`.
///
/// The separator is not escaped, so `("a|b", "c", ..)` and `("a", "b|c", ..)`
/// share a key. Changing the scheme would orphan every existing cache file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(text: &str, voice: &str, rate: &str, pitch: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update([KEY_SEPARATOR as u8]);
        hasher.update(voice.as_bytes());
        hasher.update([KEY_SEPARATOR as u8]);
        hasher.update(rate.as_bytes());
        hasher.update([KEY_SEPARATOR as u8]);
        hasher.update(pitch.as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    pub fn for_request(req: &SynthesisRequest) -> Self {
        Self::derive(&req.text, &req.voice, &req.rate, &req.pitch)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry count and byte total of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub entries: u64,
    pub bytes: u64,
}

/// Result of a size check after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionOutcome {
    Disabled,
    WithinLimit { total_bytes: u64 },
    Evicted { removed: usize, total_bytes: u64 },
}

#[derive(Debug)]
struct EntryMeta {
    path: PathBuf,
    name: String,
    size: u64,
    accessed: SystemTime,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    max_bytes: u64,
    enabled: bool,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
            enabled: true,
        }
    }

    /// A store that never holds anything; every lookup misses.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            max_bytes: 0,
            enabled: false,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        if config.cache_enabled {
            Self::new(&config.cache_dir, config.cache_max_bytes())
        } else {
            Self::disabled()
        }
    }

    /// Create the cache directory if needed.
    pub fn init(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key, ENTRY_EXTENSION))
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.enabled && self.entry_path(key).is_file()
    }

    /// Read an entry. Empty files count as absent.
    ///
    /// A successful read bumps the entry's access time so eviction order
    /// does not depend on the mount's atime policy.
    pub fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        if !self.enabled {
            return Ok(None);
        }
        let path = self.entry_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| CacheError::io(&path, e))?;
        if bytes.is_empty() {
            return Ok(None);
        }

        if let Err(e) = file.set_times(FileTimes::new().set_accessed(SystemTime::now())) {
            debug!("could not refresh access time of {}: {}", path.display(), e);
        }
        Ok(Some(bytes))
    }

    /// Persist an entry, then run an eviction pass.
    ///
    /// Bytes land in a temporary file first and are renamed into place, so a
    /// reader sees either the old state or the complete entry.
    pub fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.entry_path(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::io(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::io(&path, e));
        }
        debug!(cache_key = %key, bytes = bytes.len(), "cache entry written");

        match self.evict_if_needed() {
            Ok(EvictionOutcome::Evicted { removed, total_bytes }) => {
                info!(
                    "Cache cleaned to {:.1}MB ({} entries removed)",
                    total_bytes as f64 / 1024.0 / 1024.0,
                    removed
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Cache clean error: {}", e),
        }
        Ok(())
    }

    /// Sum of all entry sizes, by scanning the directory.
    pub fn total_size(&self) -> Result<u64, CacheError> {
        Ok(self.usage()?.bytes)
    }

    pub fn usage(&self) -> Result<CacheUsage, CacheError> {
        if !self.enabled {
            return Ok(CacheUsage::default());
        }
        let entries = self.entries()?;
        Ok(CacheUsage {
            entries: entries.len() as u64,
            bytes: entries.iter().map(|e| e.size).sum(),
        })
    }

    /// Remove least recently accessed entries once the store exceeds its
    /// maximum, until it is back under the eviction target.
    ///
    /// Entries that cannot be deleted are skipped. A failure to list the
    /// directory aborts the pass.
    pub fn evict_if_needed(&self) -> Result<EvictionOutcome, CacheError> {
        self.evict_with(|path| fs::remove_file(path))
    }

    fn evict_with(
        &self,
        mut remove: impl FnMut(&Path) -> io::Result<()>,
    ) -> Result<EvictionOutcome, CacheError> {
        if !self.enabled {
            return Ok(EvictionOutcome::Disabled);
        }
        let mut entries = self.entries()?;
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= self.max_bytes {
            return Ok(EvictionOutcome::WithinLimit { total_bytes: total });
        }

        info!(
            "Cache size {:.1}MB exceeds limit, cleaning...",
            total as f64 / 1024.0 / 1024.0
        );
        let target = (self.max_bytes as u128 * EVICTION_TARGET_PERCENT as u128 / 100) as u64;

        entries.sort_by(|a, b| a.accessed.cmp(&b.accessed).then_with(|| a.name.cmp(&b.name)));

        let mut removed = 0;
        for entry in entries {
            if total <= target {
                break;
            }
            match remove(&entry.path) {
                Ok(()) => {
                    total = total.saturating_sub(entry.size);
                    removed += 1;
                }
                // Someone else got there first; the bytes are gone either way.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    total = total.saturating_sub(entry.size);
                }
                Err(e) => {
                    warn!("Failed to evict {}: {}", entry.path.display(), e);
                }
            }
        }

        Ok(EvictionOutcome::Evicted {
            removed,
            total_bytes: total,
        })
    }

    fn entries(&self) -> Result<Vec<EntryMeta>, CacheError> {
        let read_dir = fs::read_dir(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let mut entries = Vec::new();
        for dirent in read_dir {
            let dirent = dirent.map_err(|e| CacheError::io(&self.dir, e))?;
            let path = dirent.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            // Entries can vanish between listing and stat.
            let meta = match dirent.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::io(&path, e)),
            };
            let accessed = meta
                .accessed()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(EntryMeta {
                name: dirent.file_name().to_string_lossy().into_owned(),
                path,
                size: meta.len(),
                accessed,
            });
        }
        Ok(entries)
    }
}
