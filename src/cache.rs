//! Finding cache for incremental evaluation
//!
//! Entries are keyed by (content hash, policy version, language), so an
//! entry is valid exactly as long as both the file text and the policy are
//! unchanged. Findings are stored without their file path and rebound on
//! read, which lets two files with identical content share an entry.

use crate::finding::{Finding, FindingKind, Severity, Span};
use crate::registry::PolicyVersion;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Default number of entries kept in memory
pub const DEFAULT_CAPACITY: usize = 4096;

/// Error persisting or restoring the cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error on cache file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache file {}: {message}", path.display())]
    Format { path: PathBuf, message: String },
}

/// Identity of a cached evaluation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub content_hash: String,
    pub policy: PolicyVersion,
    pub language: String,
}

impl CacheKey {
    pub fn new(text: &str, policy: &PolicyVersion, language: &str) -> Self {
        Self {
            content_hash: hash_content(text),
            policy: policy.clone(),
            language: language.to_string(),
        }
    }
}

/// Finding without its file path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFinding {
    pub rule_id: String,
    pub span: Span,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub kind: FindingKind,
}

impl CachedFinding {
    /// Convert from a full Finding
    pub fn from_finding(finding: &Finding) -> Self {
        Self {
            rule_id: finding.rule_id.clone(),
            span: finding.span,
            severity: finding.severity,
            message: finding.message.clone(),
            kind: finding.kind,
        }
    }

    /// Convert back to a full Finding for `file`
    pub fn to_finding(&self, file: &Path) -> Finding {
        Finding {
            rule_id: self.rule_id.clone(),
            file: file.to_path_buf(),
            span: self.span,
            severity: self.severity,
            message: self.message.clone(),
            kind: self.kind,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub findings: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheState {
    entries: lru::LruCache<CacheKey, Vec<CachedFinding>>,
    /// Last key stored for each path
    by_path: HashMap<PathBuf, CacheKey>,
    hits: u64,
    misses: u64,
}

/// On-disk form of the cache
#[derive(Serialize, Deserialize)]
struct PersistedCache {
    version: u32,
    /// Least recently used first
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    key: CacheKey,
    findings: Vec<CachedFinding>,
}

/// Bounded, thread-safe finding cache
pub struct FindingCache {
    state: Mutex<CacheState>,
}

impl FindingCache {
    /// Current cache format version
    const CACHE_VERSION: u32 = 1;

    /// Create a new cache with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: lru::LruCache::new(capacity),
                by_path: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached findings for `key`, rebound to `file`
    pub fn get(&self, key: &CacheKey, file: &Path) -> Option<Vec<Finding>> {
        let mut state = self.lock();
        let found = state
            .entries
            .get(key)
            .map(|cached| cached.iter().map(|c| c.to_finding(file)).collect());
        match found {
            Some(findings) => {
                state.hits += 1;
                state.by_path.insert(file.to_path_buf(), key.clone());
                Some(findings)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Whether an entry exists, without touching recency or counters
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains(key)
    }

    /// Store the findings of a completed file
    ///
    /// A previous entry recorded for the same path under a different key is
    /// dropped unless another path still refers to it.
    pub fn put(&self, key: CacheKey, file: &Path, findings: &[Finding]) {
        let mut state = self.lock();
        let cached: Vec<CachedFinding> = findings.iter().map(CachedFinding::from_finding).collect();

        if let Some(old) = state.by_path.insert(file.to_path_buf(), key.clone()) {
            if old != key && !state.by_path.values().any(|k| *k == old) {
                state.entries.pop(&old);
            }
        }
        state.entries.put(key, cached);
    }

    /// Drop what is cached for a path
    pub fn forget(&self, file: &Path) {
        let mut state = self.lock();
        if let Some(old) = state.by_path.remove(file) {
            if !state.by_path.values().any(|k| *k == old) {
                state.entries.pop(&old);
            }
        }
    }

    /// Remove every entry that belongs to another policy version
    pub fn retain_version(&self, version: &PolicyVersion) {
        let mut state = self.lock();
        let stale: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(k, _)| k.policy != *version)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            state.entries.pop(key);
        }
        state.by_path.retain(|_, k| k.policy == *version);
        if !stale.is_empty() {
            log::debug!("Purged {} cache entries of older policies", stale.len());
        }
    }

    /// Clear all entries
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.by_path.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            findings: state.entries.iter().map(|(_, v)| v.len()).sum(),
            hits: state.hits,
            misses: state.misses,
        }
    }

    /// Load cache from file
    ///
    /// A file written by another format version yields an empty cache.
    pub fn load(path: &Path, capacity: usize) -> Result<Self, CacheError> {
        let content = fs::read(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let persisted: PersistedCache =
            serde_json::from_slice(&content).map_err(|e| CacheError::Format {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let cache = Self::new(capacity);
        if persisted.version != Self::CACHE_VERSION {
            log::info!(
                "Ignoring cache {} with format version {}",
                path.display(),
                persisted.version
            );
            return Ok(cache);
        }

        {
            let mut state = cache.lock();
            for entry in persisted.entries {
                state.entries.put(entry.key, entry.findings);
            }
        }
        log::debug!("Loaded {} cache entries from {}", cache.len(), path.display());
        Ok(cache)
    }

    /// Load from `path` if it exists and is readable, otherwise start empty
    pub fn load_or_new(path: &Path, capacity: usize) -> Self {
        if !path.exists() {
            return Self::new(capacity);
        }
        Self::load(path, capacity).unwrap_or_else(|e| {
            log::warn!("{}; starting with an empty cache", e);
            Self::new(capacity)
        })
    }

    /// Save cache to file
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let persisted = {
            let state = self.lock();
            let mut entries: Vec<PersistedEntry> = state
                .entries
                .iter()
                .map(|(k, v)| PersistedEntry {
                    key: k.clone(),
                    findings: v.clone(),
                })
                .collect();
            entries.reverse();
            PersistedCache {
                version: Self::CACHE_VERSION,
                entries,
            }
        };

        let content = serde_json::to_vec(&persisted).map_err(|e| CacheError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fs::write(path, content).map_err(io_err)
    }
}

impl Default for FindingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// SHA-256 of file content, hex encoded
pub fn hash_content(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Default location of the persisted cache
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("conform").join("cache.json"))
}
