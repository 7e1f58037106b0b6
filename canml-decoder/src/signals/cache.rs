//! Caller-owned LRU cache of built signal databases
//!
//! Keyed by the sorted source paths, their modification times and the
//! prefixing flag. Touching a DBC file changes its mtime and therefore the
//! key, so a stale registry is never returned.

use crate::signals::SignalDatabase;
use crate::types::{DecoderError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Default number of registries kept alive
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    paths: Vec<PathBuf>,
    modified: Vec<SystemTime>,
    prefix_signals: bool,
}

impl CacheKey {
    fn for_sources<P: AsRef<Path>>(sources: &[P], prefix_signals: bool) -> Result<Self> {
        let mut paths: Vec<PathBuf> = sources.iter().map(|p| p.as_ref().to_path_buf()).collect();
        paths.sort();
        paths.dedup();

        let modified = paths
            .iter()
            .map(|path| {
                std::fs::metadata(path)
                    .and_then(|meta| meta.modified())
                    .map_err(|e| {
                        DecoderError::Definition(format!("DBC file not found: {:?} ({})", path, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            paths,
            modified,
            prefix_signals,
        })
    }
}

#[derive(Debug, Default)]
struct CacheState {
    /// Least recently used at the front
    entries: VecDeque<(CacheKey, Arc<SignalDatabase>)>,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn get(&mut self, key: &CacheKey) -> Option<Arc<SignalDatabase>> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(idx)?;
        let db = entry.1.clone();
        self.entries.push_back(entry);
        Some(db)
    }
}

/// Bounded LRU cache of signal databases
///
/// Parsing happens outside the lock; only lookup, insert and eviction are
/// serialized, so the cache can be shared by concurrent decodes.
#[derive(Debug)]
pub struct RegistryCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl RegistryCache {
    /// Create a cache holding at most `capacity` registries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Return the cached registry for these sources, building it on a miss
    pub fn load<P: AsRef<Path>>(
        &self,
        sources: &[P],
        prefix_signals: bool,
    ) -> Result<Arc<SignalDatabase>> {
        if sources.is_empty() {
            return Err(DecoderError::Definition(
                "At least one DBC file must be provided".to_string(),
            ));
        }

        let key = CacheKey::for_sources(sources, prefix_signals)?;

        {
            let mut state = self.state.lock();
            if let Some(db) = state.get(&key) {
                state.hits += 1;
                log::debug!("Registry cache hit for {:?}", key.paths);
                return Ok(db);
            }
            state.misses += 1;
        }

        let built = Arc::new(SignalDatabase::load(&key.paths, prefix_signals)?);

        let mut state = self.state.lock();
        // Another caller may have built the same key meanwhile; keep the first
        if let Some(existing) = state.get(&key) {
            return Ok(existing);
        }
        if state.entries.len() >= self.capacity {
            if let Some((evicted, _)) = state.entries.pop_front() {
                log::debug!("Registry cache evicted {:?}", evicted.paths);
            }
        }
        state.entries.push_back((key, built.clone()));
        Ok(built)
    }

    /// Number of cached registries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since creation
    pub fn hit_stats(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.hits, state.misses)
    }

    /// Drop every cached registry
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }
}

impl Default for RegistryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn dbc_file(dir: &Path, name: &str, id: u32, signal: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "VERSION \"\"\n\nNS_ :\n\nBS_:\n\nBU_: ECU1\n\nBO_ {} Msg{}: 8 ECU1\n SG_ {} : 0|16@1+ (1,0) [0|65535] \"\" ECU1\n",
            id, id, signal
        )
        .unwrap();
        path
    }

    #[test]
    fn test_cache_hit_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let a = dbc_file(dir.path(), "a.dbc", 100, "Speed");
        let b = dbc_file(dir.path(), "b.dbc", 200, "Rpm");

        let cache = RegistryCache::new(4);
        let first = cache.load(&[&a, &b], false).unwrap();
        // Order of sources does not matter for the key
        let second = cache.load(&[&b, &a], false).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.hit_stats(), (1, 1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prefix_flag_is_part_of_key() {
        let dir = tempfile::tempdir().unwrap();
        let a = dbc_file(dir.path(), "a.dbc", 100, "Speed");

        let cache = RegistryCache::default();
        let plain = cache.load(&[&a], false).unwrap();
        let prefixed = cache.load(&[&a], true).unwrap();

        assert!(!Arc::ptr_eq(&plain, &prefixed));
        assert!(prefixed.contains_signal("a_Speed"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let a = dbc_file(dir.path(), "a.dbc", 100, "Speed");
        let b = dbc_file(dir.path(), "b.dbc", 200, "Rpm");
        let c = dbc_file(dir.path(), "c.dbc", 300, "Temp");

        let cache = RegistryCache::new(2);
        let first_a = cache.load(&[&a], false).unwrap();
        cache.load(&[&b], false).unwrap();
        // Touch a so b becomes least recently used
        cache.load(&[&a], false).unwrap();
        cache.load(&[&c], false).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(Arc::ptr_eq(&first_a, &cache.load(&[&a], false).unwrap()));
        let (hits, misses) = cache.hit_stats();
        assert_eq!((hits, misses), (2, 3));

        // b was evicted, so loading it again is a miss
        cache.load(&[&b], false).unwrap();
        assert_eq!(cache.hit_stats().1, 4);
    }

    #[test]
    fn test_missing_source_is_definition_error() {
        let cache = RegistryCache::default();
        let result = cache.load(&[Path::new("/nonexistent/file.dbc")], false);
        assert!(matches!(result, Err(DecoderError::Definition(_))));
        assert!(cache.is_empty());
    }
}
