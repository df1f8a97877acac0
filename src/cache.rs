//! Process-wide store of compiled mappers.
//!
//! Entries are keyed by [`SchemaSignature`]. Every key owns its own slot
//! mutex, so concurrent misses for one key build exactly once while builds
//! for different keys proceed in parallel. Failed builds are not stored.
//! The cache only grows; eviction is left to the host.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::{debug, trace};

use crate::catalog::{ColumnCatalog, ColumnKey};
use crate::error::Result;
use crate::mapper::CompiledMapper;
use crate::options::{MappingOptions, OptionsFingerprint};
use crate::types::TargetType;

/// Identifies one distinct mapping shape: target, ordered columns, options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaSignature {
    target: String,
    columns: Vec<ColumnKey>,
    options: OptionsFingerprint,
}

impl SchemaSignature {
    pub fn new(target: &TargetType, catalog: &ColumnCatalog, options: &MappingOptions) -> Self {
        Self {
            target: target.signature_token(),
            columns: catalog.signature(),
            options: options.fingerprint(),
        }
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }
}

type Entry = Arc<Mutex<Option<Arc<CompiledMapper>>>>;

#[derive(Debug, Default)]
pub struct MapperCache {
    entries: Mutex<HashMap<SchemaSignature, Entry>>,
    builds: AtomicUsize,
}

static GLOBAL: OnceLock<Arc<MapperCache>> = OnceLock::new();

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MapperCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by [`crate::mapper::RowMapper::global`].
    pub fn global() -> Arc<MapperCache> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MapperCache::new())))
    }

    pub fn get(&self, key: &SchemaSignature) -> Option<Arc<CompiledMapper>> {
        let entry = lock(&self.entries).get(key).cloned()?;
        let slot = lock(&entry);
        slot.clone()
    }

    /// Returns the mapper stored under `key`, building and storing it on a miss.
    /// A failed build retires its slot, so callers waiting on it start over.
    pub fn get_or_create<F>(&self, key: SchemaSignature, build: F) -> Result<Arc<CompiledMapper>>
    where
        F: FnOnce() -> Result<CompiledMapper>,
    {
        let entry = Arc::clone(lock(&self.entries).entry(key.clone()).or_default());
        let mut slot = lock(&entry);
        if let Some(mapper) = slot.as_ref() {
            trace!("Mapper cache hit for {}", mapper.target());
            return Ok(Arc::clone(mapper));
        }
        if !self.is_current(&key, &entry) {
            drop(slot);
            return self.get_or_create(key, build);
        }
        match build() {
            Ok(mapper) => {
                let mapper = Arc::new(mapper);
                self.builds.fetch_add(1, Ordering::Relaxed);
                debug!("Cached mapper for {}", mapper.target());
                *slot = Some(Arc::clone(&mapper));
                Ok(mapper)
            }
            Err(err) => {
                lock(&self.entries).remove(&key);
                debug!("Mapper build failed, slot released: {err}");
                Err(err)
            }
        }
    }

    fn is_current(&self, key: &SchemaSignature, entry: &Entry) -> bool {
        lock(&self.entries)
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    /// Number of keys with a stored mapper.
    pub fn len(&self) -> usize {
        let entries = lock(&self.entries).values().cloned().collect::<Vec<_>>();
        entries.iter().filter(|entry| lock(entry).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful builds performed through this cache.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;
    use crate::error::MapError;
    use crate::mapper::RowMapper;
    use crate::record::{ColumnSpec, ResultSet};

    fn catalog() -> ColumnCatalog {
        ColumnCatalog::from_specs(&[ColumnSpec::new("Id", crate::types::ValueType::Int32)])
    }

    fn key() -> SchemaSignature {
        SchemaSignature::new(&TargetType::int32(), &catalog(), &MappingOptions::default())
    }

    fn build() -> Result<CompiledMapper> {
        RowMapper::new(Arc::new(MapperCache::new())).compile(
            &TargetType::int32(),
            catalog(),
            &MappingOptions::default(),
        )
    }

    #[test]
    fn second_lookup_returns_cached_entry() {
        let cache = MapperCache::new();
        let first = cache.get_or_create(key(), build).unwrap();
        let second = cache
            .get_or_create(key(), || panic!("must not rebuild"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.build_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_builds_are_not_stored() {
        let cache = MapperCache::new();
        let err = cache
            .get_or_create(key(), || Err(MapError::unsupported("int32")))
            .unwrap_err();
        assert!(matches!(err, MapError::UnsupportedShape { .. }));
        assert!(cache.is_empty());
        assert!(cache.get(&key()).is_none());
        assert!(lock(&cache.entries).is_empty());
        cache.get_or_create(key(), build).unwrap();
        assert!(cache.get(&key()).is_some());
    }

    #[test]
    fn concurrent_misses_build_once() {
        let cache = Arc::new(MapperCache::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_create(key(), build).unwrap()
                })
            })
            .collect::<Vec<_>>();
        let mappers = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();
        assert!(mappers.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(cache.build_count(), 1);
    }

    #[test]
    fn options_take_part_in_the_key() {
        let custom = MappingOptions::default().with_separator("X");
        let other = SchemaSignature::new(&TargetType::int32(), &catalog(), &custom);
        assert_ne!(key(), other);
        let set = ResultSet::new(vec![ColumnSpec::new("id", crate::types::ValueType::Int32)]);
        let lower = SchemaSignature::new(
            &TargetType::int32(),
            &ColumnCatalog::from_specs(&set.columns),
            &MappingOptions::default(),
        );
        assert_ne!(key(), lower);
    }

    #[test]
    fn repeated_failures_leave_no_slots_behind() {
        let cache = MapperCache::new();
        for separator in ["_", "X", "__", "."] {
            let options = MappingOptions::default().with_separator(separator);
            let key = SchemaSignature::new(&TargetType::int32(), &catalog(), &options);
            assert!(
                cache
                    .get_or_create(key, || Err(MapError::unsupported("int32")))
                    .is_err()
            );
        }
        assert_eq!(lock(&cache.entries).len(), 0);
        assert_eq!(cache.build_count(), 0);
    }

    #[test]
    fn waiters_on_a_failed_slot_build_again() {
        let cache = Arc::new(MapperCache::new());
        let barrier = Arc::new(Barrier::new(4));
        let handles = (0..4)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if worker == 0 {
                        cache
                            .get_or_create(key(), || Err(MapError::unsupported("int32")))
                            .is_ok()
                    } else {
                        cache.get_or_create(key(), build).is_ok()
                    }
                })
            })
            .collect::<Vec<_>>();
        let outcomes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>();
        assert!(outcomes[1..].iter().all(|ok| *ok));
        assert!(cache.get(&key()).is_some());
        assert_eq!(cache.build_count(), 1);
    }
}
