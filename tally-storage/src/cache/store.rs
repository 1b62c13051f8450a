//! Named, tuple-keyed stores on the shared volume.

use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

use heed::types::Bytes;
use heed::Database;
use tally_core::{KeyError, TallyResult};

use super::codec::{CacheValue, ValueCodec};
use super::engine::{txn_err, StorageEngine};
use super::key::{CacheKey, MAX_ENCODED_KEY_LEN};
use super::scan::{CursorSource, EntryScan, KeyScan, ValueScan};

/// A key/value pair read from a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<V> {
    key: CacheKey,
    value: V,
}

impl<V> Entry<V> {
    pub(crate) fn new(key: CacheKey, value: V) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_parts(self) -> (CacheKey, V) {
        (self.key, self.value)
    }
}

/// A named cache keyed by [`CacheKey`] tuples.
///
/// Obtained once from [`CacheRegistry::create_cache`](super::CacheRegistry::create_cache)
/// and valid until the registry stops; afterwards every operation fails with
/// `EngineError::Closed`. Handles are cheap to clone and share the same data.
///
/// # Example
///
/// ```ignore
/// let issues = registry.create_cache::<String>("issues")?;
/// issues.put(&CacheKey::try_from(["R1", "squid:S100", "1"])?, &"message".to_string())?;
///
/// let under_r1: Vec<String> = issues.values(&CacheKey::single("R1")).to_vec()?;
/// ```
pub struct CompositeKeyStore<V> {
    name: Arc<str>,
    db: Database<Bytes, Bytes>,
    engine: StorageEngine,
    codec: ValueCodec,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for CompositeKeyStore<V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            db: self.db,
            engine: self.engine.clone(),
            codec: self.codec,
            _marker: PhantomData,
        }
    }
}

impl<V> std::fmt::Debug for CompositeKeyStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeKeyStore")
            .field("name", &self.name)
            .finish()
    }
}

impl<V: CacheValue> CompositeKeyStore<V> {
    pub(crate) fn new(name: &str, db: Database<Bytes, Bytes>, engine: StorageEngine) -> Self {
        let codec = ValueCodec::new(engine.config().compression_level);
        Self {
            name: Arc::from(name),
            db,
            engine,
            codec,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `value` at `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// - `KeyError::TooLong` if the encoded key exceeds the engine limit
    /// - `CodecError` if the value cannot be serialized
    /// - `EngineError::Closed` after the registry stopped
    pub fn put(&self, key: &CacheKey, value: &V) -> TallyResult<()> {
        let encoded_key = key.encode_checked()?;
        let frame = self
            .codec
            .encode_frame(value, self.engine.config().page_size)?;

        let env = self.engine.env()?;
        let mut wtxn = env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, &encoded_key, &frame)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    /// Exact-key lookup.
    pub fn get(&self, key: &CacheKey) -> TallyResult<Option<V>> {
        let Some(encoded_key) = lookup_key(key)? else {
            return Ok(None);
        };

        let env = self.engine.env()?;
        let rtxn = env.read_txn().map_err(txn_err)?;
        match self.db.get(&rtxn, &encoded_key).map_err(txn_err)? {
            Some(frame) => Ok(Some(self.codec.decode_frame(frame)?)),
            None => Ok(None),
        }
    }

    /// True iff a value is stored at exactly `key`.
    pub fn contains_key(&self, key: &CacheKey) -> TallyResult<bool> {
        let Some(encoded_key) = lookup_key(key)? else {
            return Ok(false);
        };

        let env = self.engine.env()?;
        let rtxn = env.read_txn().map_err(txn_err)?;
        Ok(self.db.get(&rtxn, &encoded_key).map_err(txn_err)?.is_some())
    }

    /// Delete the value at `key`. Returns whether something was deleted.
    pub fn remove(&self, key: &CacheKey) -> TallyResult<bool> {
        let Some(encoded_key) = lookup_key(key)? else {
            return Ok(false);
        };

        let env = self.engine.env()?;
        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let deleted = self.db.delete(&mut wtxn, &encoded_key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    /// Values whose key starts with `prefix`, in ascending key order.
    ///
    /// The scan is lazy and restartable: each call to `iter()` starts over.
    pub fn values(&self, prefix: &CacheKey) -> ValueScan<V> {
        ValueScan::new(self.source(prefix.encode()), self.codec)
    }

    /// Keys starting with `prefix`, in ascending order. Values are not decoded.
    pub fn keys(&self, prefix: &CacheKey) -> KeyScan {
        KeyScan::new(self.source(prefix.encode()))
    }

    /// Every entry of the store, in ascending key order.
    pub fn entries(&self) -> EntryScan<V> {
        EntryScan::new(self.source(Vec::new()), self.codec)
    }

    /// Delete every entry whose key starts with `prefix`, in one transaction.
    pub fn clear_prefix(&self, prefix: &CacheKey) -> TallyResult<u64> {
        let prefix = prefix.encode();
        if prefix.len() > MAX_ENCODED_KEY_LEN {
            return Ok(0);
        }

        let env = self.engine.env()?;
        let mut wtxn = env.write_txn().map_err(txn_err)?;

        let mut doomed = Vec::new();
        {
            let range = (Bound::Included(prefix.as_slice()), Bound::Unbounded);
            for item in self.db.range(&wtxn, &range).map_err(txn_err)? {
                let (key, _) = item.map_err(txn_err)?;
                if !key.starts_with(&prefix) {
                    break;
                }
                doomed.push(key.to_vec());
            }
        }

        let mut deleted = 0u64;
        for key in &doomed {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(cache = %self.name, deleted, "Cleared cache prefix");
        Ok(deleted)
    }

    /// Delete everything in the store.
    pub fn clear(&self) -> TallyResult<u64> {
        let env = self.engine.env()?;
        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let count = self.db.len(&wtxn).map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(count)
    }

    /// Number of entries in the store.
    pub fn len(&self) -> TallyResult<u64> {
        let env = self.engine.env()?;
        let rtxn = env.read_txn().map_err(txn_err)?;
        Ok(self.db.len(&rtxn).map_err(txn_err)?)
    }

    pub fn is_empty(&self) -> TallyResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Source of fresh cursors over raw entries under `prefix`
    /// (empty = whole store).
    fn source(&self, prefix: Vec<u8>) -> CursorSource {
        CursorSource::new(
            self.engine.clone(),
            self.db,
            prefix,
            self.engine.config().scan_batch_size,
        )
    }
}

/// Encoded key for a point lookup, or `None` when the key is too long to
/// have ever been stored.
fn lookup_key(key: &CacheKey) -> TallyResult<Option<Vec<u8>>> {
    match key.encode_checked() {
        Ok(bytes) => Ok(Some(bytes)),
        Err(KeyError::TooLong { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRegistry;
    use crate::temp_folder::TempRoot;
    use tally_core::{CodecError, EngineConfig, EngineError, TallyError};

    fn create_test_registry(scan_batch_size: usize) -> (CacheRegistry, TempRoot) {
        let temp = TempRoot::new().expect("temp root should be created");
        let config = EngineConfig {
            map_size_bytes: 16 * 1024 * 1024,
            scan_batch_size,
            ..EngineConfig::scratch()
        };
        let registry = CacheRegistry::new(&temp, config).expect("registry creation should succeed");
        (registry, temp)
    }

    fn key(segments: &[&str]) -> CacheKey {
        CacheKey::try_from(segments).expect("non-empty key")
    }

    #[test]
    fn test_put_and_get() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<String>("issues").expect("create");

        store
            .put(&key(&["R1", "squid:S100"]), &"Rename this method".to_string())
            .expect("put should succeed");

        assert_eq!(
            store.get(&key(&["R1", "squid:S100"])).expect("get should succeed"),
            Some("Rename this method".to_string())
        );
        assert_eq!(store.get(&key(&["R1"])).expect("get should succeed"), None);
        assert!(store.contains_key(&key(&["R1", "squid:S100"])).expect("contains"));
        assert!(!store.contains_key(&key(&["R1"])).expect("contains"));
    }

    #[test]
    fn test_overwrite() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<i64>("counters").expect("create");
        let k = key(&["R1", "lines"]);

        store.put(&k, &1).expect("put should succeed");
        store.put(&k, &2).expect("put should succeed");

        assert_eq!(store.get(&k).expect("get should succeed"), Some(2));
        let entries = store.entries().to_vec().expect("entries should decode");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value(), &2);
        assert_eq!(store.len().expect("len"), 1);
    }

    #[test]
    fn test_values_prefix_and_order() {
        let (registry, _temp) = create_test_registry(2);
        let store = registry.create_cache::<String>("values").expect("create");

        for (segments, value) in [
            (["R2", "a"], "r2a"),
            (["R1", "b"], "r1b"),
            (["R10", "a"], "r10a"),
            (["R1", "a"], "r1a"),
            (["R1", "c"], "r1c"),
        ] {
            store
                .put(&CacheKey::try_from(segments).expect("key"), &value.to_string())
                .expect("put should succeed");
        }
        store.put(&key(&["R1"]), &"r1".to_string()).expect("put");

        let scan = store.values(&key(&["R1"]));
        let first: Vec<String> = scan.to_vec().expect("scan should decode");
        assert_eq!(first, vec!["r1", "r1a", "r1b", "r1c"]);

        // Restartable: a second pass sees the same sequence.
        let second: Vec<String> = scan.iter().collect::<TallyResult<_>>().expect("scan");
        assert_eq!(first, second);

        let narrow = store.values(&key(&["R1", "b"])).to_vec().expect("scan");
        assert_eq!(narrow, vec!["r1b"]);

        assert!(store.values(&key(&["R3"])).to_vec().expect("scan").is_empty());
    }

    #[test]
    fn test_scan_is_lazy_across_batches() {
        let (registry, _temp) = create_test_registry(3);
        let store = registry.create_cache::<u64>("lazy").expect("create");
        for i in 0..10u64 {
            store
                .put(&key(&["R1", &format!("{:02}", i)]), &i)
                .expect("put should succeed");
        }

        let mut iter = store.values(&key(&["R1"])).iter();
        assert_eq!(iter.next().map(|r| r.expect("value")), Some(0));
        // Written behind the resume point after the first batch was read.
        store.put(&key(&["R1", "99"]), &99).expect("put");

        let rest: Vec<u64> = iter.map(|r| r.expect("value")).collect();
        assert_eq!(rest, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 99]);
    }

    #[test]
    fn test_unsigned_values() {
        let (registry, _temp) = create_test_registry(2);
        let store = registry.create_cache::<u32>("lines").expect("create");
        for (file, lines) in [("a.rs", 10u32), ("b.rs", u32::MAX), ("c.rs", 0)] {
            store.put(&key(&["R1", file]), &lines).expect("put should succeed");
        }

        assert_eq!(store.get(&key(&["R1", "b.rs"])).expect("get"), Some(u32::MAX));
        assert_eq!(
            store.values(&key(&["R1"])).to_vec().expect("scan"),
            vec![10, u32::MAX, 0]
        );
    }

    #[test]
    fn test_malformed_stored_key_surfaces_as_key_error() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<String>("raw_keys").expect("create");
        store.put(&key(&["R1"]), &"ok".to_string()).expect("put");

        // Unterminated segment written past the normal encoder.
        let env = registry.engine().env().expect("env");
        let mut wtxn = env.write_txn().expect("write txn");
        store
            .db
            .put(&mut wtxn, b"R2", &[0x00, 0x00])
            .expect("raw put");
        wtxn.commit().expect("commit");

        let keys: Vec<TallyResult<CacheKey>> = store.keys(&key(&["R1"])).iter().collect();
        assert_eq!(keys, vec![Ok(key(&["R1"]))]);

        let mut all = store.entries().iter();
        assert_eq!(
            all.next().map(|e| e.map(Entry::into_parts)),
            Some(Ok((key(&["R1"]), "ok".to_string())))
        );
        assert!(matches!(
            all.next(),
            Some(Err(TallyError::Key(KeyError::Malformed { .. })))
        ));
        assert!(all.next().is_none());
    }

    #[test]
    fn test_entries_in_key_order() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<bool>("flags").expect("create");
        store.put(&key(&["b"]), &true).expect("put");
        store.put(&key(&["a", "z"]), &false).expect("put");
        store.put(&key(&["a"]), &true).expect("put");

        let keys: Vec<CacheKey> = store
            .entries()
            .iter()
            .map(|e| e.expect("entry").into_parts().0)
            .collect();
        assert_eq!(keys, vec![key(&["a"]), key(&["a", "z"]), key(&["b"])]);
        assert_eq!(store.keys(&key(&["a"])).to_vec().expect("keys").len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<i32>("scratch").expect("create");
        for (i, r) in ["R1", "R1", "R2"].iter().enumerate() {
            store.put(&key(&[r, &i.to_string()]), &(i as i32)).expect("put");
        }

        assert!(store.remove(&key(&["R2", "2"])).expect("remove"));
        assert!(!store.remove(&key(&["R2", "2"])).expect("remove"));
        assert_eq!(store.clear_prefix(&key(&["R1"])).expect("clear prefix"), 2);
        assert!(store.is_empty().expect("is_empty"));

        store.put(&key(&["R3"]), &3).expect("put");
        assert_eq!(store.clear().expect("clear"), 1);
        assert_eq!(store.len().expect("len"), 0);
    }

    #[test]
    fn test_stores_are_isolated() {
        let (registry, _temp) = create_test_registry(256);
        let a = registry.create_cache::<String>("a").expect("create");
        let b = registry.create_cache::<String>("b").expect("create");

        a.put(&key(&["R1"]), &"in a".to_string()).expect("put");
        assert_eq!(b.get(&key(&["R1"])).expect("get"), None);
        assert!(b.entries().to_vec().expect("entries").is_empty());
    }

    #[test]
    fn test_oversized_value_roundtrip() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<String>("big").expect("create");
        let page_size = registry.engine().config().page_size;
        let big = "line-hits=1;".repeat(page_size);
        assert!(bincode::serialize(&big).expect("serialize").len() > page_size);

        store.put(&key(&["R1", "coverage"]), &big).expect("put should succeed");
        assert_eq!(store.get(&key(&["R1", "coverage"])).expect("get"), Some(big));
    }

    #[test]
    fn test_too_long_key() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<String>("long").expect("create");
        let long = key(&[&"k".repeat(MAX_ENCODED_KEY_LEN)]);

        let err = store.put(&long, &"v".to_string()).unwrap_err();
        assert!(matches!(err, TallyError::Key(KeyError::TooLong { .. })));
        assert_eq!(store.get(&long).expect("get"), None);
        assert!(!store.contains_key(&long).expect("contains"));
        assert!(store.values(&long).to_vec().expect("scan").is_empty());
    }

    #[test]
    fn test_corrupt_value_surfaces_as_codec_error() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<String>("corrupt").expect("create");
        store.put(&key(&["R1", "a"]), &"ok".to_string()).expect("put");

        // Overwrite the frame with an unknown tag through the raw database.
        let env = registry.engine().env().expect("env");
        let mut wtxn = env.write_txn().expect("write txn");
        store
            .db
            .put(&mut wtxn, &key(&["R1", "b"]).encode(), &[0x7F, 0x00])
            .expect("raw put");
        wtxn.commit().expect("commit");

        let results: Vec<TallyResult<String>> = store.values(&key(&["R1"])).iter().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok("ok".to_string()));
        assert_eq!(
            results[1],
            Err(TallyError::Codec(CodecError::UnknownFrame { tag: 0x7F }))
        );
    }

    #[test]
    fn test_operations_fail_after_stop() {
        let (registry, _temp) = create_test_registry(256);
        let store = registry.create_cache::<String>("late").expect("create");
        store.put(&key(&["R1"]), &"v".to_string()).expect("put");
        let scan = store.values(&key(&["R1"]));

        registry.stop().expect("stop should succeed");

        let closed = TallyError::Engine(EngineError::Closed);
        assert_eq!(store.get(&key(&["R1"])).unwrap_err(), closed);
        assert_eq!(store.put(&key(&["R1"]), &"w".to_string()).unwrap_err(), closed);
        assert_eq!(store.contains_key(&key(&["R1"])).unwrap_err(), closed);
        assert_eq!(store.len().unwrap_err(), closed);

        let mut iter = scan.iter();
        assert_eq!(iter.next(), Some(Err(closed)));
        assert_eq!(iter.next(), None);
    }
}
