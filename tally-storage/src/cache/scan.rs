//! Lazy, restartable scans over a store.
//!
//! A scan value (`ValueScan`, `EntryScan`, `KeyScan`) describes what to read;
//! every `iter()` call starts a new pass from the beginning. The iterators
//! read in batches of `scan_batch_size` entries, each batch inside its own
//! short read transaction, and resume after the last key they returned. No
//! transaction is held between `next()` calls, so a scan never pins the
//! volume and never blocks `CacheRegistry::stop`.
//!
//! Consequence: a pass is not a snapshot. Writes committed between two
//! batches are visible to the later batch if they sort after the resume key.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::Bound;

use heed::types::Bytes;
use heed::Database;
use tally_core::TallyResult;

use super::codec::{CacheValue, ValueCodec};
use super::engine::{txn_err, StorageEngine};
use super::key::{CacheKey, MAX_ENCODED_KEY_LEN};
use super::store::Entry;

type RawEntry = (Vec<u8>, Vec<u8>);

// ============================================================================
// RAW CURSOR
// ============================================================================

/// Everything needed to start a fresh [`Cursor`] over one prefix.
#[derive(Clone)]
pub(crate) struct CursorSource {
    engine: StorageEngine,
    db: Database<Bytes, Bytes>,
    prefix: Vec<u8>,
    batch_size: usize,
}

impl CursorSource {
    pub(crate) fn new(
        engine: StorageEngine,
        db: Database<Bytes, Bytes>,
        prefix: Vec<u8>,
        batch_size: usize,
    ) -> Self {
        Self {
            engine,
            db,
            prefix,
            batch_size,
        }
    }

    fn cursor(&self) -> Cursor {
        Cursor {
            source: self.clone(),
            resume_after: None,
            buffer: VecDeque::with_capacity(self.batch_size),
            // Longer than any stored key: nothing can match.
            exhausted: self.prefix.len() > MAX_ENCODED_KEY_LEN,
        }
    }
}

/// Batched walk over the raw entries under one prefix.
pub(crate) struct Cursor {
    source: CursorSource,
    resume_after: Option<Vec<u8>>,
    buffer: VecDeque<RawEntry>,
    exhausted: bool,
}

impl Cursor {
    fn next_raw(&mut self) -> Option<TallyResult<RawEntry>> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }

    fn fill(&mut self) -> TallyResult<()> {
        let source = &self.source;
        let env = source.engine.env()?;
        let rtxn = env.read_txn().map_err(txn_err)?;

        // LMDB rejects zero-length keys, so a whole-store pass starts unbounded.
        let lower = match &self.resume_after {
            Some(last) => Bound::Excluded(last.as_slice()),
            None if source.prefix.is_empty() => Bound::Unbounded,
            None => Bound::Included(source.prefix.as_slice()),
        };
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (lower, Bound::Unbounded);

        let mut reached_end = true;
        for item in source.db.range(&rtxn, &range).map_err(txn_err)? {
            let (key, value) = item.map_err(txn_err)?;
            if !key.starts_with(&source.prefix) {
                break;
            }
            self.buffer.push_back((key.to_vec(), value.to_vec()));
            if self.buffer.len() == source.batch_size {
                reached_end = false;
                break;
            }
        }

        self.exhausted = reached_end;
        if let Some((last, _)) = self.buffer.back() {
            self.resume_after = Some(last.clone());
        }
        Ok(())
    }
}

// ============================================================================
// VALUES
// ============================================================================

/// Values under a key prefix. See [`CompositeKeyStore::values`](super::CompositeKeyStore::values).
pub struct ValueScan<V> {
    source: CursorSource,
    codec: ValueCodec,
    _marker: PhantomData<fn() -> V>,
}

impl<V: CacheValue> ValueScan<V> {
    pub(crate) fn new(source: CursorSource, codec: ValueCodec) -> Self {
        Self {
            source,
            codec,
            _marker: PhantomData,
        }
    }

    /// Start a new pass.
    pub fn iter(&self) -> Values<V> {
        Values {
            cursor: self.source.cursor(),
            codec: self.codec,
            _marker: PhantomData,
        }
    }

    /// Collect one full pass, failing on the first bad element.
    pub fn to_vec(&self) -> TallyResult<Vec<V>> {
        self.iter().collect()
    }
}

impl<V: CacheValue> IntoIterator for ValueScan<V> {
    type Item = TallyResult<V>;
    type IntoIter = Values<V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V: CacheValue> IntoIterator for &ValueScan<V> {
    type Item = TallyResult<V>;
    type IntoIter = Values<V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass of a [`ValueScan`].
pub struct Values<V> {
    cursor: Cursor,
    codec: ValueCodec,
    _marker: PhantomData<fn() -> V>,
}

impl<V: CacheValue> Iterator for Values<V> {
    type Item = TallyResult<V>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.cursor.next_raw()?;
        Some(raw.and_then(|(_, frame)| self.codec.decode_frame(&frame).map_err(Into::into)))
    }
}

// ============================================================================
// ENTRIES
// ============================================================================

/// Every entry of a store. See [`CompositeKeyStore::entries`](super::CompositeKeyStore::entries).
pub struct EntryScan<V> {
    source: CursorSource,
    codec: ValueCodec,
    _marker: PhantomData<fn() -> V>,
}

impl<V: CacheValue> EntryScan<V> {
    pub(crate) fn new(source: CursorSource, codec: ValueCodec) -> Self {
        Self {
            source,
            codec,
            _marker: PhantomData,
        }
    }

    pub fn iter(&self) -> Entries<V> {
        Entries {
            cursor: self.source.cursor(),
            codec: self.codec,
            _marker: PhantomData,
        }
    }

    pub fn to_vec(&self) -> TallyResult<Vec<Entry<V>>> {
        self.iter().collect()
    }
}

impl<V: CacheValue> IntoIterator for EntryScan<V> {
    type Item = TallyResult<Entry<V>>;
    type IntoIter = Entries<V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V: CacheValue> IntoIterator for &EntryScan<V> {
    type Item = TallyResult<Entry<V>>;
    type IntoIter = Entries<V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass of an [`EntryScan`].
pub struct Entries<V> {
    cursor: Cursor,
    codec: ValueCodec,
    _marker: PhantomData<fn() -> V>,
}

impl<V: CacheValue> Iterator for Entries<V> {
    type Item = TallyResult<Entry<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.cursor.next_raw()?;
        Some(raw.and_then(|(key, frame)| {
            let key = CacheKey::decode(&key)?;
            let value = self.codec.decode_frame(&frame)?;
            Ok(Entry::new(key, value))
        }))
    }
}

// ============================================================================
// KEYS
// ============================================================================

/// Keys under a prefix. See [`CompositeKeyStore::keys`](super::CompositeKeyStore::keys).
pub struct KeyScan {
    source: CursorSource,
}

impl KeyScan {
    pub(crate) fn new(source: CursorSource) -> Self {
        Self { source }
    }

    pub fn iter(&self) -> Keys {
        Keys {
            cursor: self.source.cursor(),
        }
    }

    pub fn to_vec(&self) -> TallyResult<Vec<CacheKey>> {
        self.iter().collect()
    }
}

impl IntoIterator for KeyScan {
    type Item = TallyResult<CacheKey>;
    type IntoIter = Keys;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &KeyScan {
    type Item = TallyResult<CacheKey>;
    type IntoIter = Keys;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass of a [`KeyScan`].
pub struct Keys {
    cursor: Cursor,
}

impl Iterator for Keys {
    type Item = TallyResult<CacheKey>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.cursor.next_raw()?;
        Some(raw.and_then(|(key, _)| CacheKey::decode(&key).map_err(Into::into)))
    }
}
