//! # Indexed Entity Store
//!
//! Every entity, index entry and counter lives in one sled tree. Keys are
//! laid out so that sled's lexicographic order is the index order:
//!
//! | Key                                                   | Value                  |
//! |-------------------------------------------------------|------------------------|
//! | `01 ‖ type ‖ 00 ‖ id (8B BE)`                         | `bincode(StoredRecord)`|
//! | `01 ‖ type ‖ ordinal ‖ composite [‖ id]`              | id (8B BE)             |
//! | `00 ‖ 's' ‖ type`                                     | next id (8B BE)        |
//! | `00 ‖ 'f'`                                            | schema fingerprint     |
//!
//! Non-unique secondary keys carry the id as a trailing component, so ties
//! iterate in ascending primary-key order.
//!
//! ## Atomicity
//!
//! A record and all of its index entries are written in one sled `Batch`.
//! An index entry never points at a record that is not there.
//!
//! ## Undo sessions
//!
//! [`ChainStore::start_session`] opens an undo level. Every key written
//! while it is open has its prior value recorded once. Dropping the
//! [`Session`] (or calling [`Session::undo`]) writes those prior values
//! back; [`Session::push`] keeps the changes and folds the recorded values
//! into the enclosing session, if any. Sessions nest.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Batch, Db, Tree};
use tracing::{debug, error, info};

use super::entity::{index_ordinal, Entity, ObjectType, Schema};
use super::key::{prefix_successor, KeyEncoder};
use crate::crypto::hash::Digest;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("{object_type} {id} not found")]
    NotFound { object_type: ObjectType, id: u64 },

    #[error("duplicate key on {object_type}.{index}")]
    DuplicateKey {
        object_type: ObjectType,
        index: &'static str,
    },

    #[error("object type {0} is not registered with this store")]
    UnregisteredType(ObjectType),

    #[error("{object_type} has no index named `{index}`")]
    UnknownIndex { object_type: ObjectType, index: String },

    #[error("store was written with schema {stored}, this build expects {expected}")]
    SchemaMismatch { stored: String, expected: Digest },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("no ids left for {0}")]
    IdsExhausted(ObjectType),

    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

fn ser_err(e: bincode::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

const RECORD_SPACE: u8 = 0x01;
const META_SPACE: u8 = 0x00;
const META_SCHEMA: &[u8] = &[META_SPACE, b'f'];
const PRIMARY_ORDINAL: u8 = 0;

fn index_prefix(object_type: ObjectType, ordinal: u8) -> Vec<u8> {
    vec![RECORD_SPACE, object_type.tag(), ordinal]
}

fn primary_key(object_type: ObjectType, id: u64) -> Vec<u8> {
    let mut key = index_prefix(object_type, PRIMARY_ORDINAL);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn sequence_key(object_type: ObjectType) -> Vec<u8> {
    vec![META_SPACE, b's', object_type.tag()]
}

fn decode_id(bytes: &[u8]) -> StoreResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected 8-byte id, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

/// Composite keys of every secondary index of `entity`, in ordinal order.
fn secondary_keys<E: Entity>(entity: &E) -> Vec<Vec<u8>> {
    let id = entity.id().to_be_bytes();
    E::INDEXES
        .iter()
        .enumerate()
        .skip(1)
        .map(|(ordinal, spec)| {
            let mut composite = KeyEncoder::new();
            (spec.extract)(entity, &mut composite);
            let mut key = index_prefix(E::OBJECT_TYPE, ordinal as u8);
            key.extend_from_slice(composite.as_bytes());
            if !spec.unique {
                key.extend_from_slice(&id);
            }
            key
        })
        .collect()
}

/// Primary record envelope. Keeps the index keys written alongside the
/// body so they can be removed without re-deriving them.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    body: Vec<u8>,
    index_keys: Vec<Vec<u8>>,
}

type WriteOp = (Vec<u8>, Option<Vec<u8>>);

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Upsert,
}

/// Iteration order over an index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

// ---------------------------------------------------------------------------
// ChainStore
// ---------------------------------------------------------------------------

/// Prior values of every key touched while a session level was open.
type UndoLevel = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

#[derive(Default)]
struct UndoStack {
    levels: Vec<UndoLevel>,
}

/// Typed, indexed storage for every ledger entity.
///
/// Cloning is cheap and clones share the same tree and undo stack.
#[derive(Clone)]
pub struct ChainStore {
    db: Db,
    tree: Tree,
    schema: Arc<Schema>,
    undo: Arc<Mutex<UndoStack>>,
}

impl fmt::Debug for ChainStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainStore")
            .field("schema", &self.schema.fingerprint())
            .field("revision", &self.revision())
            .finish()
    }
}

impl ChainStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, schema: Schema) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db, schema)
    }

    /// In-memory store removed on drop. Meant for tests and dry runs.
    pub fn open_temporary(schema: Schema) -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, schema)
    }

    fn from_db(db: Db, schema: Schema) -> StoreResult<Self> {
        let tree = db.open_tree("state")?;
        let expected = schema.fingerprint();

        match tree.get(META_SCHEMA)? {
            Some(stored) if stored[..] != expected.as_bytes()[..] => {
                return Err(StoreError::SchemaMismatch {
                    stored: hex::encode(stored),
                    expected,
                });
            }
            Some(_) => {}
            None => {
                tree.insert(META_SCHEMA, &expected.as_bytes()[..])?;
            }
        }

        info!(schema = %expected, "chain store opened");
        Ok(Self {
            db,
            tree,
            schema: Arc::new(schema),
            undo: Arc::new(Mutex::new(UndoStack::default())),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn ensure_registered<E: Entity>(&self) -> StoreResult<()> {
        if self.schema.contains(E::OBJECT_TYPE) {
            Ok(())
        } else {
            Err(StoreError::UnregisteredType(E::OBJECT_TYPE))
        }
    }

    // -- Reads --------------------------------------------------------------

    fn load_record(&self, key: &[u8]) -> StoreResult<Option<StoredRecord>> {
        match self.tree.get(key)? {
            Some(bytes) => bincode::deserialize(&bytes).map(Some).map_err(ser_err),
            None => Ok(None),
        }
    }

    fn decode_entity<E: Entity>(record: &StoredRecord) -> StoreResult<E> {
        bincode::deserialize(&record.body).map_err(ser_err)
    }

    /// Point lookup by primary key.
    pub fn get<E: Entity>(&self, id: u64) -> StoreResult<Option<E>> {
        self.ensure_registered::<E>()?;
        match self.load_record(&primary_key(E::OBJECT_TYPE, id))? {
            Some(record) => Self::decode_entity(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Lookup through a secondary index. For a unique index `key` is the
    /// full composite key; otherwise the first entry starting with `key`
    /// is returned.
    pub fn find_by<E: Entity>(&self, index: &str, key: &KeyEncoder) -> StoreResult<Option<E>> {
        self.ensure_registered::<E>()?;
        let ordinal = index_ordinal::<E>(index)?;
        if ordinal == PRIMARY_ORDINAL {
            let id = decode_id(key.as_bytes())?;
            return self.get(id);
        }

        let mut full = index_prefix(E::OBJECT_TYPE, ordinal);
        full.extend_from_slice(key.as_bytes());

        let id_bytes = if E::INDEXES[usize::from(ordinal)].unique {
            self.tree.get(&full)?
        } else {
            match self.tree.scan_prefix(&full).next() {
                Some(entry) => Some(entry?.1),
                None => None,
            }
        };

        match id_bytes {
            Some(bytes) => {
                let id = decode_id(&bytes)?;
                self.get(id)?.map(Some).ok_or_else(|| {
                    StoreError::Corrupt(format!("{} index `{index}` points at missing {id}", E::OBJECT_TYPE))
                })
            }
            None => Ok(None),
        }
    }

    /// Ordered cursor over an index, starting at `start` (a composite key or
    /// key prefix).
    ///
    /// Forward yields every entry at or after `start`. Reverse yields every
    /// entry at or before `start`, counting entries that extend it, from the
    /// highest down. An empty `start` covers the whole index. Every call
    /// returns a fresh cursor.
    pub fn iterate<E: Entity>(
        &self,
        index: &str,
        start: &[u8],
        direction: Direction,
    ) -> StoreResult<EntityIter<E>> {
        self.ensure_registered::<E>()?;
        let ordinal = index_ordinal::<E>(index)?;
        let prefix = index_prefix(E::OBJECT_TYPE, ordinal);
        let end = prefix_successor(&prefix);

        let mut from = prefix.clone();
        from.extend_from_slice(start);

        let range = match direction {
            Direction::Forward => self.tree.range::<Vec<u8>, _>((
                Bound::Included(from),
                end.map_or(Bound::Unbounded, Bound::Excluded),
            )),
            Direction::Reverse => {
                let upper = if start.is_empty() {
                    end
                } else {
                    prefix_successor(&from).or(end)
                };
                self.tree.range::<Vec<u8>, _>((
                    Bound::Included(prefix),
                    upper.map_or(Bound::Unbounded, Bound::Excluded),
                ))
            }
        };

        Ok(EntityIter::new(self.clone(), range, direction, ordinal))
    }

    /// Every entry of an index whose composite key starts with `prefix`.
    pub fn scan<E: Entity>(
        &self,
        index: &str,
        prefix: &[u8],
        direction: Direction,
    ) -> StoreResult<EntityIter<E>> {
        self.ensure_registered::<E>()?;
        let ordinal = index_ordinal::<E>(index)?;
        let mut from = index_prefix(E::OBJECT_TYPE, ordinal);
        from.extend_from_slice(prefix);
        let end = prefix_successor(&from);

        let range = self.tree.range::<Vec<u8>, _>((
            Bound::Included(from),
            end.map_or(Bound::Unbounded, Bound::Excluded),
        ));
        Ok(EntityIter::new(self.clone(), range, direction, ordinal))
    }

    /// Number of stored records of one type.
    pub fn count<E: Entity>(&self) -> StoreResult<usize> {
        self.ensure_registered::<E>()?;
        Ok(self
            .tree
            .scan_prefix(index_prefix(E::OBJECT_TYPE, PRIMARY_ORDINAL))
            .count())
    }

    // -- Writes -------------------------------------------------------------

    fn write<E: Entity>(&self, entity: &E, mode: WriteMode) -> StoreResult<()> {
        self.ensure_registered::<E>()?;
        let object_type = E::OBJECT_TYPE;
        let pk = primary_key(object_type, entity.id());
        let previous = self.load_record(&pk)?;

        if mode == WriteMode::Insert && previous.is_some() {
            return Err(StoreError::DuplicateKey {
                object_type,
                index: "id",
            });
        }

        let id_bytes = entity.id().to_be_bytes().to_vec();
        let new_keys = secondary_keys(entity);

        for (spec, key) in E::INDEXES.iter().skip(1).zip(&new_keys) {
            if !spec.unique {
                continue;
            }
            if let Some(owner) = self.tree.get(key)? {
                if owner[..] != id_bytes[..] {
                    return Err(StoreError::DuplicateKey {
                        object_type,
                        index: spec.name,
                    });
                }
            }
        }

        let mut ops: Vec<WriteOp> = Vec::with_capacity(new_keys.len() * 2 + 1);
        if let Some(prev) = &previous {
            for old in &prev.index_keys {
                if !new_keys.contains(old) {
                    ops.push((old.clone(), None));
                }
            }
        }
        for key in &new_keys {
            ops.push((key.clone(), Some(id_bytes.clone())));
        }

        let record = StoredRecord {
            body: bincode::serialize(entity).map_err(ser_err)?,
            index_keys: new_keys,
        };
        ops.push((pk, Some(bincode::serialize(&record).map_err(ser_err)?)));

        self.apply(ops)?;
        debug!(%object_type, id = entity.id(), "entity written");
        Ok(())
    }

    /// Insert a record whose id is not yet taken.
    pub fn insert<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        self.write(entity, WriteMode::Insert)
    }

    /// Insert or overwrite by primary key.
    pub fn put<E: Entity>(&self, entity: &E) -> StoreResult<()> {
        self.write(entity, WriteMode::Upsert)
    }

    /// Allocate an id, let `build` fill in the record, and insert it.
    pub fn create<E: Entity + Default>(&self, build: impl FnOnce(&mut E)) -> StoreResult<E> {
        let id = self.next_id::<E>()?;
        let mut entity = E::default();
        build(&mut entity);
        entity.set_id(id);
        self.insert(&entity)?;
        Ok(entity)
    }

    /// Read-update-write. The id cannot be changed by `update`.
    pub fn modify<E: Entity>(&self, id: u64, update: impl FnOnce(&mut E)) -> StoreResult<E> {
        let mut entity: E = self.get(id)?.ok_or(StoreError::NotFound {
            object_type: E::OBJECT_TYPE,
            id,
        })?;
        update(&mut entity);
        entity.set_id(id);
        self.put(&entity)?;
        Ok(entity)
    }

    /// Remove a record and its index entries, returning it.
    pub fn delete<E: Entity>(&self, id: u64) -> StoreResult<E> {
        self.ensure_registered::<E>()?;
        let pk = primary_key(E::OBJECT_TYPE, id);
        let record = self.load_record(&pk)?.ok_or(StoreError::NotFound {
            object_type: E::OBJECT_TYPE,
            id,
        })?;
        let entity = Self::decode_entity(&record)?;

        let mut ops: Vec<WriteOp> = record.index_keys.into_iter().map(|k| (k, None)).collect();
        ops.push((pk, None));
        self.apply(ops)?;
        debug!(object_type = %E::OBJECT_TYPE, id, "entity deleted");
        Ok(entity)
    }

    /// Next unused id for a type. Never hands out an id at or below the
    /// highest one already stored.
    pub fn next_id<E: Entity>(&self) -> StoreResult<u64> {
        self.ensure_registered::<E>()?;
        let seq_key = sequence_key(E::OBJECT_TYPE);
        let counter = match self.tree.get(&seq_key)? {
            Some(bytes) => decode_id(&bytes)?,
            None => 0,
        };
        let after_last = match self
            .tree
            .scan_prefix(index_prefix(E::OBJECT_TYPE, PRIMARY_ORDINAL))
            .next_back()
        {
            Some(entry) => {
                let (key, _) = entry?;
                decode_id(&key[3..])?
                    .checked_add(1)
                    .ok_or(StoreError::IdsExhausted(E::OBJECT_TYPE))?
            }
            None => 0,
        };
        let id = counter.max(after_last);
        let next = id
            .checked_add(1)
            .ok_or(StoreError::IdsExhausted(E::OBJECT_TYPE))?;
        self.apply(vec![(seq_key, Some(next.to_be_bytes().to_vec()))])?;
        Ok(id)
    }

    /// Apply a set of writes atomically, recording prior values in the
    /// innermost open session.
    fn apply(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        let mut undo = self.undo.lock();
        if let Some(level) = undo.levels.last_mut() {
            for (key, _) in &ops {
                if !level.contains_key(key) {
                    let prior = self.tree.get(key)?.map(|v| v.to_vec());
                    level.insert(key.clone(), prior);
                }
            }
        }

        let mut batch = Batch::default();
        for (key, value) in ops {
            match value {
                Some(v) => batch.insert(key, v),
                None => batch.remove(key),
            }
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    // -- Undo sessions --------------------------------------------------------

    /// Number of open undo levels.
    pub fn revision(&self) -> usize {
        self.undo.lock().levels.len()
    }

    /// Open a nested undo level.
    pub fn start_session(&self) -> Session {
        let mut undo = self.undo.lock();
        undo.levels.push(UndoLevel::new());
        Session {
            store: self.clone(),
            depth: undo.levels.len(),
            open: true,
        }
    }

    fn rollback_to(&self, depth: usize) -> StoreResult<()> {
        let mut undo = self.undo.lock();
        while undo.levels.len() >= depth {
            let Some(level) = undo.levels.last() else {
                break;
            };
            let restored = level.len();
            let mut batch = Batch::default();
            for (key, prior) in level {
                match prior {
                    Some(v) => batch.insert(key.as_slice(), v.as_slice()),
                    None => batch.remove(key.as_slice()),
                }
            }
            // The level stays recorded until its restore has landed.
            self.tree.apply_batch(batch)?;
            undo.levels.pop();
            debug!(depth = undo.levels.len() + 1, keys = restored, "undo level rolled back");
        }
        Ok(())
    }

    fn commit_level(&self, depth: usize) {
        let mut undo = self.undo.lock();
        if undo.levels.len() < depth {
            return;
        }
        while undo.levels.len() > depth {
            if let Some(inner) = undo.levels.pop() {
                if let Some(outer) = undo.levels.last_mut() {
                    merge_level(outer, inner);
                }
            }
        }
        if let Some(level) = undo.levels.pop() {
            if let Some(parent) = undo.levels.last_mut() {
                merge_level(parent, level);
            }
        }
    }
}

fn merge_level(parent: &mut UndoLevel, child: UndoLevel) {
    for (key, prior) in child {
        parent.entry(key).or_insert(prior);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Guard for one undo level. Rolls back on drop unless pushed.
#[must_use = "dropping a session immediately undoes it"]
pub struct Session {
    store: ChainStore,
    depth: usize,
    open: bool,
}

impl Session {
    /// Keep the changes made under this session.
    pub fn push(mut self) {
        self.open = false;
        self.store.commit_level(self.depth);
    }

    /// Discard the changes made under this session.
    pub fn undo(mut self) -> StoreResult<()> {
        self.open = false;
        self.store.rollback_to(self.depth)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.store.rollback_to(self.depth) {
                error!(error = %e, depth = self.depth, "failed to roll back undo session");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("depth", &self.depth)
            .field("open", &self.open)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EntityIter
// ---------------------------------------------------------------------------

/// Lazy cursor over one index. Yields decoded records.
pub struct EntityIter<E> {
    store: ChainStore,
    inner: sled::Iter,
    direction: Direction,
    primary: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> EntityIter<E> {
    fn new(store: ChainStore, inner: sled::Iter, direction: Direction, ordinal: u8) -> Self {
        Self {
            store,
            inner,
            direction,
            primary: ordinal == PRIMARY_ORDINAL,
            _entity: PhantomData,
        }
    }

    fn decode(&self, value: &[u8]) -> StoreResult<E> {
        if self.primary {
            let record: StoredRecord = bincode::deserialize(value).map_err(ser_err)?;
            return ChainStore::decode_entity(&record);
        }
        let id = decode_id(value)?;
        self.store.get(id)?.ok_or_else(|| {
            StoreError::Corrupt(format!("{} index entry points at missing {id}", E::OBJECT_TYPE))
        })
    }
}

impl<E: Entity> Iterator for EntityIter<E> {
    type Item = StoreResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.direction {
            Direction::Forward => self.inner.next()?,
            Direction::Reverse => self.inner.next_back()?,
        };
        Some(entry.map_err(StoreError::from).and_then(|(_, value)| self.decode(&value)))
    }
}
