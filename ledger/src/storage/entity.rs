//! The entity capability and the schema registry.
//!
//! A stored record declares three things: its [`ObjectType`] partition, its
//! `u64` primary key, and an ordered list of named indexes. Each index lists
//! the fields it covers and carries an explicit key-extraction function, so
//! the store never inspects a record by reflection.
//!
//! The declarations are part of the on-disk format. [`Schema`] fingerprints
//! them and the store refuses to open a database written under a different
//! fingerprint.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::key::KeyEncoder;
use super::objects::{Account, AccountSequence, GlobalSequence, Permission};
use super::StoreError;
use crate::crypto::hash::Digest;
use crate::resource::{ResourceLimits, ResourceLimitsConfig, ResourceLimitsState, ResourceUsage};
use crate::tables::{
    Index128, Index256, Index64, IndexDouble, IndexLongDouble, KeyValue, Table,
};

// ---------------------------------------------------------------------------
// ObjectType
// ---------------------------------------------------------------------------

/// Partition tag of every stored record. The discriminants are written into
/// keys and must never be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectType {
    Account = 1,
    Permission = 2,
    ResourceUsage = 3,
    ResourceLimits = 4,
    ResourceLimitsConfig = 5,
    ResourceLimitsState = 6,
    Table = 7,
    KeyValue = 8,
    Index64 = 9,
    Index128 = 10,
    Index256 = 11,
    IndexDouble = 12,
    IndexLongDouble = 13,
    AccountSequence = 14,
    GlobalSequence = 15,
}

impl ObjectType {
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Permission => "permission",
            Self::ResourceUsage => "resource_usage",
            Self::ResourceLimits => "resource_limits",
            Self::ResourceLimitsConfig => "resource_limits_config",
            Self::ResourceLimitsState => "resource_limits_state",
            Self::Table => "table_id",
            Self::KeyValue => "key_value",
            Self::Index64 => "index64",
            Self::Index128 => "index128",
            Self::Index256 => "index256",
            Self::IndexDouble => "index_double",
            Self::IndexLongDouble => "index_long_double",
            Self::AccountSequence => "account_sequence",
            Self::GlobalSequence => "global_sequence",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// One declared index of an entity type.
pub struct IndexSpec<E: ?Sized> {
    pub name: &'static str,
    /// Covered fields, in key order.
    pub fields: &'static [&'static str],
    /// Unique indexes reject a second record with the same composite key.
    /// Non-unique ones break ties by appending the primary key.
    pub unique: bool,
    /// Writes the composite key of a record into the encoder.
    pub extract: fn(&E, &mut KeyEncoder),
}

impl<E: ?Sized> fmt::Debug for IndexSpec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("unique", &self.unique)
            .finish()
    }
}

/// A record the [`ChainStore`](super::ChainStore) can hold.
///
/// `INDEXES[0]` must be the single-field unique `"id"` index over
/// [`Entity::id`].
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + 'static {
    const OBJECT_TYPE: ObjectType;
    const INDEXES: &'static [IndexSpec<Self>];

    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

/// Extractor for the mandatory `"id"` index.
pub fn id_key<E: Entity>(entity: &E, key: &mut KeyEncoder) {
    key.u64(entity.id());
}

/// The mandatory primary index declaration.
pub const fn primary_index<E: Entity>() -> IndexSpec<E> {
    IndexSpec {
        name: "id",
        fields: &["id"],
        unique: true,
        extract: id_key::<E>,
    }
}

/// Position of a named index in `E::INDEXES`.
pub(crate) fn index_ordinal<E: Entity>(name: &str) -> Result<u8, StoreError> {
    E::INDEXES
        .iter()
        .position(|spec| spec.name == name)
        .map(|pos| pos as u8)
        .ok_or_else(|| StoreError::UnknownIndex {
            object_type: E::OBJECT_TYPE,
            index: name.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Serializable view of one index declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexDecl {
    pub name: &'static str,
    pub fields: Vec<&'static str>,
    pub unique: bool,
}

/// Registry of the entity types a store may hold.
///
/// Built by whoever owns the store and handed to
/// [`ChainStore::open`](super::ChainStore::open).
#[derive(Clone, Debug, Default)]
pub struct Schema {
    types: BTreeMap<ObjectType, Vec<IndexDecl>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every object type the ledger core itself stores.
    pub fn chain() -> Result<Self, StoreError> {
        Self::new()
            .register::<Account>()?
            .register::<Permission>()?
            .register::<AccountSequence>()?
            .register::<GlobalSequence>()?
            .register::<ResourceUsage>()?
            .register::<ResourceLimits>()?
            .register::<ResourceLimitsConfig>()?
            .register::<ResourceLimitsState>()?
            .register::<Table>()?
            .register::<KeyValue>()?
            .register::<Index64>()?
            .register::<Index128>()?
            .register::<Index256>()?
            .register::<IndexDouble>()?
            .register::<IndexLongDouble>()
    }

    /// Add an entity type after checking its index declaration.
    pub fn register<E: Entity>(mut self) -> Result<Self, StoreError> {
        let object_type = E::OBJECT_TYPE;
        let invalid = |reason: String| StoreError::InvalidSchema(format!("{object_type}: {reason}"));

        if self.types.contains_key(&object_type) {
            return Err(invalid("registered twice".into()));
        }
        let Some(first) = E::INDEXES.first() else {
            return Err(invalid("declares no indexes".into()));
        };
        if first.name != "id" || first.fields != ["id"] || !first.unique {
            return Err(invalid("first index must be the unique single-field `id`".into()));
        }
        if E::INDEXES.len() > usize::from(u8::MAX) {
            return Err(invalid("too many indexes".into()));
        }

        let mut decls = Vec::with_capacity(E::INDEXES.len());
        for spec in E::INDEXES {
            if spec.fields.is_empty() {
                return Err(invalid(format!("index `{}` covers no fields", spec.name)));
            }
            if decls.iter().any(|d: &IndexDecl| d.name == spec.name) {
                return Err(invalid(format!("index `{}` declared twice", spec.name)));
            }
            decls.push(IndexDecl {
                name: spec.name,
                fields: spec.fields.to_vec(),
                unique: spec.unique,
            });
        }

        self.types.insert(object_type, decls);
        Ok(self)
    }

    pub fn contains(&self, object_type: ObjectType) -> bool {
        self.types.contains_key(&object_type)
    }

    pub fn indexes(&self, object_type: ObjectType) -> Option<&[IndexDecl]> {
        self.types.get(&object_type).map(Vec::as_slice)
    }

    pub fn object_types(&self) -> impl Iterator<Item = ObjectType> + '_ {
        self.types.keys().copied()
    }

    /// Digest of every declaration, in object-type order.
    pub fn fingerprint(&self) -> Digest {
        let mut text = String::new();
        for (object_type, decls) in &self.types {
            for (ordinal, decl) in decls.iter().enumerate() {
                text.push_str(&format!(
                    "{}:{}:{}:{}:{}:{}\n",
                    object_type.tag(),
                    object_type,
                    ordinal,
                    decl.name,
                    decl.fields.join(","),
                    decl.unique
                ));
            }
        }
        Digest::hash(text.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Widget {
        id: u64,
        colour: u32,
    }

    impl Widget {
        fn by_colour(&self, key: &mut KeyEncoder) {
            key.u32(self.colour);
        }
    }

    impl Entity for Widget {
        const OBJECT_TYPE: ObjectType = ObjectType::Account;
        const INDEXES: &'static [IndexSpec<Self>] = &[
            primary_index::<Self>(),
            IndexSpec {
                name: "by_colour",
                fields: &["colour"],
                unique: false,
                extract: Self::by_colour,
            },
        ];

        fn id(&self) -> u64 {
            self.id
        }

        fn set_id(&mut self, id: u64) {
            self.id = id;
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct NoPrimary {
        id: u64,
    }

    impl Entity for NoPrimary {
        const OBJECT_TYPE: ObjectType = ObjectType::Permission;
        const INDEXES: &'static [IndexSpec<Self>] = &[IndexSpec {
            name: "by_other",
            fields: &["id"],
            unique: true,
            extract: id_key::<Self>,
        }];

        fn id(&self) -> u64 {
            self.id
        }

        fn set_id(&mut self, id: u64) {
            self.id = id;
        }
    }

    #[test]
    fn chain_schema_registers_every_type() {
        let schema = Schema::chain().unwrap();
        assert_eq!(schema.object_types().count(), 15);
        assert_eq!(schema.indexes(ObjectType::Table).unwrap()[0].name, "id");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = Schema::new()
            .register::<Widget>()
            .unwrap()
            .register::<Widget>()
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSchema(_)));
    }

    #[test]
    fn first_index_must_be_id() {
        assert!(matches!(
            Schema::new().register::<NoPrimary>(),
            Err(StoreError::InvalidSchema(_))
        ));
    }

    #[test]
    fn fingerprint_tracks_declarations() {
        let a = Schema::new().register::<Widget>().unwrap();
        let b = Schema::chain().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(b.fingerprint(), Schema::chain().unwrap().fingerprint());
    }

    #[test]
    fn unknown_index_name() {
        assert_eq!(index_ordinal::<Widget>("by_colour").unwrap(), 1);
        assert!(matches!(
            index_ordinal::<Widget>("by_size"),
            Err(StoreError::UnknownIndex { .. })
        ));
    }
}
