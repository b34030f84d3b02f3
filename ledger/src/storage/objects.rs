//! Chain bookkeeping records: accounts, their permissions, and the action
//! sequence counters receipts are stamped with.

use serde::{Deserialize, Serialize};

use super::entity::{primary_index, Entity, IndexSpec, ObjectType};
use super::key::KeyEncoder;
use crate::chain::{BlockTimestamp, Name};
use crate::crypto::keys::PublicKey;

/// A registered account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub name: Name,
    pub creation_date: BlockTimestamp,
    pub privileged: bool,
}

impl Account {
    fn by_name(&self, key: &mut KeyEncoder) {
        key.name(self.name);
    }
}

impl Entity for Account {
    const OBJECT_TYPE: ObjectType = ObjectType::Account;
    const INDEXES: &'static [IndexSpec<Self>] = &[
        primary_index::<Self>(),
        IndexSpec {
            name: "by_name",
            fields: &["name"],
            unique: true,
            extract: Self::by_name,
        },
    ];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// A key and the weight its signature contributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWeight {
    pub key: PublicKey,
    pub weight: u16,
}

/// Weighted key threshold guarding a permission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub threshold: u32,
    pub keys: Vec<KeyWeight>,
}

impl Authority {
    /// The common case: one key that alone meets the threshold.
    pub fn single_key(key: PublicKey) -> Self {
        Self {
            threshold: 1,
            keys: vec![KeyWeight { key, weight: 1 }],
        }
    }

    /// Non-zero threshold, strictly sorted keys, and enough total weight to
    /// ever reach the threshold.
    pub fn is_valid(&self) -> bool {
        if self.threshold == 0 {
            return false;
        }
        if !self.keys.windows(2).all(|w| w[0].key < w[1].key) {
            return false;
        }
        let total: u64 = self.keys.iter().map(|k| u64::from(k.weight)).sum();
        total >= u64::from(self.threshold)
    }

    /// Whether `provided` keys carry enough weight.
    pub fn satisfied_by(&self, mut provided: impl FnMut(&PublicKey) -> bool) -> bool {
        let weight: u64 = self
            .keys
            .iter()
            .filter(|kw| provided(&kw.key))
            .map(|kw| u64::from(kw.weight))
            .sum();
        weight >= u64::from(self.threshold)
    }
}

/// A named permission of an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: u64,
    pub owner: Name,
    pub name: Name,
    /// Id of the parent permission. `owner` points at the reserved null
    /// permission, id 0.
    pub parent: u64,
    pub last_updated: BlockTimestamp,
    pub auth: Authority,
}

impl Permission {
    fn by_owner(&self, key: &mut KeyEncoder) {
        key.name(self.owner).name(self.name);
    }

    fn by_parent(&self, key: &mut KeyEncoder) {
        key.u64(self.parent);
    }
}

impl Entity for Permission {
    const OBJECT_TYPE: ObjectType = ObjectType::Permission;
    const INDEXES: &'static [IndexSpec<Self>] = &[
        primary_index::<Self>(),
        IndexSpec {
            name: "by_owner",
            fields: &["owner", "name"],
            unique: true,
            extract: Self::by_owner,
        },
        IndexSpec {
            name: "by_parent",
            fields: &["parent"],
            unique: false,
            extract: Self::by_parent,
        },
    ];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Per-account action counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSequence {
    pub id: u64,
    pub name: Name,
    pub recv_sequence: u64,
    pub auth_sequence: u64,
    pub code_sequence: u64,
    pub abi_sequence: u64,
}

impl AccountSequence {
    fn by_name(&self, key: &mut KeyEncoder) {
        key.name(self.name);
    }
}

impl Entity for AccountSequence {
    const OBJECT_TYPE: ObjectType = ObjectType::AccountSequence;
    const INDEXES: &'static [IndexSpec<Self>] = &[
        primary_index::<Self>(),
        IndexSpec {
            name: "by_name",
            fields: &["name"],
            unique: true,
            extract: Self::by_name,
        },
    ];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Chain-wide action counter. A singleton stored under id 0.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSequence {
    pub id: u64,
    pub global_action_sequence: u64,
}

impl Entity for GlobalSequence {
    const OBJECT_TYPE: ObjectType = ObjectType::GlobalSequence;
    const INDEXES: &'static [IndexSpec<Self>] = &[primary_index::<Self>()];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}
