//! Contract table rows.
//!
//! A table is identified by `(code, scope, table)`. Its primary rows are
//! [`KeyValue`] records keyed by a `u64`, and each secondary index flavour
//! is one instantiation of [`SecondaryIndexRow`] over a [`SecondaryKey`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::billing::Billable;
use crate::chain::Name;
use crate::storage::{primary_index, Entity, IndexSpec, KeyEncoder, ObjectType};

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: u64,
    pub code: Name,
    pub scope: Name,
    pub table: Name,
    pub payer: Name,
    /// Live primary rows.
    pub count: u32,
}

impl Table {
    fn by_code_scope_table(&self, key: &mut KeyEncoder) {
        key.name(self.code).name(self.scope).name(self.table);
    }
}

impl Entity for Table {
    const OBJECT_TYPE: ObjectType = ObjectType::Table;
    const INDEXES: &'static [IndexSpec<Self>] = &[
        primary_index::<Self>(),
        IndexSpec {
            name: "by_code_scope_table",
            fields: &["code", "scope", "table"],
            unique: true,
            extract: Self::by_code_scope_table,
        },
    ];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Billable for Table {
    fn footprint(&self) -> u64 {
        44
    }

    fn payer(&self) -> Name {
        self.payer
    }
}

// ---------------------------------------------------------------------------
// KeyValue
// ---------------------------------------------------------------------------

/// A primary row. `value` is opaque contract data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub id: u64,
    pub t_id: u64,
    pub primary_key: u64,
    pub payer: Name,
    pub value: Vec<u8>,
}

impl KeyValue {
    fn by_scope_primary(&self, key: &mut KeyEncoder) {
        key.u64(self.t_id).u64(self.primary_key);
    }
}

impl Entity for KeyValue {
    const OBJECT_TYPE: ObjectType = ObjectType::KeyValue;
    const INDEXES: &'static [IndexSpec<Self>] = &[
        primary_index::<Self>(),
        IndexSpec {
            name: "by_scope_primary",
            fields: &["t_id", "primary_key"],
            unique: true,
            extract: Self::by_scope_primary,
        },
    ];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl Billable for KeyValue {
    fn footprint(&self) -> u64 {
        32 + self.value.len() as u64
    }

    fn payer(&self) -> Name {
        self.payer
    }
}

// ---------------------------------------------------------------------------
// Secondary keys
// ---------------------------------------------------------------------------

/// A fixed-width, totally ordered secondary key type.
pub trait SecondaryKey:
    Copy + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const OBJECT_TYPE: ObjectType;
    /// Encoded width in bytes, used for billing.
    const WIDTH: u64;

    fn encode(&self, key: &mut KeyEncoder);

    /// Whether the key may be stored. Floating-point NaN never can.
    fn is_storable(&self) -> bool {
        true
    }
}

impl SecondaryKey for u64 {
    const OBJECT_TYPE: ObjectType = ObjectType::Index64;
    const WIDTH: u64 = 8;

    fn encode(&self, key: &mut KeyEncoder) {
        key.u64(*self);
    }
}

impl SecondaryKey for u128 {
    const OBJECT_TYPE: ObjectType = ObjectType::Index128;
    const WIDTH: u64 = 16;

    fn encode(&self, key: &mut KeyEncoder) {
        key.u128(*self);
    }
}

/// 256-bit key as two words, high word first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key256(pub [u128; 2]);

impl Key256 {
    /// Interpret 32 bytes as a big-endian 256-bit integer.
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        let mut hi = [0u8; 16];
        let mut lo = [0u8; 16];
        hi.copy_from_slice(&bytes[..16]);
        lo.copy_from_slice(&bytes[16..]);
        Self([u128::from_be_bytes(hi), u128::from_be_bytes(lo)])
    }
}

impl SecondaryKey for Key256 {
    const OBJECT_TYPE: ObjectType = ObjectType::Index256;
    const WIDTH: u64 = 32;

    fn encode(&self, key: &mut KeyEncoder) {
        key.key256(self.0);
    }
}

/// Double-precision key, ordered by IEEE-754 total order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct F64Key(pub f64);

impl SecondaryKey for F64Key {
    const OBJECT_TYPE: ObjectType = ObjectType::IndexDouble;
    const WIDTH: u64 = 8;

    fn encode(&self, key: &mut KeyEncoder) {
        key.f64(self.0);
    }

    fn is_storable(&self) -> bool {
        !self.0.is_nan()
    }
}

/// IEEE-754 binary128 key held as its 16 little-endian bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongDouble(pub [u8; 16]);

impl LongDouble {
    /// Widen an `f64` exactly. NaN payloads are not preserved.
    pub fn from_f64(v: f64) -> Self {
        let bits = v.to_bits();
        let sign = u128::from(bits >> 63);
        let exp = ((bits >> 52) & 0x7ff) as i32;
        let frac = u128::from(bits & ((1u64 << 52) - 1));

        let (exp128, frac128): (u128, u128) = match exp {
            0 if frac == 0 => (0, 0),
            0 => {
                // Subnormal: normalise into the wider exponent range.
                let shift = frac.leading_zeros() - (128 - 52);
                let normal = (frac << (shift + 1)) & ((1u128 << 52) - 1);
                ((16383 - 1022 - shift as i32 - 1) as u128, normal << 60)
            }
            0x7ff if frac == 0 => (0x7fff, 0),
            0x7ff => (0x7fff, 1u128 << 111),
            _ => ((exp - 1023 + 16383) as u128, frac << 60),
        };
        let bits = (sign << 127) | (exp128 << 112) | frac128;
        Self(bits.to_le_bytes())
    }
}

impl LongDouble {
    /// All-ones exponent with a non-zero fraction.
    pub fn is_nan(&self) -> bool {
        let bits = u128::from_le_bytes(self.0);
        let exp = (bits >> 112) & 0x7fff;
        let frac = bits & ((1u128 << 112) - 1);
        exp == 0x7fff && frac != 0
    }
}

impl SecondaryKey for LongDouble {
    const OBJECT_TYPE: ObjectType = ObjectType::IndexLongDouble;
    const WIDTH: u64 = 16;

    fn encode(&self, key: &mut KeyEncoder) {
        key.binary128(self.0);
    }

    fn is_storable(&self) -> bool {
        !self.is_nan()
    }
}

// ---------------------------------------------------------------------------
// SecondaryIndexRow
// ---------------------------------------------------------------------------

/// One secondary index entry, pointing at the primary row of the same table
/// with the same `primary_key`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecondaryIndexRow<K> {
    pub id: u64,
    pub t_id: u64,
    pub primary_key: u64,
    pub payer: Name,
    pub secondary_key: K,
}

impl<K: SecondaryKey> SecondaryIndexRow<K> {
    fn by_primary(&self, key: &mut KeyEncoder) {
        key.u64(self.t_id).u64(self.primary_key);
    }

    fn by_secondary(&self, key: &mut KeyEncoder) {
        key.u64(self.t_id);
        self.secondary_key.encode(key);
        key.u64(self.primary_key);
    }
}

impl<K: SecondaryKey> Entity for SecondaryIndexRow<K> {
    const OBJECT_TYPE: ObjectType = K::OBJECT_TYPE;
    const INDEXES: &'static [IndexSpec<Self>] = &[
        primary_index::<Self>(),
        IndexSpec {
            name: "by_primary",
            fields: &["t_id", "primary_key"],
            unique: true,
            extract: Self::by_primary,
        },
        IndexSpec {
            name: "by_secondary",
            fields: &["t_id", "secondary_key", "primary_key"],
            unique: false,
            extract: Self::by_secondary,
        },
    ];

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

impl<K: SecondaryKey> Billable for SecondaryIndexRow<K> {
    fn footprint(&self) -> u64 {
        32 + K::WIDTH
    }

    fn payer(&self) -> Name {
        self.payer
    }
}

pub type Index64 = SecondaryIndexRow<u64>;
pub type Index128 = SecondaryIndexRow<u128>;
pub type Index256 = SecondaryIndexRow<Key256>;
pub type IndexDouble = SecondaryIndexRow<F64Key>;
pub type IndexLongDouble = SecondaryIndexRow<LongDouble>;
