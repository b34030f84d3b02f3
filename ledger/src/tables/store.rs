//! Contract-facing table operations.
//!
//! [`TableStore`] creates and removes tables as rows come and go, keeps
//! each table's row count, and bills every row to its payer as it is
//! written. [`SecondaryIndex`] does the same for one secondary key flavour.
//! Every RAM change is reported to the [`RamBilling`] sink immediately;
//! quota checks happen when the enclosing transaction finishes.

use std::marker::PhantomData;

use tracing::debug;

use super::billing::{Billable, BillingConfig, RamBilling};
use super::objects::{
    F64Key, Key256, KeyValue, LongDouble, SecondaryIndexRow, SecondaryKey, Table,
};
use super::TableError;
use crate::chain::Name;
use crate::storage::{ChainStore, Direction, Entity, EntityIter, KeyEncoder, StoreError};

type Result<T> = std::result::Result<T, TableError>;

fn table_key(code: Name, scope: Name, table: Name) -> KeyEncoder {
    let mut key = KeyEncoder::new();
    key.name(code).name(scope).name(table);
    key
}

fn row_key(t_id: u64, primary_key: u64) -> KeyEncoder {
    let mut key = KeyEncoder::new();
    key.u64(t_id).u64(primary_key);
    key
}

/// Table access for one action, billing RAM to row payers.
pub struct TableStore<'a> {
    store: &'a ChainStore,
    ram: &'a mut dyn RamBilling,
    billing: &'a BillingConfig,
}

impl<'a> TableStore<'a> {
    pub fn new(store: &'a ChainStore, ram: &'a mut dyn RamBilling, billing: &'a BillingConfig) -> Self {
        Self { store, ram, billing }
    }

    fn charge<E: Billable>(&mut self, row: &E) -> Result<()> {
        let delta = self.billing.charge(row)?;
        self.ram.update_ram_usage(row.payer(), delta)?;
        Ok(())
    }

    fn refund<E: Billable>(&mut self, row: &E) -> Result<()> {
        let delta = self.billing.charge(row)?;
        self.ram.update_ram_usage(row.payer(), -delta)?;
        Ok(())
    }

    /// Bill a rewrite of `old` as `new`. A payer change refunds the old payer
    /// in full and charges the new one; otherwise only the size difference
    /// is billed.
    fn rebill<E: Billable>(&mut self, old: &E, new: &E) -> Result<()> {
        if old.payer() != new.payer() {
            self.refund(old)?;
            return self.charge(new);
        }
        let delta = self.billing.charge(new)? - self.billing.charge(old)?;
        if delta != 0 {
            self.ram.update_ram_usage(new.payer(), delta)?;
        }
        Ok(())
    }

    // -- Tables ---------------------------------------------------------------

    pub fn find_table(&self, code: Name, scope: Name, table: Name) -> Result<Option<Table>> {
        Ok(self
            .store
            .find_by("by_code_scope_table", &table_key(code, scope, table))?)
    }

    /// Existing table, or a new empty one billed to `payer`.
    pub fn find_or_create_table(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        payer: Name,
    ) -> Result<Table> {
        if let Some(existing) = self.find_table(code, scope, table)? {
            return Ok(existing);
        }
        let created = self.store.create::<Table>(|t| {
            t.code = code;
            t.scope = scope;
            t.table = table;
            t.payer = payer;
        })?;
        self.charge(&created)?;
        debug!(%code, %scope, %table, %payer, t_id = created.id, "table created");
        Ok(created)
    }

    fn table(&self, t_id: u64) -> Result<Table> {
        self.store
            .get(t_id)?
            .ok_or(TableError::TableNotFound(t_id))
    }

    fn adjust_count(&mut self, t_id: u64, increment: bool) -> Result<()> {
        let mut table = self.table(t_id)?;
        if increment {
            table.count = table.count.checked_add(1).ok_or(TableError::CountOverflow(t_id))?;
            self.store.put(&table)?;
            return Ok(());
        }
        table.count = table.count.saturating_sub(1);
        if table.count == 0 {
            self.store.delete::<Table>(t_id)?;
            self.refund(&table)?;
            debug!(code = %table.code, scope = %table.scope, table = %table.table, "table removed");
        } else {
            self.store.put(&table)?;
        }
        Ok(())
    }

    // -- Primary rows ---------------------------------------------------------

    /// Insert a row with a primary key not yet present in the table.
    pub fn store(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        payer: Name,
        primary_key: u64,
        value: &[u8],
    ) -> Result<KeyValue> {
        let tab = self.find_or_create_table(code, scope, table, payer)?;
        let row = KeyValue {
            id: self.store.next_id::<KeyValue>()?,
            t_id: tab.id,
            primary_key,
            payer,
            value: value.to_vec(),
        };
        self.store.insert(&row)?;
        self.adjust_count(tab.id, true)?;
        self.charge(&row)?;
        debug!(%code, %scope, %table, primary_key, bytes = value.len(), "row stored");
        Ok(row)
    }

    /// Replace a row's value and optionally its payer.
    pub fn update(&mut self, row_id: u64, payer: Option<Name>, value: &[u8]) -> Result<KeyValue> {
        let old: KeyValue = self.get(row_id)?;
        let new = KeyValue {
            payer: payer.unwrap_or(old.payer),
            value: value.to_vec(),
            ..old.clone()
        };
        self.store.put(&new)?;
        self.rebill(&old, &new)?;
        Ok(new)
    }

    /// Remove a row together with every secondary row pointing at it.
    pub fn remove(&mut self, row_id: u64) -> Result<()> {
        let row: KeyValue = self.get(row_id)?;
        self.remove_secondaries::<u64>(&row)?;
        self.remove_secondaries::<u128>(&row)?;
        self.remove_secondaries::<Key256>(&row)?;
        self.remove_secondaries::<F64Key>(&row)?;
        self.remove_secondaries::<LongDouble>(&row)?;

        self.store.delete::<KeyValue>(row_id)?;
        self.refund(&row)?;
        self.adjust_count(row.t_id, false)?;
        debug!(t_id = row.t_id, primary_key = row.primary_key, "row removed");
        Ok(())
    }

    fn remove_secondaries<K: SecondaryKey>(&mut self, row: &KeyValue) -> Result<()> {
        let key = row_key(row.t_id, row.primary_key);
        if let Some(secondary) = self
            .store
            .find_by::<SecondaryIndexRow<K>>("by_primary", &key)?
        {
            self.store.delete::<SecondaryIndexRow<K>>(secondary.id)?;
            self.refund(&secondary)?;
        }
        Ok(())
    }

    /// Row by store id.
    pub fn get(&self, row_id: u64) -> Result<KeyValue> {
        self.store.get(row_id)?.ok_or(TableError::Store(StoreError::NotFound {
            object_type: KeyValue::OBJECT_TYPE,
            id: row_id,
        }))
    }

    /// Row by table and primary key.
    pub fn find(&self, t_id: u64, primary_key: u64) -> Result<Option<KeyValue>> {
        Ok(self
            .store
            .find_by("by_scope_primary", &row_key(t_id, primary_key))?)
    }

    /// First row with a primary key at or above `primary_key`.
    pub fn lower_bound(&self, t_id: u64, primary_key: u64) -> Result<Option<KeyValue>> {
        let start = row_key(t_id, primary_key);
        first_in_table(
            self.store
                .iterate::<KeyValue>("by_scope_primary", start.as_bytes(), Direction::Forward)?,
            t_id,
            |row| row.t_id,
        )
    }

    /// First row with a primary key strictly above `primary_key`.
    pub fn upper_bound(&self, t_id: u64, primary_key: u64) -> Result<Option<KeyValue>> {
        match primary_key.checked_add(1) {
            Some(next) => self.lower_bound(t_id, next),
            None => Ok(None),
        }
    }

    /// Every row of a table in primary key order.
    pub fn rows(&self, t_id: u64, direction: Direction) -> Result<EntityIter<KeyValue>> {
        let mut prefix = KeyEncoder::new();
        prefix.u64(t_id);
        Ok(self
            .store
            .scan("by_scope_primary", prefix.as_bytes(), direction)?)
    }

    // -- Secondary indexes ----------------------------------------------------

    /// Handle on one secondary key flavour.
    pub fn secondary<K: SecondaryKey>(&mut self) -> SecondaryIndex<'_, 'a, K> {
        SecondaryIndex {
            tables: self,
            _key: PhantomData,
        }
    }

    pub fn idx64(&mut self) -> SecondaryIndex<'_, 'a, u64> {
        self.secondary()
    }

    pub fn idx128(&mut self) -> SecondaryIndex<'_, 'a, u128> {
        self.secondary()
    }

    pub fn idx256(&mut self) -> SecondaryIndex<'_, 'a, Key256> {
        self.secondary()
    }

    pub fn idx_double(&mut self) -> SecondaryIndex<'_, 'a, F64Key> {
        self.secondary()
    }

    pub fn idx_long_double(&mut self) -> SecondaryIndex<'_, 'a, LongDouble> {
        self.secondary()
    }
}

/// First entry of `iter` that still belongs to table `t_id`.
fn first_in_table<E: Entity>(
    mut iter: EntityIter<E>,
    t_id: u64,
    table_of: impl Fn(&E) -> u64,
) -> Result<Option<E>> {
    match iter.next() {
        Some(row) => {
            let row = row?;
            Ok((table_of(&row) == t_id).then_some(row))
        }
        None => Ok(None),
    }
}

/// Secondary index operations for key type `K`.
pub struct SecondaryIndex<'t, 'a, K> {
    tables: &'t mut TableStore<'a>,
    _key: PhantomData<K>,
}

impl<K: SecondaryKey> SecondaryIndex<'_, '_, K> {
    fn secondary_start(t_id: u64, secondary: &K) -> KeyEncoder {
        let mut key = KeyEncoder::new();
        key.u64(t_id);
        secondary.encode(&mut key);
        key
    }

    /// Index the primary row `primary_key` of `(code, scope, table)` under
    /// `secondary`. The primary row must exist.
    pub fn store(
        &mut self,
        code: Name,
        scope: Name,
        table: Name,
        payer: Name,
        primary_key: u64,
        secondary: K,
    ) -> Result<SecondaryIndexRow<K>> {
        if !secondary.is_storable() {
            return Err(TableError::NanSecondaryKey);
        }
        let tab = self
            .tables
            .find_table(code, scope, table)?
            .ok_or(TableError::MissingPrimaryRow {
                code,
                scope,
                table,
                primary_key,
            })?;
        if self.tables.find(tab.id, primary_key)?.is_none() {
            return Err(TableError::MissingPrimaryRow {
                code,
                scope,
                table,
                primary_key,
            });
        }

        let store = self.tables.store;
        let row = SecondaryIndexRow {
            id: store.next_id::<SecondaryIndexRow<K>>()?,
            t_id: tab.id,
            primary_key,
            payer,
            secondary_key: secondary,
        };
        store.insert(&row)?;
        self.tables.charge(&row)?;
        debug!(object_type = %K::OBJECT_TYPE, t_id = tab.id, primary_key, "secondary stored");
        Ok(row)
    }

    /// Change the secondary key and optionally the payer.
    pub fn update(
        &mut self,
        row_id: u64,
        payer: Option<Name>,
        secondary: K,
    ) -> Result<SecondaryIndexRow<K>> {
        if !secondary.is_storable() {
            return Err(TableError::NanSecondaryKey);
        }
        let old = self.get(row_id)?;
        let new = SecondaryIndexRow {
            payer: payer.unwrap_or(old.payer),
            secondary_key: secondary,
            ..old.clone()
        };
        self.tables.store.put(&new)?;
        self.tables.rebill(&old, &new)?;
        Ok(new)
    }

    pub fn remove(&mut self, row_id: u64) -> Result<()> {
        let row = self.tables.store.delete::<SecondaryIndexRow<K>>(row_id)?;
        self.tables.refund(&row)
    }

    pub fn get(&self, row_id: u64) -> Result<SecondaryIndexRow<K>> {
        self.tables.store.get(row_id)?.ok_or(TableError::Store(StoreError::NotFound {
            object_type: K::OBJECT_TYPE,
            id: row_id,
        }))
    }

    /// Lowest-primary-key row whose secondary key equals `secondary`.
    pub fn find_secondary(&self, t_id: u64, secondary: &K) -> Result<Option<SecondaryIndexRow<K>>> {
        Ok(self
            .lower_bound(t_id, secondary)?
            .filter(|row| row.secondary_key == *secondary))
    }

    /// Secondary row of the primary row `primary_key`.
    pub fn find_primary(&self, t_id: u64, primary_key: u64) -> Result<Option<SecondaryIndexRow<K>>> {
        Ok(self
            .tables
            .store
            .find_by("by_primary", &row_key(t_id, primary_key))?)
    }

    /// First row with a secondary key at or above `secondary`.
    pub fn lower_bound(&self, t_id: u64, secondary: &K) -> Result<Option<SecondaryIndexRow<K>>> {
        let start = Self::secondary_start(t_id, secondary);
        first_in_table(
            self.tables.store.iterate::<SecondaryIndexRow<K>>(
                "by_secondary",
                start.as_bytes(),
                Direction::Forward,
            )?,
            t_id,
            |row| row.t_id,
        )
    }

    /// First row with a secondary key strictly above `secondary`.
    pub fn upper_bound(&self, t_id: u64, secondary: &K) -> Result<Option<SecondaryIndexRow<K>>> {
        let start = Self::secondary_start(t_id, secondary);
        let iter = self.tables.store.iterate::<SecondaryIndexRow<K>>(
            "by_secondary",
            start.as_bytes(),
            Direction::Forward,
        )?;
        for row in iter {
            let row = row?;
            if row.t_id != t_id {
                return Ok(None);
            }
            let mut encoded = KeyEncoder::new();
            row.secondary_key.encode(&mut encoded);
            let mut wanted = KeyEncoder::new();
            secondary.encode(&mut wanted);
            if encoded != wanted {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Every row of a table in `(secondary, primary)` order.
    pub fn iter(&self, t_id: u64, direction: Direction) -> Result<EntityIter<SecondaryIndexRow<K>>> {
        let mut prefix = KeyEncoder::new();
        prefix.u64(t_id);
        Ok(self
            .tables
            .store
            .scan("by_secondary", prefix.as_bytes(), direction)?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::resource::ResourceError;
    use crate::storage::Schema;
    use crate::tables::{Index256, Index64};

    #[derive(Default)]
    struct Ledger(BTreeMap<Name, i64>);

    impl RamBilling for Ledger {
        fn update_ram_usage(&mut self, payer: Name, delta: i64) -> std::result::Result<(), ResourceError> {
            *self.0.entry(payer).or_default() += delta;
            Ok(())
        }
    }

    impl Ledger {
        fn of(&self, account: &str) -> i64 {
            self.0.get(&Name::new(account)).copied().unwrap_or(0)
        }
    }

    const CODE: Name = Name::new("token");
    const SCOPE: Name = Name::new("alice");
    const TABLE: Name = Name::new("accounts");
    const ALICE: Name = Name::new("alice");
    const BOB: Name = Name::new("bob");

    fn chain_store() -> ChainStore {
        ChainStore::open_temporary(Schema::chain().unwrap()).unwrap()
    }

    #[test]
    fn first_row_creates_table_and_bills_payer() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        let row = tables.store(CODE, SCOPE, TABLE, ALICE, 7, b"hello").unwrap();
        let table = tables.find_table(CODE, SCOPE, TABLE).unwrap().unwrap();
        assert_eq!(table.count, 1);
        assert_eq!(row.t_id, table.id);
        drop(tables);

        // table: align(44) + 2 * 32, row: align(37) + 2 * 32
        assert_eq!(ram.of("alice"), 112 + 112);
    }

    #[test]
    fn duplicate_primary_key_rejected() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        tables.store(CODE, SCOPE, TABLE, ALICE, 1, b"a").unwrap();
        let err = tables.store(CODE, SCOPE, TABLE, ALICE, 1, b"b").unwrap_err();
        assert!(matches!(
            err,
            TableError::Store(StoreError::DuplicateKey {
                index: "by_scope_primary",
                ..
            })
        ));
    }

    #[test]
    fn removing_last_row_drops_table_and_refunds() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        let a = tables.store(CODE, SCOPE, TABLE, ALICE, 1, b"a").unwrap();
        let b = tables.store(CODE, SCOPE, TABLE, ALICE, 2, b"b").unwrap();
        tables.remove(a.id).unwrap();
        assert_eq!(tables.find_table(CODE, SCOPE, TABLE).unwrap().unwrap().count, 1);
        tables.remove(b.id).unwrap();
        assert!(tables.find_table(CODE, SCOPE, TABLE).unwrap().is_none());
        drop(tables);
        assert_eq!(ram.of("alice"), 0);
    }

    #[test]
    fn update_bills_size_delta() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        let row = tables.store(CODE, SCOPE, TABLE, ALICE, 1, &[0u8; 5]).unwrap();
        tables.update(row.id, None, &[0u8; 40]).unwrap();
        drop(tables);
        // 37 -> 48 aligned, 72 -> 80 aligned
        assert_eq!(ram.of("alice"), 112 + 112 + 32);
    }

    #[test]
    fn payer_change_moves_the_whole_charge() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        let row = tables.store(CODE, SCOPE, TABLE, ALICE, 1, &[0u8; 5]).unwrap();
        let moved = tables.update(row.id, Some(BOB), &[0u8; 5]).unwrap();
        assert_eq!(moved.payer, BOB);
        drop(tables);
        assert_eq!(ram.of("alice"), 112);
        assert_eq!(ram.of("bob"), 112);
    }

    #[test]
    fn bounds_stay_inside_one_table() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        for pk in [10, 20, 30] {
            tables.store(CODE, SCOPE, TABLE, ALICE, pk, b"x").unwrap();
        }
        let other = tables
            .store(CODE, Name::new("bob"), TABLE, ALICE, 5, b"y")
            .unwrap();
        let t_id = tables.find_table(CODE, SCOPE, TABLE).unwrap().unwrap().id;

        assert_eq!(tables.lower_bound(t_id, 20).unwrap().unwrap().primary_key, 20);
        assert_eq!(tables.upper_bound(t_id, 20).unwrap().unwrap().primary_key, 30);
        assert!(tables.upper_bound(t_id, 30).unwrap().is_none());
        assert!(tables.upper_bound(t_id, u64::MAX).unwrap().is_none());
        assert_eq!(tables.find(other.t_id, 5).unwrap().unwrap().id, other.id);

        let forward: Vec<u64> = tables
            .rows(t_id, Direction::Forward)
            .unwrap()
            .map(|r| r.unwrap().primary_key)
            .collect();
        assert_eq!(forward, vec![10, 20, 30]);
        let reverse: Vec<u64> = tables
            .rows(t_id, Direction::Reverse)
            .unwrap()
            .map(|r| r.unwrap().primary_key)
            .collect();
        assert_eq!(reverse, vec![30, 20, 10]);
    }

    #[test]
    fn secondary_requires_primary_row() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        let err = tables
            .idx64()
            .store(CODE, SCOPE, TABLE, ALICE, 1, 99)
            .unwrap_err();
        assert!(matches!(err, TableError::MissingPrimaryRow { primary_key: 1, .. }));

        tables.store(CODE, SCOPE, TABLE, ALICE, 1, b"a").unwrap();
        tables.idx64().store(CODE, SCOPE, TABLE, ALICE, 1, 99).unwrap();
        let dup = tables
            .idx64()
            .store(CODE, SCOPE, TABLE, ALICE, 1, 100)
            .unwrap_err();
        assert!(matches!(
            dup,
            TableError::Store(StoreError::DuplicateKey { index: "by_primary", .. })
        ));
    }

    #[test]
    fn secondary_ties_order_by_primary_key() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        for (pk, balance) in [(3, 50u64), (1, 50), (2, 10), (4, 70)] {
            tables.store(CODE, SCOPE, TABLE, ALICE, pk, b"r").unwrap();
            tables.idx64().store(CODE, SCOPE, TABLE, ALICE, pk, balance).unwrap();
        }
        let t_id = tables.find_table(CODE, SCOPE, TABLE).unwrap().unwrap().id;
        let idx = tables.idx64();

        let order: Vec<(u64, u64)> = idx
            .iter(t_id, Direction::Forward)
            .unwrap()
            .map(|r| r.map(|r| (r.secondary_key, r.primary_key)).unwrap())
            .collect();
        assert_eq!(order, vec![(10, 2), (50, 1), (50, 3), (70, 4)]);

        assert_eq!(idx.find_secondary(t_id, &50).unwrap().unwrap().primary_key, 1);
        assert!(idx.find_secondary(t_id, &60).unwrap().is_none());
        assert_eq!(idx.lower_bound(t_id, &60).unwrap().unwrap().primary_key, 4);
        assert_eq!(idx.upper_bound(t_id, &50).unwrap().unwrap().primary_key, 4);
        assert!(idx.upper_bound(t_id, &70).unwrap().is_none());
        assert_eq!(idx.find_primary(t_id, 3).unwrap().unwrap().secondary_key, 50);
    }

    #[test]
    fn doubles_sort_numerically() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        for (pk, v) in [(1, 2.5), (2, -1.0), (3, 0.0), (4, -100.0)] {
            tables.store(CODE, SCOPE, TABLE, ALICE, pk, b"r").unwrap();
            tables
                .idx_double()
                .store(CODE, SCOPE, TABLE, ALICE, pk, F64Key(v))
                .unwrap();
        }
        let t_id = tables.find_table(CODE, SCOPE, TABLE).unwrap().unwrap().id;
        let pks: Vec<u64> = tables
            .idx_double()
            .iter(t_id, Direction::Forward)
            .unwrap()
            .map(|r| r.unwrap().primary_key)
            .collect();
        assert_eq!(pks, vec![4, 2, 3, 1]);
    }

    #[test]
    fn removing_primary_cascades_and_refunds() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        let row = tables.store(CODE, SCOPE, TABLE, ALICE, 1, b"a").unwrap();
        tables.idx64().store(CODE, SCOPE, TABLE, BOB, 1, 5).unwrap();
        tables
            .idx256()
            .store(CODE, SCOPE, TABLE, ALICE, 1, Key256([0, 9]))
            .unwrap();
        tables.remove(row.id).unwrap();

        assert_eq!(store.count::<Index64>().unwrap(), 0);
        assert_eq!(store.count::<Index256>().unwrap(), 0);
        drop(tables);
        assert_eq!(ram.of("alice"), 0);
        assert_eq!(ram.of("bob"), 0);
    }

    #[test]
    fn nan_secondary_keys_are_rejected() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        tables.store(CODE, SCOPE, TABLE, ALICE, 1, b"a").unwrap();
        assert!(matches!(
            tables.idx_double().store(CODE, SCOPE, TABLE, ALICE, 1, F64Key(f64::NAN)),
            Err(TableError::NanSecondaryKey)
        ));
        assert!(matches!(
            tables
                .idx_long_double()
                .store(CODE, SCOPE, TABLE, ALICE, 1, LongDouble::from_f64(f64::NAN)),
            Err(TableError::NanSecondaryKey)
        ));

        let sec = tables.idx_double().store(CODE, SCOPE, TABLE, ALICE, 1, F64Key(1.5)).unwrap();
        assert!(matches!(
            tables.idx_double().update(sec.id, None, F64Key(f64::NAN)),
            Err(TableError::NanSecondaryKey)
        ));
        assert_eq!(tables.idx_double().get(sec.id).unwrap().secondary_key, F64Key(1.5));
        assert!(!LongDouble::from_f64(f64::INFINITY).is_nan());
    }

    #[test]
    fn secondary_update_and_remove() {
        let store = chain_store();
        let billing = BillingConfig::default();
        let mut ram = Ledger::default();
        let mut tables = TableStore::new(&store, &mut ram, &billing);

        tables.store(CODE, SCOPE, TABLE, ALICE, 1, b"a").unwrap();
        let sec = tables.idx128().store(CODE, SCOPE, TABLE, ALICE, 1, 7).unwrap();
        let t_id = sec.t_id;
        tables.idx128().update(sec.id, Some(BOB), 8).unwrap();
        assert!(tables.idx128().find_secondary(t_id, &7).unwrap().is_none());
        assert_eq!(tables.idx128().find_secondary(t_id, &8).unwrap().unwrap().payer, BOB);
        tables.idx128().remove(sec.id).unwrap();
        assert!(tables.idx128().find_primary(t_id, 1).unwrap().is_none());
        drop(tables);
        assert_eq!(ram.of("bob"), 0);
    }
}
