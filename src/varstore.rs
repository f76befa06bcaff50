//! In-memory variable store (spec.md §4.B).
//!
//! Holds every record the engine knows about, keyed by `(name, vendor
//! GUID)`, and tracks the aggregate storage quota. This module only
//! implements the store's own invariants (visibility, ordering, quota
//! accounting); attribute admission and authentication are layered on top
//! by [`crate::engine::Engine`], which is the only caller of the mutating
//! methods here — the store itself never consults the policy engine or
//! the authenticator (spec.md §4.B/§7: "the store commits only after all
//! checks pass").

use std::collections::BTreeMap;

use crate::attribute::EfiAttribute;
use crate::codec::EfiTime;
use crate::error::EngineError;
use crate::pkcs7::TrustedKey;

pub type VariableKey = (Vec<u16>, [u8; 16]);

#[derive(Debug, Clone)]
pub struct VariableRecord {
    pub attributes: EfiAttribute,
    pub data: Vec<u8>,
    /// Present iff `TIME_BASED_AUTHENTICATED_WRITE_ACCESS` is set
    /// (spec.md §3).
    pub timestamp: Option<EfiTime>,
    /// Trusted signer key bound to this variable for `ENHANCED_AUTHENTICATED_ACCESS`
    /// writes (spec.md §3, §4.C step 3).
    pub cert: Option<TrustedKey>,
}

impl VariableRecord {
    pub fn storage_size(name: &[u16], data_len: usize) -> usize {
        name.len() * 2 + data_len
    }
}

pub struct VarStore {
    records: BTreeMap<VariableKey, VariableRecord>,
    runtime_phase: bool,
    max_storage: usize,
    max_per_var: usize,
    used_storage: usize,
}

impl VarStore {
    pub fn new(max_storage: usize, max_per_var: usize) -> VarStore {
        VarStore {
            records: BTreeMap::new(),
            runtime_phase: false,
            max_storage,
            max_per_var,
            used_storage: 0,
        }
    }

    pub fn is_runtime_phase(&self) -> bool {
        self.runtime_phase
    }

    /// One-way transition on `ExitBootServices` (spec.md §4.E). Calling
    /// this more than once is a no-op, since the dispatcher is expected
    /// to enforce the one-way rule itself; the store just reflects it.
    pub fn exit_boot_services(&mut self) {
        self.runtime_phase = true;
    }

    fn visible(&self, key: &VariableKey) -> Option<&VariableRecord> {
        let record = self.records.get(key)?;
        if self.runtime_phase && !record.attributes.contains(EfiAttribute::RUNTIME_ACCESS) {
            return None;
        }
        Some(record)
    }

    pub fn get(&self, name: &[u16], guid: &[u8; 16]) -> Result<(EfiAttribute, &[u8]), EngineError> {
        let key = (name.to_vec(), *guid);
        match self.visible(&key) {
            Some(record) => Ok((record.attributes, record.data.as_slice())),
            None => Err(EngineError::NotFound),
        }
    }

    pub fn record(&self, name: &[u16], guid: &[u8; 16]) -> Option<&VariableRecord> {
        self.visible(&(name.to_vec(), *guid))
    }

    /// Enumerates the next record after `(prev_name, prev_guid)` in the
    /// store's stable key order (spec.md §4.B: BTreeMap iteration order
    /// depends only on the key, never on request history, so a traversal
    /// interleaved with mutations can miss or see a new record but never
    /// yields one twice).
    pub fn next(
        &self,
        prev: Option<(&[u16], &[u8; 16])>,
    ) -> Result<(Vec<u16>, [u8; 16]), EngineError> {
        let mut iter = match prev {
            None => self.records.keys(),
            Some((name, guid)) => {
                let key = (name.to_vec(), *guid);
                if !self.records.contains_key(&key) {
                    return Err(EngineError::InvalidParameter("unknown previous variable"));
                }
                let mut it = self.records.keys();
                for k in it.by_ref() {
                    if *k == key {
                        break;
                    }
                }
                it
            }
        };
        loop {
            match iter.next() {
                None => return Err(EngineError::NotFound),
                Some(key) => {
                    if self.visible(key).is_some() {
                        return Ok(key.clone());
                    }
                }
            }
        }
    }

    /// `QueryVariableInfo` (spec.md §4.B): storage counted as the sum,
    /// over records matching `attrs_mask`, of `2*len(name) + len(data)`.
    pub fn query(&self, attrs_mask: EfiAttribute) -> (u64, u64, u64) {
        let matching: u64 = self
            .records
            .iter()
            .filter(|(_, record)| record.attributes.intersects(attrs_mask) || attrs_mask.is_empty())
            .map(|((name, _), record)| VariableRecord::storage_size(name, record.data.len()) as u64)
            .sum();
        let max_storage = self.max_storage as u64;
        let remaining = max_storage.saturating_sub(matching);
        (max_storage, remaining, self.max_per_var as u64)
    }

    pub fn max_per_var(&self) -> usize {
        self.max_per_var
    }

    pub fn remaining_storage(&self) -> usize {
        self.max_storage.saturating_sub(self.used_storage)
    }

    /// Reserves `additional` bytes against the global quota, failing
    /// with `OUT_OF_RESOURCES` before any mutation is applied (spec.md
    /// §4.B: "overflow short-circuits ... before any mutation is
    /// applied").
    fn try_reserve(&mut self, additional: usize) -> Result<(), EngineError> {
        let new_total = self
            .used_storage
            .checked_add(additional)
            .ok_or(EngineError::OutOfResources)?;
        if new_total > self.max_storage {
            return Err(EngineError::OutOfResources);
        }
        self.used_storage = new_total;
        Ok(())
    }

    fn release(&mut self, amount: usize) {
        self.used_storage = self.used_storage.saturating_sub(amount);
    }

    /// Inserts or replaces a record, adjusting the quota by the delta
    /// between the old and new storage footprint. Callers (the engine)
    /// must have already performed attribute/authentication admission —
    /// this method only enforces the quota and per-variable size limit.
    pub fn put(
        &mut self,
        name: Vec<u16>,
        guid: [u8; 16],
        record: VariableRecord,
    ) -> Result<(), EngineError> {
        let new_size = VariableRecord::storage_size(&name, record.data.len());
        if new_size > self.max_per_var {
            return Err(EngineError::OutOfResources);
        }
        let key = (name, guid);
        let old_size = self
            .records
            .get(&key)
            .map(|r| VariableRecord::storage_size(&key.0, r.data.len()))
            .unwrap_or(0);

        if new_size > old_size {
            self.try_reserve(new_size - old_size)?;
        } else {
            self.release(old_size - new_size);
        }
        self.records.insert(key, record);
        Ok(())
    }

    /// Deletes a record, returning its storage footprint to the quota
    /// pool (spec.md §3 lifecycle).
    pub fn delete(&mut self, name: &[u16], guid: &[u8; 16]) -> Result<(), EngineError> {
        let key = (name.to_vec(), *guid);
        match self.records.remove(&key) {
            Some(record) => {
                self.release(VariableRecord::storage_size(&key.0, record.data.len()));
                Ok(())
            }
            None => Err(EngineError::NotFound),
        }
    }

    /// Iterates every record, for the persistence adapter's snapshot
    /// (spec.md §4.F) and for trust-root lookups in the engine.
    pub fn iter(&self) -> impl Iterator<Item = (&VariableKey, &VariableRecord)> {
        self.records.iter()
    }

    pub fn used_storage(&self) -> usize {
        self.used_storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID_A: [u8; 16] = [1; 16];

    fn name(s: &str) -> Vec<u16> {
        crate::ucs2::encode_ascii(s)
    }

    fn simple_record(data: &[u8]) -> VariableRecord {
        VariableRecord {
            attributes: EfiAttribute::NON_VOLATILE | EfiAttribute::BOOTSERVICE_ACCESS,
            data: data.to_vec(),
            timestamp: None,
            cert: None,
        }
    }

    #[test]
    fn put_then_get() {
        let mut store = VarStore::new(64 * 1024, 32 * 1024);
        store
            .put(name("Test1"), GUID_A, simple_record(&[1, 2, 3, 4]))
            .unwrap();
        let (attrs, data) = store.get(&name("Test1"), &GUID_A).unwrap();
        assert_eq!(data, &[1, 2, 3, 4]);
        assert!(attrs.contains(EfiAttribute::NON_VOLATILE));
    }

    #[test]
    fn next_enumerates_without_duplicates_or_gaps() {
        let mut store = VarStore::new(64 * 1024, 32 * 1024);
        for n in ["Test_1", "Test_2", "Test_3", "Test_4"] {
            store.put(name(n), GUID_A, simple_record(&[1])).unwrap();
        }
        let mut seen = Vec::new();
        let mut cursor: Option<(Vec<u16>, [u8; 16])> = None;
        loop {
            let prev_ref = cursor.as_ref().map(|(n, g)| (n.as_slice(), g));
            match store.next(prev_ref) {
                Ok((n, g)) => {
                    seen.push(n.clone());
                    cursor = Some((n, g));
                }
                Err(EngineError::NotFound) => break,
                Err(e) => panic!("unexpected error {e:?}"),
            }
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn runtime_phase_hides_bootservice_only_variables() {
        let mut store = VarStore::new(64 * 1024, 32 * 1024);
        store.put(name("BsOnly"), GUID_A, simple_record(&[1])).unwrap();
        let rt_record = VariableRecord {
            attributes: EfiAttribute::BOOTSERVICE_ACCESS | EfiAttribute::RUNTIME_ACCESS,
            data: vec![2],
            timestamp: None,
            cert: None,
        };
        store.put(name("Rt"), GUID_A, rt_record).unwrap();

        assert!(store.get(&name("BsOnly"), &GUID_A).is_ok());
        store.exit_boot_services();
        assert!(matches!(
            store.get(&name("BsOnly"), &GUID_A),
            Err(EngineError::NotFound)
        ));
        assert!(store.get(&name("Rt"), &GUID_A).is_ok());
    }

    #[test]
    fn quota_tracks_insert_update_and_delete() {
        let mut store = VarStore::new(100, 100);
        store.put(name("A"), GUID_A, simple_record(&[0; 10])).unwrap();
        let used_after_insert = store.used_storage();
        assert_eq!(used_after_insert, 2 /* "A" */ + 10);

        store.put(name("A"), GUID_A, simple_record(&[0; 20])).unwrap();
        assert_eq!(store.used_storage(), 2 + 20);

        store.delete(&name("A"), &GUID_A).unwrap();
        assert_eq!(store.used_storage(), 0);
    }

    #[test]
    fn quota_overflow_rejected_before_mutation() {
        let mut store = VarStore::new(16, 32 * 1024);
        let err = store.put(name("Big"), GUID_A, simple_record(&[0; 100]));
        assert!(matches!(err, Err(EngineError::OutOfResources)));
        assert_eq!(store.used_storage(), 0);
        assert!(store.get(&name("Big"), &GUID_A).is_err());
    }
}
