//! Snapshot persistence (spec.md §4.F).
//!
//! The engine's store is reconstructed from a single blob on startup and
//! flushed back after every committed mutation. `Blobstore` abstracts the
//! host-process-provided storage so the engine itself never touches a
//! filesystem path directly — the dispatcher's host process wires a
//! concrete implementation in, the same way the teacher's `varstore_shim`
//! left allocation and the VM's MMIO region to the caller.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::attribute::EfiAttribute;
use crate::codec::EfiTime;
use crate::error::EngineError;
use crate::pkcs7::TrustedKey;
use crate::varstore::{VarStore, VariableRecord};

pub trait Blobstore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, EngineError>;
    fn save(&self, name: &str, contents: &[u8]) -> Result<(), EngineError>;
}

/// Filesystem-backed blobstore. Writes go to a sibling temp file first and
/// are renamed into place, so a crash mid-write never leaves a half-written
/// snapshot where a reader could find it (spec.md §4.F: "a snapshot on disk
/// is always one that was fully written").
pub struct FsBlobstore {
    dir: PathBuf,
}

impl FsBlobstore {
    pub fn new(dir: impl Into<PathBuf>) -> FsBlobstore {
        FsBlobstore { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.bin"))
    }
}

impl Blobstore for FsBlobstore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, EngineError> {
        let path = self.path_for(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::PersistenceFailure(e.to_string())),
        }
    }

    fn save(&self, name: &str, contents: &[u8]) -> Result<(), EngineError> {
        let path = self.path_for(name);
        let tmp_path = self.dir.join(format!("{name}.bin.tmp"));
        let mut file = fs::File::create(&tmp_path)
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        file.write_all(contents)
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        file.sync_all()
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        fs::rename(&tmp_path, &path).map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        Ok(())
    }
}

/// Serializes every **non-volatile** record in `store` to the snapshot
/// wire format (spec.md §4.F: "the concatenation, for every NV record,
/// of ..."). Volatile records never reach disk, matching the lifecycle
/// rule that volatile data must not outlive the process.
///
/// ```text
/// repeated {
///     name_len: u32 (code units, not bytes)
///     name: [u16; name_len], little-endian
///     guid: [u8; 16]
///     attributes: u32
///     has_timestamp: u8 (0 or 1)
///     timestamp: [u8; 16] if has_timestamp
///     has_cert: u8 (0 or 1)
///     cert_len: u32, cert_der: [u8; cert_len], if has_cert
///     data_len: u32
///     data: [u8; data_len]
/// }
/// ```
pub fn serialize(store: &VarStore) -> Vec<u8> {
    let mut out = Vec::new();
    for ((name, guid), record) in store
        .iter()
        .filter(|(_, record)| record.attributes.contains(EfiAttribute::NON_VOLATILE))
    {
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        for unit in name {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out.extend_from_slice(guid);
        out.extend_from_slice(&record.attributes.bits().to_le_bytes());
        match &record.timestamp {
            Some(ts) => {
                out.push(1);
                out.extend_from_slice(&ts.to_bytes());
            }
            None => out.push(0),
        }
        match &record.cert {
            Some(cert) => {
                out.push(1);
                let der = cert.spki_der();
                out.extend_from_slice(&(der.len() as u32).to_le_bytes());
                out.extend_from_slice(der);
            }
            None => out.push(0),
        }
        out.extend_from_slice(&(record.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&record.data);
    }
    out
}

/// Rebuilds a `VarStore` from a snapshot blob. Any malformed trailing
/// bytes fail the whole load with `PersistenceFailure` rather than
/// silently dropping records — spec.md §4.F treats a snapshot as all-or-
/// nothing.
pub fn deserialize(
    buf: &[u8],
    max_storage: usize,
    max_per_var: usize,
) -> Result<VarStore, EngineError> {
    let mut store = VarStore::new(max_storage, max_per_var);
    let mut pos = 0usize;
    let bad = |msg: &'static str| EngineError::PersistenceFailure(msg.to_string());

    let take = |pos: &mut usize, n: usize| -> Result<&[u8], EngineError> {
        let end = pos.checked_add(n).ok_or_else(|| bad("length overflow"))?;
        if end > buf.len() {
            return Err(bad("snapshot truncated"));
        }
        let slice = &buf[*pos..end];
        *pos = end;
        Ok(slice)
    };

    while pos < buf.len() {
        let name_len = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
        let name_bytes = take(&mut pos, name_len * 2)?;
        let name: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let guid: [u8; 16] = take(&mut pos, 16)?.try_into().unwrap();
        let attr_bits = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap());
        let attributes = EfiAttribute::from_bits(attr_bits)
            .ok_or_else(|| bad("unknown attribute bits in snapshot"))?;

        let has_timestamp = take(&mut pos, 1)?[0];
        let timestamp = if has_timestamp == 1 {
            let ts_bytes = take(&mut pos, 16)?;
            let mut cursor = crate::codec::ByteCursor::new(ts_bytes);
            Some(EfiTime::parse(&mut cursor)?)
        } else {
            None
        };

        let has_cert = take(&mut pos, 1)?[0];
        let cert = if has_cert == 1 {
            let cert_len = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
            let der = take(&mut pos, cert_len)?;
            Some(TrustedKey::from_spki_der(der)?)
        } else {
            None
        };

        let data_len = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
        let data = take(&mut pos, data_len)?.to_vec();

        store.put(
            name,
            guid,
            VariableRecord {
                attributes,
                data,
                timestamp,
                cert,
            },
        )?;
    }
    Ok(store)
}

/// Convenience wrapper used by [`crate::engine::Engine`] to load at
/// startup and flush after every mutation.
pub struct PersistenceAdapter<B: Blobstore> {
    blobstore: B,
    object_name: String,
}

impl<B: Blobstore> PersistenceAdapter<B> {
    pub fn new(blobstore: B, object_name: impl Into<String>) -> PersistenceAdapter<B> {
        PersistenceAdapter {
            blobstore,
            object_name: object_name.into(),
        }
    }

    pub fn load(&self, max_storage: usize, max_per_var: usize) -> Result<VarStore, EngineError> {
        match self.blobstore.load(&self.object_name)? {
            Some(bytes) => deserialize(&bytes, max_storage, max_per_var),
            None => Ok(VarStore::new(max_storage, max_per_var)),
        }
    }

    pub fn flush(&self, store: &VarStore) -> Result<(), EngineError> {
        self.blobstore.save(&self.object_name, &serialize(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MemBlobstore {
        objects: RefCell<HashMap<String, Vec<u8>>>,
    }

    impl MemBlobstore {
        fn new() -> MemBlobstore {
            MemBlobstore {
                objects: RefCell::new(HashMap::new()),
            }
        }
    }

    impl Blobstore for MemBlobstore {
        fn load(&self, name: &str) -> Result<Option<Vec<u8>>, EngineError> {
            Ok(self.objects.borrow().get(name).cloned())
        }

        fn save(&self, name: &str, contents: &[u8]) -> Result<(), EngineError> {
            self.objects
                .borrow_mut()
                .insert(name.to_string(), contents.to_vec());
            Ok(())
        }
    }

    #[test]
    fn round_trips_store_through_snapshot() {
        let mut store = VarStore::new(64 * 1024, 32 * 1024);
        store
            .put(
                crate::ucs2::encode_ascii("Test1"),
                [9; 16],
                VariableRecord {
                    attributes: EfiAttribute::NON_VOLATILE | EfiAttribute::BOOTSERVICE_ACCESS,
                    data: vec![1, 2, 3],
                    timestamp: None,
                    cert: None,
                },
            )
            .unwrap();

        let bytes = serialize(&store);
        let restored = deserialize(&bytes, 64 * 1024, 32 * 1024).unwrap();
        let (attrs, data) = restored
            .get(&crate::ucs2::encode_ascii("Test1"), &[9; 16])
            .unwrap();
        assert_eq!(data, &[1, 2, 3]);
        assert!(attrs.contains(EfiAttribute::NON_VOLATILE));
    }

    #[test]
    fn volatile_records_are_excluded_from_the_snapshot() {
        let mut store = VarStore::new(64 * 1024, 32 * 1024);
        store
            .put(
                crate::ucs2::encode_ascii("Nv"),
                [1; 16],
                VariableRecord {
                    attributes: EfiAttribute::NON_VOLATILE | EfiAttribute::BOOTSERVICE_ACCESS,
                    data: vec![1],
                    timestamp: None,
                    cert: None,
                },
            )
            .unwrap();
        store
            .put(
                crate::ucs2::encode_ascii("Volatile"),
                [2; 16],
                VariableRecord {
                    attributes: EfiAttribute::BOOTSERVICE_ACCESS,
                    data: vec![2],
                    timestamp: None,
                    cert: None,
                },
            )
            .unwrap();

        let bytes = serialize(&store);
        let restored = deserialize(&bytes, 64 * 1024, 32 * 1024).unwrap();
        assert!(restored.get(&crate::ucs2::encode_ascii("Nv"), &[1; 16]).is_ok());
        assert!(matches!(
            restored.get(&crate::ucs2::encode_ascii("Volatile"), &[2; 16]),
            Err(EngineError::NotFound)
        ));
    }

    #[test]
    fn empty_snapshot_round_trips_to_empty_store() {
        let store = VarStore::new(1024, 1024);
        let bytes = serialize(&store);
        assert!(bytes.is_empty());
        let restored = deserialize(&bytes, 1024, 1024).unwrap();
        assert_eq!(restored.used_storage(), 0);
    }

    #[test]
    fn truncated_snapshot_fails_closed() {
        let err = deserialize(&[1, 0, 0, 0], 1024, 1024);
        assert!(matches!(err, Err(EngineError::PersistenceFailure(_))));
    }

    #[test]
    fn adapter_persists_across_load_cycles() {
        let blobstore = MemBlobstore::new();
        let adapter = PersistenceAdapter::new(blobstore, "test-object");
        let mut store = adapter.load(1024, 1024).unwrap();
        store
            .put(
                crate::ucs2::encode_ascii("X"),
                [1; 16],
                VariableRecord {
                    attributes: EfiAttribute::NON_VOLATILE | EfiAttribute::BOOTSERVICE_ACCESS,
                    data: vec![42],
                    timestamp: None,
                    cert: None,
                },
            )
            .unwrap();
        adapter.flush(&store).unwrap();

        let reloaded = adapter.load(1024, 1024).unwrap();
        let (_, data) = reloaded.get(&crate::ucs2::encode_ascii("X"), &[1; 16]).unwrap();
        assert_eq!(data, &[42]);
    }
}
