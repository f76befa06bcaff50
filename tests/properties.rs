//! Property tests for the universal invariants in spec.md §8: the quota
//! bound and persistence round-tripping. These don't touch the
//! authenticator, so they exercise only non-hierarchy, non-TBAW
//! variables — unauthenticated writes are exactly the path spec.md §4.D
//! admission rule 3 leaves open for ordinary variables.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use proptest::prelude::*;

use rs_uefi_varstore::attribute::EfiAttribute;
use rs_uefi_varstore::config::EngineConfig;
use rs_uefi_varstore::engine::Engine;
use rs_uefi_varstore::error::EngineError;
use rs_uefi_varstore::persistence::Blobstore;

#[derive(Clone)]
struct MemBlobstore {
    objects: Rc<RefCell<HashMap<String, Vec<u8>>>>,
}

impl MemBlobstore {
    fn new() -> MemBlobstore {
        MemBlobstore {
            objects: Rc::new(RefCell::new(HashMap::new())),
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

fn name_for(index: usize) -> Vec<u16> {
    rs_uefi_varstore::ucs2::encode_ascii(&format!("Var{index}"))
}

proptest! {
    /// spec.md §8 universal property 5: the sum of `2*len(name)+len(data)`
    /// over every record never exceeds `MaxStorage`.
    #[test]
    fn quota_never_exceeds_max_storage(
        sizes in prop::collection::vec(0usize..2048, 1..20),
    ) {
        let config = EngineConfig { max_storage: 8192, max_per_var: 4096, ..EngineConfig::default() };
        let mut engine = Engine::load(MemBlobstore::new(), config).unwrap();

        for (i, size) in sizes.into_iter().enumerate() {
            let data = vec![0xAAu8; size];
            let _ = engine.set_variable(
                &name_for(i),
                &[i as u8; 16],
                EfiAttribute::NON_VOLATILE | EfiAttribute::BOOTSERVICE_ACCESS,
                &data,
            );
            let (max_storage, remaining, _) = engine.query_variable_info(EfiAttribute::empty());
            prop_assert!(max_storage - remaining <= max_storage);
        }
    }

    /// spec.md §8 universal property 1: a snapshot load after a save
    /// reproduces exactly what was there before the save.
    #[test]
    fn persistence_round_trips_after_every_write(
        payload in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let blobstore = MemBlobstore::new();
        let config = EngineConfig::default();
        let guid = [7u8; 16];
        let name = rs_uefi_varstore::ucs2::encode_ascii("RoundTrip");

        {
            let mut engine = Engine::load(blobstore.clone(), config.clone()).unwrap();
            engine
                .set_variable(
                    &name,
                    &guid,
                    EfiAttribute::NON_VOLATILE | EfiAttribute::BOOTSERVICE_ACCESS,
                    &payload,
                )
                .unwrap();
        }

        // A fresh engine loading the same backing blobstore must see
        // exactly what the first engine wrote.
        let reloaded = Engine::load(blobstore, config).unwrap();
        let (_, data) = reloaded.get_variable(&name, &guid).unwrap();
        prop_assert_eq!(data, payload.as_slice());
    }
}
