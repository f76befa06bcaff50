//! The top-level engine: wires the store (B), authenticator (C), policy
//! engine (D) and persistence adapter (F) into the single object the
//! dispatcher (E) calls into. `Engine` is deliberately `!Sync` — it holds
//! no `Mutex`, unlike the teacher's file-scope `Mutex<Varstore>` static,
//! because spec.md §5's single-threaded cooperative event loop makes a
//! lock unnecessary; the type system enforces single-writer access
//! instead of a runtime lock nobody contends for.

use crate::attribute::EfiAttribute;
use crate::auth::{Authenticator, TrustRoots};
use crate::codec::{EfiTime, SignatureList};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::persistence::{Blobstore, PersistenceAdapter};
use crate::policy::{self, AttributeAdmission, SecureBootMode, VariableClass};
use crate::ucs2;
use crate::varstore::{VarStore, VariableRecord};

fn well_known(name: &str) -> Vec<u16> {
    ucs2::encode_ascii(name)
}

/// Reads a `bool` control variable (`SetupMode`, `AuditMode`,
/// `DeployedMode`) as UEFI firmware does: present with a non-zero first
/// byte means true, absent or zero means false.
fn read_bool_variable(store: &VarStore, name: &str) -> bool {
    store
        .record(&well_known(name), &crate::guid::EFI_GLOBAL_VARIABLE)
        .map(|r| r.data.first().copied().unwrap_or(0) != 0)
        .unwrap_or(false)
}

pub struct Engine<B: Blobstore> {
    store: VarStore,
    persistence: PersistenceAdapter<B>,
    config: EngineConfig,
    /// Set once a flush fails after a committed mutation. Spec.md §7:
    /// persistence failures are fatal — the engine refuses every
    /// subsequent write rather than rolling back the in-memory mutation
    /// that already happened, which would violate monotonicity from the
    /// guest's perspective.
    persistence_poisoned: bool,
}

impl<B: Blobstore> Engine<B> {
    pub fn load(blobstore: B, config: EngineConfig) -> Result<Engine<B>, EngineError> {
        let persistence =
            PersistenceAdapter::new(blobstore, config.persistence_object_name.clone());
        let store = persistence.load(config.max_storage, config.max_per_var)?;
        Ok(Engine {
            store,
            persistence,
            config,
            persistence_poisoned: false,
        })
    }

    pub fn is_runtime_phase(&self) -> bool {
        self.store.is_runtime_phase()
    }

    /// spec.md §4.E: one-way transition, triggered by the dispatcher.
    pub fn exit_boot_services(&mut self) {
        self.store.exit_boot_services();
    }

    fn secure_boot_mode(&self) -> SecureBootMode {
        let pk_present = self
            .store
            .record(&well_known("PK"), &crate::guid::EFI_GLOBAL_VARIABLE)
            .is_some();
        let audit_mode = read_bool_variable(&self.store, "AuditMode");
        let deployed_mode = read_bool_variable(&self.store, "DeployedMode");
        SecureBootMode::derive(pk_present, audit_mode, deployed_mode)
    }

    fn trust_roots(&self, cert_binding: Option<&crate::pkcs7::TrustedKey>) -> (TrustRoots<'_>, bool) {
        let mode = self.secure_boot_mode();
        let pk = self
            .store
            .record(&well_known("PK"), &crate::guid::EFI_GLOBAL_VARIABLE)
            .and_then(|r| SignatureList::parse_all(&r.data).ok());
        let kek = self
            .store
            .record(&well_known("KEK"), &crate::guid::EFI_GLOBAL_VARIABLE)
            .and_then(|r| SignatureList::parse_all(&r.data).ok());
        (
            TrustRoots {
                pk: pk.as_deref(),
                kek: kek.as_deref(),
                setup_mode: mode.setup_mode_flag(),
                cert_binding,
            },
            mode.setup_mode_flag(),
        )
    }

    pub fn get_variable(
        &self,
        name: &[u16],
        guid: &[u8; 16],
    ) -> Result<(EfiAttribute, &[u8]), EngineError> {
        self.store.get(name, guid)
    }

    pub fn get_next_variable(
        &self,
        prev: Option<(&[u16], &[u8; 16])>,
    ) -> Result<(Vec<u16>, [u8; 16]), EngineError> {
        self.store.next(prev)
    }

    pub fn query_variable_info(&self, attrs_mask: EfiAttribute) -> (u64, u64, u64) {
        self.store.query(attrs_mask)
    }

    /// `SetVariable` (spec.md §4.C/§4.D combined). `buf` is the raw bytes
    /// following the attributes in the command — either the payload
    /// directly, or (when `attrs` carries TBAW) an
    /// `EFI_VARIABLE_AUTHENTICATION_2` envelope wrapping it.
    pub fn set_variable(
        &mut self,
        name: &[u16],
        guid: &[u8; 16],
        attrs: EfiAttribute,
        buf: &[u8],
    ) -> Result<(), EngineError> {
        if self.persistence_poisoned {
            return Err(EngineError::PersistenceFailure(
                "persistence backend failed a prior flush; refusing further writes".to_string(),
            ));
        }
        if attrs.is_deprecated_authenticated() {
            return Err(EngineError::Unsupported("AUTHENTICATED_WRITE_ACCESS is deprecated"));
        }
        if attrs.runtime_without_bootservice() {
            return Err(EngineError::InvalidParameter("RUNTIME_ACCESS without BOOTSERVICE_ACCESS"));
        }

        let class = VariableClass::classify(name, guid);
        let existing = self.store.record(name, guid);

        match policy::check_attributes(attrs, existing.map(|r| r.attributes)) {
            AttributeAdmission::Allowed => {}
            AttributeAdmission::RejectedDeprecatedAuth => {
                return Err(EngineError::Unsupported("AUTHENTICATED_WRITE_ACCESS is deprecated"))
            }
            AttributeAdmission::RejectedRuntimeWithoutBootservice => {
                return Err(EngineError::InvalidParameter(
                    "RUNTIME_ACCESS without BOOTSERVICE_ACCESS",
                ))
            }
            AttributeAdmission::RejectedAttributeChange => {
                return Err(EngineError::InvalidParameter(
                    "attributes differ from existing record",
                ))
            }
        }

        if self.store.is_runtime_phase() {
            if !attrs.contains(EfiAttribute::NON_VOLATILE) {
                return Err(EngineError::WriteProtected);
            }
        }

        let is_append = attrs.contains(EfiAttribute::APPEND_WRITE);

        let (payload, timestamp): (Vec<u8>, Option<EfiTime>) = if attrs.is_time_based_authenticated() {
            let cert_binding = existing.and_then(|r| r.cert.as_ref());
            let (roots, _) = self.trust_roots(cert_binding);
            let existing_ts = existing.and_then(|r| r.timestamp);
            let (payload, ts) = Authenticator::verify(
                name,
                guid,
                attrs.bits(),
                class,
                buf,
                &roots,
                existing_ts,
                is_append,
            )?;
            (payload, Some(ts))
        } else if class.is_hierarchy_variable() {
            // Every hierarchy member always requires a
            // EFI_VARIABLE_AUTHENTICATION_2 envelope, even a first PK
            // write in SETUP mode (spec.md §4.D rule 2) — the "no trust
            // root required yet" exception lives inside
            // `Authenticator::verify`, which still demands a well-formed
            // envelope; it never means the envelope itself is optional.
            return Err(EngineError::SecurityViolation(
                "Secure Boot hierarchy variable requires TIME_BASED_AUTHENTICATED_WRITE_ACCESS",
            ));
        } else {
            (buf.to_vec(), None)
        };

        let final_data = if is_append {
            match existing {
                Some(existing_record) if class.is_hierarchy_variable() => {
                    merge_signature_lists(&existing_record.data, &payload)?
                }
                Some(existing_record) => {
                    let mut merged = existing_record.data.clone();
                    merged.extend_from_slice(&payload);
                    merged
                }
                None => payload,
            }
        } else {
            payload
        };

        let cert_binding = existing.and_then(|r| r.cert.clone());

        if final_data.is_empty() && !is_append {
            self.store.delete(name, guid)?;
        } else {
            self.store.put(
                name.to_vec(),
                *guid,
                VariableRecord {
                    attributes: attrs.storage_identity(),
                    data: final_data,
                    timestamp,
                    cert: cert_binding,
                },
            )?;
        }

        self.persistence.flush(&self.store).map_err(|err| {
            self.persistence_poisoned = true;
            err
        })
    }
}

/// spec.md §4.D admission rule 5: "signature-list variables merge at list
/// granularity (deduplicate by (SignatureType, entry-bytes))".
fn merge_signature_lists(existing: &[u8], incoming: &[u8]) -> Result<Vec<u8>, EngineError> {
    let mut lists = SignatureList::parse_all(existing)?;
    let incoming_lists = SignatureList::parse_all(incoming)?;

    for incoming_list in incoming_lists {
        match lists
            .iter_mut()
            .find(|l| l.signature_type == incoming_list.signature_type)
        {
            Some(existing_list) => {
                for entry in incoming_list.entries {
                    if !existing_list.entries.iter().any(|e| e.data == entry.data) {
                        existing_list.entries.push(entry);
                    }
                }
            }
            None => lists.push(incoming_list),
        }
    }
    Ok(crate::codec::serialize_lists(&lists))
}
