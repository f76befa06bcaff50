//! Policy engine: attribute admission rules and the Secure Boot mode
//! state machine (spec.md §4.D). The mode is always derived from the
//! current contents of the store, never cached — eliminating the kind of
//! hidden global state spec.md §9's first design note calls out.

use crate::attribute::EfiAttribute;
use crate::guid::{EFI_GLOBAL_VARIABLE, EFI_IMAGE_SECURITY_DATABASE};
use crate::ucs2;

/// Which part of the Secure Boot hierarchy a (name, vendor_guid) pair
/// identifies, if any. Drives trust-root selection in
/// [`crate::auth::Authenticator`] and the "always requires TBAW" rule in
/// admission rule 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableClass {
    Pk,
    Kek,
    /// db, dbx, dbt or dbr — all trusted by PK or any KEK certificate.
    SignatureDb,
    SetupMode,
    AuditMode,
    DeployedMode,
    SecureBoot,
    Other,
}

fn name_matches(name: &[u16], ascii: &str) -> bool {
    name == ucs2::encode_ascii(ascii).as_slice()
}

impl VariableClass {
    pub fn classify(name: &[u16], vendor_guid: &[u8; 16]) -> VariableClass {
        if *vendor_guid == EFI_GLOBAL_VARIABLE {
            if name_matches(name, "PK") {
                return VariableClass::Pk;
            }
            if name_matches(name, "KEK") {
                return VariableClass::Kek;
            }
            if name_matches(name, "SetupMode") {
                return VariableClass::SetupMode;
            }
            if name_matches(name, "AuditMode") {
                return VariableClass::AuditMode;
            }
            if name_matches(name, "DeployedMode") {
                return VariableClass::DeployedMode;
            }
            if name_matches(name, "SecureBoot") {
                return VariableClass::SecureBoot;
            }
        }
        if *vendor_guid == EFI_IMAGE_SECURITY_DATABASE
            && (name_matches(name, "db")
                || name_matches(name, "dbx")
                || name_matches(name, "dbt")
                || name_matches(name, "dbr"))
        {
            return VariableClass::SignatureDb;
        }
        VariableClass::Other
    }

    /// Spec.md §3, invariant 5 and §4.D admission rule 2: every member of
    /// the Secure Boot hierarchy proper (not the mode-control booleans)
    /// must carry TBAW+NV+BS+RT and always requires authentication,
    /// except PK in SETUP mode.
    pub fn is_hierarchy_variable(self) -> bool {
        matches!(
            self,
            VariableClass::Pk | VariableClass::Kek | VariableClass::SignatureDb
        )
    }
}

/// Secure Boot mode, derived — never stored — from PK's presence and the
/// AuditMode/DeployedMode control variables (spec.md §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureBootMode {
    Setup,
    User,
    Audit,
    Deployed,
}

impl SecureBootMode {
    pub fn derive(pk_present: bool, audit_mode: bool, deployed_mode: bool) -> SecureBootMode {
        if !pk_present {
            return SecureBootMode::Setup;
        }
        if audit_mode {
            return SecureBootMode::Audit;
        }
        if deployed_mode {
            return SecureBootMode::Deployed;
        }
        SecureBootMode::User
    }

    pub fn secure_boot_flag(self) -> bool {
        matches!(self, SecureBootMode::User | SecureBootMode::Deployed)
    }

    pub fn setup_mode_flag(self) -> bool {
        matches!(self, SecureBootMode::Setup | SecureBootMode::Audit)
    }
}

/// Outcome of the attribute-compatibility check for a prospective write
/// against an existing record (spec.md §3 invariant 1, §4.D rule 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeAdmission {
    Allowed,
    RejectedDeprecatedAuth,
    RejectedRuntimeWithoutBootservice,
    RejectedAttributeChange,
}

/// Checks a prospective write's attributes against an (optional) existing
/// record's attributes. Does not consult authentication or quota — those
/// are separate checks layered by [`crate::engine::Engine`].
pub fn check_attributes(
    requested: EfiAttribute,
    existing: Option<EfiAttribute>,
) -> AttributeAdmission {
    if requested.is_deprecated_authenticated() {
        return AttributeAdmission::RejectedDeprecatedAuth;
    }
    if requested.runtime_without_bootservice() {
        return AttributeAdmission::RejectedRuntimeWithoutBootservice;
    }
    if let Some(existing) = existing {
        if requested.storage_identity() != existing.storage_identity() {
            return AttributeAdmission::RejectedAttributeChange;
        }
    }
    AttributeAdmission::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_pk_and_kek() {
        assert_eq!(
            VariableClass::classify(&ucs2::encode_ascii("PK"), &EFI_GLOBAL_VARIABLE),
            VariableClass::Pk
        );
        assert_eq!(
            VariableClass::classify(&ucs2::encode_ascii("KEK"), &EFI_GLOBAL_VARIABLE),
            VariableClass::Kek
        );
    }

    #[test]
    fn classifies_db_family_under_image_security_database() {
        for name in ["db", "dbx", "dbt", "dbr"] {
            assert_eq!(
                VariableClass::classify(&ucs2::encode_ascii(name), &EFI_IMAGE_SECURITY_DATABASE),
                VariableClass::SignatureDb
            );
        }
    }

    #[test]
    fn same_name_under_wrong_guid_is_other() {
        assert_eq!(
            VariableClass::classify(&ucs2::encode_ascii("PK"), &EFI_IMAGE_SECURITY_DATABASE),
            VariableClass::Other
        );
    }

    #[test]
    fn mode_derivation() {
        assert_eq!(SecureBootMode::derive(false, false, false), SecureBootMode::Setup);
        assert_eq!(SecureBootMode::derive(true, false, false), SecureBootMode::User);
        assert_eq!(SecureBootMode::derive(true, true, false), SecureBootMode::Audit);
        assert_eq!(SecureBootMode::derive(true, false, true), SecureBootMode::Deployed);
    }

    #[test]
    fn mode_flags() {
        assert!(SecureBootMode::User.secure_boot_flag());
        assert!(!SecureBootMode::Setup.secure_boot_flag());
        assert!(SecureBootMode::Setup.setup_mode_flag());
        assert!(!SecureBootMode::User.setup_mode_flag());
    }

    #[test]
    fn rejects_deprecated_authenticated_write() {
        assert_eq!(
            check_attributes(EfiAttribute::AUTHENTICATED_WRITE_ACCESS, None),
            AttributeAdmission::RejectedDeprecatedAuth
        );
    }

    #[test]
    fn rejects_runtime_without_bootservice() {
        assert_eq!(
            check_attributes(EfiAttribute::RUNTIME_ACCESS, None),
            AttributeAdmission::RejectedRuntimeWithoutBootservice
        );
    }

    #[test]
    fn rejects_attribute_change_but_allows_append_toggle() {
        let existing = EfiAttribute::NON_VOLATILE | EfiAttribute::BOOTSERVICE_ACCESS;
        let changed = existing | EfiAttribute::RUNTIME_ACCESS;
        assert_eq!(
            check_attributes(changed, Some(existing)),
            AttributeAdmission::RejectedAttributeChange
        );

        let appended = existing | EfiAttribute::APPEND_WRITE;
        assert_eq!(
            check_attributes(appended, Some(existing)),
            AttributeAdmission::Allowed
        );
    }
}
