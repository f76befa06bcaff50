//! Well-known GUIDs for the Secure Boot hierarchy and the signature-list
//! type tags used by [`crate::codec`].
//!
//! GUIDs are given in the usual `a-b-c-d` Microsoft notation for
//! readability (matching the convention in the wider UEFI Rust ecosystem)
//! and converted to the 16-byte wire layout with [`to_wire_bytes`], which
//! is the byte order `uefi::Guid::from_bytes` and our own codec expect.

/// Converts the `(a, b, c, d)` field notation into the 16-byte
/// little/big mixed wire encoding UEFI GUIDs use on disk and over MMIO:
/// `a` and `b`/`c` are little-endian, `d` is taken verbatim.
pub const fn to_wire_bytes(a: u32, b: u16, c: u16, d: [u8; 8]) -> [u8; 16] {
    let a = a.to_le_bytes();
    let b = b.to_le_bytes();
    let c = c.to_le_bytes();
    [
        a[0], a[1], a[2], a[3], b[0], b[1], c[0], c[1], d[0], d[1], d[2], d[3], d[4], d[5], d[6],
        d[7],
    ]
}

/// EFI_GLOBAL_VARIABLE — namespace for PK, KEK, SecureBoot, SetupMode,
/// AuditMode, DeployedMode.
pub const EFI_GLOBAL_VARIABLE: [u8; 16] = to_wire_bytes(
    0x8BE4DF61,
    0x93CA,
    0x11D2,
    [0xAA, 0x0D, 0x00, 0xE0, 0x98, 0x03, 0x2B, 0x8C],
);

/// EFI_IMAGE_SECURITY_DATABASE — namespace for db, dbx, dbt, dbr.
pub const EFI_IMAGE_SECURITY_DATABASE: [u8; 16] = to_wire_bytes(
    0xD719B2CB,
    0x3D3A,
    0x4596,
    [0xA3, 0xBC, 0xDA, 0xD0, 0x0E, 0x67, 0x65, 0x6F],
);

/// Vendor-specific owner GUID this implementation uses when minting a
/// fresh Platform Key signature list at build time (spec.md §9, second
/// open question: we chose an implementation-specific vendor GUID for PK
/// rather than reusing `EFI_GLOBAL_VARIABLE`, since the signature owner
/// field is logically distinct from the variable's namespace GUID).
pub const PK_VENDOR_OWNER: [u8; 16] = to_wire_bytes(
    0x4A6BDFC6,
    0x3B02,
    0x4B9C,
    [0x8C, 0x1E, 0x63, 0x1E, 0xA2, 0x3F, 0x9A, 0x70],
);

/// Microsoft Corporation owner GUID, used as the signature owner on
/// KEK/db/dbx entries signed by the companion tool, matching common
/// guest-firmware expectations (spec.md §9, second open question).
pub const MICROSOFT_OWNER: [u8; 16] = to_wire_bytes(
    0x77FA9ABD,
    0x0359,
    0x4D32,
    [0xBD, 0x60, 0x28, 0xF4, 0xE7, 0x8F, 0x78, 0x4B],
);

/// EFI_CERT_X509_GUID — EFI_SIGNATURE_LIST.SignatureType for a list of
/// DER-encoded X.509 certificates.
pub const EFI_CERT_X509: [u8; 16] = to_wire_bytes(
    0xA5C059A1,
    0x94E4,
    0x4AA7,
    [0x87, 0xB5, 0xAB, 0x15, 0x5C, 0x2B, 0xF0, 0x72],
);

/// EFI_CERT_SHA256_GUID — EFI_SIGNATURE_LIST.SignatureType for a list of
/// raw SHA-256 hashes (used by dbx).
pub const EFI_CERT_SHA256: [u8; 16] = to_wire_bytes(
    0xC1C41626,
    0x504C,
    0x4092,
    [0xAC, 0xA9, 0x41, 0xF9, 0x36, 0x93, 0x43, 0x28],
);

/// EFI_CERT_TYPE_PKCS7_GUID — WIN_CERTIFICATE_UEFI_GUID.CertType for a
/// detached PKCS#7 signature.
pub const EFI_CERT_TYPE_PKCS7: [u8; 16] = to_wire_bytes(
    0x4AAFD29D,
    0x68DF,
    0x49EE,
    [0x8A, 0xA9, 0x34, 0x7D, 0x37, 0x56, 0x65, 0xA7],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_variable_guid_matches_known_layout() {
        assert_eq!(
            EFI_GLOBAL_VARIABLE,
            [
                0x61, 0xDF, 0xE4, 0x8B, 0xCA, 0x93, 0xD2, 0x11, 0xAA, 0x0D, 0x00, 0xE0, 0x98,
                0x03, 0x2B, 0x8C,
            ]
        );
    }

    #[test]
    fn distinct_namespaces() {
        assert_ne!(EFI_GLOBAL_VARIABLE, EFI_IMAGE_SECURITY_DATABASE);
        assert_ne!(PK_VENDOR_OWNER, MICROSOFT_OWNER);
    }
}
