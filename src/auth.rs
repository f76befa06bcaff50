//! `EFI_VARIABLE_AUTHENTICATION_2` envelope framing and time-based
//! authenticated write verification (spec.md §4.A, §4.C).

use crate::codec::{ByteCursor, EfiTime, SignatureList};
use crate::guid::EFI_CERT_TYPE_PKCS7;
use crate::error::EngineError;
use crate::pkcs7::{self, TrustedKey};
use crate::policy::VariableClass;
use crate::ucs2;

const WIN_CERT_REVISION: u16 = 0x0200;
const WIN_CERT_TYPE_EFI_GUID: u16 = 0x0EF1;

/// A parsed `EFI_VARIABLE_AUTHENTICATION_2` envelope: the timestamp, the
/// detached PKCS#7 signature, and the payload that follows it.
pub struct AuthEnvelope<'a> {
    pub timestamp: EfiTime,
    pub pkcs7_der: &'a [u8],
    pub payload: &'a [u8],
}

/// Parses the envelope at the head of `buf`. Every length field
/// (`dwLength` in particular) is checked against the remaining slice
/// before it is trusted, per spec.md §4.A's parser contract — an envelope
/// whose `dwLength` extends past the buffer fails with
/// `SECURITY_VIOLATION`, it never panics or reads out of bounds.
pub fn parse_envelope(buf: &[u8]) -> Result<AuthEnvelope<'_>, EngineError> {
    let mut cursor = ByteCursor::new(buf);
    let timestamp = EfiTime::parse(&mut cursor)?;

    let header_start = cursor.position();
    let dw_length = cursor.take_u32_le()? as usize;
    let w_revision = cursor.take_u16_le()?;
    let w_certificate_type = cursor.take_u16_le()?;
    let cert_type = cursor.take_guid()?;

    if w_revision != WIN_CERT_REVISION || w_certificate_type != WIN_CERT_TYPE_EFI_GUID {
        return Err(EngineError::SecurityViolation(
            "unsupported WIN_CERTIFICATE revision or type",
        ));
    }
    if cert_type != EFI_CERT_TYPE_PKCS7 {
        return Err(EngineError::SecurityViolation(
            "authentication descriptor is not PKCS#7",
        ));
    }

    // dwLength covers the WIN_CERTIFICATE_UEFI_GUID header (24 bytes:
    // 4 + 2 + 2 + 16) plus the PKCS#7 DER signature that follows it.
    const HEADER_LEN: usize = 4 + 2 + 2 + 16;
    if dw_length < HEADER_LEN {
        return Err(EngineError::SecurityViolation(
            "WIN_CERTIFICATE dwLength shorter than its own header",
        ));
    }
    let pkcs7_len = dw_length - HEADER_LEN;
    if header_start + dw_length > buf.len() {
        return Err(EngineError::SecurityViolation(
            "WIN_CERTIFICATE dwLength extends past buffer",
        ));
    }
    let pkcs7_der = cursor.take(pkcs7_len)?;
    let payload = cursor.rest();

    Ok(AuthEnvelope {
        timestamp,
        pkcs7_der,
        payload,
    })
}

/// The trust roots available for a particular target variable, selected
/// by [`Authenticator::select_trust_roots`] per spec.md §4.C step 3.
pub struct TrustRoots<'a> {
    pub pk: Option<&'a [SignatureList]>,
    pub kek: Option<&'a [SignatureList]>,
    pub setup_mode: bool,
    pub cert_binding: Option<&'a TrustedKey>,
}

fn keys_from_lists(lists: &[SignatureList]) -> Vec<TrustedKey> {
    lists
        .iter()
        .flat_map(|list| list.entries.iter())
        .filter_map(|entry| TrustedKey::from_certificate_der(&entry.data).ok())
        .collect()
}

pub struct Authenticator;

impl Authenticator {
    /// Spec.md §4.C step 3: select the trust-root key set for `class`.
    pub fn select_trust_roots(class: VariableClass, roots: &TrustRoots) -> Vec<TrustedKey> {
        match class {
            VariableClass::Pk => {
                if let Some(pk) = roots.pk {
                    keys_from_lists(pk)
                } else if roots.setup_mode {
                    // No PK yet in SETUP: any key verifies (self-enrollment).
                    Vec::new()
                } else {
                    Vec::new()
                }
            }
            VariableClass::Kek | VariableClass::SignatureDb => {
                let mut keys = Vec::new();
                if let Some(pk) = roots.pk {
                    keys.extend(keys_from_lists(pk));
                }
                if matches!(class, VariableClass::SignatureDb) {
                    if let Some(kek) = roots.kek {
                        keys.extend(keys_from_lists(kek));
                    }
                }
                keys
            }
            VariableClass::Other
            | VariableClass::SetupMode
            | VariableClass::AuditMode
            | VariableClass::DeployedMode
            | VariableClass::SecureBoot => {
                if let Some(bound) = roots.cert_binding {
                    vec![bound.clone()]
                } else {
                    let mut keys = Vec::new();
                    if let Some(pk) = roots.pk {
                        keys.extend(keys_from_lists(pk));
                    }
                    if let Some(kek) = roots.kek {
                        keys.extend(keys_from_lists(kek));
                    }
                    keys
                }
            }
        }
    }

    /// Reconstructs the signed message per spec.md §4.C step 2:
    /// `name_ucs2 || vendor_guid || attributes_le32 || timestamp(16B) || payload`.
    pub fn signed_message(
        name: &[u16],
        vendor_guid: &[u8; 16],
        attributes: u32,
        timestamp: &EfiTime,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut message = ucs2::to_le_bytes(name);
        message.extend_from_slice(vendor_guid);
        message.extend_from_slice(&attributes.to_le_bytes());
        message.extend_from_slice(&timestamp.to_bytes());
        message.extend_from_slice(payload);
        message
    }

    /// Verifies a prospective time-based authenticated write. On success
    /// returns the unwrapped payload and the normalized timestamp
    /// (spec.md §4.C step 6); any failure collapses to
    /// `SECURITY_VIOLATION`, never a more specific status, per spec.md §7.
    #[allow(clippy::too_many_arguments)]
    pub fn verify(
        name: &[u16],
        vendor_guid: &[u8; 16],
        attributes: u32,
        class: VariableClass,
        buf: &[u8],
        roots: &TrustRoots,
        existing_timestamp: Option<EfiTime>,
        is_append: bool,
    ) -> Result<(Vec<u8>, EfiTime), EngineError> {
        let envelope = parse_envelope(buf)?;
        let timestamp = envelope.timestamp.normalized();

        if let Some(existing) = existing_timestamp {
            let ok = if is_append {
                timestamp >= existing
            } else {
                timestamp > existing
            };
            if !ok {
                return Err(EngineError::SecurityViolation(
                    "timestamp does not strictly increase",
                ));
            }
        }

        let message =
            Self::signed_message(name, vendor_guid, attributes, &timestamp, envelope.payload);

        let trust_roots = Self::select_trust_roots(class, roots);
        if trust_roots.is_empty() && !(class == VariableClass::Pk && roots.setup_mode) {
            return Err(EngineError::SecurityViolation(
                "no trust root available to verify signature",
            ));
        }

        // Always verify the signature, even for first-PK enrollment in
        // SETUP mode: `trust_roots` may be empty there, but
        // `verify_detached` falls back to the certificates embedded in
        // the PKCS#7 `SignedData` itself, so a self-signed enrollment
        // still has to produce a signature that matches its own
        // embedded certificate rather than being accepted unconditionally.
        pkcs7::verify_detached(envelope.pkcs7_der, &message, &trust_roots)?;

        Ok((envelope.payload.to_vec(), timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_envelope_with_oversized_dw_length() {
        let mut buf = vec![0u8; 16]; // EFI_TIME
        buf.extend_from_slice(&999u32.to_le_bytes()); // dwLength way too big
        buf.extend_from_slice(&WIN_CERT_REVISION.to_le_bytes());
        buf.extend_from_slice(&WIN_CERT_TYPE_EFI_GUID.to_le_bytes());
        buf.extend_from_slice(&EFI_CERT_TYPE_PKCS7);
        assert!(parse_envelope(&buf).is_err());
    }

    #[test]
    fn rejects_wrong_cert_type_guid() {
        let mut buf = vec![0u8; 16];
        let header_len = 4 + 2 + 2 + 16;
        buf.extend_from_slice(&(header_len as u32).to_le_bytes());
        buf.extend_from_slice(&WIN_CERT_REVISION.to_le_bytes());
        buf.extend_from_slice(&WIN_CERT_TYPE_EFI_GUID.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]); // wrong GUID
        assert!(parse_envelope(&buf).is_err());
    }

    #[test]
    fn signed_message_layout() {
        let name = ucs2::encode_ascii("PK");
        let guid = [7u8; 16];
        let timestamp = EfiTime::ZERO;
        let msg = Authenticator::signed_message(&name, &guid, 0x27, &timestamp, b"payload");
        assert_eq!(&msg[0..4], &[b'P', 0, b'K', 0]);
        assert_eq!(&msg[4..20], &guid);
        assert_eq!(&msg[20..24], &0x27u32.to_le_bytes());
        assert_eq!(&msg[24..40], &timestamp.to_bytes());
        assert_eq!(&msg[40..], b"payload");
    }
}
