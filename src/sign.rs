//! Build-time authentication descriptor generator (spec.md §6, §4.H).
//!
//! Produces the on-disk layout a guest-firmware provisioning step (or a
//! test fixture) feeds into `SetVariable`: an `EFI_VARIABLE_AUTHENTICATION_2`
//! descriptor, a detached PKCS#7 signature over the reconstructed message,
//! and the payload itself. Shares the message reconstruction in
//! [`crate::auth::Authenticator::signed_message`] with the authenticator,
//! so signing and verification agree on exactly one byte layout.
//!
//! `SignedData` is assembled field-by-field rather than through a builder:
//! one detached signer, no signed/unsigned attributes, the signer
//! certificate carried alongside for the verifier's embedded-certificate
//! path (see [`crate::pkcs7::verify_detached`]).

use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, DigestAlgorithmIdentifiers, EncapsulatedContentInfo, SignatureValue,
    SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use const_oid::db::rfc5911::ID_SIGNED_DATA;
use const_oid::db::rfc5912::ID_SHA_256;
use der::asn1::SetOfVec;
use der::{Decode, Encode};
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

use crate::auth::Authenticator;
use crate::codec::EfiTime;
use crate::error::EngineError;

const WIN_CERT_REVISION: u16 = 0x0200;
const WIN_CERT_TYPE_EFI_GUID: u16 = 0x0EF1;

/// Everything the generator needs about the signer: the private key and
/// the certificate it corresponds to, both already parsed.
pub struct SigningIdentity {
    pub private_key: RsaPrivateKey,
    pub certificate_der: Vec<u8>,
}

fn sha256_oid() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ID_SHA_256,
        parameters: None,
    }
}

/// Builds a detached PKCS#7 `SignedData` over `message`, signed by
/// `identity`, with SHA-256 as the digest algorithm (spec.md §4.C step 4
/// mandates SHA-256 on the verification side; the generator must match).
fn build_pkcs7(identity: &SigningIdentity, message: &[u8]) -> Result<Vec<u8>, EngineError> {
    let cert = Certificate::from_der(&identity.certificate_der)
        .map_err(|_| EngineError::InvalidParameter("malformed signer certificate"))?;

    let digest = Sha256::digest(message);
    let signature_bytes = identity
        .private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|_| EngineError::InvalidParameter("RSA signing failed"))?;

    let signer_identifier = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: cert.tbs_certificate.issuer.clone(),
        serial_number: cert.tbs_certificate.serial_number.clone(),
    });

    let signer_info = SignerInfo {
        version: CmsVersion::V1,
        sid: signer_identifier,
        digest_alg: sha256_oid(),
        signed_attrs: None,
        signature_algorithm: AlgorithmIdentifierOwned {
            oid: const_oid::db::rfc5912::RSA_ENCRYPTION,
            parameters: None,
        },
        signature: SignatureValue::new(&signature_bytes)
            .map_err(|_| EngineError::InvalidParameter("could not encode signature value"))?,
        unsigned_attrs: None,
    };

    let mut digest_algorithms = DigestAlgorithmIdentifiers::new();
    digest_algorithms
        .insert(sha256_oid())
        .map_err(|_| EngineError::InvalidParameter("could not build digest algorithm set"))?;

    let mut signer_infos_set = SetOfVec::new();
    signer_infos_set
        .insert(signer_info)
        .map_err(|_| EngineError::InvalidParameter("could not build signer info set"))?;

    let mut certificates = SetOfVec::new();
    certificates
        .insert(CertificateChoices::Certificate(cert))
        .map_err(|_| EngineError::InvalidParameter("could not attach certificate"))?;

    let signed_data = SignedData {
        version: CmsVersion::V1,
        digest_algorithms,
        encap_content_info: EncapsulatedContentInfo {
            econtent_type: const_oid::db::rfc5911::ID_DATA,
            econtent: None,
        },
        certificates: Some(CertificateSet(certificates)),
        crls: None,
        signer_infos: SignerInfos(signer_infos_set),
    };

    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: der::Any::encode_from(&signed_data)
            .map_err(|_| EngineError::InvalidParameter("could not encode SignedData"))?,
    };

    content_info
        .to_der()
        .map_err(|_| EngineError::InvalidParameter("could not encode ContentInfo"))
}

/// Produces `EFI_VARIABLE_AUTHENTICATION_2 descriptor || PKCS#7 DER ||
/// payload`, the exact layout spec.md §6 describes for the companion
/// tool's output file.
pub fn build_auth_descriptor(
    identity: &SigningIdentity,
    name: &[u16],
    vendor_guid: &[u8; 16],
    attributes: u32,
    timestamp: EfiTime,
    payload: &[u8],
) -> Result<Vec<u8>, EngineError> {
    let timestamp = timestamp.normalized();
    let message = Authenticator::signed_message(name, vendor_guid, attributes, &timestamp, payload);
    let pkcs7_der = build_pkcs7(identity, &message)?;

    let mut out = Vec::new();
    out.extend_from_slice(&timestamp.to_bytes());

    let dw_length = (4 + 2 + 2 + 16 + pkcs7_der.len()) as u32;
    out.extend_from_slice(&dw_length.to_le_bytes());
    out.extend_from_slice(&WIN_CERT_REVISION.to_le_bytes());
    out.extend_from_slice(&WIN_CERT_TYPE_EFI_GUID.to_le_bytes());
    out.extend_from_slice(&crate::guid::EFI_CERT_TYPE_PKCS7);
    out.extend_from_slice(&pkcs7_der);
    out.extend_from_slice(payload);

    Ok(out)
}
