//! Envelope signature verification against the document certificate key,
//! and the cryptographic capability the verifier is built on.

use coset::iana;
use p384::{
    ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey},
    PublicKey,
};
use x509_parser::certificate::X509Certificate;

use crate::{decode::SignedEnvelope, error::AttestError};

/// Hash functions a [`CryptoBackend`] must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDigest {
    Sha256,
    Sha384,
    Sha512,
}

/// Envelope signature algorithms this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// ECDSA over P-384 with SHA-384.
    Es384,
}

impl SignatureAlgorithm {
    /// Map a COSE protected header algorithm onto an implemented one.
    pub fn from_cose(algorithm: Option<&coset::Algorithm>) -> Result<Self, AttestError> {
        match algorithm {
            Some(coset::Algorithm::Assigned(iana::Algorithm::ES384)) => Ok(Self::Es384),
            Some(other) => Err(AttestError::UnsupportedAlgorithm(format!("{other:?}"))),
            None => Err(AttestError::UnsupportedAlgorithm(
                "no algorithm in protected header".to_string(),
            )),
        }
    }

    /// Hash applied to the signing input before verification.
    pub fn digest(self) -> MessageDigest {
        match self {
            Self::Es384 => MessageDigest::Sha384,
        }
    }
}

/// Cryptographic primitives used by signature and chain verification.
///
/// Implementations must be deterministic and free of side effects so a
/// verifier can be shared across threads.
pub trait CryptoBackend: Send + Sync {
    /// Hash `data` with `digest`.
    fn digest(&self, digest: MessageDigest, data: &[u8]) -> Vec<u8>;

    /// Verify `signature` over an already hashed message.
    ///
    /// Returns `Ok(false)` when the signature does not match, including when
    /// it is not a well formed signature for `algorithm`. Errors are reserved
    /// for a public key that cannot be decoded.
    fn verify_prehash(
        &self,
        algorithm: SignatureAlgorithm,
        public_key_sec1: &[u8],
        prehash: &[u8],
        signature: &[u8],
    ) -> Result<bool, AttestError>;

    /// Whether `child` carries a valid signature made with `issuer`'s key.
    fn verify_certificate(&self, child: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool;
}

/// Pure Rust backend: `sha2`, `p384` and `x509-parser`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoBackend;

impl CryptoBackend for RustCryptoBackend {
    fn digest(&self, digest: MessageDigest, data: &[u8]) -> Vec<u8> {
        use sha2::Digest as _;
        match digest {
            MessageDigest::Sha256 => sha2::Sha256::digest(data).to_vec(),
            MessageDigest::Sha384 => sha2::Sha384::digest(data).to_vec(),
            MessageDigest::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    fn verify_prehash(
        &self,
        algorithm: SignatureAlgorithm,
        public_key_sec1: &[u8],
        prehash: &[u8],
        signature: &[u8],
    ) -> Result<bool, AttestError> {
        match algorithm {
            SignatureAlgorithm::Es384 => {
                let key = PublicKey::from_sec1_bytes(public_key_sec1)
                    .map_err(|_| AttestError::FailedDecodeKeyFromCert)?;
                let Ok(signature) = Signature::try_from(signature) else {
                    return Ok(false);
                };
                let verifier = VerifyingKey::from(key);
                Ok(verifier.verify_prehash(prehash, &signature).is_ok())
            }
        }
    }

    fn verify_certificate(&self, child: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
        child.verify_signature(Some(issuer.public_key())).is_ok()
    }
}

/// Check that `envelope` is signed with the key in `leaf_certificate`, using
/// [`RustCryptoBackend`].
pub fn verify_signature(
    envelope: &SignedEnvelope,
    leaf_certificate: &[u8],
) -> Result<bool, AttestError> {
    verify_signature_with(envelope, leaf_certificate, &RustCryptoBackend)
}

/// Check that `envelope` is signed with the key in `leaf_certificate`.
///
/// `Ok(false)` means the envelope is well formed but the signature does not
/// match. An algorithm other than ES384 is [`AttestError::UnsupportedAlgorithm`].
pub fn verify_signature_with(
    envelope: &SignedEnvelope,
    leaf_certificate: &[u8],
    backend: &dyn CryptoBackend,
) -> Result<bool, AttestError> {
    let algorithm = SignatureAlgorithm::from_cose(envelope.algorithm())?;
    let public_key = leaf_public_key(leaf_certificate)?;

    let prehash = backend.digest(algorithm.digest(), &envelope.signing_input()?);
    backend.verify_prehash(algorithm, &public_key, &prehash, envelope.signature())
}

/// SEC1 encoded public key of an X.509 v3 end entity certificate.
fn leaf_public_key(end_entity_certificate: &[u8]) -> Result<Vec<u8>, AttestError> {
    use x509_cert::der::Decode;

    let ee_cert = x509_cert::certificate::Certificate::from_der(end_entity_certificate)
        .map_err(|_| AttestError::FailedToParseCert)?;

    // Expect v3
    if ee_cert.tbs_certificate.version != x509_cert::certificate::Version::V3 {
        return Err(AttestError::InvalidEndEntityCert);
    }

    Ok(ee_cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .to_vec())
}
