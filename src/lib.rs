//! Logic for decoding and verifying Nitro Secure Module attestation
//! documents.
//!
//! A document is a COSE_Sign1 envelope around a CBOR map. Verification
//! decodes the envelope, parses the map into an [`AttestationDocument`],
//! checks the envelope signature against the document certificate and
//! validates that certificate through the CA bundle to a pinned
//! [`TrustAnchor`] at a caller supplied [`ReferenceTime`].
//!
//! ```no_run
//! use nitro_attestation_verifier::{TrustAnchor, Verifier, VerifierConfig};
//!
//! # fn run(cose_sign1: &[u8]) -> Result<(), nitro_attestation_verifier::AttestError> {
//! let verifier = Verifier::with_config(TrustAnchor::aws_nitro()?, VerifierConfig::nitro());
//! let document = verifier.verify_at_document_time(cose_sign1).into_result()?;
//! println!("{}", document.module_id);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod chain;
pub mod config;
pub mod decode;
pub mod document;
mod error;
pub mod pipeline;
pub mod signature;
mod syntactic_validation;

#[cfg(test)]
mod test_support;

pub use chain::{BundleOrder, CertificatePath, ReferenceTime, TrustAnchor};
pub use config::VerifierConfig;
pub use decode::{EnvelopeKind, SignedEnvelope};
pub use document::{inspect, AttestationDocument, DocumentFields};
pub use error::{AttestError, ChainError, FailureKind, LinkFailure};
pub use pipeline::{Stage, VerificationResult, Verifier};
pub use signature::{CryptoBackend, MessageDigest, RustCryptoBackend, SignatureAlgorithm};

/// AWS Nitro root CA certificate.
///
/// The root certificate can be downloaded from
/// <https://aws-nitro-enclaves.amazonaws.com/AWS_NitroEnclaves_Root-G1.zip>,
/// and it can be verified using the following SHA256 checksum:
/// `8cf60e2b2efca96c6a9e71e851d00c1b6991cc09eadbe64a6a1d1b1eb9faff7c`.
/// This official hash checksum is over the AWS-provided zip file.
/// For context and additional verification details, see
/// <https://docs.aws.amazon.com/enclaves/latest/user/verify-root.html/>.
pub const AWS_ROOT_CERT_PEM: &[u8] = std::include_bytes!("../root.pem");

/// Extract a DER encoded certificate from bytes representing a PEM encoded
/// certificate.
pub fn cert_from_pem(pem: &[u8]) -> Result<Vec<u8>, AttestError> {
    let (_, doc) = x509_cert::der::Document::from_pem(&String::from_utf8_lossy(pem))
        .map_err(|_| AttestError::PemDecodingError)?;
    Ok(doc.to_vec())
}

/// Extract the `AttestationDocument` from a COSE_Sign1 structure.
///
/// WARNING: This will not verify the signature or the certificate chain and
/// should not be used to make trust decisions; instead use
/// [`attestation_doc_from_der`]. Useful for displaying a document that failed
/// verification.
pub fn unsafe_attestation_doc_from_der(cose_sign1_der: &[u8]) -> Result<AttestationDocument, AttestError> {
    AttestationDocument::from_cose_sign1(cose_sign1_der)
}

/// Extract the `AttestationDocument` from a COSE_Sign1 structure after
/// verifying that the document certificate signed the envelope and chains
/// through the leaf-to-root CA bundle to `trust_anchor`.
///
/// While this does the cryptographic verification, it is up to the caller to
/// check the document contents (PCRs, `user_data`, `nonce`) against what they
/// expect.
///
/// # Arguments
///
/// * `cose_sign1_der` - the encoded COSE_Sign1 structure containing the
///   attestation document payload.
/// * `trust_anchor` - the pinned root certificate. Its authenticity should be
///   established out of band.
/// * `reference_time` - the moment at which every certificate must be valid.
pub fn attestation_doc_from_der(
    cose_sign1_der: &[u8],
    trust_anchor: &TrustAnchor,
    reference_time: ReferenceTime,
) -> Result<AttestationDocument, AttestError> {
    verify(cose_sign1_der, trust_anchor, reference_time).into_result()
}

/// Run the full verification pipeline with the default configuration.
pub fn verify(
    cose_sign1_der: &[u8],
    trust_anchor: &TrustAnchor,
    reference_time: ReferenceTime,
) -> VerificationResult {
    Verifier::new(trust_anchor.clone()).verify(cose_sign1_der, reference_time)
}
