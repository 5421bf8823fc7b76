//! Errors produced while decoding and verifying an attestation document.

use thiserror::Error;

/// Why an adjacent pair of certificates in a path failed to link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    /// The child's issuer name is not the parent's subject name.
    IssuerMismatch,
    /// The parent is not marked as a certificate authority.
    NotACertificateAuthority,
    /// The parent's key usage does not allow signing certificates.
    MissingKeyCertSign,
    /// The parent's path length constraint allows fewer CAs below it than
    /// the path has.
    PathLengthExceeded,
    /// The leaf's key usage does not allow digital signatures. Only reported
    /// for the leaf, at index 0.
    MissingDigitalSignature,
    /// The child's signature does not verify under the parent's key.
    BadSignature,
}

/// Certificate path validation failures, in the order they are checked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The certificate at `index` in the path is not DER encoded X.509.
    #[error("certificate {index} in the path is malformed")]
    MalformedCertificate {
        /// Position in the path, leaf is 0.
        index: usize,
    },
    /// The certificate at `index` is not issued by the certificate at `index + 1`.
    #[error("certificate {index} is not issued by the next certificate in the path: {reason:?}")]
    BrokenChain {
        /// Position of the child in the path, leaf is 0.
        index: usize,
        /// Which part of the linkage failed.
        reason: LinkFailure,
    },
    /// The path does not terminate at the configured trust anchor.
    #[error("certificate path does not terminate at the trust anchor")]
    UntrustedRoot,
    /// The reference time is outside the certificate's validity window.
    #[error("certificate {certificate_index} is expired or not yet valid")]
    ExpiredOrNotYetValid {
        /// Position in the path, leaf is 0.
        certificate_index: usize,
    },
}

/// Errors from attestation document decoding and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestError {
    /// The input is not a single-signer COSE envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// The envelope payload is not a CBOR map with text keys.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// A required document field is absent.
    #[error("missing field `{name}`")]
    MissingField {
        /// Field name as it appears in the payload map.
        name: &'static str,
    },
    /// A document field has the wrong CBOR type.
    #[error("field `{name}` has an unexpected type")]
    InvalidFieldType {
        /// Field name as it appears in the payload map.
        name: &'static str,
    },
    /// A well typed document field violates a syntactic constraint.
    #[error("field `{name}` is invalid: {reason}")]
    InvalidFieldValue {
        /// Field name as it appears in the payload map.
        name: &'static str,
        /// Constraint that was violated.
        reason: &'static str,
    },
    /// The protected header names an algorithm this crate does not implement.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// The envelope signature does not verify under the leaf certificate key.
    #[error("envelope signature does not match the document certificate")]
    SignatureMismatch,
    /// The leaf certificate could not be parsed.
    #[error("failed to parse the document certificate")]
    FailedToParseCert,
    /// The leaf certificate is not an X.509 v3 certificate.
    #[error("document certificate is not an X.509 v3 certificate")]
    InvalidEndEntityCert,
    /// The leaf certificate does not carry a usable P-384 public key.
    #[error("failed to decode the public key from the document certificate")]
    FailedDecodeKeyFromCert,
    /// The trust anchor PEM could not be decoded.
    #[error("failed to decode PEM encoded certificate")]
    PemDecodingError,
    /// The trust anchor is not a parseable X.509 certificate.
    #[error("trust anchor is not a valid X.509 certificate")]
    InvalidTrustAnchor,
    /// Certificate path validation failed.
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Flat classification of [`AttestError`], suitable for matching on the
/// failure kind without inspecting details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// [`AttestError::MalformedEnvelope`].
    MalformedEnvelope,
    /// [`AttestError::MalformedPayload`].
    MalformedPayload,
    /// [`AttestError::MissingField`].
    MissingField,
    /// [`AttestError::InvalidFieldType`].
    InvalidFieldType,
    /// [`AttestError::InvalidFieldValue`].
    InvalidFieldValue,
    /// [`AttestError::UnsupportedAlgorithm`].
    UnsupportedAlgorithm,
    /// [`AttestError::SignatureMismatch`].
    SignatureMismatch,
    /// A certificate or trust anchor that cannot be parsed or used.
    MalformedCertificate,
    /// [`ChainError::BrokenChain`].
    BrokenChain,
    /// [`ChainError::UntrustedRoot`].
    UntrustedRoot,
    /// [`ChainError::ExpiredOrNotYetValid`].
    ExpiredOrNotYetValid,
}

impl AttestError {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedEnvelope(_) => FailureKind::MalformedEnvelope,
            Self::MalformedPayload(_) => FailureKind::MalformedPayload,
            Self::MissingField { .. } => FailureKind::MissingField,
            Self::InvalidFieldType { .. } => FailureKind::InvalidFieldType,
            Self::InvalidFieldValue { .. } => FailureKind::InvalidFieldValue,
            Self::UnsupportedAlgorithm(_) => FailureKind::UnsupportedAlgorithm,
            Self::SignatureMismatch => FailureKind::SignatureMismatch,
            Self::FailedToParseCert
            | Self::InvalidEndEntityCert
            | Self::FailedDecodeKeyFromCert
            | Self::PemDecodingError
            | Self::InvalidTrustAnchor => FailureKind::MalformedCertificate,
            Self::Chain(err) => match err {
                ChainError::MalformedCertificate { .. } => FailureKind::MalformedCertificate,
                ChainError::BrokenChain { .. } => FailureKind::BrokenChain,
                ChainError::UntrustedRoot => FailureKind::UntrustedRoot,
                ChainError::ExpiredOrNotYetValid { .. } => FailureKind::ExpiredOrNotYetValid,
            },
        }
    }
}
