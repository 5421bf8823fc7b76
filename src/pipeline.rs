//! The verification pipeline: decode, parse, check the envelope signature,
//! then validate the certificate chain. The first failing stage decides the
//! verdict and the remaining stages are skipped.

use crate::{
    chain::{validate_path, CertificatePath, ReferenceTime, TrustAnchor},
    config::VerifierConfig,
    decode::{decode_envelope, decode_payload},
    document::{parse, AttestationDocument},
    error::{AttestError, FailureKind},
    signature::{verify_signature_with, CryptoBackend, RustCryptoBackend},
};

/// Pipeline stage a verdict was reached in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Decode,
    Parse,
    Signature,
    Chain,
}

/// Outcome of verifying one attestation document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// Every stage passed.
    Valid(AttestationDocument),
    /// `stage` failed for `reason`; later stages did not run.
    Invalid { stage: Stage, reason: AttestError },
}

impl VerificationResult {
    /// Whether every stage passed.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The first failure, if any.
    pub fn reason(&self) -> Option<&AttestError> {
        match self {
            Self::Valid(_) => None,
            Self::Invalid { reason, .. } => Some(reason),
        }
    }

    /// Kind of the first failure, if any.
    pub fn kind(&self) -> Option<FailureKind> {
        self.reason().map(AttestError::kind)
    }

    /// The verified document, or the first failure.
    pub fn into_result(self) -> Result<AttestationDocument, AttestError> {
        match self {
            Self::Valid(document) => Ok(document),
            Self::Invalid { reason, .. } => Err(reason),
        }
    }
}

/// Verifies attestation documents against a pinned trust anchor.
///
/// Holds no per-document state; one verifier can be shared across threads.
#[derive(Debug, Clone)]
pub struct Verifier<B = RustCryptoBackend> {
    anchor: TrustAnchor,
    config: VerifierConfig,
    backend: B,
}

impl Verifier {
    /// Verifier with the default configuration and crypto backend.
    pub fn new(anchor: TrustAnchor) -> Self {
        Self::with_config(anchor, VerifierConfig::default())
    }

    /// Verifier with `config` and the default crypto backend.
    pub fn with_config(anchor: TrustAnchor, config: VerifierConfig) -> Self {
        Self::with_backend(anchor, config, RustCryptoBackend)
    }
}

impl<B: CryptoBackend> Verifier<B> {
    /// Verifier using `backend` for every cryptographic operation.
    pub fn with_backend(anchor: TrustAnchor, config: VerifierConfig, backend: B) -> Self {
        Self {
            anchor,
            config,
            backend,
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn trust_anchor(&self) -> &TrustAnchor {
        &self.anchor
    }

    /// Run every stage over `cose_sign1`, validating the certificate chain at
    /// `reference_time`.
    pub fn verify(&self, cose_sign1: &[u8], reference_time: ReferenceTime) -> VerificationResult {
        self.run(cose_sign1, |_| reference_time)
    }

    /// Like [`Verifier::verify`], using the document's own timestamp as the
    /// reference time.
    pub fn verify_at_document_time(&self, cose_sign1: &[u8]) -> VerificationResult {
        self.run(cose_sign1, AttestationDocument::reference_time)
    }

    fn run(
        &self,
        cose_sign1: &[u8],
        reference_time: impl FnOnce(&AttestationDocument) -> ReferenceTime,
    ) -> VerificationResult {
        let envelope = match decode_envelope(cose_sign1) {
            Ok(envelope) => envelope,
            Err(reason) => return invalid(Stage::Decode, reason),
        };
        tracing::debug!(
            stage = ?Stage::Decode,
            payload_len = envelope.payload().len(),
            "envelope decoded"
        );

        let document = match decode_payload(envelope.payload())
            .and_then(|map| parse(&map))
            .and_then(|document| {
                self.config.check_document(&document)?;
                Ok(document)
            }) {
            Ok(document) => document,
            Err(reason) => return invalid(Stage::Parse, reason),
        };
        tracing::debug!(
            stage = ?Stage::Parse,
            module_id = %document.module_id,
            cabundle_len = document.cabundle.len(),
            "document parsed"
        );

        match verify_signature_with(&envelope, &document.certificate, &self.backend) {
            Ok(true) => {}
            Ok(false) => return invalid(Stage::Signature, AttestError::SignatureMismatch),
            Err(reason) => return invalid(Stage::Signature, reason),
        }
        tracing::debug!(stage = ?Stage::Signature, "envelope signature verified");

        let time = reference_time(&document);
        let path = CertificatePath::new(
            &document.certificate,
            &document.cabundle,
            self.config.bundle_order,
        );
        if let Err(err) = validate_path(&path, &self.anchor, time, &self.backend) {
            return invalid(Stage::Chain, err.into());
        }

        tracing::debug!(
            module_id = %document.module_id,
            reference_time = time.as_unix_seconds(),
            "attestation document verified"
        );
        VerificationResult::Valid(document)
    }
}

fn invalid(stage: Stage, reason: AttestError) -> VerificationResult {
    tracing::warn!(?stage, kind = ?reason.kind(), %reason, "attestation document rejected");
    VerificationResult::Invalid { stage, reason }
}
