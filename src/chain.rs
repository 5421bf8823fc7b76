//! Certificate path validation from the document certificate through its CA
//! bundle to a pinned trust anchor.
//!
//! Revocation is not checked. Callers that need revocation awareness must add
//! it on top of this module.

use serde::Deserialize;
use x509_parser::{
    certificate::X509Certificate,
    extensions::{KeyUsage, ParsedExtension},
    prelude::FromDer,
};

use crate::{
    error::{AttestError, ChainError, LinkFailure},
    signature::{CryptoBackend, RustCryptoBackend},
};

/// The pinned root certificate a path must terminate at.
///
/// Loaded once from a trusted, out of band source and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    der: Vec<u8>,
}

impl TrustAnchor {
    /// Build an anchor from a DER encoded X.509 certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self, AttestError> {
        let der = der.into();
        match X509Certificate::from_der(&der) {
            Ok((rest, _)) if rest.is_empty() => Ok(Self { der }),
            _ => Err(AttestError::InvalidTrustAnchor),
        }
    }

    /// Build an anchor from a PEM encoded X.509 certificate.
    pub fn from_pem(pem: &[u8]) -> Result<Self, AttestError> {
        Self::from_der(crate::cert_from_pem(pem)?)
    }

    /// The AWS Nitro Enclaves root bundled with this crate.
    pub fn aws_nitro() -> Result<Self, AttestError> {
        Self::from_pem(crate::AWS_ROOT_CERT_PEM)
    }

    /// DER encoding of the anchor certificate.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    fn certificate(&self) -> Result<X509Certificate<'_>, ChainError> {
        X509Certificate::from_der(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|_| ChainError::UntrustedRoot)
    }
}

/// Moment at which every certificate in a path must be valid, in whole
/// seconds since the Unix epoch.
///
/// Never read from the system clock: attestation documents are verified long
/// after issuance, so the caller picks the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceTime(u64);

impl ReferenceTime {
    pub const fn from_unix_seconds(seconds: u64) -> Self {
        Self(seconds)
    }

    /// From an attestation document `timestamp`, which is in milliseconds.
    pub const fn from_document_timestamp(millis: u64) -> Self {
        Self(millis / 1000)
    }

    pub const fn as_unix_seconds(self) -> u64 {
        self.0
    }

    fn within(self, not_before: i64, not_after: i64) -> bool {
        match i64::try_from(self.0) {
            Ok(now) => not_before <= now && now <= not_after,
            Err(_) => false,
        }
    }
}

/// Order of the certificates in a document's CA bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleOrder {
    /// `cabundle[0]` issued the document certificate.
    #[default]
    LeafToRoot,
    /// `cabundle[0]` is the root; the last entry issued the document
    /// certificate. This is what Nitro hardware emits.
    RootToLeaf,
}

/// Leaf first view over a document certificate and its CA bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePath<'a> {
    certificates: Vec<&'a [u8]>,
}

impl<'a> CertificatePath<'a> {
    pub fn new(leaf: &'a [u8], cabundle: &'a [Vec<u8>], order: BundleOrder) -> Self {
        let mut certificates = Vec::with_capacity(1 + cabundle.len());
        certificates.push(leaf);
        match order {
            BundleOrder::LeafToRoot => certificates.extend(cabundle.iter().map(Vec::as_slice)),
            BundleOrder::RootToLeaf => {
                certificates.extend(cabundle.iter().rev().map(Vec::as_slice))
            }
        }
        Self { certificates }
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// DER encodings, leaf first.
    pub fn certificates(&self) -> &[&'a [u8]] {
        &self.certificates
    }
}

/// Validate `leaf` through a leaf-to-root `ca_bundle` to `trust_anchor` at
/// `reference_time`, using the default crypto backend.
pub fn validate_chain(
    leaf_certificate: &[u8],
    ca_bundle: &[Vec<u8>],
    trust_anchor: &TrustAnchor,
    reference_time: ReferenceTime,
) -> Result<(), ChainError> {
    let path = CertificatePath::new(leaf_certificate, ca_bundle, BundleOrder::LeafToRoot);
    validate_path(&path, trust_anchor, reference_time, &RustCryptoBackend)
}

/// Validate a certificate path. Checks run in three passes and the first
/// failure is returned:
///
/// 1. every adjacent pair links by name and the issuer is a CA allowed to
///    sign certificates at its depth, including the anchor when it signed
///    the last certificate,
/// 2. every signature verifies under its issuer, and the last certificate is
///    the anchor or is signed by it,
/// 3. `reference_time` is inside every certificate's validity window,
///    bounds inclusive.
pub fn validate_path(
    path: &CertificatePath<'_>,
    trust_anchor: &TrustAnchor,
    reference_time: ReferenceTime,
    backend: &dyn CryptoBackend,
) -> Result<(), ChainError> {
    let certs = path
        .certificates()
        .iter()
        .enumerate()
        .map(|(index, der)| {
            X509Certificate::from_der(der)
                .map(|(_, cert)| cert)
                .map_err(|_| ChainError::MalformedCertificate { index })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let anchor = trust_anchor.certificate()?;

    if let Some(usage) = key_usage(&certs[0]) {
        if !usage.digital_signature() {
            return Err(ChainError::BrokenChain {
                index: 0,
                reason: LinkFailure::MissingDigitalSignature,
            });
        }
    }
    for (index, pair) in certs.windows(2).enumerate() {
        let (cert, issuer) = (&pair[0], &pair[1]);
        if cert.issuer() != issuer.subject() {
            return Err(ChainError::BrokenChain {
                index,
                reason: LinkFailure::IssuerMismatch,
            });
        }
        check_issuer(issuer, index + 1).map_err(|reason| ChainError::BrokenChain { index, reason })?;
    }

    let terminal_index = certs.len() - 1;
    let terminal = &certs[terminal_index];
    let terminal_is_anchor = path.certificates()[terminal_index] == trust_anchor.der();
    let signed_by_anchor = !terminal_is_anchor && terminal.issuer() == anchor.subject();
    if signed_by_anchor {
        check_issuer(&anchor, certs.len()).map_err(|reason| ChainError::BrokenChain {
            index: terminal_index,
            reason,
        })?;
    }

    for (index, pair) in certs.windows(2).enumerate() {
        if !backend.verify_certificate(&pair[0], &pair[1]) {
            return Err(ChainError::BrokenChain {
                index,
                reason: LinkFailure::BadSignature,
            });
        }
    }

    let anchored =
        terminal_is_anchor || (signed_by_anchor && backend.verify_certificate(terminal, &anchor));
    if !anchored {
        return Err(ChainError::UntrustedRoot);
    }

    for (certificate_index, cert) in certs.iter().enumerate() {
        let validity = cert.validity();
        if !reference_time.within(validity.not_before.timestamp(), validity.not_after.timestamp())
        {
            return Err(ChainError::ExpiredOrNotYetValid { certificate_index });
        }
    }

    tracing::debug!(
        path_len = certs.len(),
        reference_time = reference_time.as_unix_seconds(),
        "certificate path validated"
    );
    Ok(())
}

/// Checks on a CA certificate issuing at `position` in the path, where the
/// leaf is position 0. There are `position - 1` CA certificates below it.
fn check_issuer(issuer: &X509Certificate<'_>, position: usize) -> Result<(), LinkFailure> {
    let constraints = issuer.extensions().iter().find_map(|ext| match ext.parsed_extension() {
        ParsedExtension::BasicConstraints(bc) => Some(bc),
        _ => None,
    });
    let Some(constraints) = constraints.filter(|bc| bc.ca) else {
        return Err(LinkFailure::NotACertificateAuthority);
    };
    if key_usage(issuer).is_some_and(|usage| !usage.key_cert_sign()) {
        return Err(LinkFailure::MissingKeyCertSign);
    }
    match constraints.path_len_constraint {
        Some(max) if (max as usize) < position - 1 => Err(LinkFailure::PathLengthExceeded),
        _ => Ok(()),
    }
}

fn key_usage<'a>(cert: &'a X509Certificate<'_>) -> Option<&'a KeyUsage> {
    cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
        ParsedExtension::KeyUsage(usage) => Some(usage),
        _ => None,
    })
}
