//! Verifier configuration.

use serde::Deserialize;

use crate::{chain::BundleOrder, document::AttestationDocument, error::AttestError};

/// Default upper bound on the number of certificates in a CA bundle.
pub const DEFAULT_MAX_CABUNDLE_LEN: usize = 10;

/// Settings applied by [`crate::Verifier`] on top of the fixed checks.
///
/// Can be read from any serde format; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Order of certificates in the document `cabundle`.
    pub bundle_order: BundleOrder,
    /// Documents with a longer CA bundle are rejected before chain validation.
    pub max_cabundle_len: usize,
    /// When set, the document `digest` must equal this value.
    pub expected_digest: Option<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            bundle_order: BundleOrder::default(),
            max_cabundle_len: DEFAULT_MAX_CABUNDLE_LEN,
            expected_digest: None,
        }
    }
}

impl VerifierConfig {
    /// Settings matching documents produced by the AWS Nitro Secure Module:
    /// root first CA bundle and SHA384 PCRs.
    pub fn nitro() -> Self {
        Self {
            bundle_order: BundleOrder::RootToLeaf,
            expected_digest: Some("SHA384".to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn check_document(&self, document: &AttestationDocument) -> Result<(), AttestError> {
        if document.cabundle.len() > self.max_cabundle_len {
            return Err(AttestError::InvalidFieldValue {
                name: "cabundle",
                reason: "more certificates than the configured maximum",
            });
        }
        if let Some(expected) = &self.expected_digest {
            if document.digest.as_ref() != Some(expected) {
                return Err(AttestError::InvalidFieldValue {
                    name: "digest",
                    reason: "does not match the configured digest",
                });
            }
        }
        Ok(())
    }
}
