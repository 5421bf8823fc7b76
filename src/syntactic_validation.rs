//! Syntactic checks on individual attestation document fields.
//!
//! See <https://github.com/aws/aws-nitro-enclaves-nsm-api/blob/main/docs/attestation_process.md#32-syntactical-validation>.
//! These run after type checking and before anything cryptographic.

use x509_parser::{certificate::X509Certificate, prelude::FromDer};

use crate::error::AttestError;

/// Hash algorithms a document may name in `digest`.
const DIGESTS: &[&str] = &["SHA256", "SHA384", "SHA512"];
/// Max number of PCRs a document may carry.
const MAX_PCRS_LENGTH: usize = 32;
/// Allowed PCR lengths in bytes, one per supported digest.
const PCR_LENGTHS: &[usize] = &[32, 48, 64];
/// Max length of the `public_key` field.
const MAX_PUBLIC_KEY_LENGTH: usize = 1024;
/// Max length of the `user_data` and `nonce` fields.
const MAX_USER_DATA_LENGTH: usize = 512;

fn invalid(name: &'static str, reason: &'static str) -> AttestError {
    AttestError::InvalidFieldValue { name, reason }
}

/// Mandatory field, must be non-empty.
pub(crate) fn module_id(id: &str) -> Result<(), AttestError> {
    if id.is_empty() {
        return Err(invalid("module_id", "must not be empty"));
    }
    Ok(())
}

/// Must be one of the digests the enclave hardware can produce.
pub(crate) fn digest(digest: &str) -> Result<(), AttestError> {
    if !DIGESTS.contains(&digest) {
        return Err(invalid("digest", "must be one of SHA256, SHA384, SHA512"));
    }
    Ok(())
}

/// At most 32 registers, each the length of a supported digest.
pub(crate) fn pcrs(pcrs: &[Vec<u8>]) -> Result<(), AttestError> {
    if pcrs.len() > MAX_PCRS_LENGTH {
        return Err(invalid("pcrs", "more than 32 registers"));
    }
    if pcrs.iter().any(|pcr| !PCR_LENGTHS.contains(&pcr.len())) {
        return Err(invalid("pcrs", "register length must be 32, 48 or 64 bytes"));
    }
    Ok(())
}

fn is_der_certificate(der: &[u8]) -> bool {
    matches!(X509Certificate::from_der(der), Ok((rest, _)) if rest.is_empty())
}

/// Non-empty DER encoded X.509.
pub(crate) fn certificate(der: &[u8]) -> Result<(), AttestError> {
    if !is_der_certificate(der) {
        return Err(invalid("certificate", "not a DER encoded X.509 certificate"));
    }
    Ok(())
}

/// Every entry must be a non-empty DER encoded X.509 certificate. The bundle
/// itself may be empty.
pub(crate) fn cabundle(cabundle: &[Vec<u8>]) -> Result<(), AttestError> {
    if !cabundle.iter().all(|der| is_der_certificate(der)) {
        return Err(invalid(
            "cabundle",
            "entry is not a DER encoded X.509 certificate",
        ));
    }
    Ok(())
}

/// Milliseconds since the epoch, must be set.
pub(crate) fn timestamp(timestamp: u64) -> Result<(), AttestError> {
    if timestamp == 0 {
        return Err(invalid("timestamp", "must be greater than zero"));
    }
    Ok(())
}

pub(crate) fn public_key(public_key: Option<&[u8]>) -> Result<(), AttestError> {
    match public_key {
        Some(key) if key.is_empty() || key.len() > MAX_PUBLIC_KEY_LENGTH => {
            Err(invalid("public_key", "length must be between 1 and 1024 bytes"))
        }
        _ => Ok(()),
    }
}

pub(crate) fn user_data(user_data: Option<&[u8]>) -> Result<(), AttestError> {
    match user_data {
        Some(data) if data.len() > MAX_USER_DATA_LENGTH => {
            Err(invalid("user_data", "longer than 512 bytes"))
        }
        _ => Ok(()),
    }
}

pub(crate) fn nonce(nonce: Option<&[u8]>) -> Result<(), AttestError> {
    match nonce {
        Some(data) if data.len() > MAX_USER_DATA_LENGTH => {
            Err(invalid("nonce", "longer than 512 bytes"))
        }
        _ => Ok(()),
    }
}
