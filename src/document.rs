//! The attestation document data model, its parser, and a lenient read path
//! for diagnostics.
//!
//! To learn more about the attestation document fields see:
//! <https://github.com/aws/aws-nitro-enclaves-nsm-api/blob/main/docs/attestation_process.md#22-attestation-document-specification/>.

use ciborium::value::Value;
use serde::{Serialize, Serializer};

use crate::{
    chain::ReferenceTime,
    decode::{decode_envelope, decode_payload, PayloadMap},
    error::AttestError,
    syntactic_validation,
};

/// Typed view over a decoded attestation document payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttestationDocument {
    /// Issuing enclave module.
    pub module_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Hash algorithm used for the PCRs, `None` when the document omits it.
    pub digest: Option<String>,
    /// Platform configuration registers, index 0 first.
    #[serde(serialize_with = "serialize_byte_list")]
    pub pcrs: Vec<Vec<u8>>,
    /// DER encoded certificate whose key signed the envelope.
    #[serde(with = "serde_bytes")]
    pub certificate: Vec<u8>,
    /// DER encoded issuing certificates.
    #[serde(serialize_with = "serialize_byte_list")]
    pub cabundle: Vec<Vec<u8>>,
    /// Key the enclave asked to have attested.
    #[serde(with = "serde_bytes")]
    pub public_key: Option<Vec<u8>>,
    /// Application data the enclave asked to have attested.
    #[serde(with = "serde_bytes")]
    pub user_data: Option<Vec<u8>>,
    /// Caller supplied freshness value.
    #[serde(with = "serde_bytes")]
    pub nonce: Option<Vec<u8>>,
}

impl AttestationDocument {
    /// Decode and parse `cose_sign1` without verifying anything.
    pub fn from_cose_sign1(cose_sign1: &[u8]) -> Result<Self, AttestError> {
        let envelope = decode_envelope(cose_sign1)?;
        parse(&decode_payload(envelope.payload())?)
    }

    /// All PCRs, index 0 first.
    pub fn pcrs(&self) -> &[Vec<u8>] {
        &self.pcrs
    }

    /// PCR at `index`, if the document has that many.
    pub fn pcr(&self, index: usize) -> Option<&[u8]> {
        self.pcrs.get(index).map(Vec::as_slice)
    }

    /// The document's own timestamp, usable as a chain validation time.
    pub fn reference_time(&self) -> ReferenceTime {
        ReferenceTime::from_document_timestamp(self.timestamp)
    }
}

/// Build an [`AttestationDocument`] from a decoded payload map.
///
/// `timestamp`, `module_id`, `pcrs` and `certificate` are required. Absent
/// optional fields, or optional fields set to `null`, become `None` or empty.
/// Keys this crate does not know are ignored.
pub fn parse(map: &PayloadMap) -> Result<AttestationDocument, AttestError> {
    let document = AttestationDocument {
        module_id: module_id(map)?,
        timestamp: timestamp(map)?,
        digest: digest(map)?,
        pcrs: pcrs(map)?,
        certificate: certificate(map)?,
        cabundle: cabundle(map)?,
        public_key: optional_bytes(map, "public_key")?,
        user_data: optional_bytes(map, "user_data")?,
        nonce: optional_bytes(map, "nonce")?,
    };

    syntactic_validation::public_key(document.public_key.as_deref())?;
    syntactic_validation::user_data(document.user_data.as_deref())?;
    syntactic_validation::nonce(document.nonce.as_deref())?;

    Ok(document)
}

/// Every field extracted independently; a field that is missing or invalid is
/// `None` and the reason is listed in `problems`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentFields {
    pub module_id: Option<String>,
    pub timestamp: Option<u64>,
    pub digest: Option<String>,
    #[serde(serialize_with = "serialize_optional_byte_list")]
    pub pcrs: Option<Vec<Vec<u8>>>,
    #[serde(with = "serde_bytes")]
    pub certificate: Option<Vec<u8>>,
    #[serde(serialize_with = "serialize_optional_byte_list")]
    pub cabundle: Option<Vec<Vec<u8>>>,
    #[serde(with = "serde_bytes")]
    pub public_key: Option<Vec<u8>>,
    #[serde(with = "serde_bytes")]
    pub user_data: Option<Vec<u8>>,
    #[serde(with = "serde_bytes")]
    pub nonce: Option<Vec<u8>>,
    /// Human readable reasons for every field that could not be extracted.
    pub problems: Vec<String>,
}

/// Read whatever fields a document carries, whether or not it verifies.
///
/// Only fails when the envelope or the payload map cannot be decoded at all.
pub fn inspect(cose_sign1: &[u8]) -> Result<DocumentFields, AttestError> {
    let envelope = decode_envelope(cose_sign1)?;
    let map = decode_payload(envelope.payload())?;

    let mut problems = Vec::new();
    let module_id = keep(&mut problems, module_id(&map));
    let timestamp = keep(&mut problems, timestamp(&map));
    let digest = keep(&mut problems, digest(&map)).flatten();
    let pcrs = keep(&mut problems, pcrs(&map));
    let certificate = keep(&mut problems, certificate(&map));
    let cabundle = keep(&mut problems, cabundle(&map));
    let public_key = keep(
        &mut problems,
        optional_bytes(&map, "public_key").and_then(|key| {
            syntactic_validation::public_key(key.as_deref())?;
            Ok(key)
        }),
    )
    .flatten();
    let user_data = keep(
        &mut problems,
        optional_bytes(&map, "user_data").and_then(|data| {
            syntactic_validation::user_data(data.as_deref())?;
            Ok(data)
        }),
    )
    .flatten();
    let nonce = keep(
        &mut problems,
        optional_bytes(&map, "nonce").and_then(|nonce| {
            syntactic_validation::nonce(nonce.as_deref())?;
            Ok(nonce)
        }),
    )
    .flatten();

    Ok(DocumentFields {
        module_id,
        timestamp,
        digest,
        pcrs,
        certificate,
        cabundle,
        public_key,
        user_data,
        nonce,
        problems,
    })
}

fn keep<T>(problems: &mut Vec<String>, result: Result<T, AttestError>) -> Option<T> {
    result.map_err(|err| problems.push(err.to_string())).ok()
}

fn required<'a>(map: &'a PayloadMap, name: &'static str) -> Result<&'a Value, AttestError> {
    map.get(name).ok_or(AttestError::MissingField { name })
}

/// `None` for absent and `null` alike.
fn optional<'a>(map: &'a PayloadMap, name: &'static str) -> Option<&'a Value> {
    map.get(name).filter(|value| !value.is_null())
}

fn module_id(map: &PayloadMap) -> Result<String, AttestError> {
    let name = "module_id";
    let id = required(map, name)?
        .as_text()
        .ok_or(AttestError::InvalidFieldType { name })?;
    syntactic_validation::module_id(id)?;
    Ok(id.to_string())
}

fn timestamp(map: &PayloadMap) -> Result<u64, AttestError> {
    let name = "timestamp";
    let integer = required(map, name)?
        .as_integer()
        .ok_or(AttestError::InvalidFieldType { name })?;
    let timestamp = u64::try_from(integer).map_err(|_| AttestError::InvalidFieldValue {
        name,
        reason: "must be an unsigned 64 bit integer",
    })?;
    syntactic_validation::timestamp(timestamp)?;
    Ok(timestamp)
}

fn digest(map: &PayloadMap) -> Result<Option<String>, AttestError> {
    let name = "digest";
    optional(map, name)
        .map(|value| {
            let digest = value
                .as_text()
                .ok_or(AttestError::InvalidFieldType { name })?;
            syntactic_validation::digest(digest)?;
            Ok(digest.to_string())
        })
        .transpose()
}

/// PCRs come either as an array or, as Nitro encodes them, as a map keyed by
/// index. Map keys must be exactly `0..N-1` in declared order.
fn pcrs(map: &PayloadMap) -> Result<Vec<Vec<u8>>, AttestError> {
    let name = "pcrs";
    let bytes = |value: &Value| {
        value
            .as_bytes()
            .cloned()
            .ok_or(AttestError::InvalidFieldType { name })
    };

    let pcrs = match required(map, name)? {
        Value::Array(items) => items.iter().map(bytes).collect::<Result<Vec<_>, _>>()?,
        Value::Map(entries) => {
            let mut pcrs = Vec::with_capacity(entries.len());
            for (position, (key, value)) in entries.iter().enumerate() {
                let index = key
                    .as_integer()
                    .ok_or(AttestError::InvalidFieldType { name })?;
                if u64::try_from(index).ok() != u64::try_from(position).ok() {
                    return Err(AttestError::InvalidFieldValue {
                        name,
                        reason: "indices must be contiguous from 0 in declared order",
                    });
                }
                pcrs.push(bytes(value)?);
            }
            pcrs
        }
        _ => return Err(AttestError::InvalidFieldType { name }),
    };
    syntactic_validation::pcrs(&pcrs)?;
    Ok(pcrs)
}

fn certificate(map: &PayloadMap) -> Result<Vec<u8>, AttestError> {
    let name = "certificate";
    let der = required(map, name)?
        .as_bytes()
        .ok_or(AttestError::InvalidFieldType { name })?;
    syntactic_validation::certificate(der)?;
    Ok(der.clone())
}

fn cabundle(map: &PayloadMap) -> Result<Vec<Vec<u8>>, AttestError> {
    let name = "cabundle";
    let Some(value) = optional(map, name) else {
        return Ok(Vec::new());
    };
    let bundle = value
        .as_array()
        .ok_or(AttestError::InvalidFieldType { name })?
        .iter()
        .map(|entry| {
            entry
                .as_bytes()
                .cloned()
                .ok_or(AttestError::InvalidFieldType { name })
        })
        .collect::<Result<Vec<_>, _>>()?;
    syntactic_validation::cabundle(&bundle)?;
    Ok(bundle)
}

fn optional_bytes(map: &PayloadMap, name: &'static str) -> Result<Option<Vec<u8>>, AttestError> {
    optional(map, name)
        .map(|value| {
            value
                .as_bytes()
                .cloned()
                .ok_or(AttestError::InvalidFieldType { name })
        })
        .transpose()
}

fn serialize_byte_list<S: Serializer>(list: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(list.iter().map(|item| serde_bytes::Bytes::new(item)))
}

fn serialize_optional_byte_list<S: Serializer>(
    list: &Option<Vec<Vec<u8>>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match list {
        Some(list) => serialize_byte_list(list, serializer),
        None => serializer.serialize_none(),
    }
}
