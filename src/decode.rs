//! Decoding of the COSE envelope wrapping an attestation document and of the
//! CBOR map it carries.
//!
//! Nothing here interprets document fields; see [`crate::document`] for that.

use std::collections::BTreeMap;

use ciborium::value::Value;
use coset::{AsCborValue, CoseSign1};

use crate::error::AttestError;

/// Decoded payload: text keys mapped to raw CBOR values.
pub type PayloadMap = BTreeMap<String, Value>;

/// Context string of the COSE_Sign1 `Sig_structure` (RFC 8152 section 4.4).
const SIGNATURE1_CONTEXT: &str = "Signature1";

/// The COSE message types an envelope may claim to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Single signer signed message, tag 18.
    Sign1,
    /// Multi signer signed message, tag 98.
    Sign,
    /// Single recipient MAC, tag 17.
    Mac0,
    /// Multi recipient MAC, tag 97.
    Mac,
    /// Single recipient encrypted message, tag 16.
    Encrypt0,
    /// Multi recipient encrypted message, tag 96.
    Encrypt,
    /// Any other CBOR tag.
    Unknown(u64),
}

impl EnvelopeKind {
    fn from_tag(tag: u64) -> Self {
        match tag {
            18 => Self::Sign1,
            98 => Self::Sign,
            17 => Self::Mac0,
            97 => Self::Mac,
            16 => Self::Encrypt0,
            96 => Self::Encrypt,
            other => Self::Unknown(other),
        }
    }

    /// Classify an untagged COSE array by its shape. A MAC0 has the same shape
    /// as a Sign1 and an Encrypt the same as a Sign, so untagged input can only
    /// be told apart up to that ambiguity.
    fn from_shape(items: &[Value]) -> Option<Self> {
        match items {
            [_, _, _, Value::Bytes(_)] => Some(Self::Sign1),
            [_, _, _, Value::Array(_)] => Some(Self::Sign),
            [_, _, _] => Some(Self::Encrypt0),
            [_, _, _, _, _] => Some(Self::Mac),
            _ => None,
        }
    }
}

/// A decoded COSE_Sign1 envelope. Immutable once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvelope {
    protected_header: Vec<u8>,
    algorithm: Option<coset::Algorithm>,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

impl SignedEnvelope {
    /// Serialized protected header exactly as it appeared on the wire.
    pub fn protected_header(&self) -> &[u8] {
        &self.protected_header
    }

    /// Algorithm named by the protected header, if any.
    pub fn algorithm(&self) -> Option<&coset::Algorithm> {
        self.algorithm.as_ref()
    }

    /// The attestation document bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Raw signature bytes.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The bytes the signer committed to:
    /// `["Signature1", protected, h'', payload]` as definite length CBOR.
    pub fn signing_input(&self) -> Result<Vec<u8>, AttestError> {
        let value = Value::Array(vec![
            Value::Text(SIGNATURE1_CONTEXT.to_string()),
            Value::Bytes(self.protected_header.clone()),
            Value::Bytes(Vec::new()),
            Value::Bytes(self.payload.clone()),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&value, &mut bytes).map_err(|e| {
            AttestError::MalformedEnvelope(format!("cannot encode signing input: {e}"))
        })?;
        Ok(bytes)
    }
}

/// Read exactly one CBOR item from `bytes`, rejecting trailing data.
fn read_single_item(bytes: &[u8]) -> Result<Value, String> {
    let mut reader = bytes;
    let value: Value =
        ciborium::de::from_reader(&mut reader).map_err(|e| format!("invalid CBOR: {e}"))?;
    if !reader.is_empty() {
        return Err(format!("{} trailing bytes after CBOR item", reader.len()));
    }
    Ok(value)
}

/// Decode a COSE_Sign1 envelope, tagged or untagged.
///
/// Any other COSE message type, including the multi signer `COSE_Sign`, is
/// rejected with [`AttestError::MalformedEnvelope`].
pub fn decode_envelope(bytes: &[u8]) -> Result<SignedEnvelope, AttestError> {
    let value = read_single_item(bytes).map_err(AttestError::MalformedEnvelope)?;

    let (kind, inner) = match value {
        Value::Tag(tag, inner) => (EnvelopeKind::from_tag(tag), *inner),
        Value::Array(items) => {
            let kind = EnvelopeKind::from_shape(&items).ok_or_else(|| {
                AttestError::MalformedEnvelope(format!(
                    "untagged array of {} items is not a COSE message",
                    items.len()
                ))
            })?;
            (kind, Value::Array(items))
        }
        _ => {
            return Err(AttestError::MalformedEnvelope(
                "envelope is not a CBOR array".to_string(),
            ))
        }
    };

    if kind != EnvelopeKind::Sign1 {
        return Err(AttestError::MalformedEnvelope(format!(
            "expected a single signer COSE_Sign1 envelope, found {kind:?}"
        )));
    }

    let sign1 = CoseSign1::from_cbor_value(inner).map_err(|e| {
        AttestError::MalformedEnvelope(format!("invalid COSE_Sign1 structure: {e:?}"))
    })?;

    let protected_header = sign1.protected.original_data.ok_or_else(|| {
        AttestError::MalformedEnvelope("protected header bytes unavailable".to_string())
    })?;
    let payload = sign1
        .payload
        .ok_or_else(|| AttestError::MalformedEnvelope("detached payload".to_string()))?;

    Ok(SignedEnvelope {
        protected_header,
        algorithm: sign1.protected.header.alg,
        payload,
        signature: sign1.signature,
    })
}

/// Decode the envelope payload into a map keyed by field name.
///
/// Unknown keys are kept; required keys are checked by
/// [`crate::document::parse`].
pub fn decode_payload(bytes: &[u8]) -> Result<PayloadMap, AttestError> {
    let value = read_single_item(bytes).map_err(AttestError::MalformedPayload)?;

    let entries = match value {
        Value::Map(entries) => entries,
        other => {
            return Err(AttestError::MalformedPayload(format!(
                "expected a CBOR map, found {}",
                value_type_name(&other)
            )))
        }
    };

    let mut map = PayloadMap::new();
    for (key, value) in entries {
        let key = match key {
            Value::Text(key) => key,
            other => {
                return Err(AttestError::MalformedPayload(format!(
                    "map key is {}, expected text",
                    value_type_name(&other)
                )))
            }
        };
        if map.contains_key(&key) {
            return Err(AttestError::MalformedPayload(format!(
                "duplicate key `{key}`"
            )));
        }
        map.insert(key, value);
    }
    Ok(map)
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "integer",
        Value::Bytes(_) => "byte string",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Tag(_, _) => "tag",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "unknown",
    }
}
