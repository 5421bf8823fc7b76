//! Ephemeral certificate chains and signed documents for unit tests.
//!
//! Chains mirror the Nitro layout: a self-signed root, two intermediates and
//! a short lived leaf whose key signs the COSE envelope.

use ciborium::value::Value;
use coset::{iana, CborSerializable, CoseSign1Builder, HeaderBuilder};
use hex_literal::hex;
use p384::{
    ecdsa::{
        signature::{SignatureEncoding as _, Signer},
        Signature, SigningKey,
    },
    pkcs8::DecodePrivateKey,
};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P384_SHA384,
};
use time::OffsetDateTime;

use crate::chain::TrustAnchor;

/// 2020-01-01T00:00:00Z
pub(crate) const CA_NOT_BEFORE: i64 = 1_577_836_800;
/// 2040-01-01T00:00:00Z
pub(crate) const CA_NOT_AFTER: i64 = 2_208_988_800;
/// 2024-07-16T18:58:36Z
pub(crate) const LEAF_NOT_BEFORE: i64 = 1_721_156_316;
/// Three hours and three seconds later, as Nitro issues them.
pub(crate) const LEAF_NOT_AFTER: i64 = LEAF_NOT_BEFORE + 3 * 3600 + 3;
/// Inside the leaf window, in milliseconds.
pub(crate) const DOCUMENT_TIMESTAMP_MS: u64 = 1_721_159_587_239;

pub(crate) const MODULE_ID: &str = "i-059e862454f4a8d8f-enc0190a2f1964172e6";
pub(crate) const PCR0: [u8; 48] = hex!("c8275c3e3cd96b3cb256ae55ef8ce52b2dac4601bbd7698efbb76717b4a77c9473d9fc6b2ea93d7d4cff0fb800e675bf");
pub(crate) const PCR1: [u8; 48] = [0x11; 48];
pub(crate) const PCR2: [u8; 48] = [0x22; 48];

pub(crate) struct TestChain {
    pub root: Vec<u8>,
    /// Leaf to root: `[issuer of leaf, ..., child of root]`.
    pub bundle: Vec<Vec<u8>>,
    pub leaf: Vec<u8>,
    pub leaf_key: SigningKey,
}

impl TestChain {
    pub fn anchor(&self) -> TrustAnchor {
        TrustAnchor::from_der(self.root.clone()).unwrap()
    }
}

fn name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CountryName, "US");
    name.push(DnType::OrganizationName, "Amazon");
    name.push(DnType::CommonName, common_name);
    name
}

fn params(
    common_name: &str,
    (not_before, not_after): (i64, i64),
    is_ca: IsCa,
    key_usages: &[KeyUsagePurpose],
) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = name(common_name);
    params.not_before = OffsetDateTime::from_unix_timestamp(not_before).unwrap();
    params.not_after = OffsetDateTime::from_unix_timestamp(not_after).unwrap();
    params.is_ca = is_ca;
    params.key_usages = key_usages.to_vec();
    params
}

fn key() -> KeyPair {
    KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).unwrap()
}

const CA_KEY_USAGES: &[KeyUsagePurpose] = &[KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

/// Shape of a generated chain. The default is the Nitro layout with
/// unconstrained CAs.
#[derive(Debug, Clone)]
pub(crate) struct ChainOptions {
    pub root_constraints: BasicConstraints,
    pub root_key_usages: Vec<KeyUsagePurpose>,
    pub instance_constraints: BasicConstraints,
    pub instance_key_usages: Vec<KeyUsagePurpose>,
    pub instance_window: (i64, i64),
    pub leaf_key_usages: Vec<KeyUsagePurpose>,
    /// Put an extra CA, issued by the instance certificate, above the leaf.
    pub sub_ca: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            root_constraints: BasicConstraints::Unconstrained,
            root_key_usages: CA_KEY_USAGES.to_vec(),
            instance_constraints: BasicConstraints::Unconstrained,
            instance_key_usages: CA_KEY_USAGES.to_vec(),
            instance_window: (CA_NOT_BEFORE, CA_NOT_AFTER),
            leaf_key_usages: vec![KeyUsagePurpose::DigitalSignature],
            sub_ca: false,
        }
    }
}

/// Root, two intermediates and a leaf valid for three hours.
pub(crate) fn generate_chain() -> TestChain {
    build_chain(&ChainOptions::default())
}

/// Like [`generate_chain`], with the leaf's direct issuer valid only inside
/// `[not_before, not_after]`.
pub(crate) fn generate_chain_with_intermediate_window(not_before: i64, not_after: i64) -> TestChain {
    build_chain(&ChainOptions {
        instance_window: (not_before, not_after),
        ..ChainOptions::default()
    })
}

pub(crate) fn build_chain(options: &ChainOptions) -> TestChain {
    let ca_window = (CA_NOT_BEFORE, CA_NOT_AFTER);

    let root_key = key();
    let root = params(
        "aws.nitro-enclaves",
        ca_window,
        IsCa::Ca(options.root_constraints.clone()),
        &options.root_key_usages,
    )
    .self_signed(&root_key)
    .unwrap();

    let regional_key = key();
    let regional = params(
        "us-east-1.aws.nitro-enclaves",
        ca_window,
        IsCa::Ca(BasicConstraints::Unconstrained),
        CA_KEY_USAGES,
    )
    .signed_by(&regional_key, &root, &root_key)
    .unwrap();

    let instance_key = key();
    let instance = params(
        "i-059e862454f4a8d8f.us-east-1.aws.nitro-enclaves",
        options.instance_window,
        IsCa::Ca(options.instance_constraints.clone()),
        &options.instance_key_usages,
    )
    .signed_by(&instance_key, &regional, &regional_key)
    .unwrap();

    let mut bundle = vec![instance.der().to_vec(), regional.der().to_vec()];
    let sub_ca_key = key();
    let sub_ca = options.sub_ca.then(|| {
        params(
            "enclave-sub-ca.us-east-1.aws.nitro-enclaves",
            ca_window,
            IsCa::Ca(BasicConstraints::Unconstrained),
            CA_KEY_USAGES,
        )
        .signed_by(&sub_ca_key, &instance, &instance_key)
        .unwrap()
    });
    let (leaf_issuer, leaf_issuer_key) = match &sub_ca {
        Some(sub_ca) => {
            bundle.insert(0, sub_ca.der().to_vec());
            (sub_ca, &sub_ca_key)
        }
        None => (&instance, &instance_key),
    };

    let leaf_key = key();
    let leaf = params(
        "i-059e862454f4a8d8f-enc0190a2f1964172e6.us-east-1.aws",
        (LEAF_NOT_BEFORE, LEAF_NOT_AFTER),
        IsCa::ExplicitNoCa,
        &options.leaf_key_usages,
    )
    .signed_by(&leaf_key, leaf_issuer, leaf_issuer_key)
    .unwrap();

    TestChain {
        root: root.der().to_vec(),
        bundle,
        leaf: leaf.der().to_vec(),
        leaf_key: SigningKey::from_pkcs8_der(&leaf_key.serialize_der()).unwrap(),
    }
}

/// Payload map entries for a document certified by `chain`, in the field
/// order Nitro uses.
pub(crate) fn document_entries(chain: &TestChain) -> Vec<(Value, Value)> {
    let text = |s: &str| Value::Text(s.to_string());
    let pcrs = [PCR0, PCR1, PCR2]
        .iter()
        .enumerate()
        .map(|(index, pcr)| (Value::Integer((index as u64).into()), Value::Bytes(pcr.to_vec())))
        .collect();
    vec![
        (text("module_id"), text(MODULE_ID)),
        (text("digest"), text("SHA384")),
        (
            text("timestamp"),
            Value::Integer(DOCUMENT_TIMESTAMP_MS.into()),
        ),
        (text("pcrs"), Value::Map(pcrs)),
        (text("certificate"), Value::Bytes(chain.leaf.clone())),
        (
            text("cabundle"),
            Value::Array(chain.bundle.iter().cloned().map(Value::Bytes).collect()),
        ),
        (text("public_key"), Value::Null),
        (text("user_data"), Value::Bytes(b"hello enclave".to_vec())),
        (text("nonce"), Value::Null),
    ]
}

/// Drop the entry named `name`.
pub(crate) fn without(mut entries: Vec<(Value, Value)>, name: &str) -> Vec<(Value, Value)> {
    entries.retain(|(key, _)| !matches!(key, Value::Text(k) if k == name));
    entries
}

/// Replace the value of the entry named `name`.
pub(crate) fn with(mut entries: Vec<(Value, Value)>, name: &str, value: Value) -> Vec<(Value, Value)> {
    for (key, slot) in entries.iter_mut() {
        if matches!(key, Value::Text(k) if k == name) {
            *slot = value.clone();
        }
    }
    entries
}

pub(crate) fn encode_map(entries: Vec<(Value, Value)>) -> Vec<u8> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(&Value::Map(entries), &mut out).unwrap();
    out
}

/// Untagged COSE_Sign1 over `payload` with an ES384 protected header.
pub(crate) fn sign_envelope(key: &SigningKey, payload: Vec<u8>) -> Vec<u8> {
    sign_envelope_with_algorithm(key, payload, iana::Algorithm::ES384)
}

pub(crate) fn sign_envelope_with_algorithm(
    key: &SigningKey,
    payload: Vec<u8>,
    algorithm: iana::Algorithm,
) -> Vec<u8> {
    CoseSign1Builder::new()
        .protected(HeaderBuilder::new().algorithm(algorithm).build())
        .payload(payload)
        .create_signature(b"", |tbs| {
            let signature: Signature = key.sign(tbs);
            signature.to_bytes().to_vec()
        })
        .build()
        .to_vec()
        .unwrap()
}

/// A complete, valid attestation document for `chain`.
pub(crate) fn signed_document(chain: &TestChain) -> Vec<u8> {
    sign_envelope(&chain.leaf_key, encode_map(document_entries(chain)))
}

/// Flip one bit of the trailing signature bytes of an untagged envelope.
/// The signature is the last 96 bytes of the encoding.
pub(crate) fn flip_signature_bit(envelope: &[u8], bit: usize) -> Vec<u8> {
    let mut out = envelope.to_vec();
    let start = out.len() - 96;
    out[start + bit / 8] ^= 1 << (bit % 8);
    out
}
