//! Signing-key collaborator. The core never touches key material directly beyond
//! invoking this trait; a host wires in whatever key store it already has (HSM,
//! vault, file-backed PEM) the same way secrets get threaded through `Config`
//! for `argon2`/`jsonwebtoken` elsewhere.

use ring::rand::SystemRandom;
use ring::signature::{self, KeyPair, RsaKeyPair};

use crate::error::XmlError;

/// A signing credential: a private key plus the `KeyInfo` material a peer needs
/// to locate the matching public key in metadata.
pub trait Credential: Send + Sync {
    /// Opaque `KeyInfo` bytes (e.g. a DER-encoded certificate) to embed alongside
    /// a detached signature, when the binding calls for it.
    fn key_info(&self) -> Option<Vec<u8>>;

    /// RSA-SHA256 signature over `data`.
    fn sign_rsa_sha256(&self, data: &[u8]) -> Result<Vec<u8>, XmlError>;

    /// RSA-SHA1 signature over `data`, used when a peer only supports legacy
    /// `SigAlg` values.
    fn sign_rsa_sha1(&self, data: &[u8]) -> Result<Vec<u8>, XmlError>;

    /// The DER-encoded RSA public key corresponding to this credential, for
    /// embedding in generated metadata or comparing against a `KeyDescriptor`.
    fn public_key_der(&self) -> &[u8];
}

/// In-process RSA credential backed by `ring`. Sufficient for signing outbound
/// messages and for tests; a production host will usually back `Credential`
/// with an HSM-resident key instead.
pub struct InMemoryRsaCredential {
    key_pair: RsaKeyPair,
    key_info: Option<Vec<u8>>,
}

impl InMemoryRsaCredential {
    /// Build from a PKCS#8-encoded RSA private key.
    pub fn from_pkcs8(pkcs8_der: &[u8], key_info: Option<Vec<u8>>) -> Result<Self, XmlError> {
        let key_pair = RsaKeyPair::from_pkcs8(pkcs8_der)
            .map_err(|e| XmlError::Signing(format!("invalid PKCS#8 RSA key: {e}")))?;
        Ok(Self { key_pair, key_info })
    }

    fn sign(&self, data: &[u8], alg: &'static dyn signature::RsaEncoding) -> Result<Vec<u8>, XmlError> {
        let rng = SystemRandom::new();
        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(alg, &rng, data, &mut signature)
            .map_err(|e| XmlError::Signing(format!("RSA signing failed: {e}")))?;
        Ok(signature)
    }
}

impl Credential for InMemoryRsaCredential {
    fn key_info(&self) -> Option<Vec<u8>> {
        self.key_info.clone()
    }

    fn sign_rsa_sha256(&self, data: &[u8]) -> Result<Vec<u8>, XmlError> {
        self.sign(data, &signature::RSA_PKCS1_SHA256)
    }

    fn sign_rsa_sha1(&self, data: &[u8]) -> Result<Vec<u8>, XmlError> {
        self.sign(data, &signature::RSA_PKCS1_SHA1)
    }

    fn public_key_der(&self) -> &[u8] {
        self.key_pair.public().as_ref()
    }
}

/// Verify an RSA signature against a raw (SubjectPublicKeyInfo-less) RSA public
/// key, as stored on a `KeyDescriptor`. This is the verification half of
/// `Credential::sign_rsa_*`; it lives here rather than on the trust engine so
/// both the trust engine and the `XmlSecurityProvider` detached-signature path
/// can share it.
pub fn verify_rsa_sha256(public_key_der: &[u8], data: &[u8], sig: &[u8]) -> bool {
    let key = signature::UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA256, public_key_der);
    key.verify(data, sig).is_ok()
}

pub fn verify_rsa_sha1(public_key_der: &[u8], data: &[u8], sig: &[u8]) -> bool {
    let key = signature::UnparsedPublicKey::new(&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY, public_key_der);
    key.verify(data, sig).is_ok()
}
