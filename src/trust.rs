//! Trust engines (C4): decide whether a signature or raw credential is
//! trustworthy against a set of `KeyDescriptor`s drawn from metadata.

use crate::credential::{verify_rsa_sha1, verify_rsa_sha256};
use crate::metadata::KeyDescriptor;
use crate::xml::{SamlObject, XmlSecurityProvider, ALG_RSA_SHA1};

/// Evaluates trust for an already-extracted signature against a role's
/// signing keys. Kept separate from `XmlSecurityProvider::verify_xml_signature`
/// so a policy rule can compose multiple trust engines (PKIX validation,
/// explicit-key validation, ...) without the XML layer knowing about any of
/// them, per design note 6.
pub trait TrustEngine: Send + Sync {
    /// Validates `obj`'s embedded XML signature against `candidates`.
    fn validate_xml_signature(
        &self,
        obj: &SamlObject,
        candidates: &[KeyDescriptor],
        xml: &dyn XmlSecurityProvider,
    ) -> bool;

    /// Validates a detached signature (HTTP-Redirect / SimpleSign) over
    /// `signed_bytes` against `candidates`.
    fn validate_detached_signature(
        &self,
        signed_bytes: &[u8],
        signature_alg: &str,
        signature_value: &[u8],
        candidates: &[KeyDescriptor],
    ) -> bool;
}

/// The straightforward engine: try every candidate signing key directly,
/// no PKIX path-building. Grounded on the same "explicit trusted keys" model
/// the metadata-driven `KeyDescriptor` list already implies.
#[derive(Default)]
pub struct ExplicitKeyTrustEngine;

impl ExplicitKeyTrustEngine {
    pub fn new() -> Self {
        Self
    }
}

impl TrustEngine for ExplicitKeyTrustEngine {
    fn validate_xml_signature(
        &self,
        obj: &SamlObject,
        candidates: &[KeyDescriptor],
        xml: &dyn XmlSecurityProvider,
    ) -> bool {
        xml.verify_xml_signature(obj, candidates).unwrap_or(false)
    }

    fn validate_detached_signature(
        &self,
        signed_bytes: &[u8],
        signature_alg: &str,
        signature_value: &[u8],
        candidates: &[KeyDescriptor],
    ) -> bool {
        let verify_fn: fn(&[u8], &[u8], &[u8]) -> bool = if signature_alg == ALG_RSA_SHA1 {
            verify_rsa_sha1
        } else {
            verify_rsa_sha256
        };
        candidates
            .iter()
            .any(|k| verify_fn(&k.public_key_der, signed_bytes, signature_value))
    }
}

/// Tries each configured engine in order, succeeding on the first one that
/// trusts the signature — mirrors `ChainingTrustEngine` in the original
/// object model (design note 6).
#[derive(Default)]
pub struct ChainingTrustEngine {
    engines: Vec<Box<dyn TrustEngine>>,
}

impl ChainingTrustEngine {
    pub fn new() -> Self {
        Self { engines: Vec::new() }
    }

    pub fn with_engine(mut self, engine: Box<dyn TrustEngine>) -> Self {
        self.engines.push(engine);
        self
    }
}

impl TrustEngine for ChainingTrustEngine {
    fn validate_xml_signature(
        &self,
        obj: &SamlObject,
        candidates: &[KeyDescriptor],
        xml: &dyn XmlSecurityProvider,
    ) -> bool {
        self.engines
            .iter()
            .any(|engine| engine.validate_xml_signature(obj, candidates, xml))
    }

    fn validate_detached_signature(
        &self,
        signed_bytes: &[u8],
        signature_alg: &str,
        signature_value: &[u8],
        candidates: &[KeyDescriptor],
    ) -> bool {
        self.engines
            .iter()
            .any(|engine| engine.validate_detached_signature(signed_bytes, signature_alg, signature_value, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, InMemoryRsaCredential};
    use crate::xml::{DefaultXmlSecurityProvider, MessageKind, SamlVersion, ALG_RSA_SHA256};

    fn test_credential() -> InMemoryRsaCredential {
        InMemoryRsaCredential::from_pkcs8(crate::testing::TEST_RSA_PKCS8_DER, None).unwrap()
    }

    #[test]
    fn explicit_key_engine_trusts_matching_key_only() {
        let provider = DefaultXmlSecurityProvider::new();
        let credential = test_credential();
        let mut obj = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_t1");
        obj.issuer = Some("https://sp.example".to_string());
        provider
            .sign(&mut obj, &credential, ALG_RSA_SHA256, "http://www.w3.org/2001/04/xmlenc#sha256")
            .unwrap();

        let engine = ExplicitKeyTrustEngine::new();
        let good = [KeyDescriptor::signing(credential.public_key_der().to_vec())];
        assert!(engine.validate_xml_signature(&obj, &good, &provider));

        let bad = [KeyDescriptor::signing(vec![9u8; 270])];
        assert!(!engine.validate_xml_signature(&obj, &bad, &provider));
    }

    #[test]
    fn chaining_engine_succeeds_if_any_member_trusts() {
        let provider = DefaultXmlSecurityProvider::new();
        let credential = test_credential();
        let mut obj = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_t2");
        provider
            .sign(&mut obj, &credential, ALG_RSA_SHA256, "http://www.w3.org/2001/04/xmlenc#sha256")
            .unwrap();

        let chain = ChainingTrustEngine::new()
            .with_engine(Box::new(ExplicitKeyTrustEngine::new()))
            .with_engine(Box::new(ExplicitKeyTrustEngine::new()));

        let good = [KeyDescriptor::signing(credential.public_key_der().to_vec())];
        assert!(chain.validate_xml_signature(&obj, &good, &provider));

        let bad: [KeyDescriptor; 0] = [];
        assert!(!chain.validate_xml_signature(&obj, &bad, &provider));
    }
}
