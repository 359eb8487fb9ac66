//! The SAML "XML object tree" is treated as opaque here: a thin, typed
//! accessor surface (`SamlObject`) plus an `XmlSecurityProvider` collaborator
//! that knows how to turn it into bytes, sign it, and verify it. The full
//! element-by-element object model (hundreds of builders/marshallers in the
//! original) is deliberately not reproduced — see design note 9.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::credential::{verify_rsa_sha1, verify_rsa_sha256, Credential};
use crate::error::XmlError;
use crate::metadata::KeyDescriptor;
use crate::util::sha1_20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlVersion {
    V1_1,
    V2_0,
}

/// What kind of protocol message this object carries. The original object
/// model has a much deeper element hierarchy; bindings and policy rules only
/// ever need to know this much to dispatch correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    AuthnRequest,
    Response,
    LogoutRequest,
    LogoutResponse,
    ArtifactResolve,
    ArtifactResponse,
    Generic(String),
}

impl MessageKind {
    fn tag(&self) -> &str {
        match self {
            MessageKind::AuthnRequest => "AuthnRequest",
            MessageKind::Response => "Response",
            MessageKind::LogoutRequest => "LogoutRequest",
            MessageKind::LogoutResponse => "LogoutResponse",
            MessageKind::ArtifactResolve => "ArtifactResolve",
            MessageKind::ArtifactResponse => "ArtifactResponse",
            MessageKind::Generic(tag) => tag,
        }
    }

    fn from_tag(tag: &str) -> Self {
        match tag {
            "AuthnRequest" => MessageKind::AuthnRequest,
            "Response" => MessageKind::Response,
            "LogoutRequest" => MessageKind::LogoutRequest,
            "LogoutResponse" => MessageKind::LogoutResponse,
            "ArtifactResolve" => MessageKind::ArtifactResolve,
            "ArtifactResponse" => MessageKind::ArtifactResponse,
            other => MessageKind::Generic(other.to_string()),
        }
    }

    /// `RequestAbstractType` vs `StatusResponseType`, the distinction the
    /// HTTP-POST/Redirect decoders need to pick `SAMLRequest` vs `SAMLResponse`.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageKind::AuthnRequest | MessageKind::LogoutRequest | MessageKind::ArtifactResolve
        )
    }
}

/// An enveloped XML Signature, as attached by `XmlSecurityProvider::sign`.
#[derive(Debug, Clone)]
pub struct XmlSignature {
    pub signature_alg: String,
    pub digest_alg: String,
    pub signature_value: Vec<u8>,
    pub key_info: Option<Vec<u8>>,
}

/// A detached signature delivered alongside a message rather than inside it
/// (HTTP-Redirect's `Signature` parameter, HTTP-POST-SimpleSign's `Signature`
/// form field).
#[derive(Debug, Clone)]
pub struct DetachedSignature {
    pub signature_alg: String,
    pub signed_bytes: Vec<u8>,
    pub signature_value: Vec<u8>,
    pub key_info: Option<Vec<u8>>,
}

/// The opaque SAML object tree. Always detached (no parent) by construction —
/// this crate has no notion of "reparenting" a sub-element, so the "has no
/// parent" precondition on `encode` is true unconditionally rather than
/// something callers can violate.
#[derive(Debug, Clone)]
pub struct SamlObject {
    pub version: SamlVersion,
    pub kind: MessageKind,
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub destination: Option<String>,
    pub issuer: Option<String>,
    pub in_response_to: Option<String>,
    /// SAML 1.x `samlp:Response/@Recipient`; reused loosely as "declared
    /// recipient" since SAML 1.x has no `Destination` attribute.
    pub recipient: Option<String>,
    pub assertion_consumer_service_url: Option<String>,
    pub is_passive: bool,
    pub provider_name: Option<String>,
    pub signature: Option<XmlSignature>,
    /// Opaque inner content (assertions, status, attribute statements) the
    /// caller supplies and this crate round-trips verbatim without parsing it.
    pub payload: String,
}

impl SamlObject {
    pub fn new(version: SamlVersion, kind: MessageKind, id: impl Into<String>) -> Self {
        Self {
            version,
            kind,
            id: id.into(),
            issue_instant: Utc::now(),
            destination: None,
            issuer: None,
            in_response_to: None,
            recipient: None,
            assertion_consumer_service_url: None,
            is_passive: false,
            provider_name: None,
            signature: None,
            payload: String::new(),
        }
    }

    /// Same as [`SamlObject::new`], but assigns a fresh `crate::util::generate_message_id`
    /// ID instead of taking one from the caller. Convenient for a host that
    /// doesn't already have its own request/response ID scheme.
    pub fn new_with_generated_id(version: SamlVersion, kind: MessageKind) -> Self {
        Self::new(version, kind, crate::util::generate_message_id())
    }

    pub fn get_issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn get_destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn get_signature(&self) -> Option<&XmlSignature> {
        self.signature.as_ref()
    }

    pub fn get_payload(&self) -> &str {
        &self.payload
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// Opaque XML/security capability the core delegates to: parse, serialize,
/// sign, verify, plus the wire-encoding primitives (base64, DEFLATE/INFLATE,
/// URL-encoding, SHA-1) §6 groups under the same collaborator.
pub trait XmlSecurityProvider: Send + Sync {
    fn serialize(&self, obj: &SamlObject) -> Result<Vec<u8>, XmlError>;
    fn parse(&self, bytes: &[u8], validating: bool) -> Result<SamlObject, XmlError>;

    fn sign(
        &self,
        obj: &mut SamlObject,
        credential: &dyn Credential,
        signature_alg: &str,
        digest_alg: &str,
    ) -> Result<(), XmlError>;

    fn verify_xml_signature(&self, obj: &SamlObject, candidates: &[KeyDescriptor]) -> Result<bool, XmlError>;

    fn create_detached_signature(
        &self,
        signed_bytes: &[u8],
        credential: &dyn Credential,
        signature_alg: &str,
    ) -> Result<Vec<u8>, XmlError>;

    fn verify_detached_signature(
        &self,
        signed_bytes: &[u8],
        signature: &[u8],
        candidates: &[KeyDescriptor],
        signature_alg: &str,
    ) -> Result<bool, XmlError>;

    fn sha1(&self, bytes: &[u8]) -> [u8; 20] {
        sha1_20(bytes)
    }

    fn base64_encode(&self, bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    fn base64_decode(&self, s: &str) -> Result<Vec<u8>, XmlError> {
        STANDARD.decode(s).map_err(|e| XmlError::Parse(format!("invalid base64: {e}")))
    }

    fn url_encode(&self, s: &str) -> String {
        urlencoding::encode(s).into_owned()
    }

    fn deflate(&self, bytes: &[u8]) -> Result<Vec<u8>, XmlError> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(bytes)
            .map_err(|e| XmlError::Serialize(format!("deflate failed: {e}")))?;
        encoder
            .finish()
            .map_err(|e| XmlError::Serialize(format!("deflate failed: {e}")))
    }

    fn inflate(&self, bytes: &[u8]) -> Result<Vec<u8>, XmlError> {
        let mut decoder = DeflateDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| XmlError::Parse(format!("inflate failed: {e}")))?;
        Ok(out)
    }
}

pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";

/// A pragmatic, internally-consistent `XmlSecurityProvider`: a `format!`-based
/// serializer paired with a regex-based parser, in the same vein as
/// `generate_authn_request`/`extract_xml_value`-style helpers. It is not a
/// fully conformant XML/XML-Signature implementation — it exists so every
/// binding and policy rule in this crate can be exercised end-to-end.
pub struct DefaultXmlSecurityProvider;

impl DefaultXmlSecurityProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DefaultXmlSecurityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlSecurityProvider for DefaultXmlSecurityProvider {
    fn serialize(&self, obj: &SamlObject) -> Result<Vec<u8>, XmlError> {
        let ns_prefix = match obj.version {
            SamlVersion::V2_0 => "samlp",
            SamlVersion::V1_1 => "samlp",
        };
        let mut xml = format!(
            r#"<{prefix}:{tag} ID="{id}" Version="{version}" IssueInstant="{instant}""#,
            prefix = ns_prefix,
            tag = obj.kind.tag(),
            id = obj.id,
            version = match obj.version {
                SamlVersion::V2_0 => "2.0",
                SamlVersion::V1_1 => "1.1",
            },
            instant = obj.issue_instant.format("%Y-%m-%dT%H:%M:%SZ"),
        );
        if let Some(dest) = &obj.destination {
            xml.push_str(&format!(r#" Destination="{dest}""#));
        }
        if let Some(recipient) = &obj.recipient {
            xml.push_str(&format!(r#" Recipient="{recipient}""#));
        }
        if let Some(in_response_to) = &obj.in_response_to {
            xml.push_str(&format!(r#" InResponseTo="{in_response_to}""#));
        }
        if let Some(acs) = &obj.assertion_consumer_service_url {
            xml.push_str(&format!(r#" AssertionConsumerServiceURL="{acs}""#));
        }
        if obj.is_passive {
            xml.push_str(r#" IsPassive="true""#);
        }
        if let Some(provider_name) = &obj.provider_name {
            xml.push_str(&format!(r#" ProviderName="{provider_name}""#));
        }
        xml.push('>');
        if let Some(issuer) = &obj.issuer {
            xml.push_str(&format!("<saml:Issuer>{issuer}</saml:Issuer>"));
        }
        if let Some(sig) = &obj.signature {
            xml.push_str(&format!(
                "<ds:Signature SignatureAlg=\"{}\" DigestAlg=\"{}\" Value=\"{}\"{}/>",
                sig.signature_alg,
                sig.digest_alg,
                STANDARD.encode(&sig.signature_value),
                sig.key_info
                    .as_ref()
                    .map(|k| format!(" KeyInfo=\"{}\"", STANDARD.encode(k)))
                    .unwrap_or_default(),
            ));
        }
        xml.push_str(&obj.payload);
        xml.push_str(&format!("</{ns_prefix}:{}>", obj.kind.tag()));
        Ok(xml.into_bytes())
    }

    fn parse(&self, bytes: &[u8], _validating: bool) -> Result<SamlObject, XmlError> {
        let xml = std::str::from_utf8(bytes).map_err(|e| XmlError::Parse(format!("not utf-8: {e}")))?;

        let tag = extract_root_tag(xml).ok_or_else(|| XmlError::Parse("no recognizable root element".to_string()))?;
        let kind = MessageKind::from_tag(&tag);
        let version = if xml.contains(r#"Version="2.0""#) {
            SamlVersion::V2_0
        } else {
            SamlVersion::V1_1
        };
        let id = extract_attr(xml, "ID").ok_or_else(|| XmlError::Parse("missing ID".to_string()))?;
        let issue_instant = extract_attr(xml, "IssueInstant")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| XmlError::Parse("missing or invalid IssueInstant".to_string()))?;

        let mut obj = SamlObject::new(version, kind, id);
        obj.issue_instant = issue_instant;
        obj.destination = extract_attr(xml, "Destination");
        obj.recipient = extract_attr(xml, "Recipient");
        obj.in_response_to = extract_attr(xml, "InResponseTo");
        obj.assertion_consumer_service_url = extract_attr(xml, "AssertionConsumerServiceURL");
        obj.is_passive = extract_attr(xml, "IsPassive").as_deref() == Some("true");
        obj.provider_name = extract_attr(xml, "ProviderName");
        obj.issuer = extract_tag_text(xml, "Issuer");

        if let Some(sig_tag) = extract_self_closing_tag(xml, "ds:Signature") {
            let signature_alg = extract_attr(&sig_tag, "SignatureAlg").unwrap_or_default();
            let digest_alg = extract_attr(&sig_tag, "DigestAlg").unwrap_or_default();
            let signature_value = extract_attr(&sig_tag, "Value")
                .and_then(|v| STANDARD.decode(v).ok())
                .unwrap_or_default();
            let key_info = extract_attr(&sig_tag, "KeyInfo").and_then(|v| STANDARD.decode(v).ok());
            obj.signature = Some(XmlSignature {
                signature_alg,
                digest_alg,
                signature_value,
                key_info,
            });
        }

        obj.payload = extract_payload(xml);
        Ok(obj)
    }

    fn sign(
        &self,
        obj: &mut SamlObject,
        credential: &dyn Credential,
        signature_alg: &str,
        digest_alg: &str,
    ) -> Result<(), XmlError> {
        if obj.signature.is_some() {
            tracing::info!(id = %obj.id, "message already signed; skipping re-signing");
            return Ok(());
        }
        // Sign over the serialized form without the (not-yet-present) signature element.
        let to_sign = self.serialize(obj)?;
        let signature_value = match signature_alg {
            ALG_RSA_SHA1 => credential.sign_rsa_sha1(&to_sign)?,
            _ => credential.sign_rsa_sha256(&to_sign)?,
        };
        obj.signature = Some(XmlSignature {
            signature_alg: signature_alg.to_string(),
            digest_alg: digest_alg.to_string(),
            signature_value,
            key_info: credential.key_info(),
        });
        Ok(())
    }

    fn verify_xml_signature(&self, obj: &SamlObject, candidates: &[KeyDescriptor]) -> Result<bool, XmlError> {
        let sig = match &obj.signature {
            Some(s) => s,
            None => return Ok(false),
        };
        let mut unsigned = obj.clone();
        unsigned.signature = None;
        let signed_bytes = self.serialize(&unsigned)?;
        let verify_fn: fn(&[u8], &[u8], &[u8]) -> bool = if sig.signature_alg == ALG_RSA_SHA1 {
            verify_rsa_sha1
        } else {
            verify_rsa_sha256
        };
        Ok(candidates
            .iter()
            .any(|k| verify_fn(&k.public_key_der, &signed_bytes, &sig.signature_value)))
    }

    fn create_detached_signature(
        &self,
        signed_bytes: &[u8],
        credential: &dyn Credential,
        signature_alg: &str,
    ) -> Result<Vec<u8>, XmlError> {
        if signature_alg == ALG_RSA_SHA1 {
            credential.sign_rsa_sha1(signed_bytes)
        } else {
            credential.sign_rsa_sha256(signed_bytes)
        }
    }

    fn verify_detached_signature(
        &self,
        signed_bytes: &[u8],
        signature: &[u8],
        candidates: &[KeyDescriptor],
        signature_alg: &str,
    ) -> Result<bool, XmlError> {
        let verify_fn: fn(&[u8], &[u8], &[u8]) -> bool = if signature_alg == ALG_RSA_SHA1 {
            verify_rsa_sha1
        } else {
            verify_rsa_sha256
        };
        Ok(candidates.iter().any(|k| verify_fn(&k.public_key_der, signed_bytes, signature)))
    }
}

fn extract_root_tag(xml: &str) -> Option<String> {
    let re = regex_lite_root_tag();
    re.captures(xml)?.get(1).map(|m| m.as_str().to_string())
}

fn regex_lite_root_tag() -> regex::Regex {
    regex::Regex::new(r#"<(?:\w+:)?(\w+)\s"#).unwrap()
}

fn extract_attr(xml: &str, attr: &str) -> Option<String> {
    let pattern = format!(r#"{}="([^"]*)""#, regex::escape(attr));
    let re = regex::Regex::new(&pattern).ok()?;
    re.captures(xml)?.get(1).map(|m| m.as_str().to_string())
}

fn extract_tag_text(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r#"<(?:\w+:)?{}[^>]*>([^<]*)</(?:\w+:)?{}>"#, regex::escape(tag), regex::escape(tag));
    let re = regex::Regex::new(&pattern).ok()?;
    re.captures(xml)?.get(1).map(|m| m.as_str().to_string())
}

fn extract_self_closing_tag(xml: &str, tag: &str) -> Option<String> {
    let pattern = format!(r#"<{}[^>]*/>"#, regex::escape(tag));
    let re = regex::Regex::new(&pattern).ok()?;
    re.find(xml).map(|m| m.as_str().to_string())
}

fn extract_payload(xml: &str) -> String {
    // Everything after </saml:Issuer> (or the opening tag's '>') up to the
    // signature element or the closing root tag, preserved verbatim.
    let after_issuer = xml.find("</saml:Issuer>").map(|i| i + "</saml:Issuer>".len());
    let start = after_issuer.unwrap_or_else(|| xml.find('>').map(|i| i + 1).unwrap_or(xml.len()));
    let rest = &xml[start.min(xml.len())..];
    let sig_start = rest.find("<ds:Signature").unwrap_or(rest.len());
    let before_close = rest[..sig_start].to_string();
    // Drop the root closing tag if signature wasn't present and it leaked in.
    if let Some(close_idx) = before_close.rfind("</") {
        if sig_start == rest.len() {
            return before_close[..close_idx].to_string();
        }
    }
    before_close
}
