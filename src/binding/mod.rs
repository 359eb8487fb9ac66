//! The binding engine (C6/C7): one encoder/decoder pair per
//! `(protocol-version, binding)`. SAML 2.0 and SAML 1.x share an
//! implementation wherever the wire shape is identical apart from form-field
//! naming (`RelayState` vs `TARGET`) and artifact format, driven by
//! [`crate::xml::SamlVersion`] rather than duplicated per version.

pub mod artifact_binding;
pub mod ecp;
#[cfg(feature = "http-resolver")]
pub mod http_resolver;
pub mod post;
pub mod redirect;
pub mod simple_sign;
pub mod soap;

use async_trait::async_trait;
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::credential::Credential;
use crate::error::BindingError;
use crate::metadata::EntityDescriptor;
use crate::policy::SecurityPolicy;
use crate::transport::{TransportRequest, TransportResponse};
use crate::xml::{SamlObject, XmlSecurityProvider};

pub const BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const BINDING_HTTP_POST_SIMPLE_SIGN: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST-SimpleSign";
pub const BINDING_HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
pub const BINDING_HTTP_ARTIFACT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact";
pub const BINDING_SOAP: &str = "urn:oasis:names:tc:SAML:2.0:bindings:SOAP";
pub const BINDING_PAOS: &str = "urn:oasis:names:tc:SAML:2.0:bindings:PAOS";

pub const SAML1_BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:1.0:profiles:browser-post";
pub const SAML1_BINDING_SOAP: &str = "urn:oasis:names:tc:SAML:1.0:bindings:SOAP-binding";
pub const SAML1_BINDING_HTTP_ARTIFACT: &str = "urn:oasis:names:tc:SAML:1.0:profiles:artifact-01";

pub const URL_ENCODING_DEFLATE: &str = "urn:oasis:names:tc:SAML:2.0:bindings:URL-Encoding:DEFLATE";

/// HTTP-Redirect's RelayState is carried in a query string and is capped to
/// keep URLs within practical browser/proxy length limits.
pub const RELAY_STATE_MAX_LEN: usize = 80;

/// On any error path, the caller's `SamlObject` is handed back so it can be
/// retried or inspected — the Rust expression of the original's
/// `auto_ptr`-transfer-on-success-only ownership discipline.
pub struct EncodeFailure {
    pub object: SamlObject,
    pub error: BindingError,
}

impl std::fmt::Debug for EncodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeFailure").field("error", &self.error).finish()
    }
}

impl std::fmt::Display for EncodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for EncodeFailure {}

/// Parameters shared by every encoder; binding-specific encoders extend this
/// with their own config struct rather than growing one god-struct.
pub struct EncodeRequest {
    pub destination: String,
    pub recipient: Option<EntityDescriptor>,
    pub relay_state: Option<String>,
    pub signing_credential: Option<Arc<dyn Credential>>,
    pub signature_alg: Option<String>,
    pub digest_alg: Option<String>,
}

impl EncodeRequest {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            recipient: None,
            relay_state: None,
            signing_credential: None,
            signature_alg: None,
            digest_alg: None,
        }
    }

    pub fn with_relay_state(mut self, relay_state: impl Into<String>) -> Self {
        self.relay_state = Some(relay_state.into());
        self
    }

    pub fn with_signing_credential(mut self, credential: Arc<dyn Credential>) -> Self {
        self.signing_credential = Some(credential);
        self
    }
}

/// Generates an artifact for a send to `recipient`. Kept as a collaborator
/// trait rather than a free function so tests and hosts can control artifact
/// generation (e.g. pin a handle for a golden-file test).
pub trait ArtifactGenerator: Send + Sync {
    fn generate(&self, issuer_source_id: [u8; 20], endpoint_index: u16) -> Artifact;
}

#[derive(Default)]
pub struct DefaultArtifactGenerator;

impl ArtifactGenerator for DefaultArtifactGenerator {
    fn generate(&self, issuer_source_id: [u8; 20], endpoint_index: u16) -> Artifact {
        Artifact::generate_saml2(issuer_source_id, endpoint_index)
    }
}

/// Resolves an artifact by round-tripping a SOAP `ArtifactResolve` to the
/// issuer's artifact-resolution endpoint. `http_resolver::HttpArtifactResolver`
/// (behind the `http-resolver` feature) is the `reqwest`-backed implementation;
/// a host can also supply its own (e.g. to reuse an existing connection pool).
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn resolve(
        &self,
        artifact: &Artifact,
        issuer: &EntityDescriptor,
        xml: &dyn XmlSecurityProvider,
    ) -> Result<SamlObject, BindingError>;
}

#[async_trait]
pub trait MessageEncoder: Send + Sync {
    async fn encode(
        &self,
        response: &mut dyn TransportResponse,
        object: SamlObject,
        request: EncodeRequest,
    ) -> Result<(), EncodeFailure>;
}

#[async_trait]
pub trait MessageDecoder: Send + Sync {
    async fn decode(
        &self,
        request: &dyn TransportRequest,
        policy: &mut SecurityPolicy,
    ) -> Result<(SamlObject, Option<String>), BindingError>;
}

/// Validates a RelayState against the Redirect/Artifact 80-byte ceiling.
pub fn check_relay_state_len(relay_state: &str) -> Result<(), BindingError> {
    if relay_state.len() > RELAY_STATE_MAX_LEN {
        return Err(BindingError::RelayStateTooLong(relay_state.len()));
    }
    Ok(())
}

/// The correlation-cookie name HTTP-POST/Redirect decoders use to recover
/// request state keyed by RelayState.
pub fn correlation_cookie_name(url_encoded_relay_state: &str) -> String {
    format!("_opensaml_req_{url_encoded_relay_state}")
}

/// Compares `destination` against `request_url` up to (not including) `?`,
/// shared by every decoder's MessageRouting-adjacent destination check.
pub fn request_base_url(request_url: &str) -> &str {
    request_url.split('?').next().unwrap_or(request_url)
}
