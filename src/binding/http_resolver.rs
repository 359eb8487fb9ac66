//! A real `ArtifactResolver`: round-trips a SOAP `ArtifactResolve` to the
//! issuer's artifact-resolution endpoint over HTTP. Gated behind the
//! `http-resolver` feature since not every host embeds an HTTP client.

use async_trait::async_trait;
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::binding::soap::{unwrap_envelope, wrap_envelope};
use crate::binding::{ArtifactResolver, BINDING_SOAP};
use crate::credential::Credential;
use crate::error::BindingError;
use crate::metadata::EntityDescriptor;
use crate::xml::{MessageKind, SamlObject, SamlVersion, XmlSecurityProvider, ALG_RSA_SHA256};

/// Resolves artifacts over HTTP via `reqwest`, the way
/// [`crate::artifact_map`]'s host resolves them in-process: wrap the
/// outbound message in a SOAP envelope, POST it, and unwrap the response.
pub struct HttpArtifactResolver {
    client: reqwest::Client,
    /// `Issuer` this resolver puts on the outbound `ArtifactResolve` — the
    /// requester's own entity ID, not the issuer being resolved against.
    pub requester_entity_id: String,
    pub signing_credential: Option<Arc<dyn Credential>>,
}

impl HttpArtifactResolver {
    pub fn new(requester_entity_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            requester_entity_id: requester_entity_id.into(),
            signing_credential: None,
        }
    }

    pub fn with_signing_credential(mut self, credential: Arc<dyn Credential>) -> Self {
        self.signing_credential = Some(credential);
        self
    }
}

#[async_trait]
impl ArtifactResolver for HttpArtifactResolver {
    async fn resolve(
        &self,
        artifact: &Artifact,
        issuer: &EntityDescriptor,
        xml: &dyn XmlSecurityProvider,
    ) -> Result<SamlObject, BindingError> {
        let endpoint = issuer
            .roles
            .iter()
            .find_map(|role| role.endpoint_at_index(artifact.endpoint_index()))
            .or_else(|| issuer.roles.iter().find_map(|role| role.default_endpoint(BINDING_SOAP)))
            .ok_or_else(|| BindingError::Malformed("issuer has no artifact-resolution endpoint".to_string()))?;

        let mut request_object = SamlObject::new_with_generated_id(SamlVersion::V2_0, MessageKind::ArtifactResolve);
        request_object.issuer = Some(self.requester_entity_id.clone());
        request_object.destination = Some(endpoint.location.clone());
        request_object.payload = artifact.to_base64();

        if let Some(credential) = &self.signing_credential {
            xml.sign(
                &mut request_object,
                credential.as_ref(),
                ALG_RSA_SHA256,
                "http://www.w3.org/2001/04/xmlenc#sha256",
            )?;
        }

        let body = xml.serialize(&request_object)?;
        let envelope = wrap_envelope(&String::from_utf8_lossy(&body));

        let response = self
            .client
            .post(&endpoint.location)
            .header("Content-Type", "text/xml")
            .body(envelope)
            .send()
            .await
            .map_err(|e| BindingError::TransportFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BindingError::TransportFailed(format!(
                "artifact-resolution endpoint returned HTTP {}",
                response.status()
            )));
        }

        let response_body = response.text().await.map_err(|e| BindingError::TransportFailed(e.to_string()))?;
        let inner_xml = unwrap_envelope(&response_body)?;
        Ok(xml.parse(inner_xml.as_bytes(), false)?)
    }
}
