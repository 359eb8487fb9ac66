//! HTTP-Artifact binding: generates/stores an artifact on encode, and on
//! decode dereferences it via an `ArtifactResolver` round trip to the
//! issuer's artifact-resolution endpoint.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::Artifact;
use crate::artifact_map::ArtifactMap;
use crate::binding::{check_relay_state_len, ArtifactGenerator, ArtifactResolver, EncodeFailure, EncodeRequest, MessageDecoder, MessageEncoder};
use crate::error::BindingError;
use crate::metadata::RoleKind;
use crate::policy::SecurityPolicy;
use crate::transport::{TransportRequest, TransportResponse};
use crate::util::sha1_20;
use crate::xml::{SamlObject, XmlSecurityProvider};

const REPLAY_CONTEXT_SAML2: &str = "SAML2Artifact";

pub struct HttpArtifactEncoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
    pub artifact_map: Arc<ArtifactMap>,
    pub generator: Arc<dyn ArtifactGenerator>,
    pub issuer_source_id: [u8; 20],
    pub endpoint_index: u16,
    /// When true, emits an HTML auto-submitting form instead of a 302
    /// redirect carrying `SAMLart` as a query parameter.
    pub post_artifact: bool,
}

#[async_trait]
impl MessageEncoder for HttpArtifactEncoder {
    async fn encode(
        &self,
        response: &mut dyn TransportResponse,
        mut object: SamlObject,
        req: EncodeRequest,
    ) -> Result<(), EncodeFailure> {
        if req.destination.is_empty() {
            return Err(EncodeFailure {
                object,
                error: BindingError::Malformed("destination must not be empty".to_string()),
            });
        }
        if let Some(relay_state) = &req.relay_state {
            if let Err(e) = check_relay_state_len(relay_state) {
                return Err(EncodeFailure { object, error: e });
            }
        }

        object.destination = Some(req.destination.clone());

        if let Some(credential) = &req.signing_credential {
            let alg = req.signature_alg.clone().unwrap_or_else(|| crate::xml::ALG_RSA_SHA256.to_string());
            let digest = req.digest_alg.clone().unwrap_or_else(|| "http://www.w3.org/2001/04/xmlenc#sha256".to_string());
            if let Err(e) = self.xml.sign(&mut object, credential.as_ref(), &alg, &digest) {
                return Err(EncodeFailure { object, error: e.into() });
            }
        }

        let artifact = self.generator.generate(self.issuer_source_id, self.endpoint_index);
        let recipient_entity_id = req.recipient.as_ref().map(|r| r.entity_id.clone());
        let artifact_b64 = artifact.to_base64();
        self.artifact_map.store(object, &artifact, recipient_entity_id);

        if self.post_artifact {
            let mut html = String::from("<!DOCTYPE html><html><body onload=\"document.forms[0].submit()\">");
            html.push_str(&format!(
                "<form method=\"post\" action=\"{}\"><input type=\"hidden\" name=\"SAMLart\" value=\"{}\">",
                req.destination, artifact_b64
            ));
            if let Some(relay_state) = &req.relay_state {
                html.push_str(&format!("<input type=\"hidden\" name=\"RelayState\" value=\"{relay_state}\">"));
            }
            html.push_str("</form></body></html>");
            response.set_content_type("text/html");
            response.send_response(html.as_bytes());
        } else {
            let mut url = format!("{}?SAMLart={}", req.destination, self.xml.url_encode(&artifact_b64));
            if let Some(relay_state) = &req.relay_state {
                url.push_str(&format!("&RelayState={}", self.xml.url_encode(relay_state)));
            }
            response.send_redirect(&url);
        }
        Ok(())
    }
}

pub struct HttpArtifactDecoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
    pub resolver: Arc<dyn ArtifactResolver>,
}

#[async_trait]
impl MessageDecoder for HttpArtifactDecoder {
    async fn decode(
        &self,
        request: &dyn TransportRequest,
        policy: &mut SecurityPolicy,
    ) -> Result<(SamlObject, Option<String>), BindingError> {
        let raw = request
            .parameter("SAMLart")
            .ok_or_else(|| BindingError::Malformed("missing SAMLart parameter".to_string()))?;

        let skew = Duration::from_secs((2 * policy.clock_skew_secs).max(0) as u64);
        if !policy.replay_cache.check(REPLAY_CONTEXT_SAML2, raw, skew) {
            return Err(BindingError::SecurityPolicy(crate::error::SecurityPolicyError::Replayed(raw.to_string())));
        }

        let artifact = Artifact::parse_base64(raw)?;

        let issuer_entity = policy
            .metadata
            .lookup_by_artifact(artifact.source_id())
            .ok_or_else(|| BindingError::Malformed("artifact source ID not found in metadata".to_string()))?;

        let has_sso_role = issuer_entity
            .roles
            .iter()
            .any(|r| matches!(r.kind, RoleKind::IdpSso | RoleKind::SpSso));
        if !has_sso_role {
            return Err(BindingError::Malformed("issuer has no SSO role descriptor".to_string()));
        }

        policy.issuer = Some(issuer_entity.entity_id.clone());
        policy.issuer_metadata = Some(issuer_entity.clone());

        let resolved = self.resolver.resolve(&artifact, &issuer_entity, self.xml.as_ref()).await?;

        policy.reset(true);
        policy.evaluate(request, &resolved)?;

        let relay_state = request.parameter("RelayState").map(|s| s.to_string());
        Ok((resolved, relay_state))
    }
}
