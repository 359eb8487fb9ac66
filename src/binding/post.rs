//! HTTP-POST binding: SAML 2.0 and SAML 1.x browser-post profile share this
//! implementation, differing only in form-field naming (`RelayState` vs
//! `TARGET`) driven by `object.version`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;

use crate::binding::{correlation_cookie_name, EncodeFailure, EncodeRequest, MessageDecoder, MessageEncoder};
use crate::credential::Credential;
use crate::error::BindingError;
use crate::policy::SecurityPolicy;
use crate::transport::{TransportRequest, TransportResponse};
use crate::xml::{SamlObject, SamlVersion, XmlSecurityProvider};

fn relay_state_field(version: SamlVersion) -> &'static str {
    match version {
        SamlVersion::V2_0 => "RelayState",
        SamlVersion::V1_1 => "TARGET",
    }
}

fn message_field(is_request: bool) -> &'static str {
    if is_request {
        "SAMLRequest"
    } else {
        "SAMLResponse"
    }
}

pub struct HttpPostEncoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
}

#[async_trait]
impl MessageEncoder for HttpPostEncoder {
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
        object.destination = Some(req.destination.clone());

        if let Some(credential) = &req.signing_credential {
            let alg = req.signature_alg.clone().unwrap_or_else(|| crate::xml::ALG_RSA_SHA256.to_string());
            let digest = req.digest_alg.clone().unwrap_or_else(|| "http://www.w3.org/2001/04/xmlenc#sha256".to_string());
            if let Err(e) = self.xml.sign(&mut object, credential.as_ref(), &alg, &digest) {
                return Err(EncodeFailure { object, error: e.into() });
            }
        }

        let bytes = match self.xml.serialize(&object) {
            Ok(b) => b,
            Err(e) => return Err(EncodeFailure { object, error: e.into() }),
        };
        let encoded = STANDARD.encode(&bytes);

        let field = message_field(object.kind.is_request());
        let relay_field = relay_state_field(object.version);

        let mut html = String::from("<!DOCTYPE html><html><body onload=\"document.forms[0].submit()\">");
        html.push_str(&format!(
            "<form method=\"post\" action=\"{dest}\"><input type=\"hidden\" name=\"{field}\" value=\"{encoded}\">",
            dest = req.destination,
        ));
        if let Some(relay_state) = &req.relay_state {
            html.push_str(&format!(
                "<input type=\"hidden\" name=\"{relay_field}\" value=\"{relay_state}\">"
            ));
        }
        html.push_str("<noscript><input type=\"submit\" value=\"Continue\"></noscript></form></body></html>");

        response.set_content_type("text/html");
        response.set_header("Cache-Control", "no-cache, no-store");
        response.set_header("Pragma", "no-cache");

        if object.kind.is_request() {
            if let Some(relay_state) = &req.relay_state {
                let url_encoded_rs = self.xml.url_encode(relay_state);
                response.set_cookie(&correlation_cookie_name(&url_encoded_rs), &object.id);
            }
        }

        response.send_response(html.as_bytes());
        Ok(())
    }
}

pub struct HttpPostDecoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
    pub validating: bool,
}

#[async_trait]
impl MessageDecoder for HttpPostDecoder {
    async fn decode(
        &self,
        request: &dyn TransportRequest,
        policy: &mut SecurityPolicy,
    ) -> Result<(SamlObject, Option<String>), BindingError> {
        if request.method() != "POST" {
            return Err(BindingError::Malformed("HTTP-POST binding requires a POST request".to_string()));
        }

        let raw = request
            .parameter("SAMLRequest")
            .or_else(|| request.parameter("SAMLResponse"))
            .ok_or_else(|| BindingError::Malformed("missing SAMLRequest/SAMLResponse parameter".to_string()))?;

        let bytes = STANDARD
            .decode(raw)
            .map_err(|e| BindingError::Malformed(format!("invalid base64: {e}")))?;
        let object = self.xml.parse(&bytes, self.validating)?;

        let request_base = crate::binding::request_base_url(request.url());
        match object.get_destination() {
            Some(dest) if dest != request_base => return Err(BindingError::WrongDestination),
            None if object.is_signed() => return Err(BindingError::MissingDestination),
            _ => {}
        }

        policy.evaluate(request, &object)?;

        let relay_state = request
            .parameter("RelayState")
            .or_else(|| request.parameter("TARGET"))
            .map(|s| s.to_string());

        Ok((object, relay_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransportRequest, MemoryTransportResponse};
    use crate::xml::{DefaultXmlSecurityProvider, MessageKind};

    #[tokio::test]
    async fn encode_then_decode_round_trips_an_authn_request() {
        let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
        let encoder = HttpPostEncoder { xml: xml.clone() };
        let mut response = MemoryTransportResponse::default();

        let object = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_abc");
        let req = EncodeRequest::new("https://idp.example/sso").with_relay_state("state-1");
        encoder.encode(&mut response, object, req).await.unwrap();

        let body = response.body.expect("response body set");
        let body_str = String::from_utf8(body).unwrap();
        assert!(body_str.contains("SAMLRequest"));
        assert!(body_str.contains("state-1"));

        let encoded_start = body_str.find("value=\"").unwrap() + "value=\"".len();
        let encoded_end = body_str[encoded_start..].find('"').unwrap() + encoded_start;
        let encoded = &body_str[encoded_start..encoded_end];

        let decoder = HttpPostDecoder { xml, validating: false };
        let decode_request = MemoryTransportRequest::post(
            "https://idp.example/sso",
            "application/x-www-form-urlencoded",
            Vec::new(),
        )
        .with_parameter("SAMLRequest", encoded)
        .with_parameter("RelayState", "state-1");

        let mut policy = crate::policy::SecurityPolicy::new(
            Arc::new(crate::metadata::MetadataProvider::new(
                Box::new(crate::metadata::InMemoryMetadataSource::new(
                    crate::metadata::MetadataNode::Group(Default::default()),
                )),
                vec![],
            )),
            Arc::new(crate::trust::ExplicitKeyTrustEngine::new()),
            Arc::new(crate::replay::InMemoryReplayCache::new()),
            crate::metadata::RoleKind::IdpSso,
            "urn:oasis:names:tc:SAML:2.0:protocol",
        );

        let (decoded, relay_state) = decoder.decode(&decode_request, &mut policy).await.unwrap();
        assert_eq!(decoded.id, "_abc");
        assert_eq!(relay_state.as_deref(), Some("state-1"));
    }

    #[tokio::test]
    async fn decode_rejects_non_post_method() {
        let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
        let decoder = HttpPostDecoder { xml, validating: false };
        let request = MemoryTransportRequest::get("https://idp.example/sso");
        let mut policy = test_policy();
        assert!(matches!(
            decoder.decode(&request, &mut policy).await,
            Err(BindingError::Malformed(_))
        ));
    }

    fn test_policy() -> SecurityPolicy {
        SecurityPolicy::new(
            Arc::new(crate::metadata::MetadataProvider::new(
                Box::new(crate::metadata::InMemoryMetadataSource::new(
                    crate::metadata::MetadataNode::Group(Default::default()),
                )),
                vec![],
            )),
            Arc::new(crate::trust::ExplicitKeyTrustEngine::new()),
            Arc::new(crate::replay::InMemoryReplayCache::new()),
            crate::metadata::RoleKind::IdpSso,
            "urn:oasis:names:tc:SAML:2.0:protocol",
        )
    }
}
