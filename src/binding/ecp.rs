//! SAML 2.0 ECP (PAOS) binding: a SOAP 1.1 envelope carrying `paos:Request`
//! and `ecp:Request` headers on the way out, `ecp:RelayState` on the way in.

use async_trait::async_trait;
use std::sync::Arc;

use crate::binding::{EncodeFailure, EncodeRequest, MessageDecoder, MessageEncoder};
use crate::error::BindingError;
use crate::policy::SecurityPolicy;
use crate::transport::{TransportRequest, TransportResponse};
use crate::xml::{MessageKind, SamlObject, XmlSecurityProvider};

const CONTENT_TYPE_PAOS: &str = "application/vnd.paos+xml";
const ACTOR_NEXT: &str = "http://schemas.xmlsoap.org/soap/actor/next";
const PAOS_SERVICE_SSO: &str = "urn:oasis:names:tc:SAML:2.0:profiles:SSO:ecp";

pub struct EcpConfig {
    pub provider_name: Option<String>,
    pub idp_list: Vec<String>,
}

impl Default for EcpConfig {
    fn default() -> Self {
        Self { provider_name: None, idp_list: Vec::new() }
    }
}

pub struct EcpEncoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
    pub config: EcpConfig,
}

#[async_trait]
impl MessageEncoder for EcpEncoder {
    async fn encode(
        &self,
        response: &mut dyn TransportResponse,
        mut object: SamlObject,
        req: EncodeRequest,
    ) -> Result<(), EncodeFailure> {
        match object.kind {
            MessageKind::AuthnRequest => {
                if object.assertion_consumer_service_url.is_none() {
                    return Err(EncodeFailure {
                        object,
                        error: BindingError::Malformed(
                            "ECP AuthnRequest must carry AssertionConsumerServiceURL by value".to_string(),
                        ),
                    });
                }
            }
            MessageKind::Response => {
                if object.destination.is_none() {
                    return Err(EncodeFailure {
                        object,
                        error: BindingError::Malformed("ECP Response must carry a Destination".to_string()),
                    });
                }
            }
            _ => {}
        }

        if let Some(credential) = &req.signing_credential {
            let alg = req.signature_alg.clone().unwrap_or_else(|| crate::xml::ALG_RSA_SHA256.to_string());
            let digest = req.digest_alg.clone().unwrap_or_else(|| "http://www.w3.org/2001/04/xmlenc#sha256".to_string());
            if let Err(e) = self.xml.sign(&mut object, credential.as_ref(), &alg, &digest) {
                return Err(EncodeFailure { object, error: e.into() });
            }
        }

        let acs_url = object.assertion_consumer_service_url.clone().unwrap_or_default();
        let mut headers = format!(
            "<paos:Request xmlns:paos=\"urn:liberty:paos:2003-08\" soap11:mustUnderstand=\"1\" soap11:actor=\"{ACTOR_NEXT}\" responseConsumerURL=\"{acs_url}\" service=\"{PAOS_SERVICE_SSO}\"/>"
        );
        headers.push_str(&format!(
            "<ecp:Request xmlns:ecp=\"urn:oasis:names:tc:SAML:2.0:profiles:SSO:ecp\" soap11:mustUnderstand=\"1\" soap11:actor=\"{ACTOR_NEXT}\" IsPassive=\"{passive}\">",
            passive = object.is_passive,
        ));
        if let Some(issuer) = &object.issuer {
            headers.push_str(&format!("<saml:Issuer>{issuer}</saml:Issuer>"));
        }
        if !self.config.idp_list.is_empty() {
            headers.push_str("<samlp:Scoping><samlp:IDPList>");
            for idp in &self.config.idp_list {
                headers.push_str(&format!("<samlp:IDPEntry ProviderID=\"{idp}\"/>"));
            }
            headers.push_str("</samlp:IDPList></samlp:Scoping>");
        }
        headers.push_str("</ecp:Request>");
        if let Some(relay_state) = &req.relay_state {
            headers.push_str(&format!(
                "<ecp:RelayState xmlns:ecp=\"urn:oasis:names:tc:SAML:2.0:profiles:SSO:ecp\" soap11:mustUnderstand=\"1\" soap11:actor=\"{ACTOR_NEXT}\">{relay_state}</ecp:RelayState>"
            ));
        }

        let body_bytes = match self.xml.serialize(&object) {
            Ok(b) => b,
            Err(e) => return Err(EncodeFailure { object, error: e.into() }),
        };
        let body = String::from_utf8_lossy(&body_bytes).into_owned();

        let envelope = format!(
            "<soap11:Envelope xmlns:soap11=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap11:Header>{headers}</soap11:Header><soap11:Body>{body}</soap11:Body></soap11:Envelope>"
        );

        response.set_content_type(CONTENT_TYPE_PAOS);
        response.send_response(envelope.as_bytes());
        Ok(())
    }
}

pub struct EcpDecoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
    pub validating: bool,
}

#[async_trait]
impl MessageDecoder for EcpDecoder {
    async fn decode(
        &self,
        request: &dyn TransportRequest,
        policy: &mut SecurityPolicy,
    ) -> Result<(SamlObject, Option<String>), BindingError> {
        if request.content_type() != Some(CONTENT_TYPE_PAOS) {
            return Err(BindingError::Malformed(format!(
                "ECP binding requires Content-Type: {CONTENT_TYPE_PAOS}"
            )));
        }

        let envelope_xml = std::str::from_utf8(request.body())
            .map_err(|e| BindingError::Malformed(format!("not utf-8: {e}")))?;

        let relay_state = extract_tag_text(envelope_xml, "ecp:RelayState");

        let body_start = envelope_xml
            .find("<soap11:Body>")
            .ok_or_else(|| BindingError::Malformed("not a SOAP 1.1 envelope (missing Body)".to_string()))?;
        let after_open = envelope_xml[body_start..].find('>').map(|i| body_start + i + 1).unwrap();
        let body_end = envelope_xml
            .rfind("</soap11:Body>")
            .ok_or_else(|| BindingError::Malformed("unterminated SOAP Body".to_string()))?;
        let inner_xml = &envelope_xml[after_open..body_end];

        let object = self.xml.parse(inner_xml.as_bytes(), self.validating)?;
        if !matches!(object.kind, MessageKind::Response) {
            return Err(BindingError::Malformed("ECP decoder requires a Response payload".to_string()));
        }

        policy.evaluate(request, &object)?;
        policy.reset(true);
        policy.evaluate(request, &object)?;

        Ok((object, relay_state))
    }
}

fn extract_tag_text(xml: &str, tag: &str) -> Option<String> {
    let open_start = xml.find(&format!("<{tag}"))?;
    let open_end = xml[open_start..].find('>').map(|i| open_start + i + 1)?;
    let close = xml.find(&format!("</{tag}>"))?;
    if close < open_end {
        return None;
    }
    Some(xml[open_end..close].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransportRequest, MemoryTransportResponse};
    use crate::xml::{DefaultXmlSecurityProvider, SamlVersion};

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

    #[tokio::test]
    async fn encoder_rejects_authn_request_without_acs_url() {
        let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
        let encoder = EcpEncoder { xml, config: EcpConfig::default() };
        let mut response = MemoryTransportResponse::default();
        let object = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_a1");
        let result = encoder.encode(&mut response, object, EncodeRequest::new("https://idp.example/ecp")).await;
        assert!(matches!(result, Err(EncodeFailure { error: BindingError::Malformed(_), .. })));
    }

    #[tokio::test]
    async fn decode_rejects_wrong_content_type() {
        let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
        let decoder = EcpDecoder { xml, validating: false };
        let request = MemoryTransportRequest::post("https://sp.example/ecp", "text/xml", Vec::new());
        let mut policy = test_policy();
        assert!(matches!(decoder.decode(&request, &mut policy).await, Err(BindingError::Malformed(_))));
    }

    #[tokio::test]
    async fn encode_then_decode_round_trips_a_response_with_relay_state() {
        let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
        let encoder = EcpEncoder { xml: xml.clone(), config: EcpConfig::default() };
        let mut response = MemoryTransportResponse::default();

        let mut object = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        object.destination = Some("https://sp.example/acs".to_string());
        let req = EncodeRequest::new("https://sp.example/acs").with_relay_state("rs-1");
        encoder.encode(&mut response, object, req).await.unwrap();

        let body = response.body.unwrap();
        let decoder = EcpDecoder { xml, validating: false };
        let request = MemoryTransportRequest::post("https://sp.example/ecp", CONTENT_TYPE_PAOS, body);
        let mut policy = test_policy();
        policy.routing_mandatory = false;

        let (decoded, relay_state) = decoder.decode(&request, &mut policy).await.unwrap();
        assert_eq!(decoded.id, "_r1");
        assert_eq!(relay_state.as_deref(), Some("rs-1"));
    }
}
