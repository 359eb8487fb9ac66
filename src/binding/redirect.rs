//! SAML 2.0 HTTP-Redirect binding. Detached-signature only: any embedded XML
//! signature is stripped before framing, since DEFLATE+base64+urlencode is
//! incompatible with an enveloped signature surviving the round trip.

use async_trait::async_trait;
use std::sync::Arc;

use crate::binding::{check_relay_state_len, request_base_url, EncodeFailure, EncodeRequest, MessageDecoder, MessageEncoder, URL_ENCODING_DEFLATE};
use crate::error::BindingError;
use crate::policy::SecurityPolicy;
use crate::transport::{TransportRequest, TransportResponse};
use crate::xml::{DetachedSignature, SamlObject, XmlSecurityProvider, ALG_RSA_SHA256};

pub struct HttpRedirectEncoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
}

#[async_trait]
impl MessageEncoder for HttpRedirectEncoder {
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

        // Redirect is detached-signature only; strip anything the caller
        // already attached and sign the query string instead.
        object.signature = None;
        object.destination = Some(req.destination.clone());

        let bytes = match self.xml.serialize(&object) {
            Ok(b) => b,
            Err(e) => return Err(EncodeFailure { object, error: e.into() }),
        };
        let deflated = match self.xml.deflate(&bytes) {
            Ok(d) => d,
            Err(e) => return Err(EncodeFailure { object, error: e.into() }),
        };
        let encoded = self.xml.url_encode(&self.xml.base64_encode(&deflated));

        let field = if object.kind.is_request() { "SAMLRequest" } else { "SAMLResponse" };
        let mut query = format!("{field}={encoded}");
        if let Some(relay_state) = &req.relay_state {
            query.push_str(&format!("&RelayState={}", self.xml.url_encode(relay_state)));
        }

        if let Some(credential) = &req.signing_credential {
            let alg = req.signature_alg.clone().unwrap_or_else(|| ALG_RSA_SHA256.to_string());
            query.push_str(&format!("&SigAlg={}", self.xml.url_encode(&alg)));
            let signature = match self.xml.create_detached_signature(query.as_bytes(), credential.as_ref(), &alg) {
                Ok(s) => s,
                Err(e) => return Err(EncodeFailure { object, error: e.into() }),
            };
            query.push_str(&format!("&Signature={}", self.xml.url_encode(&self.xml.base64_encode(&signature))));
        }

        response.send_redirect(&format!("{}?{}", req.destination, query));
        Ok(())
    }
}

pub struct HttpRedirectDecoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
    pub validating: bool,
}

#[async_trait]
impl MessageDecoder for HttpRedirectDecoder {
    async fn decode(
        &self,
        request: &dyn TransportRequest,
        policy: &mut SecurityPolicy,
    ) -> Result<(SamlObject, Option<String>), BindingError> {
        if let Some(encoding) = request.parameter("SAMLEncoding") {
            if encoding != URL_ENCODING_DEFLATE {
                return Err(BindingError::Malformed(format!("unsupported SAMLEncoding {encoding}")));
            }
        }

        let raw = request
            .parameter("SAMLRequest")
            .or_else(|| request.parameter("SAMLResponse"))
            .ok_or_else(|| BindingError::Malformed("missing SAMLRequest/SAMLResponse parameter".to_string()))?;

        let deflated = self.xml.base64_decode(raw)?;
        let bytes = self.xml.inflate(&deflated)?;
        let object = self.xml.parse(&bytes, self.validating)?;

        let request_base = request_base_url(request.url());
        match object.get_destination() {
            Some(dest) if dest != request_base => return Err(BindingError::WrongDestination),
            None if object.is_signed() => return Err(BindingError::MissingDestination),
            _ => {}
        }

        if !object.is_signed() {
            if let (Some(sig_alg), Some(signature)) = (request.parameter("SigAlg"), request.parameter("Signature")) {
                let signature_value = self.xml.base64_decode(signature)?;
                // The signature is computed over the exact query string up to
                // (but not including) `&Signature=`.
                let full_query = request.url().split('?').nth(1).unwrap_or_default();
                let signed_part = full_query.split("&Signature=").next().unwrap_or(full_query);
                policy.detached_signature = Some(DetachedSignature {
                    signature_alg: sig_alg.to_string(),
                    signed_bytes: signed_part.as_bytes().to_vec(),
                    signature_value,
                    key_info: None,
                });
                policy.detached_signature_bytes = Some(signed_part.as_bytes().to_vec());
            }
        }

        policy.evaluate(request, &object)?;

        let relay_state = request.parameter("RelayState").map(|s| s.to_string());
        Ok((object, relay_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransportResponse;
    use crate::xml::{DefaultXmlSecurityProvider, MessageKind, SamlVersion};

    #[tokio::test]
    async fn relay_state_over_limit_is_rejected_before_any_transport_write() {
        let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
        let encoder = HttpRedirectEncoder { xml };
        let mut response = MemoryTransportResponse::default();
        let object = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_abc");
        let req = EncodeRequest::new("https://idp.example/sso").with_relay_state("x".repeat(200));

        let result = encoder.encode(&mut response, object, req).await;
        assert!(matches!(
            result,
            Err(EncodeFailure { error: BindingError::RelayStateTooLong(_), .. })
        ));
        assert!(response.redirect_url.is_none());
    }

    #[tokio::test]
    async fn encode_strips_any_preexisting_signature() {
        let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
        let encoder = HttpRedirectEncoder { xml: xml.clone() };
        let mut response = MemoryTransportResponse::default();

        let mut object = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_abc");
        object.signature = Some(crate::xml::XmlSignature {
            signature_alg: ALG_RSA_SHA256.to_string(),
            digest_alg: String::new(),
            signature_value: vec![1, 2, 3],
            key_info: None,
        });

        let req = EncodeRequest::new("https://idp.example/sso");
        encoder.encode(&mut response, object, req).await.unwrap();

        let url = response.redirect_url.unwrap();
        let deflated = xml.base64_decode(&urlencoding::decode(url.split("SAMLRequest=").nth(1).unwrap().split('&').next().unwrap()).unwrap()).unwrap();
        let inflated = xml.inflate(&deflated).unwrap();
        let parsed = xml.parse(&inflated, false).unwrap();
        assert!(!parsed.is_signed());
    }
}
