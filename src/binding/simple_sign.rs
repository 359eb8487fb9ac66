//! SAML 2.0 HTTP-POST-SimpleSign: same form framing as plain HTTP-POST, but
//! the signature is computed over the encoded form-field byte string rather
//! than embedded as an enveloped XML signature.

use async_trait::async_trait;
use std::sync::Arc;

use crate::binding::{EncodeFailure, EncodeRequest, MessageDecoder, MessageEncoder};
use crate::error::BindingError;
use crate::policy::SecurityPolicy;
use crate::transport::{TransportRequest, TransportResponse};
use crate::xml::{DetachedSignature, SamlObject, XmlSecurityProvider, ALG_RSA_SHA256};

pub struct HttpPostSimpleSignEncoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
}

#[async_trait]
impl MessageEncoder for HttpPostSimpleSignEncoder {
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
        object.signature = None;

        let bytes = match self.xml.serialize(&object) {
            Ok(b) => b,
            Err(e) => return Err(EncodeFailure { object, error: e.into() }),
        };
        let encoded = self.xml.base64_encode(&bytes);
        let field = if object.kind.is_request() { "SAMLRequest" } else { "SAMLResponse" };

        let mut signed_part = format!("{field}={encoded}");
        if let Some(relay_state) = &req.relay_state {
            signed_part.push_str(&format!("&RelayState={relay_state}"));
        }
        let alg = req.signature_alg.clone().unwrap_or_else(|| ALG_RSA_SHA256.to_string());
        signed_part.push_str(&format!("&SigAlg={alg}"));

        let mut html = String::from("<!DOCTYPE html><html><body onload=\"document.forms[0].submit()\">");
        html.push_str(&format!(
            "<form method=\"post\" action=\"{dest}\"><input type=\"hidden\" name=\"{field}\" value=\"{encoded}\">",
            dest = req.destination,
        ));
        if let Some(relay_state) = &req.relay_state {
            html.push_str(&format!("<input type=\"hidden\" name=\"RelayState\" value=\"{relay_state}\">"));
        }
        html.push_str(&format!("<input type=\"hidden\" name=\"SigAlg\" value=\"{alg}\">"));

        if let Some(credential) = &req.signing_credential {
            let signature = match self.xml.create_detached_signature(signed_part.as_bytes(), credential.as_ref(), &alg) {
                Ok(s) => s,
                Err(e) => return Err(EncodeFailure { object, error: e.into() }),
            };
            html.push_str(&format!(
                "<input type=\"hidden\" name=\"Signature\" value=\"{}\">",
                self.xml.base64_encode(&signature)
            ));
            if let Some(key_info) = credential.key_info() {
                html.push_str(&format!(
                    "<input type=\"hidden\" name=\"KeyInfo\" value=\"{}\">",
                    self.xml.base64_encode(&key_info)
                ));
            }
        }
        html.push_str("<noscript><input type=\"submit\" value=\"Continue\"></noscript></form></body></html>");

        response.set_content_type("text/html");
        response.send_response(html.as_bytes());
        Ok(())
    }
}

pub struct HttpPostSimpleSignDecoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
    pub validating: bool,
}

#[async_trait]
impl MessageDecoder for HttpPostSimpleSignDecoder {
    async fn decode(
        &self,
        request: &dyn TransportRequest,
        policy: &mut SecurityPolicy,
    ) -> Result<(SamlObject, Option<String>), BindingError> {
        if request.method() != "POST" {
            return Err(BindingError::Malformed("HTTP-POST-SimpleSign binding requires a POST request".to_string()));
        }
        let field_value = request
            .parameter("SAMLRequest")
            .or_else(|| request.parameter("SAMLResponse"))
            .ok_or_else(|| BindingError::Malformed("missing SAMLRequest/SAMLResponse parameter".to_string()))?;
        let field_name = if request.parameter("SAMLRequest").is_some() {
            "SAMLRequest"
        } else {
            "SAMLResponse"
        };

        let bytes = self.xml.base64_decode(field_value)?;
        let object = self.xml.parse(&bytes, self.validating)?;

        if let (Some(sig_alg), Some(signature)) = (request.parameter("SigAlg"), request.parameter("Signature")) {
            let mut signed_part = format!("{field_name}={field_value}");
            if let Some(relay_state) = request.parameter("RelayState") {
                signed_part.push_str(&format!("&RelayState={relay_state}"));
            }
            signed_part.push_str(&format!("&SigAlg={sig_alg}"));

            policy.detached_signature = Some(DetachedSignature {
                signature_alg: sig_alg.to_string(),
                signed_bytes: signed_part.as_bytes().to_vec(),
                signature_value: self.xml.base64_decode(signature)?,
                key_info: request.parameter("KeyInfo").and_then(|k| self.xml.base64_decode(k).ok()),
            });
            policy.detached_signature_bytes = Some(signed_part.into_bytes());
        }

        policy.evaluate(request, &object)?;

        let relay_state = request.parameter("RelayState").map(|s| s.to_string());
        Ok((object, relay_state))
    }
}
