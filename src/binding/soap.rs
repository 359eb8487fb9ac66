//! SAML 2.0 (and SAML 1.x) SOAP binding: the message travels as the sole
//! child of a SOAP 1.1 Envelope/Body, `Content-Type: text/xml`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::binding::{EncodeFailure, EncodeRequest, MessageDecoder, MessageEncoder};
use crate::error::BindingError;
use crate::policy::SecurityPolicy;
use crate::transport::{TransportRequest, TransportResponse};
use crate::xml::{SamlObject, XmlSecurityProvider};

pub(crate) fn wrap_envelope(body: &str) -> String {
    format!(
        "<soap11:Envelope xmlns:soap11=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap11:Body>{body}</soap11:Body></soap11:Envelope>"
    )
}

pub(crate) fn unwrap_envelope(xml: &str) -> Result<String, BindingError> {
    let body_start = xml
        .find("<soap11:Body>")
        .or_else(|| xml.find("<soap:Body>"))
        .or_else(|| xml.find("<SOAP-ENV:Body>"))
        .ok_or_else(|| BindingError::Malformed("not a SOAP 1.1 envelope (missing Body)".to_string()))?;
    let after_open = xml[body_start..].find('>').map(|i| body_start + i + 1).unwrap();
    let body_end = xml
        .rfind("</soap11:Body>")
        .or_else(|| xml.rfind("</soap:Body>"))
        .or_else(|| xml.rfind("</SOAP-ENV:Body>"))
        .ok_or_else(|| BindingError::Malformed("unterminated SOAP Body".to_string()))?;
    Ok(xml[after_open..body_end].to_string())
}

pub struct SoapEncoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
}

#[async_trait]
impl MessageEncoder for SoapEncoder {
    async fn encode(
        &self,
        response: &mut dyn TransportResponse,
        mut object: SamlObject,
        req: EncodeRequest,
    ) -> Result<(), EncodeFailure> {
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
        let body = String::from_utf8_lossy(&bytes).into_owned();
        let envelope = wrap_envelope(&body);

        response.set_content_type("text/xml");
        response.send_response(envelope.as_bytes());
        Ok(())
    }
}

pub struct SoapDecoder {
    pub xml: Arc<dyn XmlSecurityProvider>,
    pub validating: bool,
}

#[async_trait]
impl MessageDecoder for SoapDecoder {
    async fn decode(
        &self,
        request: &dyn TransportRequest,
        policy: &mut SecurityPolicy,
    ) -> Result<(SamlObject, Option<String>), BindingError> {
        if request.content_type() != Some("text/xml") {
            return Err(BindingError::Malformed("SOAP binding requires Content-Type: text/xml".to_string()));
        }
        if request.body().is_empty() {
            return Err(BindingError::Malformed("empty SOAP body".to_string()));
        }

        let envelope_xml = std::str::from_utf8(request.body())
            .map_err(|e| BindingError::Malformed(format!("not utf-8: {e}")))?;
        let inner_xml = unwrap_envelope(envelope_xml)?;
        let inner = self.xml.parse(inner_xml.as_bytes(), self.validating)?;

        // Outer-envelope pass, then reset (message-only), then the inner
        // payload pass — a two-layer evaluation over the same object since
        // this wire format has no distinct transport-level signature.
        policy.evaluate(request, &inner)?;
        policy.reset(true);
        policy.evaluate(request, &inner)?;

        Ok((inner, None))
    }
}
