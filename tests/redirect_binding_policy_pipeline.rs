use std::sync::Arc;

use saml_protocol_engine::binding::redirect::{HttpRedirectDecoder, HttpRedirectEncoder};
use saml_protocol_engine::binding::{EncodeRequest, MessageDecoder, MessageEncoder};
use saml_protocol_engine::credential::InMemoryRsaCredential;
use saml_protocol_engine::metadata::{
    Endpoint, EntityDescriptor, InMemoryMetadataSource, KeyDescriptor, MetadataNode, MetadataProvider, RoleDescriptor,
};
use saml_protocol_engine::policy::rules::{
    IssuerMessageFlowRule, MessageRoutingRule, MetadataResolutionRule, ReplayAndFreshnessRule, SignatureRule,
};
use saml_protocol_engine::replay::InMemoryReplayCache;
use saml_protocol_engine::transport::MemoryTransportRequest;
use saml_protocol_engine::trust::ExplicitKeyTrustEngine;
use saml_protocol_engine::xml::{DefaultXmlSecurityProvider, MessageKind, SamlVersion, XmlSecurityProvider};
use saml_protocol_engine::{RoleKind, SamlObject, SecurityPolicy};

const PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

fn idp_metadata(public_key_der: Vec<u8>) -> Arc<MetadataProvider> {
    let idp = EntityDescriptor::new("https://idp.example").with_role(
        RoleDescriptor::new(RoleKind::IdpSso, PROTOCOL)
            .with_key(KeyDescriptor::signing(public_key_der))
            .with_endpoint(Endpoint::new("urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect", "https://idp.example/sso")),
    );
    let source = InMemoryMetadataSource::new(MetadataNode::Entity(idp));
    Arc::new(MetadataProvider::new(Box::new(source), vec![]))
}

fn full_policy(xml: Arc<dyn XmlSecurityProvider>, metadata: Arc<MetadataProvider>) -> SecurityPolicy {
    SecurityPolicy::new(
        metadata,
        Arc::new(ExplicitKeyTrustEngine::new()),
        Arc::new(InMemoryReplayCache::new()),
        RoleKind::IdpSso,
        PROTOCOL,
    )
    .with_rule(Box::new(IssuerMessageFlowRule))
    .with_rule(Box::new(SignatureRule { xml }))
    .with_rule(Box::new(ReplayAndFreshnessRule { context: "idp:https://idp.example".to_string() }))
    .with_rule(Box::new(MessageRoutingRule))
    .with_rule(Box::new(MetadataResolutionRule))
}

#[tokio::test]
async fn signed_redirect_authn_request_passes_every_rule_in_order() {
    let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
    let credential = Arc::new(InMemoryRsaCredential::from_pkcs8(saml_protocol_engine::testing::TEST_RSA_PKCS8_DER, None).unwrap());
    let metadata = idp_metadata(credential.public_key_der().to_vec());

    let encoder = HttpRedirectEncoder { xml: xml.clone() };
    let mut response = saml_protocol_engine::transport::MemoryTransportResponse::default();

    let mut object = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_authn-1");
    object.issuer = Some("https://idp.example".to_string());
    let req = EncodeRequest::new("https://sp.example/acs").with_signing_credential(credential);
    encoder.encode(&mut response, object, req).await.unwrap();

    let redirect_url = response.redirect_url.expect("encoder issues a redirect");
    assert!(redirect_url.starts_with("https://sp.example/acs?"));

    let decoder = HttpRedirectDecoder { xml: xml.clone(), validating: false };
    let request = MemoryTransportRequest::get(redirect_url).with_query_params_from_url();
    let mut policy = full_policy(xml, metadata);

    let (decoded, relay_state) = decoder.decode(&request, &mut policy).await.unwrap();
    assert_eq!(decoded.id, "_authn-1");
    assert!(relay_state.is_none());
    assert_eq!(policy.issuer.as_deref(), Some("https://idp.example"));
    assert!(policy.authenticated, "detached signature over the query string must validate");
    assert!(matches!(policy.issuer_role.as_ref().map(|r| r.kind.clone()), Some(RoleKind::IdpSso)));
}

#[tokio::test]
async fn tampered_redirect_query_fails_the_signature_rule() {
    let xml: Arc<dyn XmlSecurityProvider> = Arc::new(DefaultXmlSecurityProvider::new());
    let credential = Arc::new(InMemoryRsaCredential::from_pkcs8(saml_protocol_engine::testing::TEST_RSA_PKCS8_DER, None).unwrap());
    let metadata = idp_metadata(credential.public_key_der().to_vec());

    let encoder = HttpRedirectEncoder { xml: xml.clone() };
    let mut response = saml_protocol_engine::transport::MemoryTransportResponse::default();

    let mut object = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_authn-2");
    object.issuer = Some("https://idp.example".to_string());
    let req = EncodeRequest::new("https://sp.example/acs").with_signing_credential(credential);
    encoder.encode(&mut response, object, req).await.unwrap();

    let mut redirect_url = response.redirect_url.unwrap();
    redirect_url = redirect_url.replace("RelayState=", "RelayState=tampered");
    if !redirect_url.contains("tampered") {
        // No RelayState was present; tamper with the message payload instead.
        redirect_url = redirect_url.replacen("SAMLRequest=", "SAMLRequest=AA", 1);
    }

    let decoder = HttpRedirectDecoder { xml: xml.clone(), validating: false };
    let request = MemoryTransportRequest::get(redirect_url).with_query_params_from_url();
    let mut policy = full_policy(xml, metadata);

    let err = decoder.decode(&request, &mut policy).await;
    assert!(err.is_err(), "tampering with the signed query string must be caught somewhere in decode or policy evaluation");
}
