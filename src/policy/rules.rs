//! Canonical rules for the security-policy pipeline, run in the order named
//! in `policy::mod`'s doc comment: Issuer/MessageFlow, Signature,
//! Replay-and-freshness, MessageRouting, MetadataResolution.

use chrono::{Duration as ChronoDuration, Utc};

use crate::error::SecurityPolicyError;
use crate::policy::{Rule, RuleOutcome, SecurityPolicy};
use crate::transport::TransportRequest;
use crate::trust::TrustEngine;
use crate::xml::{SamlObject, XmlSecurityProvider};
use std::sync::Arc;

/// Extracts issuer and message ID/instant from the decoded message. Never
/// checks a signature; that's the next rule's job.
pub struct IssuerMessageFlowRule;

impl Rule for IssuerMessageFlowRule {
    fn name(&self) -> &str {
        "IssuerMessageFlow"
    }

    fn evaluate(
        &self,
        _request: &dyn TransportRequest,
        message: &SamlObject,
        policy: &mut SecurityPolicy,
    ) -> Result<RuleOutcome, SecurityPolicyError> {
        policy.issuer = message.get_issuer().map(|s| s.to_string());
        policy.message_id = Some(message.id.clone());
        policy.issue_instant = Some(message.issue_instant);
        Ok(RuleOutcome::Ignored)
    }
}

/// Validates an embedded XML signature, or a decoder-supplied detached
/// signature, against the issuer's signing keys. Absence of any signature is
/// not a failure at this layer — callers that require authentication check
/// `policy.authenticated` themselves.
pub struct SignatureRule {
    pub xml: Arc<dyn XmlSecurityProvider>,
}

impl Rule for SignatureRule {
    fn name(&self) -> &str {
        "Signature"
    }

    fn evaluate(
        &self,
        _request: &dyn TransportRequest,
        message: &SamlObject,
        policy: &mut SecurityPolicy,
    ) -> Result<RuleOutcome, SecurityPolicyError> {
        // MetadataResolutionRule runs after this one in the canonical order, so
        // `issuer_role` usually isn't populated yet; look the candidate signing
        // keys up directly from `policy.issuer` in that case. Either way this
        // rule never writes `issuer_metadata`/`issuer_role` itself — that
        // remains MetadataResolutionRule's job.
        let candidates: Vec<_> = match policy.issuer_role.as_ref() {
            Some(role) => role.signing_keys().cloned().collect(),
            None => policy
                .issuer
                .as_ref()
                .and_then(|issuer| policy.metadata.lookup(issuer))
                .and_then(|entity| entity.role(&policy.expected_role, &policy.expected_protocol).cloned())
                .map(|role| role.signing_keys().cloned().collect())
                .unwrap_or_default(),
        };

        if message.is_signed() {
            let trusted = self.xml.verify_xml_signature(message, &candidates).unwrap_or(false);
            if !trusted {
                return Err(SecurityPolicyError::BadSignature);
            }
            policy.authenticated = true;
            return Ok(RuleOutcome::Ignored);
        }

        if let (Some(detached), Some(bytes)) = (
            policy.detached_signature.clone(),
            policy.detached_signature_bytes.clone(),
        ) {
            let trusted = candidates.iter().any(|k| {
                crate::trust::ExplicitKeyTrustEngine::new().validate_detached_signature(
                    &bytes,
                    &detached.signature_alg,
                    &detached.signature_value,
                    std::slice::from_ref(k),
                )
            });
            if !trusted {
                return Err(SecurityPolicyError::BadSignature);
            }
            policy.authenticated = true;
        }

        Ok(RuleOutcome::Ignored)
    }
}

/// Rejects stale and replayed messages: `issue_instant` must fall within the
/// configured clock-skew window, and `(context, message_id)` must not have
/// been seen before.
pub struct ReplayAndFreshnessRule {
    pub context: String,
}

impl Rule for ReplayAndFreshnessRule {
    fn name(&self) -> &str {
        "ReplayAndFreshness"
    }

    fn evaluate(
        &self,
        _request: &dyn TransportRequest,
        _message: &SamlObject,
        policy: &mut SecurityPolicy,
    ) -> Result<RuleOutcome, SecurityPolicyError> {
        let message_id = policy.message_id.clone().ok_or(SecurityPolicyError::Stale)?;
        let issue_instant = policy.issue_instant.ok_or(SecurityPolicyError::Stale)?;

        let now = Utc::now();
        let skew = ChronoDuration::seconds(policy.clock_skew_secs);
        let expires_window = ChronoDuration::seconds(policy.expires_window_secs);

        if issue_instant > now + skew {
            return Err(SecurityPolicyError::Stale);
        }
        if issue_instant < now - skew - expires_window {
            return Err(SecurityPolicyError::Stale);
        }

        let ttl = std::time::Duration::from_secs((2 * policy.clock_skew_secs).max(0) as u64);
        if !policy.replay_cache.check(&self.context, &message_id, ttl) {
            return Err(SecurityPolicyError::Replayed(message_id));
        }

        Ok(RuleOutcome::Ignored)
    }
}

/// Confirms the message's declared destination matches the request URL (up
/// to but excluding any `?`). A message with no declared destination is
/// accepted unless `policy.routing_mandatory` is set.
pub struct MessageRoutingRule;

impl Rule for MessageRoutingRule {
    fn name(&self) -> &str {
        "MessageRouting"
    }

    fn evaluate(
        &self,
        request: &dyn TransportRequest,
        message: &SamlObject,
        policy: &mut SecurityPolicy,
    ) -> Result<RuleOutcome, SecurityPolicyError> {
        let declared = message
            .get_destination()
            .or(message.recipient.as_deref())
            .filter(|d| !d.is_empty());

        let declared = match declared {
            Some(d) => d,
            None => {
                return if policy.routing_mandatory {
                    Err(SecurityPolicyError::MissingDestination)
                } else {
                    Ok(RuleOutcome::Ignored)
                };
            }
        };

        let request_url = request.url();
        let request_base = request_url.split('?').next().unwrap_or(request_url);
        if declared != request_base {
            return Err(SecurityPolicyError::WrongDestination);
        }

        Ok(RuleOutcome::Ignored)
    }
}

/// Resolves `policy.issuer` against metadata, selecting the role that
/// advertises `policy.expected_role`/`policy.expected_protocol`.
pub struct MetadataResolutionRule;

impl Rule for MetadataResolutionRule {
    fn name(&self) -> &str {
        "MetadataResolution"
    }

    fn evaluate(
        &self,
        _request: &dyn TransportRequest,
        _message: &SamlObject,
        policy: &mut SecurityPolicy,
    ) -> Result<RuleOutcome, SecurityPolicyError> {
        let issuer = policy
            .issuer
            .clone()
            .ok_or_else(|| SecurityPolicyError::UnknownIssuer(String::new()))?;

        let entity = policy
            .metadata
            .lookup(&issuer)
            .ok_or_else(|| SecurityPolicyError::UnknownIssuer(issuer.clone()))?;

        let role = entity
            .role(&policy.expected_role, &policy.expected_protocol)
            .cloned()
            .ok_or_else(|| SecurityPolicyError::NoRole(issuer.clone()))?;

        let role_kind = role.kind.clone();
        policy.issuer_metadata = Some(entity);
        policy.issuer_role = Some(role);
        Ok(RuleOutcome::Accepted(issuer, role_kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataSource;
    use crate::metadata::{Endpoint, EntityDescriptor, KeyDescriptor, MetadataNode, MetadataProvider, RoleDescriptor, RoleKind};
    use crate::replay::InMemoryReplayCache;
    use crate::transport::MemoryTransportRequest;
    use crate::trust::ExplicitKeyTrustEngine;
    use crate::xml::{DefaultXmlSecurityProvider, MessageKind, SamlVersion};

    fn idp_entity() -> EntityDescriptor {
        EntityDescriptor::new("https://idp.example").with_role(
            RoleDescriptor::new(RoleKind::IdpSso, "urn:oasis:names:tc:SAML:2.0:protocol")
                .with_key(KeyDescriptor::signing(vec![1, 2, 3]))
                .with_endpoint(Endpoint::new(
                    "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect",
                    "https://idp.example/sso",
                )),
        )
    }

    fn policy_with_idp() -> SecurityPolicy {
        let source = InMemoryMetadataSource::new(MetadataNode::Entity(idp_entity()));
        let metadata = Arc::new(MetadataProvider::new(Box::new(source), vec![]));
        SecurityPolicy::new(
            metadata,
            Arc::new(ExplicitKeyTrustEngine::new()),
            Arc::new(InMemoryReplayCache::new()),
            RoleKind::IdpSso,
            "urn:oasis:names:tc:SAML:2.0:protocol",
        )
    }

    #[test]
    fn issuer_message_flow_sets_issuer_and_message_id() {
        let mut policy = policy_with_idp();
        let mut message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        message.issuer = Some("https://idp.example".to_string());
        let request = MemoryTransportRequest::get("https://sp.example/acs");

        let outcome = IssuerMessageFlowRule.evaluate(&request, &message, &mut policy).unwrap();
        assert!(matches!(outcome, RuleOutcome::Ignored));
        assert_eq!(policy.issuer.as_deref(), Some("https://idp.example"));
        assert_eq!(policy.message_id.as_deref(), Some("_r1"));
    }

    #[test]
    fn metadata_resolution_accepts_known_issuer_with_matching_role() {
        let mut policy = policy_with_idp();
        policy.issuer = Some("https://idp.example".to_string());
        let message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        let request = MemoryTransportRequest::get("https://sp.example/acs");

        let outcome = MetadataResolutionRule.evaluate(&request, &message, &mut policy).unwrap();
        assert!(matches!(outcome, RuleOutcome::Accepted(_, RoleKind::IdpSso)));
        assert!(policy.issuer_role.is_some());
    }

    #[test]
    fn metadata_resolution_rejects_unknown_issuer() {
        let mut policy = policy_with_idp();
        policy.issuer = Some("https://unknown.example".to_string());
        let message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        let request = MemoryTransportRequest::get("https://sp.example/acs");

        let result = MetadataResolutionRule.evaluate(&request, &message, &mut policy);
        assert!(matches!(result, Err(SecurityPolicyError::UnknownIssuer(_))));
    }

    #[test]
    fn message_routing_accepts_matching_destination_ignoring_query() {
        let mut policy = policy_with_idp();
        let mut message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        message.destination = Some("https://sp.example/acs".to_string());
        let request = MemoryTransportRequest::get("https://sp.example/acs?RelayState=abc");

        let outcome = MessageRoutingRule.evaluate(&request, &message, &mut policy).unwrap();
        assert!(matches!(outcome, RuleOutcome::Ignored));
    }

    #[test]
    fn message_routing_rejects_mismatched_destination() {
        let mut policy = policy_with_idp();
        let mut message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        message.destination = Some("https://evil.example/acs".to_string());
        let request = MemoryTransportRequest::get("https://sp.example/acs");

        assert!(MessageRoutingRule.evaluate(&request, &message, &mut policy).is_err());
    }

    #[test]
    fn message_routing_accepts_missing_destination_when_not_mandatory() {
        let mut policy = policy_with_idp();
        policy.routing_mandatory = false;
        let message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        let request = MemoryTransportRequest::get("https://sp.example/acs");

        let outcome = MessageRoutingRule.evaluate(&request, &message, &mut policy).unwrap();
        assert!(matches!(outcome, RuleOutcome::Ignored));
    }

    #[test]
    fn message_routing_rejects_missing_destination_when_mandatory() {
        let mut policy = policy_with_idp();
        policy.routing_mandatory = true;
        let message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        let request = MemoryTransportRequest::get("https://sp.example/acs");

        assert!(MessageRoutingRule.evaluate(&request, &message, &mut policy).is_err());
    }

    #[test]
    fn replay_rule_rejects_second_sighting_of_same_message_id() {
        let mut policy = policy_with_idp();
        policy.message_id = Some("_r1".to_string());
        policy.issue_instant = Some(Utc::now());
        let message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        let request = MemoryTransportRequest::get("https://sp.example/acs");
        let rule = ReplayAndFreshnessRule {
            context: "idp:https://idp.example".to_string(),
        };

        assert!(rule.evaluate(&request, &message, &mut policy).is_ok());
        policy.message_id = Some("_r1".to_string());
        policy.issue_instant = Some(Utc::now());
        assert!(matches!(
            rule.evaluate(&request, &message, &mut policy),
            Err(SecurityPolicyError::Replayed(_))
        ));
    }

    #[test]
    fn replay_rule_rejects_stale_issue_instant() {
        let mut policy = policy_with_idp();
        policy.message_id = Some("_r2".to_string());
        policy.issue_instant = Some(Utc::now() - ChronoDuration::hours(1));
        let message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r2");
        let request = MemoryTransportRequest::get("https://sp.example/acs");
        let rule = ReplayAndFreshnessRule {
            context: "idp:https://idp.example".to_string(),
        };

        assert!(matches!(
            rule.evaluate(&request, &message, &mut policy),
            Err(SecurityPolicyError::Stale)
        ));
    }

    #[test]
    fn signature_rule_accepts_unsigned_message_without_authenticating() {
        let mut policy = policy_with_idp();
        policy.issuer = Some("https://idp.example".to_string());
        MetadataResolutionRule
            .evaluate(&MemoryTransportRequest::get("x"), &SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1"), &mut policy)
            .unwrap();

        let message = SamlObject::new(SamlVersion::V2_0, MessageKind::Response, "_r1");
        let rule = SignatureRule {
            xml: Arc::new(DefaultXmlSecurityProvider::new()),
        };
        let request = MemoryTransportRequest::get("https://sp.example/acs");
        let outcome = rule.evaluate(&request, &message, &mut policy).unwrap();
        assert!(matches!(outcome, RuleOutcome::Ignored));
        assert!(!policy.authenticated);
    }
}
