//! The security-policy pipeline (C5): an ordered chain of rules applied to a
//! decoded message plus its transport context, resolving the issuer, checking
//! signatures, replay, freshness, and delivery address.

pub mod rules;

use std::sync::Arc;

use crate::error::SecurityPolicyError;
use crate::metadata::{EntityDescriptor, MetadataProvider, RoleDescriptor, RoleKind};
use crate::replay::ReplayCache;
use crate::transport::TransportRequest;
use crate::trust::TrustEngine;
use crate::xml::{DetachedSignature, SamlObject};
use chrono::{DateTime, Utc};

/// What a single rule decided.
#[derive(Debug, Clone)]
pub enum RuleOutcome {
    /// The rule positively identified and trusted the issuer/role.
    Accepted(String, RoleKind),
    /// The rule had nothing to say about this message (e.g. unsigned message
    /// reaching the signature rule — not an error, just "nothing to verify").
    Ignored,
}

/// A single policy rule. Rules run in configured order and may rely on
/// fields set by earlier rules in the same pass.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        request: &dyn TransportRequest,
        message: &SamlObject,
        policy: &mut SecurityPolicy,
    ) -> Result<RuleOutcome, SecurityPolicyError>;
}

/// Mutable pipeline state, accumulated as rules run. Holds the collaborators
/// every rule needs (metadata, trust, replay cache) plus the ordered rule
/// list itself.
pub struct SecurityPolicy {
    pub issuer: Option<String>,
    pub issuer_metadata: Option<EntityDescriptor>,
    pub issuer_role: Option<RoleDescriptor>,
    pub message_id: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
    pub authenticated: bool,
    /// A detached signature the decoder pre-populated (HTTP-Redirect /
    /// HTTP-POST-SimpleSign) for the signature rule to consume, since those
    /// bindings carry the signature outside the message body.
    pub detached_signature: Option<DetachedSignature>,
    pub detached_signature_bytes: Option<Vec<u8>>,

    pub metadata: Arc<MetadataProvider>,
    pub trust_engine: Arc<dyn TrustEngine>,
    pub replay_cache: Arc<dyn ReplayCache>,
    pub rules: Vec<Box<dyn Rule>>,

    pub expected_role: RoleKind,
    pub expected_protocol: String,
    pub clock_skew_secs: i64,
    pub expires_window_secs: i64,
    pub routing_mandatory: bool,
}

impl SecurityPolicy {
    pub fn new(
        metadata: Arc<MetadataProvider>,
        trust_engine: Arc<dyn TrustEngine>,
        replay_cache: Arc<dyn ReplayCache>,
        expected_role: RoleKind,
        expected_protocol: impl Into<String>,
    ) -> Self {
        Self {
            issuer: None,
            issuer_metadata: None,
            issuer_role: None,
            message_id: None,
            issue_instant: None,
            authenticated: false,
            detached_signature: None,
            detached_signature_bytes: None,
            metadata,
            trust_engine,
            replay_cache,
            rules: Vec::new(),
            expected_role,
            expected_protocol: expected_protocol.into(),
            clock_skew_secs: 180,
            expires_window_secs: 0,
            routing_mandatory: true,
        }
    }

    pub fn with_rule(mut self, rule: Box<dyn Rule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_clock_skew_secs(mut self, secs: i64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    pub fn with_routing_mandatory(mut self, mandatory: bool) -> Self {
        self.routing_mandatory = mandatory;
        self
    }

    /// Clears message-scoped fields. When `message_only` is true, issuer
    /// resolution (`issuer_metadata`, `issuer_role`) survives — the state a
    /// two-layer SOAP/ECP evaluation needs carried from the envelope pass
    /// into the inner-payload pass.
    pub fn reset(&mut self, message_only: bool) {
        self.message_id = None;
        self.issue_instant = None;
        self.authenticated = false;
        self.detached_signature = None;
        self.detached_signature_bytes = None;
        if !message_only {
            self.issuer = None;
            self.issuer_metadata = None;
            self.issuer_role = None;
        }
    }

    /// Runs every configured rule in order against `message`. Returns the
    /// last non-`Ignored` outcome, or `Ignored` if every rule abstained.
    pub fn evaluate(
        &mut self,
        request: &dyn TransportRequest,
        message: &SamlObject,
    ) -> Result<RuleOutcome, SecurityPolicyError> {
        let rules = std::mem::take(&mut self.rules);
        let mut outcome = RuleOutcome::Ignored;
        for rule in &rules {
            match rule.evaluate(request, message, self) {
                Ok(RuleOutcome::Ignored) => {}
                Ok(accepted) => outcome = accepted,
                Err(e) => {
                    self.rules = rules;
                    return Err(e);
                }
            }
        }
        self.rules = rules;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataSource;
    use crate::metadata::MetadataNode;
    use crate::replay::InMemoryReplayCache;
    use crate::trust::ExplicitKeyTrustEngine;

    fn empty_policy() -> SecurityPolicy {
        let source = InMemoryMetadataSource::new(MetadataNode::Group(Default::default()));
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
    fn reset_message_only_preserves_issuer_resolution() {
        let mut policy = empty_policy();
        policy.issuer = Some("https://idp.example".to_string());
        policy.message_id = Some("_m1".to_string());
        policy.authenticated = true;

        policy.reset(true);
        assert_eq!(policy.issuer.as_deref(), Some("https://idp.example"));
        assert!(policy.message_id.is_none());
        assert!(!policy.authenticated);
    }

    #[test]
    fn reset_full_clears_issuer_too() {
        let mut policy = empty_policy();
        policy.issuer = Some("https://idp.example".to_string());
        policy.reset(false);
        assert!(policy.issuer.is_none());
    }

    #[test]
    fn evaluate_with_no_rules_is_ignored() {
        use crate::transport::MemoryTransportRequest;
        use crate::xml::{MessageKind, SamlVersion};

        let mut policy = empty_policy();
        let message = SamlObject::new(SamlVersion::V2_0, MessageKind::AuthnRequest, "_m1");
        let request = MemoryTransportRequest::get("https://sp.example/acs");
        let outcome = policy.evaluate(&request, &message).unwrap();
        assert!(matches!(outcome, RuleOutcome::Ignored));
    }
}
