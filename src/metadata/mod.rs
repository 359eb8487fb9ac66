//! Federation metadata: entities, roles, endpoints, keys — and the refresh-aware,
//! observer-notifying provider that indexes and serves them (C2).

mod provider;
mod source;

pub use provider::{MetadataObserver, MetadataProvider, MetadataReadGuard};
pub use source::{InMemoryMetadataSource, MetadataFilter, MetadataSource};

use std::collections::HashMap;

/// Root of a loaded metadata tree: either a single entity, or a federation-style
/// nested group of entities (mirrors `EntityDescriptor` vs `EntitiesDescriptor`
/// in the original object model).
#[derive(Debug, Clone)]
pub enum MetadataNode {
    Entity(EntityDescriptor),
    Group(EntitiesDescriptor),
}

impl MetadataNode {
    /// Flattens the tree into its leaf `EntityDescriptor`s, document order preserved.
    pub fn entities(&self) -> Vec<&EntityDescriptor> {
        let mut out = Vec::new();
        self.collect_entities(&mut out);
        out
    }

    fn collect_entities<'a>(&'a self, out: &mut Vec<&'a EntityDescriptor>) {
        match self {
            MetadataNode::Entity(e) => out.push(e),
            MetadataNode::Group(g) => {
                for child in &g.children {
                    child.collect_entities(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntitiesDescriptor {
    pub name: Option<String>,
    pub children: Vec<MetadataNode>,
}

#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub entity_id: String,
    /// Explicit `SourceID` extension, if the entity publishes one (SAML 1.x type 1
    /// artifacts can use an arbitrary SourceID rather than SHA-1(entity_id)).
    pub explicit_source_id: Option<[u8; 20]>,
    pub valid_until: Option<chrono::DateTime<chrono::Utc>>,
    pub roles: Vec<RoleDescriptor>,
}

impl EntityDescriptor {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            explicit_source_id: None,
            valid_until: None,
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: RoleDescriptor) -> Self {
        self.roles.push(role);
        self
    }

    /// The SHA-1 SourceID this entity resolves to on the wire, honoring an
    /// explicit override first.
    pub fn source_id(&self, sha1: impl Fn(&[u8]) -> [u8; 20]) -> [u8; 20] {
        self.explicit_source_id
            .unwrap_or_else(|| sha1(self.entity_id.as_bytes()))
    }

    /// First role, in document order, advertising `protocol_uri` in its
    /// `protocolSupportEnumeration` and matching `kind`.
    pub fn role(&self, kind: &RoleKind, protocol_uri: &str) -> Option<&RoleDescriptor> {
        self.roles
            .iter()
            .find(|r| &r.kind == kind && r.supports_protocol(protocol_uri))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleKind {
    IdpSso,
    SpSso,
    AuthnAuthority,
    AttributeAuthority,
    Pdp,
    Generic(String),
}

#[derive(Debug, Clone)]
pub struct RoleDescriptor {
    pub kind: RoleKind,
    /// Whitespace-separated list of protocol support, matched by exact token
    /// (not substring), per the distilled spec's `protocolSupportEnumeration` rule.
    pub protocol_support_enumeration: String,
    pub key_descriptors: Vec<KeyDescriptor>,
    pub endpoints: Vec<Endpoint>,
    /// Formatted support contact, for error annotation (§7 propagation policy).
    pub error_url: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
}

impl RoleDescriptor {
    pub fn new(kind: RoleKind, protocol_support_enumeration: impl Into<String>) -> Self {
        Self {
            kind,
            protocol_support_enumeration: protocol_support_enumeration.into(),
            key_descriptors: Vec::new(),
            endpoints: Vec::new(),
            error_url: None,
            contact_name: None,
            contact_email: None,
        }
    }

    pub fn with_key(mut self, key: KeyDescriptor) -> Self {
        self.key_descriptors.push(key);
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn supports_protocol(&self, protocol_uri: &str) -> bool {
        self.protocol_support_enumeration
            .split_whitespace()
            .any(|token| token == protocol_uri)
    }

    /// Key descriptors usable for signature verification: `use=signing` or no
    /// `use` attribute at all, per the trust engine contract (C4).
    pub fn signing_keys(&self) -> impl Iterator<Item = &KeyDescriptor> {
        self.key_descriptors
            .iter()
            .filter(|k| matches!(k.use_, KeyUse::Signing | KeyUse::Unspecified))
    }

    /// Endpoints advertising `binding_uri`, in document order.
    pub fn endpoints_for(&self, binding_uri: &str) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(move |e| e.binding == binding_uri)
    }

    /// The endpoint at `index`, for artifact-resolution callbacks.
    pub fn endpoint_at_index(&self, index: u16) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.index == Some(index))
    }

    pub fn default_endpoint(&self, binding_uri: &str) -> Option<&Endpoint> {
        self.endpoints_for(binding_uri)
            .find(|e| e.is_default)
            .or_else(|| self.endpoints_for(binding_uri).next())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUse {
    Signing,
    Encryption,
    Unspecified,
}

#[derive(Debug, Clone)]
pub struct KeyDescriptor {
    pub use_: KeyUse,
    /// Opaque key material (DER-encoded public key). Real X.509 parsing is the
    /// `XmlSecurityProvider`'s concern, not this crate's; this is the key bytes
    /// a trust engine hands straight to a verifier.
    pub public_key_der: Vec<u8>,
}

impl KeyDescriptor {
    pub fn signing(public_key_der: Vec<u8>) -> Self {
        Self {
            use_: KeyUse::Signing,
            public_key_der,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub binding: String,
    pub location: String,
    pub response_location: Option<String>,
    pub index: Option<u16>,
    pub is_default: bool,
}

impl Endpoint {
    pub fn new(binding: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            location: location.into(),
            response_location: None,
            index: None,
            is_default: false,
        }
    }

    pub fn indexed(mut self, index: u16, is_default: bool) -> Self {
        self.index = Some(index);
        self.is_default = is_default;
        self
    }
}

/// Built, indexed view of a loaded `MetadataNode`, installed atomically behind
/// the provider's lock.
#[derive(Debug, Default)]
pub(crate) struct IndexedTree {
    pub(crate) by_entity_id: HashMap<String, EntityDescriptor>,
    pub(crate) by_source_id: HashMap<[u8; 20], String>,
}

impl IndexedTree {
    pub(crate) fn build(root: &MetadataNode, sha1: impl Fn(&[u8]) -> [u8; 20]) -> Self {
        let mut by_entity_id = HashMap::new();
        let mut by_source_id = HashMap::new();
        for entity in root.entities() {
            // An artifact resolve must match on either the SHA-1 of the
            // entity ID or a declared explicit SourceID, so both land in the
            // index when an explicit override is present.
            by_source_id.insert(sha1(entity.entity_id.as_bytes()), entity.entity_id.clone());
            if let Some(explicit) = entity.explicit_source_id {
                by_source_id.insert(explicit, entity.entity_id.clone());
            }
            by_entity_id.insert(entity.entity_id.clone(), entity.clone());
        }
        Self {
            by_entity_id,
            by_source_id,
        }
    }
}
