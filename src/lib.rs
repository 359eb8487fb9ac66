//! Protocol-engine layer of a federated single-sign-on stack: the SAML
//! object model, binding-specific wire formats, the security-policy
//! evaluation pipeline, and metadata lookup used to resolve issuers.
//!
//! Real XML parsing/canonicalization/signature cryptography, TLS, process
//! bootstrap, and CLI/plugin-manifest loading are out of scope — a host
//! embeds this crate and supplies its own.

pub mod artifact;
pub mod artifact_map;
pub mod binding;
pub mod credential;
pub mod error;
pub mod metadata;
pub mod policy;
pub mod registry;
pub mod replay;
pub mod transport;
pub mod trust;
pub mod util;
pub mod xml;

#[doc(hidden)]
pub mod testing;

pub use artifact::Artifact;
pub use artifact_map::ArtifactMap;
pub use error::{ArtifactError, BindingError, MetadataError, ProfileError, SecurityPolicyError, XmlError};
pub use metadata::{EntityDescriptor, MetadataProvider, RoleDescriptor, RoleKind};
pub use policy::SecurityPolicy;
pub use xml::{MessageKind, SamlObject, SamlVersion};
