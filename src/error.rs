//! Error types for every subsystem, in the style of the host application's
//! `AppError`/`CacheError` enums: one `thiserror` enum per failure domain, `#[from]`
//! at the seams that need an automatic conversion, and a human-readable `#[error(...)]`
//! message on every variant.

use thiserror::Error;

/// Failures from the artifact codec (C1) and artifact map (C3).
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact has the wrong length for its type code")]
    BadLength,
    #[error("artifact type code {0:#06x} is not recognized")]
    UnknownTypeCode(u16),
    #[error("artifact is not valid base64: {0}")]
    BadBase64(#[from] base64::DecodeError),
    #[error("artifact was not found (already dereferenced, or never stored)")]
    NotFound,
    #[error("artifact was dereferenced by a party other than its intended recipient")]
    WrongRecipient,
    #[error("artifact has expired")]
    Expired,
}

/// Failures surfaced by message encoders/decoders (C6/C7).
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("message Destination did not match the request URL")]
    WrongDestination,
    #[error("signed message is missing a required Destination")]
    MissingDestination,
    #[error("RelayState exceeds the 80-byte limit for this binding ({0} bytes)")]
    RelayStateTooLong(usize),
    #[error("underlying transport failed: {0}")]
    TransportFailed(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    SecurityPolicy(#[from] SecurityPolicyError),
}

/// Failures raised by a `Rule` while the security-policy pipeline runs (C5).
#[derive(Debug, Error)]
pub enum SecurityPolicyError {
    #[error("message carries no usable signature")]
    Unsigned,
    #[error("signature failed to validate against the issuer's trusted credentials")]
    BadSignature,
    #[error("message (id={0}) has already been seen and was rejected as a replay")]
    Replayed(String),
    #[error("message IssueInstant is outside the permitted clock-skew window")]
    Stale,
    #[error("issuer '{0}' could not be resolved in metadata")]
    UnknownIssuer(String),
    #[error("no role descriptor advertises the expected protocol for issuer '{0}'")]
    NoRole(String),
    #[error("message declared no Destination and the routing rule requires one")]
    MissingDestination,
    #[error("message Destination did not match the request URL")]
    WrongDestination,
}

/// Profile-level decisions layered on top of a successful decode.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("fatal profile error: {message}{entity}", entity = .entity_id.as_deref().map(|e| format!(" (entity: {e})")).unwrap_or_default())]
    Fatal {
        message: String,
        entity_id: Option<String>,
        error_url: Option<String>,
        contact_name: Option<String>,
        contact_email: Option<String>,
    },
    #[error("retryable profile error: {message}")]
    Retryable { message: String },
}

impl ProfileError {
    pub fn fatal(message: impl Into<String>) -> Self {
        ProfileError::Fatal {
            message: message.into(),
            entity_id: None,
            error_url: None,
            contact_name: None,
            contact_email: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        ProfileError::Retryable {
            message: message.into(),
        }
    }

    /// Attaches entity ID / error URL / contact info pulled from metadata, mirroring
    /// `opensaml::annotateException`'s practice of decorating an in-flight exception
    /// with support contact details before it leaves the profile layer.
    pub fn annotate_with_entity(
        mut self,
        entity_id: impl Into<String>,
        error_url: Option<String>,
        contact_name: Option<String>,
        contact_email: Option<String>,
    ) -> Self {
        if let ProfileError::Fatal {
            entity_id: e,
            error_url: u,
            contact_name: n,
            contact_email: m,
            ..
        } = &mut self
        {
            *e = Some(entity_id.into());
            *u = error_url;
            *n = contact_name;
            *m = contact_email;
        }
        self
    }
}

/// Failures from the metadata provider (C2).
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to load metadata source: {0}")]
    SourceLoad(String),
    #[error("metadata filter '{filter}' rejected the loaded tree: {reason}")]
    FilterRejected { filter: String, reason: String },
    #[error("entity '{0}' not found in metadata")]
    UnknownEntity(String),
}

/// Failures from the opaque XML/signature collaborator (`XmlSecurityProvider`).
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("failed to parse message: {0}")]
    Parse(String),
    #[error("failed to serialize message: {0}")]
    Serialize(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("signature verification failed: {0}")]
    Verification(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_profile_error_carries_entity_annotation() {
        let err = ProfileError::fatal("issuer unknown").annotate_with_entity(
            "https://idp.example",
            Some("https://idp.example/error".to_string()),
            Some("IdP Support".to_string()),
            Some("support@idp.example".to_string()),
        );
        match err {
            ProfileError::Fatal { entity_id, .. } => {
                assert_eq!(entity_id.as_deref(), Some("https://idp.example"));
            }
            _ => panic!("expected Fatal variant"),
        }
    }

    #[test]
    fn binding_error_wraps_artifact_error() {
        let err: BindingError = ArtifactError::Expired.into();
        assert!(matches!(err, BindingError::Artifact(ArtifactError::Expired)));
    }
}
