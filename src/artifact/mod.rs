//! Binary artifact tokens: encode/decode/parse, one format per
//! `(protocol-version, type-code)` pair (C1).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

use crate::error::ArtifactError;

pub const TYPE_CODE_SAML1_TYPE1: u16 = 0x0001;
pub const TYPE_CODE_SAML1_TYPE2: u16 = 0x0002;
pub const TYPE_CODE_SAML2_TYPE4: u16 = 0x0004;

/// A SAML artifact: a short opaque token referencing a larger message held
/// server-side. Naturally a tagged variant sharing a type code and SourceID
/// header with a format-specific tail, per design note 9.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// SAML 1.x type 1: `source_id` is either SHA-1(issuer entity ID) or an
    /// explicit SourceID extension; `assertion_handle` is random.
    Saml1Type1 {
        source_id: [u8; 20],
        assertion_handle: [u8; 20],
    },
    /// SAML 2.0 type 4: adds a big-endian `endpoint_index` identifying which
    /// artifact-resolution endpoint on the issuer to call back.
    Saml2Type4 {
        endpoint_index: u16,
        source_id: [u8; 20],
        message_handle: [u8; 20],
    },
}

impl Artifact {
    pub fn type_code(&self) -> u16 {
        match self {
            Artifact::Saml1Type1 { .. } => TYPE_CODE_SAML1_TYPE1,
            Artifact::Saml2Type4 { .. } => TYPE_CODE_SAML2_TYPE4,
        }
    }

    pub fn source_id(&self) -> &[u8; 20] {
        match self {
            Artifact::Saml1Type1 { source_id, .. } => source_id,
            Artifact::Saml2Type4 { source_id, .. } => source_id,
        }
    }

    /// The 20-byte handle identifying the stored message within the sender's
    /// artifact map.
    pub fn handle(&self) -> &[u8; 20] {
        match self {
            Artifact::Saml1Type1 { assertion_handle, .. } => assertion_handle,
            Artifact::Saml2Type4 { message_handle, .. } => message_handle,
        }
    }

    /// Big-endian endpoint index at offset `type_code_len + 2`, or 0 when the
    /// artifact is too short to carry one (SAML 1.x artifacts, or malformed
    /// input that slipped past length validation).
    pub fn endpoint_index(&self) -> u16 {
        match self {
            Artifact::Saml1Type1 { .. } => 0,
            Artifact::Saml2Type4 { endpoint_index, .. } => *endpoint_index,
        }
    }

    /// Generates a fresh SAML 1.x type 1 artifact with a random assertion handle.
    pub fn generate_saml1(source_id: [u8; 20]) -> Self {
        Artifact::Saml1Type1 {
            source_id,
            assertion_handle: random_handle(),
        }
    }

    /// Generates a fresh SAML 2.0 type 4 artifact. `endpoint_index` identifies
    /// the issuer's own artifact-resolution endpoint the recipient should call.
    pub fn generate_saml2(source_id: [u8; 20], endpoint_index: u16) -> Self {
        Artifact::Saml2Type4 {
            endpoint_index,
            source_id,
            message_handle: random_handle(),
        }
    }

    /// Raw wire-form bytes: the concatenation of type code, (endpoint index),
    /// source ID, and handle.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(44);
        out.extend_from_slice(&self.type_code().to_be_bytes());
        match self {
            Artifact::Saml1Type1 {
                source_id,
                assertion_handle,
            } => {
                out.extend_from_slice(source_id);
                out.extend_from_slice(assertion_handle);
            }
            Artifact::Saml2Type4 {
                endpoint_index,
                source_id,
                message_handle,
            } => {
                out.extend_from_slice(&endpoint_index.to_be_bytes());
                out.extend_from_slice(source_id);
                out.extend_from_slice(message_handle);
            }
        }
        out
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, ArtifactError> {
        if bytes.len() < 2 {
            return Err(ArtifactError::BadLength);
        }
        let type_code = u16::from_be_bytes([bytes[0], bytes[1]]);
        match type_code {
            TYPE_CODE_SAML1_TYPE1 => {
                if bytes.len() != 42 {
                    return Err(ArtifactError::BadLength);
                }
                let mut source_id = [0u8; 20];
                source_id.copy_from_slice(&bytes[2..22]);
                let mut assertion_handle = [0u8; 20];
                assertion_handle.copy_from_slice(&bytes[22..42]);
                Ok(Artifact::Saml1Type1 {
                    source_id,
                    assertion_handle,
                })
            }
            TYPE_CODE_SAML2_TYPE4 => {
                if bytes.len() != 44 {
                    return Err(ArtifactError::BadLength);
                }
                let endpoint_index = u16::from_be_bytes([bytes[2], bytes[3]]);
                let mut source_id = [0u8; 20];
                source_id.copy_from_slice(&bytes[4..24]);
                let mut message_handle = [0u8; 20];
                message_handle.copy_from_slice(&bytes[24..44]);
                Ok(Artifact::Saml2Type4 {
                    endpoint_index,
                    source_id,
                    message_handle,
                })
            }
            TYPE_CODE_SAML1_TYPE2 => Err(ArtifactError::UnknownTypeCode(type_code)),
            other => Err(ArtifactError::UnknownTypeCode(other)),
        }
    }

    pub fn parse_base64(encoded: &str) -> Result<Self, ArtifactError> {
        let bytes = STANDARD.decode(encoded)?;
        Self::parse_bytes(&bytes)
    }
}

fn random_handle() -> [u8; 20] {
    let mut handle = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut handle);
    handle
}
