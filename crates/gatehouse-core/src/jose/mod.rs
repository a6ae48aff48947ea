//! Compact JOSE codec: signing (JWS) and encryption (JWE) of claim sets.
//!
//! Algorithm families are closed sum types; each variant maps to exactly one
//! strategy implementation. Verification failures are ordinary `Result`
//! values — a bad signature is an expected outcome, not an exception.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

pub mod claims;
pub mod jwe;
pub mod jws;

pub use claims::ClaimsSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JoseError {
    #[error("malformed compact serialization")]
    Malformed,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// JWS signature algorithms (RFC 7518 §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "HS256")]
    Hs256,
    #[serde(rename = "HS384")]
    Hs384,
    #[serde(rename = "HS512")]
    Hs512,
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "RS384")]
    Rs384,
    #[serde(rename = "RS512")]
    Rs512,
    #[serde(rename = "PS256")]
    Ps256,
    #[serde(rename = "PS384")]
    Ps384,
    #[serde(rename = "PS512")]
    Ps512,
    #[serde(rename = "ES256")]
    Es256,
    #[serde(rename = "ES384")]
    Es384,
    #[serde(rename = "ES512")]
    Es512,
    #[serde(rename = "none")]
    None,
}

/// Key family a signature algorithm resolves its key from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Hmac,
    Rsa,
    Ec,
    None,
}

impl SignatureAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
            Self::Hs384 => "HS384",
            Self::Hs512 => "HS512",
            Self::Rs256 => "RS256",
            Self::Rs384 => "RS384",
            Self::Rs512 => "RS512",
            Self::Ps256 => "PS256",
            Self::Ps384 => "PS384",
            Self::Ps512 => "PS512",
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::None => "none",
        }
    }

    pub fn family(self) -> KeyFamily {
        match self {
            Self::Hs256 | Self::Hs384 | Self::Hs512 => KeyFamily::Hmac,
            Self::Rs256 | Self::Rs384 | Self::Rs512 | Self::Ps256 | Self::Ps384 | Self::Ps512 => {
                KeyFamily::Rsa
            }
            Self::Es256 | Self::Es384 | Self::Es512 => KeyFamily::Ec,
            Self::None => KeyFamily::None,
        }
    }

    /// The `jsonwebtoken` engine backs every variant except ES512 and `none`.
    pub fn to_jsonwebtoken(self) -> Option<jsonwebtoken::Algorithm> {
        use jsonwebtoken::Algorithm as A;
        match self {
            Self::Hs256 => Some(A::HS256),
            Self::Hs384 => Some(A::HS384),
            Self::Hs512 => Some(A::HS512),
            Self::Rs256 => Some(A::RS256),
            Self::Rs384 => Some(A::RS384),
            Self::Rs512 => Some(A::RS512),
            Self::Ps256 => Some(A::PS256),
            Self::Ps384 => Some(A::PS384),
            Self::Ps512 => Some(A::PS512),
            Self::Es256 => Some(A::ES256),
            Self::Es384 => Some(A::ES384),
            Self::Es512 | Self::None => None,
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = JoseError;

    fn from_str(s: &str) -> Result<Self, JoseError> {
        match s {
            "HS256" => Ok(Self::Hs256),
            "HS384" => Ok(Self::Hs384),
            "HS512" => Ok(Self::Hs512),
            "RS256" => Ok(Self::Rs256),
            "RS384" => Ok(Self::Rs384),
            "RS512" => Ok(Self::Rs512),
            "PS256" => Ok(Self::Ps256),
            "PS384" => Ok(Self::Ps384),
            "PS512" => Ok(Self::Ps512),
            "ES256" => Ok(Self::Es256),
            "ES384" => Ok(Self::Es384),
            "ES512" => Ok(Self::Es512),
            "none" => Ok(Self::None),
            other => Err(JoseError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWE key-management algorithms (RFC 7518 §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyManagementAlgorithm {
    #[serde(rename = "RSA1_5")]
    Rsa1_5,
    #[serde(rename = "RSA-OAEP")]
    RsaOaep,
    #[serde(rename = "A128KW")]
    A128Kw,
    #[serde(rename = "A256KW")]
    A256Kw,
}

impl KeyManagementAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsa1_5 => "RSA1_5",
            Self::RsaOaep => "RSA-OAEP",
            Self::A128Kw => "A128KW",
            Self::A256Kw => "A256KW",
        }
    }

    pub fn is_symmetric(self) -> bool {
        matches!(self, Self::A128Kw | Self::A256Kw)
    }

    /// Wrapping key size for the symmetric variants.
    pub fn wrap_key_len(self) -> Option<usize> {
        match self {
            Self::A128Kw => Some(16),
            Self::A256Kw => Some(32),
            _ => None,
        }
    }
}

impl FromStr for KeyManagementAlgorithm {
    type Err = JoseError;

    fn from_str(s: &str) -> Result<Self, JoseError> {
        match s {
            "RSA1_5" => Ok(Self::Rsa1_5),
            "RSA-OAEP" => Ok(Self::RsaOaep),
            "A128KW" => Ok(Self::A128Kw),
            "A256KW" => Ok(Self::A256Kw),
            other => Err(JoseError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for KeyManagementAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWE content-encryption algorithms (RFC 7518 §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentEncryptionAlgorithm {
    #[serde(rename = "A128GCM")]
    A128Gcm,
    #[serde(rename = "A256GCM")]
    A256Gcm,
    #[serde(rename = "A128CBC-HS256")]
    A128CbcHs256,
    #[serde(rename = "A256CBC-HS512")]
    A256CbcHs512,
}

impl ContentEncryptionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A128Gcm => "A128GCM",
            Self::A256Gcm => "A256GCM",
            Self::A128CbcHs256 => "A128CBC-HS256",
            Self::A256CbcHs512 => "A256CBC-HS512",
        }
    }

    /// Content-encryption key size in bytes (the CBC+HMAC composites carry
    /// both a MAC key and an encryption key).
    pub fn cek_len(self) -> usize {
        match self {
            Self::A128Gcm => 16,
            Self::A256Gcm => 32,
            Self::A128CbcHs256 => 32,
            Self::A256CbcHs512 => 64,
        }
    }

    pub fn iv_len(self) -> usize {
        match self {
            Self::A128Gcm | Self::A256Gcm => 12,
            Self::A128CbcHs256 | Self::A256CbcHs512 => 16,
        }
    }
}

impl FromStr for ContentEncryptionAlgorithm {
    type Err = JoseError;

    fn from_str(s: &str) -> Result<Self, JoseError> {
        match s {
            "A128GCM" => Ok(Self::A128Gcm),
            "A256GCM" => Ok(Self::A256Gcm),
            "A128CBC-HS256" => Ok(Self::A128CbcHs256),
            "A256CBC-HS512" => Ok(Self::A256CbcHs512),
            other => Err(JoseError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for ContentEncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protected header shared by JWS and JWE compact forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
}

impl Header {
    pub fn signing(alg: SignatureAlgorithm, kid: Option<&str>) -> Self {
        Self {
            alg: alg.as_str().to_string(),
            enc: None,
            kid: kid.map(String::from),
            typ: Some("JWT".to_string()),
            cty: None,
        }
    }
}

pub(crate) fn b64(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub(crate) fn b64_decode(data: &str) -> Result<Vec<u8>, JoseError> {
    URL_SAFE_NO_PAD.decode(data).map_err(|_| JoseError::Malformed)
}
