//! Compact JWS signing and verification.
//!
//! The signing input is exactly `base64url(header) "." base64url(payload)`;
//! the signature covers that byte string. HMAC comparison is constant time.

use hmac::{Hmac, Mac};
use jsonwebtoken::{DecodingKey, EncodingKey};
use p521::ecdsa::signature::{Signer, Verifier};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use super::{ClaimsSet, Header, JoseError, SignatureAlgorithm, b64, b64_decode};

/// Private signing material, one variant per strategy.
#[derive(Clone)]
pub enum JwsSigner {
    /// HS256/384/512 — the shared secret, never a server-wide key when the
    /// token is client-bound.
    Hmac(Vec<u8>),
    /// RS/PS/ES256/ES384 via the `jsonwebtoken` engine.
    Asymmetric(EncodingKey),
    /// ES512 (P-521 is outside the `jsonwebtoken` algorithm set).
    P521(Box<p521::ecdsa::SigningKey>),
    /// `alg=none` — integrity not guaranteed.
    Unsigned,
}

/// Public verification material, mirroring [`JwsSigner`].
#[derive(Clone)]
pub enum JwsVerifier {
    Hmac(Vec<u8>),
    Asymmetric(DecodingKey),
    P521(p521::ecdsa::VerifyingKey),
    Unsigned,
}

pub fn sign(
    claims: &ClaimsSet,
    alg: SignatureAlgorithm,
    kid: Option<&str>,
    signer: &JwsSigner,
) -> Result<String, JoseError> {
    sign_payload(&claims.to_json_bytes(), alg, kid, signer)
}

pub fn sign_payload(
    payload: &[u8],
    alg: SignatureAlgorithm,
    kid: Option<&str>,
    signer: &JwsSigner,
) -> Result<String, JoseError> {
    let header = Header::signing(alg, kid);
    let header_json = serde_json::to_vec(&header).map_err(|_| JoseError::Malformed)?;
    let signing_input = format!("{}.{}", b64(&header_json), b64(payload));

    let signature = match (alg, signer) {
        (SignatureAlgorithm::None, JwsSigner::Unsigned) => String::new(),
        (alg, JwsSigner::Hmac(secret)) if alg.family() == super::KeyFamily::Hmac => {
            b64(&hmac_digest(alg, secret, signing_input.as_bytes())?)
        }
        (SignatureAlgorithm::Es512, JwsSigner::P521(key)) => {
            let sig: p521::ecdsa::Signature = key.sign(signing_input.as_bytes());
            b64(&sig.to_vec())
        }
        (alg, JwsSigner::Asymmetric(key)) => {
            let jwt_alg = alg
                .to_jsonwebtoken()
                .ok_or_else(|| JoseError::UnsupportedAlgorithm(alg.as_str().to_string()))?;
            jsonwebtoken::crypto::sign(signing_input.as_bytes(), key, jwt_alg)
                .map_err(|e| JoseError::InvalidKey(e.to_string()))?
        }
        (alg, _) => {
            return Err(JoseError::UnsupportedAlgorithm(alg.as_str().to_string()));
        }
    };

    Ok(format!("{signing_input}.{signature}"))
}

/// Verify a compact JWS under the expected algorithm and return its claims.
///
/// A header `alg` that differs from the expected one is a verification
/// failure — tokens never pick their own verification strategy.
pub fn verify(
    compact: &str,
    alg: SignatureAlgorithm,
    verifier: &JwsVerifier,
) -> Result<ClaimsSet, JoseError> {
    let (header, payload_b64, signature_b64, signing_input) = split_compact(compact)?;

    if header.alg != alg.as_str() {
        return Err(JoseError::SignatureMismatch);
    }

    match (alg, verifier) {
        (SignatureAlgorithm::None, JwsVerifier::Unsigned) => {
            if !signature_b64.is_empty() {
                return Err(JoseError::SignatureMismatch);
            }
        }
        (alg, JwsVerifier::Hmac(secret)) if alg.family() == super::KeyFamily::Hmac => {
            let expected = hmac_digest(alg, secret, signing_input.as_bytes())?;
            let presented = b64_decode(signature_b64)?;
            if expected.ct_eq(&presented).unwrap_u8() == 0 {
                return Err(JoseError::SignatureMismatch);
            }
        }
        (SignatureAlgorithm::Es512, JwsVerifier::P521(key)) => {
            let presented = b64_decode(signature_b64)?;
            let sig = p521::ecdsa::Signature::from_slice(&presented)
                .map_err(|_| JoseError::SignatureMismatch)?;
            key.verify(signing_input.as_bytes(), &sig)
                .map_err(|_| JoseError::SignatureMismatch)?;
        }
        (alg, JwsVerifier::Asymmetric(key)) => {
            let jwt_alg = alg
                .to_jsonwebtoken()
                .ok_or_else(|| JoseError::UnsupportedAlgorithm(alg.as_str().to_string()))?;
            match jsonwebtoken::crypto::verify(signature_b64, signing_input.as_bytes(), key, jwt_alg)
            {
                Ok(true) => {}
                Ok(false) => return Err(JoseError::SignatureMismatch),
                Err(_) => return Err(JoseError::SignatureMismatch),
            }
        }
        (alg, _) => {
            return Err(JoseError::UnsupportedAlgorithm(alg.as_str().to_string()));
        }
    }

    parse_claims(payload_b64)
}

/// Header without signature verification (kid/alg discovery).
pub fn decode_header(compact: &str) -> Result<Header, JoseError> {
    let (header, _, _, _) = split_compact(compact)?;
    Ok(header)
}

/// Claims without signature verification. Callers must verify before
/// trusting anything read this way.
pub fn decode_claims_unverified(compact: &str) -> Result<ClaimsSet, JoseError> {
    let (_, payload_b64, _, _) = split_compact(compact)?;
    parse_claims(payload_b64)
}

fn split_compact(compact: &str) -> Result<(Header, &str, &str, String), JoseError> {
    let mut parts = compact.split('.');
    let (header_b64, payload_b64, signature_b64) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(JoseError::Malformed),
        };

    let header_json = b64_decode(header_b64)?;
    let header: Header = serde_json::from_slice(&header_json).map_err(|_| JoseError::Malformed)?;
    let signing_input = format!("{header_b64}.{payload_b64}");
    Ok((header, payload_b64, signature_b64, signing_input))
}

fn parse_claims(payload_b64: &str) -> Result<ClaimsSet, JoseError> {
    let payload = b64_decode(payload_b64)?;
    serde_json::from_slice(&payload).map_err(|_| JoseError::Malformed)
}

fn hmac_digest(
    alg: SignatureAlgorithm,
    secret: &[u8],
    input: &[u8],
) -> Result<Vec<u8>, JoseError> {
    fn digest<D: Mac + hmac::digest::KeyInit>(secret: &[u8], input: &[u8]) -> Result<Vec<u8>, JoseError> {
        let mut mac = <D as Mac>::new_from_slice(secret)
            .map_err(|_| JoseError::InvalidKey("empty HMAC secret".to_string()))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    match alg {
        SignatureAlgorithm::Hs256 => digest::<Hmac<Sha256>>(secret, input),
        SignatureAlgorithm::Hs384 => digest::<Hmac<Sha384>>(secret, input),
        SignatureAlgorithm::Hs512 => digest::<Hmac<Sha512>>(secret, input),
        other => Err(JoseError::UnsupportedAlgorithm(other.as_str().to_string())),
    }
}
