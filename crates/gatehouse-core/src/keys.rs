use std::collections::HashMap;
use std::path::Path;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{DecodingKey, EncodingKey};
use p521::elliptic_curve::sec1::ToEncodedPoint;
use p521::pkcs8::{DecodePrivateKey, DecodePublicKey};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::config::KeyConfig;
use crate::error::{Error, Result};
use crate::jose::jws::{JwsSigner, JwsVerifier};
use crate::jose::{ClaimsSet, JoseError, KeyFamily, KeyManagementAlgorithm, SignatureAlgorithm, jws};

/// JWK parameters for a single public key, varies by family.
#[derive(Clone)]
enum JwkParams {
    Rsa {
        /// Base64url-encoded modulus
        n: String,
        /// Base64url-encoded exponent
        e: String,
    },
    Ec {
        crv: &'static str,
        /// Base64url-encoded x coordinate
        x: String,
        /// Base64url-encoded y coordinate
        y: String,
    },
}

/// A single loaded signing/verification key.
#[derive(Clone)]
pub struct ServerKey {
    pub kid: String,
    pub algorithm: SignatureAlgorithm,
    signer: JwsSigner,
    verifier: JwsVerifier,
    jwk_params: JwkParams,
}

impl std::fmt::Debug for ServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("signer", &"<redacted>")
            .field("verifier", &"<redacted>")
            .finish()
    }
}

impl ServerKey {
    /// Sign a claim set under this key, stamping the key id into the header.
    pub fn sign(&self, claims: &ClaimsSet) -> Result<String> {
        jws::sign(claims, self.algorithm, Some(&self.kid), &self.signer)
            .map_err(|e| Error::Internal(format!("signing failed: {e}")))
    }

    pub fn verifier(&self) -> &JwsVerifier {
        &self.verifier
    }

    fn jwk(&self) -> Value {
        match &self.jwk_params {
            JwkParams::Rsa { n, e } => serde_json::json!({
                "kty": "RSA",
                "use": "sig",
                "alg": self.algorithm.as_str(),
                "kid": self.kid,
                "n": n,
                "e": e,
            }),
            JwkParams::Ec { crv, x, y } => serde_json::json!({
                "kty": "EC",
                "use": "sig",
                "alg": self.algorithm.as_str(),
                "kid": self.kid,
                "crv": crv,
                "x": x,
                "y": y,
            }),
        }
    }
}

/// Multi-key registry supporting rotation and algorithm agility.
///
/// The first key is the active signing key; `signing_key` prefers an exact
/// algorithm match. Explicitly constructed and injected — never a
/// process-wide singleton.
#[derive(Clone)]
pub struct KeyRegistry {
    entries: Vec<ServerKey>,
    kid_index: HashMap<String, usize>,
}

impl KeyRegistry {
    /// Load keys from a list of key configs.
    pub fn from_configs(configs: &[KeyConfig]) -> Result<Self> {
        if configs.is_empty() {
            return Err(Error::Config("at least one signing key is required".to_string()));
        }

        let mut entries = Vec::with_capacity(configs.len());
        let mut kid_index = HashMap::new();

        for (i, kc) in configs.iter().enumerate() {
            let entry = load_key(kc)?;
            if kid_index.contains_key(&entry.kid) {
                return Err(Error::Config(format!(
                    "duplicate kid '{}' — each key must have a unique identifier",
                    entry.kid
                )));
            }
            kid_index.insert(entry.kid.clone(), i);
            entries.push(entry);
        }

        Ok(Self { entries, kid_index })
    }

    /// The active (first-configured) signing key.
    pub fn active(&self) -> &ServerKey {
        &self.entries[0]
    }

    /// Resolve the signing key for an algorithm. Failure here is fatal for
    /// the request: the server advertised an algorithm it cannot honor.
    pub fn signing_key(&self, alg: SignatureAlgorithm) -> Result<&ServerKey> {
        self.entries
            .iter()
            .find(|e| e.algorithm == alg)
            .ok_or_else(|| Error::SigningKeyUnavailable(alg.as_str().to_string()))
    }

    pub fn by_kid(&self, kid: &str) -> Option<&ServerKey> {
        self.kid_index.get(kid).map(|&i| &self.entries[i])
    }

    /// The distinct algorithms configured across all keys.
    pub fn algorithms(&self) -> Vec<String> {
        let mut algs: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.algorithm.as_str().to_string())
            .collect();
        algs.sort();
        algs.dedup();
        algs
    }

    /// JWKS response body containing all public keys.
    pub fn jwks(&self) -> Value {
        let keys: Vec<Value> = self.entries.iter().map(ServerKey::jwk).collect();
        serde_json::json!({ "keys": keys })
    }
}

fn load_key(kc: &KeyConfig) -> Result<ServerKey> {
    let private_pem = std::fs::read(&kc.private_key_path).map_err(|e| {
        Error::Config(format!(
            "cannot read private key {}: {e}",
            kc.private_key_path.display()
        ))
    })?;
    let public_pem = std::fs::read(&kc.public_key_path).map_err(|e| {
        Error::Config(format!(
            "cannot read public key {}: {e}",
            kc.public_key_path.display()
        ))
    })?;

    let kid = kc.kid.clone().unwrap_or_else(|| compute_kid(&public_pem));

    let (signer, verifier, jwk_params) = match kc.algorithm {
        SignatureAlgorithm::Rs256
        | SignatureAlgorithm::Rs384
        | SignatureAlgorithm::Rs512
        | SignatureAlgorithm::Ps256
        | SignatureAlgorithm::Ps384
        | SignatureAlgorithm::Ps512 => {
            let enc = EncodingKey::from_rsa_pem(&private_pem)
                .map_err(|e| Error::Config(format!("invalid RSA private key: {e}")))?;
            let dec = DecodingKey::from_rsa_pem(&public_pem)
                .map_err(|e| Error::Config(format!("invalid RSA public key: {e}")))?;
            let (n, e) = extract_rsa_components(&public_pem)?;
            (
                JwsSigner::Asymmetric(enc),
                JwsVerifier::Asymmetric(dec),
                JwkParams::Rsa { n, e },
            )
        }
        SignatureAlgorithm::Es256 => {
            let enc = EncodingKey::from_ec_pem(&private_pem)
                .map_err(|e| Error::Config(format!("invalid EC private key: {e}")))?;
            let dec = DecodingKey::from_ec_pem(&public_pem)
                .map_err(|e| Error::Config(format!("invalid EC public key: {e}")))?;
            let (x, y) = extract_ec_point(&public_pem, 32)?;
            (
                JwsSigner::Asymmetric(enc),
                JwsVerifier::Asymmetric(dec),
                JwkParams::Ec { crv: "P-256", x, y },
            )
        }
        SignatureAlgorithm::Es384 => {
            let enc = EncodingKey::from_ec_pem(&private_pem)
                .map_err(|e| Error::Config(format!("invalid EC private key: {e}")))?;
            let dec = DecodingKey::from_ec_pem(&public_pem)
                .map_err(|e| Error::Config(format!("invalid EC public key: {e}")))?;
            let (x, y) = extract_ec_point(&public_pem, 48)?;
            (
                JwsSigner::Asymmetric(enc),
                JwsVerifier::Asymmetric(dec),
                JwkParams::Ec { crv: "P-384", x, y },
            )
        }
        SignatureAlgorithm::Es512 => {
            let pem_str = std::str::from_utf8(&private_pem)
                .map_err(|_| Error::Config("private key is not valid UTF-8".to_string()))?;
            let secret = p521::SecretKey::from_pkcs8_pem(pem_str)
                .map_err(|e| Error::Config(format!("invalid P-521 private key: {e}")))?;
            let signing = p521::ecdsa::SigningKey::from_bytes(&secret.to_bytes())
                .map_err(|e| Error::Config(format!("invalid P-521 private key: {e}")))?;
            let pub_str = std::str::from_utf8(&public_pem)
                .map_err(|_| Error::Config("public key is not valid UTF-8".to_string()))?;
            let public = p521::PublicKey::from_public_key_pem(pub_str)
                .map_err(|e| Error::Config(format!("invalid P-521 public key: {e}")))?;
            let verifying = p521::ecdsa::VerifyingKey::from_encoded_point(&public.to_encoded_point(false))
                .map_err(|e| Error::Config(format!("invalid P-521 public key: {e}")))?;

            let point = verifying.to_encoded_point(false);
            let x = URL_SAFE_NO_PAD.encode(point.x().ok_or_else(|| {
                Error::Config("P-521 public key has no x coordinate".to_string())
            })?);
            let y = URL_SAFE_NO_PAD.encode(point.y().ok_or_else(|| {
                Error::Config("P-521 public key has no y coordinate".to_string())
            })?);

            (
                JwsSigner::P521(Box::new(signing)),
                JwsVerifier::P521(verifying),
                JwkParams::Ec { crv: "P-521", x, y },
            )
        }
        other => {
            return Err(Error::Config(format!(
                "{other} keys cannot be configured server-side (symmetric keys are per-client)"
            )));
        }
    };

    Ok(ServerKey {
        kid,
        algorithm: kc.algorithm,
        signer,
        verifier,
        jwk_params,
    })
}

// --- Client key resolution ---

/// Build a verifier for a client-asserted JWT. For HMAC families the key is
/// the client's own secret; for asymmetric families it comes from the
/// client's JWKS — never a server-wide key, so one client cannot forge
/// another's assertion.
pub fn client_verifier(
    alg: SignatureAlgorithm,
    client_secret: Option<&str>,
    jwks: Option<&Value>,
    kid: Option<&str>,
) -> Result<JwsVerifier> {
    match alg.family() {
        KeyFamily::Hmac => {
            let secret = client_secret
                .ok_or_else(|| Error::Crypto(JoseError::InvalidKey("no client secret".into())))?;
            Ok(JwsVerifier::Hmac(secret.as_bytes().to_vec()))
        }
        KeyFamily::None => Ok(JwsVerifier::Unsigned),
        KeyFamily::Rsa | KeyFamily::Ec => {
            let jwks = jwks
                .ok_or_else(|| Error::Crypto(JoseError::InvalidKey("no client JWKS".into())))?;
            let jwk = select_jwk(jwks, alg, kid)
                .ok_or_else(|| Error::Crypto(JoseError::InvalidKey("no matching JWK".into())))?;
            verifier_from_jwk(jwk, alg)
        }
    }
}

/// Pick the JWK matching the requested algorithm (and kid, when present).
pub fn select_jwk<'a>(
    jwks: &'a Value,
    alg: SignatureAlgorithm,
    kid: Option<&str>,
) -> Option<&'a Value> {
    let keys = jwks.get("keys")?.as_array()?;
    let kty = match alg.family() {
        KeyFamily::Rsa => "RSA",
        KeyFamily::Ec => "EC",
        _ => return None,
    };

    if let Some(kid) = kid {
        if let Some(jwk) = keys
            .iter()
            .find(|k| k["kid"].as_str() == Some(kid) && k["kty"].as_str() == Some(kty))
        {
            return Some(jwk);
        }
    }

    keys.iter().find(|k| {
        k["kty"].as_str() == Some(kty)
            && k["alg"].as_str().map_or(true, |a| a == alg.as_str())
            && k["use"].as_str().map_or(true, |u| u == "sig")
    })
}

/// Build a verifier from a single JWK.
pub fn verifier_from_jwk(jwk: &Value, alg: SignatureAlgorithm) -> Result<JwsVerifier> {
    let invalid = |msg: &str| Error::Crypto(JoseError::InvalidKey(msg.to_string()));

    match alg.family() {
        KeyFamily::Rsa => {
            let n = jwk["n"].as_str().ok_or_else(|| invalid("JWK missing n"))?;
            let e = jwk["e"].as_str().ok_or_else(|| invalid("JWK missing e"))?;
            let dec = DecodingKey::from_rsa_components(n, e)
                .map_err(|_| invalid("bad RSA JWK components"))?;
            Ok(JwsVerifier::Asymmetric(dec))
        }
        KeyFamily::Ec => {
            let x = jwk["x"].as_str().ok_or_else(|| invalid("JWK missing x"))?;
            let y = jwk["y"].as_str().ok_or_else(|| invalid("JWK missing y"))?;
            if alg == SignatureAlgorithm::Es512 {
                let x = URL_SAFE_NO_PAD.decode(x).map_err(|_| invalid("bad x"))?;
                let y = URL_SAFE_NO_PAD.decode(y).map_err(|_| invalid("bad y"))?;
                let mut sec1 = Vec::with_capacity(1 + x.len() + y.len());
                sec1.push(0x04);
                sec1.extend_from_slice(&x);
                sec1.extend_from_slice(&y);
                let verifying = p521::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                    .map_err(|_| invalid("bad P-521 point"))?;
                Ok(JwsVerifier::P521(verifying))
            } else {
                let dec = DecodingKey::from_ec_components(x, y)
                    .map_err(|_| invalid("bad EC JWK components"))?;
                Ok(JwsVerifier::Asymmetric(dec))
            }
        }
        KeyFamily::Hmac => {
            let k = jwk["k"].as_str().ok_or_else(|| invalid("JWK missing k"))?;
            let secret = URL_SAFE_NO_PAD.decode(k).map_err(|_| invalid("bad k"))?;
            Ok(JwsVerifier::Hmac(secret))
        }
        KeyFamily::None => Ok(JwsVerifier::Unsigned),
    }
}

/// RSA public encryption key from a client JWK document (used for ID Token
/// and UserInfo JWEs addressed to the client).
pub fn rsa_encryption_key_from_jwks(jwks: &Value) -> Result<rsa::RsaPublicKey> {
    let invalid = |msg: &str| Error::Crypto(JoseError::InvalidKey(msg.to_string()));
    let keys = jwks
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("JWKS has no keys"))?;

    let jwk = keys
        .iter()
        .find(|k| {
            k["kty"].as_str() == Some("RSA")
                && k["use"].as_str().map_or(true, |u| u == "enc")
        })
        .ok_or_else(|| invalid("no RSA encryption key in JWKS"))?;

    let n = URL_SAFE_NO_PAD
        .decode(jwk["n"].as_str().ok_or_else(|| invalid("JWK missing n"))?)
        .map_err(|_| invalid("bad n"))?;
    let e = URL_SAFE_NO_PAD
        .decode(jwk["e"].as_str().ok_or_else(|| invalid("JWK missing e"))?)
        .map_err(|_| invalid("bad e"))?;

    rsa::RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(&n),
        rsa::BigUint::from_bytes_be(&e),
    )
    .map_err(|_| invalid("bad RSA modulus/exponent"))
}

/// Symmetric wrapping key for A128KW/A256KW, derived from the client secret
/// (SHA-256, truncated to the wrap size). Per-client by construction.
pub fn wrap_key_from_secret(secret: &str, alg: KeyManagementAlgorithm) -> Result<Vec<u8>> {
    let len = alg
        .wrap_key_len()
        .ok_or_else(|| Error::Crypto(JoseError::UnsupportedAlgorithm(alg.as_str().to_string())))?;
    let digest = Sha256::digest(secret.as_bytes());
    Ok(digest[..len].to_vec())
}

/// Fetch a JWKS document with the registry's bounded-timeout HTTP client.
/// Transient failures are retried once before surfacing `server_error`.
pub async fn fetch_jwks(http: &reqwest::Client, uri: &str) -> Result<Value> {
    match fetch_jwks_once(http, uri).await {
        Ok(jwks) => Ok(jwks),
        Err(err) => {
            tracing::debug!(%uri, error = %err, "jwks fetch failed, retrying once");
            fetch_jwks_once(http, uri).await
        }
    }
}

async fn fetch_jwks_once(http: &reqwest::Client, uri: &str) -> Result<Value> {
    let resp = http
        .get(uri)
        .send()
        .await
        .map_err(|e| Error::UpstreamFetch(format!("jwks fetch failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(Error::UpstreamFetch(format!(
            "jwks fetch returned HTTP {}",
            resp.status()
        )));
    }

    resp.json()
        .await
        .map_err(|e| Error::UpstreamFetch(format!("jwks parse failed: {e}")))
}

/// Left-half token hash used for `at_hash`/`c_hash` ID Token claims: the
/// left-most half of the digest matching the signing algorithm's bit size.
pub fn token_hash(alg: SignatureAlgorithm, value: &str) -> Option<String> {
    let digest: Vec<u8> = match alg {
        SignatureAlgorithm::Hs256
        | SignatureAlgorithm::Rs256
        | SignatureAlgorithm::Ps256
        | SignatureAlgorithm::Es256 => Sha256::digest(value.as_bytes()).to_vec(),
        SignatureAlgorithm::Hs384
        | SignatureAlgorithm::Rs384
        | SignatureAlgorithm::Ps384
        | SignatureAlgorithm::Es384 => Sha384::digest(value.as_bytes()).to_vec(),
        SignatureAlgorithm::Hs512
        | SignatureAlgorithm::Rs512
        | SignatureAlgorithm::Ps512
        | SignatureAlgorithm::Es512 => Sha512::digest(value.as_bytes()).to_vec(),
        SignatureAlgorithm::None => return None,
    };
    Some(URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2]))
}

/// Generate a keypair for the given algorithm and write PEM files.
pub fn generate_keypair(
    output_dir: &Path,
    algorithm: SignatureAlgorithm,
    key_size: Option<u32>,
) -> Result<()> {
    use std::process::Command;

    let private_path = output_dir.join("private.pem");
    let public_path = output_dir.join("public.pem");

    match algorithm.family() {
        KeyFamily::Rsa => {
            let size = key_size.unwrap_or(4096).to_string();
            let status = Command::new("openssl")
                .args(["genrsa", "-out"])
                .arg(&private_path)
                .arg(&size)
                .status()
                .map_err(|e| Error::Config(format!("failed to run openssl: {e}")))?;
            if !status.success() {
                return Err(Error::Config("openssl genrsa failed".to_string()));
            }

            let status = Command::new("openssl")
                .args(["rsa", "-in"])
                .arg(&private_path)
                .args(["-pubout", "-out"])
                .arg(&public_path)
                .status()
                .map_err(|e| Error::Config(format!("failed to run openssl: {e}")))?;
            if !status.success() {
                return Err(Error::Config("openssl rsa -pubout failed".to_string()));
            }
        }
        KeyFamily::Ec => {
            if key_size.is_some() {
                tracing::warn!("--key-size is ignored for EC keys (curve fixes the size)");
            }
            let curve = match algorithm {
                SignatureAlgorithm::Es256 => "P-256",
                SignatureAlgorithm::Es384 => "P-384",
                SignatureAlgorithm::Es512 => "P-521",
                _ => unreachable!(),
            };
            // genpkey produces PKCS#8, which both key loaders accept
            let status = Command::new("openssl")
                .args(["genpkey", "-algorithm", "EC", "-pkeyopt"])
                .arg(format!("ec_paramgen_curve:{curve}"))
                .args(["-out"])
                .arg(&private_path)
                .status()
                .map_err(|e| Error::Config(format!("failed to run openssl: {e}")))?;
            if !status.success() {
                return Err(Error::Config(format!("openssl genpkey ({curve}) failed")));
            }

            let status = Command::new("openssl")
                .args(["pkey", "-in"])
                .arg(&private_path)
                .args(["-pubout", "-out"])
                .arg(&public_path)
                .status()
                .map_err(|e| Error::Config(format!("failed to run openssl: {e}")))?;
            if !status.success() {
                return Err(Error::Config("openssl pkey -pubout failed".to_string()));
            }
        }
        KeyFamily::Hmac | KeyFamily::None => {
            return Err(Error::Config(format!(
                "cannot generate key files for {algorithm}"
            )));
        }
    }

    tracing::info!(
        algorithm = %algorithm,
        private = %private_path.display(),
        public = %public_path.display(),
        "generated signing keypair"
    );
    Ok(())
}

// --- Internal helpers ---

/// Extract RSA modulus (n) and exponent (e) from a PEM public key.
fn extract_rsa_components(public_pem: &[u8]) -> Result<(String, String)> {
    let der = pem_to_der(public_pem)?;
    let (n_bytes, e_bytes) = parse_rsa_public_key_der(&der)
        .ok_or_else(|| Error::Config("failed to parse RSA public key DER".to_string()))?;

    Ok((
        URL_SAFE_NO_PAD.encode(n_bytes),
        URL_SAFE_NO_PAD.encode(e_bytes),
    ))
}

/// Extract the EC point (x, y) from a PEM public key.
/// `coord_len` is the per-coordinate byte length (32 for P-256, 48 for P-384).
fn extract_ec_point(public_pem: &[u8], coord_len: usize) -> Result<(String, String)> {
    let der = pem_to_der(public_pem)?;

    // SubjectPublicKeyInfo: SEQUENCE { AlgorithmIdentifier, BIT STRING }
    let (_, inner) = parse_sequence(&der)
        .ok_or_else(|| Error::Config("invalid EC public key DER".to_string()))?;
    let (rest, _alg_id) = parse_tlv(inner)
        .ok_or_else(|| Error::Config("invalid EC public key DER: missing algorithm".to_string()))?;
    let (_, bit_string) = parse_tlv(rest)
        .ok_or_else(|| Error::Config("invalid EC public key DER: missing bit string".to_string()))?;

    if bit_string.is_empty() {
        return Err(Error::Config("empty EC public key bit string".to_string()));
    }
    // Skip unused-bits byte (should be 0x00)
    let point = &bit_string[1..];

    // Uncompressed point format: 0x04 || x || y
    let expected = 1 + 2 * coord_len;
    if point.len() != expected || point[0] != 0x04 {
        return Err(Error::Config(format!(
            "expected uncompressed EC point ({expected} bytes starting with 0x04), got {} bytes",
            point.len(),
        )));
    }

    let x = URL_SAFE_NO_PAD.encode(&point[1..1 + coord_len]);
    let y = URL_SAFE_NO_PAD.encode(&point[1 + coord_len..]);
    Ok((x, y))
}

fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>> {
    let pem_str = std::str::from_utf8(pem)
        .map_err(|_| Error::Config("public key is not valid UTF-8".to_string()))?;
    let b64: String = pem_str
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();

    use base64::engine::general_purpose::STANDARD;
    STANDARD
        .decode(&b64)
        .map_err(|e| Error::Config(format!("invalid PEM base64: {e}")))
}

/// Minimal ASN.1 DER parser for RSA public keys.
fn parse_rsa_public_key_der(der: &[u8]) -> Option<(&[u8], &[u8])> {
    let (_, inner) = parse_sequence(der)?;
    let (rest, _alg_id) = parse_tlv(inner)?;
    let (_, bit_string_content) = parse_tlv(rest)?;
    if bit_string_content.is_empty() {
        return None;
    }
    let rsa_pub_key_der = &bit_string_content[1..];
    let (_, rsa_inner) = parse_sequence(rsa_pub_key_der)?;
    let (rest, n_bytes) = parse_integer(rsa_inner)?;
    let (_, e_bytes) = parse_integer(rest)?;
    Some((n_bytes, e_bytes))
}

fn parse_sequence(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if data.first()? != &0x30 {
        return None;
    }
    parse_tlv(data)
}

fn parse_integer(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if data.first()? != &0x02 {
        return None;
    }
    let (rest, content) = parse_tlv(data)?;
    let content = if content.first() == Some(&0x00) && content.len() > 1 {
        &content[1..]
    } else {
        content
    };
    Some((rest, content))
}

fn parse_tlv(data: &[u8]) -> Option<(&[u8], &[u8])> {
    if data.len() < 2 {
        return None;
    }
    let _tag = data[0];
    let (len, header_size) = parse_der_length(&data[1..])?;
    let total_header = 1 + header_size;
    let content = data.get(total_header..total_header + len)?;
    let rest = data.get(total_header + len..)?;
    Some((rest, content))
}

fn parse_der_length(data: &[u8]) -> Option<(usize, usize)> {
    let first = *data.first()?;
    if first < 0x80 {
        Some((first as usize, 1))
    } else {
        let num_bytes = (first & 0x7f) as usize;
        if num_bytes > 4 || data.len() < 1 + num_bytes {
            return None;
        }
        let mut len = 0usize;
        for &b in &data[1..1 + num_bytes] {
            len = (len << 8) | b as usize;
        }
        Some((len, 1 + num_bytes))
    }
}

fn compute_kid(public_pem: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_pem);
    let hash = hasher.finalize();
    // First 8 bytes as kid (16 hex chars)
    hex::encode(&hash[..8])
}
