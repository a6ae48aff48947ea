//! Compact JWE encryption and decryption (RFC 7516).
//!
//! Key management: RSA1_5, RSA-OAEP, A128KW, A256KW.
//! Content encryption: A128GCM, A256GCM, A128CBC-HS256, A256CBC-HS512.
//!
//! The CBC composites follow RFC 7518 §5.2: the CEK is MAC key || ENC key,
//! AL is the 64-bit big-endian bit count of the AAD, and the tag is the
//! left half of HMAC(mac_key, aad || iv || ciphertext || AL).

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use aes_kw::{KekAes128, KekAes256};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{
    ClaimsSet, ContentEncryptionAlgorithm, Header, JoseError, KeyManagementAlgorithm, b64,
    b64_decode,
};

/// Recipient key for encryption.
pub enum JweEncryptionKey {
    Rsa(RsaPublicKey),
    /// Wrapping key for A128KW/A256KW (16 or 32 bytes).
    Symmetric(Vec<u8>),
}

/// Recipient key for decryption.
pub enum JweDecryptionKey {
    Rsa(RsaPrivateKey),
    Symmetric(Vec<u8>),
}

pub fn encrypt_claims(
    claims: &ClaimsSet,
    alg: KeyManagementAlgorithm,
    enc: ContentEncryptionAlgorithm,
    key: &JweEncryptionKey,
    kid: Option<&str>,
) -> Result<String, JoseError> {
    encrypt(&claims.to_json_bytes(), alg, enc, key, kid, None)
}

pub fn decrypt_claims(compact: &str, key: &JweDecryptionKey) -> Result<ClaimsSet, JoseError> {
    let plaintext = decrypt(compact, key)?;
    serde_json::from_slice(&plaintext).map_err(|_| JoseError::Malformed)
}

pub fn encrypt(
    payload: &[u8],
    alg: KeyManagementAlgorithm,
    enc: ContentEncryptionAlgorithm,
    key: &JweEncryptionKey,
    kid: Option<&str>,
    cty: Option<&str>,
) -> Result<String, JoseError> {
    let header = Header {
        alg: alg.as_str().to_string(),
        enc: Some(enc.as_str().to_string()),
        kid: kid.map(String::from),
        typ: Some("JWT".to_string()),
        cty: cty.map(String::from),
    };
    let header_b64 = b64(&serde_json::to_vec(&header).map_err(|_| JoseError::Malformed)?);

    let mut rng = rand::thread_rng();
    let mut cek = Zeroizing::new(vec![0u8; enc.cek_len()]);
    rng.fill_bytes(&mut cek);
    let mut iv = vec![0u8; enc.iv_len()];
    rng.fill_bytes(&mut iv);

    let encrypted_key = wrap_cek(alg, key, &cek)?;

    // The AAD is the ASCII bytes of the base64url-encoded protected header.
    let aad = header_b64.as_bytes();
    let (ciphertext, tag) = content_encrypt(enc, &cek, &iv, aad, payload)?;

    Ok(format!(
        "{header_b64}.{}.{}.{}.{}",
        b64(&encrypted_key),
        b64(&iv),
        b64(&ciphertext),
        b64(&tag)
    ))
}

pub fn decrypt(compact: &str, key: &JweDecryptionKey) -> Result<Vec<u8>, JoseError> {
    let mut parts = compact.split('.');
    let (header_b64, ek_b64, iv_b64, ct_b64, tag_b64) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(h), Some(k), Some(i), Some(c), Some(t), None) => (h, k, i, c, t),
        _ => return Err(JoseError::Malformed),
    };

    let header: Header = serde_json::from_slice(&b64_decode(header_b64)?)
        .map_err(|_| JoseError::Malformed)?;
    let alg: KeyManagementAlgorithm = header.alg.parse()?;
    let enc: ContentEncryptionAlgorithm = header
        .enc
        .as_deref()
        .ok_or(JoseError::Malformed)?
        .parse()?;

    let encrypted_key = b64_decode(ek_b64)?;
    let iv = b64_decode(iv_b64)?;
    let ciphertext = b64_decode(ct_b64)?;
    let tag = b64_decode(tag_b64)?;

    let cek = unwrap_cek(alg, key, &encrypted_key)?;
    if cek.len() != enc.cek_len() || iv.len() != enc.iv_len() {
        return Err(JoseError::DecryptionFailed);
    }

    content_decrypt(enc, &cek, &iv, header_b64.as_bytes(), &ciphertext, &tag)
}

// --- CEK wrapping ---

fn wrap_cek(
    alg: KeyManagementAlgorithm,
    key: &JweEncryptionKey,
    cek: &[u8],
) -> Result<Vec<u8>, JoseError> {
    let mut rng = rand::thread_rng();
    match (alg, key) {
        (KeyManagementAlgorithm::Rsa1_5, JweEncryptionKey::Rsa(public)) => public
            .encrypt(&mut rng, Pkcs1v15Encrypt, cek)
            .map_err(|e| JoseError::InvalidKey(e.to_string())),
        (KeyManagementAlgorithm::RsaOaep, JweEncryptionKey::Rsa(public)) => public
            .encrypt(&mut rng, Oaep::new::<Sha1>(), cek)
            .map_err(|e| JoseError::InvalidKey(e.to_string())),
        (KeyManagementAlgorithm::A128Kw, JweEncryptionKey::Symmetric(kw))
        | (KeyManagementAlgorithm::A256Kw, JweEncryptionKey::Symmetric(kw)) => {
            aes_key_wrap(alg, kw, cek)
        }
        _ => Err(JoseError::InvalidKey(format!(
            "key material does not fit {alg}"
        ))),
    }
}

fn unwrap_cek(
    alg: KeyManagementAlgorithm,
    key: &JweDecryptionKey,
    encrypted_key: &[u8],
) -> Result<Zeroizing<Vec<u8>>, JoseError> {
    match (alg, key) {
        (KeyManagementAlgorithm::Rsa1_5, JweDecryptionKey::Rsa(private)) => private
            .decrypt(Pkcs1v15Encrypt, encrypted_key)
            .map(Zeroizing::new)
            .map_err(|_| JoseError::DecryptionFailed),
        (KeyManagementAlgorithm::RsaOaep, JweDecryptionKey::Rsa(private)) => private
            .decrypt(Oaep::new::<Sha1>(), encrypted_key)
            .map(Zeroizing::new)
            .map_err(|_| JoseError::DecryptionFailed),
        (KeyManagementAlgorithm::A128Kw, JweDecryptionKey::Symmetric(kw))
        | (KeyManagementAlgorithm::A256Kw, JweDecryptionKey::Symmetric(kw)) => {
            aes_key_unwrap(alg, kw, encrypted_key)
        }
        _ => Err(JoseError::InvalidKey(format!(
            "key material does not fit {alg}"
        ))),
    }
}

fn check_wrap_key(alg: KeyManagementAlgorithm, kw: &[u8]) -> Result<usize, JoseError> {
    let key_len = alg.wrap_key_len().ok_or_else(|| {
        JoseError::UnsupportedAlgorithm(alg.as_str().to_string())
    })?;
    if kw.len() != key_len {
        return Err(JoseError::InvalidKey(format!(
            "wrapping key for {alg} must be {key_len} bytes"
        )));
    }
    Ok(key_len)
}

fn aes_key_wrap(
    alg: KeyManagementAlgorithm,
    kw: &[u8],
    cek: &[u8],
) -> Result<Vec<u8>, JoseError> {
    let key_len = check_wrap_key(alg, kw)?;
    let mut out = vec![0u8; cek.len() + 8];
    let wrap_failed = |_| JoseError::InvalidKey("AES-KW wrap failed".to_string());
    if key_len == 16 {
        let key = aes::cipher::Key::<aes::Aes128>::clone_from_slice(kw);
        KekAes128::from(key).wrap(cek, &mut out).map_err(wrap_failed)?;
    } else {
        let key = aes::cipher::Key::<aes::Aes256>::clone_from_slice(kw);
        KekAes256::from(key).wrap(cek, &mut out).map_err(wrap_failed)?;
    }
    Ok(out)
}

fn aes_key_unwrap(
    alg: KeyManagementAlgorithm,
    kw: &[u8],
    wrapped: &[u8],
) -> Result<Zeroizing<Vec<u8>>, JoseError> {
    let key_len = check_wrap_key(alg, kw)?;
    if wrapped.len() < 16 {
        return Err(JoseError::DecryptionFailed);
    }
    let mut out = Zeroizing::new(vec![0u8; wrapped.len() - 8]);
    if key_len == 16 {
        let key = aes::cipher::Key::<aes::Aes128>::clone_from_slice(kw);
        KekAes128::from(key)
            .unwrap(wrapped, &mut out)
            .map_err(|_| JoseError::DecryptionFailed)?;
    } else {
        let key = aes::cipher::Key::<aes::Aes256>::clone_from_slice(kw);
        KekAes256::from(key)
            .unwrap(wrapped, &mut out)
            .map_err(|_| JoseError::DecryptionFailed)?;
    }
    Ok(out)
}

// --- Content encryption ---

fn content_encrypt(
    enc: ContentEncryptionAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), JoseError> {
    match enc {
        ContentEncryptionAlgorithm::A128Gcm => gcm_encrypt::<Aes128Gcm>(cek, iv, aad, plaintext),
        ContentEncryptionAlgorithm::A256Gcm => gcm_encrypt::<Aes256Gcm>(cek, iv, aad, plaintext),
        ContentEncryptionAlgorithm::A128CbcHs256 => {
            cbc_hmac_encrypt(cek, iv, aad, plaintext, CbcParams::Hs256)
        }
        ContentEncryptionAlgorithm::A256CbcHs512 => {
            cbc_hmac_encrypt(cek, iv, aad, plaintext, CbcParams::Hs512)
        }
    }
}

fn content_decrypt(
    enc: ContentEncryptionAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, JoseError> {
    match enc {
        ContentEncryptionAlgorithm::A128Gcm => gcm_decrypt::<Aes128Gcm>(cek, iv, aad, ciphertext, tag),
        ContentEncryptionAlgorithm::A256Gcm => gcm_decrypt::<Aes256Gcm>(cek, iv, aad, ciphertext, tag),
        ContentEncryptionAlgorithm::A128CbcHs256 => {
            cbc_hmac_decrypt(cek, iv, aad, ciphertext, tag, CbcParams::Hs256)
        }
        ContentEncryptionAlgorithm::A256CbcHs512 => {
            cbc_hmac_decrypt(cek, iv, aad, ciphertext, tag, CbcParams::Hs512)
        }
    }
}

fn gcm_encrypt<A>(
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), JoseError>
where
    A: Aead + KeyInit,
{
    let cipher = A::new_from_slice(cek).map_err(|_| JoseError::InvalidKey("bad CEK".to_string()))?;
    let nonce = aes_gcm::aead::generic_array::GenericArray::from_slice(iv);
    let mut combined = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| JoseError::InvalidKey("GCM encryption failed".to_string()))?;
    // aes-gcm appends the 16-byte tag to the ciphertext
    let tag = combined.split_off(combined.len() - 16);
    Ok((combined, tag))
}

fn gcm_decrypt<A>(
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, JoseError>
where
    A: Aead + KeyInit,
{
    let cipher = A::new_from_slice(cek).map_err(|_| JoseError::InvalidKey("bad CEK".to_string()))?;
    let nonce = aes_gcm::aead::generic_array::GenericArray::from_slice(iv);
    let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    cipher
        .decrypt(nonce, Payload { msg: &combined, aad })
        .map_err(|_| JoseError::DecryptionFailed)
}

#[derive(Clone, Copy)]
enum CbcParams {
    /// A128CBC-HS256: 16-byte halves, HMAC-SHA-256
    Hs256,
    /// A256CBC-HS512: 32-byte halves, HMAC-SHA-512
    Hs512,
}

impl CbcParams {
    fn half_len(self) -> usize {
        match self {
            Self::Hs256 => 16,
            Self::Hs512 => 32,
        }
    }

    fn mac(self, mac_key: &[u8], aad: &[u8], iv: &[u8], ciphertext: &[u8]) -> Vec<u8> {
        let al = ((aad.len() as u64) * 8).to_be_bytes();
        match self {
            Self::Hs256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
                    .expect("HMAC accepts any key length");
                mac.update(aad);
                mac.update(iv);
                mac.update(ciphertext);
                mac.update(&al);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Hs512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(mac_key)
                    .expect("HMAC accepts any key length");
                mac.update(aad);
                mac.update(iv);
                mac.update(ciphertext);
                mac.update(&al);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }
}

fn cbc_hmac_encrypt(
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
    params: CbcParams,
) -> Result<(Vec<u8>, Vec<u8>), JoseError> {
    let half = params.half_len();
    let (mac_key, enc_key) = cek.split_at(half);

    let ciphertext = match params {
        CbcParams::Hs256 => cbc::Encryptor::<aes::Aes128>::new_from_slices(enc_key, iv)
            .map_err(|_| JoseError::InvalidKey("bad CEK".to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        CbcParams::Hs512 => cbc::Encryptor::<aes::Aes256>::new_from_slices(enc_key, iv)
            .map_err(|_| JoseError::InvalidKey("bad CEK".to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };

    let full_mac = params.mac(mac_key, aad, iv, &ciphertext);
    let tag = full_mac[..half].to_vec();
    Ok((ciphertext, tag))
}

fn cbc_hmac_decrypt(
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    params: CbcParams,
) -> Result<Vec<u8>, JoseError> {
    let half = params.half_len();
    let (mac_key, enc_key) = cek.split_at(half);

    // Authenticate before decrypting; the comparison is constant time.
    let full_mac = params.mac(mac_key, aad, iv, ciphertext);
    let expected = &full_mac[..half];
    if tag.len() != half || expected.ct_eq(tag).unwrap_u8() == 0 {
        return Err(JoseError::DecryptionFailed);
    }

    let plaintext = match params {
        CbcParams::Hs256 => cbc::Decryptor::<aes::Aes128>::new_from_slices(enc_key, iv)
            .map_err(|_| JoseError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| JoseError::DecryptionFailed)?,
        CbcParams::Hs512 => cbc::Decryptor::<aes::Aes256>::new_from_slices(enc_key, iv)
            .map_err(|_| JoseError::DecryptionFailed)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| JoseError::DecryptionFailed)?,
    };
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    const KEY_ALGS_RSA: [KeyManagementAlgorithm; 2] = [
        KeyManagementAlgorithm::Rsa1_5,
        KeyManagementAlgorithm::RsaOaep,
    ];
    const ENC_ALGS: [ContentEncryptionAlgorithm; 4] = [
        ContentEncryptionAlgorithm::A128Gcm,
        ContentEncryptionAlgorithm::A256Gcm,
        ContentEncryptionAlgorithm::A128CbcHs256,
        ContentEncryptionAlgorithm::A256CbcHs512,
    ];

    fn sample_claims() -> ClaimsSet {
        ClaimsSet::new()
            .issuer("https://op.example.org")
            .subject("user-9")
            .audience("client-9")
            .claim("email", "user9@example.com")
    }

    #[test]
    fn rsa_matrix_round_trips() {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);

        for alg in KEY_ALGS_RSA {
            for enc in ENC_ALGS {
                let compact = encrypt_claims(
                    &sample_claims(),
                    alg,
                    enc,
                    &JweEncryptionKey::Rsa(public.clone()),
                    Some("enc-key"),
                )
                .unwrap();
                assert_eq!(compact.split('.').count(), 5, "{alg}/{enc}");

                let claims =
                    decrypt_claims(&compact, &JweDecryptionKey::Rsa(private.clone())).unwrap();
                assert_eq!(claims, sample_claims(), "{alg}/{enc}");
            }
        }
    }

    #[test]
    fn symmetric_matrix_round_trips() {
        for (alg, key_len) in [
            (KeyManagementAlgorithm::A128Kw, 16usize),
            (KeyManagementAlgorithm::A256Kw, 32usize),
        ] {
            let mut kw = vec![0u8; key_len];
            rand::thread_rng().fill_bytes(&mut kw);

            for enc in ENC_ALGS {
                let compact = encrypt_claims(
                    &sample_claims(),
                    alg,
                    enc,
                    &JweEncryptionKey::Symmetric(kw.clone()),
                    None,
                )
                .unwrap();

                let claims =
                    decrypt_claims(&compact, &JweDecryptionKey::Symmetric(kw.clone())).unwrap();
                assert_eq!(claims, sample_claims(), "{alg}/{enc}");
            }
        }
    }

    #[test]
    fn wrong_rsa_key_fails_as_decryption_error() {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);
        let other = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();

        let compact = encrypt_claims(
            &sample_claims(),
            KeyManagementAlgorithm::RsaOaep,
            ContentEncryptionAlgorithm::A256Gcm,
            &JweEncryptionKey::Rsa(public),
            None,
        )
        .unwrap();

        assert_eq!(
            decrypt_claims(&compact, &JweDecryptionKey::Rsa(other)).unwrap_err(),
            JoseError::DecryptionFailed
        );
    }

    #[test]
    fn wrong_symmetric_key_fails() {
        let kw = vec![1u8; 16];
        let compact = encrypt_claims(
            &sample_claims(),
            KeyManagementAlgorithm::A128Kw,
            ContentEncryptionAlgorithm::A128CbcHs256,
            &JweEncryptionKey::Symmetric(kw),
            None,
        )
        .unwrap();

        assert_eq!(
            decrypt_claims(&compact, &JweDecryptionKey::Symmetric(vec![2u8; 16])).unwrap_err(),
            JoseError::DecryptionFailed
        );
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let kw = vec![7u8; 32];
        let compact = encrypt_claims(
            &sample_claims(),
            KeyManagementAlgorithm::A256Kw,
            ContentEncryptionAlgorithm::A256CbcHs512,
            &JweEncryptionKey::Symmetric(kw.clone()),
            None,
        )
        .unwrap();

        let mut parts: Vec<String> = compact.split('.').map(String::from).collect();
        let mut ct = b64_decode(&parts[3]).unwrap();
        ct[0] ^= 0x01;
        parts[3] = b64(&ct);
        let tampered = parts.join(".");

        assert_eq!(
            decrypt_claims(&tampered, &JweDecryptionKey::Symmetric(kw)).unwrap_err(),
            JoseError::DecryptionFailed
        );
    }

    #[test]
    fn wrong_key_size_for_kw_is_invalid_key() {
        let err = encrypt_claims(
            &sample_claims(),
            KeyManagementAlgorithm::A256Kw,
            ContentEncryptionAlgorithm::A128Gcm,
            &JweEncryptionKey::Symmetric(vec![0u8; 16]),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, JoseError::InvalidKey(_)));
    }

    #[test]
    fn malformed_compact_form_rejected() {
        let kw = vec![0u8; 16];
        assert_eq!(
            decrypt("a.b.c", &JweDecryptionKey::Symmetric(kw)).unwrap_err(),
            JoseError::Malformed
        );
    }
}
