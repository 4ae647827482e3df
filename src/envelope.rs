//! Encrypted query envelope.
//!
//! Request parameters are form-urlencoded, encrypted with RSA-OAEP (SHA-256)
//! under the server's public key and sent as one base64url `query` value.
//! Only the query direction is encrypted; responses travel in the clear.
//!
//! Plaintext is limited by OAEP to `k - 66` bytes, 190 for a 2048-bit key.

use crate::error::{Result, SyncError};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;
use url::form_urlencoded;

/// Name of the request parameter carrying the sealed query.
pub const QUERY_PARAM: &str = "query";

/// Default modulus size for generated keys.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Client side: seals parameters under the server's public key.
#[derive(Clone)]
pub struct QueryEncryptor {
    key: RsaPublicKey,
}

impl QueryEncryptor {
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Ok(Self::new(load_public_key(path)?))
    }

    /// Encode, encrypt and base64url-encode a parameter list.
    pub fn seal(&self, params: &[(&str, &str)]) -> Result<String> {
        let plaintext = encode_form(params);
        let encrypted = self
            .key
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), plaintext.as_bytes())
            .map_err(|e| SyncError::Key(format!("failed to encrypt query: {}", e)))?;
        Ok(URL_SAFE.encode(encrypted))
    }
}

/// Server side: opens sealed queries with the private key.
#[derive(Clone)]
pub struct QueryDecryptor {
    key: RsaPrivateKey,
}

impl QueryDecryptor {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Ok(Self::new(load_private_key(path)?))
    }

    /// Reverse of [`QueryEncryptor::seal`]. Any failure is a `Decrypt` error.
    pub fn open(&self, encoded: &str) -> Result<HashMap<String, String>> {
        let encrypted = URL_SAFE
            .decode(encoded)
            .map_err(|e| SyncError::Decrypt(format!("invalid base64: {}", e)))?;
        let decrypted = self
            .key
            .decrypt(Oaep::new::<Sha256>(), &encrypted)
            .map_err(|e| SyncError::Decrypt(e.to_string()))?;
        let plaintext = String::from_utf8(decrypted)
            .map_err(|e| SyncError::Decrypt(format!("invalid utf-8: {}", e)))?;
        Ok(parse_form(&plaintext))
    }
}

/// `application/x-www-form-urlencoded` serialization.
pub fn encode_form(params: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

/// Parse a urlencoded form. The first value wins for a repeated key.
pub fn parse_form(s: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (k, v) in form_urlencoded::parse(s.as_bytes()) {
        out.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    out
}

/// Load a PEM private key (PKCS#1, falling back to PKCS#8).
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Key(format!("cannot read {}: {}", path.display(), e)))?;
    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| SyncError::Key(format!("invalid private key {}: {}", path.display(), e)))
}

/// Load a PEM public key (PKCS#1, falling back to SPKI).
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Key(format!("cannot read {}: {}", path.display(), e)))?;
    RsaPublicKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(&pem))
        .map_err(|e| SyncError::Key(format!("invalid public key {}: {}", path.display(), e)))
}

/// Generate a key pair and return `(private_pem, public_pem)`, both PKCS#1.
pub fn generate_key_pair(bits: usize) -> Result<(String, String)> {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|e| SyncError::Key(format!("key generation failed: {}", e)))?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| SyncError::Key(e.to_string()))?
        .as_str()
        .to_owned();
    let public_pem = public
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| SyncError::Key(e.to_string()))?;

    Ok((private_pem, public_pem))
}
