//! Password sealing for the on-disk secrets table.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result, anyhow, ensure};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// AES-256-GCM ciphertext keyed by an Argon2 hash of the password. A fresh
/// salt and nonce are drawn on every seal.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Sealed {
    pub schema_version: u32,
    #[serde(with = "b64")]
    salt: Vec<u8>,
    #[serde(with = "b64")]
    nonce: Vec<u8>,
    #[serde(with = "b64")]
    ciphertext: Vec<u8>,
}

impl Sealed {
    pub fn seal(schema_version: u32, password: &str, plaintext: &[u8]) -> Result<Self> {
        let mut salt = vec![0u8; SALT_LEN];
        let mut nonce = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher_for(password, &salt)?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|err| anyhow!("failed to seal secrets: {err}"))?;
        Ok(Self {
            schema_version,
            salt,
            nonce,
            ciphertext,
        })
    }

    pub fn open(&self, password: &str) -> Result<Vec<u8>> {
        ensure!(self.nonce.len() == NONCE_LEN, "sealed secrets have a bad nonce");
        cipher_for(password, &self.salt)?
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .map_err(|_| anyhow!("failed to decrypt secrets; wrong password or damaged file"))
    }
}

fn cipher_for(password: &str, salt: &[u8]) -> Result<Aes256Gcm> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|err| anyhow!("failed to derive key: {err}"))?;
    Aes256Gcm::new_from_slice(&key).context("failed to build cipher")
}

mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64.decode(text).map_err(serde::de::Error::custom)
    }
}
