//! Envelope encryption for credential secrets
//!
//! Secrets are sealed with AES-256-GCM under a per-record subkey derived
//! from the master key with HKDF-SHA256 (fresh random salt per write, fresh
//! IV per encryption). The associated data binds the ciphertext to its
//! `{accountId}:{tenantId}` pair, so a record copied to another account or
//! tenant fails authentication instead of decrypting.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use mailgate_common::{Error, Result};
use sha2::Sha256;

use crate::models::{Envelope, Secret};

const ENVELOPE_VERSION: u32 = 1;
const ALGORITHM: &str = "AES-256-GCM";
const HKDF_INFO: &[u8] = b"mailbox:v1";
const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// 32-byte master key for envelope encryption
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey(<redacted>)")
    }
}

/// Associated-data tag binding an envelope to its owning account and tenant
pub fn binding(account_id: &str, tenant_id: &str) -> String {
    format!("{}:{}", account_id, tenant_id)
}

fn derive_subkey(master: &MasterKey, salt: &[u8]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), &master.0);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|e| Error::Internal(format!("subkey derivation failed: {}", e)))?;
    Ok(okm)
}

/// Encrypt a secret into an envelope bound to `aad`
pub fn seal(master: &MasterKey, secret: &Secret, aad: &str) -> Result<Envelope> {
    let plaintext = serde_json::to_vec(secret)
        .map_err(|e| Error::Internal(format!("secret serialization failed: {}", e)))?;

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let subkey = derive_subkey(master, &salt)?;
    let cipher = Aes256Gcm::new(&subkey.into());

    let mut ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| Error::Internal("envelope encryption failed".to_string()))?;

    // aes-gcm appends the tag to the ciphertext; the envelope stores it apart.
    let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        algorithm: ALGORITHM.to_string(),
        salt: BASE64.encode(salt),
        iv: BASE64.encode(iv),
        tag: BASE64.encode(tag),
        ct: BASE64.encode(ciphertext),
    })
}

fn decode_field(envelope_field: &str, name: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(envelope_field)
        .map_err(|_| Error::AuthFailure(format!("envelope {} is not decodable", name)))
}

/// Decrypt an envelope bound to `aad`
///
/// Any authentication failure surfaces as [`Error::AuthFailure`] and no
/// partial plaintext is returned.
pub fn open(master: &MasterKey, envelope: &Envelope, aad: &str) -> Result<Secret> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::UnsupportedEnvelope(format!(
            "unknown envelope version {}",
            envelope.version
        )));
    }
    if envelope.algorithm != ALGORITHM {
        return Err(Error::UnsupportedEnvelope(format!(
            "unknown algorithm {}",
            envelope.algorithm
        )));
    }

    let salt = decode_field(&envelope.salt, "salt")?;
    let iv = decode_field(&envelope.iv, "iv")?;
    let tag = decode_field(&envelope.tag, "tag")?;
    let ct = decode_field(&envelope.ct, "ct")?;

    if salt.len() != SALT_LEN || iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(Error::AuthFailure("envelope field length mismatch".to_string()));
    }

    let subkey = derive_subkey(master, &salt)?;
    let cipher = Aes256Gcm::new(&subkey.into());

    let mut sealed = ct;
    sealed.extend_from_slice(&tag);

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: &sealed,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| Error::AuthFailure("envelope authentication failed".to_string()))?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| Error::Internal(format!("sealed secret is not decodable: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionSecurity, ServerSettings};

    fn master() -> MasterKey {
        MasterKey::new([7u8; 32])
    }

    fn secret() -> Secret {
        Secret {
            label: None,
            primary_email: "a@b.co".to_string(),
            imap: ServerSettings {
                host: "imap.x".to_string(),
                port: 993,
                username: "a@b.co".to_string(),
                password: "p".to_string(),
                connection: ConnectionSecurity::Tls,
            },
            smtp: ServerSettings {
                host: "smtp.x".to_string(),
                port: 587,
                username: "a@b.co".to_string(),
                password: "p".to_string(),
                connection: ConnectionSecurity::StartTls,
            },
        }
    }

    #[test]
    fn test_seal_open_round_trip() {
        let master = master();
        let aad = binding("acc1", "tenant1");
        let envelope = seal(&master, &secret(), &aad).unwrap();

        assert_eq!(envelope.version, 1);
        assert_eq!(envelope.algorithm, "AES-256-GCM");

        let opened = open(&master, &envelope, &aad).unwrap();
        assert_eq!(opened, secret());
    }

    #[test]
    fn test_open_fails_on_swapped_account() {
        let master = master();
        let envelope = seal(&master, &secret(), &binding("acc1", "tenant1")).unwrap();

        let err = open(&master, &envelope, &binding("acc2", "tenant1")).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(_)));

        let err = open(&master, &envelope, &binding("acc1", "tenant2")).unwrap_err();
        assert!(matches!(err, Error::AuthFailure(_)));
    }

    #[test]
    fn test_open_fails_on_any_bit_flip() {
        let master = master();
        let aad = binding("acc1", "tenant1");
        let envelope = seal(&master, &secret(), &aad).unwrap();

        let flip = |field: &str| -> String {
            let mut raw = BASE64.decode(field).unwrap();
            raw[0] ^= 0x01;
            BASE64.encode(raw)
        };

        for which in ["salt", "iv", "tag", "ct"] {
            let mut tampered = envelope.clone();
            match which {
                "salt" => tampered.salt = flip(&envelope.salt),
                "iv" => tampered.iv = flip(&envelope.iv),
                "tag" => tampered.tag = flip(&envelope.tag),
                _ => tampered.ct = flip(&envelope.ct),
            }
            let err = open(&master, &tampered, &aad).unwrap_err();
            assert!(
                matches!(err, Error::AuthFailure(_)),
                "flipping {} must fail authentication",
                which
            );
        }
    }

    #[test]
    fn test_open_rejects_unknown_version() {
        let master = master();
        let aad = binding("acc1", "tenant1");
        let mut envelope = seal(&master, &secret(), &aad).unwrap();
        envelope.version = 2;

        let err = open(&master, &envelope, &aad).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEnvelope(_)));
    }

    #[test]
    fn test_open_rejects_unknown_algorithm() {
        let master = master();
        let aad = binding("acc1", "tenant1");
        let mut envelope = seal(&master, &secret(), &aad).unwrap();
        envelope.algorithm = "AES-128-GCM".to_string();

        let err = open(&master, &envelope, &aad).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEnvelope(_)));
    }

    #[test]
    fn test_salt_and_iv_are_unique_per_seal() {
        let master = master();
        let aad = binding("acc1", "tenant1");
        let first = seal(&master, &secret(), &aad).unwrap();
        let second = seal(&master, &secret(), &aad).unwrap();

        assert_ne!(first.salt, second.salt);
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ct, second.ct);
    }

    #[test]
    fn test_master_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", master()), "MasterKey(<redacted>)");
    }
}
