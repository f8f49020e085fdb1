//! Credential access for unattended logins.
//!
//! Storage and encryption belong to an external vault; this module only asks it
//! to decrypt a sealed record at the moment a login needs it. The plaintext is
//! held in a [`Credentials`] value that is never serialized or logged.

use std::fmt;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
}

pub trait CredentialVault: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8], nonce: &[u8], tag: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub student_id: String,
    pub pin: String,
}

impl Credentials {
    pub fn new(student_id: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            pin: pin.into(),
        }
    }

    /// Decode the vault's plaintext, a JSON object `{"student_id", "pin"}`.
    pub fn from_plaintext(plaintext: &[u8]) -> Result<Self> {
        serde_json::from_slice(plaintext).context("vault plaintext is not a credential record")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("student_id", &"<redacted>")
            .field("pin", &"<redacted>")
            .finish()
    }
}

/// Where the scheduler gets credentials for pre-boot and auto-enroll.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self) -> Result<Credentials>;
}

/// Decrypts a sealed record through the vault on every request.
pub struct VaultCredentials<V> {
    vault: V,
    sealed: SealedSecret,
}

impl<V: CredentialVault> VaultCredentials<V> {
    pub fn new(vault: V, sealed: SealedSecret) -> Self {
        Self { vault, sealed }
    }
}

impl<V: CredentialVault> CredentialSource for VaultCredentials<V> {
    fn credentials(&self) -> Result<Credentials> {
        let plaintext = self
            .vault
            .decrypt(&self.sealed.ciphertext, &self.sealed.nonce, &self.sealed.tag)
            .context("vault refused to decrypt stored credentials")?;
        Credentials::from_plaintext(&plaintext)
    }
}

/// Credentials taken from the process environment.
pub struct EnvCredentials {
    pub id_var: String,
    pub pin_var: String,
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self {
            id_var: "TERMREG_STUDENT_ID".into(),
            pin_var: "TERMREG_PIN".into(),
        }
    }
}

impl EnvCredentials {
    pub fn is_configured(&self) -> bool {
        std::env::var_os(&self.id_var).is_some() && std::env::var_os(&self.pin_var).is_some()
    }
}

impl CredentialSource for EnvCredentials {
    fn credentials(&self) -> Result<Credentials> {
        let id = std::env::var(&self.id_var).map_err(|_| anyhow!("{} is not set", self.id_var))?;
        let pin = std::env::var(&self.pin_var).map_err(|_| anyhow!("{} is not set", self.pin_var))?;
        Ok(Credentials::new(id, pin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XorVault(u8);

    impl CredentialVault for XorVault {
        fn decrypt(&self, ciphertext: &[u8], _nonce: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
            if tag != b"ok" {
                return Err(anyhow!("authentication tag mismatch"));
            }
            Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
        }
    }

    fn seal(plaintext: &str, key: u8, tag: &[u8]) -> SealedSecret {
        SealedSecret {
            ciphertext: plaintext.bytes().map(|b| b ^ key).collect(),
            nonce: vec![0; 12],
            tag: tag.to_vec(),
        }
    }

    #[test]
    fn decrypts_through_vault() {
        let source = VaultCredentials::new(
            XorVault(0x5a),
            seal(r#"{"student_id":"802123456","pin":"1234"}"#, 0x5a, b"ok"),
        );
        let creds = source.credentials().unwrap();
        assert_eq!(creds.student_id, "802123456");
        assert_eq!(creds.pin, "1234");
    }

    #[test]
    fn tampered_record_fails() {
        let source = VaultCredentials::new(
            XorVault(0x5a),
            seal(r#"{"student_id":"1","pin":"2"}"#, 0x5a, b"bad"),
        );
        assert!(source.credentials().is_err());
    }

    #[test]
    fn debug_output_is_redacted() {
        let creds = Credentials::new("802123456", "1234");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("802123456"));
        assert!(!rendered.contains("1234"));
    }
}
