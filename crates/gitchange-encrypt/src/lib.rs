//! File encryption in the age format.
//!
//! Files destined for a Git remote can be encrypted to a configured recipient
//! set before they are staged. This crate provides the codec and the path
//! rules around it:
//!
//! - `encrypt`/`decrypt` over the age stream format
//! - recipient and identity parsing for X25519, SSH and passphrase material
//! - `should_encrypt_path`/`encrypted_path`, which guarantee the configured
//!   extension is appended exactly once
//!
//! A passphrase recipient must be the sole recipient; combining it with key
//! recipients is rejected as [`EncryptError::IncompatibleRecipients`] before
//! any key material is touched. Decryption is unused by the operator's own
//! control loop but is part of the codec contract for tooling reuse.
//!
//! # Example
//!
//! ```
//! use gitchange_encrypt::{Recipient, Identity, encrypt, decrypt};
//!
//! let cipher = encrypt(b"hi", &[Recipient::Passphrase("sesame".into())]).unwrap();
//! let plain = decrypt(&cipher, &[Identity::Passphrase("sesame".into())]).unwrap();
//! assert_eq!(plain, b"hi");
//! ```

use std::io::{Read, Write};
use std::str::FromStr;

use age::secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default extension appended to encrypted files.
pub const DEFAULT_EXTENSION: &str = ".age";

/// Errors from the encryption codec.
#[derive(Debug, Error)]
pub enum EncryptError {
    /// Encryption was requested with an empty recipient set.
    #[error("no encryption recipients configured")]
    NoRecipients,
    /// A passphrase recipient was combined with other recipients.
    #[error("a passphrase recipient cannot be combined with other recipients")]
    IncompatibleRecipients,
    /// A recipient string failed to parse.
    #[error("invalid {kind} recipient: {reason}")]
    InvalidRecipient { kind: &'static str, reason: String },
    /// An identity string failed to parse.
    #[error("invalid {kind} identity: {reason}")]
    InvalidIdentity { kind: &'static str, reason: String },
    /// The age encryption stream failed.
    #[error("encryption failed: {0}")]
    Encrypt(String),
    /// The age decryption stream failed (bad header, no matching key, or
    /// corrupted payload).
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// The public half of the codec: who can read the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// An X25519 recipient string (`age1...`).
    Age(String),
    /// An SSH public key line (`ssh-ed25519 ...` or `ssh-rsa ...`).
    Ssh(String),
    /// A passphrase; scrypt-wrapped, and necessarily the sole recipient.
    Passphrase(String),
}

/// The private half of the codec.
#[derive(Debug, Clone)]
pub enum Identity {
    /// An X25519 identity string (`AGE-SECRET-KEY-1...`).
    Age(String),
    /// An unencrypted SSH private key in OpenSSH PEM format.
    Ssh(String),
    /// The passphrase the payload was encrypted under.
    Passphrase(String),
}

/// Encryption settings carried by a desired-state object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    /// Whether committed files are encrypted at all.
    #[serde(default)]
    pub enabled: bool,
    /// Extension appended to encrypted files. Defaults to `.age`; a missing
    /// leading dot is supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,
}

impl EncryptionConfig {
    /// The effective extension, normalized to carry a leading dot.
    pub fn extension(&self) -> String {
        match self.file_extension.as_deref() {
            None | Some("") => DEFAULT_EXTENSION.to_string(),
            Some(ext) if ext.starts_with('.') => ext.to_string(),
            Some(ext) => format!(".{ext}"),
        }
    }
}

/// True iff encryption is enabled and `path` does not already carry the
/// configured extension. Together with [`encrypted_path`] this makes the
/// rename idempotent: `should_encrypt_path(encrypted_path(p)) == false`.
pub fn should_encrypt_path(path: &str, cfg: &EncryptionConfig) -> bool {
    cfg.enabled && !path.ends_with(&cfg.extension())
}

/// The path an encrypted file is written to.
pub fn encrypted_path(path: &str, cfg: &EncryptionConfig) -> String {
    format!("{path}{}", cfg.extension())
}

/// Encrypt `plain` to the given recipients.
pub fn encrypt(plain: &[u8], recipients: &[Recipient]) -> Result<Vec<u8>, EncryptError> {
    if recipients.is_empty() {
        return Err(EncryptError::NoRecipients);
    }
    let has_passphrase = recipients
        .iter()
        .any(|r| matches!(r, Recipient::Passphrase(_)));
    if has_passphrase && recipients.len() > 1 {
        return Err(EncryptError::IncompatibleRecipients);
    }

    let parsed: Vec<Box<dyn age::Recipient + Send>> = recipients
        .iter()
        .map(parse_recipient)
        .collect::<Result<_, _>>()?;

    let encryptor =
        age::Encryptor::with_recipients(parsed.iter().map(|r| r.as_ref() as &dyn age::Recipient))
            .map_err(|e| EncryptError::Encrypt(e.to_string()))?;

    let mut ciphertext = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut ciphertext)
        .map_err(|e| EncryptError::Encrypt(e.to_string()))?;
    writer
        .write_all(plain)
        .map_err(|e| EncryptError::Encrypt(e.to_string()))?;
    writer
        .finish()
        .map_err(|e| EncryptError::Encrypt(e.to_string()))?;

    Ok(ciphertext)
}

/// Decrypt an age payload with any of the given identities.
pub fn decrypt(cipher: &[u8], identities: &[Identity]) -> Result<Vec<u8>, EncryptError> {
    let parsed: Vec<Box<dyn age::Identity>> = identities
        .iter()
        .map(parse_identity)
        .collect::<Result<_, _>>()?;

    let decryptor =
        age::Decryptor::new(cipher).map_err(|e| EncryptError::Decrypt(e.to_string()))?;
    let mut reader = decryptor
        .decrypt(parsed.iter().map(|i| i.as_ref() as &dyn age::Identity))
        .map_err(|e| EncryptError::Decrypt(e.to_string()))?;

    let mut plain = Vec::new();
    reader
        .read_to_end(&mut plain)
        .map_err(|e| EncryptError::Decrypt(e.to_string()))?;
    Ok(plain)
}

fn parse_recipient(recipient: &Recipient) -> Result<Box<dyn age::Recipient + Send>, EncryptError> {
    match recipient {
        Recipient::Age(s) => age::x25519::Recipient::from_str(s.trim())
            .map(|r| Box::new(r) as Box<dyn age::Recipient + Send>)
            .map_err(|e| EncryptError::InvalidRecipient {
                kind: "age",
                reason: e.to_string(),
            }),
        Recipient::Ssh(s) => age::ssh::Recipient::from_str(s.trim())
            .map(|r| Box::new(r) as Box<dyn age::Recipient + Send>)
            .map_err(|e| EncryptError::InvalidRecipient {
                kind: "ssh",
                reason: format!("{e:?}"),
            }),
        Recipient::Passphrase(p) => Ok(Box::new(age::scrypt::Recipient::new(SecretString::from(
            p.clone(),
        )))),
    }
}

fn parse_identity(identity: &Identity) -> Result<Box<dyn age::Identity>, EncryptError> {
    match identity {
        Identity::Age(s) => age::x25519::Identity::from_str(s.trim())
            .map(|i| Box::new(i) as Box<dyn age::Identity>)
            .map_err(|e| EncryptError::InvalidIdentity {
                kind: "age",
                reason: e.to_string(),
            }),
        Identity::Ssh(s) => {
            let identity =
                age::ssh::Identity::from_buffer(std::io::Cursor::new(s.as_bytes()), None).map_err(
                    |e| EncryptError::InvalidIdentity {
                        kind: "ssh",
                        reason: e.to_string(),
                    },
                )?;
            Ok(Box::new(identity))
        }
        Identity::Passphrase(p) => Ok(Box::new(age::scrypt::Identity::new(SecretString::from(
            p.clone(),
        )))),
    }
}
