//! Field cipher for encrypting and decrypting individual values.
//!
//! Every call draws a fresh random nonce, so encrypting the same plaintext
//! twice yields different envelopes. The field context is bound as associated
//! data: an envelope copied into another field or entity type fails to open.

use crate::context::FieldContext;
use crate::envelope::Envelope;
use crate::error::{DecryptionError, Error};
use crate::kdf::{DerivedKey, KeyPurpose};
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce, XChaCha20Poly1305, XNonce,
};

/// AEAD cipher used for new envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherMode {
    /// ChaCha20-Poly1305 with a 96-bit nonce (default).
    #[default]
    ChaCha20Poly1305,
    /// XChaCha20-Poly1305 with a 192-bit nonce.
    XChaCha20Poly1305,
}

impl CipherMode {
    /// Identifier written into the envelope.
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::ChaCha20Poly1305 => 0x01,
            Self::XChaCha20Poly1305 => 0x02,
        }
    }

    /// Looks a mode up by envelope identifier.
    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(Self::ChaCha20Poly1305),
            0x02 => Some(Self::XChaCha20Poly1305),
            _ => None,
        }
    }

    /// Nonce size in bytes.
    #[must_use]
    pub const fn nonce_size(self) -> usize {
        match self {
            Self::ChaCha20Poly1305 => 12,
            Self::XChaCha20Poly1305 => 24,
        }
    }
}

/// Encrypts and decrypts single field values with a derived key.
///
/// # Example
///
/// ```
/// use wardseal::cipher::{CipherMode, FieldCipher};
/// use wardseal::context::FieldContext;
/// use wardseal::kdf::{derive_field_key, KeyPurpose};
/// use wardseal::key_provider::KeyMaterial;
///
/// let root = KeyMaterial::from_bytes(vec![7u8; 32]).unwrap();
/// let ctx = FieldContext::new("Patient", "first_name");
/// let key = derive_field_key(&root, &ctx, KeyPurpose::Encryption).unwrap();
///
/// let cipher = FieldCipher::new(CipherMode::default());
/// let envelope = cipher.encrypt_value(&key, b"Maria", &ctx).unwrap();
/// let plaintext = cipher.decrypt_value(&key, &envelope, &ctx).unwrap();
/// assert_eq!(plaintext, b"Maria");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldCipher {
    mode: CipherMode,
}

impl FieldCipher {
    /// Creates a cipher that writes envelopes with `mode`.
    #[must_use]
    pub const fn new(mode: CipherMode) -> Self {
        Self { mode }
    }

    /// Returns the mode used for new envelopes.
    #[must_use]
    pub const fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Encrypts an optional value. `None` passes through as `None`.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyPurposeMismatch` for a non-encryption key and
    /// `Error::EncryptionFailed` if the AEAD operation fails.
    pub fn encrypt(
        &self,
        key: &DerivedKey,
        plaintext: Option<&[u8]>,
        context: &FieldContext,
    ) -> Result<Option<Envelope>, Error> {
        plaintext.map(|p| self.encrypt_value(key, p, context)).transpose()
    }

    /// Encrypts a value into a fresh envelope.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyPurposeMismatch` for a non-encryption key and
    /// `Error::EncryptionFailed` if the AEAD operation fails.
    pub fn encrypt_value(
        &self,
        key: &DerivedKey,
        plaintext: &[u8],
        context: &FieldContext,
    ) -> Result<Envelope, Error> {
        let key_bytes = key.require(KeyPurpose::Encryption)?;

        let mut nonce = vec![0u8; self.mode.nonce_size()];
        OsRng.fill_bytes(&mut nonce);

        let aad = context.to_string();
        let payload = Payload { msg: plaintext, aad: aad.as_bytes() };

        let ciphertext = match self.mode {
            CipherMode::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key_bytes)
                .map_err(|e| Error::EncryptionFailed(format!("invalid key: {e}")))?
                .encrypt(Nonce::from_slice(&nonce), payload),
            CipherMode::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(key_bytes)
                .map_err(|e| Error::EncryptionFailed(format!("invalid key: {e}")))?
                .encrypt(XNonce::from_slice(&nonce), payload),
        }
        .map_err(|e| Error::EncryptionFailed(format!("AEAD encryption failed: {e}")))?;

        Ok(Envelope::new(self.mode.id(), nonce, ciphertext))
    }

    /// Decrypts an optional envelope. `None` passes through as `None`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decryption` on key or context mismatch, tampering, or a
    /// malformed envelope.
    pub fn decrypt(
        &self,
        key: &DerivedKey,
        envelope: Option<&Envelope>,
        context: &FieldContext,
    ) -> Result<Option<Vec<u8>>, Error> {
        envelope.map(|e| self.decrypt_value(key, e, context)).transpose()
    }

    /// Decrypts an envelope. The envelope's own algorithm id selects the cipher,
    /// so envelopes written under another mode still open.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decryption` on key or context mismatch, tampering, or a
    /// malformed envelope.
    pub fn decrypt_value(
        &self,
        key: &DerivedKey,
        envelope: &Envelope,
        context: &FieldContext,
    ) -> Result<Vec<u8>, Error> {
        let key_bytes = key.require(KeyPurpose::Encryption)?;

        let mode = CipherMode::from_id(envelope.algorithm())
            .ok_or(DecryptionError::UnknownAlgorithm(envelope.algorithm()))?;
        if envelope.nonce().len() != mode.nonce_size() {
            return Err(DecryptionError::MalformedEnvelope(format!(
                "nonce is {} bytes, expected {}",
                envelope.nonce().len(),
                mode.nonce_size()
            ))
            .into());
        }

        let aad = context.to_string();
        let payload = Payload { msg: envelope.ciphertext(), aad: aad.as_bytes() };

        let plaintext = match mode {
            CipherMode::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key_bytes)
                .map_err(|_| DecryptionError::AuthenticationFailed)?
                .decrypt(Nonce::from_slice(envelope.nonce()), payload),
            CipherMode::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(key_bytes)
                .map_err(|_| DecryptionError::AuthenticationFailed)?
                .decrypt(XNonce::from_slice(envelope.nonce()), payload),
        }
        .map_err(|_| DecryptionError::AuthenticationFailed)?;

        Ok(plaintext)
    }
}
