//! Ciphertext envelope format.
//!
//! Format:
//! ```text
//! [version:1][algorithm:1][nonce_len:1][nonce:N][ciphertext || tag]
//! ```
//!
//! In a text column the envelope is stored as standard base64.

use crate::error::DecryptionError;
use base64::Engine as _;

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Poly1305 authentication tag size.
pub const TAG_SIZE: usize = 16;

const FIXED_HEADER_LEN: usize = 3;

/// Serialized package of nonce, ciphertext and authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    algorithm: u8,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Assembles an envelope. `nonce` must be at most 255 bytes.
    pub(crate) fn new(algorithm: u8, nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        debug_assert!(nonce.len() <= usize::from(u8::MAX));
        Self { algorithm, nonce, ciphertext }
    }

    /// Returns the cipher algorithm identifier.
    #[must_use]
    pub const fn algorithm(&self) -> u8 {
        self.algorithm
    }

    /// Returns the nonce.
    #[must_use]
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    /// Returns the ciphertext including the trailing tag.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serializes the envelope to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(FIXED_HEADER_LEN + self.nonce.len() + self.ciphertext.len());
        bytes.push(ENVELOPE_VERSION);
        bytes.push(self.algorithm);
        // Nonce sizes come from CipherMode and never exceed 24 bytes
        #[allow(clippy::cast_possible_truncation)]
        bytes.push(self.nonce.len() as u8);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parses an envelope from bytes.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionError::UnsupportedVersion` for an unknown version and
    /// `DecryptionError::MalformedEnvelope` for truncated data.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecryptionError> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(DecryptionError::MalformedEnvelope(format!(
                "envelope too short: {} bytes",
                data.len()
            )));
        }

        let version = data[0];
        if version != ENVELOPE_VERSION {
            return Err(DecryptionError::UnsupportedVersion {
                version,
                supported: ENVELOPE_VERSION.to_string(),
            });
        }

        let algorithm = data[1];
        let nonce_len = usize::from(data[2]);
        let rest = &data[FIXED_HEADER_LEN..];

        if rest.len() < nonce_len {
            return Err(DecryptionError::MalformedEnvelope("nonce truncated".to_string()));
        }
        let (nonce, ciphertext) = rest.split_at(nonce_len);

        if ciphertext.len() < TAG_SIZE {
            return Err(DecryptionError::MalformedEnvelope(
                "ciphertext shorter than authentication tag".to_string(),
            ));
        }

        Ok(Self { algorithm, nonce: nonce.to_vec(), ciphertext: ciphertext.to_vec() })
    }

    /// Encodes the envelope as base64 text for storage.
    #[must_use]
    pub fn to_text(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_bytes())
    }

    /// Decodes an envelope from stored base64 text.
    ///
    /// # Errors
    ///
    /// Returns `DecryptionError::MalformedEnvelope` if the text is not base64
    /// or the decoded bytes are not a valid envelope.
    pub fn from_text(text: &str) -> Result<Self, DecryptionError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(|e| DecryptionError::MalformedEnvelope(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new(1, vec![9; 12], vec![4; 40])
    }

    #[test]
    fn test_envelope_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes[0], ENVELOPE_VERSION);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[2], 12);
        assert_eq!(&bytes[3..15], &[9; 12]);
        assert_eq!(bytes.len(), 3 + 12 + 40);
    }

    #[test]
    fn test_envelope_text_round_trip() {
        let envelope = sample();
        let parsed = Envelope::from_text(&envelope.to_text()).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 99;
        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(DecryptionError::UnsupportedVersion { version: 99, .. })
        ));
    }

    #[test]
    fn test_truncated_nonce() {
        let bytes = vec![ENVELOPE_VERSION, 1, 12, 0, 0];
        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(DecryptionError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_missing_tag() {
        let mut bytes = vec![ENVELOPE_VERSION, 1, 12];
        bytes.extend_from_slice(&[0; 12]);
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(DecryptionError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_empty_data() {
        assert!(matches!(Envelope::from_bytes(&[]), Err(DecryptionError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_plaintext_is_not_an_envelope() {
        assert!(Envelope::from_text("Maria").is_err());
    }
}
