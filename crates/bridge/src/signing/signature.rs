use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Length of a recoverable secp256k1 signature: 64 bytes `r || s` + 1 byte `v`.
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("malformed signature: expected {RECOVERABLE_SIGNATURE_LEN} bytes, got {len}")]
    MalformedSignature { len: usize },
    #[error("signature payload is not valid base64: {0}")]
    InvalidEncoding(String),
    #[error("signing request {id} was abandoned")]
    Abandoned { id: String },
    #[error("signing request {id} timed out")]
    TimedOut { id: String },
    #[error("local signing failed: {0}")]
    Local(String),
}

/// A compact ECDSA signature together with its recovery id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureValue {
    #[serde(with = "compact_hex")]
    pub compact: [u8; 64],
    pub recovery_id: u8,
}

impl SignatureValue {
    /// Decodes a base64 payload supplied by the host.
    pub fn from_base64(payload: &str) -> Result<Self, SigningError> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| SigningError::InvalidEncoding(e.to_string()))?;
        Self::try_from(bytes.as_slice())
    }

    pub fn to_bytes(&self) -> [u8; RECOVERABLE_SIGNATURE_LEN] {
        let mut bytes = [0u8; RECOVERABLE_SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&self.compact);
        bytes[64] = self.recovery_id;
        bytes
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}

impl TryFrom<&[u8]> for SignatureValue {
    type Error = SigningError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != RECOVERABLE_SIGNATURE_LEN {
            return Err(SigningError::MalformedSignature { len: bytes.len() });
        }
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&bytes[..64]);
        Ok(Self {
            compact,
            recovery_id: bytes[64],
        })
    }
}

mod compact_hex {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| D::Error::custom(format!("expected 64 bytes, got {}", v.len())))
    }
}
