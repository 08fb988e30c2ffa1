use async_trait::async_trait;
use k256::ecdsa::{
    RecoveryId, Signature, SigningKey, VerifyingKey, signature::hazmat::PrehashSigner,
};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

use super::signature::{SignatureValue, SigningError};
use crate::network::AccountSigner;

/// secp256k1 key producing Ethereum-style recoverable signatures
/// (65 bytes: r + s + v) over personal-message digests.
///
/// The account address is derived from the key, so a verifier can recover
/// it from the signature alone.
pub struct LocalKeySigner {
    signing_key: SigningKey,
    address: String,
}

impl LocalKeySigner {
    pub fn new(signing_key: SigningKey) -> Self {
        let address = address_from_verifying_key(signing_key.verifying_key());
        Self { signing_key, address }
    }

    pub fn random() -> Self {
        Self::new(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// The SHA-256 hash of the seed becomes the 32-byte private key.
    pub fn from_seed(seed: &str) -> Result<Self, SigningError> {
        let hash = Sha256::digest(seed.as_bytes());
        let signing_key = SigningKey::from_bytes(&hash)
            .map_err(|e| SigningError::Local(format!("invalid seed: {e}")))?;
        Ok(Self::new(signing_key))
    }

    pub fn from_hex(private_key: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(private_key.strip_prefix("0x").unwrap_or(private_key))
            .map_err(|e| SigningError::Local(format!("invalid private key hex: {e}")))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| SigningError::Local(format!("invalid private key: {e}")))?;
        Ok(Self::new(signing_key))
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn sign_personal_message(&self, message: &str) -> Result<SignatureValue, SigningError> {
        let digest = personal_message_digest(message);
        let (signature, recovery_id): (Signature, RecoveryId) = self
            .signing_key
            .sign_prehash(&digest)
            .map_err(|e| SigningError::Local(format!("secp256k1 sign_prehash failed: {e}")))?;

        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signature.to_bytes());
        Ok(SignatureValue {
            compact,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

#[async_trait]
impl AccountSigner for LocalKeySigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, message: &str) -> Result<SignatureValue, SigningError> {
        self.sign_personal_message(message)
    }
}

/// keccak256 over the EIP-191 `personal_sign` framing of `message`.
pub fn personal_message_digest(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// `0x` + hex of the last 20 bytes of keccak256 over the uncompressed key.
pub fn address_from_verifying_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recovers the signing address of a personal-message signature. Accepts
/// both raw (0/1) and Ethereum-offset (27/28) recovery ids.
pub fn recover_address(message: &str, signature: &SignatureValue) -> Result<String, SigningError> {
    let digest = personal_message_digest(message);
    let parsed = Signature::from_slice(&signature.compact)
        .map_err(|e| SigningError::Local(format!("invalid signature: {e}")))?;
    let v = match signature.recovery_id {
        27 | 28 => signature.recovery_id - 27,
        v => v,
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| {
            SigningError::Local(format!("invalid recovery id {}", signature.recovery_id))
        })?;
    let key = VerifyingKey::recover_from_prehash(&digest, &parsed, recovery_id)
        .map_err(|e| SigningError::Local(format!("recovery failed: {e}")))?;
    Ok(address_from_verifying_key(&key))
}
