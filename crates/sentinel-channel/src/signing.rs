//! Ethereum-compatible channel signing
//!
//! State hashes are signed under the standard personal-message prefix so
//! that on-chain ECDSA recovery yields the signer address exactly. No
//! custom scheme; `v` uses the 27/28 encoding.

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use sentinel_types::EvmAddress;

#[derive(Error, Debug, Clone)]
pub enum SigningError {
    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Keccak-256 digest
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// The digest actually signed: `keccak256("\x19Ethereum Signed
/// Message:\n32" || hash)`
pub fn personal_digest(hash: &[u8; 32]) -> [u8; 32] {
    let mut prefixed = Vec::with_capacity(28 + 32);
    prefixed.extend_from_slice(b"\x19Ethereum Signed Message:\n32");
    prefixed.extend_from_slice(hash);
    keccak256(&prefixed)
}

/// Derive an EVM address from a verifying key:
/// `keccak256(uncompressed_pubkey)[12..]`
pub fn address_of(key: &VerifyingKey) -> EvmAddress {
    use k256::elliptic_curve::sec1::ToEncodedPoint as _;
    let encoded = key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the 64 bytes of (x, y).
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    EvmAddress(addr)
}

/// A channel participant's signing key. Key bytes are never exported;
/// callers receive hex signatures and the derived address only.
pub struct ChannelSigner {
    sk: SigningKey,
    address: EvmAddress,
}

impl ChannelSigner {
    /// Random key from the OS RNG
    pub fn random() -> Self {
        let sk = SigningKey::random(&mut rand::rngs::OsRng);
        let address = address_of(sk.verifying_key());
        Self { sk, address }
    }

    /// Deterministic key derived from a label (stable demo identities)
    pub fn from_label(label: &str) -> Result<Self> {
        let seed = blake3::derive_key("sentinel channel signer v1", label.as_bytes());
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        let sk = SigningKey::from_bytes(seed.into())
            .map_err(|e| SigningError::KeyDerivation(e.to_string()))?;
        let address = address_of(sk.verifying_key());
        Ok(Self { sk, address })
    }

    pub fn address(&self) -> EvmAddress {
        self.address
    }

    /// Sign a 32-byte state hash under the personal prefix. Returns the
    /// 65-byte `r || s || v` signature, hex-encoded.
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<String> {
        let digest = personal_digest(hash);
        let (sig, recovery_id) = self
            .sk
            .sign_prehash_recoverable(&digest)
            .map_err(|e| SigningError::SigningFailed(e.to_string()))?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recovery_id.to_byte() + 27; // Ethereum v encoding
        Ok(hex::encode(out))
    }
}

impl std::fmt::Debug for ChannelSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Recover the signer address from a hex `r || s || v` signature over a
/// personal-prefixed state hash
pub fn recover_signer(hash: &[u8; 32], signature_hex: &str) -> Result<EvmAddress> {
    let bytes = hex::decode(signature_hex)
        .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;
    if bytes.len() != 65 {
        return Err(SigningError::MalformedSignature(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }

    let sig = EcdsaSignature::from_slice(&bytes[..64])
        .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;
    let v = bytes[64];
    let recovery_byte = v.checked_sub(27).ok_or_else(|| {
        SigningError::MalformedSignature(format!("invalid v byte {}", v))
    })?;
    let recovery_id = RecoveryId::from_byte(recovery_byte).ok_or_else(|| {
        SigningError::MalformedSignature(format!("invalid recovery id {}", recovery_byte))
    })?;

    let digest = personal_digest(hash);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|e| SigningError::RecoveryFailed(e.to_string()))?;
    Ok(address_of(&key))
}
