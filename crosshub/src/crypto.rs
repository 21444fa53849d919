use std::fmt;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, U256},
};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::{
    error::{SigningError, VerificationError},
    types::{CrossTransaction, CtxSignature, SignedCrossTransaction},
};

/// A secp256k1 private key.
#[derive(Clone)]
pub struct SecretKey {
    key: SigningKey,
}

impl SecretKey {
    /// Generates a random private key.
    pub fn new() -> SecretKey {
        Self::new_from_rng(&mut rand::thread_rng())
    }

    pub fn new_from_rng<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> SecretKey {
        SecretKey {
            key: SigningKey::random(rng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<SecretKey, SigningError> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SigningError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;

        if bytes == [0; 32] {
            return Err(SigningError::InvalidKey("bytes are all zero".to_owned()));
        }

        let key =
            SigningKey::from_slice(&bytes).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(SecretKey { key })
    }

    pub fn from_hex(s: &str) -> Result<SecretKey, SigningError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn as_ecdsa(&self) -> &SigningKey {
        &self.key
    }

    pub fn address(&self) -> Address {
        address_of(self.key.verifying_key())
    }
}

impl Default for SecretKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// The Ethereum-style address of a public key: the last 20 bytes of the Keccak hash of the uncompressed point.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Signs and verifies cross transactions on behalf of one chain. The chain id is part of both the signed hash and
/// `v`, so a signature made for one chain never recovers to the same signer on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtxSigner {
    chain_id: u64,
}

impl CtxSigner {
    pub fn new(chain_id: u64) -> Self {
        CtxSigner { chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// `35 + 2 * chain_id`, the value added to the recovery id to form `v`.
    fn v_offset(&self) -> Option<u64> {
        self.chain_id.checked_mul(2)?.checked_add(35)
    }

    /// Keccak hash of the ABI encoding of the transaction's business fields followed by the chain id.
    pub fn hash(&self, tx: &CrossTransaction) -> B256 {
        let encoded = DynSolValue::Tuple(vec![
            DynSolValue::Uint(tx.value, 256),
            DynSolValue::Uint(tx.dest_value, 256),
            DynSolValue::String(tx.from.clone()),
            DynSolValue::String(tx.to.clone()),
            DynSolValue::Uint(tx.destination_id, 256),
            DynSolValue::Uint(U256::from(tx.purpose), 8),
            DynSolValue::FixedBytes(tx.tx_id, 32),
            DynSolValue::FixedBytes(tx.tx_hash, 32),
            DynSolValue::FixedBytes(tx.block_hash, 32),
            DynSolValue::Bytes(tx.payload.to_vec()),
            DynSolValue::Uint(U256::from(self.chain_id), 256),
        ])
        .abi_encode_params();
        B256::from_slice(&Keccak256::digest(&encoded))
    }

    pub fn sign(
        &self,
        tx: CrossTransaction,
        key: Option<&SecretKey>,
    ) -> Result<SignedCrossTransaction, SigningError> {
        let key = key.ok_or(SigningError::MissingKey)?;
        let offset = self
            .v_offset()
            .ok_or(SigningError::ChainIdOverflow(self.chain_id))?;

        let hash = self.hash(&tx);
        let (signature, recovery_id) = key.as_ecdsa().sign_prehash_recoverable(hash.as_slice())?;
        let v = offset
            .checked_add(u64::from(recovery_id.to_byte()))
            .ok_or(SigningError::ChainIdOverflow(self.chain_id))?;

        let (r, s) = signature.split_bytes();
        Ok(SignedCrossTransaction {
            tx,
            signature: CtxSignature {
                v,
                r: U256::from_be_slice(&r),
                s: U256::from_be_slice(&s),
            },
        })
    }

    /// Recovers the address which signed `signed` for this chain.
    pub fn sender(&self, signed: &SignedCrossTransaction) -> Result<Address, VerificationError> {
        let CtxSignature { v, r, s } = signed.signature;
        let mismatch = || VerificationError::ChainIdMismatch {
            v,
            chain_id: self.chain_id,
        };

        let recovery_id = self
            .v_offset()
            .and_then(|offset| v.checked_sub(offset))
            .filter(|id| *id <= 1)
            .and_then(|id| RecoveryId::from_byte(id as u8))
            .ok_or_else(mismatch)?;

        let signature = Signature::from_scalars(r.to_be_bytes::<32>(), s.to_be_bytes::<32>())
            .map_err(VerificationError::InvalidSignature)?;
        let hash = self.hash(&signed.tx);
        let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
            .map_err(VerificationError::Recovery)?;

        Ok(address_of(&key))
    }
}
