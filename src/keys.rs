//! Opaque block keys and per-node key salting.
//!
//! Keys are compared and hashed as opaque routing identifiers. Listeners index
//! their wanted keys by a salted digest so that an outsider cannot predict which
//! filter bits a given key touches on this node.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-hash keys and signed-subspace keys are scheduled separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    Chk,
    Ssk,
}

/// Routing identifier of a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    key_type: KeyType,
    routing_key: [u8; 32],
}

impl BlockKey {
    pub fn new(key_type: KeyType, routing_key: [u8; 32]) -> Self {
        Self { key_type, routing_key }
    }

    pub fn chk(routing_key: [u8; 32]) -> Self {
        Self::new(KeyType::Chk, routing_key)
    }

    pub fn ssk(routing_key: [u8; 32]) -> Self {
        Self::new(KeyType::Ssk, routing_key)
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn routing_key(&self) -> &[u8; 32] {
        &self.routing_key
    }
}

impl fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.key_type {
            KeyType::Chk => "CHK",
            KeyType::Ssk => "SSK",
        };
        write!(f, "{prefix}@{}", hex::encode(&self.routing_key[..8]))
    }
}

/// A block received from the network, handed to interested listeners.
#[derive(Debug, Clone)]
pub struct KeyBlock {
    pub key: BlockKey,
    pub data: Vec<u8>,
}

impl KeyBlock {
    pub fn new(key: BlockKey, data: Vec<u8>) -> Self {
        Self { key, data }
    }
}

/// Digest of a routing key under this node's salt for its key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaltedKey([u8; 32]);

impl SaltedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Two independent 64-bit words for double hashing.
    pub(crate) fn hash_pair(&self) -> (u64, u64) {
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        a.copy_from_slice(&self.0[0..8]);
        b.copy_from_slice(&self.0[8..16]);
        // Odd step so every slot is reachable for any table size.
        (u64::from_le_bytes(a), u64::from_le_bytes(b) | 1)
    }
}

/// Holds one salt per key type; the two domains never share a salt.
#[derive(Clone)]
pub struct KeySalter {
    chk_salt: [u8; 32],
    ssk_salt: [u8; 32],
}

impl fmt::Debug for KeySalter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySalter").finish_non_exhaustive()
    }
}

impl KeySalter {
    /// Fresh random salts from the OS CSPRNG.
    pub fn random() -> Self {
        let mut chk_salt = [0u8; 32];
        let mut ssk_salt = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut chk_salt);
        rand::rngs::OsRng.fill_bytes(&mut ssk_salt);
        if chk_salt == ssk_salt {
            ssk_salt[0] ^= 0xff;
        }
        Self { chk_salt, ssk_salt }
    }

    /// Fixed salts, for tests and for restoring a node's previous salts.
    pub fn from_salts(chk_salt: [u8; 32], ssk_salt: [u8; 32]) -> Self {
        Self { chk_salt, ssk_salt }
    }

    pub fn salt(&self, key: &BlockKey) -> SaltedKey {
        let salt = match key.key_type() {
            KeyType::Chk => &self.chk_salt,
            KeyType::Ssk => &self.ssk_salt,
        };
        let mut hasher = Sha256::new();
        hasher.update(key.routing_key());
        hasher.update(salt);
        SaltedKey(hasher.finalize().into())
    }
}

impl Default for KeySalter {
    fn default() -> Self {
        Self::random()
    }
}
