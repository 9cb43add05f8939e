//! Crypto primitives for the Markbook vault.
//!
//! Provides the building blocks the vault, migration, and backup layers
//! share:
//! - Argon2id key stretching from the login or backup password
//! - ChaCha20-Poly1305 authenticated encryption
//! - 12-word recovery phrase generation and one-way hashing
//!
//! # Key lifecycle
//!
//! Derived keys exist only in memory ([`DerivedKey`] zeroizes on drop) and
//! are never serialized. Every decryption failure collapses to the single
//! opaque [`CryptoError::AuthFailed`] variant so calling code cannot build
//! an oracle distinguishing a wrong key from tampered data.

mod cipher;
mod error;
mod key;
pub mod mnemonic;

pub use cipher::{decrypt, encrypt, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE,
};
pub use mnemonic::{phrase_hash, RecoveryPhrase, PHRASE_WORDS};
