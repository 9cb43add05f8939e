use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Authentication failure on decrypt. Wrong key, tampered ciphertext,
    /// and wrong password are deliberately indistinguishable.
    #[error("decryption failed (wrong key or tampered data)")]
    AuthFailed,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
