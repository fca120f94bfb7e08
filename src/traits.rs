use cosmian_crypto_core::{
    reexport::{rand_core::CryptoRngCore, zeroize::Zeroizing},
    SymmetricKey,
};

pub trait AE<const KEY_LENGTH: usize> {
    type Error: std::error::Error;

    /// Encrypts the given plaintext using the given key, binding the given
    /// associated data.
    fn encrypt(
        rng: &mut impl CryptoRngCore,
        key: &SymmetricKey<KEY_LENGTH>,
        ptx: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Self::Error>;

    /// Decrypts the given ciphertext using the given key.
    ///
    /// # Error
    ///
    /// Returns an error if the integrity of the ciphertext or of the
    /// associated data could not be verified.
    fn decrypt(
        key: &SymmetricKey<KEY_LENGTH>,
        ctx: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Self::Error>;
}
