use cosmian_crypto_core::{
    reexport::{rand_core::CryptoRngCore, zeroize::Zeroizing},
    Aes256Gcm, Dem, FixedSizeCBytes, Instantiable, Nonce, RandomFixedSizeCBytes, SymmetricKey,
};

use crate::{core::SYM_KEY_LENGTH, traits::AE, Error};

/// AES-GCM nonce length: 96 bits.
pub const NONCE_LENGTH: usize = 12;

/// AES-GCM tag length.
pub const MAC_LENGTH: usize = 16;

/// The ciphertext layout is `nonce || ciphertext || tag`, with a fresh random
/// nonce for every encryption.
impl AE<SYM_KEY_LENGTH> for Aes256Gcm {
    type Error = Error;

    fn encrypt(
        rng: &mut impl CryptoRngCore,
        key: &SymmetricKey<SYM_KEY_LENGTH>,
        ptx: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let nonce = Nonce::<NONCE_LENGTH>::new(&mut *rng);
        let ciphertext = Self::new(key).encrypt(&nonce, ptx, Some(aad))?;
        Ok([nonce.as_bytes(), &ciphertext].concat())
    }

    fn decrypt(
        key: &SymmetricKey<SYM_KEY_LENGTH>,
        ctx: &[u8],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        if ctx.len() < NONCE_LENGTH + MAC_LENGTH {
            return Err(Error::AeadAuthenticationFailure);
        }
        let nonce = Nonce::try_from_slice(&ctx[..NONCE_LENGTH])?;
        Self::new(key)
            .decrypt(&nonce, &ctx[NONCE_LENGTH..], Some(aad))
            .map_err(|_| Error::AeadAuthenticationFailure)
            .map(Zeroizing::new)
    }
}
