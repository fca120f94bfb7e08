use std::{collections::HashSet, time::Instant};

use cosmian_crypto_core::{
    reexport::rand_core::{RngCore, SeedableRng},
    CsRng,
};
use parking_lot::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

use super::{
    primitives::{decrypt, encrypt, keygen, setup},
    MasterSecretKey, PolicyCiphertext, PublicKey, UserSecretKey, SYM_KEY_LENGTH,
};
use crate::{
    abe_policy::{AccessPolicy, Attribute},
    Error,
};

/// Attribute-based encryption engine.
///
/// The engine only owns a CSPRNG. Each operation forks a private generator
/// from it so that the lock is released before any pairing is computed, and
/// unrelated calls run in parallel.
#[derive(Debug)]
pub struct AttributePolicyEngine {
    rng: Mutex<CsRng>,
}

impl Default for AttributePolicyEngine {
    fn default() -> Self {
        Self {
            rng: Mutex::new(CsRng::from_entropy()),
        }
    }
}

impl AttributePolicyEngine {
    pub(crate) fn fork_rng(&self) -> CsRng {
        let mut seed = Zeroizing::new(<CsRng as SeedableRng>::Seed::default());
        self.rng.lock().fill_bytes(&mut *seed);
        CsRng::from_seed(*seed)
    }

    /// Generates the public key and the master secret key.
    ///
    /// This is done once, by the authority, for the lifetime of the system.
    pub fn setup(&self) -> (PublicKey, MasterSecretKey) {
        let start = Instant::now();
        let keys = setup(&mut self.fork_rng());
        debug!(elapsed_us = start.elapsed().as_micros() as u64, "abe setup");
        keys
    }

    /// Issues a user secret key for the given attribute tokens.
    ///
    /// # Errors
    ///
    /// `InvalidAttribute` if any token is malformed. No key is issued in this
    /// case, even for the valid tokens.
    pub fn keygen(
        &self,
        msk: &MasterSecretKey,
        attributes: &[&str],
    ) -> Result<UserSecretKey, Error> {
        let attributes = attributes
            .iter()
            .map(|token| Attribute::new(token))
            .collect::<Result<HashSet<_>, _>>()?;
        let start = Instant::now();
        let usk = keygen(&mut self.fork_rng(), msk, &attributes)?;
        debug!(
            n_attributes = attributes.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "abe keygen"
        );
        Ok(usk)
    }

    /// Encrypts the given key under the given access policy.
    pub fn encrypt(
        &self,
        pk: &PublicKey,
        policy: &AccessPolicy,
        plaintext: &[u8; SYM_KEY_LENGTH],
    ) -> Result<PolicyCiphertext, Error> {
        let start = Instant::now();
        let ct = encrypt(&mut self.fork_rng(), pk, policy, plaintext)?;
        debug!(
            n_leaves = ct.leaves.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "abe encrypt"
        );
        Ok(ct)
    }

    /// Attempts decrypting the given ciphertext with the given user key.
    ///
    /// # Errors
    ///
    /// `AccessDenied` if the user attributes do not satisfy the ciphertext
    /// policy.
    pub fn decrypt(
        &self,
        usk: &UserSecretKey,
        ciphertext: &PolicyCiphertext,
    ) -> Result<Zeroizing<[u8; SYM_KEY_LENGTH]>, Error> {
        let start = Instant::now();
        let res = decrypt(usk, ciphertext);
        debug!(
            n_leaves = ciphertext.leaves.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "abe decrypt"
        );
        res
    }
}
