//! Binds the per-record data keys to the attribute-based encryption.
//!
//! A record is encrypted with AES-256-GCM under a random data key, the record
//! identifier being bound as associated data. The data key is then sealed
//! under an access policy. Only the sealed form ever leaves this module.

use std::{fmt::Debug, time::Instant};

use cosmian_crypto_core::{
    bytes_ser_de::{to_leb128_len, Deserializer, Serializable, Serializer},
    reexport::rand_core::CryptoRngCore,
    Aes256Gcm, FixedSizeCBytes, SymmetricKey,
};
use tracing::debug;
use zeroize::Zeroizing;

use crate::{
    abe_policy::AccessPolicy,
    core::{
        api::AttributePolicyEngine, PolicyCiphertext, PublicKey, UserSecretKey, SYM_KEY_LENGTH,
    },
    record::RecordId,
    traits::AE,
    Error,
};

/// A data key sealed under an access policy. Publicly storable.
pub type WrappedKey = PolicyCiphertext;

/// Per-record symmetric key. Zeroized on drop.
pub struct DataKey(Zeroizing<[u8; SYM_KEY_LENGTH]>);

impl DataKey {
    #[must_use]
    pub fn random(rng: &mut impl CryptoRngCore) -> Self {
        let mut key = Zeroizing::new([0; SYM_KEY_LENGTH]);
        rng.fill_bytes(&mut *key);
        Self(key)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SYM_KEY_LENGTH] {
        &self.0
    }

    fn to_symmetric_key(&self) -> Result<SymmetricKey<SYM_KEY_LENGTH>, Error> {
        Ok(SymmetricKey::try_from_bytes(*self.0)?)
    }
}

impl From<Zeroizing<[u8; SYM_KEY_LENGTH]>> for DataKey {
    fn from(key: Zeroizing<[u8; SYM_KEY_LENGTH]>) -> Self {
        Self(key)
    }
}

impl PartialEq for DataKey {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey(..)")
    }
}

/// Authenticated encryption of a record: `nonce || ciphertext || tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCiphertext(Vec<u8>);

impl RecordCiphertext {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for RecordCiphertext {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serializable for RecordCiphertext {
    type Error = Error;

    fn length(&self) -> usize {
        to_leb128_len(self.0.len()) + self.0.len()
    }

    fn write(&self, ser: &mut Serializer) -> Result<usize, Self::Error> {
        Ok(ser.write_vec(&self.0)?)
    }

    fn read(de: &mut Deserializer) -> Result<Self, Self::Error> {
        Ok(Self(de.read_vec()?))
    }
}

#[derive(Debug, Default)]
pub struct KeyEncapsulationLayer {
    engine: AttributePolicyEngine,
}

impl KeyEncapsulationLayer {
    #[must_use]
    pub fn new(engine: AttributePolicyEngine) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &AttributePolicyEngine {
        &self.engine
    }

    #[must_use]
    pub fn generate_data_key(&self) -> DataKey {
        DataKey::random(&mut self.engine.fork_rng())
    }

    /// Seals the data key under the given access policy.
    pub fn wrap(
        &self,
        pk: &PublicKey,
        policy: &AccessPolicy,
        dk: &DataKey,
    ) -> Result<WrappedKey, Error> {
        self.engine.encrypt(pk, policy, dk.as_bytes())
    }

    /// Opens a sealed data key.
    ///
    /// # Errors
    ///
    /// `AccessDenied` if the user key does not satisfy the sealing policy.
    pub fn unwrap(&self, usk: &UserSecretKey, wrapped: &WrappedKey) -> Result<DataKey, Error> {
        self.engine.decrypt(usk, wrapped).map(DataKey::from)
    }

    /// Encrypts the record content under the data key.
    pub fn seal_record(
        &self,
        dk: &DataKey,
        record_id: &RecordId,
        plaintext: &[u8],
    ) -> Result<RecordCiphertext, Error> {
        let key = dk.to_symmetric_key()?;
        <Aes256Gcm as AE<SYM_KEY_LENGTH>>::encrypt(
            &mut self.engine.fork_rng(),
            &key,
            plaintext,
            record_id.as_bytes(),
        )
        .map(RecordCiphertext)
    }

    /// Decrypts the record content.
    ///
    /// # Errors
    ///
    /// `AeadAuthenticationFailure` if the ciphertext was tampered with, was
    /// produced for another record, or under another key.
    pub fn open_record(
        &self,
        dk: &DataKey,
        record_id: &RecordId,
        ciphertext: &RecordCiphertext,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let key = dk.to_symmetric_key()?;
        <Aes256Gcm as AE<SYM_KEY_LENGTH>>::decrypt(&key, &ciphertext.0, record_id.as_bytes())
    }

    /// Encrypts a record under a fresh data key and seals that key under the
    /// given policy. The data key does not outlive this call.
    pub fn encrypt_record(
        &self,
        pk: &PublicKey,
        policy: &AccessPolicy,
        record_id: &RecordId,
        plaintext: &[u8],
    ) -> Result<(WrappedKey, RecordCiphertext), Error> {
        let start = Instant::now();
        let dk = self.generate_data_key();
        let ciphertext = self.seal_record(&dk, record_id, plaintext)?;
        let wrapped = self.wrap(pk, policy, &dk)?;
        debug!(
            record = %record_id,
            elapsed_us = start.elapsed().as_micros() as u64,
            "record encrypted"
        );
        Ok((wrapped, ciphertext))
    }

    /// Opens the data key with the user key, then decrypts the record.
    ///
    /// `AccessDenied` and `AeadAuthenticationFailure` are kept distinct: the
    /// first is a policy decision, the second a corrupted ciphertext.
    pub fn decrypt_record(
        &self,
        usk: &UserSecretKey,
        record_id: &RecordId,
        wrapped: &WrappedKey,
        ciphertext: &RecordCiphertext,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let dk = self.unwrap(usk, wrapped)?;
        self.open_record(&dk, record_id, ciphertext)
    }

    /// Seals the data key of an existing record under a new policy.
    ///
    /// The caller must be able to open the current seal. The old wrapped key
    /// is left untouched: replacing it in storage is the caller's decision.
    pub fn reseal(
        &self,
        pk: &PublicKey,
        usk: &UserSecretKey,
        wrapped: &WrappedKey,
        new_policy: &AccessPolicy,
    ) -> Result<WrappedKey, Error> {
        let dk = self.unwrap(usk, wrapped)?;
        self.wrap(pk, new_policy, &dk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() -> Result<(), Error> {
        let kem = KeyEncapsulationLayer::default();
        let (pk, msk) = kem.engine().setup();
        let doctor = kem.engine().keygen(&msk, &["DOCTOR", "CARDIOLOGY"])?;
        let nurse = kem.engine().keygen(&msk, &["NURSE"])?;

        let record_id = RecordId::from("p1");
        let policy = AccessPolicy::parse("DOCTOR and CARDIOLOGY")?;
        let (wrapped, ciphertext) =
            kem.encrypt_record(&pk, &policy, &record_id, b"blood pressure 140/90")?;

        assert_eq!(
            &*kem.decrypt_record(&doctor, &record_id, &wrapped, &ciphertext)?,
            b"blood pressure 140/90"
        );
        assert!(matches!(
            kem.decrypt_record(&nurse, &record_id, &wrapped, &ciphertext),
            Err(Error::AccessDenied)
        ));
        Ok(())
    }

    #[test]
    fn test_tampering_is_not_access_denied() -> Result<(), Error> {
        let kem = KeyEncapsulationLayer::default();
        let (pk, msk) = kem.engine().setup();
        let usk = kem.engine().keygen(&msk, &["DOCTOR"])?;
        let record_id = RecordId::from("p1");
        let (wrapped, ciphertext) = kem.encrypt_record(
            &pk,
            &AccessPolicy::parse("DOCTOR")?,
            &record_id,
            b"allergy: penicillin",
        )?;

        let mut tampered = ciphertext.as_bytes().to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x80;
        assert!(matches!(
            kem.decrypt_record(&usk, &record_id, &wrapped, &tampered.into()),
            Err(Error::AeadAuthenticationFailure)
        ));

        // a ciphertext moved to another record id does not authenticate
        assert!(matches!(
            kem.decrypt_record(&usk, &RecordId::from("p2"), &wrapped, &ciphertext),
            Err(Error::AeadAuthenticationFailure)
        ));
        Ok(())
    }

    #[test]
    fn test_unwrap_and_reseal() -> Result<(), Error> {
        let kem = KeyEncapsulationLayer::default();
        let (pk, msk) = kem.engine().setup();
        let admin = kem.engine().keygen(&msk, &["ADMIN"])?;
        let nurse = kem.engine().keygen(&msk, &["NURSE"])?;

        let dk = kem.generate_data_key();
        let wrapped = kem.wrap(&pk, &AccessPolicy::parse("ADMIN")?, &dk)?;
        assert_eq!(kem.unwrap(&admin, &wrapped)?, dk);
        assert!(matches!(kem.unwrap(&nurse, &wrapped), Err(Error::AccessDenied)));

        let resealed = kem.reseal(&pk, &admin, &wrapped, &AccessPolicy::parse("ADMIN or NURSE")?)?;
        assert_eq!(kem.unwrap(&nurse, &resealed)?, dk);
        // the first seal is unchanged
        assert!(matches!(kem.unwrap(&nurse, &wrapped), Err(Error::AccessDenied)));
        Ok(())
    }
}
