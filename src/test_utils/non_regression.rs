//! Serialized key and ciphertext vectors.
//!
//! A vector written by one version of the crate must still decrypt with the
//! next one: keys, wrapped keys and record ciphertexts are stored in their
//! serialized form, base64-encoded in JSON.

use base64::{engine::general_purpose::STANDARD, Engine};
use cosmian_crypto_core::bytes_ser_de::Serializable;
use serde::{Deserialize, Serialize};

use crate::{
    abe_policy::AccessPolicy,
    core::{MasterSecretKey, PublicKey, UserSecretKey},
    kem::{KeyEncapsulationLayer, RecordCiphertext, WrappedKey},
    record::RecordId,
    Error,
};

fn decode(value: &str) -> Result<Vec<u8>, Error> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::ConversionFailed(format!("base64: {e}")))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserSecretKeyTestVector {
    attributes: Vec<String>,
    key: String,
}

impl UserSecretKeyTestVector {
    pub fn new(
        kem: &KeyEncapsulationLayer,
        msk: &MasterSecretKey,
        attributes: &[&str],
    ) -> Result<Self, Error> {
        let usk = kem.engine().keygen(msk, attributes)?;
        Ok(Self {
            attributes: attributes.iter().map(ToString::to_string).collect(),
            key: STANDARD.encode(&*usk.serialize()?),
        })
    }

    pub fn key(&self) -> Result<UserSecretKey, Error> {
        UserSecretKey::deserialize(&decode(&self.key)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordTestVector {
    record_id: String,
    policy: String,
    plaintext: String,
    wrapped_key: String,
    ciphertext: String,
}

impl RecordTestVector {
    pub fn new(
        kem: &KeyEncapsulationLayer,
        pk: &PublicKey,
        record_id: &str,
        policy: &str,
        plaintext: &str,
    ) -> Result<Self, Error> {
        let (wrapped_key, ciphertext) = kem.encrypt_record(
            pk,
            &AccessPolicy::parse(policy)?,
            &RecordId::from(record_id),
            plaintext.as_bytes(),
        )?;
        Ok(Self {
            record_id: record_id.to_string(),
            policy: policy.to_string(),
            plaintext: STANDARD.encode(plaintext),
            wrapped_key: STANDARD.encode(&*wrapped_key.serialize()?),
            ciphertext: STANDARD.encode(&*ciphertext.serialize()?),
        })
    }

    /// Decrypts the record with the given key and checks the plaintext.
    pub fn decrypt(&self, usk: &UserSecretKey) -> Result<(), Error> {
        let wrapped_key = WrappedKey::deserialize(&decode(&self.wrapped_key)?)?;
        assert_eq!(wrapped_key.policy(), &AccessPolicy::parse(&self.policy)?);
        let ciphertext = RecordCiphertext::deserialize(&decode(&self.ciphertext)?)?;
        let plaintext = KeyEncapsulationLayer::default().decrypt_record(
            usk,
            &RecordId::new(self.record_id.as_str()),
            &wrapped_key,
            &ciphertext,
        )?;
        assert_eq!(*plaintext, decode(&self.plaintext)?);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NonRegressionTestVector {
    public_key: String,
    master_secret_key: String,
    cardiology_doctor_key: UserSecretKeyTestVector,
    nurse_key: UserSecretKeyTestVector,
    admin_key: UserSecretKeyTestVector,
    cardiology_record: RecordTestVector,
    ward_record: RecordTestVector,
}

impl NonRegressionTestVector {
    pub fn new() -> Result<Self, Error> {
        let kem = KeyEncapsulationLayer::default();
        let (pk, msk) = kem.engine().setup();
        Ok(Self {
            public_key: STANDARD.encode(&*pk.serialize()?),
            master_secret_key: STANDARD.encode(&*msk.serialize()?),
            cardiology_doctor_key: UserSecretKeyTestVector::new(
                &kem,
                &msk,
                &["DOCTOR", "CARDIOLOGY"],
            )?,
            nurse_key: UserSecretKeyTestVector::new(&kem, &msk, &["NURSE", "WARD7"])?,
            admin_key: UserSecretKeyTestVector::new(&kem, &msk, &["ADMIN"])?,
            cardiology_record: RecordTestVector::new(
                &kem,
                &pk,
                "p1",
                "(DOCTOR and CARDIOLOGY) or ADMIN",
                "ECG: sinus rhythm",
            )?,
            ward_record: RecordTestVector::new(
                &kem,
                &pk,
                "p2",
                "NURSE and (WARD7 or WARD8)",
                "bed 12, fluids every 4h",
            )?,
        })
    }

    /// Checks that every key opens exactly the records its attributes grant.
    pub fn verify(&self) -> Result<(), Error> {
        PublicKey::deserialize(&decode(&self.public_key)?)?;
        MasterSecretKey::deserialize(&decode(&self.master_secret_key)?)?;

        let doctor = self.cardiology_doctor_key.key()?;
        let nurse = self.nurse_key.key()?;
        let admin = self.admin_key.key()?;

        self.cardiology_record.decrypt(&doctor)?;
        self.cardiology_record.decrypt(&admin)?;
        assert!(matches!(
            self.cardiology_record.decrypt(&nurse),
            Err(Error::AccessDenied)
        ));

        self.ward_record.decrypt(&nurse)?;
        assert!(matches!(
            self.ward_record.decrypt(&doctor),
            Err(Error::AccessDenied)
        ));
        assert!(matches!(
            self.ward_record.decrypt(&admin),
            Err(Error::AccessDenied)
        ));
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}
