use zeroize::Zeroizing;

use crate::{
    abe_policy::AccessPolicy,
    core::{MasterSecretKey, PublicKey, UserSecretKey},
    dsse::{EncryptedIndex, PatientIndexStore, SearchOutcome},
    gateway::StorageGateway,
    kem::KeyEncapsulationLayer,
    record::{Posting, RecordId},
    Error,
};

pub mod non_regression;

/// Every role of the system, wired together in one process.
#[derive(Debug)]
pub struct Clinic {
    pub kem: KeyEncapsulationLayer,
    pub pk: PublicKey,
    pub msk: MasterSecretKey,
    pub owner: PatientIndexStore,
    pub gateway: StorageGateway,
}

impl Default for Clinic {
    fn default() -> Self {
        Self::new()
    }
}

impl Clinic {
    #[must_use]
    pub fn new() -> Self {
        let kem = KeyEncapsulationLayer::default();
        let (pk, msk) = kem.engine().setup();
        Self {
            kem,
            pk,
            msk,
            owner: PatientIndexStore::generate(),
            gateway: StorageGateway::new(),
        }
    }

    pub fn issue(&self, attributes: &[&str]) -> Result<UserSecretKey, Error> {
        self.kem.engine().keygen(&self.msk, attributes)
    }

    /// Encrypts and indexes a record, then stores it.
    pub fn ingest(
        &self,
        record_id: &str,
        policy: &str,
        content: &[u8],
        keywords: &[&str],
    ) -> Result<RecordId, Error> {
        let record_id = RecordId::from(record_id);
        let update = self
            .owner
            .add_keywords(&record_id, keywords, &Posting::from("ingest"))?;
        let (wrapped_key, ciphertext) = self.kem.encrypt_record(
            &self.pk,
            &AccessPolicy::parse(policy)?,
            &record_id,
            content,
        )?;
        self.gateway.store(
            record_id.clone(),
            ciphertext,
            wrapped_key,
            EncryptedIndex::from_update(&update)?,
        );
        Ok(record_id)
    }

    /// Indexes new keywords of a stored record.
    pub fn index(
        &self,
        record_id: &RecordId,
        keywords: &[&str],
        posting: &str,
    ) -> Result<(), Error> {
        let update = self
            .owner
            .add_keywords(record_id, keywords, &Posting::from(posting))?;
        self.gateway.apply_update(record_id, &update)
    }

    /// Removes a record from the gateway and from the owner.
    pub fn forget(&self, record_id: &RecordId) -> bool {
        let removed = self.gateway.delete(record_id);
        self.owner.remove_record(record_id) || removed
    }

    /// Searches a record with a token derived from the current counter.
    pub fn search(&self, record_id: &RecordId, keyword: &str) -> Result<SearchOutcome, Error> {
        let token = self.owner.generate_token(record_id, keyword)?;
        Ok(self.gateway.search(record_id, &token))
    }

    /// Fetches a record from the gateway and decrypts it.
    pub fn read(
        &self,
        usk: &UserSecretKey,
        record_id: &RecordId,
    ) -> Result<Zeroizing<Vec<u8>>, Error> {
        let unknown = || Error::UnknownRecord(record_id.to_string());
        let wrapped_key = self.gateway.wrapped_key(record_id).ok_or_else(unknown)?;
        let ciphertext = self
            .gateway
            .record_ciphertext(record_id)
            .ok_or_else(unknown)?;
        self.kem
            .decrypt_record(usk, record_id, &wrapped_key, &ciphertext)
    }
}
