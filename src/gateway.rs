//! Storage-holder role.
//!
//! The gateway keeps, for every record, the record ciphertext, the wrapped
//! data key and the encrypted index. It answers searches and hands out the
//! public artefacts but holds no key and never decrypts anything.

use std::{collections::HashMap, sync::Arc, time::Instant};

use cosmian_crypto_core::bytes_ser_de::{Deserializer, Serializable, Serializer};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    dsse::{EncryptedIndex, IndexUpdate, SearchOutcome, SearchToken},
    kem::{RecordCiphertext, WrappedKey},
    record::RecordId,
    Error,
};

/// Everything stored for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub ciphertext: RecordCiphertext,
    pub wrapped_key: WrappedKey,
    pub index: EncryptedIndex,
}

impl Serializable for RecordEntry {
    type Error = Error;

    fn length(&self) -> usize {
        self.ciphertext.length() + self.wrapped_key.length() + self.index.length()
    }

    fn write(&self, ser: &mut Serializer) -> Result<usize, Self::Error> {
        Ok(self.ciphertext.write(ser)? + self.wrapped_key.write(ser)? + self.index.write(ser)?)
    }

    fn read(de: &mut Deserializer) -> Result<Self, Self::Error> {
        Ok(Self {
            ciphertext: RecordCiphertext::read(de)?,
            wrapped_key: WrappedKey::read(de)?,
            index: EncryptedIndex::read(de)?,
        })
    }
}

#[derive(Debug, Default)]
pub struct StorageGateway {
    records: RwLock<HashMap<RecordId, Arc<RwLock<RecordEntry>>>>,
}

impl StorageGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    #[must_use]
    pub fn contains(&self, record_id: &RecordId) -> bool {
        self.records.read().contains_key(record_id)
    }

    fn entry(&self, record_id: &RecordId) -> Option<Arc<RwLock<RecordEntry>>> {
        self.records.read().get(record_id).cloned()
    }

    /// Stores the given record. A record stored under the same identifier is
    /// replaced as a whole.
    pub fn store(
        &self,
        record_id: RecordId,
        ciphertext: RecordCiphertext,
        wrapped_key: WrappedKey,
        index: EncryptedIndex,
    ) {
        debug!(record = %record_id, n_labels = index.len(), "record stored");
        self.records.write().insert(
            record_id,
            Arc::new(RwLock::new(RecordEntry {
                ciphertext,
                wrapped_key,
                index,
            })),
        );
    }

    /// Merges an index update sent by the owner into the index of the given
    /// record.
    pub fn apply_update(&self, record_id: &RecordId, update: &IndexUpdate) -> Result<(), Error> {
        let entry = self
            .entry(record_id)
            .ok_or_else(|| Error::UnknownRecord(record_id.to_string()))?;
        let res = entry.write().index.apply(update);
        if let Err(e) = &res {
            warn!(record = %record_id, error = %e, "index update rejected");
        }
        res
    }

    /// Searches the index of the given record.
    ///
    /// Unknown records, stale tokens and keywords that were never indexed all
    /// give `NoMatch`.
    pub fn search(&self, record_id: &RecordId, token: &SearchToken) -> SearchOutcome {
        let start = Instant::now();
        let outcome = self
            .entry(record_id)
            .map_or(SearchOutcome::NoMatch, |entry| entry.read().index.search(token));
        debug!(
            record = %record_id,
            elapsed_us = start.elapsed().as_micros() as u64,
            "search"
        );
        outcome
    }

    /// Removes the ciphertext, the wrapped key and the index of the given
    /// record at once. Other records are left untouched.
    pub fn delete(&self, record_id: &RecordId) -> bool {
        let removed = self.records.write().remove(record_id).is_some();
        debug!(record = %record_id, removed, "record deleted");
        removed
    }

    #[must_use]
    pub fn wrapped_key(&self, record_id: &RecordId) -> Option<WrappedKey> {
        self.entry(record_id)
            .map(|entry| entry.read().wrapped_key.clone())
    }

    #[must_use]
    pub fn record_ciphertext(&self, record_id: &RecordId) -> Option<RecordCiphertext> {
        self.entry(record_id)
            .map(|entry| entry.read().ciphertext.clone())
    }

    /// Serializes the entry of the given record for a durable store.
    pub fn export_record(&self, record_id: &RecordId) -> Result<Vec<u8>, Error> {
        let entry = self
            .entry(record_id)
            .ok_or_else(|| Error::UnknownRecord(record_id.to_string()))?;
        let bytes = entry.read().serialize()?;
        Ok(bytes.to_vec())
    }

    /// Stores a serialized entry, replacing any entry of the same record.
    pub fn import_record(&self, record_id: RecordId, bytes: &[u8]) -> Result<(), Error> {
        let entry = RecordEntry::deserialize(bytes)?;
        self.store(record_id, entry.ciphertext, entry.wrapped_key, entry.index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record::Posting, test_utils::Clinic};

    #[test]
    fn test_search_is_scoped_to_the_record() -> Result<(), Error> {
        let clinic = Clinic::new();
        let p1 = clinic.ingest("p1", "DOCTOR", b"p1", &["diabetes"])?;
        let p2 = clinic.ingest("p2", "DOCTOR", b"p2", &["diabetes"])?;

        let token = clinic.owner.generate_token(&p1, "diabetes")?;
        assert!(clinic.gateway.search(&p1, &token).is_match());
        assert_eq!(clinic.gateway.search(&p2, &token), SearchOutcome::NoMatch);
        assert_eq!(
            clinic.gateway.search(&RecordId::from("p3"), &token),
            SearchOutcome::NoMatch
        );
        Ok(())
    }

    #[test]
    fn test_apply_update() -> Result<(), Error> {
        let clinic = Clinic::new();
        let p1 = clinic.ingest("p1", "DOCTOR", b"p1", &["diabetes"])?;
        let stale = clinic.owner.generate_token(&p1, "diabetes")?;

        let update = clinic.owner.add_keywords(
            &p1,
            &["diabetes", "hypertension"],
            &Posting::from("visit-2"),
        )?;
        clinic.gateway.apply_update(&p1, &update)?;
        assert_eq!(clinic.gateway.search(&p1, &stale), SearchOutcome::NoMatch);
        assert_eq!(clinic.search(&p1, "diabetes")?.postings().len(), 2);
        assert!(clinic.search(&p1, "hypertension")?.is_match());
        assert!(matches!(
            clinic.gateway.apply_update(&RecordId::from("p9"), &update),
            Err(Error::UnknownRecord(_))
        ));
        Ok(())
    }

    #[test]
    fn test_delete_is_selective() -> Result<(), Error> {
        let clinic = Clinic::new();
        let p1 = clinic.ingest("p1", "DOCTOR", b"p1", &["diabetes"])?;
        let p2 = clinic.ingest("p2", "DOCTOR", b"p2", &["diabetes"])?;
        let token = clinic.owner.generate_token(&p1, "diabetes")?;

        assert!(clinic.gateway.delete(&p1));
        assert!(!clinic.gateway.delete(&p1));
        assert!(!clinic.gateway.contains(&p1));
        assert!(clinic.gateway.wrapped_key(&p1).is_none());
        assert!(clinic.gateway.record_ciphertext(&p1).is_none());
        assert_eq!(clinic.gateway.search(&p1, &token), SearchOutcome::NoMatch);

        assert_eq!(clinic.gateway.len(), 1);
        assert!(clinic.search(&p2, "diabetes")?.is_match());
        Ok(())
    }

    #[test]
    fn test_store_is_idempotent() -> Result<(), Error> {
        let clinic = Clinic::new();
        let p1 = clinic.ingest("p1", "DOCTOR", b"p1", &["diabetes"])?;
        let bytes = clinic.gateway.export_record(&p1)?;
        clinic.gateway.import_record(p1.clone(), &bytes)?;
        clinic.gateway.import_record(p1.clone(), &bytes)?;
        assert_eq!(clinic.gateway.len(), 1);
        assert_eq!(clinic.gateway.export_record(&p1)?.len(), bytes.len());
        assert!(clinic.search(&p1, "diabetes")?.is_match());
        Ok(())
    }

    #[test]
    fn test_export_import() -> Result<(), Error> {
        let clinic = Clinic::new();
        let p1 = clinic.ingest("p1", "DOCTOR", b"p1", &["diabetes", "asthma"])?;
        let bytes = clinic.gateway.export_record(&p1)?;

        let other = StorageGateway::new();
        other.import_record(p1.clone(), &bytes)?;
        assert_eq!(other.wrapped_key(&p1), clinic.gateway.wrapped_key(&p1));
        assert_eq!(
            other.record_ciphertext(&p1),
            clinic.gateway.record_ciphertext(&p1)
        );
        assert!(other
            .search(&p1, &clinic.owner.generate_token(&p1, "asthma")?)
            .is_match());
        assert!(matches!(
            other.export_record(&RecordId::from("p2")),
            Err(Error::UnknownRecord(_))
        ));
        assert!(RecordEntry::deserialize(&bytes[..bytes.len() - 1]).is_err());
        Ok(())
    }
}
