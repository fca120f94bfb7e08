use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};

use cosmian_crypto_core::{reexport::rand_core::SeedableRng, Aes256Gcm, CsRng};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    index::{IndexEntry, IndexUpdate},
    normalize_keyword, normalize_keywords,
    prf::{Generation, IndexKey, SearchToken, TokenContext},
};
use crate::{
    core::SYM_KEY_LENGTH,
    record::{Posting, RecordId},
    traits::AE,
    Error,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct KeywordCounter {
    counter: u64,
    /// Whether the label of `counter` holds postings on the storage side.
    live: bool,
}

/// Owner-side state of one record index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordState {
    generation: Generation,
    counters: HashMap<String, KeywordCounter>,
}

impl RecordState {
    fn new(generation: Generation) -> Self {
        Self {
            generation,
            counters: HashMap::new(),
        }
    }

    fn keyword(&self, keyword: &str) -> KeywordCounter {
        self.counters.get(keyword).copied().unwrap_or_default()
    }

    fn context(&self, keyword: &str) -> TokenContext {
        TokenContext {
            generation: self.generation,
            counter: self.keyword(keyword).counter,
        }
    }
}

fn next_counter(counter: u64) -> Result<u64, Error> {
    counter
        .checked_add(1)
        .ok_or_else(|| Error::ConversionFailed("keyword counter overflow".to_string()))
}

/// Owner of the per-record forward-private indexes.
///
/// Every keyword of a record has a counter that is incremented each time the
/// keyword is indexed again. Labels are derived from the current counter and
/// the previous label is retired, so that tokens issued before an update do
/// not match anything written after it.
///
/// Each record state has its own lock: updates of a same record are
/// serialized, updates of distinct records run in parallel. The storage side
/// must apply the updates of a record in the order they were returned.
#[derive(Debug)]
pub struct PatientIndexStore {
    key: IndexKey,
    rng: Mutex<CsRng>,
    records: RwLock<HashMap<RecordId, Arc<Mutex<RecordState>>>>,
}

impl PatientIndexStore {
    #[must_use]
    pub fn new(key: IndexKey) -> Self {
        Self {
            key,
            rng: Mutex::new(CsRng::from_entropy()),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a store with a fresh random index key.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = CsRng::from_entropy();
        let key = IndexKey::random(&mut rng);
        Self {
            key,
            rng: Mutex::new(rng),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// The index key, to be shared with the user roles allowed to search.
    #[must_use]
    pub fn index_key(&self) -> &IndexKey {
        &self.key
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

    fn state(&self, record_id: &RecordId) -> Result<Arc<Mutex<RecordState>>, Error> {
        self.records
            .read()
            .get(record_id)
            .cloned()
            .ok_or_else(|| Error::UnknownRecord(record_id.to_string()))
    }

    fn state_or_create(&self, record_id: &RecordId) -> Arc<Mutex<RecordState>> {
        if let Some(state) = self.records.read().get(record_id) {
            return state.clone();
        }
        self.records
            .write()
            .entry(record_id.clone())
            .or_insert_with(|| {
                let generation = Generation::random(&mut *self.rng.lock());
                Arc::new(Mutex::new(RecordState::new(generation)))
            })
            .clone()
    }

    /// Indexes the given keywords of a record under the given posting.
    ///
    /// The record index is created if needed. Keywords are trimmed and
    /// lower-cased; empty keywords are skipped.
    pub fn add_keywords<S: AsRef<str>>(
        &self,
        record_id: &RecordId,
        keywords: &[S],
        posting: &Posting,
    ) -> Result<IndexUpdate, Error> {
        let start = Instant::now();
        let keywords = normalize_keywords(keywords);
        let state = self.state_or_create(record_id);
        let mut state = state.lock();

        let mut update = IndexUpdate::default();
        let mut counters = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let KeywordCounter { counter, live } = state.keyword(&keyword);
            let next = next_counter(counter)?;
            update.entries.push(IndexEntry {
                label: self
                    .key
                    .derive_label(record_id, &state.generation, &keyword, next),
                previous: live.then(|| {
                    self.key
                        .derive_label(record_id, &state.generation, &keyword, counter)
                }),
                posting: posting.clone(),
            });
            counters.push((
                keyword,
                KeywordCounter {
                    counter: next,
                    live: true,
                },
            ));
        }
        state.counters.extend(counters);
        // label order, not keyword order
        update.entries.sort_by(|a, b| a.label.cmp(&b.label));

        debug!(
            record = %record_id,
            n_keywords = update.entries.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "index update"
        );
        Ok(update)
    }

    /// Retires the current labels of the given keywords.
    ///
    /// Their counters move forward so that tokens issued before the removal
    /// stop matching. Keywords that are not indexed are ignored.
    pub fn remove_keywords<S: AsRef<str>>(
        &self,
        record_id: &RecordId,
        keywords: &[S],
    ) -> Result<IndexUpdate, Error> {
        let state = self.state(record_id)?;
        let mut state = state.lock();

        let mut update = IndexUpdate::default();
        let mut counters = Vec::new();
        for keyword in normalize_keywords(keywords) {
            let KeywordCounter { counter, live } = state.keyword(&keyword);
            if !live {
                continue;
            }
            update.removals.push(
                self.key
                    .derive_label(record_id, &state.generation, &keyword, counter),
            );
            counters.push((
                keyword,
                KeywordCounter {
                    counter: next_counter(counter)?,
                    live: false,
                },
            ));
        }
        state.counters.extend(counters);
        update.removals.sort();

        debug!(
            record = %record_id,
            n_keywords = update.removals.len(),
            "index removal"
        );
        Ok(update)
    }

    /// Forgets the record. Indexing it again starts a new generation.
    pub fn remove_record(&self, record_id: &RecordId) -> bool {
        let removed = self.records.write().remove(record_id).is_some();
        if removed {
            debug!(record = %record_id, "index state removed");
        }
        removed
    }

    /// Returns the token matching the current label of the given keyword.
    ///
    /// For a keyword never indexed, the token matches nothing.
    pub fn generate_token(
        &self,
        record_id: &RecordId,
        keyword: &str,
    ) -> Result<SearchToken, Error> {
        let context = self.token_context(record_id, keyword)?;
        Ok(self.key.derive_token(record_id, keyword, &context))
    }

    /// Returns what a user role needs to derive a token with
    /// `IndexKey::derive_token`.
    pub fn token_context(&self, record_id: &RecordId, keyword: &str) -> Result<TokenContext, Error> {
        let keyword = normalize_keyword(keyword).unwrap_or_default();
        Ok(self.state(record_id)?.lock().context(&keyword))
    }

    /// Exports the state of the given record, sealed under a key derived from
    /// the index key.
    pub fn seal_state(&self, record_id: &RecordId) -> Result<Vec<u8>, Error> {
        let state = self.state(record_id)?;
        let json = serde_json::to_vec(&*state.lock())?;
        let key = self.key.derive_state_key(record_id)?;
        <Aes256Gcm as AE<SYM_KEY_LENGTH>>::encrypt(
            &mut *self.rng.lock(),
            &key,
            &json,
            record_id.as_bytes(),
        )
    }

    /// Restores the state of the given record, replacing the current one.
    ///
    /// # Errors
    ///
    /// `AeadAuthenticationFailure` if the blob was tampered with or sealed for
    /// another record.
    pub fn open_state(&self, record_id: &RecordId, sealed: &[u8]) -> Result<(), Error> {
        let key = self.key.derive_state_key(record_id)?;
        let json = <Aes256Gcm as AE<SYM_KEY_LENGTH>>::decrypt(&key, sealed, record_id.as_bytes())?;
        let state = serde_json::from_slice::<RecordState>(&json)?;
        self.records
            .write()
            .insert(record_id.clone(), Arc::new(Mutex::new(state)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::dsse::{EncryptedIndex, SearchOutcome};

    fn ingest(
        store: &PatientIndexStore,
        record_id: &RecordId,
        keywords: &[&str],
        posting: &str,
    ) -> Result<EncryptedIndex, Error> {
        EncryptedIndex::from_update(&store.add_keywords(
            record_id,
            keywords,
            &Posting::from(posting),
        )?)
    }

    #[test]
    fn test_add_then_search() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let index = ingest(&store, &p1, &["diabetes", "hypertension"], "visit-1")?;

        let outcome = index.search(&store.generate_token(&p1, "diabetes")?);
        assert_eq!(outcome.postings(), [Posting::from("visit-1")]);
        assert!(index
            .search(&store.generate_token(&p1, "Hypertension ")?)
            .is_match());
        assert_eq!(
            index.search(&store.generate_token(&p1, "asthma")?),
            SearchOutcome::NoMatch
        );
        Ok(())
    }

    #[test]
    fn test_stale_token_does_not_match() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let mut index = ingest(&store, &p1, &["diabetes"], "visit-1")?;
        let stale = store.generate_token(&p1, "diabetes")?;

        index.apply(&store.add_keywords(&p1, &["diabetes"], &Posting::from("visit-2"))?)?;
        assert_eq!(index.search(&stale), SearchOutcome::NoMatch);
        assert_eq!(
            index
                .search(&store.generate_token(&p1, "diabetes")?)
                .postings(),
            [Posting::from("visit-1"), Posting::from("visit-2")]
        );
        assert_eq!(store.token_context(&p1, "diabetes")?.counter, 2);
        Ok(())
    }

    #[test]
    fn test_records_are_isolated() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let p2 = RecordId::from("p2");
        let index_1 = ingest(&store, &p1, &["diabetes"], "visit-1")?;
        let index_2 = ingest(&store, &p2, &["diabetes"], "visit-1")?;

        let token_1 = store.generate_token(&p1, "diabetes")?;
        let token_2 = store.generate_token(&p2, "diabetes")?;
        assert_ne!(token_1, token_2);
        assert!(index_1.search(&token_1).is_match());
        assert_eq!(index_2.search(&token_1), SearchOutcome::NoMatch);
        assert_eq!(index_1.search(&token_2), SearchOutcome::NoMatch);
        Ok(())
    }

    #[test]
    fn test_user_derived_token() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let index = ingest(&store, &p1, &["asthma"], "visit-1")?;

        let user_key = IndexKey::from_bytes(*store.index_key().as_bytes());
        let context = store.token_context(&p1, "asthma")?;
        let token = user_key.derive_token(&p1, "asthma", &context);
        assert_eq!(token, store.generate_token(&p1, "asthma")?);
        assert!(index.search(&token).is_match());
        Ok(())
    }

    #[test]
    fn test_remove_keywords() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let mut index = ingest(&store, &p1, &["diabetes", "asthma"], "visit-1")?;
        let old = store.generate_token(&p1, "diabetes")?;

        let update = store.remove_keywords(&p1, &["diabetes", "never-added"])?;
        assert_eq!(update.retired_labels().count(), 1);
        index.apply(&update)?;
        assert!(store.remove_keywords(&p1, &["diabetes"])?.is_empty());
        assert_eq!(index.search(&old), SearchOutcome::NoMatch);
        assert_eq!(
            index.search(&store.generate_token(&p1, "diabetes")?),
            SearchOutcome::NoMatch
        );
        assert!(index.search(&store.generate_token(&p1, "asthma")?).is_match());

        index.apply(&store.add_keywords(&p1, &["diabetes"], &Posting::from("visit-2"))?)?;
        assert_eq!(
            index
                .search(&store.generate_token(&p1, "diabetes")?)
                .postings(),
            [Posting::from("visit-2")]
        );

        assert!(matches!(
            store.remove_keywords(&RecordId::from("p9"), &["diabetes"]),
            Err(Error::UnknownRecord(_))
        ));
        Ok(())
    }

    #[test]
    fn test_reingested_record_starts_fresh() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        ingest(&store, &p1, &["diabetes"], "visit-1")?;
        let old = store.generate_token(&p1, "diabetes")?;

        assert!(store.remove_record(&p1));
        assert!(!store.remove_record(&p1));
        assert!(matches!(
            store.generate_token(&p1, "diabetes"),
            Err(Error::UnknownRecord(_))
        ));

        let index = ingest(&store, &p1, &["diabetes"], "visit-9")?;
        assert_eq!(store.token_context(&p1, "diabetes")?.counter, 1);
        assert_eq!(index.search(&old), SearchOutcome::NoMatch);
        assert_eq!(
            index
                .search(&store.generate_token(&p1, "diabetes")?)
                .postings(),
            [Posting::from("visit-9")]
        );
        Ok(())
    }

    #[test]
    fn test_sealed_state() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let index = ingest(&store, &p1, &["diabetes"], "visit-1")?;
        let sealed = store.seal_state(&p1)?;
        assert!(!sealed.windows(b"diabetes".len()).any(|w| w == b"diabetes"));

        // a new owner process holding the same index key
        let restored = PatientIndexStore::new(store.index_key().clone());
        assert!(matches!(
            restored.open_state(&RecordId::from("p2"), &sealed),
            Err(Error::AeadAuthenticationFailure)
        ));
        let mut tampered = sealed.clone();
        tampered[20] ^= 1;
        assert!(matches!(
            restored.open_state(&p1, &tampered),
            Err(Error::AeadAuthenticationFailure)
        ));

        restored.open_state(&p1, &sealed)?;
        assert!(index
            .search(&restored.generate_token(&p1, "diabetes")?)
            .is_match());
        Ok(())
    }

    #[test]
    fn test_concurrent_updates_of_one_record() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let n_threads = 8;

        let updates = std::thread::scope(|s| {
            let handles = (0..n_threads)
                .map(|i| {
                    let (store, p1) = (&store, &p1);
                    s.spawn(move || {
                        store.add_keywords(p1, &["diabetes"], &Posting::new(format!("visit-{i}")))
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread panicked"))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let labels = updates
            .iter()
            .flat_map(IndexUpdate::inserted_labels)
            .collect::<HashSet<_>>();
        assert_eq!(labels.len(), n_threads);
        assert_eq!(
            store.token_context(&p1, "diabetes")?.counter,
            n_threads as u64
        );

        // delivered in thread completion order, retried until accepted
        let mut index = EncryptedIndex::new();
        let mut pending = updates;
        while !pending.is_empty() {
            let n_pending = pending.len();
            pending.retain(|update| index.apply(update).is_err());
            assert!(pending.len() < n_pending);
        }
        assert_eq!(index.len(), 1);
        assert_eq!(
            index
                .search(&store.generate_token(&p1, "diabetes")?)
                .postings()
                .len(),
            n_threads
        );
        Ok(())
    }

    #[test]
    fn test_updates_delivered_out_of_order() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let first = store.add_keywords(&p1, &["diabetes"], &Posting::from("v1"))?;
        let mut index = EncryptedIndex::from_update(&first)?;
        let second = store.add_keywords(&p1, &["diabetes"], &Posting::from("v2"))?;
        let stale = store.generate_token(&p1, "diabetes")?;
        let third = store.add_keywords(&p1, &["diabetes"], &Posting::from("v3"))?;

        assert!(matches!(
            index.apply(&third),
            Err(Error::OutOfOrderUpdate(_))
        ));
        index.apply(&second)?;
        index.apply(&third)?;
        assert!(matches!(
            index.apply(&second),
            Err(Error::OutOfOrderUpdate(_))
        ));

        assert_eq!(index.search(&stale), SearchOutcome::NoMatch);
        assert_eq!(
            index
                .search(&store.generate_token(&p1, "diabetes")?)
                .postings(),
            [Posting::from("v1"), Posting::from("v2"), Posting::from("v3")]
        );
        Ok(())
    }

    #[test]
    fn test_update_labels_are_not_in_keyword_order() -> Result<(), Error> {
        let store = PatientIndexStore::generate();
        let p1 = RecordId::from("p1");
        let keywords = ["asthma", "diabetes", "hypertension", "insulin", "metformin"];
        let update = store.add_keywords(&p1, &keywords, &Posting::from("visit-1"))?;

        let labels = update.inserted_labels().copied().collect::<Vec<_>>();
        let mut sorted = labels.clone();
        sorted.sort();
        assert_eq!(labels, sorted);

        let removal = store.remove_keywords(&p1, &keywords)?;
        let retired = removal.retired_labels().copied().collect::<Vec<_>>();
        let mut sorted = retired.clone();
        sorted.sort();
        assert_eq!(retired, sorted);
        Ok(())
    }
}
