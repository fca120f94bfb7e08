//! Single index shared by all records.
//!
//! Only used as a point of comparison with the per-record indexes: isolating
//! the matches of one record requires filtering every match of the keyword,
//! and labels carry no counter so updates are not forward private.

use std::collections::HashMap;

use cosmian_crypto_core::{reexport::rand_core::SeedableRng, CsRng};
use parking_lot::RwLock;

use crate::{
    dsse::{normalize_keyword, normalize_keywords, IndexKey, Label, SearchOutcome, SearchToken},
    record::{Posting, RecordId},
};

#[derive(Debug)]
pub struct GlobalIndexStore {
    key: IndexKey,
    entries: RwLock<HashMap<Label, Vec<(RecordId, Posting)>>>,
}

impl GlobalIndexStore {
    #[must_use]
    pub fn new(key: IndexKey) -> Self {
        Self {
            key,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn generate() -> Self {
        Self::new(IndexKey::random(&mut CsRng::from_entropy()))
    }

    pub fn add_keywords<S: AsRef<str>>(
        &self,
        record_id: &RecordId,
        keywords: &[S],
        posting: &Posting,
    ) {
        let labels = normalize_keywords(keywords)
            .into_iter()
            .map(|keyword| self.key.derive_shared_label(&keyword))
            .collect::<Vec<_>>();
        let mut entries = self.entries.write();
        for label in labels {
            entries
                .entry(label)
                .or_default()
                .push((record_id.clone(), posting.clone()));
        }
    }

    #[must_use]
    pub fn generate_token(&self, keyword: &str) -> SearchToken {
        let keyword = normalize_keyword(keyword).unwrap_or_default();
        SearchToken::from(self.key.derive_shared_label(&keyword))
    }

    /// Returns every match of the keyword, across all records.
    #[must_use]
    pub fn search(&self, token: &SearchToken) -> Vec<(RecordId, Posting)> {
        self.entries
            .read()
            .get(token.label())
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the matches of the keyword in the given record. Linear in the
    /// number of occurrences of the keyword over all records.
    #[must_use]
    pub fn search_for_record(&self, token: &SearchToken, record_id: &RecordId) -> SearchOutcome {
        let postings = self
            .entries
            .read()
            .get(token.label())
            .map(|matches| {
                matches
                    .iter()
                    .filter(|(id, _)| id == record_id)
                    .map(|(_, posting)| posting.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if postings.is_empty() {
            SearchOutcome::NoMatch
        } else {
            SearchOutcome::Match(postings)
        }
    }

    /// Number of (record, posting) pairs stored under the given token.
    #[must_use]
    pub fn occurrences(&self, token: &SearchToken) -> usize {
        self.entries
            .read()
            .get(token.label())
            .map_or(0, Vec::len)
    }
}
