//! Per-record dynamic searchable symmetric encryption.
//!
//! Each record has its own encrypted index, so that a search is a single
//! lookup into the index of the targeted record whatever the number of
//! records stored. Updates are forward private: a token issued before an
//! update never matches an entry written by it.
//!
//! # Leakage
//!
//! The storage holder learns, per record:
//!
//! - the number of labels, and the number of postings under each of them;
//! - which label a search token hits;
//! - for each re-indexed keyword, the label it replaces. This label is the
//!   one a search on the keyword hit before the update, so an update can be
//!   linked to the earlier searches of the same keyword.
//!
//! Labels of one update are sent in label order, so their position says
//! nothing about the keywords. Nothing links labels across records or
//! across successive lives of a record.

use std::collections::BTreeSet;

mod index;
mod prf;
mod store;

pub use index::{EncryptedIndex, IndexUpdate, SearchOutcome};
pub use prf::{
    Generation, IndexKey, Label, SearchToken, TokenContext, GENERATION_LENGTH, INDEX_KEY_LENGTH,
    LABEL_LENGTH,
};
pub use store::{PatientIndexStore, RecordState};

/// Returns the canonical form of a keyword, or `None` if it is blank.
pub(crate) fn normalize_keyword(keyword: &str) -> Option<String> {
    let keyword = keyword.trim();
    (!keyword.is_empty()).then(|| keyword.to_lowercase())
}

/// Normalizes the given keywords, dropping blanks and duplicates.
pub(crate) fn normalize_keywords<S: AsRef<str>>(keywords: &[S]) -> BTreeSet<String> {
    keywords
        .iter()
        .filter_map(|keyword| normalize_keyword(keyword.as_ref()))
        .collect()
}
