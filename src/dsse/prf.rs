//! Pseudorandom derivation of index labels and search tokens.
//!
//! Every derivation is a KMAC256 keyed by the index key, with its own
//! customization string. Variable-length inputs are length-prefixed so that
//! no two input tuples share an encoding.

use std::fmt::Debug;

use cosmian_crypto_core::{
    reexport::rand_core::CryptoRngCore,
    FixedSizeCBytes, SymmetricKey,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::normalize_keyword;
use crate::{core::SYM_KEY_LENGTH, kmac, record::RecordId, Error};

pub const INDEX_KEY_LENGTH: usize = 32;
pub const LABEL_LENGTH: usize = 32;
pub const GENERATION_LENGTH: usize = 16;

const LABEL_CUSTOMIZATION: &[u8] = b"recordseal record index label";
const STATE_KEY_CUSTOMIZATION: &[u8] = b"recordseal record index state";
const SHARED_LABEL_CUSTOMIZATION: &[u8] = b"recordseal shared index label";

/// Address of an index entry. Indistinguishable from random without the
/// index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label([u8; LABEL_LENGTH]);

impl Label {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; LABEL_LENGTH] {
        &self.0
    }
}

impl From<[u8; LABEL_LENGTH]> for Label {
    fn from(bytes: [u8; LABEL_LENGTH]) -> Self {
        Self(bytes)
    }
}

/// Search trapdoor: the label a keyword is expected to be indexed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchToken(Label);

impl SearchToken {
    #[must_use]
    pub fn label(&self) -> &Label {
        &self.0
    }
}

impl From<Label> for SearchToken {
    fn from(label: Label) -> Self {
        Self(label)
    }
}

/// Random nonce drawn each time a record index is created. Labels of a
/// re-ingested record never collide with those of its previous life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Generation([u8; GENERATION_LENGTH]);

impl Generation {
    #[must_use]
    pub fn random(rng: &mut impl CryptoRngCore) -> Self {
        let mut bytes = [0; GENERATION_LENGTH];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// What a user role needs, on top of the index key, to derive a token by
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenContext {
    pub generation: Generation,
    pub counter: u64,
}

/// Secret key of the per-record indexes, shared by the owner and the user
/// roles allowed to search.
#[derive(Clone)]
pub struct IndexKey(Zeroizing<[u8; INDEX_KEY_LENGTH]>);

impl IndexKey {
    #[must_use]
    pub fn random(rng: &mut impl CryptoRngCore) -> Self {
        let mut key = Zeroizing::new([0; INDEX_KEY_LENGTH]);
        rng.fill_bytes(&mut *key);
        Self(key)
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; INDEX_KEY_LENGTH]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; INDEX_KEY_LENGTH] {
        &self.0
    }

    /// Derives the label of a normalized keyword for the given counter.
    pub(crate) fn derive_label(
        &self,
        record_id: &RecordId,
        generation: &Generation,
        keyword: &str,
        counter: u64,
    ) -> Label {
        Label(kmac!(
            LABEL_LENGTH,
            &*self.0,
            LABEL_CUSTOMIZATION,
            &(record_id.as_bytes().len() as u64).to_be_bytes(),
            record_id.as_bytes(),
            &generation.0,
            &(keyword.len() as u64).to_be_bytes(),
            keyword.as_bytes(),
            &counter.to_be_bytes()
        ))
    }

    /// Derives the search token of the given keyword.
    ///
    /// The token only matches if the context is the current one for this
    /// keyword.
    #[must_use]
    pub fn derive_token(
        &self,
        record_id: &RecordId,
        keyword: &str,
        context: &TokenContext,
    ) -> SearchToken {
        let keyword = normalize_keyword(keyword).unwrap_or_default();
        SearchToken(self.derive_label(record_id, &context.generation, &keyword, context.counter))
    }

    /// Derives the label of a normalized keyword in a single index shared by
    /// all records. Such labels carry no counter.
    pub(crate) fn derive_shared_label(&self, keyword: &str) -> Label {
        Label(kmac!(
            LABEL_LENGTH,
            &*self.0,
            SHARED_LABEL_CUSTOMIZATION,
            keyword.as_bytes()
        ))
    }

    /// Derives the key sealing the counter state of the given record.
    pub(crate) fn derive_state_key(
        &self,
        record_id: &RecordId,
    ) -> Result<SymmetricKey<SYM_KEY_LENGTH>, Error> {
        let bytes = Zeroizing::new(kmac!(
            SYM_KEY_LENGTH,
            &*self.0,
            STATE_KEY_CUSTOMIZATION,
            record_id.as_bytes()
        ));
        Ok(SymmetricKey::try_from_bytes(*bytes)?)
    }
}

impl Debug for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IndexKey(..)")
    }
}
