//! Server-side view of a record index.

use std::collections::{HashMap, HashSet};

use cosmian_crypto_core::bytes_ser_de::{to_leb128_len, Deserializer, Serializable, Serializer};

use super::prf::{Label, SearchToken, LABEL_LENGTH};
use crate::{record::Posting, Error};

/// Insertion of one posting under a fresh label.
///
/// The postings stored under `previous`, the retired label of the same
/// keyword, are moved to `label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub(crate) label: Label,
    pub(crate) previous: Option<Label>,
    pub(crate) posting: Posting,
}

/// Modifications of a record index, produced by the owner and applied by
/// the storage holder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexUpdate {
    pub(crate) entries: Vec<IndexEntry>,
    pub(crate) removals: Vec<Label>,
}

impl IndexUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.removals.is_empty()
    }

    /// Labels this update writes.
    pub fn inserted_labels(&self) -> impl Iterator<Item = &Label> {
        self.entries.iter().map(|entry| &entry.label)
    }

    /// Labels this update retires.
    pub fn retired_labels(&self) -> impl Iterator<Item = &Label> {
        self.entries
            .iter()
            .filter_map(|entry| entry.previous.as_ref())
            .chain(&self.removals)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Match(Vec<Posting>),
    NoMatch,
}

impl SearchOutcome {
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }

    #[must_use]
    pub fn postings(&self) -> &[Posting] {
        match self {
            Self::Match(postings) => postings,
            Self::NoMatch => &[],
        }
    }
}

/// Encrypted keyword index of a single record.
///
/// Labels retired by an update are remembered so that an update delivered
/// late cannot bring them back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedIndex {
    entries: HashMap<Label, Vec<Posting>>,
    retired: HashSet<Label>,
}

impl EncryptedIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index of a freshly ingested record.
    pub fn from_update(update: &IndexUpdate) -> Result<Self, Error> {
        let mut index = Self::new();
        index.apply(update)?;
        Ok(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies the given update. The index is left unchanged on error.
    ///
    /// Updates of a record must be applied in the order the owner produced
    /// them. Replaying the last update applied is a no-op.
    ///
    /// # Errors
    ///
    /// - `ConcurrentCounterConflict` if a label to insert already holds an
    ///   entry that this update did not produce
    /// - `OutOfOrderUpdate` if a label to insert was already retired, or if
    ///   the label it replaces does not hold any entry yet
    pub fn apply(&mut self, update: &IndexUpdate) -> Result<(), Error> {
        let mut pending = Vec::with_capacity(update.entries.len());
        for entry in &update.entries {
            if self.retired.contains(&entry.label) {
                return Err(Error::OutOfOrderUpdate(format!(
                    "label {:?} was already retired",
                    entry.label
                )));
            }
            match self.entries.get(&entry.label) {
                None => match entry.previous {
                    Some(previous) if !self.entries.contains_key(&previous) => {
                        return Err(Error::OutOfOrderUpdate(format!(
                            "label {:?} replaces a label that holds no entry",
                            entry.label
                        )))
                    }
                    _ => pending.push(entry),
                },
                Some(postings)
                    if postings.contains(&entry.posting)
                        && entry
                            .previous
                            .map_or(true, |previous| !self.entries.contains_key(&previous)) => {}
                Some(_) => {
                    return Err(Error::ConcurrentCounterConflict(format!(
                        "label {:?} is already in use",
                        entry.label
                    )))
                }
            }
        }

        for entry in pending {
            let mut postings = match entry.previous {
                Some(previous) => {
                    self.retired.insert(previous);
                    self.entries.remove(&previous).unwrap_or_default()
                }
                None => Vec::new(),
            };
            if !postings.contains(&entry.posting) {
                postings.push(entry.posting.clone());
            }
            self.entries.insert(entry.label, postings);
        }
        for label in &update.removals {
            self.entries.remove(label);
            self.retired.insert(*label);
        }
        Ok(())
    }

    /// Looks the token up. Expected constant time in the index size.
    #[must_use]
    pub fn search(&self, token: &SearchToken) -> SearchOutcome {
        self.entries
            .get(token.label())
            .map_or(SearchOutcome::NoMatch, |postings| {
                SearchOutcome::Match(postings.clone())
            })
    }
}

fn read_label(de: &mut Deserializer) -> Result<Label, Error> {
    Ok(Label::from(de.read_array::<LABEL_LENGTH>()?))
}

fn posting_length(posting: &Posting) -> usize {
    to_leb128_len(posting.as_str().len()) + posting.as_str().len()
}

fn read_posting(de: &mut Deserializer) -> Result<Posting, Error> {
    let bytes = de.read_vec()?;
    Ok(Posting::new(std::str::from_utf8(&bytes)?))
}

impl Serializable for EncryptedIndex {
    type Error = Error;

    fn length(&self) -> usize {
        self.entries
            .values()
            .fold(to_leb128_len(self.entries.len()), |acc, postings| {
                acc + LABEL_LENGTH
                    + to_leb128_len(postings.len())
                    + postings.iter().map(posting_length).sum::<usize>()
            })
            + to_leb128_len(self.retired.len())
            + self.retired.len() * LABEL_LENGTH
    }

    fn write(&self, ser: &mut Serializer) -> Result<usize, Self::Error> {
        let mut n = ser.write_leb128_u64(u64::try_from(self.entries.len())?)?;
        for (label, postings) in &self.entries {
            n += ser.write_array(label.as_bytes())?;
            n += ser.write_leb128_u64(u64::try_from(postings.len())?)?;
            for posting in postings {
                n += ser.write_vec(posting.as_str().as_bytes())?;
            }
        }
        n += ser.write_leb128_u64(u64::try_from(self.retired.len())?)?;
        for label in &self.retired {
            n += ser.write_array(label.as_bytes())?;
        }
        Ok(n)
    }

    fn read(de: &mut Deserializer) -> Result<Self, Self::Error> {
        let n_entries = usize::try_from(de.read_leb128_u64()?)?;
        let mut entries = HashMap::with_capacity(n_entries);
        for _ in 0..n_entries {
            let label = read_label(de)?;
            let n_postings = usize::try_from(de.read_leb128_u64()?)?;
            let postings = (0..n_postings)
                .map(|_| read_posting(de))
                .collect::<Result<Vec<_>, _>>()?;
            entries.insert(label, postings);
        }
        let n_retired = usize::try_from(de.read_leb128_u64()?)?;
        let retired = (0..n_retired)
            .map(|_| read_label(de))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { entries, retired })
    }
}

impl Serializable for IndexUpdate {
    type Error = Error;

    fn length(&self) -> usize {
        self.entries
            .iter()
            .fold(to_leb128_len(self.entries.len()), |acc, entry| {
                acc + LABEL_LENGTH
                    + 1
                    + entry.previous.map_or(0, |_| LABEL_LENGTH)
                    + posting_length(&entry.posting)
            })
            + to_leb128_len(self.removals.len())
            + self.removals.len() * LABEL_LENGTH
    }

    fn write(&self, ser: &mut Serializer) -> Result<usize, Self::Error> {
        let mut n = ser.write_leb128_u64(u64::try_from(self.entries.len())?)?;
        for entry in &self.entries {
            n += ser.write_array(entry.label.as_bytes())?;
            match &entry.previous {
                Some(previous) => {
                    n += ser.write_leb128_u64(1)?;
                    n += ser.write_array(previous.as_bytes())?;
                }
                None => n += ser.write_leb128_u64(0)?,
            }
            n += ser.write_vec(entry.posting.as_str().as_bytes())?;
        }
        n += ser.write_leb128_u64(u64::try_from(self.removals.len())?)?;
        for label in &self.removals {
            n += ser.write_array(label.as_bytes())?;
        }
        Ok(n)
    }

    fn read(de: &mut Deserializer) -> Result<Self, Self::Error> {
        let n_entries = usize::try_from(de.read_leb128_u64()?)?;
        let mut entries = Vec::with_capacity(n_entries);
        for _ in 0..n_entries {
            let label = read_label(de)?;
            let previous = match de.read_leb128_u64()? {
                0 => None,
                1 => Some(read_label(de)?),
                flag => {
                    return Err(Error::Serialization(format!(
                        "invalid previous label flag: {flag}"
                    )))
                }
            };
            let posting = read_posting(de)?;
            entries.push(IndexEntry {
                label,
                previous,
                posting,
            });
        }
        let n_removals = usize::try_from(de.read_leb128_u64()?)?;
        let removals = (0..n_removals)
            .map(|_| read_label(de))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries, removals })
    }
}
