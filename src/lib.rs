//! This crate implements attribute-gated searchable encryption of per-record
//! data, e.g. patient files. It allows to:
//! - encrypt each record under its own data key, and seal this key under a
//! boolean policy over attributes (CP-ABE): only users whose attributes
//! satisfy the policy can recover it;
//! - index the keywords of each record in its own encrypted index, so that a
//! storage holder can answer keyword searches scoped to one record without
//! learning keywords, policies or keys;
//! - update these indexes with forward privacy: tokens issued before an
//! update never match the entries it writes.
//!
//! The `core` module exposes the attribute-based encryption, the `kem` module
//! binds it to the authenticated encryption of the records, the `dsse` module
//! implements the per-record indexes and the `gateway` module the storage
//! holder. The `baseline` module implements a shared index used for
//! comparison only.

mod error;

pub mod abe_policy;
pub mod ae;
pub mod baseline;
pub mod core;
pub mod dsse;
pub mod gateway;
pub mod kem;
pub mod record;
pub mod traits;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use error::Error;

pub use self::{
    core::{api::AttributePolicyEngine, MasterSecretKey, PolicyCiphertext, PublicKey, UserSecretKey},
    dsse::{PatientIndexStore, SearchOutcome, SearchToken},
    gateway::StorageGateway,
    kem::{DataKey, KeyEncapsulationLayer, RecordCiphertext, WrappedKey},
    record::{Posting, RecordId},
};
