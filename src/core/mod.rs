//! Implements the ciphertext-policy attribute-based encryption used to seal
//! data keys.
//!
//! The scheme is the Bethencourt-Sahai-Waters CP-ABE, instantiated on the
//! BLS12-381 pairing with attributes hashed to G2. It is used as a KEM: the
//! pairing secret `e(g1, g2)^(alpha s)` is hashed into a key-confirmation tag
//! and a one-time mask for the fixed-size plaintext.

use std::collections::HashMap;

use ark_bls12_381::{Bls12_381, Fr, G1Projective, G2Projective};
use ark_ec::pairing::PairingOutput;
use zeroize::Zeroize;

use crate::abe_policy::{AccessPolicy, Attribute};

#[macro_use]
pub mod macros;

pub mod api;
pub mod primitives;
pub mod serialization;


/// Length of the keys sealed by the attribute-based encryption.
pub const SYM_KEY_LENGTH: usize = 32;

/// Length of the key-confirmation tag.
pub const TAG_LENGTH: usize = 16;

/// Domain separation tag of the attribute hash.
pub(crate) const ATTRIBUTE_DST: &[u8] = b"RECORDSEAL-V01-CS02-with-BLS12381G2_XMD:SHA-256_SSWU_RO_";

/// Additional information used to derive the tag and mask.
pub(crate) const KEY_GEN_INFO: &[u8] = b"recordseal key encapsulation";

pub(crate) type Gt = PairingOutput<Bls12_381>;

/// Public parameters. They are needed to encrypt only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// `g1^beta`
    pub(crate) h: G1Projective,
    /// `e(g1, g2)^alpha`
    pub(crate) e_gg_alpha: Gt,
}

/// Authority secret, used to issue user keys.
#[derive(Debug, PartialEq, Eq)]
pub struct MasterSecretKey {
    pub(crate) beta: Fr,
    /// `g2^alpha`
    pub(crate) g2_alpha: G2Projective,
}

impl Drop for MasterSecretKey {
    fn drop(&mut self) {
        self.beta.zeroize();
        self.g2_alpha.zeroize();
    }
}

/// Key components bound to one attribute of a user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttributeKey {
    /// `g2^r * H(j)^r_j`
    pub(crate) d: G2Projective,
    /// `g1^r_j`
    pub(crate) d_prime: G1Projective,
}

/// A user secret key, bound to a set of attributes.
#[derive(Debug, PartialEq, Eq)]
pub struct UserSecretKey {
    /// `g2^((alpha + r) / beta)`
    pub(crate) d: G2Projective,
    pub(crate) components: HashMap<Attribute, AttributeKey>,
}

impl UserSecretKey {
    /// Returns the sorted attributes this key was issued for.
    #[must_use]
    pub fn attributes(&self) -> Vec<&Attribute> {
        let mut attributes = self.components.keys().collect::<Vec<_>>();
        attributes.sort_unstable();
        attributes
    }
}

impl Drop for UserSecretKey {
    fn drop(&mut self) {
        self.d.zeroize();
        for component in self.components.values_mut() {
            component.d.zeroize();
            component.d_prime.zeroize();
        }
    }
}

/// Ciphertext components of one policy leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeafComponent {
    /// `g1^q`
    pub(crate) c: G1Projective,
    /// `H(attr)^q`
    pub(crate) c_prime: G2Projective,
}

/// Attribute-based encryption of a fixed-size key.
///
/// The policy is stored in clear: only the satisfaction decision is
/// protected, not the shape of the formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCiphertext {
    pub(crate) policy: AccessPolicy,
    /// `g1^(beta s)`
    pub(crate) c: G1Projective,
    /// One component per policy leaf, in depth-first order.
    pub(crate) leaves: Vec<LeafComponent>,
    pub(crate) masked_key: [u8; SYM_KEY_LENGTH],
    pub(crate) tag: [u8; TAG_LENGTH],
}

impl PolicyCiphertext {
    #[must_use]
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }
}
