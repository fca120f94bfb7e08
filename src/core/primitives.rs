//! Implements the cryptographic primitives of the attribute-based
//! encryption: setup, key generation, encryption and decryption.

use std::{
    collections::{HashMap, HashSet},
    hint::black_box,
};

use ark_bls12_381::{Bls12_381, Fr, G1Projective, G2Projective};
use ark_ec::{
    hashing::{curve_maps::wb::WBMap, map_to_curve_hasher::MapToCurveBasedHasher, HashToCurve},
    pairing::Pairing,
    Group,
};
use ark_ff::{field_hashers::DefaultFieldHasher, Field};
use ark_serialize::CanonicalSerialize;
use ark_std::{UniformRand, Zero};
use cosmian_crypto_core::reexport::rand_core::CryptoRngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{
    AttributeKey, Gt, LeafComponent, MasterSecretKey, PolicyCiphertext, PublicKey,
    UserSecretKey, ATTRIBUTE_DST, KEY_GEN_INFO, SYM_KEY_LENGTH, TAG_LENGTH,
};
use crate::{
    abe_policy::{AccessPolicy, Attribute},
    Error,
};

type G2Hasher = MapToCurveBasedHasher<
    G2Projective,
    DefaultFieldHasher<Sha256, 128>,
    WBMap<ark_bls12_381::g2::Config>,
>;

/// Xor the two given byte arrays in place.
fn xor_in_place<const LENGTH: usize>(a: &mut [u8; LENGTH], b: &[u8; LENGTH]) {
    for (a_i, b_i) in a.iter_mut().zip(b.iter()) {
        *a_i ^= b_i;
    }
}

/// Hashes an attribute onto G2.
fn hash_attribute(hasher: &G2Hasher, attribute: &Attribute) -> Result<G2Projective, Error> {
    hasher
        .hash(attribute.as_bytes())
        .map(Into::into)
        .map_err(|e| Error::HashToCurve(e.to_string()))
}

fn g2_hasher() -> Result<G2Hasher, Error> {
    G2Hasher::new(ATTRIBUTE_DST).map_err(|e| Error::HashToCurve(e.to_string()))
}

/// Derives the key-confirmation tag and the plaintext mask from the pairing
/// secret.
fn derive_mask(
    secret: &Gt,
) -> Result<([u8; TAG_LENGTH], Zeroizing<[u8; SYM_KEY_LENGTH]>), Error> {
    let mut bytes = Zeroizing::new(Vec::with_capacity(secret.compressed_size()));
    secret.serialize_compressed(&mut *bytes)?;
    Ok(kem_hash!(TAG_LENGTH, SYM_KEY_LENGTH, KEY_GEN_INFO, &bytes))
}

/// Rejects gates without children, which can only come from a hand-built or
/// deserialized tree.
fn check_policy(policy: &AccessPolicy) -> Result<(), Error> {
    match policy {
        AccessPolicy::Leaf(_) => Ok(()),
        AccessPolicy::And(children) | AccessPolicy::Or(children) => {
            if children.is_empty() {
                return Err(Error::InvalidBooleanExpression(
                    "gate without operand".to_string(),
                ));
            }
            children.iter().try_for_each(check_policy)
        }
    }
}

/// Generates the public key and the master secret key.
///
/// # Parameters
///
/// - `rng` : random number generator
pub fn setup(rng: &mut impl CryptoRngCore) -> (PublicKey, MasterSecretKey) {
    let alpha = Zeroizing::new(Fr::rand(rng));
    let beta = Fr::rand(rng);
    let g1 = G1Projective::generator();
    let g2 = G2Projective::generator();

    let pk = PublicKey {
        h: g1 * beta,
        e_gg_alpha: Bls12_381::pairing(g1, g2) * *alpha,
    };
    let msk = MasterSecretKey {
        beta,
        g2_alpha: g2 * *alpha,
    };
    (pk, msk)
}

/// Generates a user secret key for the given attribute set.
///
/// # Parameters
///
/// - `rng`         : random number generator
/// - `msk`         : master secret key
/// - `attributes`  : attributes granted to the user
pub fn keygen(
    rng: &mut impl CryptoRngCore,
    msk: &MasterSecretKey,
    attributes: &HashSet<Attribute>,
) -> Result<UserSecretKey, Error> {
    let g1 = G1Projective::generator();
    let g2 = G2Projective::generator();
    let hasher = g2_hasher()?;

    let r = Zeroizing::new(Fr::rand(rng));
    let beta_inv = Zeroizing::new(
        msk.beta
            .inverse()
            .ok_or_else(|| Error::ConversionFailed("master secret is not invertible".to_string()))?,
    );
    let g2_r = g2 * *r;
    let d = (msk.g2_alpha + g2_r) * *beta_inv;

    let mut components = HashMap::with_capacity(attributes.len());
    for attribute in attributes {
        let r_j = Zeroizing::new(Fr::rand(rng));
        let h_j = hash_attribute(&hasher, attribute)?;
        components.insert(
            attribute.clone(),
            AttributeKey {
                d: g2_r + h_j * *r_j,
                d_prime: g1 * *r_j,
            },
        );
    }
    Ok(UserSecretKey { d, components })
}

/// Shares `secret` down the policy tree and pushes one ciphertext component
/// per leaf, in depth-first order.
///
/// AND gates split the secret additively between their children, OR gates
/// give each child the full secret.
fn share(
    rng: &mut impl CryptoRngCore,
    node: &AccessPolicy,
    secret: Fr,
    hashes: &mut HashMap<Attribute, G2Projective>,
    hasher: &G2Hasher,
    leaves: &mut Vec<LeafComponent>,
) -> Result<(), Error> {
    match node {
        AccessPolicy::Leaf(attribute) => {
            let h = match hashes.get(attribute) {
                Some(h) => *h,
                None => {
                    let h = hash_attribute(hasher, attribute)?;
                    hashes.insert(attribute.clone(), h);
                    h
                }
            };
            leaves.push(LeafComponent {
                c: G1Projective::generator() * secret,
                c_prime: h * secret,
            });
        }
        AccessPolicy::Or(children) => {
            for child in children {
                share(rng, child, secret, hashes, hasher, leaves)?;
            }
        }
        AccessPolicy::And(children) => {
            let mut remainder = secret;
            for (i, child) in children.iter().enumerate() {
                let child_secret = if i + 1 == children.len() {
                    remainder
                } else {
                    let s_i = Fr::rand(rng);
                    remainder -= s_i;
                    s_i
                };
                share(rng, child, child_secret, hashes, hasher, leaves)?;
            }
        }
    }
    Ok(())
}

/// Encrypts the given fixed-size plaintext under the given access policy.
///
/// # Parameters
///
/// - `rng`         : secure random number generator
/// - `pk`          : public key
/// - `policy`      : access policy
/// - `plaintext`   : key to seal
pub fn encrypt(
    rng: &mut impl CryptoRngCore,
    pk: &PublicKey,
    policy: &AccessPolicy,
    plaintext: &[u8; SYM_KEY_LENGTH],
) -> Result<PolicyCiphertext, Error> {
    check_policy(policy)?;
    let hasher = g2_hasher()?;

    let s = Zeroizing::new(Fr::rand(rng));
    let mut leaves = Vec::with_capacity(policy.leaf_count());
    let mut hashes = HashMap::new();
    share(rng, policy, *s, &mut hashes, &hasher, &mut leaves)?;

    let (tag, mask) = derive_mask(&(pk.e_gg_alpha * *s))?;
    let mut masked_key = *plaintext;
    xor_in_place(&mut masked_key, &*mask);

    Ok(PolicyCiphertext {
        policy: policy.clone(),
        c: pk.h * *s,
        leaves,
        masked_key,
        tag,
    })
}

/// Recovers `e(g1, g2)^(r q)` for the given node, or `None` if the user key
/// does not satisfy it.
///
/// Every leaf costs the same multi-pairing whether or not the user holds its
/// attribute, and every child of a gate is evaluated, so that the work only
/// depends on the policy size.
fn recover(
    node: &AccessPolicy,
    usk: &UserSecretKey,
    leaves: &[LeafComponent],
    index: &mut usize,
) -> Result<Option<Gt>, Error> {
    match node {
        AccessPolicy::Leaf(attribute) => {
            let leaf = leaves.get(*index).ok_or_else(|| {
                Error::ConversionFailed("ciphertext does not match its policy".to_string())
            })?;
            *index += 1;
            match usk.components.get(attribute) {
                Some(key) => Ok(Some(Bls12_381::multi_pairing(
                    [leaf.c, -key.d_prime],
                    [key.d, leaf.c_prime],
                ))),
                None => {
                    let _ = black_box(Bls12_381::multi_pairing(
                        [leaf.c, -G1Projective::generator()],
                        [usk.d, leaf.c_prime],
                    ));
                    Ok(None)
                }
            }
        }
        AccessPolicy::And(children) => {
            let mut acc = Some(Gt::zero());
            for child in children {
                let value = recover(child, usk, leaves, index)?;
                acc = match (acc, value) {
                    (Some(acc), Some(value)) => Some(acc + value),
                    _ => None,
                };
            }
            Ok(acc)
        }
        AccessPolicy::Or(children) => {
            let mut acc = None;
            for child in children {
                let value = recover(child, usk, leaves, index)?;
                acc = acc.or(value);
            }
            Ok(acc)
        }
    }
}

/// Decrypts the given ciphertext using the given user secret key.
///
/// # Error
///
/// Returns `AccessDenied` if the user attributes do not satisfy the
/// ciphertext policy. The error carries no information on the failing part
/// of the policy, and the final pairing and hash are computed in both cases.
///
/// # Parameters
///
/// - `usk`         : user secret key
/// - `ciphertext`  : ciphertext to open
pub fn decrypt(
    usk: &UserSecretKey,
    ciphertext: &PolicyCiphertext,
) -> Result<Zeroizing<[u8; SYM_KEY_LENGTH]>, Error> {
    let mut index = 0;
    let blinding = recover(&ciphertext.policy, usk, &ciphertext.leaves, &mut index)?;
    if index != ciphertext.leaves.len() {
        return Err(Error::ConversionFailed(
            "ciphertext does not match its policy".to_string(),
        ));
    }

    let e_c_d = Bls12_381::pairing(ciphertext.c, usk.d);
    let is_satisfied = blinding.is_some();
    let secret = e_c_d - blinding.unwrap_or_else(Gt::zero);
    let (tag, mask) = derive_mask(&secret)?;

    let tag_matches: bool = tag[..].ct_eq(&ciphertext.tag[..]).into();
    if !is_satisfied | !tag_matches {
        return Err(Error::AccessDenied);
    }
    let mut plaintext = Zeroizing::new(ciphertext.masked_key);
    xor_in_place(&mut *plaintext, &*mask);
    Ok(plaintext)
}
