//! Implements the serialization methods for the attribute-based encryption
//! objects.
//!
//! Group elements are written in compressed form as length-prefixed byte
//! vectors; deserialization checks that they lie in the prime-order
//! subgroup.

use std::collections::HashMap;

use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use cosmian_crypto_core::bytes_ser_de::{to_leb128_len, Deserializer, Serializable, Serializer};

use super::{
    AttributeKey, LeafComponent, MasterSecretKey, PolicyCiphertext, PublicKey, UserSecretKey,
    SYM_KEY_LENGTH, TAG_LENGTH,
};
use crate::{
    abe_policy::{AccessPolicy, Attribute},
    Error,
};

pub(crate) fn ark_length<T: CanonicalSerialize>(value: &T) -> usize {
    let n = value.compressed_size();
    to_leb128_len(n) + n
}

pub(crate) fn write_ark<T: CanonicalSerialize>(
    ser: &mut Serializer,
    value: &T,
) -> Result<usize, Error> {
    let mut bytes = Vec::with_capacity(value.compressed_size());
    value.serialize_compressed(&mut bytes)?;
    Ok(ser.write_vec(&bytes)?)
}

pub(crate) fn read_ark<T: CanonicalDeserialize>(de: &mut Deserializer) -> Result<T, Error> {
    let bytes = de.read_vec()?;
    Ok(T::deserialize_compressed(bytes.as_slice())?)
}

fn str_length(s: &str) -> usize {
    to_leb128_len(s.len()) + s.len()
}

fn read_string(de: &mut Deserializer) -> Result<String, Error> {
    let bytes = de.read_vec()?;
    Ok(std::str::from_utf8(&bytes)?.to_string())
}

impl Serializable for PublicKey {
    type Error = Error;

    fn length(&self) -> usize {
        ark_length(&self.h) + ark_length(&self.e_gg_alpha)
    }

    fn write(&self, ser: &mut Serializer) -> Result<usize, Self::Error> {
        Ok(write_ark(ser, &self.h)? + write_ark(ser, &self.e_gg_alpha)?)
    }

    fn read(de: &mut Deserializer) -> Result<Self, Self::Error> {
        Ok(Self {
            h: read_ark(de)?,
            e_gg_alpha: read_ark(de)?,
        })
    }
}

impl Serializable for MasterSecretKey {
    type Error = Error;

    fn length(&self) -> usize {
        ark_length(&self.beta) + ark_length(&self.g2_alpha)
    }

    fn write(&self, ser: &mut Serializer) -> Result<usize, Self::Error> {
        Ok(write_ark(ser, &self.beta)? + write_ark(ser, &self.g2_alpha)?)
    }

    fn read(de: &mut Deserializer) -> Result<Self, Self::Error> {
        Ok(Self {
            beta: read_ark(de)?,
            g2_alpha: read_ark(de)?,
        })
    }
}

impl Serializable for UserSecretKey {
    type Error = Error;

    fn length(&self) -> usize {
        let mut length = ark_length(&self.d) + to_leb128_len(self.components.len());
        for (attribute, key) in &self.components {
            length += str_length(attribute) + ark_length(&key.d) + ark_length(&key.d_prime);
        }
        length
    }

    fn write(&self, ser: &mut Serializer) -> Result<usize, Self::Error> {
        let mut n = write_ark(ser, &self.d)?;
        n += ser.write_leb128_u64(self.components.len() as u64)?;
        // sorted so that a key always serializes to the same bytes
        for attribute in self.attributes() {
            let key = &self.components[attribute];
            n += ser.write_vec(attribute.as_bytes())?;
            n += write_ark(ser, &key.d)?;
            n += write_ark(ser, &key.d_prime)?;
        }
        Ok(n)
    }

    fn read(de: &mut Deserializer) -> Result<Self, Self::Error> {
        let d = read_ark(de)?;
        let n_components = usize::try_from(de.read_leb128_u64()?)?;
        let mut components = HashMap::with_capacity(n_components);
        for _ in 0..n_components {
            let attribute = Attribute::new(&read_string(de)?)?;
            let key = AttributeKey {
                d: read_ark(de)?,
                d_prime: read_ark(de)?,
            };
            components.insert(attribute, key);
        }
        Ok(Self { d, components })
    }
}

impl Serializable for PolicyCiphertext {
    type Error = Error;

    fn length(&self) -> usize {
        let mut length = str_length(&self.policy.to_string())
            + ark_length(&self.c)
            + to_leb128_len(self.leaves.len())
            + SYM_KEY_LENGTH
            + TAG_LENGTH;
        for leaf in &self.leaves {
            length += ark_length(&leaf.c) + ark_length(&leaf.c_prime);
        }
        length
    }

    fn write(&self, ser: &mut Serializer) -> Result<usize, Self::Error> {
        let mut n = ser.write_vec(self.policy.to_string().as_bytes())?;
        n += write_ark(ser, &self.c)?;
        n += ser.write_leb128_u64(self.leaves.len() as u64)?;
        for leaf in &self.leaves {
            n += write_ark(ser, &leaf.c)?;
            n += write_ark(ser, &leaf.c_prime)?;
        }
        n += ser.write_array(&self.masked_key)?;
        n += ser.write_array(&self.tag)?;
        Ok(n)
    }

    fn read(de: &mut Deserializer) -> Result<Self, Self::Error> {
        let policy = AccessPolicy::parse(&read_string(de)?)?;
        let c = read_ark(de)?;
        let n_leaves = usize::try_from(de.read_leb128_u64()?)?;
        if n_leaves != policy.leaf_count() {
            return Err(Error::ConversionFailed(format!(
                "ciphertext holds {n_leaves} leaf components for a policy of {} leaves",
                policy.leaf_count()
            )));
        }
        let leaves = (0..n_leaves)
            .map(|_| {
                Ok(LeafComponent {
                    c: read_ark(de)?,
                    c_prime: read_ark(de)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self {
            policy,
            c,
            leaves,
            masked_key: de.read_array::<SYM_KEY_LENGTH>()?,
            tag: de.read_array::<TAG_LENGTH>()?,
        })
    }
}
