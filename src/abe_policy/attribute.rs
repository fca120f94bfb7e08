use std::{
    convert::TryFrom,
    fmt::{Debug, Display},
    ops::Deref,
};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Words reserved by the policy grammar.
const RESERVED_WORDS: [&str; 2] = ["AND", "OR"];

/// An attribute is a non-empty alphanumeric token, e.g. `DOCTOR` or
/// `CARDIOLOGY`.
///
/// Attributes are compared in their canonical upper-case form so that
/// `doctor` in a policy matches `DOCTOR` in a user key. Any other character,
/// including separators such as `_`, `:` or spaces, is rejected rather than
/// stripped.
#[derive(Hash, PartialEq, Eq, Clone, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Attribute(String);

impl Attribute {
    /// Creates an attribute from the given token.
    ///
    /// # Errors
    ///
    /// `InvalidAttribute` if the token is empty, is a reserved word or
    /// contains a character outside `[A-Za-z0-9]`.
    pub fn new(token: &str) -> Result<Self, Error> {
        if token.is_empty() {
            return Err(Error::InvalidAttribute("empty attribute".to_string()));
        }
        if let Some(c) = token.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidAttribute(format!(
                "'{token}' contains the forbidden character {c:?}"
            )));
        }
        let canonical = token.to_ascii_uppercase();
        if RESERVED_WORDS.contains(&canonical.as_str()) {
            return Err(Error::InvalidAttribute(format!(
                "'{token}' is a reserved word"
            )));
        }
        Ok(Self(canonical))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Deref for Attribute {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Attribute {
    type Error = Error;

    fn try_from(token: &str) -> Result<Self, Self::Error> {
        Self::new(token)
    }
}

impl TryFrom<String> for Attribute {
    type Error = Error;

    fn try_from(token: String) -> Result<Self, Self::Error> {
        Self::new(&token)
    }
}

impl From<Attribute> for String {
    fn from(attr: Attribute) -> Self {
        attr.0
    }
}
