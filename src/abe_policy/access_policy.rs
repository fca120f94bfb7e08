use std::{
    collections::HashSet,
    fmt::Display,
    ops::{BitAnd, BitOr},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use super::Attribute;
use crate::Error;

/// Maximum nesting depth accepted by the parser.
const MAX_POLICY_DEPTH: usize = 64;

/// An `AccessPolicy` is a boolean expression over attributes.
///
/// Only `positive` literals are allowed (no negation). Gates are n-ary and
/// nested gates of the same kind are flattened, so that `A AND (B AND C)` and
/// `(A AND B) AND C` build the same tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPolicy {
    Leaf(Attribute),
    And(Vec<AccessPolicy>),
    Or(Vec<AccessPolicy>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Attr(Attribute),
}

impl AccessPolicy {
    /// Creates an access policy made of a single attribute.
    ///
    /// Access policies can then be combined using `&` and `|`:
    /// ```
    /// use recordseal::abe_policy::AccessPolicy;
    ///
    /// let ap = AccessPolicy::new("DOCTOR")? & (AccessPolicy::new("CARDIOLOGY")? | AccessPolicy::new("ADMIN")?);
    /// assert_eq!(ap, AccessPolicy::parse("DOCTOR and (CARDIOLOGY or ADMIN)")?);
    /// # Ok::<(), recordseal::Error>(())
    /// ```
    pub fn new(attribute: &str) -> Result<Self, Error> {
        Attribute::new(attribute).map(Self::Leaf)
    }

    /// Parses a boolean expression into an `AccessPolicy`.
    ///
    /// The grammar accepts `AND` and `OR` (case-insensitive) between
    /// attribute tokens, with parentheses for grouping. `AND` binds tighter
    /// than `OR`.
    ///
    /// # Errors
    ///
    /// - `InvalidAttribute` if a token is not a valid attribute;
    /// - `InvalidBooleanExpression` on unbalanced parentheses, misplaced
    ///   operators or an empty expression.
    pub fn parse(boolean_expression: &str) -> Result<Self, Error> {
        let tokens = Self::tokenize(boolean_expression)?;
        let mut pos = 0;
        let ap = Self::parse_or(&tokens, &mut pos, 0)?;
        if pos != tokens.len() {
            return Err(Error::InvalidBooleanExpression(format!(
                "unexpected {:?} at token {pos} in '{boolean_expression}'",
                tokens[pos]
            )));
        }
        Ok(ap)
    }

    fn tokenize(boolean_expression: &str) -> Result<Vec<Token>, Error> {
        let mut tokens = Vec::new();
        let mut word = String::new();

        let flush = |word: &mut String, tokens: &mut Vec<Token>| -> Result<(), Error> {
            if word.is_empty() {
                return Ok(());
            }
            let token = if word.eq_ignore_ascii_case("and") {
                Token::And
            } else if word.eq_ignore_ascii_case("or") {
                Token::Or
            } else {
                Token::Attr(Attribute::new(word)?)
            };
            tokens.push(token);
            word.clear();
            Ok(())
        };

        for c in boolean_expression.chars() {
            match c {
                '(' | ')' => {
                    flush(&mut word, &mut tokens)?;
                    tokens.push(if c == '(' { Token::Open } else { Token::Close });
                }
                c if c.is_whitespace() => flush(&mut word, &mut tokens)?,
                c => word.push(c),
            }
        }
        flush(&mut word, &mut tokens)?;

        if tokens.is_empty() {
            return Err(Error::InvalidBooleanExpression(
                "empty boolean expression".to_string(),
            ));
        }
        Ok(tokens)
    }

    fn parse_or(tokens: &[Token], pos: &mut usize, depth: usize) -> Result<Self, Error> {
        let mut terms = vec![Self::parse_and(tokens, pos, depth)?];
        while tokens.get(*pos) == Some(&Token::Or) {
            *pos += 1;
            terms.push(Self::parse_and(tokens, pos, depth)?);
        }
        Ok(Self::gate(terms, false))
    }

    fn parse_and(tokens: &[Token], pos: &mut usize, depth: usize) -> Result<Self, Error> {
        let mut factors = vec![Self::parse_factor(tokens, pos, depth)?];
        while tokens.get(*pos) == Some(&Token::And) {
            *pos += 1;
            factors.push(Self::parse_factor(tokens, pos, depth)?);
        }
        Ok(Self::gate(factors, true))
    }

    fn parse_factor(tokens: &[Token], pos: &mut usize, depth: usize) -> Result<Self, Error> {
        match tokens.get(*pos) {
            Some(Token::Attr(attr)) => {
                *pos += 1;
                Ok(Self::Leaf(attr.clone()))
            }
            Some(Token::Open) => {
                if depth >= MAX_POLICY_DEPTH {
                    return Err(Error::InvalidBooleanExpression(format!(
                        "nesting deeper than {MAX_POLICY_DEPTH} levels"
                    )));
                }
                *pos += 1;
                let inner = Self::parse_or(tokens, pos, depth + 1)?;
                if tokens.get(*pos) != Some(&Token::Close) {
                    return Err(Error::InvalidBooleanExpression(
                        "missing closing parenthesis".to_string(),
                    ));
                }
                *pos += 1;
                Ok(inner)
            }
            Some(token) => Err(Error::InvalidBooleanExpression(format!(
                "expected an attribute or '(', found {token:?}"
            ))),
            None => Err(Error::InvalidBooleanExpression(
                "unexpected end of expression".to_string(),
            )),
        }
    }

    /// Builds an AND (resp. OR) gate, flattening children of the same kind.
    fn gate(children: Vec<Self>, is_and: bool) -> Self {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Self::And(grand_children) if is_and => flat.extend(grand_children),
                Self::Or(grand_children) if !is_and => flat.extend(grand_children),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else if is_and {
            Self::And(flat)
        } else {
            Self::Or(flat)
        }
    }

    /// Returns the attributes of the policy leaves in depth-first order,
    /// duplicates included. This is the order of the leaf components of a
    /// ciphertext.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Attribute> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Attribute>) {
        match self {
            Self::Leaf(attr) => leaves.push(attr),
            Self::And(children) | Self::Or(children) => {
                children.iter().for_each(|child| child.collect_leaves(leaves));
            }
        }
    }

    /// Returns the sorted set of attributes used in the policy.
    #[must_use]
    pub fn attributes(&self) -> Vec<Attribute> {
        let mut attributes = self.leaves().into_iter().cloned().collect::<Vec<_>>();
        attributes.sort_unstable();
        attributes.dedup();
        attributes
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::And(children) | Self::Or(children) => children.iter().map(Self::leaf_count).sum(),
        }
    }

    /// Returns `true` if the given attribute set satisfies the policy.
    ///
    /// Every node is visited, whatever the outcome of its siblings.
    #[must_use]
    pub fn is_satisfied_by(&self, attributes: &HashSet<Attribute>) -> bool {
        match self {
            Self::Leaf(attr) => attributes.contains(attr),
            Self::And(children) => children
                .iter()
                .fold(true, |acc, child| acc & child.is_satisfied_by(attributes)),
            Self::Or(children) => children
                .iter()
                .fold(false, |acc, child| acc | child.is_satisfied_by(attributes)),
        }
    }
}

impl Display for AccessPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (children, op) = match self {
            Self::Leaf(attr) => return write!(f, "{attr}"),
            Self::And(children) => (children, " AND "),
            Self::Or(children) => (children, " OR "),
        };
        f.write_str("(")?;
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                f.write_str(op)?;
            }
            write!(f, "{child}")?;
        }
        f.write_str(")")
    }
}

impl FromStr for AccessPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for AccessPolicy {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

// use A & B to construct And([A, B])
impl BitAnd for AccessPolicy {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self::gate(vec![self, rhs], true)
    }
}

// use A | B to construct Or([A, B])
impl BitOr for AccessPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self::gate(vec![self, rhs], false)
    }
}

impl From<Attribute> for AccessPolicy {
    fn from(attribute: Attribute) -> Self {
        Self::Leaf(attribute)
    }
}
