//! Tolerant GUID parsing for instruction files.
//!
//! Instruction files are hand-edited, so identifiers show up with braces, stray quotes,
//! missing or misplaced dashes, and mixed case. Everything funnels through
//! [`parse_guid`] so the same normalization applies to component ids, dependency sets
//! and `Choose` references.

use indexmap::IndexSet;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::{Deref, DerefMut};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while normalizing an identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuidError {
    #[error("Identifier is empty")]
    Empty,

    #[error("'{0}' is not a valid GUID")]
    Invalid(String),
}

/// Parse a 128-bit GUID, tolerating surrounding braces, quotes, whitespace and dash variance.
///
/// # Examples
///
/// ```
/// use modsync::models::guid::parse_guid;
///
/// let a = parse_guid("{6B8C1E8A-3F0E-4C44-9E55-0E5C4B1F2A10}").unwrap();
/// let b = parse_guid("6b8c1e8a3f0e4c449e550e5c4b1f2a10").unwrap();
/// assert_eq!(a, b);
/// ```
pub fn parse_guid(raw: &str) -> Result<Uuid, GuidError> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();

    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .or_else(|| trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')))
        .unwrap_or(trimmed)
        .trim();

    if inner.is_empty() {
        return Err(GuidError::Empty);
    }

    let compact: String = inner
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    Uuid::try_parse(&compact).map_err(|_| GuidError::Invalid(raw.trim().to_string()))
}

/// Deserialize a single id, generating a fresh one when the value is unusable.
pub fn deserialize_or_new<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(parse_guid) {
        Some(Ok(id)) => Ok(id),
        Some(Err(e)) => {
            let id = Uuid::new_v4();
            tracing::warn!("{}; assigning generated id {}", e, id);
            Ok(id)
        }
        None => Ok(Uuid::new_v4()),
    }
}

/// Ordered set of referenced ids as written in an instruction file.
///
/// Entries that do not parse are kept verbatim in [`malformed`](Self::malformed) so they can
/// be reported and written back; they are serialized after the parsed ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    ids: IndexSet<Uuid>,
    malformed: Vec<String>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn malformed(&self) -> &[String] {
        &self.malformed
    }
}

impl Deref for ReferenceSet {
    type Target = IndexSet<Uuid>;

    fn deref(&self) -> &Self::Target {
        &self.ids
    }
}

impl DerefMut for ReferenceSet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ids
    }
}

impl FromIterator<Uuid> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
            malformed: Vec::new(),
        }
    }
}

impl<'de> Deserialize<'de> for ReferenceSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
        let mut set = ReferenceSet::new();

        for entry in raw {
            match parse_guid(&entry) {
                Ok(id) => {
                    set.ids.insert(id);
                }
                Err(GuidError::Empty) => {}
                Err(e) => {
                    tracing::warn!("Keeping malformed reference: {}", e);
                    set.malformed.push(entry);
                }
            }
        }

        Ok(set)
    }
}

impl Serialize for ReferenceSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.ids.len() + self.malformed.len()))?;
        for id in &self.ids {
            seq.serialize_element(id)?;
        }
        for raw in &self.malformed {
            seq.serialize_element(raw)?;
        }
        seq.end()
    }
}
