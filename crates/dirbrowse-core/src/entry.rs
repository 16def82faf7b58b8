//! Entry and attribute snapshot types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute snapshot: attribute name to its ordered values.
///
/// Names are unique keys and iterate in sorted order, which keeps change sets and logs
/// deterministic.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Builds an [`Attributes`] snapshot from `(name, values)` pairs.
///
/// A name given more than once keeps its last values.
#[must_use]
pub fn attributes<I, N, V>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (N, Vec<V>)>,
    N: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(name, values)| (name.into(), values.into_iter().map(Into::into).collect()))
        .collect()
}

/// One entry returned by the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub path: String,
    /// Attribute snapshot (values in the order the service returned them).
    #[serde(default)]
    pub attributes: Attributes,
}

impl DirectoryEntry {
    /// Creates an entry from its path and attributes.
    #[must_use]
    pub fn new(path: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            path: path.into(),
            attributes,
        }
    }

    /// Returns the first value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        first_value(&self.attributes, attribute)
    }

    /// Returns all values for the attribute.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes.get(attribute).map(Vec::as_slice)
    }
}

/// Returns the first value of `attribute` in a snapshot.
#[must_use]
pub fn first_value<'a>(attributes: &'a Attributes, attribute: &str) -> Option<&'a str> {
    attributes
        .get(attribute)
        .and_then(|values| values.first().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_attributes_from_pairs() {
        let attrs = attributes([("cn", vec!["Alice"]), ("mail", vec!["a@x", "alice@x"])]);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["mail"], vec!["a@x".to_string(), "alice@x".to_string()]);
    }

    #[test]
    fn entry_accessors() {
        let entry = DirectoryEntry::new(
            "uid=alice,ou=People,dc=example,dc=com",
            attributes([("cn", vec!["Alice"]), ("objectClass", Vec::<&str>::new())]),
        );
        assert_eq!(entry.first("cn"), Some("Alice"));
        assert_eq!(entry.first("objectClass"), None);
        assert_eq!(entry.first("sn"), None);
        assert_eq!(entry.values("cn").map(<[String]>::len), Some(1));
    }
}
