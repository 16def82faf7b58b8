//! Attribute-level diffing of entry snapshots.
//!
//! [`diff`] turns an original and an edited snapshot into the smallest list of
//! [`AttributeChange`] operations that transforms one into the other. Multi-valued
//! attributes are compared as ordered sequences: reordering values without changing them
//! still yields a `Replace`.

use crate::entry::Attributes;
use serde::{Deserialize, Serialize};

/// One attribute-level change operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum AttributeChange {
    /// Add an attribute that the entry does not have yet.
    Add {
        /// Attribute to add.
        attribute: String,
        /// Values to add.
        values: Vec<String>,
    },
    /// Replace every value of an existing attribute.
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values.
        values: Vec<String>,
    },
    /// Remove an attribute with all its values.
    Delete {
        /// Attribute to remove.
        attribute: String,
    },
}

impl AttributeChange {
    /// Name of the attribute this change targets.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Replace { attribute, .. }
            | Self::Delete { attribute } => attribute,
        }
    }
}

/// Ordered, immutable sequence of attribute changes produced by [`diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeChangeSet {
    changes: Vec<AttributeChange>,
}

impl AttributeChangeSet {
    /// Builds a change set from explicit operations.
    #[must_use]
    pub fn new(changes: Vec<AttributeChange>) -> Self {
        Self { changes }
    }

    /// Single-operation change set replacing `attribute` with one value.
    #[must_use]
    pub fn replace_value(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(vec![AttributeChange::Replace {
            attribute: attribute.into(),
            values: vec![value.into()],
        }])
    }

    /// Operations in submission order.
    #[must_use]
    pub fn changes(&self) -> &[AttributeChange] {
        &self.changes
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there is nothing to submit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Iterates over the operations.
    pub fn iter(&self) -> std::slice::Iter<'_, AttributeChange> {
        self.changes.iter()
    }

    /// Applies the operations to a copy of `attributes`.
    ///
    /// This mirrors what the directory service does on a successful modify, so a cached
    /// snapshot can be brought up to date without re-reading the entry.
    #[must_use]
    pub fn apply_to(&self, attributes: &Attributes) -> Attributes {
        let mut result = attributes.clone();
        for change in &self.changes {
            match change {
                AttributeChange::Add { attribute, values } => {
                    result
                        .entry(attribute.clone())
                        .or_default()
                        .extend(values.iter().cloned());
                }
                AttributeChange::Replace { attribute, values } => {
                    result.insert(attribute.clone(), values.clone());
                }
                AttributeChange::Delete { attribute } => {
                    result.remove(attribute);
                }
            }
        }
        result
    }
}

impl<'a> IntoIterator for &'a AttributeChangeSet {
    type Item = &'a AttributeChange;
    type IntoIter = std::slice::Iter<'a, AttributeChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl IntoIterator for AttributeChangeSet {
    type Item = AttributeChange;
    type IntoIter = std::vec::IntoIter<AttributeChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Computes the change set that turns `original` into `modified`.
///
/// Attributes only in `modified` become `Add`, attributes in both with different value
/// sequences become `Replace` with the full new list, and attributes only in `original`
/// become `Delete`. Adds and replaces come first in attribute-name order, then deletes.
#[must_use]
pub fn diff(original: &Attributes, modified: &Attributes) -> AttributeChangeSet {
    let mut changes = Vec::new();

    for (attribute, values) in modified {
        match original.get(attribute) {
            None => changes.push(AttributeChange::Add {
                attribute: attribute.clone(),
                values: values.clone(),
            }),
            Some(previous) if previous != values => changes.push(AttributeChange::Replace {
                attribute: attribute.clone(),
                values: values.clone(),
            }),
            Some(_) => {}
        }
    }

    changes.extend(
        original
            .keys()
            .filter(|attribute| !modified.contains_key(*attribute))
            .map(|attribute| AttributeChange::Delete {
                attribute: attribute.clone(),
            }),
    );

    AttributeChangeSet::new(changes)
}
