//! Distinguished name parsing used to address tree nodes.

use std::fmt::{self, Write as _};
use std::str::FromStr;
use thiserror::Error;

use dirbrowse_core::Error as CoreError;

/// Errors that can occur when parsing a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component had no `=` or contained a delimiter in the attribute name.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component had nothing before the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component had nothing after the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The name ended in the middle of an escape sequence.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DistinguishedNameError> for CoreError {
    fn from(err: DistinguishedNameError) -> Self {
        CoreError::InvalidPath(err.to_string())
    }
}

/// One `attribute=value` pair of a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Creates a pair from an attribute name and an unescaped value.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute name, e.g. `cn`.
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Parsed distinguished name.
///
/// Components are kept leaf first. Each component may hold several `+`-joined pairs.
/// Backslash escapes of a single character and of a hex pair (`\2C`) are decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    rdns: Vec<Vec<RelativeDistinguishedName>>,
}

impl DistinguishedName {
    /// Parses a distinguished name.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the name is empty or malformed.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let mut rdns = Vec::new();
        let mut rdn = Vec::new();
        let mut pair = PairBuilder::default();
        let mut start = 0;
        let mut chars = raw.char_indices().peekable();

        while let Some((index, ch)) = chars.next() {
            match ch {
                '\\' => {
                    let (_, next) = chars
                        .next()
                        .ok_or(DistinguishedNameError::UnterminatedEscape)?;
                    let byte = match chars.peek() {
                        Some(&(_, low)) => hex_byte(next, low),
                        None => None,
                    };
                    if byte.is_some() {
                        chars.next();
                    }
                    pair.push_escaped(next, byte, &raw[start..])?;
                }
                '=' if !pair.in_value() => pair.start_value(&raw[start..])?,
                ',' | '+' if pair.in_value() => {
                    rdn.push(pair.finish(&raw[start..index])?);
                    if ch == ',' {
                        rdns.push(std::mem::take(&mut rdn));
                        start = index + 1;
                    }
                }
                _ => pair.push(ch, &raw[start..])?,
            }
        }
        rdn.push(pair.finish(&raw[start..])?);
        rdns.push(rdn);

        Ok(Self { rdns })
    }

    /// Leaf-first components.
    #[must_use]
    pub fn rdns(&self) -> &[Vec<RelativeDistinguishedName>] {
        &self.rdns
    }

    /// Unescaped value of the leaf component (`bob` in `uid=bob,ou=People`).
    #[must_use]
    pub fn leaf_value(&self) -> Option<&str> {
        self.rdns
            .first()
            .and_then(|rdn| rdn.first())
            .map(RelativeDistinguishedName::value)
    }

    /// Name of the parent entry, `None` for a single-component name.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        (self.rdns.len() > 1).then(|| Self {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    /// Lowercased canonical form, equal for names that differ only in spacing, escaping or
    /// letter case.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.to_string().to_lowercase()
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            for (j, pair) in rdn.iter().enumerate() {
                if j > 0 {
                    f.write_char('+')?;
                }
                write!(f, "{}=", pair.attribute)?;
                write_escaped(f, &pair.value)?;
            }
        }
        Ok(())
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Comparison key for a path: the normalized name, or the trimmed input when it does not
/// parse (including the empty top-level root).
#[must_use]
pub fn path_key(path: &str) -> String {
    DistinguishedName::parse(path).map_or_else(|_| path.trim().to_string(), |dn| dn.normalized())
}

/// Returns true if both strings name the same entry.
#[must_use]
pub fn same_path(left: &str, right: &str) -> bool {
    path_key(left) == path_key(right)
}

/// Unescaped value of the first component of `path`.
///
/// Only the text up to the first unescaped `,` is parsed, so a malformed tail does not
/// hide the leaf value.
#[must_use]
pub fn leaf_value(path: &str) -> Option<String> {
    DistinguishedName::parse(first_component(path))
        .ok()?
        .leaf_value()
        .map(str::to_string)
}

fn first_component(path: &str) -> &str {
    let mut escaped = false;
    for (index, ch) in path.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => return &path[..index],
            _ => {}
        }
    }
    path
}

/// Path of the parent entry, if `path` is a valid multi-component name.
#[must_use]
pub fn parent_path(path: &str) -> Option<String> {
    DistinguishedName::parse(path)
        .ok()
        .and_then(|dn| dn.parent())
        .map(|parent| parent.to_string())
}

/// Accumulates one `attribute=value` pair while scanning.
#[derive(Default)]
struct PairBuilder {
    attribute: Option<String>,
    name: String,
    value: Vec<u8>,
    // Value length up to the last byte that is not an unescaped trailing space.
    significant: usize,
}

impl PairBuilder {
    fn in_value(&self) -> bool {
        self.attribute.is_some()
    }

    fn start_value(&mut self, context: &str) -> std::result::Result<(), DistinguishedNameError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DistinguishedNameError::MissingAttribute(
                context.trim().to_string(),
            ));
        }
        self.attribute = Some(name.to_string());
        Ok(())
    }

    fn push(&mut self, ch: char, context: &str) -> std::result::Result<(), DistinguishedNameError> {
        if !self.in_value() {
            if matches!(ch, ',' | '+') {
                return Err(DistinguishedNameError::InvalidComponent(
                    context.trim().to_string(),
                ));
            }
            self.name.push(ch);
            return Ok(());
        }
        if ch == ' ' && self.value.is_empty() {
            return Ok(());
        }
        self.value
            .extend_from_slice(ch.encode_utf8(&mut [0; 4]).as_bytes());
        if ch != ' ' {
            self.significant = self.value.len();
        }
        Ok(())
    }

    fn push_escaped(
        &mut self,
        ch: char,
        byte: Option<u8>,
        context: &str,
    ) -> std::result::Result<(), DistinguishedNameError> {
        if !self.in_value() {
            return Err(DistinguishedNameError::InvalidComponent(
                context.trim().to_string(),
            ));
        }
        match byte {
            Some(byte) => self.value.push(byte),
            None => self
                .value
                .extend_from_slice(ch.encode_utf8(&mut [0; 4]).as_bytes()),
        }
        self.significant = self.value.len();
        Ok(())
    }

    fn finish(
        &mut self,
        context: &str,
    ) -> std::result::Result<RelativeDistinguishedName, DistinguishedNameError> {
        let invalid = || DistinguishedNameError::InvalidComponent(context.trim().to_string());
        let Self {
            attribute,
            mut value,
            significant,
            ..
        } = std::mem::take(self);
        let attribute = attribute.ok_or_else(invalid)?;
        value.truncate(significant);
        if value.is_empty() {
            return Err(DistinguishedNameError::MissingValue(attribute));
        }
        let value = String::from_utf8(value).map_err(|_| invalid())?;
        Ok(RelativeDistinguishedName::new(attribute, value))
    }
}

fn hex_byte(high: char, low: char) -> Option<u8> {
    let high = high.to_digit(16)?;
    let low = low.to_digit(16)?;
    u8::try_from(high * 16 + low).ok()
}

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    for (i, ch) in value.char_indices() {
        let special = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=');
        let leading = i == 0 && matches!(ch, ' ' | '#');
        let trailing = ch == ' ' && i + 1 == value.len();
        if special || leading || trailing {
            f.write_char('\\')?;
        }
        f.write_char(ch)?;
    }
    Ok(())
}
