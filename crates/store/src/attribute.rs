//! Attribute values stored in a collection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the attribute holding an item's primary key.
pub const KEY_ATTRIBUTE: &str = "id";

/// A stored record: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A typed attribute value.
///
/// Numbers are kept as decimal text so integers round-trip exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null,
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::S(value.into())
    }

    pub fn number(value: i64) -> Self {
        Self::N(value.to_string())
    }

    pub fn map() -> Self {
        Self::M(BTreeMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Parse a numeric value as `i64`. Fails for non-numbers and for
    /// decimal text that is not an integer in range.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::N(n) => n.parse().ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            Self::M(m) => Some(m),
            _ => None,
        }
    }

    /// Short type tag used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::Bool(_) => "BOOL",
            Self::Null => "NULL",
            Self::M(_) => "M",
        }
    }
}

/// Path to a (possibly nested) attribute.
///
/// Segments are literal map keys. A campaign id containing `.` is a single
/// segment, not two.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    parents: Vec<String>,
    last: String,
}

impl FieldPath {
    /// Build a path from its segments. Returns `None` for an empty path or
    /// a path that would address the key attribute itself.
    pub fn new<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parents: Vec<String> = segments.into_iter().map(Into::into).collect();
        let last = parents.pop()?;
        let first = parents.first().unwrap_or(&last);
        if first == KEY_ATTRIBUTE {
            return None;
        }
        Some(Self { parents, last })
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.parents
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.last.as_str()))
    }

    /// Split into the parent segments and the final segment.
    pub fn split_last(&self) -> (&[String], &str) {
        (&self.parents, &self.last)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_keep_full_precision() {
        let big = AttributeValue::number(i64::MAX);
        assert_eq!(big, AttributeValue::N("9223372036854775807".into()));
        assert_eq!(big.as_i64(), Some(i64::MAX));
    }

    #[test]
    fn non_integer_numbers_do_not_parse() {
        assert_eq!(AttributeValue::N("1.5".into()).as_i64(), None);
        assert_eq!(AttributeValue::N("9223372036854775808".into()).as_i64(), None);
        assert_eq!(AttributeValue::string("3").as_i64(), None);
    }

    #[test]
    fn serializes_in_tagged_form() {
        let mut campaigns = BTreeMap::new();
        campaigns.insert("c1".to_string(), AttributeValue::number(2));
        let value = AttributeValue::M(campaigns);

        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"M":{"c1":{"N":"2"}}}"#);
        assert_eq!(serde_json::from_str::<AttributeValue>(&json).unwrap(), value);
    }

    #[test]
    fn path_rejects_empty_and_key() {
        assert!(FieldPath::new(Vec::<String>::new()).is_none());
        assert!(FieldPath::new(["id"]).is_none());

        let path = FieldPath::new(["campaigns", "a.b"]).unwrap();
        assert_eq!(path.segments().collect::<Vec<_>>(), ["campaigns", "a.b"]);
        assert_eq!(path.split_last(), (&["campaigns".to_string()][..], "a.b"));
        assert_eq!(path.to_string(), r#""campaigns"."a.b""#);
    }
}
