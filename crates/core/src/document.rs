use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// Validated attribute set of a reconciled entity, ordered for stable diffs.
pub type Attributes = BTreeMap<String, AttrValue>;

/// One observation produced by the extractor for a single registry page.
///
/// The payload is loosely typed: attribute values arrive exactly as the
/// extractor scraped them (mostly strings). Coercion into [`AttrValue`]s
/// happens at the reconciliation boundary against the kind's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(alias = "entityKind", alias = "entity_kind")]
    pub kind: EntityKind,
    /// Natural key (`clave`, `cert_id`, `center_id`). Missing keys are
    /// rejected by the engine, not by the parser.
    #[serde(default, alias = "naturalKey", alias = "natural_key")]
    pub key: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Keys on the other side of the accreditation graph asserted by this
    /// page. `None` means the page did not carry a list at all, which is
    /// different from an empty list.
    #[serde(
        default,
        alias = "accreditationKeys",
        alias = "accreditation_keys",
        skip_serializing_if = "Option::is_none"
    )]
    pub accreditations: Option<BTreeSet<String>>,
}

impl RawRecord {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: Some(key.into()),
            attributes: serde_json::Map::new(),
            accreditations: None,
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn with_accreditations<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accreditations = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Trimmed natural key, `None` when missing or blank.
    pub fn natural_key(&self) -> Option<&str> {
        self.key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// Typed attribute values. Source data arrives as strings but the schema
/// decides the type each field is stored with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Date(NaiveDate),
    List(Vec<String>),
    Null,
}

impl AttrValue {
    /// Extract as string, returning None for non-text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Text(s) => write!(f, "{s}"),
            AttrValue::Integer(n) => write!(f, "{n}"),
            AttrValue::Boolean(b) => write!(f, "{b}"),
            AttrValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            AttrValue::List(items) => write!(f, "{}", items.join("; ")),
            AttrValue::Null => write!(f, "null"),
        }
    }
}
