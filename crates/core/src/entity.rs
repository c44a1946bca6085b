use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{AttrValue, Attributes};
use crate::error::CoreError;

/// The three kinds of registry entity mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Standard,
    Certifier,
    Center,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Standard, EntityKind::Certifier, EntityKind::Center];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Standard => "standard",
            EntityKind::Certifier => "certifier",
            EntityKind::Center => "center",
        }
    }

    /// Name of the natural key field in upstream payloads.
    pub fn key_field(&self) -> &'static str {
        match self {
            EntityKind::Standard => "clave",
            EntityKind::Certifier => "cert_id",
            EntityKind::Center => "center_id",
        }
    }

    /// Whether records of this kind carry accreditation keys.
    pub fn bears_accreditations(&self) -> bool {
        matches!(self, EntityKind::Standard | EntityKind::Certifier)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "standards" | "ec" => Ok(EntityKind::Standard),
            "certifier" | "certifiers" => Ok(EntityKind::Certifier),
            "center" | "centers" | "centre" => Ok(EntityKind::Center),
            other => Err(CoreError::UnknownEntityKind(other.to_string())),
        }
    }
}

/// (kind, natural key) pair. The unit of per-key serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub key: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, key: impl Into<String>) -> Self {
        Self { kind, key: key.into() }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Whether a certifier evaluates candidates or certifies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertifierKind {
    EvaluatingBody,
    CertifyingBody,
}

impl CertifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertifierKind::EvaluatingBody => "evaluating_body",
            CertifierKind::CertifyingBody => "certifying_body",
        }
    }

    /// Parse the upstream label. Accepts the snake/kebab forms and the
    /// registry's abbreviations.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "evaluating_body" | "ece" | "ce" => Some(CertifierKind::EvaluatingBody),
            "certifying_body" | "oc" => Some(CertifierKind::CertifyingBody),
            _ => None,
        }
    }
}

/// Reconciled state of one registry entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub key: String,
    pub attributes: Attributes,
    /// Upstream's current validity assertion.
    pub vigente: bool,
    /// Set when an exhaustive full harvest did not observe this entity.
    pub stale: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Entity {
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.key.clone())
    }

    pub fn attr(&self, field: &str) -> Option<&AttrValue> {
        self.attributes.get(field).filter(|v| !v.is_null())
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.attr(field).and_then(AttrValue::as_str)
    }

    /// Human-readable display name, whichever field the kind uses for it.
    pub fn display_name(&self) -> Option<&str> {
        match self.kind {
            EntityKind::Standard => self.text("titulo"),
            EntityKind::Certifier => self.text("nombre_corto").or_else(|| self.text("razon_social")),
            EntityKind::Center => self.text("nombre"),
        }
    }

    pub fn certifier_kind(&self) -> Option<CertifierKind> {
        if self.kind != EntityKind::Certifier {
            return None;
        }
        self.text("tipo").and_then(CertifierKind::parse)
    }
}

/// Accreditation of one certifier for one standard.
///
/// Identity is the key pair. Edges are never deleted by harvesting; an edge
/// that a full harvest did not reassert is kept with `current = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccreditationEdge {
    pub standard_key: String,
    pub certifier_key: String,
    pub current: bool,
    pub first_asserted: DateTime<Utc>,
    pub last_asserted: DateTime<Utc>,
}

impl AccreditationEdge {
    /// Whether this edge touches the given entity.
    pub fn touches(&self, entity: &EntityRef) -> bool {
        match entity.kind {
            EntityKind::Standard => self.standard_key == entity.key,
            EntityKind::Certifier => self.certifier_key == entity.key,
            EntityKind::Center => false,
        }
    }
}
