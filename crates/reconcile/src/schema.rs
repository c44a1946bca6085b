//! Per-kind field schemas and coercion of scraped values.
//!
//! Scraped payloads are mostly strings. Each kind declares the fields it
//! keeps and their types; everything else in a payload is ignored.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use tracing::debug;

use renec_core::{AttrValue, Attributes, CertifierKind, EntityKind, EntityRef, RawRecord};

use crate::error::RecordRejected;

/// Upstream's validity assertion. Accepted on every kind and stored on the
/// entity itself rather than among its attributes.
pub const VALIDITY_FIELD: &str = "vigente";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    Date,
    TextList,
    /// `ece` or `oc`, stored canonically.
    CertifierType,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

const fn field(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec { name, ty, required: false }
}

const fn required(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec { name, ty, required: true }
}

use FieldType::*;

const STANDARD_FIELDS: &[FieldSpec] = &[
    required("titulo", Text),
    field("version", Text),
    field("sector", Text),
    field("comite", Text),
    field("descripcion", Text),
    field("competencias", TextList),
    field("nivel", Integer),
    field("duracion_horas", Integer),
    field("fecha_publicacion", Date),
    field("fecha_vigencia", Date),
];

const CERTIFIER_FIELDS: &[FieldSpec] = &[
    required("tipo", CertifierType),
    required("razon_social", Text),
    field("nombre_corto", Text),
    field("estatus", Text),
    field("direccion", Text),
    field("estado", Text),
    field("municipio", Text),
    field("telefono", Text),
    field("correo", Text),
    field("sitio_web", Text),
    field("representante_legal", Text),
];

const CENTER_FIELDS: &[FieldSpec] = &[
    required("nombre", Text),
    field("coordinador", Text),
    field("telefono", Text),
    field("correo", Text),
    field("estado", Text),
    field("municipio", Text),
];

pub fn schema_for(kind: EntityKind) -> &'static [FieldSpec] {
    match kind {
        EntityKind::Standard => STANDARD_FIELDS,
        EntityKind::Certifier => CERTIFIER_FIELDS,
        EntityKind::Center => CENTER_FIELDS,
    }
}

/// A record that passed key and type checks.
///
/// `attributes` holds only the fields the record asserted. Required fields
/// are checked later against the merged state.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub entity: EntityRef,
    pub attributes: Attributes,
    pub vigente: Option<bool>,
    pub accreditations: Option<BTreeSet<String>>,
}

/// Check the natural key and coerce every known field.
pub fn validate(record: &RawRecord) -> Result<ValidatedRecord, RecordRejected> {
    let kind = record.kind;
    let key = record.natural_key().ok_or(RecordRejected::MissingKey {
        kind,
        field: kind.key_field(),
    })?;
    let entity = EntityRef::new(kind, key);
    let schema = schema_for(kind);

    let mut attributes = Attributes::new();
    let mut vigente = None;

    for (name, raw) in &record.attributes {
        if name == VALIDITY_FIELD {
            vigente = match coerce(Boolean, raw) {
                Ok(AttrValue::Boolean(b)) => Some(b),
                Ok(_) => None,
                Err(message) => {
                    return Err(RecordRejected::InvalidField {
                        entity,
                        field: name.clone(),
                        message,
                    })
                }
            };
            continue;
        }
        if name == kind.key_field() {
            continue;
        }
        let Some(spec) = schema.iter().find(|f| f.name == name) else {
            debug!(entity = %entity, field = %name, "ignoring unknown field");
            continue;
        };
        let value = coerce(spec.ty, raw).map_err(|message| RecordRejected::InvalidField {
            entity: entity.clone(),
            field: name.clone(),
            message,
        })?;
        attributes.insert(spec.name.to_string(), value);
    }

    let accreditations = record.accreditations.as_ref().map(|keys| {
        keys.iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    });

    Ok(ValidatedRecord {
        entity,
        attributes,
        vigente,
        accreditations,
    })
}

/// Every required field of the kind must be present and non-null.
pub fn check_required(entity: &EntityRef, merged: &Attributes) -> Result<(), RecordRejected> {
    for spec in schema_for(entity.kind).iter().filter(|f| f.required) {
        if merged.get(spec.name).map_or(true, AttrValue::is_null) {
            return Err(RecordRejected::MissingRequired {
                entity: entity.clone(),
                field: spec.name,
            });
        }
    }
    Ok(())
}

/// Coerce a scraped JSON value to the field's type. Blank strings and JSON
/// null become [`AttrValue::Null`].
pub fn coerce(ty: FieldType, raw: &Value) -> Result<AttrValue, String> {
    if let Value::String(s) = raw {
        if s.trim().is_empty() {
            return Ok(AttrValue::Null);
        }
    }
    if raw.is_null() {
        return Ok(AttrValue::Null);
    }

    match ty {
        Text => match raw {
            Value::String(s) => Ok(AttrValue::Text(s.trim().to_string())),
            Value::Number(n) => Ok(AttrValue::Text(n.to_string())),
            Value::Bool(b) => Ok(AttrValue::Text(b.to_string())),
            other => Err(format!("expected text, got {}", json_type(other))),
        },
        Integer => match raw {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(AttrValue::Integer)
                .ok_or_else(|| format!("'{n}' is not an integer")),
            Value::String(s) => {
                let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
                cleaned
                    .parse::<i64>()
                    .map(AttrValue::Integer)
                    .map_err(|_| format!("'{}' is not an integer", s.trim()))
            }
            other => Err(format!("expected integer, got {}", json_type(other))),
        },
        Boolean => match raw {
            Value::Bool(b) => Ok(AttrValue::Boolean(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(1) => Ok(AttrValue::Boolean(true)),
                Some(0) => Ok(AttrValue::Boolean(false)),
                _ => Err(format!("'{n}' is not a boolean")),
            },
            Value::String(s) => parse_bool(s)
                .map(AttrValue::Boolean)
                .ok_or_else(|| format!("'{}' is not a boolean", s.trim())),
            other => Err(format!("expected boolean, got {}", json_type(other))),
        },
        Date => match raw {
            Value::String(s) => parse_date(s)
                .map(AttrValue::Date)
                .ok_or_else(|| format!("'{}' is not a date (YYYY-MM-DD or DD/MM/YYYY)", s.trim())),
            other => Err(format!("expected date, got {}", json_type(other))),
        },
        TextList => match raw {
            Value::Array(items) => Ok(AttrValue::List(
                items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .filter(|s| !s.is_empty())
                    .collect(),
            )),
            Value::String(s) => Ok(AttrValue::List(
                s.split([';', '\n'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            other => Err(format!("expected list, got {}", json_type(other))),
        },
        CertifierType => match raw {
            Value::String(s) => match CertifierKind::parse(s) {
                Some(CertifierKind::EvaluatingBody) => Ok(AttrValue::Text("ece".into())),
                Some(CertifierKind::CertifyingBody) => Ok(AttrValue::Text("oc".into())),
                None => Err(format!("unknown certifier type '{}' (expected ece or oc)", s.trim())),
            },
            other => Err(format!("expected certifier type, got {}", json_type(other))),
        },
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_uppercase().as_str() {
        "SI" | "SÍ" | "S" | "YES" | "TRUE" | "1" | "VIGENTE" => Some(true),
        "NO" | "N" | "FALSE" | "0" | "NO VIGENTE" | "CANCELADO" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
