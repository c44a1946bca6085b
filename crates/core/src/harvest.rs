//! Job modes and scope descriptors shared by the scheduler, queue and workers.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::RawRecord;
use crate::entity::EntityKind;
use crate::error::CoreError;

/// What a job does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Shallow harvest of recently changed pages.
    Probe,
    /// Revisit known entities to confirm validity. Never discovers new ones.
    FreshnessCheck,
    /// Exhaustive crawl; the only mode allowed to infer absence.
    Full,
    /// Monitoring-lane liveness check; touches no entity state.
    HealthCheck,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Probe => "probe",
            JobMode::FreshnessCheck => "freshness_check",
            JobMode::Full => "full",
            JobMode::HealthCheck => "health_check",
        }
    }

    pub fn is_harvest(&self) -> bool {
        !matches!(self, JobMode::HealthCheck)
    }

    /// Whether unseen keys may be created as new entities.
    pub fn discovers_entities(&self) -> bool {
        matches!(self, JobMode::Probe | JobMode::Full)
    }

    /// Whether this mode has the coverage to treat absence as change.
    pub fn infers_absence(&self) -> bool {
        matches!(self, JobMode::Full)
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "probe" => Ok(JobMode::Probe),
            "freshness_check" | "freshness" => Ok(JobMode::FreshnessCheck),
            "full" => Ok(JobMode::Full),
            "health_check" | "health" => Ok(JobMode::HealthCheck),
            other => Err(CoreError::UnknownJobMode(other.to_string())),
        }
    }
}

/// Which part of the registry a job covers.
///
/// Empty `kinds` means every kind; empty `keys` means no key filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub kinds: BTreeSet<EntityKind>,
    #[serde(default)]
    pub keys: BTreeSet<String>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kinds<I: IntoIterator<Item = EntityKind>>(kinds: I) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            keys: BTreeSet::new(),
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn covers(&self, kind: EntityKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }

    /// Kinds this scope covers, expanded.
    pub fn covered_kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL.into_iter().filter(|k| self.covers(*k)).collect()
    }

    /// No key filter: every entity of the covered kinds is in scope.
    pub fn is_exhaustive(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn admits(&self, record: &RawRecord) -> bool {
        if !self.covers(record.kind) {
            return false;
        }
        if self.keys.is_empty() {
            return true;
        }
        record
            .natural_key()
            .map(|k| self.keys.contains(k))
            .unwrap_or(false)
    }

    /// Short label for logs, e.g. `all` or `standard,center[3 keys]`.
    pub fn label(&self) -> String {
        let kinds = if self.kinds.is_empty() {
            "all".to_string()
        } else {
            self.kinds.iter().map(EntityKind::as_str).collect::<Vec<_>>().join(",")
        };
        if self.keys.is_empty() {
            kinds
        } else {
            format!("{}[{} keys]", kinds, self.keys.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_full_mode_infers_absence() {
        assert!(JobMode::Full.infers_absence());
        assert!(!JobMode::Probe.infers_absence());
        assert!(!JobMode::FreshnessCheck.infers_absence());
    }

    #[test]
    fn health_check_is_the_only_non_harvest_mode() {
        assert!(!JobMode::HealthCheck.is_harvest());
        assert!(JobMode::Probe.is_harvest());
        assert!(JobMode::FreshnessCheck.is_harvest());
        assert!(JobMode::Full.is_harvest());
    }

    #[test]
    fn freshness_check_does_not_discover() {
        assert!(!JobMode::FreshnessCheck.discovers_entities());
        assert!(JobMode::Probe.discovers_entities());
    }

    #[test]
    fn job_mode_parses_kebab_and_snake() {
        assert_eq!("freshness-check".parse::<JobMode>().unwrap(), JobMode::FreshnessCheck);
        assert_eq!("health_check".parse::<JobMode>().unwrap(), JobMode::HealthCheck);
        assert!("nightly".parse::<JobMode>().is_err());
    }

    #[test]
    fn scope_admits_by_kind_and_key() {
        let scope = Scope::kinds([EntityKind::Standard]).with_keys(["EC0217"]);
        assert!(scope.admits(&RawRecord::new(EntityKind::Standard, "EC0217")));
        assert!(!scope.admits(&RawRecord::new(EntityKind::Standard, "EC0301")));
        assert!(!scope.admits(&RawRecord::new(EntityKind::Center, "EC0217")));
        assert!(!scope.is_exhaustive());
    }

    #[test]
    fn empty_scope_covers_everything() {
        let scope = Scope::all();
        assert!(scope.is_exhaustive());
        assert_eq!(scope.covered_kinds().len(), 3);
        assert_eq!(scope.label(), "all");
    }
}
