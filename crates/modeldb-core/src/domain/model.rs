//! Model identity: the accession number and version metadata of a ModelDB entry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// ModelDB accession number.
///
/// Stable across the registry, the package cache and run records. Run records
/// store it as a JSON object key, so it round-trips through its decimal string
/// form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ModelId(pub u64);

impl ModelId {
    /// Key reserved for the run summary in persisted run records.
    pub const SUMMARY: ModelId = ModelId(0);

    pub fn is_summary(&self) -> bool {
        *self == Self::SUMMARY
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ModelId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(ModelId)
    }
}

impl From<u64> for ModelId {
    fn from(id: u64) -> Self {
        ModelId(id)
    }
}

/// Immutable identity of one ModelDB model.
///
/// `ver_date` is the version fingerprint: when it changes, any cached package
/// for this model is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    #[serde(alias = "object_id")]
    pub id: ModelId,

    #[serde(alias = "object_name")]
    pub name: String,

    #[serde(alias = "object_created", default)]
    pub created: String,

    #[serde(alias = "object_ver_date", alias = "last_modified", default)]
    pub ver_date: String,
}

impl ModelIdentity {
    pub fn new(
        id: impl Into<ModelId>,
        name: impl Into<String>,
        created: impl Into<String>,
        ver_date: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created: created.into(),
            ver_date: ver_date.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_parse_and_display() {
        let id: ModelId = " 23613 ".parse().unwrap();
        assert_eq!(id, ModelId(23613));
        assert_eq!(id.to_string(), "23613");
        assert!("abc".parse::<ModelId>().is_err());
    }

    #[test]
    fn test_summary_key_is_zero() {
        assert!(ModelId(0).is_summary());
        assert!(!ModelId(3264).is_summary());
    }

    #[test]
    fn test_identity_accepts_modeldb_api_field_names() {
        let yaml = "object_id: 3264\nobject_name: Mainen Sejnowski\nobject_created: '1996'\nobject_ver_date: '2019-05-23'\n";
        let identity: ModelIdentity = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(identity.id, ModelId(3264));
        assert_eq!(identity.name, "Mainen Sejnowski");
        assert_eq!(identity.ver_date, "2019-05-23");
    }
}
