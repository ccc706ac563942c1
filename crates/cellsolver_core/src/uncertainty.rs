//! Parameter uncertainties and their statistical-model encoding.
//!
//! An uncertainty spec maps `component.variable` to a distribution:
//!
//! ```json
//! {
//!   "dimensions.l": {"distribution": "normal", "p1": 6, "p2": 0.5},
//!   "dimensions.r": {"distribution": "normal", "p1": 2, "p2": 3}
//! }
//! ```
//!
//! [`encode`] turns it into a [`StatisticalModel`]: one parameter per entry,
//! valued at `p1`, with an initial assignment `distribution(p1, p2, ...)`.
//! The arguments are always in `p1..p4` order, however the JSON ordered them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DistributionError};
use crate::model::VariableRef;

/// `{distribution, p1, p2?, p3?, p4?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionSpec {
    pub distribution: String,
    pub p1: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p3: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p4: Option<f64>,
}

impl DistributionSpec {
    /// The populated arguments in key order.
    #[must_use]
    pub fn arguments(&self) -> Vec<f64> {
        std::iter::once(self.p1)
            .chain([self.p2, self.p3, self.p4].into_iter().flatten())
            .collect()
    }

    /// `name(p1, p2, ...)`, the textual initializer.
    #[must_use]
    pub fn initializer(&self) -> String {
        let args: Vec<String> = self.arguments().iter().map(f64::to_string).collect();
        format!("{}({})", self.distribution, args.join(", "))
    }
}

/// Parameter reference to distribution, ordered by reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UncertaintySpec(pub BTreeMap<String, DistributionSpec>);

impl UncertaintySpec {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DistributionSpec)> {
        self.0.iter()
    }

    /// The model variables the spec overrides, which must be generated as
    /// external variables.
    pub fn external_variables(&self) -> Result<Vec<VariableRef>, ConfigError> {
        self.0
            .keys()
            .map(|key| {
                key.parse().map_err(|e| {
                    ConfigError::invalid(format!("uncertainties.{key}"), format!("{e}"))
                })
            })
            .collect()
    }
}

/// `.` becomes `__`: `dimensions.l` is declared as `dimensions__l`.
#[must_use]
pub fn sanitize_reference(reference: &str) -> String {
    reference.replace('.', "__")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: String,
    pub value: f64,
    pub units: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialAssignment {
    pub symbol: String,
    pub math: String,
}

/// A statistical model document in the spirit of SBML with the `distrib`
/// package: declared parameters, each initialised by a distribution call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalModel {
    pub id: String,
    pub packages: Vec<String>,
    pub parameters: Vec<Parameter>,
    pub initial_assignments: Vec<InitialAssignment>,
}

impl StatisticalModel {
    pub fn to_json(&self) -> Result<String, DistributionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(document: &str) -> Result<Self, DistributionError> {
        Ok(serde_json::from_str(document)?)
    }
}

/// Encode `spec` as a statistical model.
///
/// Distribution names and arities are not checked here; the sampler
/// rejects them when drawing.
pub fn encode(spec: &UncertaintySpec) -> Result<StatisticalModel, DistributionError> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    let mut parameters = Vec::with_capacity(spec.0.len());
    let mut initial_assignments = Vec::with_capacity(spec.0.len());

    for (reference, distribution) in spec.iter() {
        let id = sanitize_reference(reference);
        if let Some(first) = seen.insert(id.clone(), reference.as_str()) {
            return Err(DistributionError::IdentifierCollision {
                first: first.to_string(),
                second: reference.clone(),
                identifier: id,
            });
        }
        parameters.push(Parameter {
            id: id.clone(),
            value: distribution.p1,
            units: "dimensionless".to_string(),
        });
        initial_assignments.push(InitialAssignment {
            symbol: id,
            math: distribution.initializer(),
        });
    }

    Ok(StatisticalModel {
        id: "uncertainties".to_string(),
        packages: vec!["distrib".to_string()],
        parameters,
        initial_assignments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(json: &str) -> UncertaintySpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_encoding_ignores_key_order() {
        let a = encode(&spec(
            r#"{"dimensions.l": {"distribution": "normal", "p2": 0.5, "p1": 6}}"#,
        ))
        .unwrap();
        let b = encode(&spec(
            r#"{"dimensions.l": {"p1": 6, "distribution": "normal", "p2": 0.5}}"#,
        ))
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.initial_assignments[0].math, "normal(6, 0.5)");
        assert_eq!(a.initial_assignments[0].symbol, "dimensions__l");
        assert_eq!(a.parameters[0].value, 6.0);
    }

    #[test]
    fn test_parameters_follow_reference_order() {
        let model = encode(&spec(
            r#"{
                "dimensions.r": {"distribution": "uniform", "p1": 1, "p2": 3},
                "dimensions.l": {"distribution": "normal", "p1": 6, "p2": 0.5}
            }"#,
        ))
        .unwrap();
        let ids: Vec<&str> = model.parameters.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["dimensions__l", "dimensions__r"]);
    }

    #[test]
    fn test_unknown_distribution_passes_through() {
        let model = encode(&spec(r#"{"a.b": {"distribution": "zipf", "p1": 2}}"#)).unwrap();
        assert_eq!(model.initial_assignments[0].math, "zipf(2)");
    }

    #[test]
    fn test_colliding_identifiers_are_rejected() {
        let err = encode(&spec(
            r#"{
                "a.b__c": {"distribution": "normal", "p1": 1, "p2": 1},
                "a__b.c": {"distribution": "normal", "p1": 1, "p2": 1}
            }"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            DistributionError::IdentifierCollision { ref identifier, .. } if identifier == "a__b__c"
        ));
    }

    #[test]
    fn test_descriptor_keys_are_checked() {
        let unknown = serde_json::from_str::<UncertaintySpec>(
            r#"{"a.b": {"distribution": "normal", "p1": 1, "p5": 1}}"#,
        );
        assert!(unknown.is_err());
        let missing = serde_json::from_str::<UncertaintySpec>(
            r#"{"a.b": {"distribution": "normal", "p2": 1}}"#,
        );
        assert!(missing.is_err());
    }

    #[test]
    fn test_external_variables_from_keys() {
        let refs = spec(r#"{"dimensions.l": {"distribution": "normal", "p1": 6, "p2": 0.5}}"#)
            .external_variables()
            .unwrap();
        assert_eq!(refs, vec![VariableRef::new("dimensions", "l")]);

        let bad = spec(r#"{"nodot": {"distribution": "normal", "p1": 6, "p2": 0.5}}"#);
        assert!(bad.external_variables().is_err());
    }

    #[test]
    fn test_document_round_trip() {
        let model = encode(&spec(r#"{"a.b": {"distribution": "poisson", "p1": 4}}"#)).unwrap();
        let back = StatisticalModel::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(back, model);
        assert_eq!(back.packages, vec!["distrib"]);
    }
}
