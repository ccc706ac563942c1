//! In-memory model representation and the toolchain that reads, checks and
//! analyses it.
//!
//! The stages are strictly ordered: parse, validate, analyse. Each stage
//! only runs once the previous one reported no errors. [`ModelToolchain`] is
//! the seam between the compiler and a concrete modelling language; the
//! crate ships [`CellmlToolchain`] for CellML 2.0.

mod analysis;
mod cellml;
mod expr;
mod validate;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelGenerationError;

pub use analysis::{AnalysedEquation, AnalysedModel, AnalysedVariable, Analyser, EquationKind};
pub use cellml::{CELLML_2_0_NS, MATHML_NS, parse_model};
pub use expr::{Expr, Operator, Slot};
pub use validate::validate_model;

/// A parsed model: named components, their variables and equations, and
/// the connections that make variables in different components equivalent.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub components: Vec<Component>,
    pub connections: Vec<Connection>,
}

impl Model {
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn variable(&self, reference: &VariableRef) -> Option<&Variable> {
        self.component(&reference.component)?
            .variable(&reference.variable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub variables: Vec<Variable>,
    pub equations: Vec<Equation>,
}

impl Component {
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub units: Option<String>,
    pub initial_value: Option<InitialValue>,
    pub interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitialValue {
    Constant(f64),
    /// Name of another variable in the same component.
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub component_1: String,
    pub component_2: String,
    /// Pairs of (variable in `component_1`, variable in `component_2`).
    pub mappings: Vec<(String, String)>,
}

/// `lhs = rhs` as written inside a component.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

/// How the analysis classified a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    VariableOfIntegration,
    State,
    Constant,
    ComputedConstant,
    Algebraic,
    External,
}

impl VariableKind {
    /// Name used for the generated C enumeration.
    #[must_use]
    pub fn c_name(self) -> &'static str {
        match self {
            VariableKind::VariableOfIntegration => "VARIABLE_OF_INTEGRATION",
            VariableKind::State => "STATE",
            VariableKind::Constant => "CONSTANT",
            VariableKind::ComputedConstant => "COMPUTED_CONSTANT",
            VariableKind::Algebraic => "ALGEBRAIC",
            VariableKind::External => "EXTERNAL",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// A `component.variable` reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariableRef {
    pub component: String,
    pub variable: String,
}

impl VariableRef {
    pub fn new(component: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            variable: variable.into(),
        }
    }

    /// Name of the process environment variable that carries an override
    /// for this variable: `{component}__{variable}`.
    #[must_use]
    pub fn environment_name(&self) -> String {
        format!("{}__{}", self.component, self.variable)
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.variable)
    }
}

impl FromStr for VariableRef {
    type Err = ModelGenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ModelGenerationError::Resolution {
            reference: s.to_string(),
            reason: reason.to_string(),
        };
        let (component, variable) = s
            .split_once('.')
            .ok_or_else(|| invalid("expected `component.variable`"))?;
        if component.is_empty() || variable.is_empty() || variable.contains('.') {
            return Err(invalid("expected `component.variable`"));
        }
        Ok(Self::new(component, variable))
    }
}

impl TryFrom<String> for VariableRef {
    type Error = ModelGenerationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VariableRef> for String {
    fn from(value: VariableRef) -> Self {
        value.to_string()
    }
}

/// The parse, validate and analyse stages for one modelling language.
pub trait ModelToolchain {
    fn parse(&self, source: &str) -> Result<Model, ModelGenerationError>;

    fn validate(&self, model: &Model) -> Result<(), ModelGenerationError>;

    /// Analyse `model`. The requested external variables are registered
    /// before analysis runs so they are kept out of equation resolution.
    fn analyse(
        &self,
        model: &Model,
        external_variables: &[VariableRef],
    ) -> Result<AnalysedModel, ModelGenerationError>;
}

/// CellML 2.0 toolchain.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellmlToolchain;

impl ModelToolchain for CellmlToolchain {
    fn parse(&self, source: &str) -> Result<Model, ModelGenerationError> {
        parse_model(source)
    }

    fn validate(&self, model: &Model) -> Result<(), ModelGenerationError> {
        validate_model(model)
    }

    fn analyse(
        &self,
        model: &Model,
        external_variables: &[VariableRef],
    ) -> Result<AnalysedModel, ModelGenerationError> {
        let mut analyser = Analyser::new();
        for reference in external_variables {
            analyser.add_external_variable(reference.clone());
        }
        analyser.analyse(model)
    }
}
