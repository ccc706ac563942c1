use serde::{Deserialize, Serialize};

use super::external::{SHIM_HEADER, SHIM_SOURCE};
use crate::model::{AnalysedModel, AnalysedVariable, VariableKind};

/// One variable of the generated code and where it lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub component: String,
    pub units: String,
    pub kind: VariableKind,
    pub index: usize,
}

impl From<&AnalysedVariable> for ManifestEntry {
    fn from(v: &AnalysedVariable) -> Self {
        Self {
            name: v.name.clone(),
            component: v.component.clone(),
            units: v.units.clone(),
            kind: v.kind,
            index: v.index,
        }
    }
}

/// Metadata of the generated code, written next to it as
/// `{model}.manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableManifest {
    pub model: String,
    pub voi: Option<ManifestEntry>,
    pub states: Vec<ManifestEntry>,
    pub variables: Vec<ManifestEntry>,
}

impl VariableManifest {
    #[must_use]
    pub fn from_model(model: &AnalysedModel) -> Self {
        Self {
            model: model.name.clone(),
            voi: model.voi.as_ref().map(ManifestEntry::from),
            states: model.states.iter().map(ManifestEntry::from).collect(),
            variables: model.variables.iter().map(ManifestEntry::from).collect(),
        }
    }

    /// All entries, VOI first, then states, then variables.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.voi.iter().chain(&self.states).chain(&self.variables)
    }

    pub fn find(&self, component: &str, name: &str) -> Option<&ManifestEntry> {
        self.entries()
            .find(|e| e.component == component && e.name == name)
    }
}

/// `model_files.cmake`, listing the generated sources for the solver build.
#[must_use]
pub fn cmake_descriptor(model_name: &str, with_shim: bool) -> String {
    let mut out = format!(
        "set(HEADER_FILENAME\n  {model_name}.h\n)\nset(MODEL_FILES\n  ${{CMAKE_CURRENT_BINARY_DIR}}/{model_name}.h\n  ${{CMAKE_CURRENT_BINARY_DIR}}/{model_name}.c\n"
    );
    if with_shim {
        out.push_str(&format!(
            "  ${{CMAKE_CURRENT_BINARY_DIR}}/{SHIM_HEADER}\n  ${{CMAKE_CURRENT_BINARY_DIR}}/{SHIM_SOURCE}\n"
        ));
    }
    out.push_str(")\n");
    out
}
