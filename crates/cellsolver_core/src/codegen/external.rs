//! The external-variable shim: a C hook that reads overridable variables
//! from the process environment of each trial.

use serde::{Deserialize, Serialize};

use crate::error::ModelGenerationError;
use crate::model::{AnalysedModel, VariableKind, VariableRef};

pub const SHIM_HEADER: &str = "external_variables.h";
pub const SHIM_SOURCE: &str = "external_variables.c";

/// An external variable resolved to its slot in `variables[]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalBinding {
    pub index: usize,
    pub name: String,
    pub component: String,
}

impl ExternalBinding {
    /// `{component}__{name}`, the variable a trial sets to override it.
    #[must_use]
    pub fn environment_name(&self) -> String {
        format!("{}__{}", self.component, self.name)
    }
}

/// Resolve each requested reference to the index analysis assigned it.
///
/// Bindings keep the request order. A reference that is not an external
/// variable of `model` is a resolution error.
pub fn bind_external_variables(
    model: &AnalysedModel,
    requested: &[VariableRef],
) -> Result<Vec<ExternalBinding>, ModelGenerationError> {
    requested
        .iter()
        .map(|reference| {
            let variable = model.find(reference).ok_or_else(|| ModelGenerationError::Resolution {
                reference: reference.to_string(),
                reason: "no such variable in the analysed model".to_string(),
            })?;
            if variable.kind != VariableKind::External {
                return Err(ModelGenerationError::Resolution {
                    reference: reference.to_string(),
                    reason: format!("analysed as {} rather than EXTERNAL", variable.kind),
                });
            }
            Ok(ExternalBinding {
                index: variable.index,
                name: reference.variable.clone(),
                component: reference.component.clone(),
            })
        })
        .collect()
}

#[must_use]
pub fn shim_header() -> String {
    "#pragma once\n\n#include <stddef.h>\n\ndouble computeExternalVariable(double voi, double *states, double *variables, size_t index);\n".to_string()
}

/// The shim implementation. Unbound indices and unset environment
/// variables evaluate to `0.0`.
#[must_use]
pub fn shim_source(bindings: &[ExternalBinding]) -> String {
    let mut out = String::new();
    out.push_str(&format!("#include \"{SHIM_HEADER}\"\n\n#include <stdlib.h>\n\n"));
    out.push_str("static double environmentValue(const char *name)\n{\n");
    out.push_str("    const char *value = getenv(name);\n\n");
    out.push_str("    return (value != NULL) ? atof(value) : 0.0;\n}\n\n");
    out.push_str(
        "double computeExternalVariable(double voi, double *states, double *variables, size_t index)\n{\n",
    );
    out.push_str("    (void) voi;\n    (void) states;\n    (void) variables;\n\n");
    for binding in bindings {
        out.push_str(&format!(
            "    if (index == {}) return environmentValue(\"{}\");\n",
            binding.index,
            binding.environment_name()
        ));
    }
    if !bindings.is_empty() {
        out.push('\n');
    }
    out.push_str("    return 0.0;\n}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shim_source_has_one_branch_per_binding() {
        let bindings = vec![
            ExternalBinding {
                index: 3,
                name: "l".to_string(),
                component: "dimensions".to_string(),
            },
            ExternalBinding {
                index: 4,
                name: "r".to_string(),
                component: "dimensions".to_string(),
            },
        ];
        let source = shim_source(&bindings);
        assert!(source.contains("if (index == 3) return environmentValue(\"dimensions__l\");"));
        assert!(source.contains("if (index == 4) return environmentValue(\"dimensions__r\");"));
        assert!(source.contains("return 0.0;"));
        assert!(source.contains("value != NULL"));
    }

    #[test]
    fn test_shim_header_declares_the_hook() {
        assert!(shim_header().contains(
            "double computeExternalVariable(double voi, double *states, double *variables, size_t index);"
        ));
    }
}
