use rustc_hash::FxHashSet;

use super::{InitialValue, Model};
use crate::error::ModelGenerationError;

const INTERFACES: [&str; 4] = ["public", "private", "public_and_private", "none"];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check the static rules of the modelling language.
///
/// All problems are reported together rather than stopping at the first.
pub fn validate_model(model: &Model) -> Result<(), ModelGenerationError> {
    let mut issues = Vec::new();

    if !is_identifier(&model.name) {
        issues.push(format!("model name `{}` is not a valid identifier", model.name));
    }

    let mut component_names = FxHashSet::default();
    for component in &model.components {
        if !is_identifier(&component.name) {
            issues.push(format!(
                "component name `{}` is not a valid identifier",
                component.name
            ));
        }
        if !component_names.insert(component.name.as_str()) {
            issues.push(format!("component `{}` is defined more than once", component.name));
        }

        let mut variable_names = FxHashSet::default();
        for variable in &component.variables {
            let at = format!("variable `{}` in component `{}`", variable.name, component.name);
            if !is_identifier(&variable.name) {
                issues.push(format!("{at} does not have a valid name"));
            }
            if !variable_names.insert(variable.name.as_str()) {
                issues.push(format!("{at} is defined more than once"));
            }
            if variable.units.as_deref().is_none_or(str::is_empty) {
                issues.push(format!("{at} has no units"));
            }
            if let Some(interface) = &variable.interface
                && !INTERFACES.contains(&interface.as_str())
            {
                issues.push(format!("{at} has an invalid interface `{interface}`"));
            }
            if let Some(InitialValue::Variable(reference)) = &variable.initial_value
                && component.variable(reference).is_none()
            {
                issues.push(format!(
                    "{at} is initialised from `{reference}`, which is not a variable of the component"
                ));
            }
        }

        for equation in &component.equations {
            let mut check = |name: &String| {
                if component.variable(name).is_none() {
                    issues.push(format!(
                        "math in component `{}` references unknown variable `{name}`",
                        component.name
                    ));
                }
            };
            equation.lhs.for_each_variable(&mut check);
            equation.rhs.for_each_variable(&mut check);
        }
    }

    for connection in &model.connections {
        if connection.component_1 == connection.component_2 {
            issues.push(format!(
                "connection joins component `{}` to itself",
                connection.component_1
            ));
            continue;
        }
        let (Some(first), Some(second)) = (
            model.component(&connection.component_1),
            model.component(&connection.component_2),
        ) else {
            issues.push(format!(
                "connection between `{}` and `{}` names a missing component",
                connection.component_1, connection.component_2
            ));
            continue;
        };
        if connection.mappings.is_empty() {
            issues.push(format!(
                "connection between `{}` and `{}` maps no variables",
                first.name, second.name
            ));
        }
        for (v1, v2) in &connection.mappings {
            if first.variable(v1).is_none() {
                issues.push(format!(
                    "connection maps unknown variable `{v1}` of component `{}`",
                    first.name
                ));
            }
            if second.variable(v2).is_none() {
                issues.push(format!(
                    "connection maps unknown variable `{v2}` of component `{}`",
                    second.name
                ));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ModelGenerationError::Validation { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationStage;
    use crate::model::{Component, Connection, Equation, Expr, Variable};

    fn variable(name: &str, units: Option<&str>) -> Variable {
        Variable {
            name: name.to_string(),
            units: units.map(str::to_string),
            initial_value: None,
            interface: None,
        }
    }

    fn model() -> Model {
        Model {
            name: "m".to_string(),
            components: vec![
                Component {
                    name: "a".to_string(),
                    variables: vec![variable("x", Some("second"))],
                    equations: vec![],
                },
                Component {
                    name: "b".to_string(),
                    variables: vec![variable("x", Some("second"))],
                    equations: vec![],
                },
            ],
            connections: vec![Connection {
                component_1: "a".to_string(),
                component_2: "b".to_string(),
                mappings: vec![("x".to_string(), "x".to_string())],
            }],
        }
    }

    #[test]
    fn test_valid_model_passes() {
        assert!(validate_model(&model()).is_ok());
    }

    #[test]
    fn test_every_issue_is_reported() {
        let mut m = model();
        m.components[0].variables.push(variable("y", None));
        m.components[0].variables.push(variable("x", Some("second")));
        m.components[1].equations.push(Equation {
            lhs: Expr::Variable("x".to_string()),
            rhs: Expr::Variable("missing".to_string()),
        });
        m.connections[0].mappings.push(("nope".to_string(), "x".to_string()));

        let err = validate_model(&m).unwrap_err();
        assert_eq!(err.stage(), GenerationStage::Validation);
        assert_eq!(err.issues().len(), 4, "{:?}", err.issues());
    }

    #[test]
    fn test_self_connection_is_rejected() {
        let mut m = model();
        m.connections[0].component_2 = "a".to_string();
        let err = validate_model(&m).unwrap_err();
        assert!(err.to_string().contains("to itself"));
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }
}
