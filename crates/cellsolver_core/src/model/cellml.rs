//! CellML 2.0 reader.
//!
//! Reads the XML document into a [`Model`]. Structural problems (malformed
//! XML, wrong namespace, unsupported MathML) are collected as parse issues;
//! semantic checks are left to validation.

use roxmltree::{Document, Node};

use super::expr::{Expr, Operator};
use super::{Component, Connection, Equation, InitialValue, Model, Variable};
use crate::error::ModelGenerationError;

pub const CELLML_2_0_NS: &str = "http://www.cellml.org/cellml/2.0#";
pub const MATHML_NS: &str = "http://www.w3.org/1998/Math/MathML";

/// Parse a CellML 2.0 document.
pub fn parse_model(source: &str) -> Result<Model, ModelGenerationError> {
    let document = Document::parse(source)
        .map_err(|e| ModelGenerationError::parse(format!("malformed XML: {e}")))?;

    let root = document.root_element();
    if root.tag_name().name() != "model" {
        return Err(ModelGenerationError::parse(format!(
            "root element is `{}`, expected `model`",
            root.tag_name().name()
        )));
    }
    if root.tag_name().namespace() != Some(CELLML_2_0_NS) {
        return Err(ModelGenerationError::parse(format!(
            "model is not in the CellML 2.0 namespace `{CELLML_2_0_NS}`"
        )));
    }

    let mut reader = Reader::default();
    let model = reader.read_model(root);

    if reader.issues.is_empty() {
        Ok(model)
    } else {
        Err(ModelGenerationError::Parse {
            issues: reader.issues,
        })
    }
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(Node::is_element)
}

#[derive(Default)]
struct Reader {
    issues: Vec<String>,
}

impl Reader {
    fn issue(&mut self, message: impl Into<String>) {
        self.issues.push(message.into());
    }

    fn read_model(&mut self, root: Node<'_, '_>) -> Model {
        let mut model = Model {
            name: root.attribute("name").unwrap_or_default().to_string(),
            components: Vec::new(),
            connections: Vec::new(),
        };

        for child in elements(root) {
            if child.tag_name().namespace() != Some(CELLML_2_0_NS) {
                self.issue(format!(
                    "unexpected element `{}` outside the CellML namespace",
                    child.tag_name().name()
                ));
                continue;
            }
            match child.tag_name().name() {
                "component" => model.components.push(self.read_component(child)),
                "connection" => model.connections.push(self.read_connection(child)),
                // Units only matter to the native solver through the info tables.
                "units" | "encapsulation" => {}
                "import" => self.issue("imports are not supported"),
                "reset" => self.issue("resets are not supported"),
                other => self.issue(format!("unexpected element `{other}` in model")),
            }
        }

        model
    }

    fn read_component(&mut self, node: Node<'_, '_>) -> Component {
        let name = node.attribute("name").unwrap_or_default().to_string();
        let mut component = Component {
            name,
            variables: Vec::new(),
            equations: Vec::new(),
        };

        for child in elements(node) {
            match (child.tag_name().namespace(), child.tag_name().name()) {
                (Some(CELLML_2_0_NS), "variable") => {
                    component.variables.push(self.read_variable(child));
                }
                (Some(MATHML_NS), "math") => {
                    for equation in elements(child) {
                        if let Some(eq) = self.read_equation(&component.name, equation) {
                            component.equations.push(eq);
                        }
                    }
                }
                (Some(CELLML_2_0_NS), "reset") => self.issue(format!(
                    "resets are not supported (component `{}`)",
                    component.name
                )),
                (_, other) => self.issue(format!(
                    "unexpected element `{other}` in component `{}`",
                    component.name
                )),
            }
        }

        component
    }

    fn read_variable(&mut self, node: Node<'_, '_>) -> Variable {
        let initial_value = node.attribute("initial_value").map(|raw| {
            let raw = raw.trim();
            match raw.parse::<f64>() {
                Ok(value) => InitialValue::Constant(value),
                Err(_) => InitialValue::Variable(raw.to_string()),
            }
        });

        Variable {
            name: node.attribute("name").unwrap_or_default().to_string(),
            units: node.attribute("units").map(str::to_string),
            initial_value,
            interface: node.attribute("interface").map(str::to_string),
        }
    }

    fn read_connection(&mut self, node: Node<'_, '_>) -> Connection {
        let mut connection = Connection {
            component_1: node.attribute("component_1").unwrap_or_default().to_string(),
            component_2: node.attribute("component_2").unwrap_or_default().to_string(),
            mappings: Vec::new(),
        };

        for child in elements(node) {
            if child.tag_name().name() != "map_variables" {
                self.issue(format!(
                    "unexpected element `{}` in connection",
                    child.tag_name().name()
                ));
                continue;
            }
            connection.mappings.push((
                child.attribute("variable_1").unwrap_or_default().to_string(),
                child.attribute("variable_2").unwrap_or_default().to_string(),
            ));
        }

        connection
    }

    fn read_equation(&mut self, component: &str, node: Node<'_, '_>) -> Option<Equation> {
        let top_level_eq = node.tag_name().name() == "apply"
            && elements(node)
                .next()
                .is_some_and(|op| op.tag_name().name() == "eq");
        if !top_level_eq {
            self.issue(format!(
                "math in component `{component}` must be a list of `eq` applications"
            ));
            return None;
        }

        let operands: Vec<_> = elements(node).skip(1).collect();
        if operands.len() != 2 {
            self.issue(format!(
                "equation in component `{component}` has {} side(s), expected 2",
                operands.len()
            ));
            return None;
        }

        let lhs = self.read_expr(component, operands[0])?;
        let rhs = self.read_expr(component, operands[1])?;
        Some(Equation { lhs, rhs })
    }

    fn read_expr(&mut self, component: &str, node: Node<'_, '_>) -> Option<Expr> {
        match node.tag_name().name() {
            "ci" => {
                let name = node.text().unwrap_or_default().trim();
                if name.is_empty() {
                    self.issue(format!("empty `ci` in component `{component}`"));
                    return None;
                }
                Some(Expr::Variable(name.to_string()))
            }
            "cn" => self.read_number(component, node).map(Expr::Number),
            "pi" => Some(Expr::Number(std::f64::consts::PI)),
            "exponentiale" => Some(Expr::Number(std::f64::consts::E)),
            "infinity" => Some(Expr::Number(f64::INFINITY)),
            "notanumber" => Some(Expr::Number(f64::NAN)),
            "true" => Some(Expr::Boolean(true)),
            "false" => Some(Expr::Boolean(false)),
            "apply" => self.read_apply(component, node),
            "piecewise" => self.read_piecewise(component, node),
            other => {
                self.issue(format!(
                    "unsupported MathML element `{other}` in component `{component}`"
                ));
                None
            }
        }
    }

    fn read_number(&mut self, component: &str, node: Node<'_, '_>) -> Option<f64> {
        let texts: Vec<&str> = node
            .children()
            .filter(Node::is_text)
            .filter_map(|n| n.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        let parsed = match (node.attribute("type"), texts.as_slice()) {
            (Some("e-notation"), [mantissa, exponent]) => {
                format!("{mantissa}e{exponent}").parse::<f64>().ok()
            }
            (None | Some("real"), [value]) => value.parse::<f64>().ok(),
            _ => None,
        };

        if parsed.is_none() {
            self.issue(format!(
                "cannot read number `{}` in component `{component}`",
                texts.join(" ")
            ));
        }
        parsed
    }

    fn read_apply(&mut self, component: &str, node: Node<'_, '_>) -> Option<Expr> {
        let mut children = elements(node);
        let Some(head) = children.next() else {
            self.issue(format!("empty `apply` in component `{component}`"));
            return None;
        };
        let head_name = head.tag_name().name();

        if head_name == "diff" {
            return self.read_derivative(component, children.collect());
        }

        let Some(op) = Operator::from_mathml(head_name) else {
            self.issue(format!(
                "unsupported operator `{head_name}` in component `{component}`"
            ));
            return None;
        };

        let mut args = Vec::new();
        let mut qualifier = None;
        for child in children {
            match child.tag_name().name() {
                "degree" | "logbase" => {
                    let Some(inner) = elements(child).next() else {
                        self.issue(format!(
                            "empty `{}` in component `{component}`",
                            child.tag_name().name()
                        ));
                        return None;
                    };
                    qualifier = Some(self.read_expr(component, inner)?);
                }
                _ => args.push(self.read_expr(component, child)?),
            }
        }
        if let Some(q) = qualifier {
            args.push(q);
        }

        let (min, max) = op.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            self.issue(format!(
                "operator `{head_name}` in component `{component}` has {} operand(s)",
                args.len()
            ));
            return None;
        }

        Some(Expr::apply(op, args))
    }

    fn read_derivative(&mut self, component: &str, operands: Vec<Node<'_, '_>>) -> Option<Expr> {
        let bvar = operands
            .iter()
            .find(|n| n.tag_name().name() == "bvar")
            .and_then(|b| elements(*b).find(|n| n.tag_name().name() == "ci"))
            .and_then(|ci| ci.text())
            .map(|t| t.trim().to_string());
        let variable = operands
            .iter()
            .find(|n| n.tag_name().name() == "ci")
            .and_then(|ci| ci.text())
            .map(|t| t.trim().to_string());

        match (variable, bvar) {
            (Some(variable), Some(bvar)) => Some(Expr::Derivative { variable, bvar }),
            _ => {
                self.issue(format!(
                    "derivative in component `{component}` needs a `bvar` and a variable"
                ));
                None
            }
        }
    }

    fn read_piecewise(&mut self, component: &str, node: Node<'_, '_>) -> Option<Expr> {
        let mut pieces = Vec::new();
        let mut otherwise = None;

        for child in elements(node) {
            let parts: Vec<_> = elements(child).collect();
            match (child.tag_name().name(), parts.as_slice()) {
                ("piece", [value, condition]) => {
                    let value = self.read_expr(component, *value)?;
                    let condition = self.read_expr(component, *condition)?;
                    pieces.push((value, condition));
                }
                ("otherwise", [value]) => {
                    otherwise = Some(Box::new(self.read_expr(component, *value)?));
                }
                (name, _) => {
                    self.issue(format!(
                        "malformed `{name}` in piecewise of component `{component}`"
                    ));
                    return None;
                }
            }
        }

        Some(Expr::Piecewise { pieces, otherwise })
    }
}
