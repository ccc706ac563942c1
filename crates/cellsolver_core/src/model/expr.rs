use std::fmt;

/// MathML operators understood by the toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Times,
    Divide,
    Power,
    /// `args[0]` is the radicand, an optional `args[1]` the degree.
    Root,
    Exp,
    Ln,
    /// `args[0]` is the operand, an optional `args[1]` the base.
    Log,
    Abs,
    Floor,
    Ceiling,
    Min,
    Max,
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Arcsin,
    Arccos,
    Arctan,
    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
    And,
    Or,
    Xor,
    Not,
}

impl Operator {
    #[must_use]
    pub fn from_mathml(tag: &str) -> Option<Self> {
        let op = match tag {
            "plus" => Operator::Plus,
            "minus" => Operator::Minus,
            "times" => Operator::Times,
            "divide" => Operator::Divide,
            "power" => Operator::Power,
            "root" => Operator::Root,
            "exp" => Operator::Exp,
            "ln" => Operator::Ln,
            "log" => Operator::Log,
            "abs" => Operator::Abs,
            "floor" => Operator::Floor,
            "ceiling" => Operator::Ceiling,
            "min" => Operator::Min,
            "max" => Operator::Max,
            "sin" => Operator::Sin,
            "cos" => Operator::Cos,
            "tan" => Operator::Tan,
            "sinh" => Operator::Sinh,
            "cosh" => Operator::Cosh,
            "tanh" => Operator::Tanh,
            "arcsin" => Operator::Arcsin,
            "arccos" => Operator::Arccos,
            "arctan" => Operator::Arctan,
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "lt" => Operator::Lt,
            "gt" => Operator::Gt,
            "leq" => Operator::Leq,
            "geq" => Operator::Geq,
            "and" => Operator::And,
            "or" => Operator::Or,
            "xor" => Operator::Xor,
            "not" => Operator::Not,
            _ => return None,
        };
        Some(op)
    }

    /// Accepted operand counts as (min, max).
    #[must_use]
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Operator::Plus | Operator::Times | Operator::Min | Operator::Max => (1, None),
            Operator::And | Operator::Or | Operator::Xor => (2, None),
            Operator::Minus => (1, Some(2)),
            Operator::Root | Operator::Log => (1, Some(2)),
            Operator::Divide
            | Operator::Power
            | Operator::Eq
            | Operator::Neq
            | Operator::Lt
            | Operator::Gt
            | Operator::Leq
            | Operator::Geq => (2, Some(2)),
            _ => (1, Some(1)),
        }
    }
}

/// Location of a variable in the generated arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Voi,
    State(usize),
    Variable(usize),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Voi => f.write_str("voi"),
            Slot::State(i) => write!(f, "states[{i}]"),
            Slot::Variable(i) => write!(f, "variables[{i}]"),
        }
    }
}

/// A MathML expression tree.
///
/// `V` is how variables are referred to: by name straight out of the
/// parser, by equivalence class during analysis and by [`Slot`] once
/// indices are assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr<V = String> {
    Number(f64),
    Boolean(bool),
    Variable(V),
    Derivative { variable: V, bvar: V },
    Apply { op: Operator, args: Vec<Expr<V>> },
    Piecewise {
        pieces: Vec<(Expr<V>, Expr<V>)>,
        otherwise: Option<Box<Expr<V>>>,
    },
}

impl<V> Expr<V> {
    pub fn apply(op: Operator, args: Vec<Expr<V>>) -> Self {
        Expr::Apply { op, args }
    }

    /// Rewrite every variable reference, stopping at the first failure.
    pub fn try_map<W, E>(&self, f: &mut impl FnMut(&V) -> Result<W, E>) -> Result<Expr<W>, E> {
        Ok(match self {
            Expr::Number(n) => Expr::Number(*n),
            Expr::Boolean(b) => Expr::Boolean(*b),
            Expr::Variable(v) => Expr::Variable(f(v)?),
            Expr::Derivative { variable, bvar } => Expr::Derivative {
                variable: f(variable)?,
                bvar: f(bvar)?,
            },
            Expr::Apply { op, args } => Expr::Apply {
                op: *op,
                args: args
                    .iter()
                    .map(|a| a.try_map(f))
                    .collect::<Result<_, _>>()?,
            },
            Expr::Piecewise { pieces, otherwise } => Expr::Piecewise {
                pieces: pieces
                    .iter()
                    .map(|(value, condition)| Ok((value.try_map(f)?, condition.try_map(f)?)))
                    .collect::<Result<_, _>>()?,
                otherwise: match otherwise {
                    Some(o) => Some(Box::new(o.try_map(f)?)),
                    None => None,
                },
            },
        })
    }

    /// Visit every variable reference, including those inside derivatives.
    pub fn for_each_variable(&self, f: &mut impl FnMut(&V)) {
        match self {
            Expr::Number(_) | Expr::Boolean(_) => {}
            Expr::Variable(v) => f(v),
            Expr::Derivative { variable, bvar } => {
                f(variable);
                f(bvar);
            }
            Expr::Apply { args, .. } => args.iter().for_each(|a| a.for_each_variable(f)),
            Expr::Piecewise { pieces, otherwise } => {
                for (value, condition) in pieces {
                    value.for_each_variable(f);
                    condition.for_each_variable(f);
                }
                if let Some(o) = otherwise {
                    o.for_each_variable(f);
                }
            }
        }
    }

    #[must_use]
    pub fn contains_derivative(&self) -> bool {
        match self {
            Expr::Derivative { .. } => true,
            Expr::Apply { args, .. } => args.iter().any(Expr::contains_derivative),
            Expr::Piecewise { pieces, otherwise } => {
                pieces
                    .iter()
                    .any(|(v, c)| v.contains_derivative() || c.contains_derivative())
                    || otherwise.as_ref().is_some_and(|o| o.contains_derivative())
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_map_rewrites_all_references() {
        let expr: Expr = Expr::apply(
            Operator::Plus,
            vec![
                Expr::Variable("a".to_string()),
                Expr::Piecewise {
                    pieces: vec![(
                        Expr::Variable("b".to_string()),
                        Expr::apply(
                            Operator::Gt,
                            vec![Expr::Variable("a".to_string()), Expr::Number(1.0)],
                        ),
                    )],
                    otherwise: Some(Box::new(Expr::Variable("c".to_string()))),
                },
            ],
        );

        let mapped: Expr<usize> = expr
            .try_map(&mut |name: &String| -> Result<usize, ()> { Ok(name.len()) })
            .unwrap();
        let mut seen = Vec::new();
        mapped.for_each_variable(&mut |v| seen.push(*v));
        assert_eq!(seen, vec![1, 1, 1, 1]);

        let err = expr.try_map(&mut |name: &String| {
            if name == "c" { Err(name.clone()) } else { Ok(()) }
        });
        assert_eq!(err.unwrap_err(), "c");
    }

    #[test]
    fn test_operator_table() {
        assert_eq!(Operator::from_mathml("ceiling"), Some(Operator::Ceiling));
        assert_eq!(Operator::from_mathml("diff"), None);
        assert_eq!(Operator::Minus.arity(), (1, Some(2)));
        assert_eq!(Operator::Times.arity(), (1, None));
    }
}
