//! C interface and implementation emitters.

use std::fmt;

use crate::model::{
    AnalysedModel, AnalysedVariable, EquationKind, Expr, Operator, Slot, VariableKind,
};

/// Version of the generated interface. Bumped when the entry points change.
pub const INTERFACE_VERSION: &str = "0.6.0";
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Column widths of the `VariableInfo` struct: longest string plus the
/// terminator.
struct InfoWidths {
    name: usize,
    units: usize,
    component: usize,
}

impl InfoWidths {
    fn of(model: &AnalysedModel) -> Self {
        let all = || model.voi.iter().chain(&model.states).chain(&model.variables);
        let width = |f: fn(&AnalysedVariable) -> usize| all().map(f).max().unwrap_or(0) + 1;
        Self {
            name: width(|v| v.name.len()),
            units: width(|v| v.units.len()),
            component: width(|v| v.component.len()),
        }
    }
}

fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn info_entry(v: &AnalysedVariable) -> String {
    format!(
        "{{{}, {}, {}, {}}}",
        c_string(&v.name),
        c_string(&v.units),
        c_string(&v.component),
        v.kind.c_name()
    )
}

fn info_table(name: &str, entries: &[AnalysedVariable], placeholder: VariableKind) -> String {
    let mut out = format!("const VariableInfo {name}[] = {{\n");
    if entries.is_empty() {
        // C forbids an empty initialiser list; the count constant stays 0.
        out.push_str(&format!("    {{\"\", \"\", \"\", {}}}\n", placeholder.c_name()));
    }
    for v in entries {
        out.push_str(&format!("    {},\n", info_entry(v)));
    }
    out.push_str("};\n");
    out
}

/// The contents of `{model}.h`.
#[must_use]
pub fn interface_code(model: &AnalysedModel) -> String {
    let widths = InfoWidths::of(model);
    let kinds = [
        VariableKind::VariableOfIntegration,
        VariableKind::State,
        VariableKind::Constant,
        VariableKind::ComputedConstant,
        VariableKind::Algebraic,
        VariableKind::External,
    ];

    let mut out = String::new();
    out.push_str(&format!(
        "/* The content of this file was generated using cellsolver {GENERATOR_VERSION}. */\n\n"
    ));
    out.push_str("#pragma once\n\n#include <stddef.h>\n\n");
    out.push_str("extern const char VERSION[];\nextern const char GENERATOR_VERSION[];\n\n");
    out.push_str("extern const size_t STATE_COUNT;\nextern const size_t VARIABLE_COUNT;\n\n");

    out.push_str("typedef enum {\n");
    for kind in kinds {
        out.push_str(&format!("    {},\n", kind.c_name()));
    }
    out.push_str("} VariableType;\n\n");

    out.push_str(&format!(
        "typedef struct {{\n    char name[{}];\n    char units[{}];\n    char component[{}];\n    VariableType type;\n}} VariableInfo;\n\n",
        widths.name, widths.units, widths.component
    ));
    out.push_str("extern const VariableInfo VOI_INFO;\n");
    out.push_str("extern const VariableInfo STATE_INFO[];\n");
    out.push_str("extern const VariableInfo VARIABLE_INFO[];\n\n");

    out.push_str("double * createStatesArray();\n");
    out.push_str("double * createVariablesArray();\n");
    out.push_str("void deleteArray(double *array);\n\n");
    out.push_str(
        "void initialiseVariables(double voi, double *states, double *rates, double *variables);\n",
    );
    out.push_str("void computeComputedConstants(double *variables);\n");
    out.push_str(
        "void computeRates(double voi, double *states, double *rates, double *variables);\n",
    );
    out.push_str(
        "void computeVariables(double voi, double *states, double *rates, double *variables);\n",
    );
    out
}

/// The contents of `{model}.c`. `header` is the file name it includes.
#[must_use]
pub fn implementation_code(model: &AnalysedModel, header: &str) -> String {
    let externals: Vec<&AnalysedVariable> = model.external_variables().collect();

    let mut out = String::new();
    out.push_str(&format!(
        "/* The content of this file was generated using cellsolver {GENERATOR_VERSION}. */\n\n"
    ));
    out.push_str(&format!("#include \"{header}\"\n"));
    if !externals.is_empty() {
        out.push_str("#include \"external_variables.h\"\n");
    }
    out.push_str("\n#include <math.h>\n#include <stdlib.h>\n\n");

    out.push_str(&format!("const char VERSION[] = \"{INTERFACE_VERSION}\";\n"));
    out.push_str(&format!(
        "const char GENERATOR_VERSION[] = \"{GENERATOR_VERSION}\";\n\n"
    ));
    out.push_str(&format!("const size_t STATE_COUNT = {};\n", model.states.len()));
    out.push_str(&format!(
        "const size_t VARIABLE_COUNT = {};\n\n",
        model.variables.len()
    ));

    let voi = model
        .voi
        .as_ref()
        .map(info_entry)
        .unwrap_or_else(|| "{\"\", \"\", \"\", VARIABLE_OF_INTEGRATION}".to_string());
    out.push_str(&format!("const VariableInfo VOI_INFO = {voi};\n\n"));
    out.push_str(&info_table("STATE_INFO", &model.states, VariableKind::State));
    out.push('\n');
    out.push_str(&info_table("VARIABLE_INFO", &model.variables, VariableKind::Constant));
    out.push('\n');

    for (function, count) in [
        ("createStatesArray", "STATE_COUNT"),
        ("createVariablesArray", "VARIABLE_COUNT"),
    ] {
        out.push_str(&format!(
            "double * {function}()\n{{\n    double *res = (double *) malloc({count}*sizeof(double));\n\n    for (size_t i = 0; i < {count}; ++i) {{\n        res[i] = NAN;\n    }}\n\n    return res;\n}}\n\n"
        ));
    }
    out.push_str("void deleteArray(double *array)\n{\n    free(array);\n}\n\n");

    let compute_externals = |out: &mut String| {
        for v in &externals {
            out.push_str(&format!(
                "    variables[{i}] = computeExternalVariable(voi, states, variables, {i});\n",
                i = v.index
            ));
        }
    };
    let assignments = |out: &mut String, select: fn(&EquationKind) -> bool| {
        for equation in model.equations_of(select) {
            let target = match equation.kind {
                EquationKind::Rate(i) => format!("rates[{i}]"),
                EquationKind::ComputedConstant(i) | EquationKind::Algebraic(i) => {
                    format!("variables[{i}]")
                }
            };
            out.push_str(&format!("    {target} = {};\n", CExpr(&equation.rhs)));
        }
    };

    out.push_str(
        "void initialiseVariables(double voi, double *states, double *rates, double *variables)\n{\n",
    );
    for v in model
        .variables
        .iter()
        .filter(|v| v.kind == VariableKind::Constant)
    {
        if let Some(init) = &v.initialiser {
            out.push_str(&format!("    variables[{}] = {};\n", v.index, CExpr(init)));
        }
    }
    compute_externals(&mut out);
    for v in &model.states {
        if let Some(init) = &v.initialiser {
            out.push_str(&format!("    states[{}] = {};\n", v.index, CExpr(init)));
        }
    }
    out.push_str("}\n\n");

    out.push_str("void computeComputedConstants(double *variables)\n{\n");
    assignments(&mut out, |k| matches!(k, EquationKind::ComputedConstant(_)));
    out.push_str("}\n\n");

    out.push_str(
        "void computeRates(double voi, double *states, double *rates, double *variables)\n{\n",
    );
    compute_externals(&mut out);
    assignments(&mut out, |k| matches!(k, EquationKind::Algebraic(_)));
    assignments(&mut out, |k| matches!(k, EquationKind::Rate(_)));
    out.push_str("}\n\n");

    out.push_str(
        "void computeVariables(double voi, double *states, double *rates, double *variables)\n{\n",
    );
    compute_externals(&mut out);
    assignments(&mut out, |k| matches!(k, EquationKind::Algebraic(_)));
    out.push_str("}\n");

    out
}

/// Renders an expression as a C `double` expression.
pub struct CExpr<'a>(pub &'a Expr<Slot>);

impl fmt::Display for CExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self.0, false)
    }
}

fn is_infix(expr: &Expr<Slot>) -> bool {
    match expr {
        Expr::Number(n) => *n < 0.0,
        Expr::Apply { op, args } => match op {
            Operator::Plus | Operator::Times => args.len() > 1,
            Operator::Minus
            | Operator::Divide
            | Operator::Eq
            | Operator::Neq
            | Operator::Lt
            | Operator::Gt
            | Operator::Leq
            | Operator::Geq
            | Operator::And
            | Operator::Or
            | Operator::Xor
            | Operator::Not => true,
            _ => false,
        },
        Expr::Piecewise { .. } => true,
        _ => false,
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NAN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "INFINITY" } else { "-INFINITY" })
    } else {
        // Debug keeps a decimal point or exponent, so C reads a double.
        write!(f, "{n:?}")
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr<Slot>) -> fmt::Result {
    write_expr(f, expr, true)
}

fn write_joined(f: &mut fmt::Formatter<'_>, args: &[Expr<Slot>], separator: &str) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write_operand(f, arg)?;
    }
    Ok(())
}

fn write_call(f: &mut fmt::Formatter<'_>, name: &str, args: &[&Expr<Slot>]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_expr(f, arg, false)?;
    }
    f.write_str(")")
}

fn write_unary(f: &mut fmt::Formatter<'_>, name: &str, args: &[Expr<Slot>]) -> fmt::Result {
    match args.first() {
        Some(a) => write_call(f, name, &[a]),
        None => f.write_str("NAN"),
    }
}

/// `fmin(a, fmin(b, c))` for n-ary min and max.
fn write_fold(f: &mut fmt::Formatter<'_>, name: &str, args: &[Expr<Slot>]) -> fmt::Result {
    match args {
        [] => f.write_str("NAN"),
        [only] => write_expr(f, only, false),
        [first, rest @ ..] => {
            write!(f, "{name}(")?;
            write_expr(f, first, false)?;
            f.write_str(", ")?;
            write_fold(f, name, rest)?;
            f.write_str(")")
        }
    }
}

fn write_expr(f: &mut fmt::Formatter<'_>, expr: &Expr<Slot>, nested: bool) -> fmt::Result {
    let parens = nested && is_infix(expr);
    if parens {
        f.write_str("(")?;
    }

    match expr {
        Expr::Number(n) => write_number(f, *n)?,
        Expr::Boolean(b) => f.write_str(if *b { "1.0" } else { "0.0" })?,
        Expr::Variable(slot) => write!(f, "{slot}")?,
        Expr::Derivative { variable, .. } => match variable {
            Slot::State(i) => write!(f, "rates[{i}]")?,
            other => write!(f, "{other}")?,
        },
        Expr::Apply { op, args } => write_apply(f, *op, args)?,
        Expr::Piecewise { pieces, otherwise } => {
            for (value, condition) in pieces {
                write_operand(f, condition)?;
                f.write_str(" ? ")?;
                write_operand(f, value)?;
                f.write_str(" : ")?;
            }
            match otherwise {
                Some(o) => write_operand(f, o)?,
                None => f.write_str("NAN")?,
            }
        }
    }

    if parens {
        f.write_str(")")?;
    }
    Ok(())
}

fn write_apply(f: &mut fmt::Formatter<'_>, op: Operator, args: &[Expr<Slot>]) -> fmt::Result {
    match op {
        Operator::Plus => write_joined(f, args, " + "),
        Operator::Minus if args.len() == 1 => {
            f.write_str("-")?;
            write_operand(f, &args[0])
        }
        Operator::Minus => write_joined(f, args, " - "),
        Operator::Times => write_joined(f, args, " * "),
        Operator::Divide => write_joined(f, args, " / "),
        Operator::Eq => write_joined(f, args, " == "),
        Operator::Neq => write_joined(f, args, " != "),
        Operator::Lt => write_joined(f, args, " < "),
        Operator::Gt => write_joined(f, args, " > "),
        Operator::Leq => write_joined(f, args, " <= "),
        Operator::Geq => write_joined(f, args, " >= "),
        Operator::And => write_joined(f, args, " && "),
        Operator::Or => write_joined(f, args, " || "),
        Operator::Xor => {
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ^ ")?;
                }
                f.write_str("(")?;
                write_operand(f, arg)?;
                f.write_str(" != 0.0)")?;
            }
            Ok(())
        }
        Operator::Not => {
            f.write_str("!")?;
            match args.first() {
                Some(a) => write_operand(f, a),
                None => f.write_str("0.0"),
            }
        }
        Operator::Power => match args {
            [base, exponent] => write_call(f, "pow", &[base, exponent]),
            _ => f.write_str("NAN"),
        },
        Operator::Root => match args {
            [x] | [x, Expr::Number(2.0)] => write_call(f, "sqrt", &[x]),
            [x, degree] => {
                f.write_str("pow(")?;
                write_expr(f, x, false)?;
                f.write_str(", 1.0/")?;
                write_operand(f, degree)?;
                f.write_str(")")
            }
            _ => f.write_str("NAN"),
        },
        Operator::Log => match args {
            [x] | [x, Expr::Number(10.0)] => write_call(f, "log10", &[x]),
            [x, base] => {
                write_call(f, "log", &[x])?;
                f.write_str("/")?;
                write_call(f, "log", &[base])
            }
            _ => f.write_str("NAN"),
        },
        Operator::Exp => write_unary(f, "exp", args),
        Operator::Ln => write_unary(f, "log", args),
        Operator::Abs => write_unary(f, "fabs", args),
        Operator::Floor => write_unary(f, "floor", args),
        Operator::Ceiling => write_unary(f, "ceil", args),
        Operator::Sin => write_unary(f, "sin", args),
        Operator::Cos => write_unary(f, "cos", args),
        Operator::Tan => write_unary(f, "tan", args),
        Operator::Sinh => write_unary(f, "sinh", args),
        Operator::Cosh => write_unary(f, "cosh", args),
        Operator::Tanh => write_unary(f, "tanh", args),
        Operator::Arcsin => write_unary(f, "asin", args),
        Operator::Arccos => write_unary(f, "acos", args),
        Operator::Arctan => write_unary(f, "atan", args),
        Operator::Min => write_fold(f, "fmin", args),
        Operator::Max => write_fold(f, "fmax", args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(i: usize) -> Expr<Slot> {
        Expr::Variable(Slot::Variable(i))
    }

    fn render(expr: &Expr<Slot>) -> String {
        CExpr(expr).to_string()
    }

    #[test]
    fn test_infix_nesting_is_parenthesised() {
        let expr = Expr::apply(
            Operator::Divide,
            vec![
                Expr::Variable(Slot::State(0)),
                Expr::apply(Operator::Plus, vec![var(1), Expr::Number(-2.0)]),
            ],
        );
        assert_eq!(render(&expr), "states[0] / (variables[1] + (-2.0))");
    }

    #[test]
    fn test_functions_map_to_libm() {
        let root3 = Expr::apply(Operator::Root, vec![var(0), Expr::Number(3.0)]);
        assert_eq!(render(&root3), "pow(variables[0], 1.0/3.0)");
        let sqrt = Expr::apply(Operator::Root, vec![var(0)]);
        assert_eq!(render(&sqrt), "sqrt(variables[0])");
        let log2 = Expr::apply(Operator::Log, vec![var(0), Expr::Number(2.0)]);
        assert_eq!(render(&log2), "log(variables[0])/log(2.0)");
        let min = Expr::apply(Operator::Min, vec![var(0), var(1), var(2)]);
        assert_eq!(render(&min), "fmin(variables[0], fmin(variables[1], variables[2]))");
        let abs = Expr::apply(Operator::Abs, vec![Expr::Variable(Slot::Voi)]);
        assert_eq!(render(&abs), "fabs(voi)");
    }

    #[test]
    fn test_piecewise_defaults_to_nan() {
        let expr = Expr::Piecewise {
            pieces: vec![(
                Expr::Number(1.0),
                Expr::apply(Operator::Gt, vec![Expr::Variable(Slot::Voi), Expr::Number(5.0)]),
            )],
            otherwise: None,
        };
        assert_eq!(render(&expr), "(voi > 5.0) ? 1.0 : NAN");
    }

    #[test]
    fn test_special_numbers() {
        assert_eq!(render(&Expr::Number(f64::INFINITY)), "INFINITY");
        assert_eq!(render(&Expr::Number(f64::NAN)), "NAN");
        assert_eq!(render(&Expr::Number(1e-7)), "1e-7");
        assert_eq!(render(&Expr::Boolean(true)), "1.0");
    }
}
