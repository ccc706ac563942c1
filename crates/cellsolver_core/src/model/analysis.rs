//! Static analysis: equivalence classes, variable classification, equation
//! ordering and index assignment.
//!
//! Variables joined by connections are one quantity. Each quantity is
//! assigned a slot in either the `states` or the `variables` array of the
//! generated code. The order is decided here:
//!
//! - states in the order of their first rate equation,
//! - then in `variables`: constants, computed constants (dependency order),
//!   algebraic variables (dependency order) and external variables (request
//!   order).

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use super::expr::{Expr, Slot};
use super::{InitialValue, Model, VariableKind, VariableRef};
use crate::error::ModelGenerationError;

/// A quantity after analysis, with the slot the generated code uses.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysedVariable {
    pub name: String,
    pub component: String,
    pub units: String,
    pub kind: VariableKind,
    pub index: usize,
    /// Value assigned in `initialiseVariables`, for states and constants.
    pub initialiser: Option<Expr<Slot>>,
    /// Every `component.variable` that refers to this quantity.
    pub aliases: Vec<VariableRef>,
}

impl AnalysedVariable {
    #[must_use]
    pub fn slot(&self) -> Slot {
        match self.kind {
            VariableKind::VariableOfIntegration => Slot::Voi,
            VariableKind::State => Slot::State(self.index),
            _ => Slot::Variable(self.index),
        }
    }

    #[must_use]
    pub fn is_alias_of(&self, reference: &VariableRef) -> bool {
        self.aliases.iter().any(|a| a == reference)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationKind {
    /// Assigns `variables[index]` once, after initialisation.
    ComputedConstant(usize),
    /// Assigns `rates[index]` for the state with that index.
    Rate(usize),
    /// Assigns `variables[index]` at every evaluation.
    Algebraic(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysedEquation {
    pub kind: EquationKind,
    pub rhs: Expr<Slot>,
}

/// The result of analysis, ready for code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysedModel {
    pub name: String,
    pub voi: Option<AnalysedVariable>,
    pub states: Vec<AnalysedVariable>,
    pub variables: Vec<AnalysedVariable>,
    /// Computed constants, then rates, then algebraic equations; each group
    /// in evaluation order.
    pub equations: Vec<AnalysedEquation>,
}

impl AnalysedModel {
    /// Find the quantity a `component.variable` reference belongs to.
    #[must_use]
    pub fn find(&self, reference: &VariableRef) -> Option<&AnalysedVariable> {
        self.voi
            .iter()
            .chain(&self.states)
            .chain(&self.variables)
            .find(|v| v.is_alias_of(reference))
    }

    pub fn external_variables(&self) -> impl Iterator<Item = &AnalysedVariable> {
        self.variables
            .iter()
            .filter(|v| v.kind == VariableKind::External)
    }

    pub fn equations_of(
        &self,
        kind: fn(&EquationKind) -> bool,
    ) -> impl Iterator<Item = &AnalysedEquation> {
        self.equations.iter().filter(move |e| kind(&e.kind))
    }
}

/// Analyses a validated model.
#[derive(Debug, Clone, Default)]
pub struct Analyser {
    external_variables: Vec<VariableRef>,
}

impl Analyser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a variable as supplied by the host instead of by the model's
    /// equations. Must be called before [`Analyser::analyse`].
    pub fn add_external_variable(&mut self, reference: VariableRef) {
        if !self.external_variables.contains(&reference) {
            self.external_variables.push(reference);
        }
    }

    #[must_use]
    pub fn external_variables(&self) -> &[VariableRef] {
        &self.external_variables
    }

    pub fn analyse(&self, model: &Model) -> Result<AnalysedModel, ModelGenerationError> {
        Analysis::new(model, &self.external_variables)?.run()
    }
}

/// Id of one declared variable, in declaration order across the model.
type VarId = usize;
/// Id of an equivalence class: the root variable in the union-find.
type ClassId = usize;

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Keep the earlier declaration as root so class ids are stable.
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

enum Definition {
    Rate { ordinal: usize, var: VarId, rhs: Expr<ClassId> },
    Algebraic { ordinal: usize, var: VarId, rhs: Expr<ClassId> },
}

impl Definition {
    fn var(&self) -> VarId {
        match self {
            Definition::Rate { var, .. } | Definition::Algebraic { var, .. } => *var,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Class {
    Voi,
    State,
    Constant,
    Computed,
    External,
}

struct Analysis<'m> {
    model: &'m Model,
    /// (component index, variable index) per declared variable.
    vars: Vec<(usize, usize)>,
    lookup: FxHashMap<(&'m str, &'m str), VarId>,
    class_of: Vec<ClassId>,
    /// Classes in order of their first declared member.
    classes: Vec<ClassId>,
    externals: Vec<(ClassId, VarId)>,
    issues: Vec<String>,
}

impl<'m> Analysis<'m> {
    fn new(
        model: &'m Model,
        external_variables: &[VariableRef],
    ) -> Result<Self, ModelGenerationError> {
        let mut vars = Vec::new();
        let mut lookup = FxHashMap::default();
        for (ci, component) in model.components.iter().enumerate() {
            for (vi, variable) in component.variables.iter().enumerate() {
                lookup.insert((component.name.as_str(), variable.name.as_str()), vars.len());
                vars.push((ci, vi));
            }
        }

        let mut sets = DisjointSet::new(vars.len());
        for connection in &model.connections {
            for (v1, v2) in &connection.mappings {
                let a = lookup.get(&(connection.component_1.as_str(), v1.as_str()));
                let b = lookup.get(&(connection.component_2.as_str(), v2.as_str()));
                if let (Some(&a), Some(&b)) = (a, b) {
                    sets.union(a, b);
                }
            }
        }
        let class_of: Vec<ClassId> = (0..vars.len()).map(|v| sets.find(v)).collect();

        let mut seen = FxHashSet::default();
        let classes = class_of.iter().copied().filter(|c| seen.insert(*c)).collect();

        let mut externals: Vec<(ClassId, VarId)> = Vec::new();
        for reference in external_variables {
            let var = *lookup
                .get(&(reference.component.as_str(), reference.variable.as_str()))
                .ok_or_else(|| ModelGenerationError::Resolution {
                    reference: reference.to_string(),
                    reason: "no such variable in the model".to_string(),
                })?;
            match externals.iter().find(|(c, _)| *c == class_of[var]) {
                None => externals.push((class_of[var], var)),
                Some(&(_, first)) if first != var => {
                    let (ci, vi) = vars[first];
                    let component = &model.components[ci];
                    let first = VariableRef::new(&component.name, &component.variables[vi].name);
                    return Err(ModelGenerationError::Resolution {
                        reference: reference.to_string(),
                        reason: format!("same quantity as `{first}`, which is already external"),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            model,
            vars,
            lookup,
            class_of,
            classes,
            externals,
            issues: Vec::new(),
        })
    }

    fn reference(&self, var: VarId) -> VariableRef {
        let (ci, vi) = self.vars[var];
        let component = &self.model.components[ci];
        VariableRef::new(&component.name, &component.variables[vi].name)
    }

    fn members(&self, class: ClassId) -> impl Iterator<Item = VarId> + '_ {
        (0..self.vars.len()).filter(move |v| self.class_of[*v] == class)
    }

    fn is_external(&self, class: ClassId) -> bool {
        self.externals.iter().any(|(c, _)| *c == class)
    }

    fn resolve_name(&mut self, component: &'m str, name: &str) -> Option<ClassId> {
        match self.lookup.get(&(component, name)) {
            Some(&var) => Some(self.class_of[var]),
            None => {
                self.issues.push(format!(
                    "variable `{name}` is not declared in component `{component}`"
                ));
                None
            }
        }
    }

    fn to_classes(&mut self, component: &'m str, expr: &Expr) -> Option<Expr<ClassId>> {
        expr.try_map(&mut |name: &String| self.resolve_name(component, name).ok_or(()))
            .ok()
    }

    fn run(mut self) -> Result<AnalysedModel, ModelGenerationError> {
        let model = self.model;
        let mut voi: Option<ClassId> = None;
        let mut definitions: FxHashMap<ClassId, Definition> = FxHashMap::default();
        let mut used: FxHashSet<ClassId> = FxHashSet::default();
        let mut ordinal = 0;

        for component in &model.components {
            for equation in &component.equations {
                ordinal += 1;
                let Some(rhs) = self.to_classes(&component.name, &equation.rhs) else {
                    continue;
                };
                if rhs.contains_derivative() {
                    self.issues.push(format!(
                        "derivatives may only appear on the left-hand side (component `{}`)",
                        component.name
                    ));
                    continue;
                }

                let (target, bvar) = match &equation.lhs {
                    Expr::Variable(name) => (name, None),
                    Expr::Derivative { variable, bvar } => (variable, Some(bvar)),
                    _ => {
                        self.issues.push(format!(
                            "equation in component `{}` is not in a supported form: \
                             the left-hand side must be a variable or a derivative",
                            component.name
                        ));
                        continue;
                    }
                };
                let Some(&var) = self.lookup.get(&(component.name.as_str(), target.as_str()))
                else {
                    self.issues.push(format!(
                        "variable `{target}` is not declared in component `{}`",
                        component.name
                    ));
                    continue;
                };
                let class = self.class_of[var];

                if let Some(bvar) = bvar {
                    let Some(b) = self.resolve_name(&component.name, bvar) else {
                        continue;
                    };
                    match voi {
                        None => voi = Some(b),
                        Some(existing) if existing != b => {
                            self.issues.push(format!(
                                "more than one variable of integration: `{}` and `{}`",
                                self.reference(existing),
                                self.reference(b)
                            ));
                        }
                        Some(_) => {}
                    }
                }

                // External quantities are supplied by the host; their own
                // equations are not part of the resolution.
                if self.is_external(class) {
                    continue;
                }

                rhs.for_each_variable(&mut |c| {
                    used.insert(*c);
                });

                if let Some(previous) = definitions.get(&class) {
                    self.issues.push(format!(
                        "variable `{}` is computed more than once (also by `{}`)",
                        self.reference(var),
                        self.reference(previous.var())
                    ));
                    continue;
                }

                let definition = match bvar {
                    Some(_) => Definition::Rate { ordinal, var, rhs },
                    None => Definition::Algebraic { ordinal, var, rhs },
                };
                definitions.insert(class, definition);
            }
        }

        if let Some(v) = voi {
            if definitions.contains_key(&v) || self.is_external(v) {
                self.issues.push(format!(
                    "variable of integration `{}` cannot be computed",
                    self.reference(v)
                ));
            }
        }

        // Classify every quantity.
        let mut kinds: FxHashMap<ClassId, Class> = FxHashMap::default();
        let mut constant_values: FxHashMap<ClassId, (VarId, f64)> = FxHashMap::default();
        let mut state_inits: FxHashMap<ClassId, (VarId, InitialValue)> = FxHashMap::default();
        let mut ordinal_tail = ordinal;

        for class in self.classes.clone() {
            if Some(class) == voi {
                kinds.insert(class, Class::Voi);
                continue;
            }
            if self.is_external(class) {
                kinds.insert(class, Class::External);
                continue;
            }

            let initialised: Vec<(VarId, InitialValue)> = self
                .members(class)
                .filter_map(|v| {
                    let (ci, vi) = self.vars[v];
                    model.components[ci].variables[vi]
                        .initial_value
                        .clone()
                        .map(|iv| (v, iv))
                })
                .collect();
            if initialised.len() > 1 {
                self.issues.push(format!(
                    "variable `{}` is initialised more than once",
                    self.reference(initialised[1].0)
                ));
                continue;
            }

            // (is a rate, defining variable)
            let defined = definitions
                .get(&class)
                .map(|d| (matches!(d, Definition::Rate { .. }), d.var()));

            match (defined, initialised.into_iter().next()) {
                (Some((true, _)), Some(init)) => {
                    kinds.insert(class, Class::State);
                    state_inits.insert(class, init);
                }
                (Some((true, var)), None) => {
                    self.issues.push(format!(
                        "state variable `{}` has no initial value",
                        self.reference(var)
                    ));
                }
                (Some((false, var)), Some(_)) => {
                    self.issues.push(format!(
                        "variable `{}` is both initialised and computed",
                        self.reference(var)
                    ));
                }
                (Some((false, _)), None) => {
                    kinds.insert(class, Class::Computed);
                }
                (None, Some((var, InitialValue::Constant(value)))) => {
                    kinds.insert(class, Class::Constant);
                    constant_values.insert(class, (var, value));
                }
                (None, Some((var, InitialValue::Variable(name)))) => {
                    // `x` initialised from `y` without an equation behaves
                    // like the equation `x = y`.
                    let (ci, _) = self.vars[var];
                    let component = model.components[ci].name.as_str();
                    if let Some(source) = self.resolve_name(component, &name) {
                        ordinal_tail += 1;
                        used.insert(source);
                        definitions.insert(
                            class,
                            Definition::Algebraic {
                                ordinal: ordinal_tail,
                                var,
                                rhs: Expr::Variable(source),
                            },
                        );
                        kinds.insert(class, Class::Computed);
                    }
                }
                (None, None) => {
                    if used.contains(&class) {
                        self.issues.push(format!(
                            "variable `{}` is used but never computed or initialised",
                            self.reference(class)
                        ));
                    }
                }
            }
        }

        // Dependency order of computed quantities.
        let computed: Vec<ClassId> = self
            .classes
            .iter()
            .copied()
            .filter(|c| kinds.get(c) == Some(&Class::Computed))
            .collect();
        let deps: FxHashMap<ClassId, Vec<ClassId>> = computed
            .iter()
            .map(|c| {
                let mut d = Vec::new();
                if let Some(Definition::Algebraic { rhs, .. }) = definitions.get(c) {
                    rhs.for_each_variable(&mut |x| {
                        if !d.contains(x) {
                            d.push(*x);
                        }
                    });
                }
                (*c, d)
            })
            .collect();
        let ordinal_of = |c: &ClassId| match definitions.get(c) {
            Some(Definition::Rate { ordinal, .. } | Definition::Algebraic { ordinal, .. }) => {
                *ordinal
            }
            None => usize::MAX,
        };

        let order = match topological_order(&computed, &deps, &ordinal_of) {
            Ok(order) => order,
            Err(cycle) => {
                let names: Vec<String> = cycle
                    .iter()
                    .filter_map(|c| {
                        definitions
                            .get(c)
                            .map(|d| self.reference(d.var()).to_string())
                    })
                    .collect();
                self.issues.push(format!("algebraic loop between {}", names.join(", ")));
                Vec::new()
            }
        };

        let mut computed_constant: FxHashSet<ClassId> = FxHashSet::default();
        for c in &order {
            let constant = deps[c].iter().all(|d| match kinds.get(d) {
                Some(Class::Constant) => true,
                Some(Class::Computed) => computed_constant.contains(d),
                _ => false,
            });
            if constant {
                computed_constant.insert(*c);
            }
        }

        if !self.issues.is_empty() {
            return Err(ModelGenerationError::Analysis {
                issues: self.issues,
            });
        }

        // Index assignment.
        let mut slots: FxHashMap<ClassId, Slot> = FxHashMap::default();
        if let Some(v) = voi {
            slots.insert(v, Slot::Voi);
        }

        let mut state_classes: Vec<ClassId> = self
            .classes
            .iter()
            .copied()
            .filter(|c| kinds.get(c) == Some(&Class::State))
            .collect();
        state_classes.sort_by_key(|c| ordinal_of(c));
        for (i, c) in state_classes.iter().enumerate() {
            slots.insert(*c, Slot::State(i));
        }

        let constants = self
            .classes
            .iter()
            .copied()
            .filter(|c| kinds.get(c) == Some(&Class::Constant));
        let computed_constants = order.iter().copied().filter(|c| computed_constant.contains(c));
        let algebraic = order.iter().copied().filter(|c| !computed_constant.contains(c));
        let external = self.externals.iter().map(|(c, _)| *c);

        let variable_classes: Vec<(ClassId, VariableKind)> = constants
            .map(|c| (c, VariableKind::Constant))
            .chain(computed_constants.map(|c| (c, VariableKind::ComputedConstant)))
            .chain(algebraic.map(|c| (c, VariableKind::Algebraic)))
            .chain(external.map(|c| (c, VariableKind::External)))
            .collect();
        for (i, (c, _)) in variable_classes.iter().enumerate() {
            slots.insert(*c, Slot::Variable(i));
        }

        let to_slots = |expr: &Expr<ClassId>| -> Result<Expr<Slot>, ModelGenerationError> {
            expr.try_map(&mut |c: &ClassId| {
                slots.get(c).copied().ok_or_else(|| ModelGenerationError::Analysis {
                    issues: vec![format!(
                        "variable `{}` has no place in the generated arrays",
                        self.reference(*c)
                    )],
                })
            })
        };

        // Quantities, named after the member that defines them.
        let representative = |c: ClassId| -> VarId {
            if let Some(d) = definitions.get(&c) {
                return d.var();
            }
            if let Some((v, _)) = constant_values.get(&c) {
                return *v;
            }
            if let Some((_, v)) = self.externals.iter().find(|(e, _)| *e == c) {
                return *v;
            }
            c
        };
        let describe = |c: ClassId,
                        kind: VariableKind,
                        index: usize,
                        initialiser: Option<Expr<Slot>>| {
            let var = representative(c);
            let (ci, vi) = self.vars[var];
            let component = &model.components[ci];
            let variable = &component.variables[vi];
            AnalysedVariable {
                name: variable.name.clone(),
                component: component.name.clone(),
                units: variable.units.clone().unwrap_or_default(),
                kind,
                index,
                initialiser,
                aliases: self.members(c).map(|m| self.reference(m)).collect(),
            }
        };

        let voi_variable = voi.map(|c| describe(c, VariableKind::VariableOfIntegration, 0, None));

        let mut states = Vec::with_capacity(state_classes.len());
        for (i, c) in state_classes.iter().enumerate() {
            let initialiser = match &state_inits[c] {
                (_, InitialValue::Constant(value)) => Expr::Number(*value),
                (var, InitialValue::Variable(name)) => {
                    let (ci, _) = self.vars[*var];
                    let component = model.components[ci].name.as_str();
                    let source = self
                        .lookup
                        .get(&(component, name.as_str()))
                        .map(|v| self.class_of[*v]);
                    match source.and_then(|s| kinds.get(&s).map(|k| (s, *k))) {
                        Some((s, Class::Constant | Class::External)) => Expr::Variable(s),
                        _ => {
                            return Err(ModelGenerationError::Analysis {
                                issues: vec![format!(
                                    "state variable `{}` must be initialised from a constant, \
                                     not `{name}`",
                                    self.reference(*var)
                                )],
                            });
                        }
                    }
                }
            };
            states.push(describe(*c, VariableKind::State, i, Some(to_slots(&initialiser)?)));
        }

        let variables: Vec<AnalysedVariable> = variable_classes
            .iter()
            .enumerate()
            .map(|(i, (c, kind))| {
                let initialiser = constant_values.get(c).map(|(_, value)| Expr::Number(*value));
                describe(*c, *kind, i, initialiser)
            })
            .collect();

        let mut equations = Vec::new();
        for (i, (c, kind)) in variable_classes.iter().enumerate() {
            if *kind == VariableKind::ComputedConstant
                && let Some(Definition::Algebraic { rhs, .. }) = definitions.get(c)
            {
                equations.push(AnalysedEquation {
                    kind: EquationKind::ComputedConstant(i),
                    rhs: to_slots(rhs)?,
                });
            }
        }
        for (i, c) in state_classes.iter().enumerate() {
            if let Some(Definition::Rate { rhs, .. }) = definitions.get(c) {
                equations.push(AnalysedEquation {
                    kind: EquationKind::Rate(i),
                    rhs: to_slots(rhs)?,
                });
            }
        }
        for (i, (c, kind)) in variable_classes.iter().enumerate() {
            if *kind == VariableKind::Algebraic
                && let Some(Definition::Algebraic { rhs, .. }) = definitions.get(c)
            {
                equations.push(AnalysedEquation {
                    kind: EquationKind::Algebraic(i),
                    rhs: to_slots(rhs)?,
                });
            }
        }

        Ok(AnalysedModel {
            name: model.name.clone(),
            voi: voi_variable,
            states,
            variables,
            equations,
        })
    }
}

/// Kahn's algorithm; ties are broken by equation order so the result is
/// deterministic. Returns the unresolved quantities on a cycle.
fn topological_order(
    nodes: &[ClassId],
    deps: &FxHashMap<ClassId, Vec<ClassId>>,
    ordinal_of: &impl Fn(&ClassId) -> usize,
) -> Result<Vec<ClassId>, Vec<ClassId>> {
    let node_set: FxHashSet<ClassId> = nodes.iter().copied().collect();
    let mut pending: FxHashMap<ClassId, usize> = nodes
        .iter()
        .map(|n| {
            let count = deps[n].iter().filter(|d| node_set.contains(d)).count();
            (*n, count)
        })
        .collect();

    let mut ready: BTreeSet<(usize, ClassId)> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(n, _)| (ordinal_of(n), *n))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(next) = ready.pop_first() {
        let (_, node) = next;
        pending.remove(&node);
        order.push(node);
        for n in nodes {
            if deps[n].contains(&node)
                && let Some(count) = pending.get_mut(n)
            {
                *count -= 1;
                if *count == 0 {
                    ready.insert((ordinal_of(n), *n));
                }
            }
        }
    }

    if pending.is_empty() {
        Ok(order)
    } else {
        let mut cycle: Vec<ClassId> = pending.into_keys().collect();
        cycle.sort_by_key(|c| ordinal_of(c));
        Err(cycle)
    }
}
