// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The in-memory document model: a single owning tree of models,
//! components, variables, units, connections, imports and groups.
//! Cross-entity references are name lookups, never back-pointers.

use std::collections::BTreeSet;

use crate::common::{Error, ErrorCode, ErrorKind, Result};
use crate::ast::MathBlock;

pub const ENCAPSULATION: &str = "encapsulation";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Interface {
    #[default]
    None,
    In,
    Out,
}

impl Interface {
    pub fn parse(s: &str) -> Option<Interface> {
        match s {
            "none" => Some(Interface::None),
            "in" => Some(Interface::In),
            "out" => Some(Interface::Out),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::None => "none",
            Interface::In => "in",
            Interface::Out => "out",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Variable {
    pub name: String,
    pub cmeta_id: Option<String>,
    /// Units reference, by name.
    pub units: String,
    pub public_interface: Interface,
    pub private_interface: Interface,
    /// Raw initial-value attribute: either a numeric literal or the name of
    /// another variable in the same component.
    pub initial_value: Option<String>,
}

impl Variable {
    /// The initial value, if it is a numeric literal.
    pub fn initial_literal(&self) -> Option<f64> {
        self.initial_value
            .as_deref()
            .and_then(|s| s.trim().parse::<f64>().ok())
    }

    pub fn has_in_interface(&self) -> bool {
        self.public_interface == Interface::In || self.private_interface == Interface::In
    }

    pub fn has_out_interface(&self) -> bool {
        self.public_interface == Interface::Out || self.private_interface == Interface::Out
    }
}

/// One base-unit reference inside a units definition.
#[derive(Clone, Debug, PartialEq)]
pub struct UnitEntry {
    pub units: String,
    /// Metric prefix, as a power-of-ten exponent.
    pub prefix: i32,
    pub exponent: f64,
    pub multiplier: f64,
    pub offset: f64,
}

impl Default for UnitEntry {
    fn default() -> Self {
        UnitEntry {
            units: String::new(),
            prefix: 0,
            exponent: 1.0,
            multiplier: 1.0,
            offset: 0.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Units {
    pub name: String,
    /// A user-declared base unit, resolvable no further.
    pub base_units: bool,
    pub units: Vec<UnitEntry>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Component {
    pub name: String,
    pub cmeta_id: Option<String>,
    pub variables: Vec<Variable>,
    pub units: Vec<Units>,
    pub math: Vec<MathBlock>,
    /// Non-math extension content, carried verbatim.
    pub extensions: Vec<String>,
}

impl Component {
    pub fn get_variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn get_variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn get_units(&self, name: &str) -> Option<&Units> {
        self.units.iter().find(|u| u.name == name)
    }
}

/// An unordered pair of components plus the variable pairs mapped between
/// them.  At most one connection exists per unordered component pair.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Connection {
    pub first_component: String,
    pub second_component: String,
    /// (variable in first, variable in second) pairs.
    pub variables: Vec<(String, String)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportedComponent {
    /// Local alias in the importing model.
    pub name: String,
    /// Name of the component in the imported model.
    pub component_ref: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImportedUnits {
    pub name: String,
    pub units_ref: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Import {
    pub href: String,
    pub components: Vec<ImportedComponent>,
    pub units: Vec<ImportedUnits>,
    /// The instantiated imported model; `None` until imports are resolved.
    pub model: Option<Box<Model>>,
}

/// A node in a containment tree over component names.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComponentRef {
    pub component: String,
    pub children: Vec<ComponentRef>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Group {
    /// Relationship kind; only [ENCAPSULATION] is handled by the passes.
    pub relationship: String,
    pub refs: Vec<ComponentRef>,
}

/// Stable identity of a component across the import closure: the owning
/// model's name plus the component's name within it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentKey {
    pub model: String,
    pub component: String,
}

impl ComponentKey {
    pub fn new(model: &str, component: &str) -> ComponentKey {
        ComponentKey {
            model: model.to_owned(),
            component: component.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub name: String,
    pub cmeta_id: Option<String>,
    pub components: Vec<Component>,
    pub units: Vec<Units>,
    pub connections: Vec<Connection>,
    pub imports: Vec<Import>,
    pub groups: Vec<Group>,
}

impl Model {
    pub fn new(name: &str) -> Model {
        Model {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn get_component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn get_component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.name == name)
    }

    pub fn get_units(&self, name: &str) -> Option<&Units> {
        self.units.iter().find(|u| u.name == name)
    }

    /// All models reachable through instantiated imports, this model first,
    /// depth-first, each distinct model name visited once.  Diamond-shared
    /// imports therefore appear a single time.
    pub fn reachable_models(&self) -> Vec<&Model> {
        fn walk<'a>(m: &'a Model, seen: &mut BTreeSet<String>, out: &mut Vec<&'a Model>) {
            if !seen.insert(m.name.clone()) {
                return;
            }
            out.push(m);
            for imp in &m.imports {
                if let Some(sub) = imp.model.as_deref() {
                    walk(sub, seen, out);
                }
            }
        }

        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        walk(self, &mut seen, &mut out);
        out
    }

    /// Find a model by name within this model's import closure.
    pub fn find_model(&self, name: &str) -> Option<&Model> {
        self.reachable_models().into_iter().find(|m| m.name == name)
    }

    /// Resolve the real component behind `component` in the model named
    /// `model_name`, following import alias chains until a locally defined
    /// component is found.  Requires imports to be instantiated.
    pub fn resolve_component(&self, model_name: &str, component: &str) -> Result<ComponentKey> {
        let mut mname = model_name.to_owned();
        let mut cname = component.to_owned();
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

        loop {
            if !seen.insert((mname.clone(), cname.clone())) {
                return crate::import_err!(ImportCycle, format!("{mname}/{cname}"));
            }
            let model = self.find_model(&mname).ok_or_else(|| {
                Error::new(ErrorKind::Import, ErrorCode::DoesNotExist, Some(mname.clone()))
            })?;
            if model.get_component(&cname).is_some() {
                return Ok(ComponentKey {
                    model: mname,
                    component: cname,
                });
            }

            let mut next = None;
            for imp in &model.imports {
                if let Some(ic) = imp.components.iter().find(|ic| ic.name == cname) {
                    let target = imp.model.as_deref().ok_or_else(|| {
                        Error::new(
                            ErrorKind::Import,
                            ErrorCode::MissingImportTarget,
                            Some(format!("import of '{}' not instantiated", imp.href)),
                        )
                    })?;
                    next = Some((target.name.clone(), ic.component_ref.clone()));
                    break;
                }
            }

            match next {
                Some((m, c)) => {
                    mname = m;
                    cname = c;
                }
                None => {
                    return crate::import_err!(
                        MissingImportTarget,
                        format!("no component '{cname}' in model '{mname}'")
                    );
                }
            }
        }
    }

    /// Resolve a units reference in the model named `model_name`, following
    /// import alias chains until a model with a local definition is found.
    /// A name with neither a definition nor an alias resolves to itself in
    /// the last model reached; the caller distinguishes builtin names from
    /// genuinely missing ones.
    pub fn resolve_units(&self, model_name: &str, units: &str) -> Result<(String, String)> {
        let mut mname = model_name.to_owned();
        let mut uname = units.to_owned();
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

        loop {
            if !seen.insert((mname.clone(), uname.clone())) {
                return crate::import_err!(ImportCycle, format!("{mname}/{uname}"));
            }
            let model = self.find_model(&mname).ok_or_else(|| {
                Error::new(ErrorKind::Import, ErrorCode::DoesNotExist, Some(mname.clone()))
            })?;
            if model.get_units(&uname).is_some() {
                return Ok((mname, uname));
            }

            let mut next = None;
            for imp in &model.imports {
                if let Some(iu) = imp.units.iter().find(|iu| iu.name == uname) {
                    let target = imp.model.as_deref().ok_or_else(|| {
                        Error::new(
                            ErrorKind::Import,
                            ErrorCode::MissingImportTarget,
                            Some(format!("import of '{}' not instantiated", imp.href)),
                        )
                    })?;
                    next = Some((target.name.clone(), iu.units_ref.clone()));
                    break;
                }
            }

            match next {
                Some((m, u)) => {
                    mname = m;
                    uname = u;
                }
                None => return Ok((mname, uname)),
            }
        }
    }

    /// Follow interface flags across this model's connections to the
    /// variable that ultimately supplies `variable`'s value.  Terminates at
    /// the first variable with no "in" interface, or at an "in" variable
    /// with no connected source.  Returns (component name, variable name).
    pub fn source_variable(&self, component: &str, variable: &str) -> Result<(String, String)> {
        let mut comp = component.to_owned();
        let mut var = variable.to_owned();
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

        loop {
            if !seen.insert((comp.clone(), var.clone())) {
                return crate::var_err!(CircularDependency, format!("{comp}:{var}"));
            }
            let c = self.get_component(&comp).ok_or_else(|| {
                Error::new(ErrorKind::Model, ErrorCode::DoesNotExist, Some(comp.clone()))
            })?;
            let v = c.get_variable(&var).ok_or_else(|| {
                Error::new(
                    ErrorKind::Variable,
                    ErrorCode::DoesNotExist,
                    Some(format!("{comp}:{var}")),
                )
            })?;
            if !v.has_in_interface() {
                return Ok((comp, var));
            }

            let mut next = None;
            'conns: for conn in &self.connections {
                let mut candidates: Vec<(&str, &str)> = Vec::new();
                if conn.first_component == comp {
                    for (a, b) in &conn.variables {
                        if a == &var {
                            candidates.push((conn.second_component.as_str(), b.as_str()));
                        }
                    }
                } else if conn.second_component == comp {
                    for (a, b) in &conn.variables {
                        if b == &var {
                            candidates.push((conn.first_component.as_str(), a.as_str()));
                        }
                    }
                }
                for (oc, ov) in candidates {
                    let supplies = self
                        .get_component(oc)
                        .and_then(|c| c.get_variable(ov))
                        .is_some_and(|v| v.has_out_interface());
                    if supplies {
                        next = Some((oc.to_owned(), ov.to_owned()));
                        break 'conns;
                    }
                }
            }

            match next {
                Some((nc, nv)) => {
                    comp = nc;
                    var = nv;
                }
                // an "in" variable nothing feeds is its own source
                None => return Ok((comp, var)),
            }
        }
    }
}
