// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Small builders shared by the unit tests.

use crate::ast::{Equation, Expr};
use crate::datamodel::{
    Component, ComponentRef, Connection, Import, ImportedComponent, ImportedUnits, Interface,
    Model, UnitEntry, Units, Variable,
};

pub fn model(name: &str) -> Model {
    Model::new(name)
}

pub fn component(name: &str) -> Component {
    Component {
        name: name.to_owned(),
        ..Default::default()
    }
}

pub fn variable(
    name: &str,
    units: &str,
    public: Interface,
    private: Interface,
    initial: Option<&str>,
) -> Variable {
    Variable {
        name: name.to_owned(),
        cmeta_id: None,
        units: units.to_owned(),
        public_interface: public,
        private_interface: private,
        initial_value: initial.map(str::to_owned),
    }
}

/// A units definition from (referenced units, prefix, exponent) triples.
pub fn units_def(name: &str, entries: &[(&str, i32, f64)]) -> Units {
    Units {
        name: name.to_owned(),
        base_units: false,
        units: entries
            .iter()
            .map(|(units, prefix, exponent)| UnitEntry {
                units: (*units).to_owned(),
                prefix: *prefix,
                exponent: *exponent,
                ..Default::default()
            })
            .collect(),
    }
}

pub fn connection(first: &str, second: &str, vars: &[(&str, &str)]) -> Connection {
    Connection {
        first_component: first.to_owned(),
        second_component: second.to_owned(),
        variables: vars
            .iter()
            .map(|(a, b)| ((*a).to_owned(), (*b).to_owned()))
            .collect(),
    }
}

/// An import of `href` with (local alias, component ref) pairs, optionally
/// pre-instantiated.
pub fn import(href: &str, components: &[(&str, &str)], instantiated: Option<Model>) -> Import {
    Import {
        href: href.to_owned(),
        components: components
            .iter()
            .map(|(name, component_ref)| ImportedComponent {
                name: (*name).to_owned(),
                component_ref: (*component_ref).to_owned(),
            })
            .collect(),
        units: vec![],
        model: instantiated.map(Box::new),
    }
}

/// An imported-units alias: `name` locally, referencing `units_ref` in the
/// imported model.
pub fn units_alias(name: &str, units_ref: &str) -> ImportedUnits {
    ImportedUnits {
        name: name.to_owned(),
        units_ref: units_ref.to_owned(),
    }
}

pub fn component_ref(parent: &str, children: &[&str]) -> ComponentRef {
    ComponentRef {
        component: parent.to_owned(),
        children: children
            .iter()
            .map(|c| ComponentRef {
                component: (*c).to_owned(),
                children: vec![],
            })
            .collect(),
    }
}

/// `name = value <units>`.
pub fn eq_const(name: &str, value: f64, units: Option<&str>) -> Equation {
    Equation {
        lhs: Expr::Var(name.to_owned()),
        rhs: Expr::Const {
            value,
            units: units.map(str::to_owned),
        },
    }
}

/// `lhs = rhs`, both bare variables.
pub fn eq_var(lhs: &str, rhs: &str) -> Equation {
    Equation {
        lhs: Expr::Var(lhs.to_owned()),
        rhs: Expr::Var(rhs.to_owned()),
    }
}
