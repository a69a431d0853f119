// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Units canonicalization: reduce any units reference to a sorted product of
//! SI base units, compare forms for equivalence, and materialize equivalent
//! definitions into a destination model.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use float_cmp::approx_eq;

use crate::common::{fallback_name, Result};
use crate::datamodel::{Component, Model, UnitEntry, Units};
use crate::units_err;

/// One factor in a canonical form: a base unit raised to an exponent, with
/// an accumulated power-of-ten prefix and (rarely) an additive offset.
#[derive(Clone, Debug)]
pub struct BaseUnit {
    pub name: String,
    pub prefix: i32,
    pub exponent: f64,
    pub offset: f64,
}

impl BaseUnit {
    fn new(name: &str) -> BaseUnit {
        BaseUnit {
            name: name.to_owned(),
            prefix: 0,
            exponent: 1.0,
            offset: 0.0,
        }
    }
}

impl PartialEq for BaseUnit {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.prefix == other.prefix
            && approx_eq!(f64, self.exponent, other.exponent, epsilon = 1e-9)
            && approx_eq!(f64, self.offset, other.offset, epsilon = 1e-9)
    }
}

/// A fully reduced units expression: factors sorted by base-unit name.  Two
/// units definitions are interchangeable exactly when their canonical forms
/// compare equal.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CanonicalForm {
    pub base_units: Vec<BaseUnit>,
}

impl CanonicalForm {
    pub fn dimensionless() -> CanonicalForm {
        CanonicalForm::default()
    }

    fn single(name: &str) -> CanonicalForm {
        CanonicalForm {
            base_units: vec![BaseUnit::new(name)],
        }
    }

    fn apply_exponent(&mut self, exponent: f64) {
        for bu in &mut self.base_units {
            bu.exponent *= exponent;
            bu.prefix = (bu.prefix as f64 * exponent).round() as i32;
        }
    }

    /// Fold `other` into `self`, summing exponents and prefixes of factors
    /// that share a base-unit name.
    fn merge(&mut self, other: CanonicalForm) {
        for bu in other.base_units {
            match self.base_units.iter_mut().find(|b| b.name == bu.name) {
                Some(existing) => {
                    existing.exponent += bu.exponent;
                    existing.prefix += bu.prefix;
                }
                None => self.base_units.push(bu),
            }
        }
    }

    fn normalize(&mut self) {
        self.base_units
            .retain(|bu| !approx_eq!(f64, bu.exponent, 0.0, epsilon = 1e-9));
        // additive offsets only make sense for a lone, unscaled factor
        if self.base_units.len() != 1 {
            for bu in &mut self.base_units {
                bu.offset = 0.0;
            }
        }
        self.base_units.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

pub const BASE_UNITS: [&str; 7] = [
    "ampere", "candela", "kelvin", "kilogram", "metre", "mole", "second",
];

static PREFIXES: LazyLock<HashMap<&'static str, i32>> = LazyLock::new(|| {
    HashMap::from([
        ("yotta", 24),
        ("zetta", 21),
        ("exa", 18),
        ("peta", 15),
        ("tera", 12),
        ("giga", 9),
        ("mega", 6),
        ("kilo", 3),
        ("hecto", 2),
        ("deka", 1),
        ("deci", -1),
        ("centi", -2),
        ("milli", -3),
        ("micro", -6),
        ("nano", -9),
        ("pico", -12),
        ("femto", -15),
        ("atto", -18),
        ("zepto", -21),
        ("yocto", -24),
    ])
});

/// A prefix is either one of the named SI prefixes or a literal integer
/// exponent.
pub fn prefix_exponent(name: &str) -> Option<i32> {
    if let Some(exp) = PREFIXES.get(name) {
        return Some(*exp);
    }
    name.trim().parse::<i32>().ok()
}

/// Derived units, each expressed as (base factors, offset).  Factors are
/// (name, prefix, exponent) triples over [BASE_UNITS].
static DERIVED: LazyLock<HashMap<&'static str, (Vec<(&'static str, i32, f64)>, f64)>> =
    LazyLock::new(|| {
        HashMap::from([
            ("hertz", (vec![("second", 0, -1.0)], 0.0)),
            (
                "newton",
                (vec![("kilogram", 0, 1.0), ("metre", 0, 1.0), ("second", 0, -2.0)], 0.0),
            ),
            (
                "pascal",
                (vec![("kilogram", 0, 1.0), ("metre", 0, -1.0), ("second", 0, -2.0)], 0.0),
            ),
            (
                "joule",
                (vec![("kilogram", 0, 1.0), ("metre", 0, 2.0), ("second", 0, -2.0)], 0.0),
            ),
            (
                "watt",
                (vec![("kilogram", 0, 1.0), ("metre", 0, 2.0), ("second", 0, -3.0)], 0.0),
            ),
            ("coulomb", (vec![("ampere", 0, 1.0), ("second", 0, 1.0)], 0.0)),
            (
                "volt",
                (
                    vec![
                        ("ampere", 0, -1.0),
                        ("kilogram", 0, 1.0),
                        ("metre", 0, 2.0),
                        ("second", 0, -3.0),
                    ],
                    0.0,
                ),
            ),
            (
                "farad",
                (
                    vec![
                        ("ampere", 0, 2.0),
                        ("kilogram", 0, -1.0),
                        ("metre", 0, -2.0),
                        ("second", 0, 4.0),
                    ],
                    0.0,
                ),
            ),
            (
                "ohm",
                (
                    vec![
                        ("ampere", 0, -2.0),
                        ("kilogram", 0, 1.0),
                        ("metre", 0, 2.0),
                        ("second", 0, -3.0),
                    ],
                    0.0,
                ),
            ),
            (
                "siemens",
                (
                    vec![
                        ("ampere", 0, 2.0),
                        ("kilogram", 0, -1.0),
                        ("metre", 0, -2.0),
                        ("second", 0, 3.0),
                    ],
                    0.0,
                ),
            ),
            (
                "weber",
                (
                    vec![
                        ("ampere", 0, -1.0),
                        ("kilogram", 0, 1.0),
                        ("metre", 0, 2.0),
                        ("second", 0, -2.0),
                    ],
                    0.0,
                ),
            ),
            (
                "tesla",
                (
                    vec![("ampere", 0, -1.0), ("kilogram", 0, 1.0), ("second", 0, -2.0)],
                    0.0,
                ),
            ),
            (
                "henry",
                (
                    vec![
                        ("ampere", 0, -2.0),
                        ("kilogram", 0, 1.0),
                        ("metre", 0, 2.0),
                        ("second", 0, -2.0),
                    ],
                    0.0,
                ),
            ),
            ("lumen", (vec![("candela", 0, 1.0)], 0.0)),
            ("lux", (vec![("candela", 0, 1.0), ("metre", 0, -2.0)], 0.0)),
            ("becquerel", (vec![("second", 0, -1.0)], 0.0)),
            ("gray", (vec![("metre", 0, 2.0), ("second", 0, -2.0)], 0.0)),
            ("sievert", (vec![("metre", 0, 2.0), ("second", 0, -2.0)], 0.0)),
            ("katal", (vec![("mole", 0, 1.0), ("second", 0, -1.0)], 0.0)),
            ("gram", (vec![("kilogram", -3, 1.0)], 0.0)),
            ("litre", (vec![("metre", -1, 3.0)], 0.0)),
            ("celsius", (vec![("kelvin", 0, 1.0)], 273.15)),
        ])
    });

/// Units that reduce to the empty product.
const DIMENSIONLESS: [&str; 4] = ["dimensionless", "radian", "steradian", "boolean"];

fn spelling(name: &str) -> &str {
    match name {
        "meter" => "metre",
        "liter" => "litre",
        _ => name,
    }
}

/// The canonical form of a built-in unit name, or `None` when the name is
/// not built in.
pub fn builtin_form(name: &str) -> Option<CanonicalForm> {
    let name = spelling(name);
    if DIMENSIONLESS.contains(&name) {
        return Some(CanonicalForm::dimensionless());
    }
    if BASE_UNITS.contains(&name) {
        return Some(CanonicalForm::single(name));
    }
    let (factors, offset) = DERIVED.get(name)?;
    let mut base_units: Vec<BaseUnit> = factors
        .iter()
        .map(|(n, p, e)| BaseUnit {
            name: (*n).to_owned(),
            prefix: *p,
            exponent: *e,
            offset: 0.0,
        })
        .collect();
    if base_units.len() == 1 {
        base_units[0].offset = *offset;
    }
    let mut form = CanonicalForm { base_units };
    form.normalize();
    Some(form)
}

pub fn is_builtin(name: &str) -> bool {
    let name = spelling(name);
    DIMENSIONLESS.contains(&name) || BASE_UNITS.contains(&name) || DERIVED.contains_key(name)
}

/// Reduces a units reference, in an optional component scope, to canonical
/// form.  `None` signals an unresolvable reference, which callers must
/// surface rather than paper over.
pub trait UnitsReducer {
    fn reduce(&self, model: &Model, scope: Option<&Component>, name: &str)
        -> Option<CanonicalForm>;
}

/// The default reducer: component-local definitions shadow model-level
/// ones, which shadow the built-in dictionary.
#[derive(Default)]
pub struct StandardReducer;

impl StandardReducer {
    fn reduce_inner(
        &self,
        model: &Model,
        scope: Option<&Component>,
        name: &str,
        in_progress: &mut BTreeSet<(String, String)>,
    ) -> Option<CanonicalForm> {
        // a definition that refers back to itself is unresolvable; keys are
        // qualified by model so an alias may share its target's name
        let key = (model.name.clone(), name.to_owned());
        if !in_progress.insert(key.clone()) {
            return None;
        }

        let def = scope
            .and_then(|c| c.get_units(name))
            .or_else(|| model.get_units(name));

        let result = match def {
            Some(def) if def.base_units => Some(CanonicalForm::single(&def.name)),
            Some(def) => {
                let mut form = CanonicalForm::dimensionless();
                for entry in &def.units {
                    let mut sub = self.reduce_inner(model, scope, &entry.units, in_progress)?;
                    sub.apply_exponent(entry.exponent);
                    // the prefix scales the referenced unit before the
                    // exponent applies, so it lands multiplied through
                    if entry.prefix != 0 && !sub.base_units.is_empty() {
                        let extra = (entry.prefix as f64 * entry.exponent).round() as i32;
                        sub.base_units[0].prefix += extra;
                    }
                    // an additive offset survives only on a lone factor;
                    // normalize() discards it from compound products
                    if entry.offset != 0.0 && sub.base_units.len() == 1 {
                        sub.base_units[0].offset += entry.offset;
                    }
                    form.merge(sub);
                }
                form.normalize();
                Some(form)
            }
            None => match self.units_alias(model, name) {
                Some((target, units_ref)) => {
                    self.reduce_inner(target, None, units_ref, in_progress)
                }
                None => builtin_form(name),
            },
        };

        in_progress.remove(&key);
        result
    }

    /// An imported-units alias in `model` matching `name`, as the
    /// instantiated target model plus the referenced units name.
    fn units_alias<'m>(&self, model: &'m Model, name: &str) -> Option<(&'m Model, &'m str)> {
        for imp in &model.imports {
            if let Some(iu) = imp.units.iter().find(|iu| iu.name == name) {
                return imp
                    .model
                    .as_deref()
                    .map(|target| (target, iu.units_ref.as_str()));
            }
        }
        None
    }
}

impl UnitsReducer for StandardReducer {
    fn reduce(
        &self,
        model: &Model,
        scope: Option<&Component>,
        name: &str,
    ) -> Option<CanonicalForm> {
        let mut in_progress = BTreeSet::new();
        self.reduce_inner(model, scope, name, &mut in_progress)
    }
}

/// Canonicalization facade used by the flattening and compaction passes.
pub struct Canonicalizer<'a> {
    reducer: &'a dyn UnitsReducer,
}

impl<'a> Canonicalizer<'a> {
    pub fn new(reducer: &'a dyn UnitsReducer) -> Canonicalizer<'a> {
        Canonicalizer { reducer }
    }

    pub fn canonicalize(
        &self,
        model: &Model,
        scope: Option<&Component>,
        name: &str,
    ) -> Option<CanonicalForm> {
        self.reducer.reduce(model, scope, name)
    }

    pub fn equivalent(&self, a: &CanonicalForm, b: &CanonicalForm) -> bool {
        a == b
    }

    /// Scan `dest`'s model-level definitions for one whose canonical form
    /// matches `form`.
    pub fn find_equivalent(&self, dest: &Model, form: &CanonicalForm) -> Option<String> {
        for def in &dest.units {
            if let Some(candidate) = self.reducer.reduce(dest, None, &def.name) {
                if self.equivalent(&candidate, form) {
                    return Some(def.name.clone());
                }
            }
        }
        None
    }

    /// Add a definition for `form` to `dest` under `preferred` when that
    /// name is free, otherwise under a counter-generated fallback.  Returns
    /// the name the definition landed under.
    pub fn materialize(
        &self,
        dest: &mut Model,
        preferred: &str,
        form: &CanonicalForm,
    ) -> Result<String> {
        if form.base_units.is_empty() && preferred.is_empty() {
            return units_err!(MissingUnits, "cannot materialize an unnamed unit".to_owned());
        }
        let name = if !preferred.is_empty()
            && dest.get_units(preferred).is_none()
            && !is_builtin(preferred)
        {
            preferred.to_owned()
        } else {
            fallback_name("units")
        };

        let entries: Vec<UnitEntry> = if form.base_units.is_empty() {
            vec![UnitEntry {
                units: "dimensionless".to_owned(),
                ..Default::default()
            }]
        } else {
            form.base_units
                .iter()
                .map(|bu| UnitEntry {
                    units: bu.name.clone(),
                    prefix: bu.prefix,
                    exponent: bu.exponent,
                    multiplier: 1.0,
                    offset: bu.offset,
                })
                .collect()
        };

        dest.units.push(Units {
            name: name.clone(),
            base_units: false,
            units: entries,
        });
        Ok(name)
    }
}
