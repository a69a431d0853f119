// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Compaction: reduce a flattened model to a two-component form.  One
//! component exposes every variable of the original model through a stable
//! interface; the other carries the constant parameters feeding them.

use std::collections::{BTreeSet, HashMap};

use crate::ast::{Equation, Expr, MathBlock};
use crate::classify::{classify, constant_parameter, Classification};
use crate::common::{unique_name, Result};
use crate::datamodel::{Connection, Interface, Model, Variable};
use crate::report::Report;
use crate::units::{is_builtin, Canonicalizer, UnitsReducer};
use crate::{units_err, var_err};

pub const INTERFACE_COMPONENT: &str = "compactedModelComponent";
const INTERFACE_CMETA: &str = "CompactedModelComponent";
pub const SOURCE_COMPONENT: &str = "sourceModelVariables";
const SOURCE_CMETA: &str = "OriginalVariables";

/// Compact `model` (already flattened, no imports) into a model named
/// `Compacted__<name>` holding exactly two components: the interface
/// component mirroring every source variable, and the source component
/// carrying resolved constants.
pub fn compact(model: &Model, reducer: &dyn UnitsReducer, report: &mut Report) -> Result<Model> {
    let mut c = Compactor {
        src: model,
        canon: Canonicalizer::new(reducer),
        out: Model::new(&format!("Compacted__{}", model.name)),
        iface_vars: Vec::new(),
        source_vars: Vec::new(),
        source_math: MathBlock::default(),
        iface_names: BTreeSet::new(),
        source_names: BTreeSet::new(),
        memo: HashMap::new(),
        pairs: Vec::new(),
    };
    c.run(report)?;
    Ok(c.out)
}

struct Compactor<'a> {
    src: &'a Model,
    canon: Canonicalizer<'a>,
    out: Model,
    iface_vars: Vec<Variable>,
    source_vars: Vec<Variable>,
    source_math: MathBlock,
    iface_names: BTreeSet<String>,
    source_names: BTreeSet<String>,
    /// (component, variable) in the source model to the name of the
    /// already-built source-component variable standing in for it.
    memo: HashMap<(String, String), String>,
    /// (interface variable, source variable) connection pairs.
    pairs: Vec<(String, String)>,
}

impl<'a> Compactor<'a> {
    fn run(&mut self, report: &mut Report) -> Result<()> {
        report.log(format!("compacting model '{}'", self.src.name));
        report.indent();

        let src = self.src;
        for comp in &src.components {
            report.log(format!("component '{}'", comp.name));
            report.indent();
            for v in &comp.variables {
                self.compact_variable(&comp.name, &v.name, report)?;
            }
            report.dedent();
        }

        self.assemble();
        report.dedent();
        Ok(())
    }

    /// Mirror one source-model variable into the interface component and
    /// wire it to its value's origin in the source component.
    fn compact_variable(&mut self, comp: &str, var: &str, report: &mut Report) -> Result<()> {
        let iface_name = unique_name(&mut self.iface_names, &format!("{comp}_{var}"));
        let cmeta_id = self
            .src
            .get_component(comp)
            .and_then(|c| c.get_variable(var))
            .and_then(|v| v.cmeta_id.clone());

        let (src_comp, src_var) = self.src.source_variable(comp, var)?;
        let source_name = self.compact_source_variable(&src_comp, &src_var, report)?;

        // the mirror carries the source's units, which the connection below
        // requires anyway
        let src_units = self
            .src
            .get_component(&src_comp)
            .and_then(|c| c.get_variable(&src_var))
            .map(|v| v.units.clone())
            .unwrap_or_default();
        let units = self.define_units(&src_comp, &src_units)?;

        report.log(format!("'{comp}:{var}' exposed as '{iface_name}' <- '{source_name}'"));

        self.iface_vars.push(Variable {
            name: iface_name.clone(),
            cmeta_id,
            units,
            public_interface: Interface::In,
            private_interface: Interface::None,
            initial_value: None,
        });
        self.pairs.push((iface_name, source_name));
        Ok(())
    }

    /// Build (or reuse) the source-component variable backing the real
    /// variable `comp:var`.
    fn compact_source_variable(
        &mut self,
        comp: &str,
        var: &str,
        report: &mut Report,
    ) -> Result<String> {
        let memo_key = (comp.to_owned(), var.to_owned());
        if let Some(name) = self.memo.get(&memo_key) {
            return Ok(name.clone());
        }
        let name = unique_name(&mut self.source_names, var);
        // reserve before building so self-referential chains reuse rather
        // than recurse forever; unwound on error
        self.memo.insert(memo_key.clone(), name.clone());
        match self.build_source_variable(comp, var, &name, report) {
            Ok(()) => Ok(name),
            Err(err) => {
                self.memo.remove(&memo_key);
                Err(err)
            }
        }
    }

    fn build_source_variable(
        &mut self,
        comp: &str,
        var: &str,
        name: &str,
        report: &mut Report,
    ) -> Result<()> {
        let src = self.src;
        let component = src.get_component(comp).and_then(|c| {
            c.get_variable(var).map(|v| (c, v))
        });
        let Some((component, v)) = component else {
            return var_err!(DoesNotExist, format!("{comp}:{var}"));
        };

        let units = self.define_units(comp, &v.units)?;
        let initial_value = self.resolve_initial(comp, v)?;

        let (class, handle) = classify(component, var);
        match class {
            Classification::ConstantParameterEquation => {
                let handle = handle.unwrap();
                let eq = &component.math[handle.block].equations[handle.equation];
                let (value, cn_units) = constant_parameter(eq).unwrap();
                let Some(cn_units) = cn_units else {
                    return units_err!(
                        ConstantMissingUnits,
                        format!("constant defining '{comp}:{var}' carries no units")
                    );
                };
                let mapped = self.define_units(comp, cn_units)?;
                self.source_math.equations.push(Equation {
                    lhs: Expr::Var(name.to_owned()),
                    rhs: Expr::Const {
                        value,
                        units: Some(mapped),
                    },
                });
                report.log(format!("'{comp}:{var}' is a constant parameter ({value})"));
            }
            Classification::Differential => {
                report.log(format!("'{comp}:{var}' is defined by a differential equation"));
            }
            Classification::VariableOfIntegration => {
                report.log(format!("'{comp}:{var}' is a variable of integration"));
            }
            Classification::AlgebraicLhs => {
                report.log(format!("'{comp}:{var}' is defined algebraically"));
            }
            Classification::SimpleEquality => {
                report.log(format!("'{comp}:{var}' is a simple equality"));
            }
            Classification::Unknown => {
                report.log(format!("'{comp}:{var}' has no defining equation"));
            }
        }

        self.source_vars.push(Variable {
            name: name.to_owned(),
            cmeta_id: None,
            units,
            public_interface: Interface::Out,
            private_interface: Interface::None,
            initial_value,
        });
        Ok(())
    }

    /// A literal initial value is kept as-is; a variable reference is
    /// chased to the literal its source carries.
    fn resolve_initial(&self, comp: &str, v: &Variable) -> Result<Option<String>> {
        let Some(raw) = v.initial_value.as_deref() else {
            return Ok(None);
        };
        if let Some(value) = v.initial_literal() {
            return Ok(Some(format!("{value}")));
        }
        let referenced = raw.trim();
        let (sc, sv) = self.src.source_variable(comp, referenced)?;
        let literal = self
            .src
            .get_component(&sc)
            .and_then(|c| c.get_variable(&sv))
            .and_then(|v| v.initial_literal());
        match literal {
            Some(value) => Ok(Some(format!("{value}"))),
            None => var_err!(
                UnresolvableInitialValue,
                format!("initial value of '{}:{}' refers to '{referenced}'", comp, v.name)
            ),
        }
    }

    /// Map a units reference from the source model into the compacted one,
    /// reusing an equivalent definition when one is already present.
    fn define_units(&mut self, comp: &str, units: &str) -> Result<String> {
        let scope = self.src.get_component(comp);
        match self.src.get_units(units).or_else(|| scope.and_then(|c| c.get_units(units))) {
            Some(_) => {
                let Some(form) = self.canon.canonicalize(self.src, scope, units) else {
                    return units_err!(MissingUnits, units.to_owned());
                };
                if let Some(existing) = self.canon.find_equivalent(&self.out, &form) {
                    return Ok(existing);
                }
                self.canon.materialize(&mut self.out, units, &form)
            }
            None if is_builtin(units) => Ok(units.to_owned()),
            None => units_err!(MissingUnits, units.to_owned()),
        }
    }

    fn assemble(&mut self) {
        let mut iface = crate::datamodel::Component {
            name: INTERFACE_COMPONENT.to_owned(),
            cmeta_id: Some(INTERFACE_CMETA.to_owned()),
            ..Default::default()
        };
        iface.variables = std::mem::take(&mut self.iface_vars);

        let mut source = crate::datamodel::Component {
            name: SOURCE_COMPONENT.to_owned(),
            cmeta_id: Some(SOURCE_CMETA.to_owned()),
            ..Default::default()
        };
        source.variables = std::mem::take(&mut self.source_vars);
        if !self.source_math.equations.is_empty() {
            source.math.push(std::mem::take(&mut self.source_math));
        }

        // interface variables take their values from the source component
        // through a single connection
        let pairs: Vec<(String, String)> = self.pairs.drain(..).collect();
        self.out.components.push(iface);
        self.out.components.push(source);
        if !pairs.is_empty() {
            self.out.connections.push(Connection {
                first_component: INTERFACE_COMPONENT.to_owned(),
                second_component: SOURCE_COMPONENT.to_owned(),
                variables: pairs,
            });
        }
    }
}
