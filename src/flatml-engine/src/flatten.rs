// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Flattening: collapse a model and its import closure into a single
//! self-contained model with no imports.

use std::collections::{BTreeSet, HashMap};

use crate::common::{unique_name, Error, ErrorCode, ErrorKind, Result};
use crate::datamodel::{
    ComponentKey, ComponentRef, Connection, Group, ImportedUnits, Model, UnitEntry, Units,
    ENCAPSULATION,
};
use crate::relevance::Relevance;
use crate::report::Report;
use crate::units::{is_builtin, Canonicalizer, UnitsReducer};
use crate::{units_err, var_err};

/// Flatten `root` into a new model containing every relevant component from
/// the import closure, with units copied up, connections rewritten, and
/// referenced initial values resolved to literals.  Imports must already be
/// instantiated.
pub fn flatten(
    root: &Model,
    relevance: &dyn Relevance,
    reducer: &dyn UnitsReducer,
    report: &mut Report,
) -> Result<Model> {
    let mut f = Flattener {
        root,
        canon: Canonicalizer::new(reducer),
        out: Model::new(&root.name),
        copied_units: BTreeSet::new(),
        unit_names: BTreeSet::new(),
        comp_names: BTreeSet::new(),
        renames: HashMap::new(),
        copies: HashMap::new(),
    };
    f.out.cmeta_id = root.cmeta_id.clone();
    f.run(relevance, report)?;
    Ok(f.out)
}

struct Flattener<'a> {
    root: &'a Model,
    canon: Canonicalizer<'a>,
    out: Model,
    /// (units name, origin model) pairs already copied up.
    copied_units: BTreeSet<(String, String)>,
    unit_names: BTreeSet<String>,
    comp_names: BTreeSet<String>,
    /// Import-alias renames; the outermost importing model's alias wins.
    renames: HashMap<ComponentKey, String>,
    /// Resolved component key to its name in the flattened model.
    copies: HashMap<ComponentKey, String>,
}

impl<'a> Flattener<'a> {
    fn run(&mut self, relevance: &dyn Relevance, report: &mut Report) -> Result<()> {
        report.log(format!("flattening model '{}'", self.root.name));
        report.indent();

        let relevant = relevance.relevant_components(self.root)?;

        self.copy_model_units(report)?;
        self.store_renamings(self.root)?;
        for key in &relevant {
            self.copy_component(key, report)?;
        }
        self.copy_connections(report)?;
        self.copy_groups(report);
        self.propagate_initial_values(report)?;

        report.dedent();
        Ok(())
    }

    /// Copy model-level units definitions, and definitions imported under an
    /// alias, from every model in the closure.  A definition already copied
    /// from the same origin is skipped.
    fn copy_model_units(&mut self, report: &mut Report) -> Result<()> {
        let root = self.root;
        for model in root.reachable_models() {
            for def in &model.units {
                if !self
                    .copied_units
                    .insert((def.name.clone(), model.name.clone()))
                {
                    continue;
                }
                self.copy_units_def(def.clone(), model, &def.name, report);
            }
            for imp in &model.imports {
                for iu in &imp.units {
                    if !self
                        .copied_units
                        .insert((iu.name.clone(), model.name.clone()))
                    {
                        continue;
                    }
                    self.copy_units_alias(&model.name, iu, report)?;
                }
            }
        }
        Ok(())
    }

    /// Copy the definition behind an imported-units alias.  The resolved
    /// target lands under the alias name, so references through the alias
    /// stay valid once the imports are gone.
    fn copy_units_alias(
        &mut self,
        model_name: &str,
        alias: &ImportedUnits,
        report: &mut Report,
    ) -> Result<()> {
        let root = self.root;
        let (tmodel, tname) = root.resolve_units(model_name, &alias.name)?;
        let origin = root.find_model(&tmodel).ok_or_else(|| {
            Error::new(ErrorKind::Model, ErrorCode::DoesNotExist, Some(tmodel.clone()))
        })?;
        let mut def = match origin.get_units(&tname) {
            Some(target) => target.clone(),
            None if is_builtin(&tname) => Units {
                name: String::new(),
                base_units: false,
                units: vec![UnitEntry {
                    units: tname.clone(),
                    ..Default::default()
                }],
            },
            None => {
                return crate::import_err!(
                    MissingImportTarget,
                    format!(
                        "imported units '{}' resolve to unknown '{}' in model '{}'",
                        alias.name, tname, tmodel
                    )
                );
            }
        };
        def.name = alias.name.clone();
        report.log(format!(
            "copying units '{}' from model '{}' as '{}'",
            tname, tmodel, alias.name
        ));
        self.copy_units_def(def, origin, &tname, report);
        Ok(())
    }

    /// Push one definition into the output.  A name clash keeps the first
    /// copy when the canonical forms agree and renames the newcomer when
    /// they differ.  `source_name` is the definition's name back in
    /// `origin`, which may differ from `def.name` for aliased copies.
    fn copy_units_def(&mut self, def: Units, origin: &Model, source_name: &str, report: &mut Report) {
        if self.out.get_units(&def.name).is_some() {
            let existing = self.canon.canonicalize(&self.out, None, &def.name);
            let incoming = self.canon.canonicalize(origin, None, source_name);
            if existing.is_some() && existing == incoming {
                report.log(format!(
                    "skipping duplicate units '{}' from model '{}'",
                    def.name, origin.name
                ));
                return;
            }
            let renamed = unique_name(&mut self.unit_names, &def.name);
            report.log(format!(
                "units '{}' from model '{}' conflicts; copied as '{}'",
                def.name, origin.name, renamed
            ));
            let mut clone = def;
            clone.name = renamed;
            self.out.units.push(clone);
            return;
        }
        self.unit_names.insert(def.name.clone());
        self.out.units.push(def);
    }

    /// Record the alias each imported component should be known by in the
    /// flattened model.  Recursion happens before insertion, so when an
    /// inner and an outer model both alias the same component the outermost
    /// alias overwrites.
    fn store_renamings(&mut self, model: &Model) -> Result<()> {
        for imp in &model.imports {
            let sub = imp.model.as_deref().ok_or_else(|| {
                Error::new(
                    ErrorKind::Import,
                    ErrorCode::MissingImportTarget,
                    Some(format!("import of '{}' not instantiated", imp.href)),
                )
            })?;
            self.store_renamings(sub)?;
            for ic in &imp.components {
                let key = self.root.resolve_component(&sub.name, &ic.component_ref)?;
                self.renames.insert(key, ic.name.clone());
            }
        }
        Ok(())
    }

    fn copy_component(&mut self, key: &ComponentKey, report: &mut Report) -> Result<()> {
        let model = self.root.find_model(&key.model).ok_or_else(|| {
            Error::new(ErrorKind::Model, ErrorCode::DoesNotExist, Some(key.model.clone()))
        })?;
        let comp = model.get_component(&key.component).ok_or_else(|| {
            Error::new(
                ErrorKind::Model,
                ErrorCode::DoesNotExist,
                Some(format!("{}/{}", key.model, key.component)),
            )
        })?;

        let preferred = self
            .renames
            .get(key)
            .cloned()
            .unwrap_or_else(|| comp.name.clone());
        let new_name = unique_name(&mut self.comp_names, &preferred);
        if new_name != comp.name {
            report.log(format!(
                "copying component '{}' from model '{}' as '{}'",
                comp.name, key.model, new_name
            ));
        } else {
            report.log(format!(
                "copying component '{}' from model '{}'",
                comp.name, key.model
            ));
        }

        // a variable whose units cannot be reduced poisons the whole pass
        for v in &comp.variables {
            if self.canon.canonicalize(model, Some(comp), &v.units).is_none() {
                return units_err!(
                    MissingUnits,
                    format!(
                        "variable '{}:{}' references unknown units '{}'",
                        comp.name, v.name, v.units
                    )
                );
            }
        }

        let mut clone = comp.clone();
        clone.name = new_name.clone();
        // component-local units honor the same (name, origin model) dedup
        // as the model-level copy
        clone.units.retain(|def| {
            if self
                .copied_units
                .insert((def.name.clone(), key.model.clone()))
            {
                true
            } else {
                report.log(format!(
                    "skipping duplicate units '{}' from model '{}'",
                    def.name, key.model
                ));
                false
            }
        });
        self.copies.insert(key.clone(), new_name);
        self.out.components.push(clone);
        Ok(())
    }

    fn copy_connections(&mut self, report: &mut Report) -> Result<()> {
        let root = self.root;
        let mut pending: Vec<Connection> = Vec::new();
        for model in root.reachable_models() {
            for conn in &model.connections {
                let first = root.resolve_component(&model.name, &conn.first_component)?;
                let second = root.resolve_component(&model.name, &conn.second_component)?;
                let (Some(fname), Some(sname)) =
                    (self.copies.get(&first), self.copies.get(&second))
                else {
                    report.log(format!(
                        "dropping connection {}~{} in model '{}': endpoint not copied",
                        conn.first_component, conn.second_component, model.name
                    ));
                    continue;
                };
                pending.push(Connection {
                    first_component: fname.clone(),
                    second_component: sname.clone(),
                    variables: conn.variables.clone(),
                });
            }
        }

        // at most one connection per unordered component pair
        for conn in pending {
            let existing = self.out.connections.iter_mut().find(|c| {
                (c.first_component == conn.first_component
                    && c.second_component == conn.second_component)
                    || (c.first_component == conn.second_component
                        && c.second_component == conn.first_component)
            });
            match existing {
                Some(c) if c.first_component == conn.first_component => {
                    c.variables.extend(conn.variables);
                }
                Some(c) => {
                    c.variables
                        .extend(conn.variables.into_iter().map(|(a, b)| (b, a)));
                }
                None => self.out.connections.push(conn),
            }
        }
        Ok(())
    }

    fn copy_groups(&mut self, report: &mut Report) {
        let root = self.root;
        let mut refs: Vec<ComponentRef> = Vec::new();
        for model in root.reachable_models() {
            for group in &model.groups {
                if group.relationship != ENCAPSULATION {
                    continue;
                }
                for r in &group.refs {
                    refs.extend(self.copy_group_node(model, r, report));
                }
            }
        }
        if !refs.is_empty() {
            self.out.groups.push(Group {
                relationship: ENCAPSULATION.to_owned(),
                refs,
            });
        }
    }

    /// Copy one containment node.  An uncopied node is logged and elided,
    /// with any copied descendants promoted in its place.
    fn copy_group_node(
        &self,
        model: &Model,
        node: &ComponentRef,
        report: &mut Report,
    ) -> Vec<ComponentRef> {
        let new_name = self
            .root
            .resolve_component(&model.name, &node.component)
            .ok()
            .and_then(|key| self.copies.get(&key).cloned());

        let children: Vec<ComponentRef> = node
            .children
            .iter()
            .flat_map(|c| self.copy_group_node(model, c, report))
            .collect();

        match new_name {
            Some(component) => vec![ComponentRef {
                component,
                children,
            }],
            None => {
                report.log(format!(
                    "encapsulation references component '{}', which was not copied",
                    node.component
                ));
                children
            }
        }
    }

    /// Rewrite initial-value attributes that name another variable into the
    /// literal that variable ultimately carries.
    fn propagate_initial_values(&mut self, report: &mut Report) -> Result<()> {
        let mut updates: Vec<(usize, usize, String)> = Vec::new();
        for (ci, comp) in self.out.components.iter().enumerate() {
            for (vi, v) in comp.variables.iter().enumerate() {
                let Some(raw) = v.initial_value.as_deref() else {
                    continue;
                };
                if v.initial_literal().is_some() {
                    continue;
                }
                let referenced = raw.trim();
                let (src_comp, src_var) = self.out.source_variable(&comp.name, referenced)?;
                let literal = self
                    .out
                    .get_component(&src_comp)
                    .and_then(|c| c.get_variable(&src_var))
                    .and_then(|sv| sv.initial_literal());
                match literal {
                    Some(value) => {
                        report.log(format!(
                            "resolved initial value of '{}:{}' to {} via '{}:{}'",
                            comp.name, v.name, value, src_comp, src_var
                        ));
                        updates.push((ci, vi, format!("{value}")));
                    }
                    None => {
                        return var_err!(
                            UnresolvableInitialValue,
                            format!(
                                "initial value of '{}:{}' refers to '{}', which has no literal value",
                                comp.name, v.name, referenced
                            )
                        );
                    }
                }
            }
        }
        for (ci, vi, value) in updates {
            self.out.components[ci].variables[vi].initial_value = Some(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::Interface;
    use crate::relevance::ConnectedRelevance;
    use crate::testutils::*;
    use crate::units::StandardReducer;

    fn run(root: &Model) -> Result<(Model, Report)> {
        let mut report = Report::new();
        let flat = flatten(root, &ConnectedRelevance, &StandardReducer, &mut report)?;
        Ok((flat, report))
    }

    fn simple_import_model() -> Model {
        let mut inner = model("inner");
        let mut c = component("osc");
        c.variables.push(variable(
            "x",
            "second",
            Interface::Out,
            Interface::None,
            Some("1.0"),
        ));
        inner.components.push(c);

        let mut root = model("root");
        let mut main = component("main");
        main.variables.push(variable(
            "x_in",
            "second",
            Interface::In,
            Interface::None,
            None,
        ));
        root.components.push(main);
        root.imports
            .push(import("inner.xml", &[("oscillator", "osc")], Some(inner)));
        root.connections
            .push(connection("main", "oscillator", &[("x_in", "x")]));
        root
    }

    #[test]
    fn test_flatten_inlines_imported_component_under_alias() {
        let root = simple_import_model();
        let (flat, _) = run(&root).unwrap();

        assert!(flat.imports.is_empty());
        assert!(flat.get_component("main").is_some());
        // the imported component appears under the importer's alias
        assert!(flat.get_component("oscillator").is_some());
        assert!(flat.get_component("osc").is_none());

        assert_eq!(1, flat.connections.len());
        let conn = &flat.connections[0];
        assert_eq!("oscillator", conn.second_component);
    }

    #[test]
    fn test_flatten_without_imports_preserves_names() {
        let mut m = model("m");
        let mut c1 = component("c1");
        c1.variables.push(variable(
            "v",
            "second",
            Interface::Out,
            Interface::None,
            None,
        ));
        let mut c2 = component("c2");
        c2.variables.push(variable(
            "w",
            "second",
            Interface::In,
            Interface::None,
            None,
        ));
        m.components.extend([c1, c2]);
        m.connections.push(connection("c1", "c2", &[("v", "w")]));

        let (flat, _) = run(&m).unwrap();
        assert_eq!(2, flat.components.len());
        assert_eq!(1, flat.connections.len());
        assert!(flat.imports.is_empty());
        assert!(flat.get_component("c1").is_some());
        assert!(flat.get_component("c2").is_some());
    }

    #[test]
    fn test_outermost_alias_wins() {
        let mut inner = model("inner");
        inner.components.push(component("core"));
        let mut middle = model("middle");
        middle
            .imports
            .push(import("inner.xml", &[("mid_name", "core")], Some(inner)));
        let mut root = model("root");
        root.imports
            .push(import("middle.xml", &[("top_name", "mid_name")], Some(middle)));

        let (flat, _) = run(&root).unwrap();
        assert!(flat.get_component("top_name").is_some());
        assert!(flat.get_component("mid_name").is_none());
    }

    #[test]
    fn test_name_collisions_get_suffixed() {
        let mut inner = model("inner");
        inner.components.push(component("main"));
        let mut root = model("root");
        root.components.push(component("main"));
        root.imports
            .push(import("inner.xml", &[("main", "main")], Some(inner)));

        let (flat, _) = run(&root).unwrap();
        assert!(flat.get_component("main").is_some());
        assert!(flat.get_component("main_1").is_some());
    }

    #[test]
    fn test_model_units_copied_and_deduped() {
        let mut inner = model("inner");
        inner.units.push(units_def("ms", &[("second", -3, 1.0)]));
        inner.components.push(component("c"));

        let mut root = model("root");
        root.units.push(units_def("ms", &[("second", -3, 1.0)]));
        root.imports
            .push(import("inner.xml", &[("c", "c")], Some(inner)));

        let (flat, report) = run(&root).unwrap();
        assert_eq!(1, flat.units.len());
        assert!(report.render().contains("skipping duplicate units 'ms'"));
    }

    #[test]
    fn test_imported_units_alias_usable_and_carried() {
        // root imports inner's "millisecond" under the alias "ms" and a
        // root variable references the alias
        let mut inner = model("inner");
        inner
            .units
            .push(units_def("millisecond", &[("second", -3, 1.0)]));

        let mut root = model("root");
        let mut main = component("main");
        main.variables
            .push(variable("t", "ms", Interface::None, Interface::None, None));
        root.components.push(main);
        let mut imp = import("inner.xml", &[], Some(inner));
        imp.units.push(units_alias("ms", "millisecond"));
        root.imports.push(imp);

        let (flat, _) = run(&root).unwrap();
        // the alias name is defined in the output, so the flattened model
        // stays self-contained
        let ms = flat.get_units("ms").unwrap();
        assert_eq!("second", ms.units[0].units);
        assert_eq!(-3, ms.units[0].prefix);
        assert!(flat.get_units("millisecond").is_some());
        assert_eq!(
            "ms",
            flat.get_component("main").unwrap().get_variable("t").unwrap().units
        );
    }

    #[test]
    fn test_conflicting_model_units_renamed() {
        let mut inner = model("inner");
        inner.units.push(units_def("tick", &[("second", -3, 1.0)]));
        inner.components.push(component("c"));

        let mut root = model("root");
        root.units.push(units_def("tick", &[("second", 0, 1.0)]));
        root.imports
            .push(import("inner.xml", &[("c", "c")], Some(inner)));

        let (flat, _) = run(&root).unwrap();
        assert_eq!(2, flat.units.len());
        assert!(flat.get_units("tick").is_some());
        assert!(flat.get_units("tick_1").is_some());
    }

    #[test]
    fn test_unknown_units_abort_the_pass() {
        let mut root = model("root");
        let mut c = component("main");
        c.variables.push(variable(
            "v",
            "fathoms",
            Interface::None,
            Interface::None,
            None,
        ));
        root.components.push(c);

        let err = run(&root).unwrap_err();
        assert_eq!(ErrorCode::MissingUnits, err.code);
    }

    #[test]
    fn test_initial_value_reference_resolved() {
        let mut root = model("root");
        let mut c = component("main");
        c.variables.push(variable(
            "k",
            "second",
            Interface::None,
            Interface::None,
            Some("2.5"),
        ));
        c.variables.push(variable(
            "v",
            "second",
            Interface::None,
            Interface::None,
            Some("k"),
        ));
        root.components.push(c);

        let (flat, _) = run(&root).unwrap();
        let v = flat.get_component("main").unwrap().get_variable("v").unwrap();
        assert_eq!(Some(2.5), v.initial_literal());
    }

    #[test]
    fn test_unresolvable_initial_value_aborts() {
        let mut root = model("root");
        let mut c = component("main");
        c.variables.push(variable(
            "k",
            "second",
            Interface::None,
            Interface::None,
            None,
        ));
        c.variables.push(variable(
            "v",
            "second",
            Interface::None,
            Interface::None,
            Some("k"),
        ));
        root.components.push(c);

        let err = run(&root).unwrap_err();
        assert_eq!(ErrorCode::UnresolvableInitialValue, err.code);
    }

    #[test]
    fn test_encapsulation_copied_with_renames() {
        let mut inner = model("inner");
        inner.components.push(component("parent"));
        inner.components.push(component("child"));
        inner.groups.push(Group {
            relationship: ENCAPSULATION.to_owned(),
            refs: vec![component_ref("parent", &["child"])],
        });
        inner.connections.push(connection("parent", "child", &[]));

        let mut root = model("root");
        root.imports
            .push(import("inner.xml", &[("top", "parent")], Some(inner)));

        let (flat, _) = run(&root).unwrap();
        assert_eq!(1, flat.groups.len());
        let r = &flat.groups[0].refs[0];
        assert_eq!("top", r.component);
        assert_eq!("child", r.children[0].component);
    }
}
