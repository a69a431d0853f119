// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! End-to-end runs over complete CellML documents: parse, instantiate
//! imports, flatten, compact, serialize.

use std::collections::HashMap;
use std::io::BufReader;

use flatml_compat::engine::datamodel::Model;
use flatml_compat::engine::loader::ModelLoader;
use flatml_compat::engine::{
    compact, flatten, instantiate_imports, ConnectedRelevance, Report, Result, StandardReducer,
};
use flatml_compat::{open_cellml, to_cellml};

const ROOT_DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<model xmlns="http://www.cellml.org/cellml/1.0#"
       xmlns:cellml="http://www.cellml.org/cellml/1.0#"
       xmlns:xlink="http://www.w3.org/1999/xlink"
       name="circuit">
  <import xlink:href="battery.xml">
    <component name="power" component_ref="cell"/>
  </import>
  <units name="millivolt">
    <unit prefix="milli" units="volt"/>
  </units>
  <component name="load">
    <variable name="V" units="millivolt" public_interface="in"/>
    <variable name="R" units="dimensionless"/>
    <math xmlns="http://www.w3.org/1998/Math/MathML">
      <apply><eq/>
        <ci>R</ci>
        <cn cellml:units="dimensionless">220</cn>
      </apply>
    </math>
  </component>
  <connection>
    <map_components component_1="load" component_2="power"/>
    <map_variables variable_1="V" variable_2="V"/>
  </connection>
</model>"#;

const BATTERY_DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<model xmlns="http://www.cellml.org/cellml/1.0#"
       xmlns:cellml="http://www.cellml.org/cellml/1.0#"
       name="battery">
  <units name="mv">
    <unit prefix="milli" units="volt"/>
  </units>
  <component name="cell">
    <variable name="V" units="mv" public_interface="out" initial_value="1500"/>
  </component>
</model>"#;

struct StrLoader(HashMap<&'static str, &'static str>);

impl ModelLoader for StrLoader {
    fn load(&self, href: &str) -> Result<Model> {
        let doc = self.0.get(href).copied().unwrap_or_default();
        let mut reader = BufReader::new(doc.as_bytes());
        open_cellml(&mut reader)
    }
}

fn load_root() -> Model {
    let mut reader = BufReader::new(ROOT_DOC.as_bytes());
    let mut model = open_cellml(&mut reader).unwrap();
    let loader = StrLoader(HashMap::from([("battery.xml", BATTERY_DOC)]));
    instantiate_imports(&mut model, &loader).unwrap();
    model
}

#[test]
fn flattened_circuit_is_self_contained() {
    let model = load_root();
    let mut report = Report::new();
    let flat = flatten(&model, &ConnectedRelevance, &StandardReducer, &mut report).unwrap();

    assert!(flat.imports.is_empty());
    assert!(flat.get_component("load").is_some());
    // the battery's component lands under its import alias
    assert!(flat.get_component("power").is_some());
    // both models' millivolt definitions come along; the spellings differ
    // so neither shadows the other
    assert!(flat.get_units("millivolt").is_some());
    assert!(flat.get_units("mv").is_some());

    // the flattened model parses back from its serialized form unchanged
    let doc = to_cellml(&flat).unwrap();
    let mut reader = BufReader::new(doc.as_bytes());
    let reparsed = open_cellml(&mut reader).unwrap();
    assert_eq!(flat, reparsed);
}

#[test]
fn compacted_circuit_exposes_every_variable() {
    let model = load_root();
    let mut report = Report::new();
    let flat = flatten(&model, &ConnectedRelevance, &StandardReducer, &mut report).unwrap();
    let compacted = compact(&flat, &StandardReducer, &mut report).unwrap();

    assert_eq!("Compacted__circuit", compacted.name);
    assert_eq!(2, compacted.components.len());

    let iface = compacted.get_component("compactedModelComponent").unwrap();
    let names: Vec<&str> = iface.variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(vec!["load_V", "load_R", "power_V"], names);

    // load.V reads its value from power.V, so both interface variables
    // share the single source variable
    let source = compacted.get_component("sourceModelVariables").unwrap();
    assert_eq!(2, source.variables.len());
    let v = source.variables.iter().find(|v| v.name == "V").unwrap();
    assert_eq!(Some(1500.0), v.initial_literal());

    // R's defining constant becomes a synthesized equation
    let eq = &source.math[0].equations[0];
    assert_eq!(Some("R"), eq.lhs.as_var());
    assert_eq!(Some((220.0, Some("dimensionless"))), eq.rhs.as_const());

    let conn = &compacted.connections[0];
    assert_eq!(3, conn.variables.len());
}

#[test]
fn compacted_circuit_survives_serialization() {
    let model = load_root();
    let mut report = Report::new();
    let flat = flatten(&model, &ConnectedRelevance, &StandardReducer, &mut report).unwrap();
    let compacted = compact(&flat, &StandardReducer, &mut report).unwrap();

    let doc = to_cellml(&compacted).unwrap();
    let mut reader = BufReader::new(doc.as_bytes());
    let reparsed = open_cellml(&mut reader).unwrap();

    assert_eq!(compacted.components.len(), reparsed.components.len());
    assert_eq!(compacted.connections.len(), reparsed.connections.len());
    let iface = reparsed.get_component("compactedModelComponent").unwrap();
    assert_eq!(3, iface.variables.len());

    // the synthesized defining equation comes back intact
    let source = reparsed.get_component("sourceModelVariables").unwrap();
    let eq = &source.math[0].equations[0];
    assert_eq!(Some("R"), eq.lhs.as_var());
    assert_eq!(Some((220.0, Some("dimensionless"))), eq.rhs.as_const());

    assert_eq!(compacted, reparsed);
}

#[test]
fn report_narrates_both_passes() {
    let model = load_root();
    let mut report = Report::new();
    let flat = flatten(&model, &ConnectedRelevance, &StandardReducer, &mut report).unwrap();
    compact(&flat, &StandardReducer, &mut report).unwrap();

    let rendered = report.render();
    assert!(rendered.contains("flattening model 'circuit'"));
    assert!(rendered.contains("compacting model 'circuit'"));
    // entries carry nesting, so the report is machine-consumable too
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"level\""));
}
