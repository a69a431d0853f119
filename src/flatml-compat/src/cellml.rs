// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Reading and writing CellML documents.
//!
//! Documents are parsed into a small element tree first, then converted to
//! the engine's datamodel; unrecognized component content survives as raw
//! markup.  Serialization mirrors the tree-walk of the parser.

use std::io::{BufRead, Cursor, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use flatml_engine::ast::{Equation, Expr, MathBlock, MathOp};
use flatml_engine::common::Result;
use flatml_engine::datamodel::{
    Component, ComponentRef, Connection, Group, Import, ImportedComponent, ImportedUnits,
    Interface, Model, UnitEntry, Units, Variable,
};
use flatml_engine::units::prefix_exponent;

trait ToXml<W: Clone + Write> {
    fn write_xml(&self, writer: &mut Writer<W>) -> Result<()>;
}

type XmlWriter = Cursor<Vec<u8>>;

macro_rules! import_err(
    ($code:tt, $str:expr) => {{
        use flatml_engine::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Import, ErrorCode::$code, Some($str)))
    }}
);

const CELLML_NS: &str = "http://www.cellml.org/cellml/1.0#";
const MATHML_NS: &str = "http://www.w3.org/1998/Math/MathML";
const CMETA_NS: &str = "http://www.cellml.org/metadata/1.0#";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

// ---------------------------------------------------------------------------
// element tree

#[derive(Clone, Debug, PartialEq)]
struct XElement {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XNode>,
}

#[derive(Clone, Debug, PartialEq)]
enum XNode {
    Element(XElement),
    Text(String),
}

fn local(name: &str) -> &str {
    match name.rsplit_once(':') {
        Some((_, l)) => l,
        None => name,
    }
}

impl XElement {
    fn local(&self) -> &str {
        local(&self.name)
    }

    /// Attribute lookup: an exact qualified-name match wins, then a match
    /// on local names.
    fn attr(&self, name: &str) -> Option<&str> {
        if let Some((_, v)) = self.attrs.iter().find(|(k, _)| k == name) {
            return Some(v.as_str());
        }
        self.attrs
            .iter()
            .find(|(k, _)| local(k) == local(name))
            .map(|(_, v)| v.as_str())
    }

    fn elements(&self) -> impl Iterator<Item = &XElement> {
        self.children.iter().filter_map(|n| match n {
            XNode::Element(e) => Some(e),
            XNode::Text(_) => None,
        })
    }

    fn text(&self) -> String {
        let mut out = String::new();
        for n in &self.children {
            if let XNode::Text(t) = n {
                out.push_str(t);
            }
        }
        out
    }

    /// Re-serialize this element as standalone markup, for content we carry
    /// through without interpreting.
    fn raw(&self) -> String {
        use quick_xml::escape::escape;

        let mut out = String::new();
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return out;
        }
        out.push('>');
        for n in &self.children {
            match n {
                XNode::Element(e) => out.push_str(&e.raw()),
                XNode::Text(t) => out.push_str(&escape(t.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
        out
    }
}

fn element_from(e: &BytesStart) -> Result<XElement> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(err) => return import_err!(XmlDeserialization, err.to_string()),
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(err) => return import_err!(XmlDeserialization, err.to_string()),
        };
        attrs.push((key, value));
    }
    Ok(XElement {
        name,
        attrs,
        children: Vec::new(),
    })
}

fn parse_tree(reader: &mut dyn BufRead) -> Result<XElement> {
    let mut xml = Reader::from_reader(reader);
    let mut buf = Vec::new();
    let mut stack: Vec<XElement> = Vec::new();
    let mut root: Option<XElement> = None;

    loop {
        let event = match xml.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(err) => return import_err!(XmlDeserialization, err.to_string()),
        };
        match event {
            Event::Start(e) => stack.push(element_from(&e)?),
            Event::Empty(e) => {
                let elem = element_from(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XNode::Element(elem)),
                    None => root = Some(elem),
                }
            }
            Event::End(_) => {
                let Some(elem) = stack.pop() else {
                    return import_err!(XmlDeserialization, "unbalanced close tag".to_owned());
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XNode::Element(elem)),
                    None => root = Some(elem),
                }
            }
            Event::Text(t) => {
                let text = match t.xml_content() {
                    Ok(text) => text,
                    Err(err) => return import_err!(XmlDeserialization, err.to_string()),
                };
                let text = text.trim();
                if !text.is_empty() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XNode::Text(text.to_owned()));
                    }
                }
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XNode::Text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    match root {
        Some(root) => Ok(root),
        None => import_err!(XmlDeserialization, "document has no root element".to_owned()),
    }
}

// ---------------------------------------------------------------------------
// tree -> datamodel

pub fn model_from_reader(reader: &mut dyn BufRead) -> Result<Model> {
    let root = parse_tree(reader)?;
    model_from(&root)
}

fn model_from(e: &XElement) -> Result<Model> {
    if e.local() != "model" {
        return import_err!(
            XmlDeserialization,
            format!("expected a model document, found <{}>", e.name)
        );
    }
    let Some(name) = e.attr("name") else {
        return import_err!(BadModelName, "model element has no name".to_owned());
    };
    if name.is_empty() {
        return import_err!(BadModelName, "model name is empty".to_owned());
    }

    let mut model = Model::new(name);
    model.cmeta_id = e.attr("cmeta:id").map(str::to_owned);
    for child in e.elements() {
        match child.local() {
            "units" => model.units.push(units_from(child)?),
            "component" => model.components.push(component_from(child)?),
            "connection" => model.connections.push(connection_from(child)?),
            "import" => model.imports.push(import_from(child)?),
            "group" => model.groups.push(group_from(child)),
            _ => {}
        }
    }
    Ok(model)
}

fn units_from(e: &XElement) -> Result<Units> {
    let name = e.attr("name").unwrap_or_default().to_owned();
    if name.is_empty() {
        return import_err!(XmlDeserialization, "units element has no name".to_owned());
    }
    let base_units = e.attr("base_units") == Some("yes");
    let mut units = Vec::new();
    for child in e.elements() {
        if child.local() != "unit" {
            continue;
        }
        let mut entry = UnitEntry {
            units: child.attr("units").unwrap_or_default().to_owned(),
            ..Default::default()
        };
        if let Some(prefix) = child.attr("prefix") {
            entry.prefix = match prefix_exponent(prefix) {
                Some(exp) => exp,
                None => {
                    return import_err!(
                        XmlDeserialization,
                        format!("unknown prefix '{prefix}' in units '{name}'")
                    );
                }
            };
        }
        if let Some(exponent) = child.attr("exponent") {
            entry.exponent = parse_number(exponent, "exponent")?;
        }
        if let Some(multiplier) = child.attr("multiplier") {
            entry.multiplier = parse_number(multiplier, "multiplier")?;
        }
        if let Some(offset) = child.attr("offset") {
            entry.offset = parse_number(offset, "offset")?;
        }
        units.push(entry);
    }
    Ok(Units {
        name,
        base_units,
        units,
    })
}

fn parse_number(s: &str, what: &str) -> Result<f64> {
    match s.trim().parse::<f64>() {
        Ok(v) => Ok(v),
        Err(_) => import_err!(XmlDeserialization, format!("bad {what} value '{s}'")),
    }
}

fn component_from(e: &XElement) -> Result<Component> {
    let mut comp = Component {
        name: e.attr("name").unwrap_or_default().to_owned(),
        cmeta_id: e.attr("cmeta:id").map(str::to_owned),
        ..Default::default()
    };
    for child in e.elements() {
        match child.local() {
            "variable" => comp.variables.push(variable_from(child)),
            "units" => comp.units.push(units_from(child)?),
            "math" => comp.math.push(math_from(child)?),
            _ => comp.extensions.push(child.raw()),
        }
    }
    Ok(comp)
}

fn variable_from(e: &XElement) -> Variable {
    Variable {
        name: e.attr("name").unwrap_or_default().to_owned(),
        cmeta_id: e.attr("cmeta:id").map(str::to_owned),
        units: e.attr("units").unwrap_or_default().to_owned(),
        public_interface: e
            .attr("public_interface")
            .and_then(Interface::parse)
            .unwrap_or_default(),
        private_interface: e
            .attr("private_interface")
            .and_then(Interface::parse)
            .unwrap_or_default(),
        initial_value: e.attr("initial_value").map(str::to_owned),
    }
}

fn connection_from(e: &XElement) -> Result<Connection> {
    let mut conn = Connection::default();
    for child in e.elements() {
        match child.local() {
            "map_components" => {
                conn.first_component = child.attr("component_1").unwrap_or_default().to_owned();
                conn.second_component = child.attr("component_2").unwrap_or_default().to_owned();
            }
            "map_variables" => {
                conn.variables.push((
                    child.attr("variable_1").unwrap_or_default().to_owned(),
                    child.attr("variable_2").unwrap_or_default().to_owned(),
                ));
            }
            _ => {}
        }
    }
    if conn.first_component.is_empty() || conn.second_component.is_empty() {
        return import_err!(
            XmlDeserialization,
            "connection is missing map_components".to_owned()
        );
    }
    Ok(conn)
}

fn import_from(e: &XElement) -> Result<Import> {
    let Some(href) = e.attr("xlink:href") else {
        return import_err!(XmlDeserialization, "import has no xlink:href".to_owned());
    };
    let mut imp = Import {
        href: href.to_owned(),
        ..Default::default()
    };
    for child in e.elements() {
        match child.local() {
            "component" => imp.components.push(ImportedComponent {
                name: child.attr("name").unwrap_or_default().to_owned(),
                component_ref: child.attr("component_ref").unwrap_or_default().to_owned(),
            }),
            "units" => imp.units.push(ImportedUnits {
                name: child.attr("name").unwrap_or_default().to_owned(),
                units_ref: child.attr("units_ref").unwrap_or_default().to_owned(),
            }),
            _ => {}
        }
    }
    Ok(imp)
}

fn group_from(e: &XElement) -> Group {
    let mut group = Group::default();
    for child in e.elements() {
        match child.local() {
            "relationship_ref" => {
                group.relationship = child.attr("relationship").unwrap_or_default().to_owned();
            }
            "component_ref" => group.refs.push(component_ref_from(child)),
            _ => {}
        }
    }
    group
}

fn component_ref_from(e: &XElement) -> ComponentRef {
    ComponentRef {
        component: e.attr("component").unwrap_or_default().to_owned(),
        children: e
            .elements()
            .filter(|c| c.local() == "component_ref")
            .map(component_ref_from)
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// MathML

fn math_from(e: &XElement) -> Result<MathBlock> {
    let mut block = MathBlock::default();
    for child in e.elements() {
        if child.local() != "apply" {
            return import_err!(
                XmlDeserialization,
                format!("expected <apply> in math, found <{}>", child.name)
            );
        }
        block.equations.push(equation_from(child)?);
    }
    Ok(block)
}

fn equation_from(apply: &XElement) -> Result<Equation> {
    let kids: Vec<&XElement> = apply.elements().collect();
    match kids.as_slice() {
        [op, lhs, rhs] if op.local() == "eq" => Ok(Equation {
            lhs: expr_from(lhs)?,
            rhs: expr_from(rhs)?,
        }),
        _ => import_err!(
            XmlDeserialization,
            "top-level apply is not a two-sided equality".to_owned()
        ),
    }
}

fn expr_from(e: &XElement) -> Result<Expr> {
    match e.local() {
        "ci" => Ok(Expr::Var(e.text().trim().to_owned())),
        "cn" => Ok(Expr::Const {
            value: parse_number(&e.text(), "cn")?,
            units: e.attr("cellml:units").map(str::to_owned),
        }),
        "apply" => apply_from(e),
        "piecewise" => piecewise_from(e),
        other => import_err!(
            XmlDeserialization,
            format!("unsupported math element <{other}>")
        ),
    }
}

fn apply_from(e: &XElement) -> Result<Expr> {
    let kids: Vec<&XElement> = e.elements().collect();
    let Some((op, operands)) = kids.split_first() else {
        return import_err!(XmlDeserialization, "empty apply".to_owned());
    };

    if op.local() == "diff" {
        let bound = operands
            .iter()
            .find(|k| k.local() == "bvar")
            .and_then(|b| b.elements().find(|c| c.local() == "ci"))
            .map(|ci| ci.text().trim().to_owned());
        let operand = operands.iter().find(|k| k.local() != "bvar");
        return match (bound, operand) {
            (Some(bound), Some(operand)) => Ok(Expr::Diff {
                bound,
                operand: Box::new(expr_from(operand)?),
            }),
            _ => import_err!(XmlDeserialization, "malformed derivative".to_owned()),
        };
    }

    let Some(op) = MathOp::parse(op.local()) else {
        return import_err!(
            XmlDeserialization,
            format!("unsupported operator <{}>", op.name)
        );
    };
    let args = operands
        .iter()
        .map(|k| expr_from(k))
        .collect::<Result<Vec<Expr>>>()?;
    Ok(Expr::Op(op, args))
}

fn piecewise_from(e: &XElement) -> Result<Expr> {
    let mut pieces = Vec::new();
    let mut otherwise = None;
    for child in e.elements() {
        match child.local() {
            "piece" => {
                let kids: Vec<&XElement> = child.elements().collect();
                match kids.as_slice() {
                    [value, cond] => pieces.push((expr_from(value)?, expr_from(cond)?)),
                    _ => {
                        return import_err!(
                            XmlDeserialization,
                            "piece needs a value and a condition".to_owned()
                        );
                    }
                }
            }
            "otherwise" => {
                let kids: Vec<&XElement> = child.elements().collect();
                match kids.as_slice() {
                    [value] => otherwise = Some(Box::new(expr_from(value)?)),
                    _ => {
                        return import_err!(
                            XmlDeserialization,
                            "otherwise needs a single value".to_owned()
                        );
                    }
                }
            }
            other => {
                return import_err!(
                    XmlDeserialization,
                    format!("unexpected <{other}> in piecewise")
                );
            }
        }
    }
    Ok(Expr::Piecewise { pieces, otherwise })
}

// ---------------------------------------------------------------------------
// datamodel -> XML

fn xml_error(err: std::io::Error) -> flatml_engine::common::Error {
    use flatml_engine::common::{Error, ErrorCode, ErrorKind};

    Error::new(
        ErrorKind::Import,
        ErrorCode::XmlDeserialization,
        Some(err.to_string()),
    )
}

fn write_tag_start(writer: &mut Writer<XmlWriter>, tag_name: &str) -> Result<()> {
    write_tag_start_with_attrs(writer, tag_name, &[])
}

fn write_tag_start_with_attrs(
    writer: &mut Writer<XmlWriter>,
    tag_name: &str,
    attrs: &[(&str, &str)],
) -> Result<()> {
    let mut elem = BytesStart::new(tag_name);
    for attr in attrs.iter() {
        elem.push_attribute(*attr);
    }
    writer.write_event(Event::Start(elem)).map_err(xml_error)
}

fn write_tag_end(writer: &mut Writer<XmlWriter>, tag_name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(tag_name)))
        .map_err(xml_error)
}

fn write_tag_text(writer: &mut Writer<XmlWriter>, content: &str) -> Result<()> {
    writer
        .write_event(Event::Text(BytesText::new(content)))
        .map_err(xml_error)
}

fn write_tag(writer: &mut Writer<XmlWriter>, tag_name: &str, content: &str) -> Result<()> {
    write_tag_with_attrs(writer, tag_name, content, &[])
}

fn write_tag_with_attrs(
    writer: &mut Writer<XmlWriter>,
    tag_name: &str,
    content: &str,
    attrs: &[(&str, &str)],
) -> Result<()> {
    write_tag_start_with_attrs(writer, tag_name, attrs)?;

    write_tag_text(writer, content)?;

    write_tag_end(writer, tag_name)
}

fn write_empty_tag(writer: &mut Writer<XmlWriter>, tag_name: &str) -> Result<()> {
    write_empty_tag_with_attrs(writer, tag_name, &[])
}

fn write_empty_tag_with_attrs(
    writer: &mut Writer<XmlWriter>,
    tag_name: &str,
    attrs: &[(&str, &str)],
) -> Result<()> {
    let mut elem = BytesStart::new(tag_name);
    for attr in attrs.iter() {
        elem.push_attribute(*attr);
    }
    writer.write_event(Event::Empty(elem)).map_err(xml_error)
}

fn write_raw(writer: &mut Writer<XmlWriter>, content: &str) -> Result<()> {
    writer
        .get_mut()
        .write_all(content.as_bytes())
        .map_err(xml_error)
}

impl ToXml<XmlWriter> for Units {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        let mut attrs = vec![("name", self.name.as_str())];
        if self.base_units {
            attrs.push(("base_units", "yes"));
        }
        if self.units.is_empty() {
            return write_empty_tag_with_attrs(writer, "units", &attrs);
        }
        write_tag_start_with_attrs(writer, "units", &attrs)?;
        for entry in &self.units {
            let prefix = entry.prefix.to_string();
            let exponent = entry.exponent.to_string();
            let multiplier = entry.multiplier.to_string();
            let offset = entry.offset.to_string();
            let mut attrs = vec![("units", entry.units.as_str())];
            if entry.prefix != 0 {
                attrs.push(("prefix", prefix.as_str()));
            }
            if entry.exponent != 1.0 {
                attrs.push(("exponent", exponent.as_str()));
            }
            if entry.multiplier != 1.0 {
                attrs.push(("multiplier", multiplier.as_str()));
            }
            if entry.offset != 0.0 {
                attrs.push(("offset", offset.as_str()));
            }
            write_empty_tag_with_attrs(writer, "unit", &attrs)?;
        }
        write_tag_end(writer, "units")
    }
}

impl ToXml<XmlWriter> for Variable {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        let mut attrs = vec![("name", self.name.as_str()), ("units", self.units.as_str())];
        if let Some(ref id) = self.cmeta_id {
            attrs.push(("cmeta:id", id.as_str()));
        }
        if self.public_interface != Interface::None {
            attrs.push(("public_interface", self.public_interface.as_str()));
        }
        if self.private_interface != Interface::None {
            attrs.push(("private_interface", self.private_interface.as_str()));
        }
        if let Some(ref initial) = self.initial_value {
            attrs.push(("initial_value", initial.as_str()));
        }
        write_empty_tag_with_attrs(writer, "variable", &attrs)
    }
}

impl ToXml<XmlWriter> for Expr {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        match self {
            Expr::Var(name) => write_tag(writer, "ci", name),
            Expr::Const { value, units } => {
                let value = value.to_string();
                match units {
                    Some(units) => write_tag_with_attrs(
                        writer,
                        "cn",
                        &value,
                        &[("cellml:units", units.as_str())],
                    ),
                    None => write_tag(writer, "cn", &value),
                }
            }
            Expr::Op(op, args) => {
                write_tag_start(writer, "apply")?;
                write_empty_tag(writer, op.name())?;
                for arg in args {
                    arg.write_xml(writer)?;
                }
                write_tag_end(writer, "apply")
            }
            Expr::Diff { bound, operand } => {
                write_tag_start(writer, "apply")?;
                write_empty_tag(writer, "diff")?;
                write_tag_start(writer, "bvar")?;
                write_tag(writer, "ci", bound)?;
                write_tag_end(writer, "bvar")?;
                operand.write_xml(writer)?;
                write_tag_end(writer, "apply")
            }
            Expr::Piecewise { pieces, otherwise } => {
                write_tag_start(writer, "piecewise")?;
                for (value, cond) in pieces {
                    write_tag_start(writer, "piece")?;
                    value.write_xml(writer)?;
                    cond.write_xml(writer)?;
                    write_tag_end(writer, "piece")?;
                }
                if let Some(otherwise) = otherwise {
                    write_tag_start(writer, "otherwise")?;
                    otherwise.write_xml(writer)?;
                    write_tag_end(writer, "otherwise")?;
                }
                write_tag_end(writer, "piecewise")
            }
        }
    }
}

impl ToXml<XmlWriter> for MathBlock {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        write_tag_start_with_attrs(writer, "math", &[("xmlns", MATHML_NS)])?;
        for eq in &self.equations {
            write_tag_start(writer, "apply")?;
            write_empty_tag(writer, "eq")?;
            eq.lhs.write_xml(writer)?;
            eq.rhs.write_xml(writer)?;
            write_tag_end(writer, "apply")?;
        }
        write_tag_end(writer, "math")
    }
}

impl ToXml<XmlWriter> for Component {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        let mut attrs = vec![("name", self.name.as_str())];
        if let Some(ref id) = self.cmeta_id {
            attrs.push(("cmeta:id", id.as_str()));
        }
        write_tag_start_with_attrs(writer, "component", &attrs)?;
        for units in &self.units {
            units.write_xml(writer)?;
        }
        for variable in &self.variables {
            variable.write_xml(writer)?;
        }
        for math in &self.math {
            math.write_xml(writer)?;
        }
        for extension in &self.extensions {
            write_raw(writer, extension)?;
        }
        write_tag_end(writer, "component")
    }
}

impl ToXml<XmlWriter> for Connection {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        write_tag_start(writer, "connection")?;
        write_empty_tag_with_attrs(
            writer,
            "map_components",
            &[
                ("component_1", self.first_component.as_str()),
                ("component_2", self.second_component.as_str()),
            ],
        )?;
        for (first, second) in &self.variables {
            write_empty_tag_with_attrs(
                writer,
                "map_variables",
                &[("variable_1", first.as_str()), ("variable_2", second.as_str())],
            )?;
        }
        write_tag_end(writer, "connection")
    }
}

impl ToXml<XmlWriter> for Import {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        write_tag_start_with_attrs(writer, "import", &[("xlink:href", self.href.as_str())])?;
        for component in &self.components {
            write_empty_tag_with_attrs(
                writer,
                "component",
                &[
                    ("name", component.name.as_str()),
                    ("component_ref", component.component_ref.as_str()),
                ],
            )?;
        }
        for units in &self.units {
            write_empty_tag_with_attrs(
                writer,
                "units",
                &[
                    ("name", units.name.as_str()),
                    ("units_ref", units.units_ref.as_str()),
                ],
            )?;
        }
        write_tag_end(writer, "import")
    }
}

impl ToXml<XmlWriter> for ComponentRef {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        let attrs = [("component", self.component.as_str())];
        if self.children.is_empty() {
            return write_empty_tag_with_attrs(writer, "component_ref", &attrs);
        }
        write_tag_start_with_attrs(writer, "component_ref", &attrs)?;
        for child in &self.children {
            child.write_xml(writer)?;
        }
        write_tag_end(writer, "component_ref")
    }
}

impl ToXml<XmlWriter> for Group {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        write_tag_start(writer, "group")?;
        write_empty_tag_with_attrs(
            writer,
            "relationship_ref",
            &[("relationship", self.relationship.as_str())],
        )?;
        for r in &self.refs {
            r.write_xml(writer)?;
        }
        write_tag_end(writer, "group")
    }
}

impl ToXml<XmlWriter> for Model {
    fn write_xml(&self, writer: &mut Writer<XmlWriter>) -> Result<()> {
        let mut attrs = vec![
            ("xmlns", CELLML_NS),
            ("xmlns:cellml", CELLML_NS),
            ("xmlns:cmeta", CMETA_NS),
            ("xmlns:xlink", XLINK_NS),
            ("name", self.name.as_str()),
        ];
        if let Some(ref id) = self.cmeta_id {
            attrs.push(("cmeta:id", id.as_str()));
        }
        write_tag_start_with_attrs(writer, "model", &attrs)?;
        for import in &self.imports {
            import.write_xml(writer)?;
        }
        for units in &self.units {
            units.write_xml(writer)?;
        }
        for component in &self.components {
            component.write_xml(writer)?;
        }
        for group in &self.groups {
            group.write_xml(writer)?;
        }
        for connection in &self.connections {
            connection.write_xml(writer)?;
        }
        write_tag_end(writer, "model")
    }
}

pub fn model_to_cellml(model: &Model) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_error)?;
    model.write_xml(&mut writer)?;

    match String::from_utf8(writer.into_inner().into_inner()) {
        Ok(out) => Ok(out),
        Err(err) => import_err!(XmlDeserialization, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;
    use std::io::BufReader;

    const HH_FRAGMENT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<model xmlns="http://www.cellml.org/cellml/1.0#"
       xmlns:cellml="http://www.cellml.org/cellml/1.0#"
       xmlns:cmeta="http://www.cellml.org/metadata/1.0#"
       xmlns:xlink="http://www.w3.org/1999/xlink"
       name="leak_current" cmeta:id="leak">
  <import xlink:href="constants.xml">
    <component name="params" component_ref="parameters"/>
  </import>
  <units name="millivolt">
    <unit prefix="milli" units="volt"/>
  </units>
  <component name="membrane" cmeta:id="mem">
    <variable name="V" units="millivolt" public_interface="out" initial_value="-75"/>
    <variable name="g" units="dimensionless" initial_value="E"/>
    <variable name="E" units="dimensionless"/>
    <math xmlns="http://www.w3.org/1998/Math/MathML">
      <apply><eq/>
        <ci>E</ci>
        <cn cellml:units="dimensionless">6.3</cn>
      </apply>
      <apply><eq/>
        <apply><diff/>
          <bvar><ci>time</ci></bvar>
          <ci>V</ci>
        </apply>
        <apply><times/>
          <ci>g</ci>
          <ci>V</ci>
        </apply>
      </apply>
    </math>
    <annotation xmlns="http://example.org/notes">kept verbatim</annotation>
  </component>
  <group>
    <relationship_ref relationship="encapsulation"/>
    <component_ref component="membrane">
      <component_ref component="params"/>
    </component_ref>
  </group>
  <connection>
    <map_components component_1="membrane" component_2="params"/>
    <map_variables variable_1="g" variable_2="g_out"/>
  </connection>
</model>"#;

    fn parse(doc: &str) -> Model {
        let mut reader = BufReader::new(doc.as_bytes());
        model_from_reader(&mut reader).unwrap()
    }

    #[test]
    fn test_parse_model_structure() {
        let m = parse(HH_FRAGMENT);
        assert_eq!("leak_current", m.name);
        assert_eq!(Some("leak".to_owned()), m.cmeta_id);
        assert_eq!(1, m.imports.len());
        assert_eq!("constants.xml", m.imports[0].href);
        assert_eq!("params", m.imports[0].components[0].name);

        let units = m.get_units("millivolt").unwrap();
        assert_eq!(-3, units.units[0].prefix);
        assert_eq!("volt", units.units[0].units);

        let comp = m.get_component("membrane").unwrap();
        assert_eq!(3, comp.variables.len());
        let v = comp.get_variable("V").unwrap();
        assert_eq!(Interface::Out, v.public_interface);
        assert_eq!(Some(-75.0), v.initial_literal());
        let g = comp.get_variable("g").unwrap();
        assert_eq!(Some("E".to_owned()), g.initial_value);
        assert_eq!(None, g.initial_literal());

        assert_eq!(1, m.groups.len());
        assert_eq!("encapsulation", m.groups[0].relationship);
        assert_eq!("membrane", m.groups[0].refs[0].component);

        assert_eq!(1, m.connections.len());
        assert_eq!(
            vec![("g".to_owned(), "g_out".to_owned())],
            m.connections[0].variables
        );
    }

    #[test]
    fn test_parse_math() {
        let m = parse(HH_FRAGMENT);
        let comp = m.get_component("membrane").unwrap();
        assert_eq!(1, comp.math.len());
        let eqs = &comp.math[0].equations;
        assert_eq!(2, eqs.len());

        assert_eq!(Some("E"), eqs[0].lhs.as_var());
        assert_eq!(Some((6.3, Some("dimensionless"))), eqs[0].rhs.as_const());

        let Expr::Diff { ref bound, ref operand } = eqs[1].lhs else {
            panic!("expected a derivative, got {:?}", eqs[1].lhs);
        };
        assert_eq!("time", bound);
        assert_eq!(Some("V"), operand.as_var());
        assert!(eqs[1].rhs.is_compound());
    }

    #[test]
    fn test_extension_content_survives() {
        let m = parse(HH_FRAGMENT);
        let comp = m.get_component("membrane").unwrap();
        assert_eq!(1, comp.extensions.len());
        assert!(comp.extensions[0].contains("kept verbatim"));
        assert!(comp.extensions[0].contains("http://example.org/notes"));
    }

    #[test]
    fn test_roundtrip_preserves_model() {
        let m = parse(HH_FRAGMENT);
        let doc = model_to_cellml(&m).unwrap();
        let m2 = parse(&doc);
        assert_eq!(m, m2);
    }

    #[test]
    fn test_missing_model_name_rejected() {
        let doc = r#"<model xmlns="http://www.cellml.org/cellml/1.0#"/>"#;
        let mut reader = BufReader::new(doc.as_bytes());
        let err = model_from_reader(&mut reader).unwrap_err();
        assert_eq!(engine::ErrorCode::BadModelName, err.code);
    }

    #[test]
    fn test_bad_xml_rejected() {
        let doc = "<model name=\"m\"><component name=\"c\">";
        let mut reader = BufReader::new(doc.as_bytes());
        let err = model_from_reader(&mut reader).unwrap_err();
        assert_eq!(engine::ErrorCode::XmlDeserialization, err.code);
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        let doc = r#"<model name="m" xmlns="http://www.cellml.org/cellml/1.0#">
          <units name="u"><unit prefix="mibi" units="second"/></units>
        </model>"#;
        let mut reader = BufReader::new(doc.as_bytes());
        let err = model_from_reader(&mut reader).unwrap_err();
        assert_eq!(engine::ErrorCode::XmlDeserialization, err.code);
    }
}
