// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Import instantiation.  Loading documents by href is delegated to a
//! [ModelLoader] so the engine never touches the filesystem itself.

use std::collections::HashMap;

use crate::common::Result;
use crate::datamodel::Model;
use crate::{import_err, model_err};

/// Resolves an import href to a parsed model.
pub trait ModelLoader {
    fn load(&self, href: &str) -> Result<Model>;
}

/// Recursively load and attach every import in `model`'s closure.  An href
/// appearing in its own ancestry is an import cycle; two distinct hrefs
/// producing the same model name is a duplicate-name error, since the
/// flattener identifies models by name.
pub fn instantiate_imports(model: &mut Model, loader: &dyn ModelLoader) -> Result<()> {
    let mut names: HashMap<String, String> = HashMap::new();
    names.insert(model.name.clone(), String::new());
    let mut stack: Vec<String> = Vec::new();
    instantiate(model, loader, &mut stack, &mut names)
}

fn instantiate(
    model: &mut Model,
    loader: &dyn ModelLoader,
    stack: &mut Vec<String>,
    names: &mut HashMap<String, String>,
) -> Result<()> {
    for imp in &mut model.imports {
        if stack.iter().any(|h| h == &imp.href) {
            return import_err!(
                ImportCycle,
                format!("'{}' imports itself transitively", imp.href)
            );
        }
        if imp.model.is_none() {
            let loaded = loader.load(&imp.href)?;
            match names.get(&loaded.name) {
                Some(prev) if prev != &imp.href => {
                    return model_err!(
                        DuplicateModelName,
                        format!(
                            "model '{}' loaded from both '{}' and '{}'",
                            loaded.name, prev, imp.href
                        )
                    );
                }
                _ => {
                    names.insert(loaded.name.clone(), imp.href.clone());
                }
            }
            imp.model = Some(Box::new(loaded));
        }
        stack.push(imp.href.clone());
        if let Some(sub) = imp.model.as_deref_mut() {
            instantiate(sub, loader, stack, names)?;
        }
        stack.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorCode;
    use crate::testutils::*;

    struct MapLoader(HashMap<String, Model>);

    impl ModelLoader for MapLoader {
        fn load(&self, href: &str) -> Result<Model> {
            match self.0.get(href) {
                Some(m) => Ok(m.clone()),
                None => crate::import_err!(DoesNotExist, href.to_owned()),
            }
        }
    }

    #[test]
    fn test_nested_imports_instantiated() {
        let mut inner = model("inner");
        inner.components.push(component("core"));
        let mut middle = model("middle");
        middle
            .imports
            .push(import("inner.xml", &[("c", "core")], None));

        let loader = MapLoader(HashMap::from([
            ("middle.xml".to_owned(), middle),
            ("inner.xml".to_owned(), inner),
        ]));

        let mut root = model("root");
        root.imports
            .push(import("middle.xml", &[("c", "c")], None));
        instantiate_imports(&mut root, &loader).unwrap();

        let names: Vec<&str> = root
            .reachable_models()
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(vec!["root", "middle", "inner"], names);
    }

    #[test]
    fn test_import_cycle_detected() {
        let mut a = model("a");
        a.imports.push(import("b.xml", &[], None));
        let mut b = model("b");
        b.imports.push(import("a.xml", &[], None));

        let loader = MapLoader(HashMap::from([
            ("a.xml".to_owned(), a),
            ("b.xml".to_owned(), b),
        ]));

        let mut root = model("root");
        root.imports.push(import("b.xml", &[], None));
        let err = instantiate_imports(&mut root, &loader).unwrap_err();
        assert_eq!(ErrorCode::ImportCycle, err.code);
    }

    #[test]
    fn test_duplicate_model_name_rejected() {
        let dup1 = model("dup");
        let dup2 = model("dup");
        let loader = MapLoader(HashMap::from([
            ("one.xml".to_owned(), dup1),
            ("two.xml".to_owned(), dup2),
        ]));

        let mut root = model("root");
        root.imports.push(import("one.xml", &[], None));
        root.imports.push(import("two.xml", &[], None));

        let err = instantiate_imports(&mut root, &loader).unwrap_err();
        assert_eq!(ErrorCode::DuplicateModelName, err.code);
    }

    #[test]
    fn test_shared_href_loads_cleanly() {
        let mut shared = model("shared");
        shared.components.push(component("s"));
        let loader = MapLoader(HashMap::from([("shared.xml".to_owned(), shared)]));

        let mut root = model("root");
        root.imports.push(import("shared.xml", &[("x", "s")], None));
        root.imports.push(import("shared.xml", &[("y", "s")], None));
        instantiate_imports(&mut root, &loader).unwrap();
        assert!(root.imports.iter().all(|i| i.model.is_some()));
    }
}
