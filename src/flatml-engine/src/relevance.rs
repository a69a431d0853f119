// Copyright 2026 The Flatml Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Relevance analysis: which components across the import closure actually
//! participate in the root model.

use std::collections::{BTreeSet, HashMap};

use crate::common::{Error, ErrorCode, ErrorKind, Result};
use crate::datamodel::{ComponentKey, ComponentRef, Model, ENCAPSULATION};

/// Decides which components a flattening pass should carry over.  The pass
/// takes this as a service, so alternative policies (keep everything, keep
/// an explicit allow-list) slot in without touching the pass itself.
pub trait Relevance {
    fn relevant_components(&self, root: &Model) -> Result<Vec<ComponentKey>>;
}

/// The default policy: a component is relevant when it is reachable from the
/// root model's own components (and import aliases) by following connections
/// and encapsulation containment.
#[derive(Default)]
pub struct ConnectedRelevance;

impl ConnectedRelevance {
    fn adjacency(&self, root: &Model) -> Result<HashMap<ComponentKey, Vec<ComponentKey>>> {
        let mut adj: HashMap<ComponentKey, Vec<ComponentKey>> = HashMap::new();
        let mut add = |a: ComponentKey, b: ComponentKey| {
            adj.entry(a.clone()).or_default().push(b.clone());
            adj.entry(b).or_default().push(a);
        };

        for model in root.reachable_models() {
            for conn in &model.connections {
                let first = root
                    .resolve_component(&model.name, &conn.first_component)
                    .map_err(|err| relevance_err(&model.name, &conn.first_component, &err))?;
                let second = root
                    .resolve_component(&model.name, &conn.second_component)
                    .map_err(|err| relevance_err(&model.name, &conn.second_component, &err))?;
                add(first, second);
            }
            for group in &model.groups {
                if group.relationship != ENCAPSULATION {
                    continue;
                }
                for r in &group.refs {
                    collect_containment(root, model, r, &mut add);
                }
            }
        }
        Ok(adj)
    }
}

fn relevance_err(model: &str, component: &str, cause: &Error) -> Error {
    Error::new(
        ErrorKind::Model,
        ErrorCode::RelevanceError,
        Some(format!("{model}/{component}: {cause}")),
    )
}

/// Encapsulation edges run parent to child (and back).  Refs that fail to
/// resolve are skipped here; the flattener reports them when copying groups.
fn collect_containment(
    root: &Model,
    model: &Model,
    parent: &ComponentRef,
    add: &mut impl FnMut(ComponentKey, ComponentKey),
) {
    let pkey = root.resolve_component(&model.name, &parent.component).ok();
    for child in &parent.children {
        if let (Some(p), Ok(c)) = (
            pkey.clone(),
            root.resolve_component(&model.name, &child.component),
        ) {
            add(p, c);
        }
        collect_containment(root, model, child, add);
    }
}

impl Relevance for ConnectedRelevance {
    fn relevant_components(&self, root: &Model) -> Result<Vec<ComponentKey>> {
        let adj = self.adjacency(root)?;

        // seeds: everything the root model names directly
        let mut queue: Vec<ComponentKey> = Vec::new();
        for c in &root.components {
            queue.push(ComponentKey::new(&root.name, &c.name));
        }
        for imp in &root.imports {
            for ic in &imp.components {
                let key = root
                    .resolve_component(&root.name, &ic.name)
                    .map_err(|err| relevance_err(&root.name, &ic.name, &err))?;
                queue.push(key);
            }
        }

        let mut seen: BTreeSet<ComponentKey> = BTreeSet::new();
        let mut out: Vec<ComponentKey> = Vec::new();
        let mut i = 0;
        while i < queue.len() {
            let key = queue[i].clone();
            i += 1;
            if !seen.insert(key.clone()) {
                continue;
            }
            out.push(key.clone());
            if let Some(neighbors) = adj.get(&key) {
                for n in neighbors {
                    if !seen.contains(n) {
                        queue.push(n.clone());
                    }
                }
            }
        }
        Ok(out)
    }
}
