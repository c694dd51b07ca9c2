//! Flattening of ecosystem-native dependency trees into a canonical [`Graph`].
//!
//! Tool output describes the resolved dependencies as a nested tree in which
//! the same package can appear under many parents (diamonds) or under itself
//! (cycles broken by the tool printing a repeat). Each distinct [`PackageId`]
//! is expanded once, the first time it is met in depth-first pre-order, and
//! keeps the imports from that first occurrence.

use thiserror::Error;

use crate::models::{Deps, EcosystemType, Graph, Import, Package, PackageId};

const ROOT: &str = "<root>";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("dependency #{index} of `{parent}` has no package name")]
    MissingName { parent: String, index: usize },
}

/// One node of a tool's resolved dependency tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepTree {
    pub name: String,
    /// Resolved (installed) version.
    pub version: String,
    /// Version constraint as declared by the parent.
    pub requirement: String,
    pub children: Vec<DepTree>,
}

impl DepTree {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirement = requirement.into();
        self
    }

    pub fn with_children(mut self, children: Vec<DepTree>) -> Self {
        self.children = children;
        self
    }

    /// Remove every subtree whose root matches `is_excluded`.
    pub fn prune(&mut self, is_excluded: &dyn Fn(&str) -> bool) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            node.children.retain(|child| !is_excluded(&child.name));
            stack.extend(node.children.iter_mut());
        }
    }
}

/// Remove excluded roots and their subtrees, and excluded subtrees further down.
pub fn prune_roots(roots: &mut Vec<DepTree>, is_excluded: &dyn Fn(&str) -> bool) {
    roots.retain(|root| !is_excluded(&root.name));
    for root in roots.iter_mut() {
        root.prune(is_excluded);
    }
}

/// Convert `roots` into the direct-import list and the deduplicated graph.
pub fn normalize(ecosystem: EcosystemType, roots: &[DepTree]) -> Result<Deps, NormalizeError> {
    let id_of = |node: &DepTree| PackageId::new(ecosystem, node.name.as_str(), node.version.as_str());

    let mut direct = Vec::with_capacity(roots.len());
    for (index, root) in roots.iter().enumerate() {
        if root.name.is_empty() {
            return Err(NormalizeError::MissingName {
                parent: ROOT.to_string(),
                index,
            });
        }
        direct.push(Import::new(root.requirement.as_str(), id_of(root)));
    }

    let mut graph = Graph::new();
    // Reversed so that popping walks the roots, and every child list, in order.
    let mut stack: Vec<&DepTree> = roots.iter().rev().collect();

    while let Some(node) = stack.pop() {
        let id = id_of(node);
        if graph.contains(&id) {
            continue;
        }

        let mut imports = Vec::with_capacity(node.children.len());
        for (index, child) in node.children.iter().enumerate() {
            if child.name.is_empty() {
                return Err(NormalizeError::MissingName {
                    parent: id.to_string(),
                    index,
                });
            }
            imports.push(Import::new("", id_of(child)));
        }
        graph.insert(Package { id, imports });

        stack.extend(
            node.children
                .iter()
                .rev()
                .filter(|child| !graph.contains(&id_of(*child))),
        );
    }

    Ok(Deps {
        direct,
        transitive: graph,
    })
}
