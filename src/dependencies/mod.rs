//! Dependency-safe ordering of type definitions.
//!
//! A type depends on its base type, the interfaces it implements and the type it
//! is nested in. [`order`] emits every type of a set after those of its
//! dependencies that are in the same set; dependencies outside the set are ignored.
//!
//! The ordering is computed in waves: every node without unprocessed parents is
//! emitted in input order, then removed. Nodes that never become free form a cycle,
//! which only damaged or adversarial metadata produces. A loop of exactly two types
//! naming each other is broken by emitting the earlier one first; any other cycle
//! fails with [`crate::Error::GraphError`] listing what was left.
//!
//! # Examples
//!
//! ```rust
//! use cilweave::{dependencies, model::{ModuleGraph, TypeHandle}};
//!
//! let mut graph = ModuleGraph::new("Demo.dll");
//! let derived = graph.add_type("Demo", "Derived", 0, None);
//! let base = graph.add_type("Demo", "Base", 0, None);
//! graph[derived].extends = Some(TypeHandle::Def(base));
//!
//! let ordered = dependencies::order(&graph, &[derived, base])?;
//! assert_eq!(ordered, vec![base, derived]);
//! # Ok::<(), cilweave::Error>(())
//! ```

use std::{collections::HashMap, fmt::Write};

use log::debug;

use crate::{
    model::{ModuleGraph, TypeId},
    Error, Result,
};

/// One type of the set and its edges, by position in the node list.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// The type
    pub id: TypeId,
    /// Positions of the types this one depends on
    pub parents: Vec<usize>,
    /// Positions of the types that depend on this one
    pub children: Vec<usize>,
}

/// Transient dependency index over a set of types.
///
/// Built once per ordering pass and consumed by [`DependencyGraph::into_order`].
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
}

impl DependencyGraph {
    /// Index `types` and the edges between them. Duplicates in `types` are ignored.
    #[must_use]
    pub fn build(graph: &ModuleGraph, types: &[TypeId]) -> DependencyGraph {
        let mut position: HashMap<TypeId, usize> = HashMap::with_capacity(types.len());
        let mut nodes = Vec::with_capacity(types.len());
        for &id in types {
            if !position.contains_key(&id) {
                position.insert(id, nodes.len());
                nodes.push(DependencyNode {
                    id,
                    parents: Vec::new(),
                    children: Vec::new(),
                });
            }
        }

        for index in 0..nodes.len() {
            let type_def = &graph[nodes[index].id];
            let candidates = type_def
                .extends
                .iter()
                .filter_map(|handle| handle.definition())
                .chain(
                    type_def
                        .interfaces
                        .iter()
                        .filter_map(|implementation| implementation.interface.definition()),
                )
                .chain(type_def.declaring_type);

            for parent in candidates {
                let Some(&parent) = position.get(&parent) else {
                    continue;
                };
                if parent == index || nodes[index].parents.contains(&parent) {
                    continue;
                }
                nodes[index].parents.push(parent);
                nodes[parent].children.push(index);
            }
        }

        DependencyGraph { nodes }
    }

    /// Number of types in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The nodes in input order.
    #[must_use]
    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    /// Consume the index and produce the ordered sequence.
    ///
    /// # Errors
    /// Returns [`Error::GraphError`] for a cycle that is not a two-type loop. The
    /// message names every remaining type and its unprocessed parents.
    pub fn into_order(self, graph: &ModuleGraph) -> Result<Vec<TypeId>> {
        let count = self.nodes.len();
        let mut pending: Vec<usize> = self.nodes.iter().map(|node| node.parents.len()).collect();
        let mut emitted = vec![false; count];
        let mut order = Vec::with_capacity(count);

        // Nodes freed by one wave form the next, each wave in input order.
        let mut wave: Vec<usize> = (0..count).filter(|&index| pending[index] == 0).collect();

        while order.len() < count {
            if wave.is_empty() {
                match self.two_node_loop(&emitted) {
                    Some((forced, other)) => {
                        debug!(
                            "Dependencies: breaking the loop between {} and {}",
                            graph.full_name(self.nodes[forced].id),
                            graph.full_name(self.nodes[other].id)
                        );
                        wave.push(forced);
                    }
                    None => return Err(self.cycle_error(graph, &emitted)),
                }
            }

            wave.sort_unstable();
            let mut next = Vec::new();
            for index in wave {
                if emitted[index] {
                    continue;
                }
                emitted[index] = true;
                order.push(self.nodes[index].id);
                for &child in &self.nodes[index].children {
                    if pending[child] == 1 && !emitted[child] {
                        next.push(child);
                    }
                    pending[child] = pending[child].saturating_sub(1);
                }
            }
            wave = next;
        }

        Ok(order)
    }

    /// The first remaining node that has a remaining parent naming it back.
    fn two_node_loop(&self, emitted: &[bool]) -> Option<(usize, usize)> {
        (0..self.nodes.len())
            .filter(|&index| !emitted[index])
            .find_map(|index| {
                self.nodes[index]
                    .parents
                    .iter()
                    .copied()
                    .find(|&parent| !emitted[parent] && self.nodes[parent].parents.contains(&index))
                    .map(|parent| (index, parent))
            })
    }

    fn cycle_error(&self, graph: &ModuleGraph, emitted: &[bool]) -> Error {
        let remaining: Vec<usize> = (0..self.nodes.len()).filter(|&index| !emitted[index]).collect();
        let mut message = format!(
            "dependency cycle among {} types that is not a two-type loop:",
            remaining.len()
        );
        for index in remaining {
            let parents: Vec<String> = self.nodes[index]
                .parents
                .iter()
                .filter(|&&parent| !emitted[parent])
                .map(|&parent| graph.full_name(self.nodes[parent].id))
                .collect();
            let _ = write!(
                message,
                " {} <- [{}];",
                graph.full_name(self.nodes[index].id),
                parents.join(", ")
            );
        }
        Error::GraphError(message)
    }
}

/// Order `types` so every type follows its base type, interfaces and enclosing
/// type, where those are in `types` too. Unrelated types keep their input order.
///
/// # Errors
/// Returns [`Error::GraphError`] for a cycle that cannot be broken.
pub fn order(graph: &ModuleGraph, types: &[TypeId]) -> Result<Vec<TypeId>> {
    DependencyGraph::build(graph, types).into_order(graph)
}
