//! Compiles the active edges of a [`ConnectionGraph`] into a spanning tree.
//!
//! The tree is built by breadth-first search from a root module, visiting each
//! node's neighbours in ascending module id. The first edge that reaches a
//! module becomes its attachment; every later edge into an already-reached
//! module closes a cycle and is dropped. Because the visiting order is fixed,
//! the same edges are dropped on every run.

use crate::connection::{ConnectionEdge, ModuleId, SiteRef, YawSnap};
use crate::graph::ConnectionGraph;
use crate::transform::RigidTransform;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::trace;

/// How a child module hangs off its parent in the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KinematicAttachment {
    pub parent: ModuleId,
    pub child: ModuleId,
    pub parent_site: SiteRef,
    pub child_site: SiteRef,

    /// Maps the child's frame into the parent's frame.
    pub transform: RigidTransform,

    pub yaw_snap: YawSnap,
}

/// A deterministic spanning tree over the modules reachable from `root`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KinematicTree {
    pub root: ModuleId,

    /// Child → parent. The root maps to `None`.
    pub parent_of: BTreeMap<ModuleId, Option<ModuleId>>,

    /// Keyed by child id.
    pub attachments: BTreeMap<ModuleId, KinematicAttachment>,

    /// Breadth-first visiting order, starting with the root.
    pub order: Vec<ModuleId>,
}

impl KinematicTree {
    pub fn contains(&self, module: ModuleId) -> bool {
        self.parent_of.contains_key(&module)
    }

    pub fn reachable(&self) -> BTreeSet<ModuleId> {
        self.order.iter().copied().collect()
    }

    /// Number of attachments between `module` and the root.
    pub fn depth_of(&self, module: ModuleId) -> Option<usize> {
        let mut depth = 0;
        let mut current = *self.parent_of.get(&module)?;
        while let Some(parent) = current {
            depth += 1;
            current = self.parent_of.get(&parent).copied().flatten();
        }
        Some(depth)
    }
}

/// Builds the kinematic tree rooted at `root` from the graph's active edges.
///
/// Modules not reachable from `root` are absent from the result.
pub fn compile(root: ModuleId, graph: &ConnectionGraph) -> KinematicTree {
    // Module → neighbour → first edge (in key order) joining the pair.
    let mut adjacency: BTreeMap<ModuleId, BTreeMap<ModuleId, &ConnectionEdge>> = BTreeMap::new();
    for edge in graph.active_edges() {
        let m1 = edge.key.a().module_id;
        let m2 = edge.key.b().module_id;
        if m1 == m2 {
            continue;
        }
        adjacency.entry(m1).or_default().entry(m2).or_insert(edge);
        adjacency.entry(m2).or_default().entry(m1).or_insert(edge);
    }

    let mut parent_of = BTreeMap::from([(root, None)]);
    let mut attachments = BTreeMap::new();
    let mut order = vec![root];
    let mut queue = VecDeque::from([root]);

    while let Some(u) = queue.pop_front() {
        let Some(neighbours) = adjacency.get(&u) else {
            continue;
        };

        for (&v, edge) in neighbours {
            if parent_of.contains_key(&v) {
                if parent_of.get(&u).copied().flatten() != Some(v) {
                    trace!(from = u, to = v, edge = %edge.key, "dropping cycle edge");
                }
                continue;
            }

            let (parent_site, child_site, transform) = if edge.key.a().module_id == u {
                (edge.key.a().clone(), edge.key.b().clone(), edge.transform)
            } else {
                (
                    edge.key.b().clone(),
                    edge.key.a().clone(),
                    edge.transform.inverse(),
                )
            };

            parent_of.insert(v, Some(u));
            order.push(v);
            attachments.insert(
                v,
                KinematicAttachment {
                    parent: u,
                    child: v,
                    parent_site,
                    child_site,
                    transform,
                    yaw_snap: edge.yaw_snap,
                },
            );
            queue.push_back(v);
        }
    }

    KinematicTree {
        root,
        parent_of,
        attachments,
        order,
    }
}
