//! The authoritative record of which sites are joined.

use crate::connection::{ConnectionEdge, ConnectionEvent, EdgeKey, ModuleId, SiteRef};
use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Whether a module currently takes part in any active connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Attached,
    Detached,
}

/// Mapping from [`EdgeKey`] to [`ConnectionEdge`], including inactive history.
///
/// Invariant: a site is an endpoint of at most one active edge.
/// Edges are kept in key order, so every iteration is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ConnectionEdge>", into = "Vec<ConnectionEdge>")]
pub struct ConnectionGraph {
    edges: BTreeMap<EdgeKey, ConnectionEdge>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an attach or detach.
    ///
    /// Attach fails with [`GraphError::AlreadyConnected`] if either endpoint is
    /// occupied; nothing is written in that case. Detach flips a matching active
    /// edge to inactive and is silent when no such edge exists.
    pub fn apply(&mut self, event: &ConnectionEvent) -> Result<(), GraphError> {
        match event {
            ConnectionEvent::Attach {
                a,
                b,
                yaw_snap,
                transform,
            } => {
                if a == b {
                    return Err(GraphError::SelfConnection(a.clone()));
                }
                if !self.site_is_free(a) {
                    return Err(GraphError::AlreadyConnected(a.clone()));
                }
                if !self.site_is_free(b) {
                    return Err(GraphError::AlreadyConnected(b.clone()));
                }

                let edge = ConnectionEdge::new(a.clone(), b.clone(), *yaw_snap, *transform);
                debug!(edge = %edge.key, yaw = %yaw_snap, "attach");
                self.edges.insert(edge.key.clone(), edge);
            }
            ConnectionEvent::Detach { .. } => {
                let key = event.key();
                if let Some(edge) = self.edges.get_mut(&key)
                    && edge.active
                {
                    edge.active = false;
                    debug!(edge = %key, "detach");
                }
            }
        }
        Ok(())
    }

    /// Whether `a` and `b` are joined by an active edge.
    pub fn is_connected(&self, a: &SiteRef, b: &SiteRef) -> bool {
        self.edges
            .get(&EdgeKey::new(a.clone(), b.clone()))
            .is_some_and(|edge| edge.active)
    }

    pub fn active_edges(&self) -> impl Iterator<Item = &ConnectionEdge> {
        self.edges.values().filter(|edge| edge.active)
    }

    pub fn active_count(&self) -> usize {
        self.active_edges().count()
    }

    /// Every recorded edge, active or not.
    pub fn edges(&self) -> impl Iterator<Item = &ConnectionEdge> {
        self.edges.values()
    }

    pub fn edge(&self, key: &EdgeKey) -> Option<&ConnectionEdge> {
        self.edges.get(key)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn site_is_free(&self, site: &SiteRef) -> bool {
        !self.active_edges().any(|edge| edge.key.contains(site))
    }

    /// Attached/Detached state for each of `module_ids`.
    pub fn module_states(&self, module_ids: &[ModuleId]) -> BTreeMap<ModuleId, ModuleState> {
        let mut connected = std::collections::BTreeSet::new();
        for edge in self.active_edges() {
            connected.insert(edge.key.a().module_id);
            connected.insert(edge.key.b().module_id);
        }

        module_ids
            .iter()
            .map(|&id| {
                let state = if connected.contains(&id) {
                    ModuleState::Attached
                } else {
                    ModuleState::Detached
                };
                (id, state)
            })
            .collect()
    }

    /// Puts a previously observed record back verbatim, or forgets `key`
    /// entirely when there was none. Used to undo a rolled-back attach.
    pub(crate) fn restore(&mut self, key: &EdgeKey, prior: Option<ConnectionEdge>) {
        match prior {
            Some(edge) => {
                self.edges.insert(key.clone(), edge);
            }
            None => {
                self.edges.remove(key);
            }
        }
    }
}

impl TryFrom<Vec<ConnectionEdge>> for ConnectionGraph {
    type Error = GraphError;

    /// Rebuilds a graph from its records, rejecting any that `apply` could
    /// never have produced.
    fn try_from(edges: Vec<ConnectionEdge>) -> Result<Self, Self::Error> {
        let mut graph = Self::new();
        for edge in edges {
            if edge.key.a() == edge.key.b() {
                return Err(GraphError::SelfConnection(edge.key.a().clone()));
            }
            if edge.active {
                for site in [edge.key.a(), edge.key.b()] {
                    if !graph.site_is_free(site) {
                        return Err(GraphError::AlreadyConnected(site.clone()));
                    }
                }
            }
            graph.edges.insert(edge.key.clone(), edge);
        }
        Ok(graph)
    }
}

impl From<ConnectionGraph> for Vec<ConnectionEdge> {
    fn from(graph: ConnectionGraph) -> Self {
        graph.edges.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Half, YawSnap};
    use crate::transform::RigidTransform;

    fn site(m: ModuleId, half: Half, name: &str) -> SiteRef {
        SiteRef::new(m, half, name)
    }

    fn attach(a: SiteRef, b: SiteRef) -> ConnectionEvent {
        ConnectionEvent::attach(a, b, YawSnap::Deg0, RigidTransform::IDENTITY)
    }

    #[test]
    fn attach_then_query() {
        let mut g = ConnectionGraph::new();
        let a = site(1, Half::A, "right");
        let b = site(2, Half::B, "left");
        g.apply(&attach(a.clone(), b.clone())).unwrap();

        assert!(g.is_connected(&a, &b));
        assert!(g.is_connected(&b, &a));
        assert!(!g.site_is_free(&a));
        assert!(g.site_is_free(&site(1, Half::A, "bottom")));
        assert_eq!(g.active_count(), 1);
    }

    #[test]
    fn occupied_site_rejects_without_writing() {
        let mut g = ConnectionGraph::new();
        let a = site(1, Half::A, "right");
        g.apply(&attach(a.clone(), site(2, Half::B, "left"))).unwrap();

        let before = g.clone();
        let err = g.apply(&attach(site(3, Half::B, "left"), a.clone())).unwrap_err();
        assert_eq!(err, GraphError::AlreadyConnected(a));
        assert_eq!(g, before);
    }

    #[test]
    fn self_connection_rejected() {
        let mut g = ConnectionGraph::new();
        let a = site(1, Half::A, "right");
        assert_eq!(
            g.apply(&attach(a.clone(), a.clone())),
            Err(GraphError::SelfConnection(a))
        );
    }

    #[test]
    fn detach_keeps_history_and_is_idempotent() {
        let mut g = ConnectionGraph::new();
        let a = site(1, Half::A, "right");
        let b = site(2, Half::B, "left");
        g.apply(&attach(a.clone(), b.clone())).unwrap();

        let detach = ConnectionEvent::detach(b.clone(), a.clone());
        g.apply(&detach).unwrap();
        g.apply(&detach).unwrap();

        assert_eq!(g.active_count(), 0);
        assert_eq!(g.len(), 1);
        assert!(g.site_is_free(&a));

        // Missing edge: still silent.
        g.apply(&ConnectionEvent::detach(site(7, Half::A, "x"), site(8, Half::B, "y")))
            .unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn reattach_replaces_inactive_record() {
        let mut g = ConnectionGraph::new();
        let a = site(1, Half::A, "right");
        let b = site(2, Half::B, "left");
        g.apply(&attach(a.clone(), b.clone())).unwrap();
        g.apply(&ConnectionEvent::detach(a.clone(), b.clone())).unwrap();
        g.apply(&ConnectionEvent::attach(
            a.clone(),
            b.clone(),
            YawSnap::Deg90,
            RigidTransform::IDENTITY,
        ))
        .unwrap();

        let edge = g.edge(&EdgeKey::new(a, b)).unwrap();
        assert!(edge.active);
        assert_eq!(edge.yaw_snap, YawSnap::Deg90);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn module_states_follow_active_edges() {
        let mut g = ConnectionGraph::new();
        g.apply(&attach(site(1, Half::A, "right"), site(2, Half::B, "left")))
            .unwrap();
        let states = g.module_states(&[1, 2, 3]);
        assert_eq!(states[&1], ModuleState::Attached);
        assert_eq!(states[&2], ModuleState::Attached);
        assert_eq!(states[&3], ModuleState::Detached);
    }

    #[test]
    fn graph_serde_round_trip() {
        let mut g = ConnectionGraph::new();
        g.apply(&attach(site(1, Half::A, "right"), site(2, Half::B, "left")))
            .unwrap();
        g.apply(&ConnectionEvent::detach(
            site(1, Half::A, "right"),
            site(2, Half::B, "left"),
        ))
        .unwrap();
        g.apply(&attach(site(2, Half::A, "right"), site(3, Half::B, "left")))
            .unwrap();

        let json = serde_json::to_string(&g).unwrap();
        let back: ConnectionGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
    }

    #[test]
    fn loading_conflicting_records_is_an_error() {
        let a = site(1, Half::A, "right");
        let edge = |a: &SiteRef, b: &SiteRef| {
            ConnectionEdge::new(a.clone(), b.clone(), YawSnap::Deg0, RigidTransform::IDENTITY)
        };
        let shared = vec![
            edge(&a, &site(2, Half::B, "left")),
            edge(&a, &site(3, Half::B, "left")),
        ];
        assert_eq!(
            ConnectionGraph::try_from(shared.clone()),
            Err(GraphError::AlreadyConnected(a.clone()))
        );
        let json = serde_json::to_string(&shared).unwrap();
        assert!(serde_json::from_str::<ConnectionGraph>(&json).is_err());

        // An inactive record may share a site with an active one.
        let mut history = shared;
        history[0].active = false;
        let g = ConnectionGraph::try_from(history).unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.active_count(), 1);

        let looped = vec![edge(&a, &a)];
        assert_eq!(
            ConnectionGraph::try_from(looped),
            Err(GraphError::SelfConnection(a))
        );
    }
}
