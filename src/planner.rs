//! Picks the best attach among every free site pair of a module set.

use crate::config::{ReconfigConfig, SiteCatalog};
use crate::connection::{ConnectionEvent, Half, ModuleId, SiteRef};
use crate::error::ReconfigError;
use crate::executor::{KinematicExecutor, SiteKinematics};
use crate::feasibility::{self, FeasibilityResult};
use crate::graph::ConnectionGraph;
use crate::solver::solve_local_attach;
use crate::transform::RigidTransform;
use crate::world::WorldState;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Every `(free A-half site, free B-half site)` pair across distinct modules
/// of `modules`, in module then catalog order.
pub fn find_attach_candidates(
    graph: &ConnectionGraph,
    modules: &[ModuleId],
    catalog: &SiteCatalog,
) -> Vec<(SiteRef, SiteRef)> {
    let mut candidates = Vec::new();
    for &m1 in modules {
        for &m2 in modules {
            if m1 == m2 {
                continue;
            }
            for name_a in catalog.sites(Half::A) {
                let a = SiteRef::new(m1, Half::A, name_a.as_str());
                if !graph.site_is_free(&a) {
                    continue;
                }
                for name_b in catalog.sites(Half::B) {
                    let b = SiteRef::new(m2, Half::B, name_b.as_str());
                    if graph.site_is_free(&b) {
                        candidates.push((a.clone(), b));
                    }
                }
            }
        }
    }
    candidates
}

/// Outcome of [`AttachPlanner::plan`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttachPlan {
    /// An attach event ready for the event applier.
    Ready {
        event: ConnectionEvent,
        feasibility: FeasibilityResult,
    },
    NoCandidates,
    NoFeasiblePair,
}

impl AttachPlan {
    pub fn event(&self) -> Option<&ConnectionEvent> {
        match self {
            Self::Ready { event, .. } => Some(event),
            _ => None,
        }
    }

    /// `no_candidates` or `no_feasible_pair` when no event was planned.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Ready { .. } => None,
            Self::NoCandidates => Some("no_candidates"),
            Self::NoFeasiblePair => Some("no_feasible_pair"),
        }
    }
}

struct Evaluated {
    a: SiteRef,
    b: SiteRef,
    site_a: RigidTransform,
    site_b: RigidTransform,
    result: FeasibilityResult,
}

impl Evaluated {
    fn into_plan(self) -> Result<AttachPlan, ReconfigError> {
        let yaw = self.result.closest_yaw();
        let transform = RigidTransform::relative(&self.site_a, &self.site_b)?;
        Ok(AttachPlan::Ready {
            event: ConnectionEvent::attach(self.a, self.b, yaw, transform),
            feasibility: self.result,
        })
    }
}

/// Chooses attach events from the current world state.
#[derive(Clone, Debug)]
pub struct AttachPlanner<K> {
    executor: KinematicExecutor<K>,
    config: ReconfigConfig,
}

impl<K: SiteKinematics> AttachPlanner<K> {
    pub fn new(kinematics: K, config: ReconfigConfig) -> Self {
        Self {
            executor: KinematicExecutor::new(kinematics),
            config,
        }
    }

    /// Plans one attach among `modules`.
    ///
    /// Feasible candidates are ranked by position error, then by absolute
    /// residual yaw. When none is feasible and local solving is enabled, the
    /// solver-eligible candidate with the smallest position error is retried;
    /// its solved joint angles are written to `world` only if the re-check
    /// passes.
    pub fn plan(
        &self,
        graph: &ConnectionGraph,
        world: &mut WorldState,
        modules: &[ModuleId],
    ) -> Result<AttachPlan, ReconfigError> {
        let candidates = find_attach_candidates(graph, modules, &self.config.sites);
        if candidates.is_empty() {
            return Ok(AttachPlan::NoCandidates);
        }

        let params = &self.config.feasibility;
        let mut evaluated = Vec::with_capacity(candidates.len());
        for (a, b) in candidates {
            let site_a = world.site_pose(&self.executor, &a)?;
            let site_b = world.site_pose(&self.executor, &b)?;
            let result = feasibility::check(&site_a, &site_b, params);
            evaluated.push(Evaluated {
                a,
                b,
                site_a,
                site_b,
                result,
            });
        }

        let mut best: Option<usize> = None;
        for (index, candidate) in evaluated.iter().enumerate() {
            if !candidate.result.feasible {
                continue;
            }
            let better = best.is_none_or(|i| {
                let (r, s) = (&candidate.result, &evaluated[i].result);
                r.pos_err < s.pos_err
                    || (r.pos_err == s.pos_err
                        && r.residual_yaw_deg.abs() < s.residual_yaw_deg.abs())
            });
            if better {
                best = Some(index);
            }
        }
        if let Some(index) = best {
            let chosen = evaluated.swap_remove(index);
            debug!(a = %chosen.a, b = %chosen.b, pos_err = chosen.result.pos_err, "planned attach");
            return chosen.into_plan();
        }

        if !self.config.enable_local_solve {
            return Ok(AttachPlan::NoFeasiblePair);
        }

        let mut fallback: Option<usize> = None;
        for (index, candidate) in evaluated.iter().enumerate() {
            if !candidate.result.is_solver_candidate(params.z_dot_max) {
                continue;
            }
            if fallback.is_none_or(|i| candidate.result.pos_err < evaluated[i].result.pos_err) {
                fallback = Some(index);
            }
        }
        let Some(index) = fallback else {
            return Ok(AttachPlan::NoFeasiblePair);
        };

        let candidate = &evaluated[index];
        let solve = solve_local_attach(
            &self.executor,
            world,
            &candidate.a,
            &candidate.b,
            candidate.result.closest_yaw(),
            &self.config.solver_params(),
        )?;
        if !solve.success {
            debug!(a = %candidate.a, b = %candidate.b, reason = ?solve.reason, "planner local solve failed");
            return Ok(AttachPlan::NoFeasiblePair);
        }

        let site_a = self.executor.site_world(
            &world.pose(candidate.a.module_id)?,
            solve.q_a,
            &candidate.a,
        )?;
        let site_b = self.executor.site_world(
            &world.pose(candidate.b.module_id)?,
            solve.q_b,
            &candidate.b,
        )?;
        let result = feasibility::check(&site_a, &site_b, params);
        if !result.feasible {
            return Ok(AttachPlan::NoFeasiblePair);
        }
        solve.commit(&mut world.joints);

        debug!(a = %candidate.a, b = %candidate.b, "planned attach after local solve");
        Evaluated {
            a: candidate.a.clone(),
            b: candidate.b.clone(),
            site_a,
            site_b,
            result,
        }
        .into_plan()
    }
}
