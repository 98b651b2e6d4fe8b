//! Transactional application of attach and detach events.
//!
//! An attach runs precheck, commit and postcheck. Any failure along the way
//! leaves the graph, the cached poses and the joint angles exactly as they
//! were before the event, so an attach is visible to the rest of the system
//! only once it is fully consistent.

use crate::alignment::{ConstraintMetrics, constraint_metrics};
use crate::compiler::compile;
use crate::config::ReconfigConfig;
use crate::connection::{ConnectionEvent, EdgeKey, ModuleId, SiteRef, YawSnap};
use crate::error::{GraphError, ReconfigError};
use crate::executor::{KinematicExecutor, SiteKinematics, WorldPoseResult};
use crate::feasibility::{self, FeasibilityReason, FeasibilityResult};
use crate::graph::{ConnectionGraph, ModuleState};
use crate::schedule::EventSchedule;
use crate::solver::{LocalSolveResult, solve_local_attach};
use crate::transform::RigidTransform;
use crate::world::WorldState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Outcome code of an applied event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventReason {
    Attached,
    Detached,
    MissingEdge,
    Infeasible(FeasibilityReason),
    Postcheck,
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attached => f.write_str("attached"),
            Self::Detached => f.write_str("detached"),
            Self::MissingEdge => f.write_str("missing_edge"),
            Self::Infeasible(reason) => reason.fmt(f),
            Self::Postcheck => f.write_str("postcheck"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    pub ok: bool,
    pub reason: EventReason,

    /// Change in the number of active edges.
    pub edges_delta: isize,

    /// Metrics of the attach pair measured from cached poses before commit.
    pub pre_metrics: Option<ConstraintMetrics>,

    /// Metrics of the attach pair measured after full-tree propagation.
    pub post_metrics: Option<ConstraintMetrics>,

    /// The final precheck for attach events.
    pub feasibility: Option<FeasibilityResult>,

    /// Present when the local solver ran.
    pub local_solve: Option<LocalSolveResult>,

    pub trace: Vec<String>,
}

impl EventResult {
    fn detach(reason: EventReason, edges_delta: isize, trace: String) -> Self {
        Self {
            ok: reason == EventReason::Detached,
            reason,
            edges_delta,
            pre_metrics: None,
            post_metrics: None,
            feasibility: None,
            local_solve: None,
            trace: vec![trace],
        }
    }

    fn rejected(
        feasibility: FeasibilityResult,
        local_solve: Option<LocalSolveResult>,
        trace: String,
    ) -> Self {
        Self {
            ok: false,
            reason: EventReason::Infeasible(feasibility.reason),
            edges_delta: 0,
            pre_metrics: None,
            post_metrics: None,
            feasibility: Some(feasibility),
            local_solve,
            trace: vec![trace],
        }
    }
}

/// What happened during one simulation step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: usize,
    pub results: Vec<EventResult>,
    pub module_states: BTreeMap<ModuleId, ModuleState>,

    /// Poses after the step's events, propagated from the root module.
    pub poses: WorldPoseResult,
}

/// Applies connection events against a graph and a world state.
#[derive(Clone, Debug)]
pub struct EventApplier<K> {
    executor: KinematicExecutor<K>,
    config: ReconfigConfig,
}

impl<K: SiteKinematics> EventApplier<K> {
    pub fn new(kinematics: K, config: ReconfigConfig) -> Self {
        Self {
            executor: KinematicExecutor::new(kinematics),
            config,
        }
    }

    pub fn config(&self) -> &ReconfigConfig {
        &self.config
    }

    pub fn executor(&self) -> &KinematicExecutor<K> {
        &self.executor
    }

    /// Applies a single event.
    ///
    /// Infeasible attaches and detaches of missing edges are reported through
    /// the returned [`EventResult`]. Errors are reserved for structural
    /// problems and missing state; the graph is rolled back before one is
    /// returned.
    pub fn apply(
        &self,
        graph: &mut ConnectionGraph,
        world: &mut WorldState,
        event: &ConnectionEvent,
    ) -> Result<EventResult, ReconfigError> {
        match event {
            ConnectionEvent::Detach { a, b } => self.detach(graph, event, a, b),
            ConnectionEvent::Attach { a, b, yaw_snap, .. } => {
                self.attach(graph, world, a, b, *yaw_snap)
            }
        }
    }

    /// Applies `events` in order. Stops at the first error.
    pub fn apply_all(
        &self,
        graph: &mut ConnectionGraph,
        world: &mut WorldState,
        events: &[ConnectionEvent],
    ) -> Result<Vec<EventResult>, ReconfigError> {
        events
            .iter()
            .map(|event| self.apply(graph, world, event))
            .collect()
    }

    /// Applies the events scheduled at `step`, then refreshes the world poses.
    pub fn apply_step(
        &self,
        graph: &mut ConnectionGraph,
        world: &mut WorldState,
        schedule: &EventSchedule,
        step: usize,
    ) -> Result<StepReport, ReconfigError> {
        let results = self.apply_all(graph, world, schedule.events_at(step))?;
        let poses = world.refresh(&self.executor, graph, self.config.root_module)?;
        let module_states = graph.module_states(&world.module_ids());
        debug!(step, events = results.len(), reachable = poses.reachable.len(), "step applied");

        Ok(StepReport {
            step,
            results,
            module_states,
            poses,
        })
    }

    fn detach(
        &self,
        graph: &mut ConnectionGraph,
        event: &ConnectionEvent,
        a: &SiteRef,
        b: &SiteRef,
    ) -> Result<EventResult, ReconfigError> {
        let before = graph.active_count();
        graph.apply(event)?;
        let delta = graph.active_count() as isize - before as isize;

        if delta < 0 {
            Ok(EventResult::detach(
                EventReason::Detached,
                delta,
                format!("detach {a} from {b}"),
            ))
        } else {
            Ok(EventResult::detach(
                EventReason::MissingEdge,
                0,
                format!("detach {a} from {b} failed (missing_edge)"),
            ))
        }
    }

    /// Checks occupancy, then snapshots the state an attach may touch and
    /// restores it unless the attach succeeds.
    fn attach(
        &self,
        graph: &mut ConnectionGraph,
        world: &mut WorldState,
        a: &SiteRef,
        b: &SiteRef,
        proposed_yaw: YawSnap,
    ) -> Result<EventResult, ReconfigError> {
        if a == b {
            return Err(GraphError::SelfConnection(a.clone()).into());
        }
        if !graph.site_is_free(a) {
            return Ok(EventResult::rejected(
                FeasibilityResult::occupied(FeasibilityReason::OccupiedA),
                None,
                format!("attach {a} to {b} rejected (occupied_a)"),
            ));
        }
        if !graph.site_is_free(b) {
            return Ok(EventResult::rejected(
                FeasibilityResult::occupied(FeasibilityReason::OccupiedB),
                None,
                format!("attach {a} to {b} rejected (occupied_b)"),
            ));
        }

        let key = EdgeKey::new(a.clone(), b.clone());
        let prior_edge = graph.edge(&key).cloned();
        let prior_joints = [
            (a.module_id, world.joint_angles(a.module_id)?),
            (b.module_id, world.joint_angles(b.module_id)?),
        ];

        let outcome = self.try_attach(graph, world, a, b, proposed_yaw);
        if !matches!(&outcome, Ok(result) if result.ok) {
            for (module, q) in prior_joints {
                world.set_joint_angles(module, q);
            }
            graph.restore(&key, prior_edge);
        }
        outcome
    }

    /// Precheck, commit and postcheck of an attach between two free sites.
    fn try_attach(
        &self,
        graph: &mut ConnectionGraph,
        world: &mut WorldState,
        a: &SiteRef,
        b: &SiteRef,
        proposed_yaw: YawSnap,
    ) -> Result<EventResult, ReconfigError> {
        // Precheck against cached poses, with one solver-assisted retry.
        let params = &self.config.feasibility;
        let mut site_a = world.site_pose(&self.executor, a)?;
        let mut site_b = world.site_pose(&self.executor, b)?;
        let mut pre = feasibility::check(&site_a, &site_b, params);
        let pre_metrics = pre.metrics();
        let mut local_solve = None;

        if !pre.feasible
            && self.config.enable_local_solve
            && pre.is_solver_candidate(params.z_dot_max)
        {
            let solve = solve_local_attach(
                &self.executor,
                world,
                a,
                b,
                pre.closest_yaw(),
                &self.config.solver_params(),
            )?;
            if solve.success {
                solve.commit(&mut world.joints);
                site_a = world.site_pose(&self.executor, a)?;
                site_b = world.site_pose(&self.executor, b)?;
                pre = feasibility::check(&site_a, &site_b, params);
            }
            local_solve = Some(solve);
        }

        let Some(yaw) = pre.best_yaw.filter(|_| pre.feasible) else {
            let trace = format!("attach {a} to {b} rejected ({})", pre.reason);
            debug!(%a, %b, reason = %pre.reason, "attach precheck failed");
            let mut result = EventResult::rejected(pre, local_solve, trace);
            result.pre_metrics = Some(pre_metrics);
            return Ok(result);
        };
        if proposed_yaw != yaw {
            debug!(%a, %b, proposed = %proposed_yaw, measured = %yaw, "using measured yaw snap");
        }

        // Commit.
        let before = graph.active_count();
        let transform = RigidTransform::relative(&site_a, &site_b)?;
        graph.apply(&ConnectionEvent::attach(a.clone(), b.clone(), yaw, transform))?;
        let edges_delta = graph.active_count() as isize - before as isize;
        info!(%a, %b, %yaw, "attach committed");

        // Postcheck over the full propagated tree.
        let root = self.config.root_module;
        let tree = compile(root, graph);
        let propagated = self
            .executor
            .propagate_constrained(&tree, world.pose(root)?, &world.joints)?;
        let mut poses = world.poses.clone();
        poses.extend(propagated.world_transform);

        let post_a = world.site_pose_in(&self.executor, &poses, a)?;
        let post_b = world.site_pose_in(&self.executor, &poses, b)?;
        let post = constraint_metrics(&post_a, &post_b, yaw);
        let tol = self.config.postcheck_params();

        if !post.within(tol.pos_tol, tol.z_dot_max, tol.yaw_tol_deg) {
            warn!(
                %a,
                %b,
                pos_err = post.pos_err,
                z_dot = post.z_dot,
                rel_yaw_deg = post.rel_yaw_deg,
                "postcheck failed, rolling back attach"
            );
            graph.apply(&ConnectionEvent::detach(a.clone(), b.clone()))?;
            return Ok(EventResult {
                ok: false,
                reason: EventReason::Postcheck,
                edges_delta: 0,
                pre_metrics: Some(pre_metrics),
                post_metrics: Some(post),
                feasibility: Some(pre),
                local_solve,
                trace: vec![format!("attach {a} to {b} rolled back (postcheck)")],
            });
        }

        world.poses = poses;
        Ok(EventResult {
            ok: true,
            reason: EventReason::Attached,
            edges_delta,
            pre_metrics: Some(pre_metrics),
            post_metrics: Some(post),
            feasibility: Some(pre),
            local_solve,
            trace: vec![format!("attach {a} to {b} (yaw {yaw})")],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_display_as_codes() {
        assert_eq!(EventReason::Attached.to_string(), "attached");
        assert_eq!(EventReason::MissingEdge.to_string(), "missing_edge");
        assert_eq!(
            EventReason::Infeasible(FeasibilityReason::OccupiedB).to_string(),
            "occupied_b"
        );
        assert_eq!(EventReason::Postcheck.to_string(), "postcheck");
    }
}
