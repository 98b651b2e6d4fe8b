//! Damped least-squares correction for near-miss attach candidates.
//!
//! Adjusts the four joint angles of the two modules carrying a site pair so
//! the sites coincide, their normals oppose and their yaw snaps cleanly. The
//! solver works on a scratch copy of the joint angles: the shared table is
//! only changed when the caller commits a successful result.

use crate::alignment::{ConstraintMetrics, aligned_child_rotation, constraint_metrics, relative_yaw_deg};
use crate::connection::{ModuleId, SiteRef, YawSnap};
use crate::error::KinematicsError;
use crate::executor::{JointAngles, JointTable, KinematicExecutor, SiteKinematics};
use crate::transform::RigidTransform;
use crate::world::WorldState;
use glam::{DMat4, DVec4};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, trace};

/// Determinant below which the damped normal matrix is treated as singular.
const SINGULAR_DETERMINANT: f64 = 1e-18;

/// Configuration for the local solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSolveParams {
    /// Required final distance between site origins.
    pub pos_tol: f64,
    /// Normal opposition bound; shapes the search but is not re-checked.
    pub z_dot_max: f64,
    /// Required final absolute residual yaw, in degrees.
    pub yaw_tol_deg: f64,
    /// Maximum solver iterations.
    pub max_iters: usize,
    /// Forward finite-difference step (radians).
    pub fd_step: f64,
    /// Damping factor (lambda) added to the normal matrix diagonal.
    pub damping: f64,
    /// Iteration stops once the error vector norm drops below this.
    pub convergence_norm: f64,
}

impl Default for LocalSolveParams {
    fn default() -> Self {
        Self {
            pos_tol: 1e-3,
            z_dot_max: -0.999,
            yaw_tol_deg: 2.0,
            max_iters: 10,
            fd_step: 1e-4,
            damping: 0.1,
            convergence_norm: 1e-3,
        }
    }
}

/// Result of a local solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalSolveResult {
    pub success: bool,

    /// Why the solve failed. `None` on success.
    pub reason: Option<String>,

    /// Solved joint angles for the module carrying `a`; the starting angles on failure.
    pub q_a: JointAngles,
    /// Solved joint angles for the module carrying `b`; the starting angles on failure.
    pub q_b: JointAngles,

    pub metrics_before: ConstraintMetrics,
    pub metrics_after: ConstraintMetrics,

    /// Number of Jacobian updates performed.
    pub iterations: usize,

    module_a: ModuleId,
    module_b: ModuleId,
}

impl LocalSolveResult {
    /// Writes the solved joint angles into `joints`. Does nothing for a failed solve.
    pub fn commit(&self, joints: &mut JointTable) {
        if self.success {
            joints.insert(self.module_a, self.q_a);
            joints.insert(self.module_b, self.q_b);
        }
    }
}

/// The 5-vector the solver drives to zero: position difference, normal
/// opposition residual `z_dot + 1` and residual yaw in degrees.
fn error_vector(site_a: &RigidTransform, site_b: &RigidTransform, yaw: YawSnap) -> [f64; 5] {
    let d = site_a.translation() - site_b.translation();
    let z_dot = site_a.axis_z().dot(site_b.axis_z());
    let rel_yaw = relative_yaw_deg(
        site_a.rotation(),
        aligned_child_rotation(site_b.rotation(), yaw),
    );
    [d.x, d.y, d.z, z_dot + 1.0, rel_yaw]
}

fn norm(e: &[f64; 5]) -> f64 {
    e.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Solves for joint angles of the two modules carrying `a` and `b`.
///
/// Module poses are read from `world` and held fixed; only joint angles move.
/// `yaw` is the snap the pair is driven towards, normally the closest
/// candidate of the failed precheck. Non-convergence is reported through
/// [`LocalSolveResult::success`]; only missing state is an error.
pub fn solve_local_attach<K: SiteKinematics>(
    executor: &KinematicExecutor<K>,
    world: &WorldState,
    a: &SiteRef,
    b: &SiteRef,
    yaw: YawSnap,
    params: &LocalSolveParams,
) -> Result<LocalSolveResult, KinematicsError> {
    let pose_a = world.pose(a.module_id)?;
    let pose_b = world.pose(b.module_id)?;
    let q_a0 = world.joint_angles(a.module_id)?;
    let q_b0 = world.joint_angles(b.module_id)?;

    let sites_at = |q: DVec4| -> Result<(RigidTransform, RigidTransform), KinematicsError> {
        Ok((
            executor.site_world(&pose_a, [q.x, q.y], a)?,
            executor.site_world(&pose_b, [q.z, q.w], b)?,
        ))
    };
    let error_at = |q: DVec4| -> Result<[f64; 5], KinematicsError> {
        let (site_a, site_b) = sites_at(q)?;
        Ok(error_vector(&site_a, &site_b, yaw))
    };

    let q0 = DVec4::new(q_a0[0], q_a0[1], q_b0[0], q_b0[1]);
    let (site_a, site_b) = sites_at(q0)?;
    let metrics_before = constraint_metrics(&site_a, &site_b, yaw);

    let mut result = LocalSolveResult {
        success: false,
        reason: None,
        q_a: q_a0,
        q_b: q_b0,
        metrics_before,
        metrics_after: metrics_before,
        iterations: 0,
        module_a: a.module_id,
        module_b: b.module_id,
    };

    if metrics_before.within(params.pos_tol, params.z_dot_max, params.yaw_tol_deg) {
        result.success = true;
        return Ok(result);
    }

    if a.module_id == b.module_id {
        result.reason = Some(format!("sites {a} and {b} share a module"));
        return Ok(result);
    }

    let mut q = q0;
    let mut err = error_at(q)?;
    for _ in 0..params.max_iters {
        if norm(&err) < params.convergence_norm {
            break;
        }

        // Rows of the 5x4 Jacobian, one per error component.
        let mut rows = [DVec4::ZERO; 5];
        for j in 0..4 {
            let mut q_eps = q;
            q_eps[j] += params.fd_step;
            let err_eps = error_at(q_eps)?;
            for (row, (&e_eps, &e)) in rows.iter_mut().zip(err_eps.iter().zip(err.iter())) {
                row[j] = (e_eps - e) / params.fd_step;
            }
        }

        // (JᵀJ + λI) Δq = −Jᵀe
        let mut jtj = DMat4::IDENTITY * params.damping;
        let mut jte = DVec4::ZERO;
        for (row, &e) in rows.iter().zip(err.iter()) {
            jtj += DMat4::from_cols(*row * row.x, *row * row.y, *row * row.z, *row * row.w);
            jte += *row * e;
        }

        if jtj.determinant().abs() < SINGULAR_DETERMINANT {
            result.reason = Some("singular damped normal matrix".to_string());
            return Ok(result);
        }

        let step = jtj.inverse() * -jte;
        q = (q + step).clamp(DVec4::splat(-PI), DVec4::splat(PI));
        err = error_at(q)?;
        result.iterations += 1;
        trace!(iteration = result.iterations, error = norm(&err), "local solve step");
    }

    let (site_a, site_b) = sites_at(q)?;
    let metrics_after = constraint_metrics(&site_a, &site_b, yaw);
    result.metrics_after = metrics_after;

    if metrics_after.pos_err <= params.pos_tol && metrics_after.rel_yaw_deg.abs() <= params.yaw_tol_deg {
        result.success = true;
        result.q_a = [q.x, q.y];
        result.q_b = [q.z, q.w];
        debug!(%a, %b, iterations = result.iterations, pos_err = metrics_after.pos_err, "local solve converged");
    } else {
        result.reason = Some(format!(
            "did not converge, final error norm {:.3e}",
            norm(&err)
        ));
        debug!(%a, %b, iterations = result.iterations, pos_err = metrics_after.pos_err, "local solve failed");
    }

    Ok(result)
}
