//! Geometric gates deciding whether two sites may be joined.
//!
//! A candidate pair passes three gates in order: position coincidence,
//! normal opposition and yaw snap. The first failing gate short-circuits and
//! names the result's [`FeasibilityReason`]. Failing a gate is an ordinary
//! outcome, not an error.

use crate::alignment::{ConstraintMetrics, aligned_child_rotation, relative_yaw_deg};
use crate::connection::{ConnectionEvent, SiteRef, YawSnap};
use crate::error::ReconfigError;
use crate::graph::ConnectionGraph;
use crate::transform::RigidTransform;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Residuals closer than this (in degrees) count as a tie.
const YAW_TIE_EPSILON_DEG: f64 = 1e-9;

/// Tolerances for the three gates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeasibilityParams {
    /// Maximum distance between site origins.
    pub pos_tol: f64,
    /// Normals must satisfy `dot(z_a, z_b) <= z_dot_max` (close to -1).
    pub z_dot_max: f64,
    /// Maximum absolute residual yaw of the best snap candidate, in degrees.
    pub yaw_tol_deg: f64,
}

impl Default for FeasibilityParams {
    fn default() -> Self {
        Self {
            pos_tol: 1e-3,
            z_dot_max: -0.999,
            yaw_tol_deg: 2.0,
        }
    }
}

/// Why a candidate pair was accepted or rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeasibilityReason {
    Ok,
    Pos,
    Normal,
    Yaw,
    OccupiedA,
    OccupiedB,
    NoCandidates,
}

impl FeasibilityReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Pos => "pos",
            Self::Normal => "normal",
            Self::Yaw => "yaw",
            Self::OccupiedA => "occupied_a",
            Self::OccupiedB => "occupied_b",
            Self::NoCandidates => "no_candidates",
        }
    }
}

impl fmt::Display for FeasibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Residual yaw for one snap candidate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct YawCandidate {
    pub yaw: YawSnap,
    pub residual_yaw_deg: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityResult {
    pub feasible: bool,

    /// The snap candidate with the smallest residual, once the position and
    /// normal gates have passed.
    pub best_yaw: Option<YawSnap>,

    pub pos_err: f64,
    pub z_dot: f64,

    /// Residual yaw for the 0° candidate, i.e. after the face flip alone.
    pub raw_yaw_after_flip_deg: f64,

    /// Signed residual of the closest candidate.
    pub residual_yaw_deg: f64,

    /// Every candidate in enumeration order.
    pub candidates: Vec<YawCandidate>,

    pub reason: FeasibilityReason,
}

impl FeasibilityResult {
    /// A rejection decided by site occupancy, before any geometry is measured.
    pub fn occupied(reason: FeasibilityReason) -> Self {
        Self {
            feasible: false,
            best_yaw: None,
            pos_err: 0.0,
            z_dot: 0.0,
            raw_yaw_after_flip_deg: 0.0,
            residual_yaw_deg: 0.0,
            candidates: Vec::new(),
            reason,
        }
    }

    pub fn metrics(&self) -> ConstraintMetrics {
        ConstraintMetrics {
            pos_err: self.pos_err,
            z_dot: self.z_dot,
            rel_yaw_deg: self.residual_yaw_deg,
        }
    }

    /// The candidate with the smallest residual even if a gate failed.
    pub fn closest_yaw(&self) -> YawSnap {
        self.best_yaw
            .or_else(|| closest_candidate(&self.candidates).map(|c| c.yaw))
            .unwrap_or(YawSnap::Deg0)
    }

    /// A near miss the local solver may repair: position or yaw failed while
    /// the normals are already opposed within `z_dot_max`.
    pub fn is_solver_candidate(&self, z_dot_max: f64) -> bool {
        matches!(self.reason, FeasibilityReason::Pos | FeasibilityReason::Yaw)
            && self.z_dot <= z_dot_max
    }
}

/// First candidate with the minimal absolute residual.
fn closest_candidate(candidates: &[YawCandidate]) -> Option<YawCandidate> {
    let mut best: Option<YawCandidate> = None;
    for candidate in candidates {
        let better = match best {
            None => true,
            Some(b) => {
                candidate.residual_yaw_deg.abs() < b.residual_yaw_deg.abs() - YAW_TIE_EPSILON_DEG
            }
        };
        if better {
            best = Some(*candidate);
        }
    }
    best
}

/// Runs the position, normal and yaw gates on two site world transforms.
pub fn check(
    site_a: &RigidTransform,
    site_b: &RigidTransform,
    params: &FeasibilityParams,
) -> FeasibilityResult {
    let pos_err = site_a.translation().distance(site_b.translation());
    let z_dot = site_a.axis_z().dot(site_b.axis_z());

    let r_a = site_a.rotation();
    let r_b = site_b.rotation();
    let candidates: Vec<YawCandidate> = YawSnap::ALL
        .iter()
        .map(|&yaw| YawCandidate {
            yaw,
            residual_yaw_deg: relative_yaw_deg(r_a, aligned_child_rotation(r_b, yaw)),
        })
        .collect();

    let raw_yaw_after_flip_deg = candidates[0].residual_yaw_deg;
    let closest = closest_candidate(&candidates).unwrap_or(candidates[0]);

    let mut result = FeasibilityResult {
        feasible: false,
        best_yaw: None,
        pos_err,
        z_dot,
        raw_yaw_after_flip_deg,
        residual_yaw_deg: closest.residual_yaw_deg,
        candidates,
        reason: FeasibilityReason::Ok,
    };

    if pos_err > params.pos_tol {
        trace!(pos_err, tol = params.pos_tol, "position gate failed");
        result.reason = FeasibilityReason::Pos;
        return result;
    }

    if z_dot > params.z_dot_max {
        trace!(z_dot, max = params.z_dot_max, "normal gate failed");
        result.reason = FeasibilityReason::Normal;
        return result;
    }

    result.best_yaw = Some(closest.yaw);
    if closest.residual_yaw_deg.abs() > params.yaw_tol_deg {
        trace!(
            residual = closest.residual_yaw_deg,
            tol = params.yaw_tol_deg,
            "yaw gate failed"
        );
        result.reason = FeasibilityReason::Yaw;
        return result;
    }

    result.feasible = true;
    result
}

/// Checks occupancy and feasibility, and attaches the pair when both pass.
///
/// The stored edge transform is the measured pose of `b`'s site in `a`'s site frame.
pub fn auto_attach(
    graph: &mut ConnectionGraph,
    a: &SiteRef,
    b: &SiteRef,
    site_a: &RigidTransform,
    site_b: &RigidTransform,
    params: &FeasibilityParams,
) -> Result<FeasibilityResult, ReconfigError> {
    if !graph.site_is_free(a) {
        return Ok(FeasibilityResult::occupied(FeasibilityReason::OccupiedA));
    }
    if !graph.site_is_free(b) {
        return Ok(FeasibilityResult::occupied(FeasibilityReason::OccupiedB));
    }

    let result = check(site_a, site_b, params);
    if let (true, Some(yaw)) = (result.feasible, result.best_yaw) {
        let transform = RigidTransform::relative(site_a, site_b)?;
        graph.apply(&ConnectionEvent::attach(a.clone(), b.clone(), yaw, transform))?;
    }
    Ok(result)
}
