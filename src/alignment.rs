//! Site-to-site alignment: the face-to-face constraint and its residuals.
//!
//! Two joined sites face each other: the child site's frame equals the parent
//! site's frame rotated by `Rz(yaw) · Ry(180°)`. The same composition is used
//! to propagate poses ([`site_constraint`]) and to measure how far a candidate
//! pair is from satisfying it ([`aligned_child_rotation`]), so a pair built by
//! propagation always measures zero residual yaw.
//!
//! `Rz(yaw) · Ry(180°)` is its own inverse, so the constraint does not depend
//! on which endpoint is treated as the parent.

use crate::connection::YawSnap;
use crate::error::InvalidTransform;
use crate::transform::{RigidTransform, rot_y_deg};
use glam::DMat3;
use serde::{Deserialize, Serialize};

/// Below this length the projected child Y axis is treated as degenerate.
const DEGENERATE_PROJECTION: f64 = 1e-8;

/// The 180° flip about the site's Y axis that turns `+Z` into `-Z`.
pub fn face_flip() -> DMat3 {
    rot_y_deg(180.0)
}

/// Parent-site → child-site transform for a joined pair.
pub fn site_constraint(yaw: YawSnap) -> Result<RigidTransform, InvalidTransform> {
    RigidTransform::from_rotation(yaw.rotation() * face_flip())
}

/// Undoes the constraint on a child site rotation: `R_c · Ry(180°) · Rz(-yaw)`.
///
/// For a perfectly joined pair the result equals the parent site rotation.
pub fn aligned_child_rotation(child: DMat3, yaw: YawSnap) -> DMat3 {
    child * face_flip() * yaw.rotation().transpose()
}

/// Signed angle, in degrees within (-180, 180], of the child's Y axis about
/// the parent's Z axis, measured from the parent's Y axis.
///
/// Both rotations are expressed in the same (world) frame.
pub fn relative_yaw_deg(parent: DMat3, child: DMat3) -> f64 {
    let z_p = parent.z_axis;
    let y_p = parent.y_axis;

    let y_c = child.y_axis;
    let projected = y_c - y_c.dot(z_p) * z_p;
    let len = projected.length();
    if len < DEGENERATE_PROJECTION {
        return 0.0;
    }
    let y_c = projected / len;

    let sin = z_p.dot(y_p.cross(y_c));
    let cos = y_p.dot(y_c);
    sin.atan2(cos).to_degrees()
}

/// Geometric residuals of a site pair under a given yaw snap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintMetrics {
    /// Distance between the two site origins.
    pub pos_err: f64,

    /// Dot product of the two outward normals; -1 when exactly opposed.
    pub z_dot: f64,

    /// Residual yaw after undoing the flip and the snap, in degrees.
    pub rel_yaw_deg: f64,
}

impl ConstraintMetrics {
    pub fn within(&self, pos_tol: f64, z_dot_max: f64, yaw_tol_deg: f64) -> bool {
        self.pos_err <= pos_tol && self.z_dot <= z_dot_max && self.rel_yaw_deg.abs() <= yaw_tol_deg
    }
}

/// Measures a parent/child site pair, both given as world transforms.
pub fn constraint_metrics(
    parent_site: &RigidTransform,
    child_site: &RigidTransform,
    yaw: YawSnap,
) -> ConstraintMetrics {
    let pos_err = parent_site
        .translation()
        .distance(child_site.translation());
    let z_dot = parent_site.axis_z().dot(child_site.axis_z());
    let aligned = aligned_child_rotation(child_site.rotation(), yaw);
    let rel_yaw_deg = relative_yaw_deg(parent_site.rotation(), aligned);

    ConstraintMetrics {
        pos_err,
        z_dot,
        rel_yaw_deg,
    }
}
