//! Validated 4×4 rigid transforms.
//!
//! Every transform that enters or leaves the engine is a [`RigidTransform`]:
//! a homogeneous matrix whose last row is exactly `[0, 0, 0, 1]` and whose
//! rotation block is a proper rotation. Malformed matrices are rejected with
//! [`InvalidTransform`] at construction instead of being propagated.

use crate::error::InvalidTransform;
use glam::{DMat3, DMat4, DVec3, DVec4};
use serde::{Deserialize, Serialize};

/// Maximum entry-wise deviation of `RᵀR` from the identity.
pub const ORTHONORMAL_TOLERANCE: f64 = 1e-6;

/// A rigid-body transform (rotation + translation) stored as a column-major `DMat4`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DMat4", into = "DMat4")]
pub struct RigidTransform(DMat4);

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    pub const IDENTITY: Self = Self(DMat4::IDENTITY);

    /// Builds `[R, t; 0 0 0 1]`.
    pub fn new(rotation: DMat3, translation: DVec3) -> Result<Self, InvalidTransform> {
        Self::from_matrix(DMat4::from_cols(
            rotation.x_axis.extend(0.0),
            rotation.y_axis.extend(0.0),
            rotation.z_axis.extend(0.0),
            translation.extend(1.0),
        ))
    }

    pub fn from_translation(translation: DVec3) -> Result<Self, InvalidTransform> {
        Self::new(DMat3::IDENTITY, translation)
    }

    pub fn from_rotation(rotation: DMat3) -> Result<Self, InvalidTransform> {
        Self::new(rotation, DVec3::ZERO)
    }

    /// Wraps a raw matrix after checking every rigid-transform invariant.
    pub fn from_matrix(matrix: DMat4) -> Result<Self, InvalidTransform> {
        validate(&matrix)?;
        Ok(Self(matrix))
    }

    pub fn matrix(&self) -> DMat4 {
        self.0
    }

    pub fn rotation(&self) -> DMat3 {
        DMat3::from_mat4(self.0)
    }

    pub fn translation(&self) -> DVec3 {
        self.0.w_axis.truncate()
    }

    /// The frame's local Y axis expressed in the parent frame.
    pub fn axis_y(&self) -> DVec3 {
        self.0.y_axis.truncate()
    }

    /// The frame's local Z axis expressed in the parent frame (a site's outward normal).
    pub fn axis_z(&self) -> DVec3 {
        self.0.z_axis.truncate()
    }

    /// `self · other`, validated.
    pub fn compose(&self, other: &Self) -> Result<Self, InvalidTransform> {
        Self::from_matrix(self.0 * other.0)
    }

    /// Closed-form rigid inverse `[Rᵀ, -Rᵀt]`.
    pub fn inverse(&self) -> Self {
        let r_t = self.rotation().transpose();
        let t = -(r_t * self.translation());
        Self(DMat4::from_cols(
            r_t.x_axis.extend(0.0),
            r_t.y_axis.extend(0.0),
            r_t.z_axis.extend(0.0),
            t.extend(1.0),
        ))
    }

    /// Pose of `b` expressed in the frame of `a`: `inverse(a) · b`.
    pub fn relative(a: &Self, b: &Self) -> Result<Self, InvalidTransform> {
        a.inverse().compose(b)
    }

    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.0.transform_point3(point)
    }

    /// Entry-wise comparison, used by tests and diagnostics.
    pub fn abs_diff_eq(&self, other: &Self, max_abs_diff: f64) -> bool {
        self.0.abs_diff_eq(other.0, max_abs_diff)
    }
}

impl From<RigidTransform> for DMat4 {
    fn from(value: RigidTransform) -> Self {
        value.0
    }
}

impl TryFrom<DMat4> for RigidTransform {
    type Error = InvalidTransform;

    fn try_from(value: DMat4) -> Result<Self, Self::Error> {
        Self::from_matrix(value)
    }
}

/// Checks the rigid-transform invariants of a raw matrix.
pub fn validate(matrix: &DMat4) -> Result<(), InvalidTransform> {
    if !matrix.is_finite() {
        return Err(InvalidTransform::NonFinite);
    }

    let last_row = matrix.row(3);
    if last_row != DVec4::W {
        return Err(InvalidTransform::LastRow(last_row.to_array()));
    }

    let rotation = DMat3::from_mat4(*matrix);
    let gram = rotation.transpose() * rotation - DMat3::IDENTITY;
    let deviation = gram
        .to_cols_array()
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if deviation > ORTHONORMAL_TOLERANCE {
        return Err(InvalidTransform::NotOrthonormal(deviation));
    }

    let det = rotation.determinant();
    if det < 0.0 {
        return Err(InvalidTransform::NotProperRotation(det));
    }

    Ok(())
}

/// Cosine and sine of an angle in degrees, exact for multiples of 90°.
fn cos_sin_deg(degrees: f64) -> (f64, f64) {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped == 0.0 {
        (1.0, 0.0)
    } else if wrapped == 90.0 {
        (0.0, 1.0)
    } else if wrapped == 180.0 {
        (-1.0, 0.0)
    } else if wrapped == 270.0 {
        (0.0, -1.0)
    } else {
        let (s, c) = degrees.to_radians().sin_cos();
        (c, s)
    }
}

/// Rotation about X by `degrees`.
pub fn rot_x_deg(degrees: f64) -> DMat3 {
    let (c, s) = cos_sin_deg(degrees);
    DMat3::from_cols(
        DVec3::X,
        DVec3::new(0.0, c, s),
        DVec3::new(0.0, -s, c),
    )
}

/// Rotation about Y by `degrees`.
pub fn rot_y_deg(degrees: f64) -> DMat3 {
    let (c, s) = cos_sin_deg(degrees);
    DMat3::from_cols(
        DVec3::new(c, 0.0, -s),
        DVec3::Y,
        DVec3::new(s, 0.0, c),
    )
}

/// Rotation about Z by `degrees`.
pub fn rot_z_deg(degrees: f64) -> DMat3 {
    let (c, s) = cos_sin_deg(degrees);
    DMat3::from_cols(
        DVec3::new(c, s, 0.0),
        DVec3::new(-s, c, 0.0),
        DVec3::Z,
    )
}
