// tests/common/mod.rs
#![allow(dead_code)]

use glam::DVec3;
use modular_reconfig::{
    ConnectionGraph, Half, JointAngles, KinematicsError, ModuleId, RigidTransform, SiteKinematics,
    SiteRef, WorldState, rot_y_deg, rot_z_deg,
};

/// A unit module whose halves each swing their sites about the module Z axis.
///
/// * A-half: `right` faces +X, `bottom` faces -Z; both turn with `q[0]`.
/// * B-half: `left` faces -X, `top` faces +Z; both turn with `q[1]`.
pub struct TwoHinge;

impl SiteKinematics for TwoHinge {
    fn site_transform(
        &self,
        joints: JointAngles,
        half: Half,
        site: &str,
    ) -> Result<RigidTransform, KinematicsError> {
        let (rotation, offset) = match (half, site) {
            (Half::A, "right") => (rot_y_deg(90.0), DVec3::new(0.5, 0.0, 0.0)),
            (Half::A, "bottom") => (rot_y_deg(180.0), DVec3::new(0.0, 0.0, -0.5)),
            (Half::B, "left") => (rot_y_deg(-90.0), DVec3::new(-0.5, 0.0, 0.0)),
            (Half::B, "top") => (glam::DMat3::IDENTITY, DVec3::new(0.0, 0.0, 0.5)),
            _ => {
                return Err(KinematicsError::UnknownSite {
                    half,
                    site: site.to_string(),
                });
            }
        };
        let q = match half {
            Half::A => joints[0],
            Half::B => joints[1],
        };
        let hinge = RigidTransform::from_rotation(rot_z_deg(q.to_degrees()))?;
        Ok(hinge.compose(&RigidTransform::new(rotation, offset)?)?)
    }
}

pub fn site(module: ModuleId, half: Half, name: &str) -> SiteRef {
    SiteRef::new(module, half, name)
}

/// `module.A.right`
pub fn right(module: ModuleId) -> SiteRef {
    site(module, Half::A, "right")
}

/// `module.B.left`
pub fn left(module: ModuleId) -> SiteRef {
    site(module, Half::B, "left")
}

pub fn at(x: f64, y: f64, z: f64) -> RigidTransform {
    RigidTransform::from_translation(DVec3::new(x, y, z)).unwrap()
}

/// A world with modules at the given positions and zero joint angles.
pub fn world_at(modules: &[(ModuleId, f64)]) -> WorldState {
    let mut world = WorldState::new();
    for &(id, x) in modules {
        world.insert_module(id, at(x, 0.0, 0.0), [0.0, 0.0]);
    }
    world
}

/// Active-edge count plus a full snapshot, for atomicity assertions.
pub fn snapshot(graph: &ConnectionGraph, world: &WorldState) -> (usize, ConnectionGraph, WorldState) {
    (graph.active_count(), graph.clone(), world.clone())
}
