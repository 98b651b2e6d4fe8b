//! Propagates world poses along a [`KinematicTree`].
//!
//! Two modes share the same walk in breadth-first order:
//!
//! * **Stored-edge**: `world[child] = world[parent] · attachment.transform`.
//! * **Constraint**: the parent→child transform is derived from the current
//!   joint angles as `T_parent_site · C(yaw) · T_child_site⁻¹`, where `C` is
//!   the face-to-face [`site_constraint`].
//!
//! Module-internal kinematics are supplied by the caller through
//! [`SiteKinematics`]; the executor never models a module's joints itself.

use crate::alignment::site_constraint;
use crate::compiler::{KinematicAttachment, KinematicTree};
use crate::connection::{Half, ModuleId, SiteRef};
use crate::error::KinematicsError;
use crate::transform::RigidTransform;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A module's two internal joint angles in radians: `[A-half, B-half]`.
pub type JointAngles = [f64; 2];

/// Cached joint angles for every known module.
pub type JointTable = BTreeMap<ModuleId, JointAngles>;

/// The module model's forward kinematics for its connector sites.
///
/// Implementations must be deterministic and side-effect free.
pub trait SiteKinematics {
    /// Transform of `site` on `half` relative to the module's reference frame.
    fn site_transform(
        &self,
        joints: JointAngles,
        half: Half,
        site: &str,
    ) -> Result<RigidTransform, KinematicsError>;
}

impl<K: SiteKinematics + ?Sized> SiteKinematics for &K {
    fn site_transform(
        &self,
        joints: JointAngles,
        half: Half,
        site: &str,
    ) -> Result<RigidTransform, KinematicsError> {
        (**self).site_transform(joints, half, site)
    }
}

/// World poses of every module reachable from the tree root.
///
/// Unreachable modules are absent: there is no placeholder pose.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldPoseResult {
    pub world_transform: BTreeMap<ModuleId, RigidTransform>,
    pub reachable: BTreeSet<ModuleId>,
}

impl WorldPoseResult {
    pub fn position(&self, module: ModuleId) -> Option<glam::DVec3> {
        self.world_transform.get(&module).map(RigidTransform::translation)
    }
}

/// Walks a tree in order, asking `edge_transform` for each parent→child transform.
fn propagate_with<F>(
    tree: &KinematicTree,
    root_pose: RigidTransform,
    mut edge_transform: F,
) -> Result<WorldPoseResult, KinematicsError>
where
    F: FnMut(&KinematicAttachment) -> Result<RigidTransform, KinematicsError>,
{
    let mut world = BTreeMap::from([(tree.root, root_pose)]);

    for &child in tree.order.iter().skip(1) {
        let parent = tree
            .parent_of
            .get(&child)
            .copied()
            .flatten()
            .ok_or(KinematicsError::MissingParent(child))?;
        let attachment = tree
            .attachments
            .get(&child)
            .ok_or(KinematicsError::MissingAttachment(child))?;
        let parent_pose = world
            .get(&parent)
            .ok_or(KinematicsError::MissingPose(parent))?;

        let pose = parent_pose.compose(&edge_transform(attachment)?)?;
        world.insert(child, pose);
    }

    Ok(WorldPoseResult {
        world_transform: world,
        reachable: tree.reachable(),
    })
}

/// Stored-edge propagation: uses each attachment's fixed transform.
pub fn propagate_stored(
    tree: &KinematicTree,
    root_pose: RigidTransform,
) -> Result<WorldPoseResult, KinematicsError> {
    propagate_with(tree, root_pose, |attachment| Ok(attachment.transform))
}

/// Pose propagation backed by a module kinematics model.
#[derive(Clone, Debug, Default)]
pub struct KinematicExecutor<K> {
    kinematics: K,
}

impl<K: SiteKinematics> KinematicExecutor<K> {
    pub fn new(kinematics: K) -> Self {
        Self { kinematics }
    }

    pub fn kinematics(&self) -> &K {
        &self.kinematics
    }

    /// Site transform relative to its module frame for the given joint table.
    pub fn site_local(
        &self,
        joints: &JointTable,
        site: &SiteRef,
    ) -> Result<RigidTransform, KinematicsError> {
        let q = joints
            .get(&site.module_id)
            .ok_or(KinematicsError::MissingJointAngles(site.module_id))?;
        self.kinematics.site_transform(*q, site.half, &site.site)
    }

    /// Site world transform: `module_pose · site_local`.
    pub fn site_world(
        &self,
        module_pose: &RigidTransform,
        joints: JointAngles,
        site: &SiteRef,
    ) -> Result<RigidTransform, KinematicsError> {
        let local = self.kinematics.site_transform(joints, site.half, &site.site)?;
        Ok(module_pose.compose(&local)?)
    }

    /// Parent→child module transform implied by a joined site pair.
    pub fn constrained_transform(
        &self,
        attachment: &KinematicAttachment,
        joints: &JointTable,
    ) -> Result<RigidTransform, KinematicsError> {
        let parent_site = self.site_local(joints, &attachment.parent_site)?;
        let child_site = self.site_local(joints, &attachment.child_site)?;
        let constraint = site_constraint(attachment.yaw_snap)?;
        Ok(parent_site
            .compose(&constraint)?
            .compose(&child_site.inverse())?)
    }

    /// Stored-edge propagation; see [`propagate_stored`].
    pub fn propagate_stored(
        &self,
        tree: &KinematicTree,
        root_pose: RigidTransform,
    ) -> Result<WorldPoseResult, KinematicsError> {
        propagate_stored(tree, root_pose)
    }

    /// Constraint-mode propagation from the current joint angles.
    pub fn propagate_constrained(
        &self,
        tree: &KinematicTree,
        root_pose: RigidTransform,
        joints: &JointTable,
    ) -> Result<WorldPoseResult, KinematicsError> {
        propagate_with(tree, root_pose, |attachment| {
            self.constrained_transform(attachment, joints)
        })
    }
}
