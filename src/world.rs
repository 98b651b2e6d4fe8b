//! Cached per-module world poses and joint angles.

use crate::compiler::compile;
use crate::connection::{ModuleId, SiteRef};
use crate::error::KinematicsError;
use crate::executor::{JointAngles, JointTable, KinematicExecutor, SiteKinematics, WorldPoseResult};
use crate::graph::ConnectionGraph;
use crate::transform::RigidTransform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The executor's view of the robot between reconfiguration events.
///
/// Poses of modules that are not reachable from the root keep their last
/// value when the state is refreshed, so a detached module stays where it
/// was released.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub poses: BTreeMap<ModuleId, RigidTransform>,
    pub joints: JointTable,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module with its initial world pose and joint angles.
    pub fn insert_module(&mut self, id: ModuleId, pose: RigidTransform, joints: JointAngles) {
        self.poses.insert(id, pose);
        self.joints.insert(id, joints);
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.poses.keys().copied().collect()
    }

    pub fn pose(&self, module: ModuleId) -> Result<RigidTransform, KinematicsError> {
        self.poses
            .get(&module)
            .copied()
            .ok_or(KinematicsError::MissingPose(module))
    }

    pub fn joint_angles(&self, module: ModuleId) -> Result<JointAngles, KinematicsError> {
        self.joints
            .get(&module)
            .copied()
            .ok_or(KinematicsError::MissingJointAngles(module))
    }

    /// Sets a module's joint angles, as the motion-planner stream does each step.
    pub fn set_joint_angles(&mut self, module: ModuleId, joints: JointAngles) {
        self.joints.insert(module, joints);
    }

    /// World transform of a site from the cached module pose and joint angles.
    pub fn site_pose<K: SiteKinematics>(
        &self,
        executor: &KinematicExecutor<K>,
        site: &SiteRef,
    ) -> Result<RigidTransform, KinematicsError> {
        self.site_pose_in(executor, &self.poses, site)
    }

    /// Like [`site_pose`](Self::site_pose) but reading module poses from `poses`.
    pub(crate) fn site_pose_in<K: SiteKinematics>(
        &self,
        executor: &KinematicExecutor<K>,
        poses: &BTreeMap<ModuleId, RigidTransform>,
        site: &SiteRef,
    ) -> Result<RigidTransform, KinematicsError> {
        let module_pose = poses
            .get(&site.module_id)
            .ok_or(KinematicsError::MissingPose(site.module_id))?;
        executor.site_world(module_pose, self.joint_angles(site.module_id)?, site)
    }

    /// Recompiles the tree from `root` and re-propagates it in constraint mode,
    /// overwriting the cached poses of every reachable module.
    pub fn refresh<K: SiteKinematics>(
        &mut self,
        executor: &KinematicExecutor<K>,
        graph: &ConnectionGraph,
        root: ModuleId,
    ) -> Result<WorldPoseResult, KinematicsError> {
        let tree = compile(root, graph);
        let result = executor.propagate_constrained(&tree, self.pose(root)?, &self.joints)?;
        self.poses.extend(result.world_transform.iter().map(|(&id, &t)| (id, t)));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Half;
    use glam::DVec3;

    /// A single site one unit above the module origin.
    struct Mast;

    impl SiteKinematics for Mast {
        fn site_transform(
            &self,
            _joints: JointAngles,
            _half: Half,
            _site: &str,
        ) -> Result<RigidTransform, KinematicsError> {
            Ok(RigidTransform::from_translation(DVec3::Z)?)
        }
    }

    #[test]
    fn site_pose_composes_module_pose() {
        let mut world = WorldState::new();
        world.insert_module(
            3,
            RigidTransform::from_translation(DVec3::new(2.0, 0.0, 0.0)).unwrap(),
            [0.0, 0.0],
        );
        let exec = KinematicExecutor::new(Mast);
        let pose = world.site_pose(&exec, &SiteRef::new(3, Half::A, "top")).unwrap();
        assert_eq!(pose.translation(), DVec3::new(2.0, 0.0, 1.0));
    }

    #[test]
    fn missing_state_is_reported() {
        let mut world = WorldState::new();
        assert_eq!(world.pose(1), Err(KinematicsError::MissingPose(1)));
        world.poses.insert(1, RigidTransform::IDENTITY);
        let exec = KinematicExecutor::new(Mast);
        assert_eq!(
            world.site_pose(&exec, &SiteRef::new(1, Half::B, "top")),
            Err(KinematicsError::MissingJointAngles(1))
        );
        world.set_joint_angles(1, [0.1, 0.2]);
        assert_eq!(world.joint_angles(1), Ok([0.1, 0.2]));
        assert_eq!(world.module_ids(), vec![1]);
    }
}
