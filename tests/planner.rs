// tests/planner.rs
mod common;

use common::{TwoHinge, left, right, world_at};
use modular_reconfig::{
    AttachPlan, AttachPlanner, ConnectionEvent, ConnectionGraph, EventApplier, ReconfigConfig,
    YawSnap,
};

#[test]
fn test_plans_the_only_aligned_pair() {
    let graph = ConnectionGraph::new();
    let mut world = world_at(&[(1, 0.0), (2, 1.0)]);
    let planner = AttachPlanner::new(TwoHinge, ReconfigConfig::default());

    let plan = planner.plan(&graph, &mut world, &[1, 2]).unwrap();
    let AttachPlan::Ready { event, feasibility } = &plan else {
        panic!("expected a plan, got {plan:?}");
    };
    assert!(feasibility.feasible);
    assert_eq!(event.endpoints(), (&right(1), &left(2)));
    let ConnectionEvent::Attach { yaw_snap, .. } = event else {
        panic!("planner must emit an attach");
    };
    assert_eq!(*yaw_snap, YawSnap::Deg0);

    // The planned event is accepted by the applier.
    let mut graph = graph;
    let applier = EventApplier::new(TwoHinge, ReconfigConfig::default());
    let result = applier.apply(&mut graph, &mut world, event).unwrap();
    assert!(result.ok, "{:?}", result.reason);

    // Nothing else lines up once the pair is joined.
    let plan = planner.plan(&graph, &mut world, &[1, 2]).unwrap();
    assert_eq!(plan, AttachPlan::NoFeasiblePair);
}

#[test]
fn test_no_candidates_for_a_single_module() {
    let mut world = world_at(&[(1, 0.0)]);
    let planner = AttachPlanner::new(TwoHinge, ReconfigConfig::default());
    let plan = planner.plan(&ConnectionGraph::new(), &mut world, &[1]).unwrap();
    assert_eq!(plan, AttachPlan::NoCandidates);
    assert_eq!(plan.reason(), Some("no_candidates"));
}

#[test]
fn test_prefers_smallest_position_error() {
    // 1.right <-> 2.left is 0.5 mm apart; 3.right <-> 1.left touch exactly.
    let mut world = world_at(&[(1, 0.0), (2, 1.0005), (3, -1.0)]);
    let planner = AttachPlanner::new(TwoHinge, ReconfigConfig::default());

    let plan = planner.plan(&ConnectionGraph::new(), &mut world, &[1, 2, 3]).unwrap();
    let event = plan.event().expect("a feasible pair exists");
    assert_eq!(event.endpoints(), (&right(3), &left(1)));
}

#[test]
fn test_local_solve_fallback_commits_only_on_success() {
    let graph = ConnectionGraph::new();
    let mut world = world_at(&[(1, 0.0), (2, 1.0)]);
    world.set_joint_angles(1, [0.004, 0.0]);

    let plain = AttachPlanner::new(TwoHinge, ReconfigConfig::default());
    let plan = plain.plan(&graph, &mut world, &[1, 2]).unwrap();
    assert_eq!(plan, AttachPlan::NoFeasiblePair);
    assert_eq!(world.joints[&1], [0.004, 0.0]);

    let solving = AttachPlanner::new(
        TwoHinge,
        ReconfigConfig {
            enable_local_solve: true,
            ..Default::default()
        },
    );
    let plan = solving.plan(&graph, &mut world, &[1, 2]).unwrap();
    let event = plan.event().expect("solver should repair the near miss");
    assert_eq!(event.endpoints(), (&right(1), &left(2)));
    assert_ne!(world.joints[&1], [0.004, 0.0]);

    // Out of reach: the solver fails and joint angles stay put.
    let mut far = world_at(&[(1, 0.0), (2, 1.3)]);
    let plan = solving.plan(&graph, &mut far, &[1, 2]).unwrap();
    assert_eq!(plan, AttachPlan::NoFeasiblePair);
    assert_eq!(far.joints[&1], [0.0, 0.0]);
    assert_eq!(far.joints[&2], [0.0, 0.0]);
}
