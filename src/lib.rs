//! # modular-reconfig
//!
//! A reconfiguration engine for modular robots built from identical
//! two-half modules that join face to face at named connector sites.
//!
//! The crate records which sites are joined in a [`ConnectionGraph`], compiles
//! the active joins into a deterministic [`KinematicTree`], and propagates world
//! poses along it with a [`KinematicExecutor`]. Attach requests are gated by
//! the [`check`] feasibility test, optionally repaired by the damped
//! least-squares [`solve_local_attach`], and applied transactionally by the
//! [`EventApplier`]: a rejected attach leaves graph, poses and joint angles
//! untouched. The [`AttachPlanner`] proposes the best attach among free sites.
//!
//! Module-internal forward kinematics are supplied by the caller through
//! [`SiteKinematics`].

pub mod alignment;
pub mod applier;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod feasibility;
pub mod graph;
pub mod planner;
pub mod schedule;
pub mod solver;
pub mod transform;
pub mod world;

pub use alignment::*;
pub use applier::*;
pub use compiler::*;
pub use config::*;
pub use connection::*;
pub use error::*;
pub use executor::*;
pub use feasibility::*;
pub use graph::*;
pub use planner::*;
pub use schedule::*;
pub use solver::*;
pub use transform::*;
pub use world::*;
