//! Error types for the reconfiguration engine.
//!
//! Only invariant violations and malformed requests are errors. Expected
//! outcomes such as an infeasible attach or a detach of a missing edge are
//! reported as ordinary result values.

use crate::connection::{Half, ModuleId, SiteRef};
use thiserror::Error;

/// A matrix that is not a valid rigid transform.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum InvalidTransform {
    #[error("transform contains non-finite entries")]
    NonFinite,

    #[error("last row is {0:?}, expected [0, 0, 0, 1]")]
    LastRow([f64; 4]),

    #[error("rotation block is not orthonormal (max deviation {0:e})")]
    NotOrthonormal(f64),

    #[error("rotation block is a reflection (determinant {0})")]
    NotProperRotation(f64),
}

/// Structural errors raised by [`ConnectionGraph::apply`](crate::ConnectionGraph::apply)
/// and event construction.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum GraphError {
    #[error("site {0} is already connected")]
    AlreadyConnected(SiteRef),

    #[error("attach event is missing its {missing}")]
    IncompleteAttach { missing: &'static str },

    #[error("site {0} cannot be connected to itself")]
    SelfConnection(SiteRef),
}

/// Internal-consistency errors raised while computing poses.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum KinematicsError {
    #[error("no world pose cached for module {0}")]
    MissingPose(ModuleId),

    #[error("no joint angles known for module {0}")]
    MissingJointAngles(ModuleId),

    #[error("module {0} is in the traversal order but has no parent")]
    MissingParent(ModuleId),

    #[error("module {0} is in the traversal order but has no attachment")]
    MissingAttachment(ModuleId),

    #[error("unknown site {site:?} on half {half}")]
    UnknownSite { half: Half, site: String },

    #[error(transparent)]
    Transform(#[from] InvalidTransform),
}

/// Top-level error type for the crate.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ReconfigError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("kinematics error: {0}")]
    Kinematics(#[from] KinematicsError),

    #[error("invalid transform: {0}")]
    Transform(#[from] InvalidTransform),
}
