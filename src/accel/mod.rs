//! Interchangeable ray-scene intersection accelerators.
//!
//! All three variants satisfy the same contract: primitives go in with
//! [`IntersectionAccelerator::add_primitive`], the tree is assembled by
//! [`IntersectionAccelerator::build`], and from then on the structure is
//! immutable and may be queried from any number of threads at once.

mod bvh;
mod kd_tree;
mod octree;

pub use bvh::Bvh;
pub use kd_tree::KdTree;
pub use octree::Octree;

use crate::{
    primitives::Primitives,
    ray::{Hit, Ray},
    telemetry::TelemetrySink,
};
use enum_dispatch::enum_dispatch;
use std::sync::Arc;
use thiserror::Error;

/// What the accelerator will hold; tunes the build parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    /// Few, expensive primitives (whole meshes, instanced geometry).
    Instances,
    /// Many cheap primitives (individual triangles).
    Mesh,
}

/// Selects which accelerator the factory hands out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceleratorKind {
    Octree,
    Bvh,
    KdTree,
}

impl AcceleratorKind {
    pub fn name(self) -> &'static str {
        match self {
            AcceleratorKind::Octree => "octree",
            AcceleratorKind::Bvh => "bvh",
            AcceleratorKind::KdTree => "kdtree",
        }
    }
}

/// Errors for calls that reach an accelerator in the wrong state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelError {
    /// Primitives cannot be added once the accelerator is built.
    #[error("accelerator is already built")]
    AlreadyBuilt,

    /// Intersection queries require a built accelerator.
    #[error("accelerator has not been built")]
    NotBuilt,
}

/// The contract every accelerator satisfies.
#[enum_dispatch]
pub trait IntersectionAccelerator {
    /// Append a primitive to the working set. Only valid before `build`.
    fn add_primitive(&mut self, primitive: Arc<Primitives>) -> Result<(), AccelError>;

    /// Build the tree for the current working set, discarding any previous
    /// tree. Primitives with missing or non-finite bounds are skipped but
    /// keep their slot in the working set, so indices stay stable.
    fn build(&mut self, purpose: Purpose);

    fn is_built(&self) -> bool;

    /// Closest hit within `(t_min, t_max]`, or `None`. Immutable after
    /// `build`, so any number of threads may query concurrently.
    fn intersection(&self, ray: Ray, t_min: f32, t_max: f32) -> Result<Option<Hit>, AccelError>;

    /// Install a sink that receives build statistics.
    fn set_telemetry(&mut self, sink: Arc<dyn TelemetrySink>);
}

/// All accelerators the factory can hand out.
#[enum_dispatch(IntersectionAccelerator)]
pub enum Accelerator {
    Octree,
    Bvh,
    KdTree,
}

/// Create an empty accelerator of the requested kind.
pub fn make_accelerator(kind: AcceleratorKind) -> Accelerator {
    match kind {
        AcceleratorKind::Octree => Octree::default().into(),
        AcceleratorKind::Bvh => Bvh::default().into(),
        AcceleratorKind::KdTree => KdTree::default().into(),
    }
}
