//! Small software path tracer built around interchangeable ray-scene
//! acceleration structures (octree, BVH, K-D tree).

pub mod accel;
pub mod camera;
pub mod material;
pub mod primitives;
pub mod ray;
pub mod scene;
pub mod settings;
pub mod telemetry;

pub use crate::ray::{Hit, Ray};

/// The rng used throughout the renderer.
pub type DefaultRng = rand_xoshiro::Xoshiro256Plus;
