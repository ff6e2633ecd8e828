use crate::{
    accel::{make_accelerator, Accelerator, AcceleratorKind, IntersectionAccelerator, Purpose},
    primitives::{Aabb, Intersect, Primitives, Triangle},
    ray::{Hit, Ray},
    telemetry::TelemetrySink,
};
use std::sync::Arc;

/// A triangle soup behind its own acceleration structure. A mesh is built
/// once with `Purpose::Mesh` tuning and can be shared between many
/// instances.
pub struct TriangleMesh {
    bounds: Aabb,
    accel: Accelerator,
    triangle_count: usize,
}

impl TriangleMesh {
    pub fn new(triangles: Vec<Triangle>, kind: AcceleratorKind) -> Self {
        Self::build(triangles, kind, None)
    }

    /// Like [`TriangleMesh::new`] but reports build statistics to `sink`.
    pub fn with_telemetry(
        triangles: Vec<Triangle>,
        kind: AcceleratorKind,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::build(triangles, kind, Some(sink))
    }

    fn build(
        triangles: Vec<Triangle>,
        kind: AcceleratorKind,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        let mut accel = make_accelerator(kind);
        if let Some(sink) = sink {
            accel.set_telemetry(sink);
        }

        let mut bounds = Aabb::EMPTY;
        let triangle_count = triangles.len();
        for triangle in triangles {
            let prim = Arc::new(Primitives::from(triangle));
            prim.expand_box(&mut bounds);
            accel
                .add_primitive(prim)
                .expect("mesh accelerator accepts primitives before build");
        }
        accel.build(Purpose::Mesh);

        Self {
            bounds,
            accel,
            triangle_count,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }
}

impl Intersect for TriangleMesh {
    fn intersection(&self, ray: Ray, t_min: f32, t_max: f32) -> Option<Hit> {
        // the nested accelerator is always built by the constructor
        self.accel.intersection(ray, t_min, t_max).unwrap_or(None)
    }

    fn bounds(&self) -> Option<Aabb> {
        self.bounds.is_valid().then_some(self.bounds)
    }
}
