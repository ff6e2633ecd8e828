use crate::{
    material::Materials,
    primitives::{Aabb, Intersect, Primitives},
    ray::{Hit, Ray},
};
use glam::Vec3;
use std::sync::Arc;

/// Placement of a shared primitive in the scene: a translation plus a
/// uniform scale. Rays are brought into the primitive's local frame and
/// hits mapped back out.
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub translation: Vec3,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            scale: 1.0,
        }
    }
}

pub struct Instance {
    primitive: Arc<Primitives>,
    material: Arc<Materials>,
    transform: Transform,
}

impl Instance {
    pub fn new(primitive: Arc<Primitives>, material: Arc<Materials>, transform: Transform) -> Self {
        Self {
            primitive,
            material,
            transform,
        }
    }
}

impl Intersect for Instance {
    fn intersection(&self, ray: Ray, t_min: f32, t_max: f32) -> Option<Hit> {
        let Transform { translation, scale } = self.transform;
        let local = Ray::new((ray.origin - translation) / scale, ray.direction);

        self.primitive
            .intersection(local, t_min / scale, t_max / scale)
            .map(|mut hit| {
                hit.t *= scale;
                hit.point = hit.point * scale + translation;
                hit.material = Some(Arc::clone(&self.material));
                hit
            })
    }

    fn bounds(&self) -> Option<Aabb> {
        let Transform { translation, scale } = self.transform;
        self.primitive
            .bounds()
            .map(|b| Aabb::new(b.min * scale + translation, b.max * scale + translation))
    }
}
