use crate::{
    primitives::{Aabb, Intersect},
    ray::{Hit, Ray},
};
use glam::Vec3;

#[derive(Clone, Debug)]
pub struct Sphere {
    center: Vec3,
    radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

impl Intersect for Sphere {
    fn intersection(&self, ray: Ray, t_min: f32, t_max: f32) -> Option<Hit> {
        let oc = ray.origin - self.center;
        let a = ray.direction.dot(ray.direction);
        let b = oc.dot(ray.direction);
        let c = oc.dot(oc) - self.radius * self.radius;
        let discriminant = b * b - a * c;

        if discriminant > 0.0 {
            let t_1 = (-b - discriminant.sqrt()) / a;
            let t_2 = (-b + discriminant.sqrt()) / a;

            for &t in &[t_1, t_2] {
                if t_min < t && t <= t_max {
                    let point = ray.point_at_parameter(t);

                    return Some(Hit {
                        t,
                        point,
                        normal: (point - self.center) / self.radius,
                        material: None,
                    });
                }
            }
        }

        None
    }

    fn bounds(&self) -> Option<Aabb> {
        let bounds = Aabb::new(
            self.center - Vec3::splat(self.radius),
            self.center + Vec3::splat(self.radius),
        );
        bounds.is_valid().then_some(bounds)
    }
}
