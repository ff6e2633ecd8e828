use crate::{
    primitives::{Aabb, Intersect},
    ray::{Hit, Ray},
};
use glam::Vec3;

#[derive(Clone, Debug)]
pub struct Triangle {
    a: Vec3,
    b: Vec3,
    c: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }
}

impl Intersect for Triangle {
    // Moeller-Trumbore
    fn intersection(&self, ray: Ray, t_min: f32, t_max: f32) -> Option<Hit> {
        let ab = self.b - self.a;
        let ac = self.c - self.a;
        let p = ray.direction.cross(ac);
        let det = ab.dot(p);
        if det.abs() < 1e-8 {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = ray.origin - self.a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(ab);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = ac.dot(q) * inv_det;
        if t_min < t && t <= t_max {
            let mut normal = ab.cross(ac).normalize();
            if normal.dot(ray.direction) > 0.0 {
                normal = -normal;
            }

            Some(Hit {
                t,
                point: ray.point_at_parameter(t),
                normal,
                material: None,
            })
        } else {
            None
        }
    }

    fn bounds(&self) -> Option<Aabb> {
        // min/max folding would silently drop non-finite vertex components
        let finite = self.a.is_finite() && self.b.is_finite() && self.c.is_finite();
        finite.then(|| {
            Aabb::EMPTY
                .point_union(self.a)
                .point_union(self.b)
                .point_union(self.c)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    #[test]
    fn hits_inside_misses_outside() {
        let tri = Triangle::new(
            vec3(-1.0, -1.0, 0.0),
            vec3(1.0, -1.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        );
        let hit = Ray::new(vec3(0.0, 0.0, 2.0), vec3(0.0, 0.0, -1.0));
        let found = tri.intersection(hit, 0.0, f32::MAX).unwrap();
        assert!((found.t - 2.0).abs() < 1e-5);

        let miss = Ray::new(vec3(0.0, 2.0, 2.0), vec3(0.0, 0.0, -1.0));
        assert!(tri.intersection(miss, 0.0, f32::MAX).is_none());
    }

    #[test]
    fn normal_faces_the_ray() {
        let tri = Triangle::new(
            vec3(-1.0, -1.0, 0.0),
            vec3(1.0, -1.0, 0.0),
            vec3(0.0, 1.0, 0.0),
        );
        let from_front = Ray::new(vec3(0.0, 0.0, 2.0), vec3(0.0, 0.0, -1.0));
        let front = tri.intersection(from_front, 0.0, f32::MAX).unwrap();
        assert!(front.normal.dot(from_front.direction) < 0.0);

        let from_behind = Ray::new(vec3(0.0, 0.0, -2.0), vec3(0.0, 0.0, 1.0));
        let back = tri.intersection(from_behind, 0.0, f32::MAX).unwrap();
        assert!(back.normal.dot(from_behind.direction) < 0.0);
    }

    #[test]
    fn non_finite_triangle_has_no_bounds() {
        let tri = Triangle::new(vec3(f32::NAN, 0.0, 0.0), Vec3::ZERO, Vec3::ONE);
        assert!(tri.bounds().is_none());
    }
}
