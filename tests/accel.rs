//! Cross-accelerator behavior: every variant must agree with a brute-force
//! scan over the primitive list, for any scene and any ray.

use glam::{vec3, Vec3};
use glint::{
    accel::{
        make_accelerator, AccelError, Accelerator, AcceleratorKind, IntersectionAccelerator,
        Purpose,
    },
    primitives::{Intersect, Primitives, Sphere, Triangle, TriangleMesh},
    ray::Ray,
    DefaultRng,
};
use rand::prelude::*;
use rayon::prelude::*;
use std::sync::Arc;

const KINDS: [AcceleratorKind; 3] = [
    AcceleratorKind::Octree,
    AcceleratorKind::Bvh,
    AcceleratorKind::KdTree,
];

const PURPOSES: [Purpose; 2] = [Purpose::Instances, Purpose::Mesh];

fn sphere(center: Vec3, radius: f32) -> Arc<Primitives> {
    Arc::new(Primitives::from(Sphere::new(center, radius)))
}

fn build(kind: AcceleratorKind, prims: &[Arc<Primitives>], purpose: Purpose) -> Accelerator {
    let mut accel = make_accelerator(kind);
    for prim in prims {
        accel.add_primitive(Arc::clone(prim)).unwrap();
    }
    accel.build(purpose);
    accel
}

/// Reference result: scan every primitive linearly.
fn brute_force(prims: &[Arc<Primitives>], ray: Ray, t_min: f32, t_max: f32) -> Option<f32> {
    let mut best = t_max;
    let mut found = false;
    for prim in prims {
        if let Some(hit) = prim.intersection(ray, t_min, best) {
            best = hit.t;
            found = true;
        }
    }
    found.then_some(best)
}

fn random_spheres(rng: &mut DefaultRng, count: usize, extent: f32, radius: f32) -> Vec<Arc<Primitives>> {
    (0..count)
        .map(|_| {
            sphere(
                vec3(
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                ),
                radius,
            )
        })
        .collect()
}

fn random_rays(rng: &mut DefaultRng, count: usize, extent: f32) -> Vec<Ray> {
    (0..count)
        .map(|_| {
            let origin = vec3(
                rng.gen_range(-extent..extent),
                rng.gen_range(-extent..extent),
                rng.gen_range(-extent..extent),
            );
            let direction = loop {
                let d = vec3(
                    rng.gen_range(-1.0..1.0f32),
                    rng.gen_range(-1.0..1.0f32),
                    rng.gen_range(-1.0..1.0f32),
                );
                if d.length_squared() > 1e-4 {
                    break d.normalize();
                }
            };
            Ray::new(origin, direction)
        })
        .collect()
}

#[test]
fn single_sphere_head_on() {
    let prims = vec![sphere(Vec3::ZERO, 1.0)];
    let ray = Ray::new(vec3(0.0, 0.0, 5.0), vec3(0.0, 0.0, -1.0));

    for kind in KINDS {
        for purpose in PURPOSES {
            let accel = build(kind, &prims, purpose);
            let hit = accel
                .intersection(ray, 0.0, f32::INFINITY)
                .unwrap()
                .unwrap_or_else(|| panic!("{} missed the sphere", kind.name()));
            assert!(
                (hit.t - 4.0).abs() < 1e-4,
                "{} hit at t={} instead of 4",
                kind.name(),
                hit.t
            );
        }
    }
}

#[test]
fn eight_corner_spheres_nearest_wins() {
    let radius = 0.5;
    let mut prims = Vec::new();
    for c in 0..8u32 {
        let corner = vec3(
            if c & 1 == 0 { -1.0 } else { 1.0 },
            if c & 2 == 0 { -1.0 } else { 1.0 },
            if c & 4 == 0 { -1.0 } else { 1.0 },
        );
        prims.push(sphere(corner, radius));
    }

    let direction = vec3(-1.0, -1.0, -1.0).normalize();
    let ray = Ray::new(vec3(2.0, 2.0, 2.0), direction);
    // nearest hit is the (+1,+1,+1) sphere, one corner-distance minus the
    // radius along the diagonal
    let expected = (vec3(2.0, 2.0, 2.0) - Vec3::ONE).length() - radius;

    for kind in KINDS {
        let accel = build(kind, &prims, Purpose::Instances);
        let hit = accel.intersection(ray, 0.0, f32::INFINITY).unwrap().unwrap();
        assert!(
            (hit.t - expected).abs() < 1e-3,
            "{}: t={} expected {}",
            kind.name(),
            hit.t,
            expected
        );
        assert!((hit.point - Vec3::ONE).length() < radius + 1e-3);
    }
}

#[test]
fn ray_away_from_scene_misses() {
    let mut prims = Vec::new();
    for c in 0..8u32 {
        let corner = vec3(
            if c & 1 == 0 { -1.0 } else { 1.0 },
            if c & 2 == 0 { -1.0 } else { 1.0 },
            if c & 4 == 0 { -1.0 } else { 1.0 },
        );
        prims.push(sphere(corner, 0.5));
    }
    let ray = Ray::new(vec3(10.0, 10.0, 10.0), vec3(1.0, 0.0, 0.0));

    for kind in KINDS {
        let accel = build(kind, &prims, Purpose::Instances);
        assert!(accel.intersection(ray, 0.0, f32::INFINITY).unwrap().is_none());
    }
}

#[test]
fn grazing_tangent_ray_misses() {
    let prims = vec![sphere(Vec3::ZERO, 1.0)];
    let ray = Ray::new(vec3(2.0, 1.0, 0.0), vec3(-1.0, 0.0, 0.0));

    for kind in KINDS {
        let accel = build(kind, &prims, Purpose::Instances);
        assert!(accel.intersection(ray, 0.0, f32::INFINITY).unwrap().is_none());
    }
}

#[test]
fn queries_outside_the_range_return_nothing() {
    let prims = vec![sphere(Vec3::ZERO, 1.0)];
    let ray = Ray::new(vec3(0.0, 0.0, 5.0), vec3(0.0, 0.0, -1.0));

    for kind in KINDS {
        let accel = build(kind, &prims, Purpose::Instances);
        // hits are at t=4 and t=6, outside all of these ranges
        assert!(accel.intersection(ray, 0.0, 2.0).unwrap().is_none());
        assert!(accel.intersection(ray, 7.0, f32::INFINITY).unwrap().is_none());
        // an empty interval never reaches a primitive
        assert!(accel.intersection(ray, 5.0, 5.0).unwrap().is_none());
        assert!(accel.intersection(ray, 3.0, 2.0).unwrap().is_none());
    }
}

#[test]
fn agrees_with_brute_force_on_small_scenes() {
    let mut rng = DefaultRng::seed_from_u64(0x01);
    let prims = random_spheres(&mut rng, 300, 20.0, 0.6);
    let rays = random_rays(&mut rng, 500, 25.0);

    for kind in KINDS {
        for purpose in PURPOSES {
            let accel = build(kind, &prims, purpose);
            for (i, &ray) in rays.iter().enumerate() {
                let expected = brute_force(&prims, ray, 0.0, f32::INFINITY);
                let got = accel
                    .intersection(ray, 0.0, f32::INFINITY)
                    .unwrap()
                    .map(|hit| hit.t);
                match (expected, got) {
                    (None, None) => {}
                    (Some(a), Some(b)) => assert!(
                        (a - b).abs() < 1e-4,
                        "{} {:?} ray {}: t {} vs {}",
                        kind.name(),
                        purpose,
                        i,
                        b,
                        a
                    ),
                    _ => panic!(
                        "{} {:?} ray {}: {:?} vs brute force {:?}",
                        kind.name(),
                        purpose,
                        i,
                        got,
                        expected
                    ),
                }
            }
        }
    }
}

#[test]
fn agrees_with_brute_force_on_a_large_scene() {
    let mut rng = DefaultRng::seed_from_u64(0x02);
    let prims = random_spheres(&mut rng, 10_000, 50.0, 0.3);
    let rays = random_rays(&mut rng, 5_000, 60.0);

    let accels: Vec<_> = KINDS
        .iter()
        .map(|&kind| build(kind, &prims, Purpose::Instances))
        .collect();

    for &ray in &rays {
        let expected = brute_force(&prims, ray, 0.0, f32::INFINITY);
        for accel in &accels {
            let got = accel
                .intersection(ray, 0.0, f32::INFINITY)
                .unwrap()
                .map(|hit| hit.t);
            match (expected, got) {
                (None, None) => {}
                (Some(a), Some(b)) => assert!((a - b).abs() < 1e-4),
                _ => panic!("{:?} vs brute force {:?}", got, expected),
            }
        }
    }
}

#[test]
fn rebuild_yields_identical_results() {
    let mut rng = DefaultRng::seed_from_u64(0x03);
    let prims = random_spheres(&mut rng, 300, 15.0, 0.5);
    let rays = random_rays(&mut rng, 200, 20.0);

    for kind in KINDS {
        let mut accel = build(kind, &prims, Purpose::Instances);
        let first: Vec<_> = rays
            .iter()
            .map(|&ray| accel.intersection(ray, 0.0, f32::INFINITY).unwrap().map(|h| h.t))
            .collect();

        accel.build(Purpose::Instances);
        let second: Vec<_> = rays
            .iter()
            .map(|&ray| accel.intersection(ray, 0.0, f32::INFINITY).unwrap().map(|h| h.t))
            .collect();

        assert_eq!(first, second, "{} rebuild diverged", kind.name());
    }
}

#[test]
fn concurrent_queries_match_sequential() {
    let mut rng = DefaultRng::seed_from_u64(0x04);
    let prims = random_spheres(&mut rng, 1_000, 30.0, 0.4);
    let rays = random_rays(&mut rng, 1_000, 35.0);

    for kind in KINDS {
        let accel = build(kind, &prims, Purpose::Instances);

        let sequential: Vec<_> = rays
            .iter()
            .map(|&ray| accel.intersection(ray, 0.0, f32::INFINITY).unwrap().map(|h| h.t))
            .collect();

        let parallel: Vec<_> = rays
            .par_iter()
            .map(|&ray| accel.intersection(ray, 0.0, f32::INFINITY).unwrap().map(|h| h.t))
            .collect();

        assert_eq!(sequential, parallel, "{} diverged under threads", kind.name());
    }
}

#[test]
fn empty_build_answers_queries() {
    let ray = Ray::new(vec3(0.0, 0.0, 5.0), vec3(0.0, 0.0, -1.0));

    for kind in KINDS {
        let mut accel = make_accelerator(kind);
        assert!(!accel.is_built());
        assert_eq!(
            accel.intersection(ray, 0.0, f32::INFINITY).unwrap_err(),
            AccelError::NotBuilt
        );

        accel.build(Purpose::Instances);
        assert!(accel.is_built(), "{} not built", kind.name());
        assert!(accel.intersection(ray, 0.0, f32::INFINITY).unwrap().is_none());

        // the working set is frozen once built
        assert_eq!(
            accel.add_primitive(sphere(Vec3::ZERO, 1.0)).unwrap_err(),
            AccelError::AlreadyBuilt
        );
    }
}

#[test]
fn degenerate_primitives_are_skipped_but_keep_indices() {
    let mut prims = vec![
        sphere(vec3(-3.0, 0.0, 0.0), 1.0),
        // non-finite center: no valid bounds, skipped at build
        sphere(vec3(f32::NAN, 0.0, 0.0), 1.0),
        sphere(vec3(3.0, 0.0, 0.0), 1.0),
    ];
    prims.push(Arc::new(Primitives::from(Triangle::new(
        vec3(f32::INFINITY, 0.0, 0.0),
        Vec3::ZERO,
        Vec3::ONE,
    ))));

    for kind in KINDS {
        let accel = build(kind, &prims, Purpose::Instances);
        let left = Ray::new(vec3(-3.0, 0.0, 5.0), vec3(0.0, 0.0, -1.0));
        let right = Ray::new(vec3(3.0, 0.0, 5.0), vec3(0.0, 0.0, -1.0));
        assert!((accel.intersection(left, 0.0, f32::INFINITY).unwrap().unwrap().t - 4.0).abs() < 1e-4);
        assert!((accel.intersection(right, 0.0, f32::INFINITY).unwrap().unwrap().t - 4.0).abs() < 1e-4);
    }
}

#[test]
fn nested_mesh_accelerators_compose() {
    for mesh_kind in KINDS {
        let mesh = TriangleMesh::new(
            vec![
                Triangle::new(vec3(-1.0, -1.0, 0.0), vec3(1.0, -1.0, 0.0), vec3(0.0, 1.0, 0.0)),
                Triangle::new(vec3(-1.0, -1.0, 3.0), vec3(1.0, -1.0, 3.0), vec3(0.0, 1.0, 3.0)),
            ],
            mesh_kind,
        );
        let prims = vec![Arc::new(Primitives::from(mesh))];

        for kind in KINDS {
            let accel = build(kind, &prims, Purpose::Instances);
            let ray = Ray::new(vec3(0.0, 0.0, 10.0), vec3(0.0, 0.0, -1.0));
            let hit = accel.intersection(ray, 0.0, f32::INFINITY).unwrap().unwrap();
            // the nearer of the two parallel triangles
            assert!((hit.t - 7.0).abs() < 1e-4, "{}: t={}", kind.name(), hit.t);
        }
    }
}
