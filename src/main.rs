use anyhow::Result;
use clap::{Parser, ValueEnum};
use glam::{vec3, Vec3};
use glint::{
    accel::AcceleratorKind,
    camera::Camera,
    material::{Dielectric, Lambertian, Materials, Metal},
    primitives::{Instance, Primitives, Sphere, Transform, Triangle, TriangleMesh},
    scene::Scene,
    settings::SettingsConfig,
    telemetry::RenderLog,
};
use rand::prelude::*;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AccelOpt {
    Octree,
    Bvh,
    KdTree,
}

impl From<AccelOpt> for AcceleratorKind {
    fn from(opt: AccelOpt) -> Self {
        match opt {
            AccelOpt::Octree => AcceleratorKind::Octree,
            AccelOpt::Bvh => AcceleratorKind::Bvh,
            AccelOpt::KdTree => AcceleratorKind::KdTree,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SceneOpt {
    /// Randomized sphere field
    Spheres,
    /// Instanced procedural triangle meshes
    Meshes,
}

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Width in pixels of the generated image
    #[clap(short, long, default_value_t = 1280)]
    width: u32,

    /// Height in pixels of the generated image
    #[clap(short = 'H', long, default_value_t = 720)]
    height: u32,

    /// Samples per pixel
    #[clap(short, long, default_value_t = 16)]
    samples: u32,

    /// Maximum ray bounces per sample
    #[clap(long, default_value_t = 64)]
    max_bounces: u32,

    /// Acceleration structure used for ray-scene intersection
    #[clap(short, long, value_enum, default_value_t = AccelOpt::Bvh)]
    accelerator: AccelOpt,

    #[clap(long, value_enum, default_value_t = SceneOpt::Spheres)]
    scene: SceneOpt,

    #[clap(short, long, default_value = "output.png")]
    output: String,
}

// Generate a semi random scene
fn spheres() -> Vec<Arc<Primitives>> {
    let mut rng = rand::thread_rng();
    let mut instances: Vec<Arc<Primitives>> = Vec::new();

    // The big sphere
    let material = Arc::new(Materials::from(Lambertian::new(vec3(0.5, 0.5, 0.5))));
    let primitive = Arc::new(Primitives::from(Sphere::new(vec3(0.0, -1000.0, 0.0), 1000.0)));
    instances.push(Arc::new(Primitives::from(Instance::new(
        primitive,
        material,
        Transform::default(),
    ))));

    let unit = Arc::new(Primitives::from(Sphere::new(Vec3::ZERO, 0.2)));
    for a in -12..12 {
        for b in -12..12 {
            let lottery = rng.gen::<f32>();
            let center = vec3(
                a as f32 + 0.9 * rng.gen::<f32>(),
                0.2,
                b as f32 + 0.9 * rng.gen::<f32>(),
            );

            if (center - vec3(4.0, 0.2, 0.0)).length() > 0.9 {
                let albedo = vec3(
                    rng.gen::<f32>() * rng.gen::<f32>(),
                    rng.gen::<f32>() * rng.gen::<f32>(),
                    rng.gen::<f32>() * rng.gen::<f32>(),
                );

                // Lambertian
                let material: Arc<Materials> = if lottery < 0.5 {
                    Arc::new(Lambertian::new(albedo).into())
                // Metal
                } else if lottery < 0.75 {
                    Arc::new(Metal::new(albedo, rng.gen::<f32>()).into())
                // Dielectric
                } else {
                    Arc::new(Dielectric::new(1.5).into())
                };

                let transform = Transform {
                    translation: center,
                    scale: 1.0,
                };
                instances.push(Arc::new(Primitives::from(Instance::new(
                    unit.clone(),
                    material,
                    transform,
                ))));
            }
        }
    }

    let material = Arc::new(Materials::from(Lambertian::new(vec3(0.6, 0.2, 0.9))));
    let primitive = Arc::new(Primitives::from(Sphere::new(vec3(-4.0, 1.0, 0.0), 1.0)));
    instances.push(Arc::new(Primitives::from(Instance::new(
        primitive,
        material,
        Transform::default(),
    ))));

    let material = Arc::new(Materials::from(Dielectric::new(1.5)));
    let primitive = Arc::new(Primitives::from(Sphere::new(vec3(0.0, 1.0, 0.0), 1.0)));
    instances.push(Arc::new(Primitives::from(Instance::new(
        primitive,
        material,
        Transform::default(),
    ))));

    let material = Arc::new(Materials::from(Metal::new(vec3(0.7, 0.6, 0.5), 0.0)));
    let primitive = Arc::new(Primitives::from(Sphere::new(vec3(4.0, 1.0, 0.0), 1.0)));
    instances.push(Arc::new(Primitives::from(Instance::new(
        primitive,
        material,
        Transform::default(),
    ))));

    instances
}

/// The twelve triangles of an axis-aligned unit cube centered on the origin.
fn cube_triangles() -> Vec<Triangle> {
    let corner = |c: usize| {
        vec3(
            if c & 1 == 0 { -0.5 } else { 0.5 },
            if c & 2 == 0 { -0.5 } else { 0.5 },
            if c & 4 == 0 { -0.5 } else { 0.5 },
        )
    };

    // two triangles per face, given by corner indices
    let faces = [
        [0, 2, 3, 0, 3, 1], // -z
        [4, 5, 7, 4, 7, 6], // +z
        [0, 4, 6, 0, 6, 2], // -x
        [1, 3, 7, 1, 7, 5], // +x
        [0, 1, 5, 0, 5, 4], // -y
        [2, 6, 7, 2, 7, 3], // +y
    ];

    faces
        .iter()
        .flat_map(|f| {
            [
                Triangle::new(corner(f[0]), corner(f[1]), corner(f[2])),
                Triangle::new(corner(f[3]), corner(f[4]), corner(f[5])),
            ]
        })
        .collect()
}

/// A field of instanced meshes: one procedurally built cube mesh shared by a
/// grid of instances, plus a ground sphere.
fn meshes(kind: AcceleratorKind, log: Arc<RenderLog>) -> Vec<Arc<Primitives>> {
    let mut rng = rand::thread_rng();
    let mesh = Arc::new(Primitives::from(TriangleMesh::with_telemetry(
        cube_triangles(),
        kind,
        log,
    )));

    let mut instances: Vec<Arc<Primitives>> = Vec::new();

    let ground = Arc::new(Materials::from(Lambertian::new(vec3(0.5, 0.5, 0.5))));
    let primitive = Arc::new(Primitives::from(Sphere::new(vec3(0.0, -1000.0, 0.0), 1000.0)));
    instances.push(Arc::new(Primitives::from(Instance::new(
        primitive,
        ground,
        Transform::default(),
    ))));

    for a in -8..=8 {
        for b in -8..=8 {
            let albedo = vec3(
                0.2 + 0.8 * rng.gen::<f32>(),
                0.2 + 0.8 * rng.gen::<f32>(),
                0.2 + 0.8 * rng.gen::<f32>(),
            );
            let material: Arc<Materials> = if rng.gen::<f32>() < 0.7 {
                Arc::new(Lambertian::new(albedo).into())
            } else {
                Arc::new(Metal::new(albedo, 0.3 * rng.gen::<f32>()).into())
            };

            let transform = Transform {
                translation: vec3(a as f32 * 1.5, 0.25, b as f32 * 1.5),
                scale: 0.5,
            };
            instances.push(Arc::new(Primitives::from(Instance::new(
                mesh.clone(),
                material,
                transform,
            ))));
        }
    }

    instances
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = SettingsConfig {
        width: args.width,
        height: args.height,
        samples: args.samples,
        max_bounces: args.max_bounces,
        accelerator: args.accelerator.into(),
        ..SettingsConfig::default()
    };

    let log = Arc::new(RenderLog::new());
    let scene_name = match args.scene {
        SceneOpt::Spheres => "spheres",
        SceneOpt::Meshes => "meshes",
    };
    log.render_begin(scene_name, settings.samples);

    println!("Loading \"{scene_name}\" scene...");
    let primitives = match args.scene {
        SceneOpt::Spheres => spheres(),
        SceneOpt::Meshes => meshes(settings.accelerator, log.clone()),
    };

    let camera = Camera::new(
        vec3(13.0, 2.0, 3.0),
        vec3(4.0, 1.0, 0.0),
        vec3(0.0, 1.0, 0.0),
        20.0,
        settings.width as f32 / settings.height as f32,
        0.1,
    );

    println!(
        "Rendering {} primitives with the {} accelerator...",
        primitives.len(),
        settings.accelerator.name()
    );
    let scene = Scene::new(settings, camera, primitives, log.clone())?;
    let image = scene.trace();

    log.print_summary();

    println!("Saving image to \"{}\"...", args.output);
    image.save(&args.output)?;

    Ok(())
}
