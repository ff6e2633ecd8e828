use crate::{
    accel::{make_accelerator, Accelerator, IntersectionAccelerator, Purpose},
    camera::Camera,
    material::Material,
    primitives::Primitives,
    ray::Ray,
    settings::SettingsConfig,
    telemetry::RenderLog,
    DefaultRng,
};
use anyhow::Result;
use glam::{vec3, Vec3};
use image::{save_buffer, ColorType};
use itertools::iproduct;
use rand::prelude::*;
use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Instant,
};

/// Traced image
pub struct Image {
    pub dimensions: (u32, u32),
    pub buffer: Vec<u8>,
}

impl Image {
    pub fn from(buffer: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            dimensions: (width, height),
            buffer,
        }
    }

    pub fn save(&self, path: &str) -> Result<()> {
        save_buffer(
            path,
            &self.buffer,
            self.dimensions.0,
            self.dimensions.1,
            ColorType::Rgb8,
        )?;

        Ok(())
    }
}

/// Computes the color of a pixel sample
fn color(ray: Ray, bounces: u32, max_bounces: u32, accel: &Accelerator, rng: &mut DefaultRng) -> Vec3 {
    // Max bounces
    if bounces > max_bounces {
        return Vec3::ZERO;
    }

    // If the ray trace hits something
    if let Some(hit) = accel.intersection(ray, 0.0001, f32::MAX).unwrap_or(None) {
        // The material of the object we hit decides how the ray scatters
        if let Some(scatter) = hit
            .material
            .clone()
            .and_then(|material| material.scatter(ray, hit, rng))
        {
            scatter.attenuation * color(scatter.scattered, bounces + 1, max_bounces, accel, rng)
        } else {
            // If we somehow hit something but dont scatter
            Vec3::ZERO
        }
    // Else draw the background/skybox
    } else {
        let dir = ray.direction.normalize();
        let t = 0.5 * (dir.y + 1.0);
        (1.0 - t) * vec3(1.0, 1.0, 1.0) + t * vec3(0.5, 0.7, 1.0)
    }
}

/// A Scene containing traceable objects, their materials, and the render
/// driver.
pub struct Scene {
    settings: SettingsConfig,
    camera: Camera,
    accel: Accelerator,
    log: Arc<RenderLog>,
}

impl Scene {
    pub fn new(
        settings: SettingsConfig,
        camera: Camera,
        primitives: Vec<Arc<Primitives>>,
        log: Arc<RenderLog>,
    ) -> Result<Self> {
        let mut accel = make_accelerator(settings.accelerator);
        accel.set_telemetry(log.clone());
        for primitive in primitives {
            accel.add_primitive(primitive)?;
        }
        accel.build(Purpose::Instances);

        Ok(Scene {
            settings,
            camera,
            accel,
            log,
        })
    }

    pub fn trace(&self) -> Image {
        let width = self.settings.width;
        let height = self.settings.height;
        let total = width * height;
        let progress_step = (total / 100).max(1);
        let rendered = AtomicU32::new(0);
        let start = Instant::now();

        // Cartesian product
        let pixels: Vec<_> = iproduct!(0..width, 0..height).collect();

        // Main pathtracing
        let mut pixels: Vec<_> = pixels
            .into_par_iter()
            .map_with(DefaultRng::from_entropy(), |rng, (x, y)| {
                let mut pixel = Vec3::ZERO;

                // Antialiasing via multisampling
                for _ in 0..self.settings.samples {
                    let u = (rng.gen::<f32>() + x as f32) / width as f32;
                    let v = (rng.gen::<f32>() + y as f32) / height as f32;

                    let ray = self.camera.ray(u, v, rng);
                    pixel += color(ray, 0, self.settings.max_bounces, &self.accel, rng);
                }

                // Normalize over samples
                pixel /= self.settings.samples as f32;

                // Gamma correct
                pixel = Vec3::new(
                    pixel.x.powf(1.0 / self.settings.gamma),
                    pixel.y.powf(1.0 / self.settings.gamma),
                    pixel.z.powf(1.0 / self.settings.gamma),
                );

                let completed = rendered.fetch_add(1, Ordering::Relaxed);
                if completed % progress_step == 0 {
                    print!("\r{}% ", completed * 100 / total);
                }

                // Convert from [0, 1] to [0, 255]
                ((x, y), 254.99 * pixel)
            })
            .collect();

        // Sort the pixels into scanline order, top row first
        pixels.sort_unstable_by(|((x1, y1), _), ((x2, y2), _)| {
            let a = (height - y1) * width + x1;
            let b = (height - y2) * width + x2;

            Ord::cmp(&a, &b)
        });

        // Reinterperate the pixels into the expected image format
        let buffer: Vec<_> = pixels
            .into_iter()
            .flat_map(|(_, pixel)| {
                let p: SmallVec<[u8; 3]> =
                    smallvec![pixel.x as u8, pixel.y as u8, pixel.z as u8];
                p
            })
            .collect();

        let duration = start.elapsed();
        self.log.render_end(duration.as_secs_f32() * 1e3);
        println!("\rTime elapsed: {:.2?}", duration);

        Image::from(buffer, width, height)
    }

    pub fn accelerator(&self) -> &Accelerator {
        &self.accel
    }
}
