use crate::accel::AcceleratorKind;

/// Render settings consumed by the driver.
#[derive(Clone, Copy, Debug)]
pub struct SettingsConfig {
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub max_bounces: u32,
    pub gamma: f32,
    pub accelerator: AcceleratorKind,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            samples: 4,
            max_bounces: 64,
            gamma: 2.2,
            accelerator: AcceleratorKind::Bvh,
        }
    }
}
