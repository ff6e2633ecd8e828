use crate::accel::AcceleratorKind;
use std::sync::Mutex;

/// Statistics an accelerator reports after every build.
#[derive(Clone, Copy, Debug)]
pub struct BuildStats {
    pub kind: AcceleratorKind,
    pub build_ms: f32,
    pub node_count: u32,
    pub bytes: u64,
}

/// Receives build statistics from accelerators. Sinks are injected per
/// accelerator; there is no process-wide default.
pub trait TelemetrySink: Send + Sync {
    fn accel_build(&self, stats: BuildStats);
}

#[derive(Debug, Default)]
struct Entry {
    scene: String,
    samples: u32,
    accel: Option<AcceleratorKind>,
    accel_ms: f32,
    node_count: u32,
    bytes: u64,
    render_ms: f32,
}

/// Per-render log of what was built and how long everything took.
#[derive(Default)]
pub struct RenderLog {
    entries: Mutex<Vec<Entry>>,
}

impl RenderLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_begin(&self, scene: &str, samples: u32) {
        self.entries.lock().unwrap().push(Entry {
            scene: scene.to_owned(),
            samples,
            ..Entry::default()
        });
    }

    pub fn render_end(&self, render_ms: f32) {
        if let Some(entry) = self.entries.lock().unwrap().last_mut() {
            entry.render_ms = render_ms;
        }
    }

    /// Print one line per render: scene, samples, accelerator, build time,
    /// node count, memory, render and total time.
    pub fn print_summary(&self) {
        let entries = self.entries.lock().unwrap();
        println!(
            "{:<18} {:>7} {:>8} {:>10} {:>9} {:>12} {:>11} {:>10}",
            "scene", "samples", "accel", "build ms", "nodes", "bytes", "render ms", "total ms"
        );
        for entry in entries.iter() {
            println!(
                "{:<18} {:>7} {:>8} {:>10.2} {:>9} {:>12} {:>11.1} {:>10.1}",
                entry.scene,
                entry.samples,
                entry.accel.map_or("-", AcceleratorKind::name),
                entry.accel_ms,
                entry.node_count,
                entry.bytes,
                entry.render_ms,
                entry.render_ms + entry.accel_ms,
            );
        }
    }
}

impl TelemetrySink for RenderLog {
    // Fires once per accelerator build; nested mesh accelerators make this
    // several times per render, so the values accumulate.
    fn accel_build(&self, stats: BuildStats) {
        let mut entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            entries.push(Entry::default());
        }
        let entry = entries.last_mut().unwrap();
        entry.accel = Some(stats.kind);
        entry.accel_ms += stats.build_ms;
        entry.node_count += stats.node_count;
        entry.bytes += stats.bytes;
    }
}
