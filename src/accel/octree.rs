//! Recursive octant-subdivision accelerator.

use crate::{
    accel::{AccelError, AcceleratorKind, IntersectionAccelerator, Purpose},
    primitives::{Aabb, Intersect, Primitives},
    ray::{Hit, Ray},
    telemetry::{BuildStats, TelemetrySink},
};
use std::{mem, sync::Arc, time::Instant};

struct Node {
    bbox: Aabb,
    children: Option<Box<[Node; 8]>>,
    primitives: Vec<Arc<Primitives>>,
}

impl Node {
    fn leaf(bbox: Aabb, primitives: Vec<Arc<Primitives>>) -> Self {
        Self {
            bbox,
            children: None,
            primitives,
        }
    }
}

/// Simple 8-way spatial subdivision. A primitive lands in every octant its
/// bounds overlap, so it can be referenced from several leaves; traversal
/// relies on closest-hit pruning rather than child ordering.
#[derive(Default)]
pub struct Octree {
    primitives: Vec<Arc<Primitives>>,
    root: Option<Box<Node>>,
    max_depth: u32,
    min_primitives: usize,
    node_count: u32,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl Octree {
    fn subdivide(&mut self, node: &mut Node, depth: u32) {
        if depth >= self.max_depth || node.primitives.len() <= self.min_primitives {
            return;
        }

        let mut children = Box::new(node.bbox.oct_split().map(|bbox| Node::leaf(bbox, Vec::new())));
        self.node_count += 8;

        for child in children.iter_mut() {
            for prim in &node.primitives {
                if prim.box_intersect(&child.bbox) {
                    child.primitives.push(Arc::clone(prim));
                }
            }

            // a child that absorbed every parent primitive cannot shrink
            // further; force it to a leaf to end the recursion
            let next_depth = if child.primitives.len() == node.primitives.len() {
                self.max_depth + 1
            } else {
                depth + 1
            };
            self.subdivide(child, next_depth);
        }

        node.children = Some(children);
        node.primitives.clear();
    }

    fn intersect_node(node: &Node, ray: Ray, t_min: f32, t_max: &mut f32) -> Option<Hit> {
        let mut best = None;

        match &node.children {
            None => {
                for prim in &node.primitives {
                    if let Some(hit) = prim.intersection(ray, t_min, *t_max) {
                        *t_max = hit.t;
                        best = Some(hit);
                    }
                }
            }
            Some(children) => {
                for child in children.iter() {
                    if child.bbox.has_intersection(ray, t_min, *t_max) {
                        if let Some(hit) = Self::intersect_node(child, ray, t_min, t_max) {
                            best = Some(hit);
                        }
                    }
                }
            }
        }

        best
    }

    fn report(&self, start: Instant) {
        if let Some(sink) = &self.telemetry {
            sink.accel_build(BuildStats {
                kind: AcceleratorKind::Octree,
                build_ms: start.elapsed().as_secs_f32() * 1e3,
                node_count: self.node_count,
                bytes: self.node_count as u64 * mem::size_of::<Node>() as u64
                    + self.primitives.len() as u64 * mem::size_of::<Arc<Primitives>>() as u64,
            });
        }
    }
}

impl IntersectionAccelerator for Octree {
    fn add_primitive(&mut self, primitive: Arc<Primitives>) -> Result<(), AccelError> {
        if self.is_built() {
            return Err(AccelError::AlreadyBuilt);
        }
        self.primitives.push(primitive);
        Ok(())
    }

    fn build(&mut self, purpose: Purpose) {
        match purpose {
            Purpose::Instances => {
                self.max_depth = 5;
                self.min_primitives = 4;
            }
            Purpose::Mesh => {
                self.max_depth = 35;
                self.min_primitives = 20;
            }
        }

        let start = Instant::now();
        self.node_count = 1;

        let mut bbox = Aabb::EMPTY;
        let mut in_root = Vec::with_capacity(self.primitives.len());
        for prim in &self.primitives {
            // degenerate primitives keep their slot in the working set but
            // never enter the tree
            if prim.bounds().filter(Aabb::is_valid).is_some() {
                prim.expand_box(&mut bbox);
                in_root.push(Arc::clone(prim));
            }
        }

        let mut root = Box::new(Node::leaf(bbox, in_root));
        self.subdivide(&mut root, 0);
        self.root = Some(root);
        self.report(start);
    }

    fn is_built(&self) -> bool {
        self.root.is_some()
    }

    fn intersection(&self, ray: Ray, t_min: f32, t_max: f32) -> Result<Option<Hit>, AccelError> {
        let root = self.root.as_ref().ok_or(AccelError::NotBuilt)?;
        if t_max <= t_min {
            return Ok(None);
        }

        let mut t_max = t_max;
        Ok(Self::intersect_node(root, ray, t_min, &mut t_max))
    }

    fn set_telemetry(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.telemetry = Some(sink);
    }
}
