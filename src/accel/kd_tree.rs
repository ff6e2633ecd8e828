//! K-D tree accelerator with full surface-area-heuristic splits.

use crate::{
    accel::{AccelError, AcceleratorKind, IntersectionAccelerator, Purpose},
    primitives::{Aabb, Intersect, Primitives},
    ray::{Hit, Ray},
    telemetry::{BuildStats, TelemetrySink},
};
use std::{mem, sync::Arc, time::Instant};

const TRAVERSAL_COST: f32 = 1.0;
const EMPTY_BONUS: f32 = 0.5;
const MAX_TODO: usize = 64;

/// Packed 8-byte node. The low 2 bits of `flags` distinguish interior nodes
/// split on x/y/z (0/1/2) from leaves (3); the upper 30 bits hold the above
/// child's index for interiors and the primitive count for leaves. The
/// `split` word is the split position for interiors, while leaves reuse its
/// bits as an inline primitive index (count 1) or an offset into the leaf
/// index table.
#[derive(Clone, Copy)]
struct KdNode {
    split: f32,
    flags: u32,
}

const _: () = assert!(mem::size_of::<KdNode>() == 8);

impl KdNode {
    fn leaf(prims: &[u32], prim_indices: &mut Vec<u32>) -> Self {
        let payload = match prims {
            [] => 0,
            [one] => *one,
            _ => {
                let offset = prim_indices.len() as u32;
                prim_indices.extend_from_slice(prims);
                offset
            }
        };

        Self {
            split: f32::from_bits(payload),
            flags: 3 | ((prims.len() as u32) << 2),
        }
    }

    fn interior(axis: usize, above_child: u32, split: f32) -> Self {
        Self {
            split,
            flags: axis as u32 | (above_child << 2),
        }
    }

    fn is_leaf(&self) -> bool {
        self.flags & 3 == 3
    }

    fn split_axis(&self) -> usize {
        (self.flags & 3) as usize
    }

    fn split_pos(&self) -> f32 {
        self.split
    }

    fn prim_count(&self) -> u32 {
        self.flags >> 2
    }

    fn above_child(&self) -> u32 {
        self.flags >> 2
    }

    /// The inline primitive index of a single-primitive leaf.
    fn one_prim(&self) -> u32 {
        self.split.to_bits()
    }

    /// Offset into the leaf index table for leaves with several primitives.
    fn prim_offset(&self) -> u32 {
        self.split.to_bits()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EdgeKind {
    Start,
    End,
}

#[derive(Clone, Copy)]
struct BoundEdge {
    t: f32,
    prim: u32,
    kind: EdgeKind,
}

#[derive(Clone, Copy, Default)]
struct KdTodo {
    node: u32,
    t_min: f32,
    t_max: f32,
}

#[derive(Default)]
pub struct KdTree {
    primitives: Vec<Arc<Primitives>>,
    nodes: Vec<KdNode>,
    /// Flat index table shared by leaves holding more than one primitive.
    prim_indices: Vec<u32>,
    bounds: Aabb,
    max_prims_per_node: usize,
    intersection_cost: f32,
    built: bool,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl KdTree {
    fn build_node(
        &mut self,
        bounds: Aabb,
        prim_bounds: &[Aabb],
        prim_nums: &[u32],
        depth_left: u32,
        edges: &mut [Vec<BoundEdge>; 3],
        bad_refines: u32,
    ) {
        let my_index = self.nodes.len();

        if prim_nums.len() <= self.max_prims_per_node || depth_left == 0 {
            let node = KdNode::leaf(prim_nums, &mut self.prim_indices);
            self.nodes.push(node);
            return;
        }

        let old_cost = self.intersection_cost * prim_nums.len() as f32;
        let inv_area = 1.0 / bounds.area();
        let diag = bounds.max - bounds.min;

        let mut best_axis = None;
        let mut best_offset = 0;
        let mut best_cost = f32::INFINITY;

        // start on the widest axis; resample the others if no usable split
        // plane falls inside the node
        let mut axis = bounds.max_extent();
        for _retry in 0..3 {
            let axis_edges = &mut edges[axis];
            axis_edges.clear();
            for &pn in prim_nums {
                let b = &prim_bounds[pn as usize];
                axis_edges.push(BoundEdge {
                    t: b.min[axis],
                    prim: pn,
                    kind: EdgeKind::Start,
                });
                axis_edges.push(BoundEdge {
                    t: b.max[axis],
                    prim: pn,
                    kind: EdgeKind::End,
                });
            }

            // starting edges sort before ending edges at equal t, so a
            // primitive ending at t leaves the below set before one
            // beginning there enters it; the primitive index keeps the
            // order deterministic
            axis_edges.sort_unstable_by(|a, b| {
                a.t.total_cmp(&b.t)
                    .then_with(|| (a.kind as u8).cmp(&(b.kind as u8)))
                    .then_with(|| a.prim.cmp(&b.prim))
            });

            let mut below_count = 0usize;
            let mut above_count = prim_nums.len();
            for (i, edge) in axis_edges.iter().enumerate() {
                if edge.kind == EdgeKind::End {
                    above_count -= 1;
                }

                if edge.t > bounds.min[axis] && edge.t < bounds.max[axis] {
                    let other0 = (axis + 1) % 3;
                    let other1 = (axis + 2) % 3;
                    let below_area = 2.0
                        * (diag[other0] * diag[other1]
                            + (edge.t - bounds.min[axis]) * (diag[other0] + diag[other1]));
                    let above_area = 2.0
                        * (diag[other0] * diag[other1]
                            + (bounds.max[axis] - edge.t) * (diag[other0] + diag[other1]));

                    let below_prob = below_area * inv_area;
                    let above_prob = above_area * inv_area;
                    let bonus = if below_count == 0 || above_count == 0 {
                        EMPTY_BONUS
                    } else {
                        0.0
                    };
                    let cost = TRAVERSAL_COST
                        + self.intersection_cost
                            * (1.0 - bonus)
                            * (below_prob * below_count as f32 + above_prob * above_count as f32);

                    if cost < best_cost {
                        best_cost = cost;
                        best_axis = Some(axis);
                        best_offset = i;
                    }
                }

                if edge.kind == EdgeKind::Start {
                    below_count += 1;
                }
            }
            debug_assert!(below_count == prim_nums.len() && above_count == 0);

            if best_axis.is_some() {
                break;
            }
            axis = (axis + 1) % 3;
        }

        let mut bad_refines = bad_refines;
        if best_cost > old_cost {
            bad_refines += 1;
        }

        let give_up = (best_cost > 4.0 * old_cost && prim_nums.len() < 16) || bad_refines == 3;
        let best_axis = match best_axis {
            Some(axis) if !give_up => axis,
            _ => {
                let node = KdNode::leaf(prim_nums, &mut self.prim_indices);
                self.nodes.push(node);
                return;
            }
        };

        // classify with the edge list: starting edges left of the split go
        // below, ending edges right of it go above, so straddlers land in
        // both children
        let split_edges = &edges[best_axis];
        let t_split = split_edges[best_offset].t;

        let mut below_prims = Vec::with_capacity(prim_nums.len());
        let mut above_prims = Vec::with_capacity(prim_nums.len());
        for edge in &split_edges[..best_offset] {
            if edge.kind == EdgeKind::Start {
                below_prims.push(edge.prim);
            }
        }
        for edge in &split_edges[best_offset + 1..] {
            if edge.kind == EdgeKind::End {
                above_prims.push(edge.prim);
            }
        }

        let mut below_bounds = bounds;
        let mut above_bounds = bounds;
        below_bounds.max[best_axis] = t_split;
        above_bounds.min[best_axis] = t_split;

        // reserve this node's slot; the below child fills the very next one
        self.nodes.push(KdNode::leaf(&[], &mut self.prim_indices));
        self.build_node(
            below_bounds,
            prim_bounds,
            &below_prims,
            depth_left - 1,
            edges,
            bad_refines,
        );

        let above_child = self.nodes.len() as u32;
        self.nodes[my_index] = KdNode::interior(best_axis, above_child, t_split);
        self.build_node(
            above_bounds,
            prim_bounds,
            &above_prims,
            depth_left - 1,
            edges,
            bad_refines,
        );
    }

    fn report(&self, start: Instant) {
        if let Some(sink) = &self.telemetry {
            sink.accel_build(BuildStats {
                kind: AcceleratorKind::KdTree,
                build_ms: start.elapsed().as_secs_f32() * 1e3,
                node_count: self.nodes.len() as u32,
                bytes: self.nodes.len() as u64 * mem::size_of::<KdNode>() as u64
                    + self.prim_indices.len() as u64 * mem::size_of::<u32>() as u64
                    + self.primitives.len() as u64 * mem::size_of::<Arc<Primitives>>() as u64,
            });
        }
    }
}

impl IntersectionAccelerator for KdTree {
    fn add_primitive(&mut self, primitive: Arc<Primitives>) -> Result<(), AccelError> {
        if self.built {
            return Err(AccelError::AlreadyBuilt);
        }
        self.primitives.push(primitive);
        Ok(())
    }

    fn build(&mut self, purpose: Purpose) {
        match purpose {
            Purpose::Instances => {
                self.max_prims_per_node = 1;
                self.intersection_cost = 160.0;
            }
            Purpose::Mesh => {
                self.max_prims_per_node = 4;
                self.intersection_cost = 80.0;
            }
        }

        let start = Instant::now();
        self.nodes.clear();
        self.prim_indices.clear();
        self.bounds = Aabb::EMPTY;

        let max_depth = (8.0 + 1.3 * (self.primitives.len().max(1) as f32).log2()).round() as u32;

        let mut prim_bounds = vec![Aabb::EMPTY; self.primitives.len()];
        let mut prim_nums = Vec::with_capacity(self.primitives.len());
        for (i, prim) in self.primitives.iter().enumerate() {
            // degenerate primitives keep their slot but never enter the tree
            let Some(bounds) = prim.bounds().filter(Aabb::is_valid) else {
                continue;
            };
            self.bounds = self.bounds.union(bounds);
            prim_bounds[i] = bounds;
            prim_nums.push(i as u32);
        }

        let mut edges: [Vec<BoundEdge>; 3] = [
            Vec::with_capacity(2 * prim_nums.len()),
            Vec::with_capacity(2 * prim_nums.len()),
            Vec::with_capacity(2 * prim_nums.len()),
        ];

        let root_bounds = self.bounds;
        self.build_node(root_bounds, &prim_bounds, &prim_nums, max_depth, &mut edges, 0);
        self.built = true;
        self.report(start);
    }

    fn is_built(&self) -> bool {
        self.built
    }

    fn intersection(&self, ray: Ray, t_min: f32, t_max: f32) -> Result<Option<Hit>, AccelError> {
        if !self.built {
            return Err(AccelError::NotBuilt);
        }
        if self.nodes.is_empty() || t_max <= t_min {
            return Ok(None);
        }

        // parametric range of the ray inside the tree's bounds
        let Some((mut t_min_cell, mut t_max_cell)) = self.bounds.intersect_p(ray, t_min, t_max)
        else {
            return Ok(None);
        };

        let mut todo = [KdTodo::default(); MAX_TODO];
        let mut todo_len = 0;
        let mut node_index = 0usize;
        let mut best: Option<Hit> = None;
        // primitives are always tested against the original lower bound and
        // the closest hit found so far
        let mut prim_t_max = t_max;

        loop {
            // a confirmed hit closer than the rest of the tree ends the walk
            if prim_t_max < t_min_cell {
                break;
            }

            let node = self.nodes[node_index];
            if !node.is_leaf() {
                let axis = node.split_axis();
                let t_plane = (node.split_pos() - ray.origin[axis]) * ray.inv_direction[axis];

                let below_first = ray.origin[axis] < node.split_pos()
                    || (ray.origin[axis] == node.split_pos() && ray.direction[axis] <= 0.0);
                let (first, second) = if below_first {
                    (node_index + 1, node.above_child() as usize)
                } else {
                    (node.above_child() as usize, node_index + 1)
                };

                if t_plane > t_max_cell || t_plane <= 0.0 {
                    node_index = first;
                } else if t_plane < t_min_cell {
                    node_index = second;
                } else {
                    todo[todo_len] = KdTodo {
                        node: second as u32,
                        t_min: t_plane,
                        t_max: t_max_cell,
                    };
                    todo_len += 1;
                    node_index = first;
                    t_max_cell = t_plane;
                }
            } else {
                match node.prim_count() {
                    0 => {}
                    1 => {
                        let prim = &self.primitives[node.one_prim() as usize];
                        if let Some(hit) = prim.intersection(ray, t_min, prim_t_max) {
                            prim_t_max = hit.t;
                            best = Some(hit);
                        }
                    }
                    count => {
                        let offset = node.prim_offset() as usize;
                        for &index in &self.prim_indices[offset..offset + count as usize] {
                            let prim = &self.primitives[index as usize];
                            if let Some(hit) = prim.intersection(ray, t_min, prim_t_max) {
                                prim_t_max = hit.t;
                                best = Some(hit);
                            }
                        }
                    }
                }

                if todo_len == 0 {
                    break;
                }
                todo_len -= 1;
                let next = todo[todo_len];
                node_index = next.node as usize;
                t_min_cell = next.t_min;
                t_max_cell = next.t_max;
            }
        }

        Ok(best)
    }

    fn set_telemetry(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.telemetry = Some(sink);
    }
}
