//! Bounding volume hierarchy built from Morton-code clusters (HLBVH) with a
//! surface-area-heuristic upper tree, flattened into a linear array for
//! traversal.

use crate::{
    accel::{AccelError, AcceleratorKind, IntersectionAccelerator, Purpose},
    primitives::{Aabb, Intersect, Primitives},
    ray::{Hit, Ray},
    telemetry::{BuildStats, TelemetrySink},
};
use glam::Vec3;
use std::{mem, sync::Arc, time::Instant};

const TRAVERSAL_COST: f32 = 0.125;
const BUCKET_COUNT: usize = 12;

/// Morton codes carry 21 bits per axis, interleaved into the low 63 bits.
const MORTON_BITS: u32 = 21;
const MORTON_SCALE: f32 = (1 << MORTON_BITS) as f32;

/// Treelets are cut where the top 12 Morton bits change.
const TREELET_MASK: u64 = 0x3ffc_0000_0000_0000;

/// First Morton bit below the treelet prefix; in-treelet splits start here.
const FIRST_BIT_INDEX: i32 = 62 - 12;

const MAX_VISIT_STACK: usize = 64;

struct PrimInfo {
    /// Slot in the accelerator's working set.
    index: usize,
    bounds: Aabb,
    centroid: Vec3,
}

impl PrimInfo {
    fn new(index: usize, bounds: Aabb) -> Self {
        Self {
            index,
            bounds,
            centroid: bounds.centroid(),
        }
    }
}

#[derive(Clone, Copy)]
struct MortonPrim {
    /// Index into the build's `PrimInfo` list.
    info: usize,
    code: u64,
}

struct BuildNode {
    bounds: Aabb,
    inner: BuildInner,
}

enum BuildInner {
    Interior {
        axis: u8,
        left: Box<BuildNode>,
        right: Box<BuildNode>,
    },
    Leaf {
        first_prim: usize,
        prim_count: usize,
    },
}

impl BuildNode {
    fn leaf(bounds: Aabb, first_prim: usize, prim_count: usize) -> Self {
        Self {
            bounds,
            inner: BuildInner::Leaf {
                first_prim,
                prim_count,
            },
        }
    }

    fn interior(axis: u8, left: BuildNode, right: BuildNode) -> Self {
        Self {
            bounds: left.bounds.union(right.bounds),
            inner: BuildInner::Interior {
                axis,
                left: Box::new(left),
                right: Box::new(right),
            },
        }
    }
}

/// Packed traversal node. An interior node's first child sits at the next
/// array slot and `offset` points at its second child; a leaf uses `offset`
/// as the start of its slice of the ordered primitive array.
#[repr(C)]
#[derive(Clone, Copy)]
struct LinearNode {
    bounds: Aabb,
    offset: i32,
    prim_count: u16,
    axis: u8,
    _pad: u8,
}

const _: () = assert!(mem::size_of::<LinearNode>() == 32);

/// Spread the low 21 bits of `x` three positions apart.
fn left_shift_3(mut x: u64) -> u64 {
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}

fn encode_morton3(v: Vec3) -> u64 {
    (left_shift_3(v.z as u64) << 2) | (left_shift_3(v.y as u64) << 1) | left_shift_3(v.x as u64)
}

#[derive(Default)]
pub struct Bvh {
    primitives: Vec<Arc<Primitives>>,
    /// Leaf-order copy of the primitive references, filled during build.
    ordered: Vec<Arc<Primitives>>,
    nodes: Vec<LinearNode>,
    max_prims_per_node: usize,
    intersection_cost: f32,
    built: bool,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl Bvh {
    /// Build the subtree for one Morton cluster, splitting on successive
    /// Morton bits. Leaves take contiguous slices of the ordered primitive
    /// array.
    fn emit_treelet(
        &mut self,
        morton_prims: &[MortonPrim],
        prim_info: &[PrimInfo],
        bit_index: i32,
        total_nodes: &mut u32,
    ) -> BuildNode {
        if bit_index == -1 || morton_prims.len() < self.max_prims_per_node {
            *total_nodes += 1;
            let first_prim = self.ordered.len();
            let mut bounds = Aabb::EMPTY;
            for morton in morton_prims {
                let info = &prim_info[morton.info];
                bounds = bounds.union(info.bounds);
                self.ordered.push(Arc::clone(&self.primitives[info.index]));
            }
            return BuildNode::leaf(bounds, first_prim, morton_prims.len());
        }

        let mask = 1u64 << bit_index;

        // all primitives on the same side of this bit plane: no node, just
        // move on to the next bit
        if morton_prims[0].code & mask == morton_prims[morton_prims.len() - 1].code & mask {
            return self.emit_treelet(morton_prims, prim_info, bit_index - 1, total_nodes);
        }

        // binary search for the 0 -> 1 transition of the current bit
        let mut l = 0;
        let mut r = morton_prims.len() - 1;
        while l + 1 != r {
            let mid = (l + r) / 2;
            if morton_prims[l].code & mask == morton_prims[mid].code & mask {
                l = mid;
            } else {
                r = mid;
            }
        }

        *total_nodes += 1;
        let left = self.emit_treelet(&morton_prims[..r], prim_info, bit_index - 1, total_nodes);
        let right = self.emit_treelet(&morton_prims[r..], prim_info, bit_index - 1, total_nodes);
        BuildNode::interior((bit_index % 3) as u8, left, right)
    }

    fn report(&self, start: Instant, total_nodes: u32) {
        if let Some(sink) = &self.telemetry {
            sink.accel_build(BuildStats {
                kind: AcceleratorKind::Bvh,
                build_ms: start.elapsed().as_secs_f32() * 1e3,
                node_count: total_nodes,
                bytes: total_nodes as u64 * mem::size_of::<LinearNode>() as u64
                    + self.ordered.len() as u64 * mem::size_of::<Arc<Primitives>>() as u64,
            });
        }
    }
}

/// Combine treelet roots into a single tree, splitting each level with the
/// surface area heuristic over equal-width spatial buckets.
fn connect_treelets(
    mut roots: Vec<BuildNode>,
    intersection_cost: f32,
    total_nodes: &mut u32,
) -> BuildNode {
    if roots.len() == 1 {
        return roots.remove(0);
    }
    *total_nodes += 1;

    let bounds = roots.iter().fold(Aabb::EMPTY, |b, r| b.union(r.bounds));
    let centroid_bounds = roots
        .iter()
        .fold(Aabb::EMPTY, |b, r| b.point_union(r.bounds.centroid()));
    let dim = centroid_bounds.max_extent();

    #[derive(Clone, Copy)]
    struct Bucket {
        count: usize,
        bounds: Aabb,
    }

    let bucket_of = |node: &BuildNode| -> usize {
        let b = (BUCKET_COUNT as f32 * centroid_bounds.offset(node.bounds.centroid())[dim]) as usize;
        b.min(BUCKET_COUNT - 1)
    };

    let mut buckets = [Bucket {
        count: 0,
        bounds: Aabb::EMPTY,
    }; BUCKET_COUNT];
    for root in &roots {
        let bucket = &mut buckets[bucket_of(root)];
        bucket.count += 1;
        bucket.bounds = bucket.bounds.union(root.bounds);
    }

    let mut costs = [0.0f32; BUCKET_COUNT - 1];
    for (i, cost) in costs.iter_mut().enumerate() {
        let mut b0 = Aabb::EMPTY;
        let mut b1 = Aabb::EMPTY;
        let mut count0 = 0;
        let mut count1 = 0;
        for bucket in &buckets[..=i] {
            b0 = b0.union(bucket.bounds);
            count0 += bucket.count;
        }
        for bucket in &buckets[i + 1..] {
            b1 = b1.union(bucket.bounds);
            count1 += bucket.count;
        }
        *cost = TRAVERSAL_COST
            + intersection_cost * (count0 as f32 * b0.area() + count1 as f32 * b1.area())
                / bounds.area();
    }

    let (min_bucket, _) = costs
        .iter()
        .enumerate()
        .fold((0, f32::INFINITY), |(best, best_cost), (i, &cost)| {
            if cost < best_cost {
                (i, cost)
            } else {
                (best, best_cost)
            }
        });

    let (left, right): (Vec<_>, Vec<_>) = roots.into_iter().partition(|r| bucket_of(r) <= min_bucket);

    // degenerate bucketing (all centroids coincide) can leave a side empty;
    // fall back to an even cut so the recursion still shrinks
    let (left, right) = if left.is_empty() || right.is_empty() {
        let mut all = if left.is_empty() { right } else { left };
        let tail = all.split_off(all.len() / 2);
        (all, tail)
    } else {
        (left, right)
    };

    let child0 = connect_treelets(left, intersection_cost, total_nodes);
    let child1 = connect_treelets(right, intersection_cost, total_nodes);
    BuildNode::interior(dim as u8, child0, child1)
}

/// Emit the build tree into the linear array in depth-first pre-order.
/// Returns the index of the emitted node.
fn flatten(node: BuildNode, nodes: &mut Vec<LinearNode>) -> i32 {
    let index = nodes.len() as i32;
    match node.inner {
        BuildInner::Leaf {
            first_prim,
            prim_count,
        } => {
            nodes.push(LinearNode {
                bounds: node.bounds,
                offset: first_prim as i32,
                prim_count: prim_count as u16,
                axis: 0,
                _pad: 0,
            });
        }
        BuildInner::Interior { axis, left, right } => {
            nodes.push(LinearNode {
                bounds: node.bounds,
                offset: 0,
                prim_count: 0,
                axis,
                _pad: 0,
            });
            flatten(*left, nodes);
            let second = flatten(*right, nodes);
            nodes[index as usize].offset = second;
        }
    }
    index
}

impl IntersectionAccelerator for Bvh {
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
                self.intersection_cost = 2.0;
            }
            Purpose::Mesh => {
                self.max_prims_per_node = 4;
                self.intersection_cost = 1.0;
            }
        }

        let start = Instant::now();
        self.nodes.clear();
        self.ordered.clear();

        let prim_info: Vec<_> = self
            .primitives
            .iter()
            .enumerate()
            .filter_map(|(index, prim)| {
                // degenerate primitives keep their slot but never enter the tree
                let bounds = prim.bounds().filter(Aabb::is_valid)?;
                Some(PrimInfo::new(index, bounds))
            })
            .collect();

        if prim_info.is_empty() {
            self.built = true;
            self.report(start, 0);
            return;
        }

        // bounds of all centroids normalize the Morton grid
        let centroid_bounds = prim_info
            .iter()
            .fold(Aabb::EMPTY, |b, p| b.point_union(p.centroid));

        let mut morton_prims: Vec<_> = prim_info
            .iter()
            .enumerate()
            .map(|(info, p)| MortonPrim {
                info,
                code: encode_morton3(centroid_bounds.offset(p.centroid) * MORTON_SCALE),
            })
            .collect();
        // stable, so equal codes keep their insertion order
        morton_prims.sort_by_key(|m| m.code);

        let mut treelets = Vec::new();
        let mut cut = 0;
        for end in 1..morton_prims.len() {
            if morton_prims[cut].code & TREELET_MASK != morton_prims[end].code & TREELET_MASK {
                treelets.push(&morton_prims[cut..end]);
                cut = end;
            }
        }
        treelets.push(&morton_prims[cut..]);

        let mut total_nodes = 0;
        self.ordered.reserve(prim_info.len());
        let mut roots = Vec::with_capacity(treelets.len());
        for chunk in &treelets {
            roots.push(self.emit_treelet(chunk, &prim_info, FIRST_BIT_INDEX, &mut total_nodes));
        }

        let root = connect_treelets(roots, self.intersection_cost, &mut total_nodes);

        let mut nodes = Vec::with_capacity(total_nodes as usize);
        flatten(root, &mut nodes);
        self.nodes = nodes;
        self.built = true;
        self.report(start, total_nodes);
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

        let neg_dir = [
            ray.inv_direction.x < 0.0,
            ray.inv_direction.y < 0.0,
            ray.inv_direction.z < 0.0,
        ];

        let mut t_max = t_max;
        let mut best = None;
        let mut to_visit = [0usize; MAX_VISIT_STACK];
        let mut to_visit_len = 0;
        let mut current = 0;

        loop {
            let node = &self.nodes[current];
            if node.bounds.has_intersection(ray, t_min, t_max) {
                if node.prim_count > 0 {
                    let first = node.offset as usize;
                    for prim in &self.ordered[first..first + node.prim_count as usize] {
                        if let Some(hit) = prim.intersection(ray, t_min, t_max) {
                            t_max = hit.t;
                            best = Some(hit);
                        }
                    }
                    if to_visit_len == 0 {
                        break;
                    }
                    to_visit_len -= 1;
                    current = to_visit[to_visit_len];
                } else if neg_dir[node.axis as usize] {
                    // descending against the split axis: the second child is
                    // nearer, keep the first for later
                    to_visit[to_visit_len] = current + 1;
                    to_visit_len += 1;
                    current = node.offset as usize;
                } else {
                    to_visit[to_visit_len] = node.offset as usize;
                    to_visit_len += 1;
                    current += 1;
                }
            } else {
                if to_visit_len == 0 {
                    break;
                }
                to_visit_len -= 1;
                current = to_visit[to_visit_len];
            }
        }

        Ok(best)
    }

    fn set_telemetry(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.telemetry = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Sphere;
    use crate::DefaultRng;
    use glam::vec3;
    use rand::prelude::*;

    #[test]
    fn morton_spread_places_bits_three_apart() {
        assert_eq!(left_shift_3(0b1), 0b1);
        assert_eq!(left_shift_3(0b11), 0b1001);
        assert_eq!(left_shift_3(0b101), 0b1000001);
        // the top of the 21-bit range survives the spread
        assert_eq!(left_shift_3(1 << 20), 1 << 60);
    }

    #[test]
    fn morton_encoding_interleaves_xyz() {
        assert_eq!(encode_morton3(vec3(1.0, 0.0, 0.0)), 0b001);
        assert_eq!(encode_morton3(vec3(0.0, 1.0, 0.0)), 0b010);
        assert_eq!(encode_morton3(vec3(0.0, 0.0, 1.0)), 0b100);
        assert_eq!(encode_morton3(vec3(1.0, 1.0, 1.0)), 0b111);
        assert_eq!(encode_morton3(vec3(2.0, 0.0, 1.0)), 0b1100);
    }

    fn random_bvh(count: usize, purpose: Purpose) -> Bvh {
        let mut rng = DefaultRng::seed_from_u64(7);
        let mut bvh = Bvh::default();
        for _ in 0..count {
            let center = vec3(
                rng.gen_range(-40.0..40.0),
                rng.gen_range(-40.0..40.0),
                rng.gen_range(-40.0..40.0),
            );
            bvh.add_primitive(Arc::new(Primitives::from(Sphere::new(center, 0.4))))
                .unwrap();
        }
        bvh.build(purpose);
        bvh
    }

    /// Walk the flattened array and check the DFS layout: the first child of
    /// an interior node is the next slot and the second child's subtree
    /// starts past the first child's.
    fn check_subtree(nodes: &[LinearNode], index: usize, prims_seen: &mut usize) -> usize {
        let node = &nodes[index];
        if node.prim_count > 0 {
            *prims_seen += node.prim_count as usize;
            return index + 1;
        }

        let second = node.offset as usize;
        assert!(second > index + 1, "second child must follow the first child's subtree");
        let after_first = check_subtree(nodes, index + 1, prims_seen);
        assert_eq!(after_first, second);
        check_subtree(nodes, second, prims_seen)
    }

    #[test]
    fn flattened_layout_keeps_first_child_adjacent() {
        for purpose in [Purpose::Instances, Purpose::Mesh] {
            let bvh = random_bvh(500, purpose);
            let mut prims_seen = 0;
            let end = check_subtree(&bvh.nodes, 0, &mut prims_seen);
            assert_eq!(end, bvh.nodes.len());
            // every primitive lives in exactly one leaf slot
            assert_eq!(prims_seen, 500);
            assert_eq!(bvh.ordered.len(), 500);
        }
    }

    #[test]
    fn treelet_cuts_follow_the_top_twelve_bits() {
        let bvh = random_bvh(300, Purpose::Instances);
        let prim_info: Vec<_> = bvh
            .primitives
            .iter()
            .enumerate()
            .map(|(i, p)| PrimInfo::new(i, p.bounds().unwrap()))
            .collect();
        let centroid_bounds = prim_info
            .iter()
            .fold(Aabb::EMPTY, |b, p| b.point_union(p.centroid));

        let mut codes: Vec<_> = prim_info
            .iter()
            .map(|p| encode_morton3(centroid_bounds.offset(p.centroid) * MORTON_SCALE))
            .collect();
        codes.sort_unstable();

        // sorted codes are monotone, and every treelet boundary is a change
        // in the top 12 bits
        let mut boundaries = 0;
        for pair in codes.windows(2) {
            assert!(pair[0] <= pair[1]);
            if pair[0] & TREELET_MASK != pair[1] & TREELET_MASK {
                boundaries += 1;
            }
        }
        assert!(boundaries > 0, "expected more than one treelet for a spread-out scene");
    }

    #[test]
    fn empty_build_is_queryable() {
        let mut bvh = Bvh::default();
        bvh.build(Purpose::Instances);
        assert!(bvh.is_built());
        let ray = Ray::new(vec3(0.0, 0.0, 5.0), vec3(0.0, 0.0, -1.0));
        assert!(bvh.intersection(ray, 0.0, f32::MAX).unwrap().is_none());
    }
}
