//! Per-mesh bounding volume hierarchy.
//!
//! A `MeshBvh` owns a snapshot of the mesh it was built from, so a tree
//! handed to render workers stays valid even if the live mesh is edited
//! and rebuilt underneath it. Swapping in a fresh tree is an `Arc`
//! replacement in the scene; readers holding the old `Arc` finish their
//! tile against the old snapshot.

use ember_core::{Mesh, MeshError};
use ember_math::{Aabb, Interval, Ray};

use crate::hittable::HitRecord;

/// Polygons per leaf before splitting stops.
const LEAF_MAX_SIZE: usize = 4;

#[derive(Debug)]
pub enum BvhNode {
    Branch {
        left: Box<BvhNode>,
        right: Box<BvhNode>,
        bbox: Aabb,
    },
    Leaf {
        polys: Vec<u32>,
        bbox: Aabb,
    },
}

impl BvhNode {
    fn bbox(&self) -> &Aabb {
        match self {
            BvhNode::Branch { bbox, .. } => bbox,
            BvhNode::Leaf { bbox, .. } => bbox,
        }
    }
}

#[derive(Debug)]
pub struct MeshBvh {
    mesh: Mesh,
    root: BvhNode,
}

impl MeshBvh {
    /// Validates the mesh and builds a median-split tree over its polygons.
    /// Consumes the mesh snapshot; the tree and its geometry live and die
    /// together.
    pub fn build(mesh: Mesh) -> Result<MeshBvh, MeshError> {
        mesh.validate()?;

        let mut items: Vec<(u32, Aabb)> = mesh
            .polygons
            .iter()
            .enumerate()
            .map(|(i, poly)| {
                let [v0, v1, v2] = mesh.triangle(poly);
                let mut bbox = Aabb::from_points(v0, v1);
                bbox.grow(v2);
                (i as u32, bbox)
            })
            .collect();

        let root = Self::build_node(&mut items);
        Ok(MeshBvh { mesh, root })
    }

    fn build_node(items: &mut [(u32, Aabb)]) -> BvhNode {
        let mut bbox = Aabb::EMPTY;
        for (_, b) in items.iter() {
            bbox = Aabb::surrounding(&bbox, b);
        }

        if items.len() <= LEAF_MAX_SIZE {
            return BvhNode::Leaf {
                polys: items.iter().map(|(i, _)| *i).collect(),
                bbox,
            };
        }

        let axis = bbox.longest_axis();
        items.sort_by(|a, b| {
            a.1.centroid()[axis]
                .partial_cmp(&b.1.centroid()[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mid = items.len() / 2;
        let (lo, hi) = items.split_at_mut(mid);
        let left = Box::new(Self::build_node(lo));
        let right = Box::new(Self::build_node(hi));
        BvhNode::Branch { left, right, bbox }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn bounds(&self) -> &Aabb {
        self.root.bbox()
    }

    /// Closest intersection in object space within `ray_t`, if any.
    pub fn hit(&self, ray: &Ray, ray_t: Interval) -> Option<HitRecord> {
        self.hit_node(&self.root, ray, ray_t)
    }

    fn hit_node(&self, node: &BvhNode, ray: &Ray, ray_t: Interval) -> Option<HitRecord> {
        if !node.bbox().hit(ray, ray_t) {
            return None;
        }
        match node {
            BvhNode::Leaf { polys, .. } => {
                let mut closest = ray_t.max;
                let mut best = None;
                for &poly in polys {
                    if let Some(rec) =
                        self.hit_polygon(poly as usize, ray, Interval::new(ray_t.min, closest))
                    {
                        closest = rec.t;
                        best = Some(rec);
                    }
                }
                best
            }
            BvhNode::Branch { left, right, .. } => {
                let hit_left = self.hit_node(left, ray, ray_t);
                let limit = hit_left.as_ref().map_or(ray_t.max, |r| r.t);
                let hit_right = self.hit_node(right, ray, Interval::new(ray_t.min, limit));
                hit_right.or(hit_left)
            }
        }
    }

    /// Moller-Trumbore intersection against one polygon.
    fn hit_polygon(&self, idx: usize, ray: &Ray, ray_t: Interval) -> Option<HitRecord> {
        let poly = &self.mesh.polygons[idx];
        let [v0, v1, v2] = self.mesh.triangle(poly);
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;

        let h = ray.direction.cross(edge2);
        let a = edge1.dot(h);
        if a.abs() < 1e-8 {
            return None;
        }

        let f = 1.0 / a;
        let s = ray.origin - v0;
        let u = f * s.dot(h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = f * ray.direction.dot(q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = f * edge2.dot(q);
        if !ray_t.surrounds(t) {
            return None;
        }

        let uv = self.mesh.texture_coord(poly, u, v);
        let mut rec = HitRecord {
            t,
            p: ray.at(t),
            u: uv.x,
            v: uv.y,
            mat_idx: poly.mat_idx,
            ..HitRecord::default()
        };
        rec.set_face_normal(ray, self.mesh.shading_normal(poly, u, v));
        Some(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{Polygon, VertexBuffer};
    use ember_math::Vec3;

    fn quad_mesh() -> Mesh {
        // Unit quad in the XY plane at z = 0, two triangles.
        let mut mesh = Mesh::new("quad");
        mesh.bind_vertex_buffer(VertexBuffer {
            vertices: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            normals: vec![],
            texture_coords: vec![],
        });
        mesh.bind_faces(vec![Polygon::flat(0, 1, 2, 0), Polygon::flat(0, 2, 3, 0)]);
        mesh
    }

    #[test]
    fn test_build_rejects_empty_mesh() {
        assert!(MeshBvh::build(Mesh::new("empty")).is_err());
    }

    #[test]
    fn test_build_rejects_out_of_range_index() {
        let mut mesh = quad_mesh();
        mesh.bind_faces(vec![Polygon::flat(0, 1, 99, 0)]);
        assert!(MeshBvh::build(mesh).is_err());
    }

    #[test]
    fn test_ray_hits_quad() {
        let bvh = MeshBvh::build(quad_mesh()).unwrap();
        let ray = Ray::new_simple(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);
        let rec = bvh.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.t - 1.0).abs() < 1e-5);
        assert!(rec.front_face);
        assert!((rec.normal.z.abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_ray_misses_outside_quad() {
        let bvh = MeshBvh::build(quad_mesh()).unwrap();
        let ray = Ray::new_simple(Vec3::new(2.0, 2.0, -1.0), Vec3::Z);
        assert!(bvh.hit(&ray, Interval::new(0.001, f32::INFINITY)).is_none());
    }

    #[test]
    fn test_closest_hit_wins() {
        // Two identical quads stacked along Z; the nearer one must win.
        let mut mesh = quad_mesh();
        let mut vbuf = mesh.vbuf.clone();
        let base = vbuf.vertices.len() as u32;
        for v in quad_mesh().vbuf.vertices {
            vbuf.vertices.push(v + Vec3::new(0.0, 0.0, 2.0));
        }
        let mut faces = mesh.polygons.clone();
        faces.push(Polygon::flat(base, base + 1, base + 2, 0));
        faces.push(Polygon::flat(base, base + 2, base + 3, 0));
        mesh.bind_vertex_buffer(vbuf);
        mesh.bind_faces(faces);

        let bvh = MeshBvh::build(mesh).unwrap();
        let ray = Ray::new_simple(Vec3::new(0.5, 0.5, -1.0), Vec3::Z);
        let rec = bvh.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.t - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_deterministic_rebuild_matches() {
        // Same geometry built twice answers fixed probe rays identically.
        let a = MeshBvh::build(quad_mesh()).unwrap();
        let b = MeshBvh::build(quad_mesh()).unwrap();
        let probes = [
            Ray::new_simple(Vec3::new(0.25, 0.25, -1.0), Vec3::Z),
            Ray::new_simple(Vec3::new(0.75, 0.75, -1.0), Vec3::Z),
            Ray::new_simple(Vec3::new(1.5, 0.5, -1.0), Vec3::Z),
        ];
        for ray in &probes {
            let ra = a.hit(ray, Interval::new(0.001, f32::INFINITY));
            let rb = b.hit(ray, Interval::new(0.001, f32::INFINITY));
            match (ra, rb) {
                (Some(x), Some(y)) => assert!((x.t - y.t).abs() < 1e-6),
                (None, None) => {}
                _ => panic!("rebuild changed visibility"),
            }
        }
    }

    #[test]
    fn test_leaf_split_on_larger_mesh() {
        // Enough polygons to force at least one branch node.
        let mut vertices = Vec::new();
        let mut faces = Vec::new();
        for i in 0..16u32 {
            let x = i as f32 * 2.0;
            let base = vertices.len() as u32;
            vertices.push(Vec3::new(x, 0.0, 0.0));
            vertices.push(Vec3::new(x + 1.0, 0.0, 0.0));
            vertices.push(Vec3::new(x, 1.0, 0.0));
            faces.push(Polygon::flat(base, base + 1, base + 2, 0));
        }
        let mut mesh = Mesh::new("strip");
        mesh.bind_vertex_buffer(VertexBuffer {
            vertices,
            normals: vec![],
            texture_coords: vec![],
        });
        mesh.bind_faces(faces);

        let bvh = MeshBvh::build(mesh).unwrap();
        assert!(matches!(bvh.root, BvhNode::Branch { .. }));
        // Every triangle is still reachable.
        for i in 0..16 {
            let x = i as f32 * 2.0 + 0.25;
            let ray = Ray::new_simple(Vec3::new(x, 0.25, -1.0), Vec3::Z);
            assert!(
                bvh.hit(&ray, Interval::new(0.001, f32::INFINITY)).is_some(),
                "triangle {i} unreachable"
            );
        }
    }
}
