//! Top-level hierarchy over scene instances.
//!
//! Each record pairs a geometry snapshot with the instance's composed
//! transform. Rays are taken into local space with the inverse transform
//! and the direction is left unnormalized, so hit parameters are directly
//! comparable across instances in world units. Normals come back through
//! the inverse transpose.

use std::sync::Arc;

use ember_core::Sphere;
use ember_math::{Aabb, Interval, Mat4, Mat4Ext, Ray};

use crate::bvh::MeshBvh;
use crate::hittable::HitRecord;

/// Instances per leaf before splitting stops. Scenes tend to have far
/// fewer instances than meshes have polygons.
const LEAF_MAX_SIZE: usize = 2;

#[derive(Debug, Clone)]
pub enum GeometryRef {
    Mesh(Arc<MeshBvh>),
    Sphere(Sphere),
}

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub geometry: GeometryRef,
    pub forward: Mat4,
    pub inverse: Mat4,
    /// Inverse transpose, for taking normals back to world space.
    pub normal_xf: Mat4,
    pub material_set: usize,
    pub world_bounds: Aabb,
}

impl InstanceRecord {
    pub fn new(geometry: GeometryRef, forward: Mat4, material_set: usize) -> Self {
        let inverse = forward.inverse();
        let local_bounds = match &geometry {
            GeometryRef::Mesh(bvh) => *bvh.bounds(),
            GeometryRef::Sphere(sphere) => sphere.bounds(),
        };
        InstanceRecord {
            geometry,
            forward,
            inverse,
            normal_xf: inverse.transpose(),
            material_set,
            world_bounds: forward.transform_aabb(&local_bounds),
        }
    }

    fn hit(&self, ray: &Ray, ray_t: Interval) -> Option<HitRecord> {
        // Unnormalized local direction keeps t in world units.
        let local = Ray::new(
            self.inverse.transform_point3(ray.origin),
            self.inverse.transform_vector3(ray.direction),
            ray.time,
        );
        match &self.geometry {
            GeometryRef::Mesh(bvh) => {
                let mut rec = bvh.hit(&local, ray_t)?;
                rec.p = ray.at(rec.t);
                // Recover the outward local normal, then re-orient in world
                // space; transforms with negative determinant flip faces.
                let outward_local = if rec.front_face { rec.normal } else { -rec.normal };
                let outward = self.normal_xf.transform_vector3(outward_local).normalize();
                rec.set_face_normal(ray, outward);
                rec.set_idx = self.material_set;
                Some(rec)
            }
            GeometryRef::Sphere(sphere) => {
                let t = sphere.hit(&local, ray_t)?;
                let outward_local = sphere.normal_at(local.at(t));
                let (u, v) = Sphere::uv_at(outward_local);
                let mut rec = HitRecord {
                    t,
                    p: ray.at(t),
                    u,
                    v,
                    mat_idx: 0,
                    set_idx: self.material_set,
                    ..HitRecord::default()
                };
                let outward = self.normal_xf.transform_vector3(outward_local).normalize();
                rec.set_face_normal(ray, outward);
                Some(rec)
            }
        }
    }
}

#[derive(Debug)]
enum TopNode {
    Branch {
        left: Box<TopNode>,
        right: Box<TopNode>,
        bbox: Aabb,
    },
    Leaf {
        ids: Vec<usize>,
        bbox: Aabb,
    },
}

impl TopNode {
    fn bbox(&self) -> &Aabb {
        match self {
            TopNode::Branch { bbox, .. } => bbox,
            TopNode::Leaf { bbox, .. } => bbox,
        }
    }
}

/// Immutable snapshot of the scene's instances, published as an `Arc`.
/// A rebuild constructs a fresh one and swaps the scene's pointer;
/// in-flight tiles keep tracing against the snapshot they started with.
#[derive(Debug)]
pub struct TopLevel {
    records: Vec<InstanceRecord>,
    root: TopNode,
}

impl TopLevel {
    pub fn build(records: Vec<InstanceRecord>) -> Self {
        let mut items: Vec<(usize, Aabb)> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.world_bounds))
            .collect();
        let root = Self::build_node(&mut items);
        TopLevel { records, root }
    }

    fn build_node(items: &mut [(usize, Aabb)]) -> TopNode {
        let mut bbox = Aabb::EMPTY;
        for (_, b) in items.iter() {
            bbox = Aabb::surrounding(&bbox, b);
        }

        if items.len() <= LEAF_MAX_SIZE {
            return TopNode::Leaf {
                ids: items.iter().map(|(i, _)| *i).collect(),
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
        TopNode::Branch {
            left: Box::new(Self::build_node(lo)),
            right: Box::new(Self::build_node(hi)),
            bbox,
        }
    }

    pub fn instance_count(&self) -> usize {
        self.records.len()
    }

    /// Closest world-space intersection over all instances.
    pub fn hit(&self, ray: &Ray, ray_t: Interval) -> Option<HitRecord> {
        self.hit_node(&self.root, ray, ray_t)
    }

    fn hit_node(&self, node: &TopNode, ray: &Ray, ray_t: Interval) -> Option<HitRecord> {
        if !node.bbox().hit(ray, ray_t) {
            return None;
        }
        match node {
            TopNode::Leaf { ids, .. } => {
                let mut closest = ray_t.max;
                let mut best = None;
                for &id in ids {
                    if let Some(rec) =
                        self.records[id].hit(ray, Interval::new(ray_t.min, closest))
                    {
                        closest = rec.t;
                        best = Some(rec);
                    }
                }
                best
            }
            TopNode::Branch { left, right, .. } => {
                let hit_left = self.hit_node(left, ray, ray_t);
                let limit = hit_left.as_ref().map_or(ray_t.max, |r| r.t);
                let hit_right = self.hit_node(right, ray, Interval::new(ray_t.min, limit));
                hit_right.or(hit_left)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_math::Vec3;

    fn sphere_record(forward: Mat4, set: usize) -> InstanceRecord {
        InstanceRecord::new(GeometryRef::Sphere(Sphere::new(1.0)), forward, set)
    }

    #[test]
    fn test_empty_scene_misses() {
        let top = TopLevel::build(vec![]);
        let ray = Ray::new_simple(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        assert!(top.hit(&ray, Interval::new(0.001, f32::INFINITY)).is_none());
    }

    #[test]
    fn test_translated_instance() {
        let top = TopLevel::build(vec![sphere_record(
            Mat4::from_translation(Vec3::new(0.0, 0.0, 4.0)),
            3,
        )]);
        let ray = Ray::new_simple(Vec3::ZERO, Vec3::Z);
        let rec = top.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.t - 3.0).abs() < 1e-4);
        assert_eq!(rec.set_idx, 3);
        assert!((rec.normal + Vec3::Z).length() < 1e-4);
    }

    #[test]
    fn test_scaled_instance_keeps_world_t() {
        // A unit sphere scaled by 2 and placed 10 away: the world-space hit
        // distance must be 8, not the local-space 4.
        let forward = Mat4::from_translation(Vec3::new(0.0, 0.0, 10.0))
            * Mat4::from_scale(Vec3::splat(2.0));
        let top = TopLevel::build(vec![sphere_record(forward, 0)]);
        let ray = Ray::new_simple(Vec3::ZERO, Vec3::Z);
        let rec = top.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.t - 8.0).abs() < 1e-3);
    }

    #[test]
    fn test_nonuniform_scale_normal() {
        // Squash on Y; the normal at a point on the equator along X is
        // unchanged, which the inverse transpose preserves.
        let forward = Mat4::from_scale(Vec3::new(1.0, 0.5, 1.0));
        let top = TopLevel::build(vec![sphere_record(forward, 0)]);
        let ray = Ray::new_simple(Vec3::new(5.0, 0.0, 0.0), -Vec3::X);
        let rec = top.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
        assert!((rec.normal - Vec3::X).length() < 1e-4);
    }

    #[test]
    fn test_closest_instance_wins() {
        let near = sphere_record(Mat4::from_translation(Vec3::new(0.0, 0.0, 3.0)), 0);
        let far = sphere_record(Mat4::from_translation(Vec3::new(0.0, 0.0, 8.0)), 1);
        for records in [vec![near.clone(), far.clone()], vec![far, near]] {
            let top = TopLevel::build(records);
            let ray = Ray::new_simple(Vec3::ZERO, Vec3::Z);
            let rec = top.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
            assert_eq!(rec.set_idx, 0);
        }
    }

    #[test]
    fn test_many_instances_split() {
        let records: Vec<_> = (0..8)
            .map(|i| {
                sphere_record(
                    Mat4::from_translation(Vec3::new(i as f32 * 4.0, 0.0, 5.0)),
                    i,
                )
            })
            .collect();
        let top = TopLevel::build(records);
        for i in 0..8 {
            let ray = Ray::new_simple(Vec3::new(i as f32 * 4.0, 0.0, 0.0), Vec3::Z);
            let rec = top.hit(&ray, Interval::new(0.001, f32::INFINITY)).unwrap();
            assert_eq!(rec.set_idx, i, "instance {i} unreachable");
        }
    }
}
