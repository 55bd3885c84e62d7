// Transform utilities for Mat4.
//
// glam::Mat4 already provides transform_point3() and inverse(); this adds
// the direction and bounding-box transforms the instance layer needs.

use crate::Aabb;
use glam::{Mat4, Vec3, Vec4};

/// Extension trait adding ray-tracing transform helpers to `Mat4`.
pub trait Mat4Ext {
    /// Transform a direction (w=0): rotation and scale apply, translation
    /// does not.
    fn transform_vector3(&self, vector: Vec3) -> Vec3;

    /// Bounding box of all eight transformed corners of `aabb`.
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;
}

impl Mat4Ext for Mat4 {
    fn transform_vector3(&self, vector: Vec3) -> Vec3 {
        let v = *self * Vec4::new(vector.x, vector.y, vector.z, 0.0);
        Vec3::new(v.x, v.y, v.z)
    }

    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        let lo = aabb.min_point();
        let hi = aabb.max_point();

        let mut out = Aabb::EMPTY;
        for corner in [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ] {
            out.grow(self.transform_point3(corner));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_ignores_translation() {
        let m = Mat4::from_translation(Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(m.transform_vector3(Vec3::X), Vec3::X);
    }

    #[test]
    fn test_vector_rotates() {
        use std::f32::consts::PI;
        let m = Mat4::from_rotation_z(PI / 2.0);
        let v = m.transform_vector3(Vec3::X);
        assert!((v - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_aabb_translation() {
        let m = Mat4::from_translation(Vec3::splat(5.0));
        let aabb = Aabb::from_points(Vec3::ZERO, Vec3::ONE);
        let moved = m.transform_aabb(&aabb);
        assert!((moved.min_point() - Vec3::splat(5.0)).length() < 1e-3);
        assert!((moved.max_point() - Vec3::splat(6.0)).length() < 1e-3);
    }

    #[test]
    fn test_aabb_rotation_stays_conservative() {
        use std::f32::consts::PI;
        let m = Mat4::from_rotation_y(PI / 4.0);
        let aabb = Aabb::from_points(Vec3::splat(-1.0), Vec3::splat(1.0));
        let rotated = m.transform_aabb(&aabb);
        // Rotated cube diagonal widens the box on X and Z.
        assert!(rotated.x.size() >= aabb.x.size());
        assert!(rotated.z.size() >= aabb.z.size());
    }
}
