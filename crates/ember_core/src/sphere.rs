//! Sphere primitive, always unit-positioned at its instance origin.

use ember_math::{Aabb, Interval, Ray, Vec3};
use std::f32::consts::PI;

/// A sphere described by radius only; position and scale come from the
/// instance transform.
#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    pub radius: f32,
}

impl Sphere {
    pub fn new(radius: f32) -> Self {
        Self {
            radius: radius.max(0.0),
        }
    }

    /// Local-space bounding box.
    pub fn bounds(&self) -> Aabb {
        let r = Vec3::splat(self.radius);
        Aabb::from_points(-r, r)
    }

    /// Nearest intersection parameter within `ray_t`, if any.
    pub fn hit(&self, ray: &Ray, ray_t: Interval) -> Option<f32> {
        let oc = -ray.origin;
        let a = ray.direction.length_squared();
        let h = ray.direction.dot(oc);
        let c = oc.length_squared() - self.radius * self.radius;

        let discriminant = h * h - a * c;
        if discriminant < 0.0 {
            return None;
        }
        let sqrtd = discriminant.sqrt();

        let mut root = (h - sqrtd) / a;
        if !ray_t.surrounds(root) {
            root = (h + sqrtd) / a;
            if !ray_t.surrounds(root) {
                return None;
            }
        }
        Some(root)
    }

    /// Outward normal at a surface point.
    pub fn normal_at(&self, p: Vec3) -> Vec3 {
        p / self.radius
    }

    /// Spherical UV coordinates of an outward unit normal.
    pub fn uv_at(n: Vec3) -> (f32, f32) {
        let theta = (-n.y).acos();
        let phi = (-n.z).atan2(n.x) + PI;
        (phi / (2.0 * PI), theta / PI)
    }
}
