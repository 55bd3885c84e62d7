// Re-export glam for convenience
pub use glam::*;

// ember math types
mod aabb;
mod interval;
mod ray;
mod transform;

pub use aabb::Aabb;
pub use interval::Interval;
pub use ray::Ray;
pub use transform::Mat4Ext;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_creation() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(v.x, 1.0);
        assert_eq!(v.y, 2.0);
        assert_eq!(v.z, 3.0);
    }

    #[test]
    fn test_mat4_inverse_roundtrip() {
        let m = Mat4::from_translation(Vec3::new(3.0, -2.0, 7.0));
        let p = Vec3::new(1.0, 2.0, 3.0);
        let back = m.inverse().transform_point3(m.transform_point3(p));
        assert!((back - p).length() < 1e-5);
    }
}
