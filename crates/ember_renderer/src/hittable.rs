use ember_math::{Ray, Vec3};

/// Result of a ray/surface intersection, already mapped into world space.
///
/// Material lookup is deferred: the record carries the polygon's material
/// slot plus the material set the owning instance is bound to, and the
/// shading loop resolves them against the scene.
#[derive(Debug, Clone, Copy)]
pub struct HitRecord {
    pub t: f32,
    pub p: Vec3,
    pub normal: Vec3,
    pub u: f32,
    pub v: f32,
    pub front_face: bool,
    pub mat_idx: u16,
    pub set_idx: usize,
}

impl HitRecord {
    /// Orients `outward_normal` against the incoming ray and records which
    /// side was hit. `outward_normal` must be unit length.
    pub fn set_face_normal(&mut self, ray: &Ray, outward_normal: Vec3) {
        self.front_face = ray.direction.dot(outward_normal) < 0.0;
        self.normal = if self.front_face {
            outward_normal
        } else {
            -outward_normal
        };
    }
}

impl Default for HitRecord {
    fn default() -> Self {
        HitRecord {
            t: 0.0,
            p: Vec3::ZERO,
            normal: Vec3::Y,
            u: 0.0,
            v: 0.0,
            front_face: true,
            mat_idx: 0,
            set_idx: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_normal_flips_against_ray() {
        let ray = Ray::new_simple(Vec3::new(0.0, 2.0, 0.0), Vec3::new(0.0, -1.0, 0.0));
        let mut rec = HitRecord::default();
        rec.set_face_normal(&ray, Vec3::Y);
        assert!(rec.front_face);
        assert_eq!(rec.normal, Vec3::Y);

        let inside = Ray::new_simple(Vec3::ZERO, Vec3::Y);
        rec.set_face_normal(&inside, Vec3::Y);
        assert!(!rec.front_face);
        assert_eq!(rec.normal, -Vec3::Y);
    }
}
