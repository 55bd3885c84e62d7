//! Surface materials as a closed variant set.
//!
//! The shading- node-graph evaluator lives outside this core; what the
//! renderer needs is a small set of surface responses it can evaluate as a
//! pure function of (material, sampler state, hit point). Materials are
//! grouped into sets, and an instance binds one set by index.

use ember_math::{Ray, Vec3};
use rand::RngCore;

/// Color type alias (RGB values typically 0-1)
pub type Color = Vec3;

/// Uniform f32 in [0, 1) from any `RngCore`.
#[inline]
pub fn gen_f32(rng: &mut dyn RngCore) -> f32 {
    (rng.next_u32() >> 8) as f32 * (1.0 / (1 << 24) as f32)
}

/// A surface material.
#[derive(Debug, Clone)]
pub enum Material {
    /// Lambertian diffuse reflector.
    Diffuse { color: Color },
    /// Specular metal with a roughness-controlled fuzz lobe.
    Metal { color: Color, roughness: f32 },
    /// Dielectric with Schlick fresnel; `ior` 1.5 is ordinary glass.
    Glass { color: Color, ior: f32 },
    /// Light source; never scatters.
    Emissive { color: Color, strength: f32 },
}

impl Default for Material {
    fn default() -> Self {
        // Placeholder material for unbound slots.
        Material::Diffuse {
            color: Color::splat(0.5),
        }
    }
}

impl Material {
    /// Scatter an incoming ray at a surface point.
    ///
    /// Returns the attenuation and the scattered ray, or `None` if the ray
    /// is absorbed.
    pub fn scatter(
        &self,
        ray_in: &Ray,
        p: Vec3,
        normal: Vec3,
        front_face: bool,
        rng: &mut dyn RngCore,
    ) -> Option<(Color, Ray)> {
        match *self {
            Material::Diffuse { color } => {
                let mut dir = normal + random_unit_vector(rng);
                // Catch degenerate scatter direction
                if dir.length_squared() < 1e-8 {
                    dir = normal;
                }
                Some((color, Ray::new(p, dir, ray_in.time)))
            }
            Material::Metal { color, roughness } => {
                let reflected = reflect(ray_in.direction.normalize(), normal);
                let dir = reflected + roughness.clamp(0.0, 1.0) * random_unit_vector(rng);
                // Absorb rays fuzzed below the surface
                (dir.dot(normal) > 0.0).then(|| (color, Ray::new(p, dir, ray_in.time)))
            }
            Material::Glass { color, ior } => {
                let ratio = if front_face { 1.0 / ior } else { ior };
                let unit = ray_in.direction.normalize();
                let cos_theta = (-unit).dot(normal).min(1.0);
                let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();

                let cannot_refract = ratio * sin_theta > 1.0;
                let dir = if cannot_refract || reflectance(cos_theta, ratio) > gen_f32(rng) {
                    reflect(unit, normal)
                } else {
                    refract(unit, normal, ratio)
                };
                Some((color, Ray::new(p, dir, ray_in.time)))
            }
            Material::Emissive { .. } => None,
        }
    }

    /// Emitted radiance; black for everything but lights.
    pub fn emitted(&self) -> Color {
        match *self {
            Material::Emissive { color, strength } => color * strength,
            _ => Color::ZERO,
        }
    }
}

/// An ordered collection of materials an instance can bind.
///
/// Polygon `mat_idx` values index into the set; an out-of-range slot falls
/// back to the placeholder material instead of failing the render.
#[derive(Debug, Clone, Default)]
pub struct MaterialSet {
    materials: Vec<Material>,
    fallback: Material,
}

impl MaterialSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a material, returning its slot index.
    pub fn add(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    /// Replace the material in an existing slot. False if the slot does
    /// not exist.
    pub fn update(&mut self, slot: usize, material: Material) -> bool {
        match self.materials.get_mut(slot) {
            Some(m) => {
                *m = material;
                true
            }
            None => false,
        }
    }

    /// Material for a polygon slot, falling back to the placeholder.
    pub fn get(&self, slot: usize) -> &Material {
        self.materials.get(slot).unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

/// Reflect a vector about a normal.
#[inline]
fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - 2.0 * v.dot(n) * n
}

/// Refract a unit vector through a surface.
#[inline]
fn refract(uv: Vec3, n: Vec3, etai_over_etat: f32) -> Vec3 {
    let cos_theta = (-uv).dot(n).min(1.0);
    let r_out_perp = etai_over_etat * (uv + cos_theta * n);
    let r_out_parallel = -(1.0 - r_out_perp.length_squared()).abs().sqrt() * n;
    r_out_perp + r_out_parallel
}

/// Schlick's approximation for fresnel reflectance.
#[inline]
fn reflectance(cosine: f32, ior: f32) -> f32 {
    let r0 = ((1.0 - ior) / (1.0 + ior)).powi(2);
    r0 + (1.0 - r0) * (1.0 - cosine).powi(5)
}

/// Random unit vector via rejection sampling on the unit ball.
fn random_unit_vector(rng: &mut dyn RngCore) -> Vec3 {
    loop {
        let v = Vec3::new(
            gen_f32(rng) * 2.0 - 1.0,
            gen_f32(rng) * 2.0 - 1.0,
            gen_f32(rng) * 2.0 - 1.0,
        );
        let len_sq = v.length_squared();
        if len_sq > 1e-6 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_diffuse_scatters_into_hemisphere() {
        let mut rng = StdRng::seed_from_u64(7);
        let mat = Material::Diffuse {
            color: Color::splat(0.8),
        };
        let ray = Ray::new_simple(Vec3::new(0.0, 1.0, 0.0), -Vec3::Y);
        for _ in 0..32 {
            let (_, scattered) = mat
                .scatter(&ray, Vec3::ZERO, Vec3::Y, true, &mut rng)
                .unwrap();
            assert!(scattered.direction.dot(Vec3::Y) > -1e-6);
        }
    }

    #[test]
    fn test_emissive_absorbs() {
        let mut rng = StdRng::seed_from_u64(7);
        let mat = Material::Emissive {
            color: Color::ONE,
            strength: 4.0,
        };
        let ray = Ray::new_simple(Vec3::ZERO, Vec3::Z);
        assert!(mat
            .scatter(&ray, Vec3::ZERO, Vec3::Y, true, &mut rng)
            .is_none());
        assert_eq!(mat.emitted(), Color::splat(4.0));
    }

    #[test]
    fn test_mirror_metal_reflects() {
        let mut rng = StdRng::seed_from_u64(7);
        let mat = Material::Metal {
            color: Color::ONE,
            roughness: 0.0,
        };
        let ray = Ray::new_simple(Vec3::new(-1.0, 1.0, 0.0), Vec3::new(1.0, -1.0, 0.0));
        let (_, scattered) = mat
            .scatter(&ray, Vec3::ZERO, Vec3::Y, true, &mut rng)
            .unwrap();
        let expect = Vec3::new(1.0, 1.0, 0.0).normalize();
        assert!((scattered.direction.normalize() - expect).length() < 1e-4);
    }

    #[test]
    fn test_material_set_fallback() {
        let mut set = MaterialSet::new();
        let idx = set.add(Material::Metal {
            color: Color::ONE,
            roughness: 0.1,
        });
        assert_eq!(idx, 0);
        assert!(matches!(set.get(0), Material::Metal { .. }));
        // Out-of-range slot falls back instead of panicking.
        assert!(matches!(set.get(42), Material::Diffuse { .. }));
    }

    #[test]
    fn test_material_set_update() {
        let mut set = MaterialSet::new();
        set.add(Material::default());
        assert!(set.update(0, Material::Glass {
            color: Color::ONE,
            ior: 1.5,
        }));
        assert!(matches!(set.get(0), Material::Glass { .. }));
        assert!(!set.update(3, Material::default()));
    }
}
