//! Camera pose, optics and ray generation.
//!
//! Pose and optics fields are plain public data; after mutating any of
//! them, `update()` must be called before the camera is used for
//! sampling. The renderer calls it once per restart, embedders call it
//! after batched parameter edits.

use crate::material::gen_f32;
use ember_math::{EulerRot, Quat, Ray, Vec3};
use rand::RngCore;

/// Camera orientation as Tait-Bryan angles, in radians.
#[derive(Debug, Clone, Copy, Default)]
pub struct Orientation {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// A thin-lens pinhole camera.
#[derive(Debug, Clone)]
pub struct Camera {
    /// Horizontal field of view, degrees.
    pub fov: f32,
    /// Distance to the plane of perfect focus; 0 disables depth of field.
    pub focus_distance: f32,
    /// Aperture f-number; 0 disables depth of field.
    pub fstops: f32,
    pub width: u32,
    pub height: u32,
    /// Shutter time carried on every generated ray.
    pub time: f32,
    pub position: Vec3,
    pub orientation: Orientation,
    /// Alternate DCC coordinate convention: forward -Z, up -Y.
    pub flipped: bool,

    // Cached values, recomputed by update()
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    pixel00: Vec3,
    pixel_delta_u: Vec3,
    pixel_delta_v: Vec3,
    aperture: f32,
}

impl Default for Camera {
    fn default() -> Self {
        let mut cam = Self {
            fov: 80.0,
            focus_distance: 0.0,
            fstops: 0.0,
            width: 800,
            height: 600,
            time: 0.0,
            position: Vec3::ZERO,
            orientation: Orientation::default(),
            flipped: false,
            forward: Vec3::Z,
            right: Vec3::X,
            up: Vec3::Y,
            pixel00: Vec3::ZERO,
            pixel_delta_u: Vec3::ZERO,
            pixel_delta_v: Vec3::ZERO,
            aperture: 0.0,
        };
        cam.update();
        cam
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to the flipped coordinate convention. One-way, like the
    /// import path it serves.
    pub fn set_flipped(&mut self) {
        self.flipped = true;
    }

    /// Recompute the pose basis and the sampling grid from the public
    /// fields. Must run after any pose or optics mutation.
    pub fn update(&mut self) {
        self.update_pose();
        self.recompute_optics();
    }

    fn update_pose(&mut self) {
        let (base_forward, base_right, base_up) = if self.flipped {
            (-Vec3::Z, Vec3::X, -Vec3::Y)
        } else {
            (Vec3::Z, Vec3::X, Vec3::Y)
        };
        let o = self.orientation;
        let rot = Quat::from_euler(EulerRot::YXZ, o.yaw, o.pitch, o.roll);
        self.forward = (rot * base_forward).normalize();
        self.right = (rot * base_right).normalize();
        self.up = (rot * base_up).normalize();
    }

    fn recompute_optics(&mut self) {
        let focus = if self.focus_distance > 0.0 {
            self.focus_distance
        } else {
            1.0
        };

        // Horizontal FOV; the vertical extent follows the aspect ratio.
        let half = (self.fov.to_radians() / 2.0).tan();
        let viewport_w = 2.0 * half * focus;
        let viewport_h = viewport_w * (self.height as f32 / self.width.max(1) as f32);

        let viewport_u = self.right * viewport_w;
        let viewport_v = -self.up * viewport_h;
        self.pixel_delta_u = viewport_u / self.width.max(1) as f32;
        self.pixel_delta_v = viewport_v / self.height.max(1) as f32;

        let upper_left = self.position + self.forward * focus - viewport_u / 2.0 - viewport_v / 2.0;
        self.pixel00 = upper_left + 0.5 * (self.pixel_delta_u + self.pixel_delta_v);

        // Thin-lens aperture radius from the f-number at unit focal length.
        self.aperture = if self.fstops > 0.0 && self.focus_distance > 0.0 {
            0.5 / self.fstops
        } else {
            0.0
        };
    }

    /// Generate a jittered primary ray through pixel (x, y).
    pub fn get_ray(&self, x: u32, y: u32, rng: &mut dyn RngCore) -> Ray {
        let ox = gen_f32(rng) - 0.5;
        let oy = gen_f32(rng) - 0.5;
        let pixel = self.pixel00
            + (x as f32 + ox) * self.pixel_delta_u
            + (y as f32 + oy) * self.pixel_delta_v;

        let origin = if self.aperture <= 0.0 {
            self.position
        } else {
            let p = random_in_unit_disk(rng);
            self.position + self.aperture * (p.x * self.right + p.y * self.up)
        };

        Ray::new(origin, pixel - origin, self.time)
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }
}

/// Random point in the unit disk, rejection sampled.
fn random_in_unit_disk(rng: &mut dyn RngCore) -> Vec3 {
    loop {
        let p = Vec3::new(gen_f32(rng) * 2.0 - 1.0, gen_f32(rng) * 2.0 - 1.0, 0.0);
        if p.length_squared() < 1.0 {
            return p;
        }
    }
}
