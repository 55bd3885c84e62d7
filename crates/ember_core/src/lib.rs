//! ember core - scene description types for the CPU path tracer.
//!
//! This crate holds the plain data half of the scene: mesh geometry
//! buffers, spheres, cameras and materials. It knows nothing about
//! threads, locks or acceleration structures; the render core in
//! `ember_renderer` owns those and stores these types inside its
//! concurrent scene store.

pub mod camera;
pub mod material;
pub mod mesh;
pub mod sphere;

// Re-export commonly used types
pub use camera::{Camera, Orientation};
pub use material::{gen_f32, Color, Material, MaterialSet};
pub use mesh::{Mesh, MeshError, Polygon, VertexBuffer};
pub use sphere::Sphere;
