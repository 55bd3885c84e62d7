//! Mesh geometry buffers and the indexed polygon list.
//!
//! A mesh is populated through whole-buffer bind calls and validated only
//! when it is finalized for rendering; until then any index values are
//! accepted. The mesh never stores its own acceleration structure - the
//! scene store in `ember_renderer` owns that and swaps it atomically.

use ember_math::{Aabb, Vec2, Vec3};
use thiserror::Error;

/// Errors found when a mesh is validated at finalize time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MeshError {
    #[error("mesh '{0}' has no polygons or no vertices")]
    EmptyGeometry(String),
    #[error("polygon {poly} {kind} index {index} out of range ({count} in buffer)")]
    IndexOutOfRange {
        poly: usize,
        kind: &'static str,
        index: u32,
        count: usize,
    },
}

/// Vertex data buffers. The three arrays are indexed independently by the
/// polygon list, so their lengths need not match.
#[derive(Debug, Clone, Default)]
pub struct VertexBuffer {
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub texture_coords: Vec<Vec2>,
}

/// One triangle: three index triples plus a material slot within the
/// instance's bound material set.
#[derive(Debug, Clone, Copy)]
pub struct Polygon {
    pub vertex_idx: [u32; 3],
    pub normal_idx: [u32; 3],
    pub texture_idx: [u32; 3],
    pub mat_idx: u16,
    pub has_normals: bool,
}

impl Polygon {
    /// A polygon with flat shading and no UVs.
    pub fn flat(v0: u32, v1: u32, v2: u32, mat_idx: u16) -> Self {
        Self {
            vertex_idx: [v0, v1, v2],
            normal_idx: [0; 3],
            texture_idx: [0; 3],
            mat_idx,
            has_normals: false,
        }
    }
}

/// A named triangle mesh.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub name: String,
    pub vbuf: VertexBuffer,
    pub polygons: Vec<Polygon>,
}

impl Mesh {
    /// Create an empty mesh. Geometry arrives later through the bind calls.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Replace the vertex data wholesale. Bind semantics are replace, not
    /// append, so re-binding drops whatever was there before.
    pub fn bind_vertex_buffer(&mut self, vbuf: VertexBuffer) {
        self.vbuf = vbuf;
    }

    /// Replace the polygon list wholesale.
    pub fn bind_faces(&mut self, polygons: Vec<Polygon>) {
        self.polygons = polygons;
    }

    /// Check that every polygon index is valid for the current buffers.
    ///
    /// Nothing enforces this during binding; it is the finalize-time gate
    /// before an acceleration structure is built.
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.polygons.is_empty() || self.vbuf.vertices.is_empty() {
            return Err(MeshError::EmptyGeometry(self.name.clone()));
        }
        let vcount = self.vbuf.vertices.len();
        let ncount = self.vbuf.normals.len();
        let tcount = self.vbuf.texture_coords.len();
        for (p, poly) in self.polygons.iter().enumerate() {
            for i in 0..3 {
                if poly.vertex_idx[i] as usize >= vcount {
                    return Err(MeshError::IndexOutOfRange {
                        poly: p,
                        kind: "vertex",
                        index: poly.vertex_idx[i],
                        count: vcount,
                    });
                }
                if poly.has_normals && poly.normal_idx[i] as usize >= ncount {
                    return Err(MeshError::IndexOutOfRange {
                        poly: p,
                        kind: "normal",
                        index: poly.normal_idx[i],
                        count: ncount,
                    });
                }
                if tcount > 0 && poly.texture_idx[i] as usize >= tcount {
                    return Err(MeshError::IndexOutOfRange {
                        poly: p,
                        kind: "texture",
                        index: poly.texture_idx[i],
                        count: tcount,
                    });
                }
            }
        }
        Ok(())
    }

    /// Corner positions of one polygon. Only valid after `validate()`.
    pub fn triangle(&self, poly: &Polygon) -> [Vec3; 3] {
        [
            self.vbuf.vertices[poly.vertex_idx[0] as usize],
            self.vbuf.vertices[poly.vertex_idx[1] as usize],
            self.vbuf.vertices[poly.vertex_idx[2] as usize],
        ]
    }

    /// Interpolated shading normal at barycentric (u, v), or the geometric
    /// normal for polygons bound without normals.
    pub fn shading_normal(&self, poly: &Polygon, u: f32, v: f32) -> Vec3 {
        if !poly.has_normals {
            let [v0, v1, v2] = self.triangle(poly);
            return (v1 - v0).cross(v2 - v0).normalize();
        }
        let n0 = self.vbuf.normals[poly.normal_idx[0] as usize];
        let n1 = self.vbuf.normals[poly.normal_idx[1] as usize];
        let n2 = self.vbuf.normals[poly.normal_idx[2] as usize];
        ((1.0 - u - v) * n0 + u * n1 + v * n2).normalize()
    }

    /// Interpolated texture coordinate at barycentric (u, v).
    pub fn texture_coord(&self, poly: &Polygon, u: f32, v: f32) -> Vec2 {
        if self.vbuf.texture_coords.is_empty() {
            return Vec2::new(u, v);
        }
        let t0 = self.vbuf.texture_coords[poly.texture_idx[0] as usize];
        let t1 = self.vbuf.texture_coords[poly.texture_idx[1] as usize];
        let t2 = self.vbuf.texture_coords[poly.texture_idx[2] as usize];
        (1.0 - u - v) * t0 + u * t1 + v * t2
    }

    /// Local-space bounding box over all referenced vertices.
    pub fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::EMPTY;
        for poly in &self.polygons {
            for p in self.triangle(poly) {
                bounds.grow(p);
            }
        }
        bounds
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vbuf.vertices.len()
    }
}
