//! ember renderer - the concurrent CPU path tracing core.
//!
//! Owns everything that moves at render time: the lock-guarded scene
//! store, per-mesh and top-level BVHs with hot swap, the bucket tile
//! scheduler, the local worker pool with its pause rendezvous, the
//! renderer run-state machine and the network dispatch boundary.

mod bvh;
mod error;
mod framebuffer;
mod hittable;
mod network;
mod renderer;
mod scene;
mod tile;
mod top_level;
mod worker;

pub use bvh::{BvhNode, MeshBvh};
pub use error::Error;
pub use framebuffer::{Framebuffer, PixelStore};
pub use hittable::HitRecord;
pub use network::{Peer, PeerState, RemoteWorkers};
pub use renderer::{
    Callbacks, Prefs, Renderer, RunState, StatusUpdate, MAX_BOUNCES,
};
pub use scene::{Instance, ObjectRef, Scene, SceneTotals, TraceView};
pub use tile::{tile_quantize, Tile, TileOrder, TileSet, TileState};
pub use top_level::{GeometryRef, InstanceRecord, TopLevel};
pub use worker::{ray_color, render_sweep, PauseGate, Worker};

/// Re-export the scene description types and common math.
pub use ember_core::{Camera, Color, Material, MaterialSet, Mesh, Orientation, Polygon, Sphere, VertexBuffer};
pub use ember_math::{Aabb, Interval, Mat4, Ray, Vec3};
