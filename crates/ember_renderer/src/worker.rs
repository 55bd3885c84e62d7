//! Render worker state and the per-tile sampling kernel.
//!
//! Each local worker owns a `PauseGate`, a rendezvous the controller uses
//! to bring the thread to a known safe point before structural changes
//! (resize, tile requantize, hierarchy swap). The gate blocks the worker
//! between tiles or between sample sweeps, never mid-pixel.

use std::sync::atomic::AtomicU64;

use ember_core::{Camera, Color};
use ember_math::{Interval, Ray};
use parking_lot::{Condvar, Mutex};
use rand::RngCore;

use crate::scene::TraceView;
use crate::tile::Tile;

#[derive(Debug, Default)]
struct GateState {
    paused: bool,
    /// Worker has arrived at the gate and is parked.
    acked: bool,
}

/// Two-phase pause rendezvous.
///
/// The controller calls `request_pause` then `wait_for_ack`; once the ack
/// arrives the worker is guaranteed parked inside `pause_point` and will
/// not touch shared render state until `resume`.
#[derive(Debug, Default)]
pub struct PauseGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_pause(&self) {
        let mut state = self.state.lock();
        state.paused = true;
        self.cond.notify_all();
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        state.acked = false;
        self.cond.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Block until the worker has parked. Returns immediately if no pause
    /// is pending.
    pub fn wait_for_ack(&self) {
        let mut state = self.state.lock();
        while state.paused && !state.acked {
            self.cond.wait(&mut state);
        }
    }

    /// Worker-side checkpoint: park while a pause is requested, signalling
    /// arrival to the controller.
    pub fn pause_point(&self) {
        let mut state = self.state.lock();
        if !state.paused {
            return;
        }
        state.acked = true;
        self.cond.notify_all();
        while state.paused {
            self.cond.wait(&mut state);
        }
    }
}

/// Bookkeeping for one local render thread.
#[derive(Debug, Default)]
pub struct Worker {
    pub gate: PauseGate,
    /// Samples completed by this thread, for throughput reporting.
    pub samples: AtomicU64,
}

impl Worker {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Recursive path tracing kernel. `depth` counts remaining bounces; a ray
/// that runs out returns black.
pub fn ray_color(view: &TraceView, ray: &Ray, depth: u32, rng: &mut dyn RngCore) -> Color {
    if depth == 0 {
        return Color::ZERO;
    }

    let hit = view
        .top_level
        .as_ref()
        .and_then(|top| top.hit(ray, Interval::new(0.001, f32::INFINITY)));

    match hit {
        Some(rec) => {
            let material = view.material(rec.set_idx, rec.mat_idx);
            let emitted = material.emitted();
            match material.scatter(ray, rec.p, rec.normal, rec.front_face, rng) {
                Some((attenuation, scattered)) => {
                    emitted + attenuation * ray_color(view, &scattered, depth - 1, rng)
                }
                None => emitted,
            }
        }
        None => view.background,
    }
}

/// One sample per pixel across a tile, summed into `accum` (row-major,
/// tile-local). The caller divides by the sweep count when blitting.
pub fn render_sweep(
    view: &TraceView,
    camera: &Camera,
    tile: &Tile,
    bounces: u32,
    accum: &mut [Color],
    rng: &mut dyn RngCore,
) {
    for ty in 0..tile.height {
        for tx in 0..tile.width {
            let ray = camera.get_ray(tile.x + tx, tile.y + ty, rng);
            accum[(ty * tile.width + tx) as usize] += ray_color(view, &ray, bounces, rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{tile_quantize, TileOrder};
    use ember_math::{Ray, Vec3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn empty_view(background: Color) -> TraceView {
        TraceView {
            top_level: None,
            material_sets: vec![],
            background,
        }
    }

    #[test]
    fn test_gate_rendezvous() {
        let gate = Arc::new(PauseGate::new());
        gate.request_pause();

        let worker_gate = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            worker_gate.pause_point();
        });

        gate.wait_for_ack();
        assert!(gate.is_paused());
        gate.resume();
        handle.join().unwrap();
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_pause_point_passes_through_when_not_paused() {
        let gate = PauseGate::new();
        // Must not block.
        gate.pause_point();
        // wait_for_ack with no pause pending returns immediately too.
        gate.wait_for_ack();
    }

    #[test]
    fn test_double_resume_is_idempotent() {
        let gate = PauseGate::new();
        gate.request_pause();
        gate.resume();
        gate.resume();
        assert!(!gate.is_paused());
        gate.pause_point();
    }

    #[test]
    fn test_worker_parks_until_resume() {
        let gate = Arc::new(PauseGate::new());
        gate.request_pause();
        let worker_gate = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            worker_gate.pause_point();
            true
        });
        gate.wait_for_ack();
        // Still parked after the ack.
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        gate.resume();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_depth_zero_is_black() {
        let view = empty_view(Color::ONE);
        let mut rng = StdRng::seed_from_u64(3);
        let ray = Ray::new_simple(Vec3::ZERO, Vec3::Z);
        assert_eq!(ray_color(&view, &ray, 0, &mut rng), Color::ZERO);
    }

    #[test]
    fn test_miss_returns_background() {
        let bg = Color::new(0.2, 0.4, 0.6);
        let view = empty_view(bg);
        let mut rng = StdRng::seed_from_u64(3);
        let ray = Ray::new_simple(Vec3::ZERO, Vec3::Z);
        assert_eq!(ray_color(&view, &ray, 8, &mut rng), bg);
    }

    #[test]
    fn test_sweep_fills_whole_tile() {
        let bg = Color::splat(0.5);
        let view = empty_view(bg);
        let camera = Camera::new();
        let tile = tile_quantize(16, 16, 8, 8, TileOrder::Normal)[0];
        let mut accum = vec![Color::ZERO; (tile.width * tile.height) as usize];
        let mut rng = StdRng::seed_from_u64(3);
        render_sweep(&view, &camera, &tile, 4, &mut accum, &mut rng);
        assert!(accum.iter().all(|c| (*c - bg).length() < 1e-5));
    }
}
