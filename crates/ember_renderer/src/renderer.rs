//! Run-state machine and worker orchestration.
//!
//! A pass snapshots the camera and sampling settings up front; workers
//! trace against scene snapshots taken per tile, so edits made while a
//! pass runs become visible at tile granularity and structural changes
//! (resize, requantize) happen only behind full worker quiescence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ember_core::{Camera, Color};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::Error;
use crate::framebuffer::Framebuffer;
use crate::network::RemoteWorkers;
use crate::scene::Scene;
use crate::tile::{tile_quantize, Tile, TileOrder, TileSet, TileState};
use crate::worker::{render_sweep, Worker};

/// Hard cap on the bounce preference; values above this are rejected.
pub const MAX_BOUNCES: u32 = 512;

const STATUS_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Rendering,
    Paused,
    Exiting,
    Finished,
}

/// Render preferences. Unconstrained fields are plain data; constrained
/// ones go through validated setters that reject bad values and keep the
/// previous setting.
#[derive(Debug, Clone)]
pub struct Prefs {
    pub threads: u32,
    pub samples: u32,
    bounces: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_order: TileOrder,
    /// Overrides the selected camera's resolution when set.
    pub override_width: Option<u32>,
    pub override_height: Option<u32>,
    selected_camera: usize,
    pub iterative: bool,
}

impl Default for Prefs {
    fn default() -> Self {
        Prefs {
            threads: thread::available_parallelism().map_or(1, |n| n.get() as u32),
            samples: 25,
            bounces: 30,
            tile_width: 32,
            tile_height: 32,
            tile_order: TileOrder::FromMiddle,
            override_width: None,
            override_height: None,
            selected_camera: 0,
            iterative: false,
        }
    }
}

impl Prefs {
    pub fn bounces(&self) -> u32 {
        self.bounces
    }

    pub fn set_bounces(&mut self, bounces: u32) -> Result<(), Error> {
        if bounces > MAX_BOUNCES {
            return Err(Error::ConfigRejected("bounce count over the hard cap"));
        }
        self.bounces = bounces;
        Ok(())
    }

    pub fn selected_camera(&self) -> usize {
        self.selected_camera
    }
}

/// Settings frozen for the duration of one pass.
#[derive(Debug, Clone)]
struct PassConfig {
    camera: Camera,
    samples: u32,
    bounces: u32,
    started: Instant,
}

/// Periodic progress report handed to the status callback.
pub struct StatusUpdate {
    pub framebuffer: Arc<Mutex<Framebuffer>>,
    pub tiles: Vec<Tile>,
    pub active_threads: usize,
    pub samples_per_sec: f64,
    pub eta: Duration,
    /// Fraction of the current pass's tiles finished, 0..=1.
    pub completion: f32,
    pub paused: bool,
    pub finished_passes: u64,
}

type SimpleFn = Box<dyn Fn() + Send + Sync>;

/// Callback slots, all invoked from controller or worker threads. A
/// callback that blocks indefinitely stalls scheduling.
#[derive(Default)]
pub struct Callbacks {
    pub on_start: Option<SimpleFn>,
    pub on_stop: Option<SimpleFn>,
    pub on_status_update: Option<Box<dyn Fn(&StatusUpdate) + Send + Sync>>,
    pub on_state_changed: Option<Box<dyn Fn(RunState, RunState) + Send + Sync>>,
    pub on_pass_finished: Option<Box<dyn Fn(u64) + Send + Sync>>,
}

struct Shared {
    run: Mutex<RunState>,
    run_cond: Condvar,
    tiles: Mutex<TileSet>,
    framebuffer: Arc<Mutex<Framebuffer>>,
    workers: RwLock<Vec<Arc<Worker>>>,
    remotes: Mutex<RemoteWorkers>,
    pass: RwLock<PassConfig>,
    finished_passes: AtomicU64,
    paused: AtomicBool,
    callbacks: RwLock<Callbacks>,
}

pub struct Renderer {
    scene: Arc<Scene>,
    prefs: RwLock<Prefs>,
    shared: Arc<Shared>,
}

impl Renderer {
    pub fn new(scene: Arc<Scene>) -> Arc<Self> {
        Arc::new(Renderer {
            scene,
            prefs: RwLock::new(Prefs::default()),
            shared: Arc::new(Shared {
                run: Mutex::new(RunState::Idle),
                run_cond: Condvar::new(),
                tiles: Mutex::new(TileSet::default()),
                framebuffer: Arc::new(Mutex::new(Framebuffer::new(0, 0))),
                workers: RwLock::new(Vec::new()),
                remotes: Mutex::new(RemoteWorkers::new()),
                pass: RwLock::new(PassConfig {
                    camera: Camera::default(),
                    samples: 1,
                    bounces: 30,
                    started: Instant::now(),
                }),
                finished_passes: AtomicU64::new(0),
                paused: AtomicBool::new(false),
                callbacks: RwLock::new(Callbacks::default()),
            }),
        })
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    pub fn prefs(&self) -> Prefs {
        self.prefs.read().clone()
    }

    /// Edit preferences. Changes take effect at the next pass start.
    pub fn update_prefs(&self, f: impl FnOnce(&mut Prefs)) {
        f(&mut self.prefs.write());
    }

    /// Select the camera subsequent passes render through. An index the
    /// scene has no camera for is rejected and the previous selection kept.
    pub fn set_selected_camera(&self, camera: usize) -> Result<(), Error> {
        if camera >= self.scene.camera_count() {
            return Err(Error::ConfigRejected("camera index out of range"));
        }
        self.prefs.write().selected_camera = camera;
        Ok(())
    }

    pub fn set_callbacks(&self, callbacks: Callbacks) {
        *self.shared.callbacks.write() = callbacks;
    }

    pub fn run_state(&self) -> RunState {
        *self.shared.run.lock()
    }

    pub fn framebuffer(&self) -> Arc<Mutex<Framebuffer>> {
        Arc::clone(&self.shared.framebuffer)
    }

    pub fn finished_passes(&self) -> u64 {
        self.shared.finished_passes.load(Ordering::Relaxed)
    }

    pub fn remote_workers(&self) -> &Mutex<RemoteWorkers> {
        &self.shared.remotes
    }

    fn set_state(&self, new: RunState) {
        let old = {
            let mut run = self.shared.run.lock();
            let old = *run;
            *run = new;
            self.shared.run_cond.notify_all();
            old
        };
        if old != new {
            debug!("run state {old:?} -> {new:?}");
            if let Some(cb) = &self.shared.callbacks.read().on_state_changed {
                cb(old, new);
            }
        }
    }

    /// Resolution the next pass will render at: override prefs win over
    /// the selected camera.
    fn pass_resolution(&self, prefs: &Prefs, camera: &Camera) -> (u32, u32) {
        (
            prefs.override_width.unwrap_or(camera.width),
            prefs.override_height.unwrap_or(camera.height),
        )
    }

    /// Set up framebuffer, tiles, pass snapshot and worker slots for a new
    /// pass. Only called while no workers are running.
    fn begin_pass(&self, prefs: &Prefs) {
        let mut camera = match self.scene.camera(prefs.selected_camera) {
            Ok(cam) => cam,
            Err(_) => {
                warn!("no camera {} in scene, using defaults", prefs.selected_camera);
                Camera::default()
            }
        };
        let (width, height) = self.pass_resolution(prefs, &camera);
        camera.width = width;
        camera.height = height;
        camera.update();

        {
            let mut fb = self.shared.framebuffer.lock();
            if (fb.width(), fb.height()) != (width, height) {
                fb.resize(width, height);
            } else {
                fb.clear();
            }
        }

        *self.shared.tiles.lock() = TileSet::new(tile_quantize(
            width,
            height,
            prefs.tile_width,
            prefs.tile_height,
            prefs.tile_order,
        ));

        if self.scene.top_level_dirty() {
            self.scene.rebuild_top_level();
        }

        *self.shared.pass.write() = PassConfig {
            camera,
            samples: prefs.samples.max(1),
            bounces: prefs.bounces,
            started: Instant::now(),
        };
        self.shared.finished_passes.store(0, Ordering::Relaxed);
        self.shared.paused.store(false, Ordering::Relaxed);

        *self.shared.workers.write() = (0..prefs.threads)
            .map(|_| Arc::new(Worker::new()))
            .collect();

        let totals = self.scene.totals();
        info!(
            "pass start: {width}x{height}, {} tiles, {} threads, scene has {} instances",
            self.shared.tiles.lock().tiles.len(),
            prefs.threads,
            totals.instances
        );
    }

    /// Blocking one-shot render. A silent no-op when there is nothing to
    /// render with (no local threads and no connected remote workers).
    pub fn render(&self) {
        let prefs = self.prefs();
        if prefs.threads == 0 && self.shared.remotes.lock().connected() == 0 {
            info!("render requested with no workers available, nothing to do");
            return;
        }
        if !matches!(self.run_state(), RunState::Idle | RunState::Finished) {
            return;
        }

        self.begin_pass(&prefs);
        self.set_state(RunState::Rendering);
        if let Some(cb) = &self.shared.callbacks.read().on_start {
            cb();
        }

        let workers = self.shared.workers.read().clone();
        let scene: &Scene = &self.scene;
        let shared: &Shared = &self.shared;
        thread::scope(|s| {
            for worker in &workers {
                let worker = Arc::clone(worker);
                s.spawn(move || worker_loop(scene, shared, &worker, false));
            }

            let mut last_status = Instant::now();
            loop {
                thread::sleep(Duration::from_millis(10));
                if self.shared.tiles.lock().all_finished() {
                    break;
                }
                if matches!(self.run_state(), RunState::Exiting) {
                    break;
                }
                if last_status.elapsed() >= STATUS_INTERVAL {
                    self.emit_status();
                    last_status = Instant::now();
                }
            }
            // Unblock any parked worker so the scope can join; finished
            // workers already left their loop at the claim boundary.
            for worker in &workers {
                worker.gate.resume();
            }
        });

        if self.shared.tiles.lock().all_finished() {
            self.shared.finished_passes.store(1, Ordering::Relaxed);
        }
        self.emit_status();
        self.set_state(RunState::Finished);
        if let Some(cb) = &self.shared.callbacks.read().on_stop {
            cb();
        }
    }

    /// Start a progressive render and return immediately. Worker threads
    /// accumulate passes until `stop()`.
    pub fn start_interactive(self: &Arc<Self>) {
        let mut prefs = self.prefs();
        prefs.iterative = true;
        self.update_prefs(|p| p.iterative = true);

        if prefs.threads == 0 && self.shared.remotes.lock().connected() == 0 {
            info!("interactive render requested with no workers available");
            return;
        }
        if !matches!(self.run_state(), RunState::Idle | RunState::Finished) {
            return;
        }

        self.begin_pass(&prefs);
        self.set_state(RunState::Rendering);
        if let Some(cb) = &self.shared.callbacks.read().on_start {
            cb();
        }

        let this = Arc::clone(self);
        thread::spawn(move || this.interactive_loop());
    }

    fn interactive_loop(self: Arc<Self>) {
        let workers = self.shared.workers.read().clone();
        let mut handles = Vec::with_capacity(workers.len());
        for worker in &workers {
            let scene = Arc::clone(&self.scene);
            let shared = Arc::clone(&self.shared);
            let worker = Arc::clone(worker);
            handles.push(thread::spawn(move || {
                worker_loop(&scene, &shared, &worker, true)
            }));
        }

        let mut last_status = Instant::now();
        loop {
            thread::sleep(Duration::from_millis(5));

            if matches!(self.run_state(), RunState::Exiting) {
                break;
            }

            {
                let mut tiles = self.shared.tiles.lock();
                if !tiles.tiles.is_empty() && tiles.all_finished() {
                    tiles.reset();
                    drop(tiles);
                    let pass = self.shared.finished_passes.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(cb) = &self.shared.callbacks.read().on_pass_finished {
                        cb(pass);
                    }
                }
            }

            if last_status.elapsed() >= STATUS_INTERVAL {
                self.emit_status();
                last_status = Instant::now();
            }
        }

        for worker in &workers {
            worker.gate.resume();
        }
        for handle in handles {
            let _ = handle.join();
        }
        self.set_state(RunState::Finished);
        if let Some(cb) = &self.shared.callbacks.read().on_stop {
            cb();
        }
    }

    /// Request a cooperative stop. Workers exit at their next tile or
    /// sample boundary. In interactive mode this blocks until the
    /// controller confirms the stop; a renderer that never started is a
    /// no-op.
    pub fn stop(&self) {
        {
            let run = self.shared.run.lock();
            if matches!(*run, RunState::Idle | RunState::Finished) {
                return;
            }
        }
        self.set_state(RunState::Exiting);
        for worker in self.shared.workers.read().iter() {
            worker.gate.resume();
        }
        self.shared.paused.store(false, Ordering::Relaxed);

        if self.prefs.read().iterative {
            let mut run = self.shared.run.lock();
            while !matches!(*run, RunState::Finished | RunState::Idle) {
                self.shared.run_cond.wait(&mut run);
            }
        }
    }

    /// Flip the pause flag on every local worker.
    ///
    /// Remote workers keep rendering: pause is a local affordance and the
    /// network boundary deliberately does not forward it. Outside
    /// interactive mode the flags flip but scheduling is unaffected.
    pub fn toggle_pause(&self) {
        let pausing = !self.shared.paused.fetch_xor(true, Ordering::Relaxed);
        let workers = self.shared.workers.read().clone();
        let interactive = self.prefs.read().iterative;
        let active = matches!(self.run_state(), RunState::Rendering | RunState::Paused);

        if pausing {
            for worker in &workers {
                worker.gate.request_pause();
            }
            if interactive && active {
                // Block until every worker is parked; structural changes are
                // only legal after this point.
                for worker in &workers {
                    worker.gate.wait_for_ack();
                }
                self.set_state(RunState::Paused);
            }
        } else {
            for worker in &workers {
                worker.gate.resume();
            }
            if interactive && active {
                self.set_state(RunState::Rendering);
            }
        }
    }

    /// Restart an interactive render, applying any camera resolution
    /// change. Misuse (not interactive, or never started) is a no-op.
    pub fn restart_interactive(&self) {
        let prefs = self.prefs();
        if !prefs.iterative
            || !matches!(self.run_state(), RunState::Rendering | RunState::Paused)
        {
            return;
        }

        let workers = self.shared.workers.read().clone();
        // Full quiescence before touching the buffer or the tile set.
        for worker in &workers {
            worker.gate.request_pause();
        }
        for worker in &workers {
            worker.gate.wait_for_ack();
        }

        let mut camera = match self.scene.camera(prefs.selected_camera) {
            Ok(cam) => cam,
            Err(_) => Camera::default(),
        };
        let (width, height) = self.pass_resolution(&prefs, &camera);
        camera.width = width;
        camera.height = height;
        camera.update();

        {
            let mut fb = self.shared.framebuffer.lock();
            if (fb.width(), fb.height()) != (width, height) {
                info!(
                    "interactive restart: {}x{} -> {width}x{height}",
                    fb.width(),
                    fb.height()
                );
                fb.resize(width, height);
                drop(fb);
                *self.shared.tiles.lock() = TileSet::new(tile_quantize(
                    width,
                    height,
                    prefs.tile_width,
                    prefs.tile_height,
                    prefs.tile_order,
                ));
                self.scene.rebuild_top_level();
            } else {
                fb.clear();
                drop(fb);
                self.shared.tiles.lock().reset();
                if self.scene.top_level_dirty() {
                    self.scene.rebuild_top_level();
                }
            }
        }

        {
            let mut pass = self.shared.pass.write();
            pass.camera = camera;
            pass.started = Instant::now();
        }
        self.shared.finished_passes.store(0, Ordering::Relaxed);
        for worker in &workers {
            worker.samples.store(0, Ordering::Relaxed);
        }

        self.shared.paused.store(false, Ordering::Relaxed);
        for worker in &workers {
            worker.gate.resume();
        }
        if self.run_state() == RunState::Paused {
            self.set_state(RunState::Rendering);
        }
    }

    // --- network boundary hooks ---

    /// Claim the next tile on behalf of a remote peer. The tile gets its
    /// network flag so local throughput accounting can tell it apart.
    pub fn claim_for_network(&self) -> Option<Tile> {
        let mut tiles = self.shared.tiles.lock();
        let idx = tiles.claim_for_network()?;
        Some(tiles.tiles[idx])
    }

    /// Accept a finished tile from a remote peer: blit its pixels and mark
    /// the tile complete. Pixel data is row-major, tile-local.
    pub fn submit_network_result(
        &self,
        peer: usize,
        tile_index: usize,
        pixels: &[Color],
        samples: u64,
    ) {
        let tile = {
            let tiles = self.shared.tiles.lock();
            match tiles.tiles.get(tile_index) {
                Some(t) if t.network => *t,
                _ => {
                    warn!("discarding network result for unknown tile {tile_index}");
                    return;
                }
            }
        };
        if pixels.len() != (tile.width * tile.height) as usize {
            warn!("discarding malformed network result for tile {tile_index}");
            return;
        }
        self.shared
            .framebuffer
            .lock()
            .blit(tile.x, tile.y, tile.width, tile.height, pixels);
        self.shared.tiles.lock().complete(tile_index);
        self.shared.remotes.lock().record_samples(peer, samples);
    }

    // --- progress reporting ---

    fn emit_status(&self) {
        let callbacks = self.shared.callbacks.read();
        let Some(cb) = &callbacks.on_status_update else {
            return;
        };

        let (tiles, completion) = {
            let tiles = self.shared.tiles.lock();
            let total = tiles.tiles.len().max(1);
            (tiles.snapshot(), tiles.finished as f32 / total as f32)
        };
        let workers = self.shared.workers.read();
        let local_samples: u64 = workers
            .iter()
            .map(|w| w.samples.load(Ordering::Relaxed))
            .sum();
        let elapsed = self.shared.pass.read().started.elapsed();
        let samples_per_sec = if elapsed.as_secs_f64() > 0.0 {
            local_samples as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let eta = if completion > 0.0 && completion < 1.0 {
            elapsed.mul_f64(((1.0 - completion) / completion) as f64)
        } else {
            Duration::ZERO
        };

        cb(&StatusUpdate {
            framebuffer: Arc::clone(&self.shared.framebuffer),
            tiles,
            active_threads: workers.len(),
            samples_per_sec,
            eta,
            completion,
            paused: self.shared.paused.load(Ordering::Relaxed),
            finished_passes: self.shared.finished_passes.load(Ordering::Relaxed),
        });
    }
}

/// Body of one local render thread.
fn worker_loop(scene: &Scene, shared: &Shared, worker: &Worker, iterative: bool) {
    let mut rng = StdRng::from_entropy();
    loop {
        worker.gate.pause_point();
        if !matches!(*shared.run.lock(), RunState::Rendering | RunState::Paused) {
            break;
        }

        let claimed = shared.tiles.lock().claim();
        let Some(idx) = claimed else {
            if iterative {
                // Between passes; the controller resets the tile set.
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            break;
        };

        let (tile, generation) = {
            let tiles = shared.tiles.lock();
            (tiles.tiles[idx], shared.framebuffer.lock().generation())
        };
        let view = scene.trace_view();
        let pass = shared.pass.read().clone();
        let sweeps = if iterative { 1 } else { pass.samples };
        if let Some(t) = shared.tiles.lock().tiles.get_mut(idx) {
            t.total_samples = sweeps;
        }
        let mut accum = vec![Color::ZERO; (tile.width * tile.height) as usize];
        let mut done = 0u32;

        for _ in 0..sweeps {
            worker.gate.pause_point();
            if !matches!(*shared.run.lock(), RunState::Rendering | RunState::Paused) {
                break;
            }
            render_sweep(&view, &pass.camera, &tile, pass.bounces, &mut accum, &mut rng);
            done += 1;
            worker
                .samples
                .fetch_add((tile.width * tile.height) as u64, Ordering::Relaxed);
            if let Some(t) = shared.tiles.lock().tiles.get_mut(idx) {
                t.completed_samples += 1;
            }
        }

        // A restart may have swapped the buffer or reset the tile set while
        // this worker was parked. A resize bumps the generation counter; a
        // same-resolution restart leaves it alone but revokes the claim, so
        // both are checked before the stale result could land.
        let revoked = !shared
            .tiles
            .lock()
            .tiles
            .get(idx)
            .is_some_and(|t| t.state == TileState::Rendering);
        let mut fb = shared.framebuffer.lock();
        if revoked || fb.generation() != generation {
            continue;
        }
        if done > 0 {
            let inv = 1.0 / done as f32;
            if iterative {
                let pass_n = shared.finished_passes.load(Ordering::Relaxed) as u32 + 1;
                for ty in 0..tile.height {
                    for tx in 0..tile.width {
                        let c = accum[(ty * tile.width + tx) as usize] * inv;
                        fb.accumulate(tile.x + tx, tile.y + ty, c, pass_n);
                    }
                }
            } else {
                let pixels: Vec<Color> = accum.iter().map(|c| *c * inv).collect();
                fb.blit(tile.x, tile.y, tile.width, tile.height, &pixels);
            }
        }
        drop(fb);
        shared.tiles.lock().complete(idx);
    }
}
