//! Concurrent scene store.
//!
//! Collections live behind individual reader-writer locks so interactive
//! edits and render workers interleave without a global stall. Anything a
//! worker traces against is an `Arc` snapshot: editing swaps pointers,
//! never mutates data a tile in flight can see.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ember_core::{Camera, Color, Material, MaterialSet, Mesh, Polygon, Sphere, VertexBuffer};
use ember_math::Mat4;
use log::{debug, warn};
use parking_lot::RwLock;

use crate::bvh::MeshBvh;
use crate::error::Error;
use crate::top_level::{GeometryRef, InstanceRecord, TopLevel};

/// Geometry an instance points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    Mesh(usize),
    Sphere(usize),
}

/// A placement of one object in the world with a bound material set.
#[derive(Debug, Clone, Copy)]
pub struct Instance {
    pub object: ObjectRef,
    pub transform: Mat4,
    pub material_set: usize,
}

#[derive(Debug)]
struct MeshEntry {
    mesh: Mesh,
    /// Built on finalize; `None` means the mesh is not yet renderable.
    bvh: Option<Arc<MeshBvh>>,
}

/// Counts reported to status callbacks and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneTotals {
    pub meshes: usize,
    pub spheres: usize,
    pub instances: usize,
    pub cameras: usize,
    pub polygons: usize,
    pub vertices: usize,
}

#[derive(Debug, Default)]
pub struct Scene {
    meshes: RwLock<Vec<MeshEntry>>,
    spheres: RwLock<Vec<Sphere>>,
    instances: RwLock<Vec<Instance>>,
    cameras: RwLock<Vec<Camera>>,
    material_sets: RwLock<Vec<Arc<MaterialSet>>>,
    background: RwLock<Color>,
    top_level: RwLock<Option<Arc<TopLevel>>>,
    top_level_dirty: AtomicBool,
}

impl Scene {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // --- meshes ---

    pub fn add_mesh(&self, name: impl Into<String>) -> usize {
        let mut meshes = self.meshes.write();
        meshes.push(MeshEntry {
            mesh: Mesh::new(name),
            bvh: None,
        });
        meshes.len() - 1
    }

    /// Handle of the first mesh with this name, if any.
    pub fn mesh_by_name(&self, name: &str) -> Option<usize> {
        self.meshes.read().iter().position(|e| e.mesh.name == name)
    }

    pub fn mesh_bind_vertices(&self, mesh: usize, vbuf: VertexBuffer) -> Result<(), Error> {
        let mut meshes = self.meshes.write();
        let entry = meshes.get_mut(mesh).ok_or(Error::handle("mesh", mesh))?;
        entry.mesh.bind_vertex_buffer(vbuf);
        Ok(())
    }

    pub fn mesh_bind_faces(&self, mesh: usize, polygons: Vec<Polygon>) -> Result<(), Error> {
        let mut meshes = self.meshes.write();
        let entry = meshes.get_mut(mesh).ok_or(Error::handle("mesh", mesh))?;
        entry.mesh.bind_faces(polygons);
        Ok(())
    }

    /// Validate the mesh and kick off an acceleration structure build on
    /// the thread pool. The finished tree is swapped in under the write
    /// lock; workers holding the previous tree keep it alive through
    /// their own `Arc` until their tile ends.
    pub fn mesh_finalize(self: &Arc<Self>, mesh: usize) -> Result<(), Error> {
        let snapshot = {
            let meshes = self.meshes.read();
            let entry = meshes.get(mesh).ok_or(Error::handle("mesh", mesh))?;
            entry.mesh.validate().map_err(Error::BuildFailed)?;
            entry.mesh.clone()
        };

        let scene = Arc::clone(self);
        rayon::spawn(move || scene.build_and_swap(mesh, snapshot));
        Ok(())
    }

    /// Same as `mesh_finalize` but builds on the calling thread, so the
    /// mesh is renderable when this returns.
    pub fn mesh_finalize_blocking(&self, mesh: usize) -> Result<(), Error> {
        let snapshot = {
            let meshes = self.meshes.read();
            let entry = meshes.get(mesh).ok_or(Error::handle("mesh", mesh))?;
            entry.mesh.validate().map_err(Error::BuildFailed)?;
            entry.mesh.clone()
        };
        self.build_and_swap(mesh, snapshot);
        Ok(())
    }

    fn build_and_swap(&self, mesh: usize, snapshot: Mesh) {
        let name = snapshot.name.clone();
        let polys = snapshot.polygon_count();
        match MeshBvh::build(snapshot) {
            Ok(bvh) => {
                let old;
                {
                    let mut meshes = self.meshes.write();
                    match meshes.get_mut(mesh) {
                        Some(entry) => old = entry.bvh.replace(Arc::new(bvh)),
                        // Entry vanished while we were building.
                        None => return,
                    }
                }
                // Old tree drops here, outside the lock.
                drop(old);
                self.top_level_dirty.store(true, Ordering::Release);
                debug!("built BVH for mesh '{name}' ({polys} polygons)");
            }
            Err(err) => {
                // Geometry raced past the validate; mesh stays unrenderable.
                warn!("BVH build failed for mesh '{name}': {err}");
            }
        }
    }

    pub fn mesh_ready(&self, mesh: usize) -> bool {
        self.meshes
            .read()
            .get(mesh)
            .is_some_and(|e| e.bvh.is_some())
    }

    // --- spheres ---

    pub fn add_sphere(&self, radius: f32) -> usize {
        let mut spheres = self.spheres.write();
        spheres.push(Sphere::new(radius));
        spheres.len() - 1
    }

    // --- instances ---

    pub fn add_instance(&self, object: ObjectRef, material_set: usize) -> Result<usize, Error> {
        match object {
            ObjectRef::Mesh(i) if i >= self.meshes.read().len() => {
                return Err(Error::handle("mesh", i));
            }
            ObjectRef::Sphere(i) if i >= self.spheres.read().len() => {
                return Err(Error::handle("sphere", i));
            }
            _ => {}
        }
        if material_set >= self.material_sets.read().len() {
            return Err(Error::handle("material set", material_set));
        }

        let mut instances = self.instances.write();
        instances.push(Instance {
            object,
            transform: Mat4::IDENTITY,
            material_set,
        });
        self.top_level_dirty.store(true, Ordering::Release);
        Ok(instances.len() - 1)
    }

    /// Replace an instance's transform outright. Setting the transform it
    /// already has is free and does not invalidate the hierarchy.
    pub fn instance_set_transform(&self, instance: usize, transform: Mat4) -> Result<(), Error> {
        let mut instances = self.instances.write();
        let inst = instances
            .get_mut(instance)
            .ok_or(Error::handle("instance", instance))?;
        if inst.transform == transform {
            return Ok(());
        }
        inst.transform = transform;
        self.top_level_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Compose a further transform onto an instance: new = current * t.
    pub fn instance_transform(&self, instance: usize, t: Mat4) -> Result<(), Error> {
        let mut instances = self.instances.write();
        let inst = instances
            .get_mut(instance)
            .ok_or(Error::handle("instance", instance))?;
        inst.transform *= t;
        self.top_level_dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn instance_bind_material_set(&self, instance: usize, set: usize) -> Result<(), Error> {
        if set >= self.material_sets.read().len() {
            return Err(Error::handle("material set", set));
        }
        let mut instances = self.instances.write();
        let inst = instances
            .get_mut(instance)
            .ok_or(Error::handle("instance", instance))?;
        inst.material_set = set;
        self.top_level_dirty.store(true, Ordering::Release);
        Ok(())
    }

    // --- cameras ---

    pub fn add_camera(&self, camera: Camera) -> usize {
        let mut cameras = self.cameras.write();
        cameras.push(camera);
        cameras.len() - 1
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.read().len()
    }

    /// Snapshot of one camera for a render pass.
    pub fn camera(&self, camera: usize) -> Result<Camera, Error> {
        self.cameras
            .read()
            .get(camera)
            .cloned()
            .ok_or(Error::handle("camera", camera))
    }

    /// Mutate a camera in place. The closure should call `update()` after
    /// editing pose or optics fields.
    pub fn with_camera(
        &self,
        camera: usize,
        f: impl FnOnce(&mut Camera),
    ) -> Result<(), Error> {
        let mut cameras = self.cameras.write();
        let cam = cameras
            .get_mut(camera)
            .ok_or(Error::handle("camera", camera))?;
        f(cam);
        Ok(())
    }

    // --- materials ---

    pub fn add_material_set(&self, set: MaterialSet) -> usize {
        let mut sets = self.material_sets.write();
        sets.push(Arc::new(set));
        sets.len() - 1
    }

    pub fn material_set_add(&self, set: usize, material: Material) -> Result<usize, Error> {
        let mut sets = self.material_sets.write();
        let entry = sets.get_mut(set).ok_or(Error::handle("material set", set))?;
        Ok(Arc::make_mut(entry).add(material))
    }

    pub fn material_set_update(
        &self,
        set: usize,
        slot: usize,
        material: Material,
    ) -> Result<(), Error> {
        let mut sets = self.material_sets.write();
        let entry = sets.get_mut(set).ok_or(Error::handle("material set", set))?;
        if !Arc::make_mut(entry).update(slot, material) {
            return Err(Error::handle("material slot", slot));
        }
        Ok(())
    }

    // --- environment ---

    pub fn set_background(&self, color: Color) {
        *self.background.write() = color;
    }

    pub fn background(&self) -> Color {
        *self.background.read()
    }

    // --- aggregate state ---

    pub fn totals(&self) -> SceneTotals {
        let meshes = self.meshes.read();
        SceneTotals {
            meshes: meshes.len(),
            spheres: self.spheres.read().len(),
            instances: self.instances.read().len(),
            cameras: self.cameras.read().len(),
            polygons: meshes.iter().map(|e| e.mesh.polygon_count()).sum(),
            vertices: meshes.iter().map(|e| e.mesh.vertex_count()).sum(),
        }
    }

    pub fn top_level_dirty(&self) -> bool {
        self.top_level_dirty.load(Ordering::Acquire)
    }

    /// Rebuild the instance hierarchy from current state and publish it.
    /// Instances whose mesh has no tree yet are left out of this snapshot
    /// and picked up by the next rebuild.
    pub fn rebuild_top_level(&self) {
        let records = {
            let meshes = self.meshes.read();
            let spheres = self.spheres.read();
            let instances = self.instances.read();
            instances
                .iter()
                .filter_map(|inst| {
                    let geometry = match inst.object {
                        ObjectRef::Mesh(i) => match meshes.get(i).and_then(|e| e.bvh.clone()) {
                            Some(bvh) => GeometryRef::Mesh(bvh),
                            None => {
                                warn!("instance references mesh {i} with no built BVH, skipping");
                                return None;
                            }
                        },
                        ObjectRef::Sphere(i) => GeometryRef::Sphere(*spheres.get(i)?),
                    };
                    Some(InstanceRecord::new(geometry, inst.transform, inst.material_set))
                })
                .collect::<Vec<_>>()
        };

        let top = Arc::new(TopLevel::build(records));
        debug!("rebuilt top-level hierarchy over {} instances", top.instance_count());
        let old = self.top_level.write().replace(top);
        drop(old);
        self.top_level_dirty.store(false, Ordering::Release);
    }

    /// Consistent snapshot of everything a worker needs to trace a tile.
    pub fn trace_view(&self) -> TraceView {
        TraceView {
            top_level: self.top_level.read().clone(),
            material_sets: self.material_sets.read().clone(),
            background: self.background(),
        }
    }
}

/// Per-tile tracing snapshot. Cheap to build (a handful of `Arc` clones)
/// and immutable for the tile's lifetime, so scene edits landing mid-tile
/// are seen only by later tiles.
#[derive(Debug, Clone)]
pub struct TraceView {
    pub top_level: Option<Arc<TopLevel>>,
    pub material_sets: Vec<Arc<MaterialSet>>,
    pub background: Color,
}

impl TraceView {
    /// Material for a hit, falling back through the set's placeholder when
    /// either index is out of range.
    pub fn material(&self, set_idx: usize, mat_idx: u16) -> Material {
        self.material_sets
            .get(set_idx)
            .map(|set| set.get(mat_idx as usize).clone())
            .unwrap_or_default()
    }
}
