//! The worker pool registry: one list of facades per job kind.

use crossbeam::channel::Sender;
use log::info;

use crate::error::Result;
use crate::job::JobKind;
use crate::params::RenderMode;
use crate::worker::{WorkerEvent, WorkerFacade, WorkerSpawner};

/// Tile workers and reference-orbit workers, kept apart so a long
/// orbit computation never takes a tile worker out of service.
#[derive(Default)]
pub struct WorkerPool {
    tile: Vec<Box<dyn WorkerFacade>>,
    ref_orbit: Vec<Box<dyn WorkerFacade>>,
}

impl WorkerPool {
    /// An empty pool.
    pub fn new() -> Self {
        WorkerPool::default()
    }

    /// Throws away every worker and spawns `count` tile workers, plus
    /// `ref_count` orbit workers if `mode` needs them.
    pub fn prepare(
        &mut self,
        spawner: &dyn WorkerSpawner,
        events: &Sender<WorkerEvent>,
        count: usize,
        ref_count: usize,
        mode: RenderMode,
    ) -> Result<()> {
        self.reset();
        for slot in 0..count {
            let worker = spawner.spawn(JobKind::Tile, slot, events.clone())?;
            self.tile.push(worker);
        }
        if mode.uses_perturbation() {
            for idx in 0..ref_count {
                let slot = self.normalized_slot(JobKind::RefOrbit, idx);
                let worker = spawner.spawn(JobKind::RefOrbit, slot, events.clone())?;
                self.ref_orbit.push(worker);
            }
        }
        info!(
            "worker pool: {} tile, {} reference-orbit ({})",
            self.tile.len(),
            self.ref_orbit.len(),
            mode
        );
        Ok(())
    }

    /// Silences and terminates every worker, then forgets them.
    pub fn reset(&mut self) {
        for worker in self.tile.iter_mut().chain(self.ref_orbit.iter_mut()) {
            worker.clear_callbacks();
            worker.terminate();
        }
        self.tile.clear();
        self.ref_orbit.clear();
    }

    fn workers(&self, kind: JobKind) -> &[Box<dyn WorkerFacade>] {
        match kind {
            JobKind::Tile => &self.tile,
            JobKind::RefOrbit => &self.ref_orbit,
        }
    }

    /// The first worker of `kind` that is ready and idle.
    pub fn find_free_worker_index(&self, kind: JobKind) -> Option<usize> {
        self.workers(kind)
            .iter()
            .position(|worker| worker.is_ready() && !worker.is_running())
    }

    /// The worker at `idx` in `kind`'s list.
    pub fn get_mut(&mut self, kind: JobKind, idx: usize) -> Option<&mut Box<dyn WorkerFacade>> {
        match kind {
            JobKind::Tile => self.tile.get_mut(idx),
            JobKind::RefOrbit => self.ref_orbit.get_mut(idx),
        }
    }

    /// How many workers `kind` has.
    pub fn worker_count(&self, kind: JobKind) -> usize {
        self.workers(kind).len()
    }

    /// Has every worker of `kind` finished starting up?  An empty list
    /// counts as ready.
    pub fn all_ready(&self, kind: JobKind) -> bool {
        self.workers(kind).iter().all(|worker| worker.is_ready())
    }

    /// A slot number unique across both lists: orbit workers come
    /// after the tile workers.
    pub fn normalized_slot(&self, kind: JobKind, idx: usize) -> usize {
        match kind {
            JobKind::Tile => idx,
            JobKind::RefOrbit => self.tile.len() + idx,
        }
    }
}
