//! The batch scheduler.
//!
//! One `Scheduler` owns everything: the task queue, the worker pool,
//! both caches, and the context of every live batch.  It runs on one
//! thread, the caller's.  Workers report through a channel which the
//! scheduler drains in [`Scheduler::poll`]; every state change happens
//! either there or in one of the public calls below, so nothing here
//! needs a lock.
//!
//! The heart of it is `tick`, which hands waiting jobs to idle
//! workers.  It runs after every registration and every result.  If the
//! reference-orbit workers are still starting up, it sets a retry
//! deadline instead, which `poll` honours.

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::batch::{BatchContext, BatchOutcome, BatchRequest};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::{BatchId, Job, JobId, JobKind, RefOrbitJob, TileJob};
use crate::orbit_cache::RefOrbitCache;
use crate::params::RenderMode;
use crate::planes::Rect;
use crate::pool::WorkerPool;
use crate::queue::TaskQueue;
use crate::tile_cache::TileCache;
use crate::worker::{WorkerEvent, WorkerSpawner};

/// The scheduler aggregate.  See the module documentation.
pub struct Scheduler {
    config: Config,
    spawner: Box<dyn WorkerSpawner>,
    pool: WorkerPool,
    queue: TaskQueue,
    orbit_cache: RefOrbitCache,
    tile_cache: TileCache,
    batches: HashMap<BatchId, BatchContext>,
    // Started but not yet registered.
    accepting: HashSet<BatchId>,
    assignments: HashMap<JobId, (JobKind, usize)>,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    retry_at: Option<Instant>,
    redraws: Vec<Rect>,
    next_job: u64,
    next_batch: u64,
}

impl Scheduler {
    /// Validates `config` and spawns the worker pool it describes.
    pub fn new(config: Config, spawner: Box<dyn WorkerSpawner>) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = unbounded();
        let mut scheduler = Scheduler {
            orbit_cache: RefOrbitCache::new(config.reuse_distance),
            config,
            spawner,
            pool: WorkerPool::new(),
            queue: TaskQueue::new(),
            tile_cache: TileCache::new(),
            batches: HashMap::new(),
            accepting: HashSet::new(),
            assignments: HashMap::new(),
            events_tx,
            events_rx,
            retry_at: None,
            redraws: vec![],
            next_job: 1,
            next_batch: 1,
        };
        scheduler.fill_pool()?;
        Ok(scheduler)
    }

    fn fill_pool(&mut self) -> Result<()> {
        self.pool.prepare(
            self.spawner.as_ref(),
            &self.events_tx,
            self.config.worker_count,
            self.config.ref_orbit_workers,
            self.config.mode,
        )
    }

    /// The configuration in force.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rebuilds the pool with `count` tile workers for `mode`.
    /// Everything outstanding is abandoned first; see
    /// [`reset_workers`](Scheduler::reset_workers).
    pub fn prepare_worker_pool(&mut self, count: usize, mode: RenderMode) -> Result<()> {
        if count == 0 {
            return Err(Error::NoWorkers);
        }
        self.config.worker_count = count;
        self.config.mode = mode;
        self.reset_workers();
        self.fill_pool()
    }

    /// Terminates every worker and abandons every batch.  Each live
    /// batch hears `BatchOutcome::Reconfigured`.  The tile cache is
    /// emptied; the orbit cache survives.
    pub fn reset_workers(&mut self) {
        self.pool.reset();
        self.queue.clear();
        self.assignments.clear();
        for (id, mut ctx) in self.batches.drain() {
            if !ctx.is_finished() {
                info!("{} abandoned by reconfiguration", id);
            }
            ctx.report(BatchOutcome::Reconfigured);
        }
        self.accepting.clear();
        self.tile_cache.clear();
        self.retry_at = None;
        self.redraws.clear();
    }

    /// A fresh batch id.
    pub fn next_batch_id(&mut self) -> BatchId {
        let id = BatchId(self.next_batch);
        self.next_batch += 1;
        id
    }

    fn next_job_id(&mut self) -> JobId {
        let id = JobId(self.next_job);
        self.next_job += 1;
        id
    }

    /// Admits a batch.  Registration is refused for any id that
    /// hasn't been started, that was cancelled since, or that has
    /// already been registered once.
    pub fn start_batch(&mut self, id: BatchId) {
        self.accepting.insert(id);
    }

    /// Turns a request into jobs and starts dispatching them.  Quietly
    /// does nothing if the batch isn't accepted.
    pub fn register_batch(&mut self, id: BatchId, request: BatchRequest) {
        // An accepted id registers once; after that it lives in `batches`.
        if !self.accepting.remove(&id) || self.batches.contains_key(&id) {
            info!(
                "{} was not accepted (cancelled or already registered?); registration denied",
                id
            );
            return;
        }

        // Finished contexts were only kept to report "Done!".
        self.batches.retain(|_, ctx| !ctx.is_finished());

        let BatchRequest {
            params,
            canvas,
            tiles,
            on_complete,
        } = request;

        let reuse = if self.config.reuse_ref_orbit {
            self.orbit_cache.get_if_available(&params)
        } else {
            None
        };

        let orbit_id = self.next_job_id();
        self.queue.add_job(Job::RefOrbit(RefOrbitJob {
            id: orbit_id,
            batch_id: id,
            params: params.clone(),
            reuse,
        }));

        let mut ctx = BatchContext::new(params, canvas, on_complete);
        for rect in tiles {
            let tile_id = self.next_job_id();
            self.queue.add_job(Job::Tile(TileJob {
                id: tile_id,
                batch_id: id,
                required_job_ids: vec![orbit_id],
                rect,
            }));
            ctx.set_progress(tile_id, 0.0);
        }
        self.batches.insert(id, ctx);
        debug!("{} registered", id);

        self.tick();
    }

    /// Abandons a batch: its waiting jobs are dropped, its running jobs
    /// are aborted, and its callback hears `BatchOutcome::Cancelled`.
    /// Cancelling a finished, cancelled or unknown batch does nothing.
    pub fn cancel_batch(&mut self, id: BatchId) {
        self.accepting.remove(&id);
        let stopped = self.queue.remove_batch(id);
        let ctx = self.batches.remove(&id);

        for job in &stopped {
            if let Some((kind, idx)) = self.assignments.remove(&job.id()) {
                if let Some(worker) = self.pool.get_mut(kind, idx) {
                    worker.cancel(ctx.as_ref(), job);
                }
            }
        }

        if let Some(mut ctx) = ctx {
            if !ctx.is_finished() {
                ctx.report(BatchOutcome::Cancelled);
                info!("{} cancelled, {} running job(s) aborted", id, stopped.len());
            }
        }

        self.tick();
    }

    fn is_live(&self, id: BatchId) -> bool {
        self.batches.get(&id).map_or(false, |ctx| !ctx.is_finished())
    }

    /// Is any registered batch still unfinished?
    pub fn has_live_batch(&self) -> bool {
        self.batches.values().any(|ctx| !ctx.is_finished())
    }

    /// True once the batch has nothing waiting or running.  Unknown
    /// batches count as completed.
    pub fn is_batch_completed(&self, id: BatchId) -> bool {
        self.queue.is_batch_completed(id)
    }

    /// The progress line for the most recent batch.  Before any batch
    /// is registered, an accepted id reads as the orbit being computed.
    pub fn progress_string(&self) -> String {
        match self.batches.values().max_by_key(|ctx| ctx.started_at()) {
            Some(ctx) => ctx.describe(),
            None if !self.accepting.is_empty() => "Calculating reference orbit...".to_string(),
            None => String::new(),
        }
    }

    // Arms the retry deadline unless one is still pending.  An expired
    // deadline counts as none.
    fn defer_tick(&mut self) {
        let now = Instant::now();
        if self.retry_at.map_or(true, |at| at <= now) {
            debug!("reference-orbit workers not ready; retrying shortly");
            self.retry_at = Some(now + self.config.retry_interval);
        }
    }

    fn tick(&mut self) {
        if !self.pool.all_ready(JobKind::RefOrbit) {
            self.defer_tick();
            return;
        }
        self.retry_at = None;

        // Orbit jobs nobody has to compute: there are no orbit workers
        // to compute them, or the cache already has a good one.
        let no_orbit_workers = self.pool.worker_count(JobKind::RefOrbit) == 0;
        while let Some(job) = self
            .queue
            .pop_waiting_executable_job_where(JobKind::RefOrbit, |job| match job {
                Job::RefOrbit(job) => no_orbit_workers || job.reuse.is_some(),
                Job::Tile(_) => false,
            })
        {
            self.settle_without_dispatch(job);
        }

        for &kind in &[JobKind::RefOrbit, JobKind::Tile] {
            while let Some(idx) = self.pool.find_free_worker_index(kind) {
                match self.queue.pop_waiting_executable_job(kind) {
                    Some(job) => self.start(kind, idx, job),
                    None => break,
                }
            }
        }

        self.queue.prune_done_jobs();
        debug!(
            "tick: {} waiting, {} tile and {} reference-orbit running",
            self.queue.waiting_len(),
            self.queue.running_len(Some(JobKind::Tile)),
            self.queue.running_len(Some(JobKind::RefOrbit))
        );
    }

    fn settle_without_dispatch(&mut self, job: Job) {
        let (id, batch_id) = (job.id(), job.batch_id());
        let reuse = match job {
            Job::RefOrbit(job) => job.reuse,
            Job::Tile(_) => None,
        };
        if reuse.is_some() {
            debug!("{} reuses the cached reference orbit", batch_id);
        }
        self.queue.mark_done(id);
        if let Some(ctx) = self.batches.get_mut(&batch_id) {
            ctx.settle_orbit(reuse, None);
        }
        self.check_batch_completed(batch_id);
    }

    fn start(&mut self, kind: JobKind, idx: usize, job: Job) {
        let slot = self.pool.normalized_slot(kind, idx);
        let ctx = match self.batches.get(&job.batch_id()) {
            Some(ctx) => ctx,
            None => {
                debug!("{} belongs to no live batch; dropped", job.id());
                return;
            }
        };
        if let Some(worker) = self.pool.get_mut(kind, idx) {
            worker.start_calculate(&job, ctx, slot);
        }
        self.assignments.insert(job.id(), (kind, idx));
        self.queue.start_job(job);
    }

    fn check_batch_completed(&mut self, id: BatchId) {
        if !self.queue.is_batch_completed(id) {
            return;
        }
        if let Some(ctx) = self.batches.get_mut(&id) {
            if !ctx.is_finished() {
                let elapsed = ctx.finish();
                info!("{} done in {}ms", id, elapsed.as_millis());
            }
        }
    }

    /// Applies one worker event.
    pub fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready { kind, slot } => {
                debug!("{} worker {} ready", kind, slot);
                self.tick();
            }

            WorkerEvent::Progress {
                job,
                batch_id,
                kind,
                progress,
            } => {
                if !self.is_live(batch_id) {
                    return;
                }
                if let Some(ctx) = self.batches.get_mut(&batch_id) {
                    match kind {
                        JobKind::Tile => ctx.set_progress(job, progress),
                        JobKind::RefOrbit => ctx.set_orbit_progress(progress),
                    }
                }
            }

            WorkerEvent::Intermediate {
                job,
                buffer,
                resolution,
            } => {
                if !self.is_live(job.batch_id) {
                    return;
                }
                self.tile_cache.upsert(job.rect, buffer, resolution);
                self.redraws.push(job.rect);
            }

            WorkerEvent::TileResult { job, buffer } => {
                if !self.is_live(job.batch_id) {
                    debug!("dropping stale result for {}", job.id);
                    return;
                }
                if let Some(ctx) = self.batches.get_mut(&job.batch_id) {
                    ctx.set_progress(job.id, 1.0);
                }
                self.tile_cache
                    .upsert(job.rect, buffer, job.rect.full_resolution());
                self.queue.complete_job(job.id);
                self.assignments.remove(&job.id);
                self.redraws.push(job.rect);
                self.check_batch_completed(job.batch_id);
                self.tick();
            }

            WorkerEvent::OrbitResult {
                job,
                orbit,
                elapsed,
            } => {
                if !self.is_live(job.batch_id) {
                    debug!("dropping stale reference orbit for {}", job.id);
                    return;
                }
                let orbit = Arc::new(orbit);
                if let Some(ctx) = self.batches.get_mut(&job.batch_id) {
                    ctx.settle_orbit(Some(orbit.clone()), Some(elapsed));
                }
                self.orbit_cache.set(orbit);
                self.queue.complete_job(job.id);
                self.assignments.remove(&job.id);
                info!(
                    "{}: reference orbit took {}ms",
                    job.batch_id,
                    elapsed.as_millis()
                );
                self.check_batch_completed(job.batch_id);
                self.tick();
            }

            WorkerEvent::Terminated { job } => {
                if self.is_live(job.batch_id()) && self.queue.requeue_job(job.id()) {
                    debug!("{} was abandoned by its worker; requeued", job.id());
                    self.assignments.remove(&job.id());
                }
                self.tick();
            }
        }
    }

    /// Waits up to `timeout` for worker events and applies every one
    /// that has arrived, then runs a deferred tick if one is due.
    /// Returns the number of events handled.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        let wait = match self.retry_at {
            Some(at) => timeout.min(at.saturating_duration_since(Instant::now())),
            None => timeout,
        };

        let mut handled = 0;
        if let Ok(event) = self.events_rx.recv_timeout(wait) {
            self.handle_event(event);
            handled += 1;
            while let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event);
                handled += 1;
            }
        }

        if let Some(at) = self.retry_at {
            if Instant::now() >= at {
                self.tick();
            }
        }
        handled
    }

    /// Polls in steps of `step` until no batch is left running.
    pub fn run_until_idle(&mut self, step: Duration) {
        while self.has_live_batch() {
            self.poll(step);
        }
    }

    /// Drains the list of canvas rectangles whose pixels changed.
    pub fn take_redraws(&mut self) -> Vec<Rect> {
        std::mem::replace(&mut self.redraws, vec![])
    }

    /// How many workers `kind` has.
    pub fn worker_count(&self, kind: JobKind) -> usize {
        self.pool.worker_count(kind)
    }

    /// Every tile computed so far.
    pub fn tile_cache(&self) -> &TileCache {
        &self.tile_cache
    }

    /// The iteration count at a canvas point, if some tile covers it.
    pub fn iteration_at(&self, x: f64, y: f64) -> Option<u32> {
        self.tile_cache.query(x, y)
    }

    /// Shifts every cached tile to follow a pan of `(dx, dy)` pixels.
    pub fn translate_tiles(&mut self, dx: i32, dy: i32) {
        self.tile_cache.translate(dx, dy);
    }

    /// Forgets every cached tile, for a view that shares nothing with
    /// the last one.
    pub fn clear_tiles(&mut self) {
        self.tile_cache.clear();
    }

    /// The reference-orbit cache.
    pub fn ref_orbit_cache(&self) -> &RefOrbitCache {
        &self.orbit_cache
    }
}
