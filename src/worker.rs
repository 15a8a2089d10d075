//! Worker facades.
//!
//! A facade is the scheduler's handle on one compute worker: it can
//! tell whether the worker is up and whether it's busy, hand it a job,
//! ask it to abandon that job, and shut it down.  Workers never call
//! back into the scheduler.  Everything they have to say (ready,
//! progress, a preview, a result, "I gave up") goes into one channel
//! of [`WorkerEvent`]s that only the scheduler reads, so all of the
//! scheduler's state stays on the scheduler's thread.
//!
//! [`ThreadWorker`] is the facade over an OS thread running a
//! [`Kernel`].  Tests and embedders can supply their own facades
//! through a [`WorkerSpawner`].

use crossbeam::channel::{unbounded, Sender};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::batch::BatchContext;
use crate::error::{Error, Result};
use crate::job::{BatchId, Job, JobId, JobKind, RefOrbitJob, TileJob};
use crate::kernel::{Kernel, TileReport};
use crate::orbit_cache::RefOrbit;
use crate::params::ViewParams;
use crate::planes::Resolution;

/// Something a worker has to tell the scheduler.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The worker finished starting up.
    Ready {
        /// Its pool.
        kind: JobKind,
        /// Its index in the pool.
        slot: usize,
    },
    /// How far along a job is, as a fraction.
    Progress {
        /// The job.
        job: JobId,
        /// Its batch.
        batch_id: BatchId,
        /// Its kind.
        kind: JobKind,
        /// Somewhere in `[0, 1]`.
        progress: f64,
    },
    /// A coarse preview of a tile, ahead of the real thing.
    Intermediate {
        /// The tile job.
        job: TileJob,
        /// Iteration counts, row by row.
        buffer: Vec<u32>,
        /// The shape of `buffer`.
        resolution: Resolution,
    },
    /// A tile at full resolution.
    TileResult {
        /// The tile job.
        job: TileJob,
        /// Iteration counts, one per pixel of the tile, row by row.
        buffer: Vec<u32>,
    },
    /// A computed reference orbit.
    OrbitResult {
        /// The orbit job.
        job: RefOrbitJob,
        /// The orbit.
        orbit: RefOrbit,
        /// How long the computation took.
        elapsed: Duration,
    },
    /// The worker stopped a job without finishing it.
    Terminated {
        /// The abandoned job.
        job: Job,
    },
}

/// The scheduler's handle on one worker.
pub trait WorkerFacade {
    /// Has the worker finished starting up?  Always false once it has
    /// been terminated.
    fn is_ready(&self) -> bool;

    /// Is the worker busy with a job?
    fn is_running(&self) -> bool;

    /// Hands the worker a job.  The outcome comes back as events.
    fn start_calculate(&mut self, job: &Job, ctx: &BatchContext, slot: usize);

    /// Asks the worker to abandon `job` if it is still working on it.
    fn cancel(&mut self, ctx: Option<&BatchContext>, job: &Job);

    /// Shuts the worker down for good.
    fn terminate(&mut self);

    /// Stops the worker from sending any more events.
    fn clear_callbacks(&mut self);
}

/// Makes facades for the pool registry.
pub trait WorkerSpawner {
    /// A new worker for `kind`'s pool at index `slot`, reporting into
    /// `events`.
    fn spawn(
        &self,
        kind: JobKind,
        slot: usize,
        events: Sender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerFacade>>;
}

/// Raised to ask a running computation to give up.  Kernels check it
/// between rows.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// A flag that isn't raised.
    pub fn new() -> Self {
        AbortFlag::default()
    }

    /// Raises the flag.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Has it been raised?
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct WorkerState {
    ready: AtomicBool,
    running: AtomicBool,
    terminated: AtomicBool,
    muted: AtomicBool,
}

impl WorkerState {
    fn emit(&self, events: &Sender<WorkerEvent>, event: WorkerEvent) {
        if !self.muted.load(Ordering::SeqCst) {
            // Nobody listening means the scheduler is gone; nothing to do.
            let _ = events.send(event);
        }
    }
}

struct Order {
    job: Job,
    params: ViewParams,
    canvas: Resolution,
    orbit: Option<Arc<RefOrbit>>,
    abort: AbortFlag,
}

/// A worker backed by its own thread.
pub struct ThreadWorker {
    kind: JobKind,
    slot: usize,
    orders: Option<Sender<Order>>,
    state: Arc<WorkerState>,
    current: Option<(JobId, AbortFlag)>,
}

impl ThreadWorker {
    /// Starts the thread.  The worker reports `Ready` once it's up.
    pub fn spawn(
        kind: JobKind,
        slot: usize,
        kernel: Arc<dyn Kernel>,
        events: Sender<WorkerEvent>,
    ) -> Result<ThreadWorker> {
        let (orders, inbox) = unbounded::<Order>();
        let state = Arc::new(WorkerState::default());
        let worker_state = state.clone();

        thread::Builder::new()
            .name(format!("{}-{}", kind, slot))
            .spawn(move || {
                worker_state.ready.store(true, Ordering::SeqCst);
                worker_state.emit(&events, WorkerEvent::Ready { kind, slot });
                for order in inbox.iter() {
                    let event = execute(kernel.as_ref(), order, &worker_state, &events);
                    worker_state.running.store(false, Ordering::SeqCst);
                    worker_state.emit(&events, event);
                }
            })
            .map_err(|cause| Error::Spawn { kind, slot, cause })?;

        Ok(ThreadWorker {
            kind,
            slot,
            orders: Some(orders),
            state,
            current: None,
        })
    }
}

/// Runs one job to completion (or abandonment) on the worker thread.
fn execute(
    kernel: &dyn Kernel,
    order: Order,
    state: &WorkerState,
    events: &Sender<WorkerEvent>,
) -> WorkerEvent {
    let Order {
        job,
        params,
        canvas,
        orbit,
        abort,
    } = order;

    match job {
        Job::RefOrbit(job) => {
            let started = Instant::now();
            let (id, batch_id) = (job.id, job.batch_id);
            let computed = {
                let mut report = |progress: f64| {
                    state.emit(
                        events,
                        WorkerEvent::Progress {
                            job: id,
                            batch_id,
                            kind: JobKind::RefOrbit,
                            progress,
                        },
                    )
                };
                kernel.reference_orbit(&params, &abort, &mut report)
            };
            match computed {
                Some(orbit) => WorkerEvent::OrbitResult {
                    job,
                    orbit,
                    elapsed: started.elapsed(),
                },
                None => WorkerEvent::Terminated {
                    job: Job::RefOrbit(job),
                },
            }
        }
        Job::Tile(job) => {
            let computed = {
                let mut report = |update: TileReport| {
                    let event = match update {
                        TileReport::Progress(progress) => WorkerEvent::Progress {
                            job: job.id,
                            batch_id: job.batch_id,
                            kind: JobKind::Tile,
                            progress,
                        },
                        TileReport::Preview(buffer, resolution) => WorkerEvent::Intermediate {
                            job: job.clone(),
                            buffer,
                            resolution,
                        },
                    };
                    state.emit(events, event)
                };
                kernel.iterate_tile(
                    job.rect,
                    &params,
                    canvas,
                    orbit.as_ref().map(Arc::as_ref),
                    &abort,
                    &mut report,
                )
            };
            match computed {
                Some(buffer) => WorkerEvent::TileResult { job, buffer },
                None => WorkerEvent::Terminated { job: Job::Tile(job) },
            }
        }
    }
}

impl WorkerFacade for ThreadWorker {
    fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::SeqCst) && !self.state.terminated.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    fn start_calculate(&mut self, job: &Job, ctx: &BatchContext, slot: usize) {
        let orders = match self.orders {
            Some(ref orders) => orders,
            None => return,
        };
        let abort = AbortFlag::new();
        let order = Order {
            job: job.clone(),
            params: ctx.params().clone(),
            canvas: ctx.canvas(),
            orbit: ctx.orbit().cloned(),
            abort: abort.clone(),
        };
        self.state.running.store(true, Ordering::SeqCst);
        if orders.send(order).is_err() {
            self.state.running.store(false, Ordering::SeqCst);
            return;
        }
        debug!("{} worker {} (slot {}) started {}", self.kind, self.slot, slot, job.id());
        self.current = Some((job.id(), abort));
    }

    fn cancel(&mut self, _ctx: Option<&BatchContext>, job: &Job) {
        if let Some((id, ref abort)) = self.current {
            if id == job.id() {
                debug!("{} worker {} aborting {}", self.kind, self.slot, id);
                abort.raise();
            }
        }
    }

    fn terminate(&mut self) {
        self.state.terminated.store(true, Ordering::SeqCst);
        if let Some((_, ref abort)) = self.current {
            abort.raise();
        }
        // Dropping the sender ends the thread's loop once the current
        // job, if any, has unwound.
        self.orders = None;
    }

    fn clear_callbacks(&mut self) {
        self.state.muted.store(true, Ordering::SeqCst);
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Spawns a [`ThreadWorker`] per slot, all sharing one kernel.
pub struct ThreadSpawner {
    kernel: Arc<dyn Kernel>,
}

impl ThreadSpawner {
    /// Constructor.
    pub fn new(kernel: Arc<dyn Kernel>) -> Self {
        ThreadSpawner { kernel }
    }
}

impl WorkerSpawner for ThreadSpawner {
    fn spawn(
        &self,
        kind: JobKind,
        slot: usize,
        events: Sender<WorkerEvent>,
    ) -> Result<Box<dyn WorkerFacade>> {
        let worker = ThreadWorker::spawn(kind, slot, self.kernel.clone(), events)?;
        Ok(Box::new(worker))
    }
}
